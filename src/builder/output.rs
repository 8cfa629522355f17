//! The assembled, version-tagged message handed to the protocol layer

use crate::body::BodyType;
use crate::message::Attachment;
use crate::version::ProtocolVersion;
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Code page id for UTF-8.
pub const UTF8_CODE_PAGE: u32 = 65001;

pub const CONTENT_CLASS_MESSAGE: &str = "urn:content-classes:message";
pub const CONTENT_CLASS_CALENDAR: &str = "urn:content-classes:calendarmessage";

/// Message class as shown to the device (`IPM.Note` and friends).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageClass {
    #[default]
    Note,
    Encrypted,
    Signed,
    NonDeliveryReport,
    DelayedReport,
    DeliveryReport,
    ReadReceipt,
    NotReadReceipt,
    MeetingRequest,
    MeetingAccepted,
    MeetingDeclined,
    MeetingTentative,
}

impl MessageClass {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Note => "IPM.Note",
            Self::Encrypted => "IPM.Note.SMIME",
            Self::Signed => "IPM.Note.SMIME.MultipartSigned",
            Self::NonDeliveryReport => "REPORT.IPM.NOTE.NDR",
            Self::DelayedReport => "REPORT.IPM.NOTE.DELAYED",
            Self::DeliveryReport => "REPORT.IPM.NOTE.DR",
            Self::ReadReceipt => "REPORT.IPM.NOTE.IPNRN",
            Self::NotReadReceipt => "REPORT.IPM.NOTE.IPNNRN",
            Self::MeetingRequest => "IPM.Schedule.Meeting.Request",
            Self::MeetingAccepted => "IPM.Schedule.Meeting.Resp.Pos",
            Self::MeetingDeclined => "IPM.Schedule.Meeting.Resp.Neg",
            Self::MeetingTentative => "IPM.Schedule.Meeting.Resp.Tent",
        }
    }
}

impl fmt::Display for MessageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<MessageClass> for String {
    fn from(class: MessageClass) -> Self {
        class.as_str().to_string()
    }
}

/// Three-step importance scale, with the protocol's numeric values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Importance {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
}

impl Importance {
    /// Map an `X-Priority` or `Importance` header value. Numeric
    /// priorities `1` and `5` and the words `high` and `low` are
    /// recognized; anything else is normal.
    #[must_use]
    pub fn from_header(value: &str) -> Self {
        let value = value.trim();
        let digits: String = value.chars().filter(char::is_ascii_digit).collect();
        if digits == "1" || value.eq_ignore_ascii_case("high") {
            Self::High
        } else if digits == "5" || value.eq_ignore_ascii_case("low") {
            Self::Low
        } else {
            Self::Normal
        }
    }
}

/// Main body payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Body {
    pub body_type: BodyType,
    pub data: Vec<u8>,
    pub truncated: bool,
    pub estimated_size: u64,
    pub preview: Option<String>,
}

impl Body {
    /// The body as text. MIME bodies that are not UTF-8 are shown lossily.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BodyPartStatus {
    #[default]
    Success,
}

/// Separate body-part payload for the newest protocol versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyPartPayload {
    pub status: BodyPartStatus,
    pub data: String,
    pub truncated: bool,
    pub estimated_size: u64,
    pub preview: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FollowUpStatus {
    #[default]
    Active,
}

/// Follow-up payload for `\Flagged` messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowUpFlag {
    pub subject: String,
    pub status: FollowUpStatus,
    pub flag_type: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sensitivity {
    #[default]
    Normal,
    Personal,
    Private,
    Confidential,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusyStatus {
    Free,
    Tentative,
    #[default]
    Busy,
}

/// Summary of the event carried by a meeting request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingRequest {
    pub global_object_id: Option<String>,
    pub organizer: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub dtstamp: Option<DateTime<Utc>>,
    pub all_day_event: bool,
    pub location: Option<String>,
    pub sensitivity: Sensitivity,
    pub busy_status: BusyStatus,
    pub response_requested: bool,
}

/// A message rendered for one protocol version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssembledMessage {
    pub version: ProtocolVersion,
    pub uid: u32,
    /// Bare addresses, comma separated.
    pub to: String,
    /// Display names, semicolon separated.
    pub display_to: String,
    pub from: Option<String>,
    pub cc: String,
    pub reply_to: Option<String>,
    pub subject: String,
    pub thread_topic: String,
    pub date_received: Option<DateTime<FixedOffset>>,
    pub read: bool,
    pub message_class: MessageClass,
    pub content_class: Option<String>,
    pub importance: Importance,
    pub internet_cpid: u32,
    pub body: Option<Body>,
    pub body_part: Option<BodyPartPayload>,
    pub flag: Option<FollowUpFlag>,
    pub categories: Vec<String>,
    pub message_id: Option<String>,
    pub answered: Option<bool>,
    pub forwarded: Option<bool>,
    pub attachments: Vec<Attachment>,
    pub meeting_request: Option<MeetingRequest>,
}
