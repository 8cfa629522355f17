//! Message assembly
//!
//! [`MessageBuilder`] turns a [`MessageAdapter`] and its negotiated
//! [`BodyData`] into an [`AssembledMessage`]. What a protocol version
//! gets is decided once, when the builder is created.

mod assemble;
pub mod itip;
pub mod output;

pub use output::{
    AssembledMessage, Body, BodyPartPayload, BodyPartStatus, BusyStatus, FollowUpFlag,
    FollowUpStatus, Importance, MeetingRequest, MessageClass, Sensitivity,
};

use crate::body::text::to_utf8;
use crate::body::{BodyData, BodyPref, BodyPreferences, BodyRepresentation, BodyType, MimeSupport};
use crate::category::CategoryMap;
use crate::error::Result;
use crate::flag::Flag;
use crate::headers::HeaderBlock;
use crate::message::MessageAdapter;
use crate::mime::next_sibling_id;
use crate::store::MailStore;
use crate::version::ProtocolVersion;
use itip::Itip;
use output::{CONTENT_CLASS_CALENDAR, CONTENT_CLASS_MESSAGE, UTF8_CODE_PAGE};
use tracing::{debug, warn};

/// Longest `To` value a device accepts.
const MAX_TO_LENGTH: usize = 32768;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyStrategy {
    /// Plain text only, `legacy_truncation` applied.
    Legacy,
    /// MIME, HTML or plain as negotiated.
    Negotiated,
}

/// Behaviors enabled for one protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Strategy {
    body: BodyStrategy,
    categories: bool,
    /// Message id, answered and forwarded, body preview.
    extended: bool,
    body_part: bool,
    /// Content class and meeting requests.
    calendar: bool,
}

impl Strategy {
    fn for_version(version: ProtocolVersion) -> Self {
        Self {
            body: if version.is_legacy() {
                BodyStrategy::Legacy
            } else {
                BodyStrategy::Negotiated
            },
            categories: version.supports_categories(),
            extended: version.supports_extended_fields(),
            body_part: version.supports_body_part(),
            calendar: version.supports_html(),
        }
    }
}

pub struct MessageBuilder<'c> {
    version: ProtocolVersion,
    strategy: Strategy,
    categories: &'c CategoryMap,
}

impl<'c> MessageBuilder<'c> {
    #[must_use]
    pub fn new(version: ProtocolVersion, categories: &'c CategoryMap) -> Self {
        Self {
            version,
            strategy: Strategy::for_version(version),
            categories,
        }
    }

    #[must_use]
    pub const fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Assemble the message.
    ///
    /// Calendar parse failures are logged and leave the default class.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MessageGone`] if the message disappeared
    /// while its data was being read, or a store error from the fetch.
    pub async fn build<S: MailStore>(
        &self,
        adapter: &mut MessageAdapter<'_, S>,
        body: &BodyData,
        prefs: &BodyPreferences,
    ) -> Result<AssembledMessage> {
        let mut message = AssembledMessage {
            version: self.version,
            uid: adapter.uid(),
            read: adapter.flag(&Flag::Seen),
            internet_cpid: UTF8_CODE_PAGE,
            ..AssembledMessage::default()
        };
        self.header_properties(adapter, &mut message).await?;

        let headers = adapter.headers().await?.clone();
        message.importance = importance(&headers);
        self.special_types(adapter, &mut message).await?;

        if self.strategy.categories {
            message.categories = self.categories.categories(adapter.flags());
        }
        if self.strategy.extended {
            message.message_id = headers.get("Message-ID");
            message.forwarded = Some(adapter.flag(&Flag::Forwarded));
            message.answered = Some(adapter.flag(&Flag::Answered));
        }

        message.body = Some(self.main_body(adapter, body, prefs).await?);
        if let (true, Some(pref), Some(rep)) =
            (self.strategy.body_part, &prefs.body_part, &body.body_part)
        {
            message.body_part = Some(BodyPartPayload {
                status: BodyPartStatus::Success,
                data: rep.body.as_str().to_string(),
                truncated: rep.truncated,
                estimated_size: rep.size_bytes,
                preview: preview(body, pref),
            });
        }
        message.attachments = adapter.attachments(self.version);
        debug!(
            "UID {}: assembled {} with {} attachments",
            message.uid,
            message.message_class,
            message.attachments.len()
        );
        Ok(message)
    }

    async fn header_properties<S: MailStore>(
        &self,
        adapter: &mut MessageAdapter<'_, S>,
        message: &mut AssembledMessage,
    ) -> Result<()> {
        let to = adapter.to_addresses().await?;
        message.to = join_capped(&to.to, ",", MAX_TO_LENGTH);
        message.display_to = to.display_to.join(";");
        if message.display_to.is_empty() {
            message.display_to.clone_from(&message.to);
        }
        message.from = adapter.from_address().await?;
        message.cc = adapter.cc().await?;
        message.reply_to = adapter.reply_to().await?;
        message.subject = adapter.subject().await?;
        message.thread_topic.clone_from(&message.subject);
        message.date_received = adapter.date().await?;
        Ok(())
    }

    async fn special_types<S: MailStore>(
        &self,
        adapter: &mut MessageAdapter<'_, S>,
        message: &mut AssembledMessage,
    ) -> Result<()> {
        if self.strategy.calendar {
            message.content_class = Some(CONTENT_CLASS_MESSAGE.to_string());
        }

        if adapter.is_encrypted() {
            message.message_class = MessageClass::Encrypted;
        } else if adapter.is_signed() {
            message.message_class = MessageClass::Signed;
        }

        if let Some(class) = report_class(adapter).await? {
            message.message_class = class;
        }

        if self.strategy.calendar {
            self.meeting_request(adapter, message).await?;
        }

        if adapter.flag(&Flag::Flagged) {
            message.flag = Some(FollowUpFlag {
                subject: message.subject.clone(),
                status: FollowUpStatus::Active,
                flag_type: Flag::Flagged.to_string(),
            });
        }
        Ok(())
    }

    async fn meeting_request<S: MailStore>(
        &self,
        adapter: &mut MessageAdapter<'_, S>,
        message: &mut AssembledMessage,
    ) -> Result<()> {
        let Some(mime_id) = adapter.structure().icalendar_part().map(|p| p.mime_id.clone()) else {
            return Ok(());
        };
        let text = adapter.mime_part(&mime_id).await?.text();
        let itip = match Itip::parse(&text) {
            Ok(itip) => itip,
            Err(e) => {
                warn!("UID {}: ignoring unreadable calendar part {}: {}", adapter.uid(), mime_id, e);
                return Ok(());
            }
        };
        if !itip.has_event() {
            return Ok(());
        }
        if itip.method.is_some() {
            message.content_class = Some(CONTENT_CLASS_CALENDAR.to_string());
        }
        if let Some(class) = itip.message_class() {
            message.message_class = class;
        }
        if matches!(itip.method.as_deref(), Some("REQUEST" | "PUBLISH" | "REPLY")) {
            message.meeting_request = Some(itip.meeting_request());
        }
        Ok(())
    }

    async fn main_body<S: MailStore>(
        &self,
        adapter: &mut MessageAdapter<'_, S>,
        body: &BodyData,
        prefs: &BodyPreferences,
    ) -> Result<Body> {
        if self.strategy.body == BodyStrategy::Legacy {
            return Ok(text_body(BodyType::Plain, body.plain.as_ref()));
        }

        let smime = adapter.is_signed() || adapter.is_encrypted();
        let effective;
        let prefs = if prefs.mime_support == MimeSupport::SmimeOnly && !smime {
            effective = BodyPreferences {
                mime: None,
                ..prefs.clone()
            };
            &effective
        } else {
            prefs
        };

        let body_type = body.preferred_type(prefs);
        let pref = match body_type {
            BodyType::Mime => prefs.mime.as_ref(),
            BodyType::Html => prefs.html.as_ref(),
            BodyType::Plain | BodyType::Rtf => prefs.plain.as_ref(),
        };
        let preview = pref
            .filter(|_| self.strategy.extended)
            .and_then(|p| preview(body, p));

        let mut out = match body_type {
            BodyType::Mime => {
                let pref = pref.cloned().unwrap_or_default();
                assemble::mime_body(adapter, &pref, self.version.supports_html()).await?
            }
            BodyType::Html => text_body(BodyType::Html, body.html.as_ref()),
            BodyType::Plain | BodyType::Rtf => text_body(BodyType::Plain, body.plain.as_ref()),
        };
        out.preview = preview;
        Ok(out)
    }
}

/// A text body; a missing representation is sent empty.
fn text_body(body_type: BodyType, rep: Option<&BodyRepresentation>) -> Body {
    Body {
        body_type,
        data: rep.map(|r| r.body.as_bytes().to_vec()).unwrap_or_default(),
        truncated: rep.is_some_and(|r| r.truncated),
        estimated_size: rep.map_or(0, |r| r.size_bytes),
        preview: None,
    }
}

/// A bounded prefix of the plain representation.
fn preview(body: &BodyData, pref: &BodyPref) -> Option<String> {
    let chars = pref.preview.filter(|n| *n > 0)?;
    body.plain.as_ref().map(|p| p.body.prefix(chars).to_string())
}

/// `X-Priority` first, with anything but digits dropped; `Importance`
/// when there is none.
fn importance(headers: &HeaderBlock) -> Importance {
    let priority = headers
        .get("X-Priority")
        .map(|p| p.chars().filter(char::is_ascii_digit).collect::<String>())
        .filter(|p| !p.is_empty());
    match priority.or_else(|| headers.get("Importance")) {
        Some(value) => Importance::from_header(&value),
        None => Importance::Normal,
    }
}

/// Delivery status and read receipt classes for `multipart/report`.
async fn report_class<S: MailStore>(
    adapter: &mut MessageAdapter<'_, S>,
) -> Result<Option<MessageClass>> {
    let structure = adapter.structure();
    if structure.mime_type() != "multipart/report" {
        return Ok(None);
    }
    let report_type = structure.param("report-type").map(str::to_ascii_lowercase);
    let Some(report_id) = structure
        .content_type_map()
        .get(1)
        .and_then(|(id, _)| next_sibling_id(id))
    else {
        return Ok(None);
    };
    let charset = structure
        .part(&report_id)
        .and_then(|p| p.charset())
        .map(ToString::to_string);
    let data = adapter.body_part(&report_id, None).await?;
    let text = to_utf8(&data, charset.as_deref());
    let mut lines = text.lines().map(str::trim);

    let class = match report_type.as_deref() {
        Some("delivery-status") => lines
            .filter_map(|l| l.strip_prefix("Action:"))
            .find_map(|action| match action.trim() {
                "failed" => Some(MessageClass::NonDeliveryReport),
                "delayed" => Some(MessageClass::DelayedReport),
                "delivered" => Some(MessageClass::DeliveryReport),
                _ => None,
            }),
        Some("disposition-notification") => lines
            .find(|l| l.starts_with("Disposition:"))
            .and_then(|l| {
                if l.contains("displayed") {
                    Some(MessageClass::ReadReceipt)
                } else if l.contains("deleted") {
                    Some(MessageClass::NotReadReceipt)
                } else {
                    None
                }
            }),
        _ => None,
    };
    Ok(class)
}

/// Join `items` with `sep`, dropping trailing items that would push the
/// result past `max` bytes.
fn join_capped(items: &[String], sep: &str, max: usize) -> String {
    let mut out = String::new();
    for item in items {
        let extra = if out.is_empty() { item.len() } else { sep.len() + item.len() };
        if out.len() + extra > max {
            break;
        }
        if !out.is_empty() {
            out.push_str(sep);
        }
        out.push_str(item);
    }
    out
}
