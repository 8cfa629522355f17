//! Minimal iCalendar reader for iTip meeting messages
//!
//! Only what message classification needs: the `METHOD`, the first
//! `VEVENT` and its first attendee's participation status.

use super::output::{BusyStatus, MeetingRequest, MessageClass, Sensitivity};
use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use std::collections::BTreeMap;

/// One unfolded content line: `NAME;PARAM=V:value`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ContentLine {
    name: String,
    params: BTreeMap<String, String>,
    value: String,
}

impl ContentLine {
    fn parse(line: &str) -> Option<Self> {
        let (head, value) = split_value(line)?;
        let mut pieces = head.split(';');
        let name = pieces.next()?.trim().to_ascii_uppercase();
        if name.is_empty() {
            return None;
        }
        let params = pieces
            .filter_map(|p| p.split_once('='))
            .map(|(k, v)| (k.trim().to_ascii_uppercase(), v.trim_matches('"').to_string()))
            .collect();
        Some(Self {
            name,
            params,
            value: value.to_string(),
        })
    }

    fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

/// Split at the first colon outside a quoted parameter value.
fn split_value(line: &str) -> Option<(&str, &str)> {
    let mut quoted = false;
    for (idx, c) in line.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ':' if !quoted => return Some((&line[..idx], &line[idx + 1..])),
            _ => {}
        }
    }
    None
}

/// Undo RFC 5545 line folding.
fn unfold(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in text.split('\n') {
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        if let Some(continuation) = raw.strip_prefix([' ', '\t']) {
            if let Some(last) = lines.last_mut() {
                last.push_str(continuation);
                continue;
            }
        }
        if !raw.is_empty() {
            lines.push(raw.to_string());
        }
    }
    lines
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Itip {
    pub method: Option<String>,
    event: Vec<ContentLine>,
}

impl Itip {
    /// Parse a `VCALENDAR` object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the text is not a calendar or a
    /// component is left unterminated.
    pub fn parse(text: &str) -> Result<Self> {
        let lines: Vec<ContentLine> = unfold(text)
            .iter()
            .filter_map(|l| ContentLine::parse(l))
            .collect();
        if !lines
            .first()
            .is_some_and(|l| l.name == "BEGIN" && l.value.eq_ignore_ascii_case("VCALENDAR"))
        {
            return Err(Error::Parse("calendar does not start with BEGIN:VCALENDAR".into()));
        }

        let mut itip = Self::default();
        let mut stack: Vec<String> = Vec::new();
        let mut in_first_event = false;
        let mut seen_event = false;
        for line in lines {
            match line.name.as_str() {
                "BEGIN" => {
                    let component = line.value.to_ascii_uppercase();
                    if component == "VEVENT" && !seen_event {
                        in_first_event = true;
                        seen_event = true;
                    }
                    stack.push(component);
                }
                "END" => {
                    let component = line.value.to_ascii_uppercase();
                    if stack.pop().as_deref() != Some(component.as_str()) {
                        return Err(Error::Parse(format!("unbalanced END:{component}")));
                    }
                    if component == "VEVENT" {
                        in_first_event = false;
                    }
                }
                "METHOD" if stack.len() == 1 => {
                    itip.method = Some(line.value.trim().to_ascii_uppercase());
                }
                _ if in_first_event && stack.last().map(String::as_str) == Some("VEVENT") => {
                    itip.event.push(line);
                }
                _ => {}
            }
        }
        if !stack.is_empty() {
            return Err(Error::Parse(format!("unterminated {}", stack.join("/"))));
        }
        Ok(itip)
    }

    #[must_use]
    pub fn has_event(&self) -> bool {
        !self.event.is_empty()
    }

    fn property(&self, name: &str) -> Option<&ContentLine> {
        self.event.iter().find(|l| l.name == name)
    }

    fn text(&self, name: &str) -> Option<String> {
        self.property(name)
            .map(|l| unescape(&l.value))
            .filter(|v| !v.is_empty())
    }

    /// `PARTSTAT` of the first attendee.
    #[must_use]
    pub fn first_partstat(&self) -> Option<String> {
        self.property("ATTENDEE")
            .and_then(|l| l.param("PARTSTAT"))
            .map(str::to_ascii_uppercase)
    }

    /// Message class implied by the method, if any.
    #[must_use]
    pub fn message_class(&self) -> Option<MessageClass> {
        if !self.has_event() {
            return None;
        }
        match self.method.as_deref()? {
            "REQUEST" | "PUBLISH" => Some(MessageClass::MeetingRequest),
            "REPLY" => match self.first_partstat()?.as_str() {
                "ACCEPTED" => Some(MessageClass::MeetingAccepted),
                "DECLINED" => Some(MessageClass::MeetingDeclined),
                "TENTATIVE" => Some(MessageClass::MeetingTentative),
                _ => None,
            },
            _ => None,
        }
    }

    #[must_use]
    pub fn meeting_request(&self) -> MeetingRequest {
        let start = self.property("DTSTART");
        let all_day = start.is_some_and(is_date_value);
        MeetingRequest {
            global_object_id: self.text("UID"),
            organizer: self
                .property("ORGANIZER")
                .map(|l| strip_mailto(&l.value).to_string())
                .filter(|v| !v.is_empty()),
            start_time: start.and_then(parse_time),
            end_time: self.property("DTEND").and_then(parse_time),
            dtstamp: self.property("DTSTAMP").and_then(parse_time),
            all_day_event: all_day,
            location: self.text("LOCATION"),
            sensitivity: match self.text("CLASS").map(|c| c.to_ascii_uppercase()).as_deref() {
                Some("PRIVATE") => Sensitivity::Private,
                Some("CONFIDENTIAL") => Sensitivity::Confidential,
                _ => Sensitivity::Normal,
            },
            busy_status: match self.text("TRANSP").map(|t| t.to_ascii_uppercase()).as_deref() {
                Some("TRANSPARENT") => BusyStatus::Free,
                _ if self.text("STATUS").is_some_and(|s| s.eq_ignore_ascii_case("TENTATIVE")) => {
                    BusyStatus::Tentative
                }
                _ => BusyStatus::Busy,
            },
            response_requested: self
                .event
                .iter()
                .filter(|l| l.name == "ATTENDEE")
                .any(|l| l.param("RSVP").is_some_and(|v| v.eq_ignore_ascii_case("TRUE"))),
        }
    }
}

fn strip_mailto(value: &str) -> &str {
    value
        .get(..7)
        .filter(|p| p.eq_ignore_ascii_case("mailto:"))
        .map_or(value, |_| &value[7..])
}

fn is_date_value(line: &ContentLine) -> bool {
    line.param("VALUE").is_some_and(|v| v.eq_ignore_ascii_case("DATE"))
        || (line.value.len() == 8 && line.value.bytes().all(|b| b.is_ascii_digit()))
}

/// Date-times with `Z` are UTC; floating and `TZID` times are read as
/// UTC too, dates as midnight UTC.
fn parse_time(line: &ContentLine) -> Option<DateTime<Utc>> {
    let value = line.value.trim();
    if is_date_value(line) {
        let date = NaiveDate::parse_from_str(value, "%Y%m%d").ok()?;
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
    }
    let naive = NaiveDateTime::parse_from_str(value.trim_end_matches('Z'), "%Y%m%dT%H%M%S").ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n' | 'N') => out.push('\n'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUEST: &str = "BEGIN:VCALENDAR\r\n\
        METHOD:REQUEST\r\n\
        BEGIN:VEVENT\r\n\
        UID:abc-123\r\n\
        ORGANIZER;CN=Alice:mailto:alice@example.com\r\n\
        ATTENDEE;RSVP=TRUE;PARTSTAT=NEEDS-ACTION:mailto:bob@example.com\r\n\
        DTSTART:20240315T100000Z\r\n\
        DTEND:20240315T110000Z\r\n\
        LOCATION:Room 1\\, north\r\n\
        CLASS:PRIVATE\r\n\
        SUMMARY:Planning with a long\r\n  folded title\r\n\
        END:VEVENT\r\n\
        END:VCALENDAR\r\n";

    #[test]
    fn request_summary() {
        let itip = Itip::parse(REQUEST).unwrap();
        assert_eq!(itip.message_class(), Some(MessageClass::MeetingRequest));
        let meeting = itip.meeting_request();
        assert_eq!(meeting.global_object_id.as_deref(), Some("abc-123"));
        assert_eq!(meeting.organizer.as_deref(), Some("alice@example.com"));
        assert_eq!(meeting.location.as_deref(), Some("Room 1, north"));
        assert_eq!(meeting.sensitivity, Sensitivity::Private);
        assert!(meeting.response_requested);
        assert!(!meeting.all_day_event);
        assert_eq!(
            meeting.start_time,
            Some(Utc.with_ymd_and_hms(2024, 3, 15, 10, 0, 0).unwrap())
        );
        assert_eq!(itip.text("SUMMARY").as_deref(), Some("Planning with a long folded title"));
    }

    #[test]
    fn reply_partstat() {
        let reply = REQUEST
            .replace("METHOD:REQUEST", "METHOD:REPLY")
            .replace("NEEDS-ACTION", "DECLINED");
        assert_eq!(
            Itip::parse(&reply).unwrap().message_class(),
            Some(MessageClass::MeetingDeclined)
        );
        let tentative = reply.replace("DECLINED", "tentative");
        assert_eq!(
            Itip::parse(&tentative).unwrap().message_class(),
            Some(MessageClass::MeetingTentative)
        );
    }

    #[test]
    fn all_day_events() {
        let text = "BEGIN:VCALENDAR\nMETHOD:PUBLISH\nBEGIN:VEVENT\nDTSTART;VALUE=DATE:20240601\nTRANSP:TRANSPARENT\nEND:VEVENT\nEND:VCALENDAR\n";
        let itip = Itip::parse(text).unwrap();
        let meeting = itip.meeting_request();
        assert!(meeting.all_day_event);
        assert_eq!(meeting.busy_status, BusyStatus::Free);
        assert_eq!(itip.message_class(), Some(MessageClass::MeetingRequest));
    }

    #[test]
    fn malformed_calendars() {
        assert!(Itip::parse("not a calendar").is_err());
        assert!(Itip::parse("BEGIN:VCALENDAR\nBEGIN:VEVENT\nEND:VCALENDAR\n").is_err());
    }

    #[test]
    fn no_event_no_class() {
        let itip = Itip::parse("BEGIN:VCALENDAR\nMETHOD:REQUEST\nEND:VCALENDAR\n").unwrap();
        assert_eq!(itip.message_class(), None);
    }
}
