//! Message envelope: the addressing and identification fields of a
//! message as reported by an IMAP `ENVELOPE`.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One address from an envelope list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Decoded display name.
    pub name: Option<String>,
    pub mailbox: String,
    pub host: String,
}

impl Address {
    /// Parse `Display Name <local@host>` or a bare `local@host`.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        let (name, addr) = match (input.rfind('<'), input.rfind('>')) {
            (Some(open), Some(close)) if open < close => {
                let name = input[..open].trim().trim_matches('"').trim();
                (
                    (!name.is_empty()).then(|| name.to_string()),
                    &input[open + 1..close],
                )
            }
            _ => (None, input),
        };
        let (mailbox, host) = addr.split_once('@').unwrap_or((addr, ""));
        Self {
            name,
            mailbox: mailbox.to_string(),
            host: host.to_string(),
        }
    }

    /// `local@host`, or the bare mailbox when the host is unknown.
    #[must_use]
    pub fn bare_address(&self) -> String {
        if self.host.is_empty() {
            self.mailbox.clone()
        } else {
            format!("{}@{}", self.mailbox, self.host)
        }
    }

    /// The display name, falling back to the bare address.
    #[must_use]
    pub fn label(&self) -> String {
        self.name
            .as_deref()
            .filter(|n| !n.is_empty())
            .map_or_else(|| self.bare_address(), ToString::to_string)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name.as_deref().filter(|n| !n.is_empty()) {
            Some(name) if needs_quoting(name) => write!(f, "\"{name}\" <{}>", self.bare_address()),
            Some(name) => write!(f, "{name} <{}>", self.bare_address()),
            None => f.write_str(&self.bare_address()),
        }
    }
}

fn needs_quoting(name: &str) -> bool {
    name.chars()
        .any(|c| matches!(c, ',' | ';' | ':' | '@' | '<' | '>' | '"' | '(' | ')' | '[' | ']'))
}

/// Join addresses into a single header value.
#[must_use]
pub fn address_list(addresses: &[Address]) -> String {
    addresses
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub date: Option<DateTime<FixedOffset>>,
    pub subject: Option<String>,
    pub from: Vec<Address>,
    pub sender: Vec<Address>,
    pub reply_to: Vec<Address>,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub bcc: Vec<Address>,
    pub in_reply_to: Option<String>,
    pub message_id: Option<String>,
}

impl Envelope {
    #[must_use]
    pub fn subject(&self) -> &str {
        self.subject.as_deref().unwrap_or_default()
    }

    #[must_use]
    pub fn from_address(&self) -> Option<&Address> {
        self.from.first()
    }
}
