//! IMAP message flags
//!
//! Provides a strongly-typed enum for IMAP flags instead of raw
//! strings. Standard system flags have dedicated variants, as does
//! the `$Forwarded` keyword; anything else uses the `Keyword` variant.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An IMAP message flag.
///
/// System flags (prefixed with `\` in the IMAP protocol) have
/// dedicated variants. User-defined keyword flags use [`Flag::Keyword`].
///
/// # Examples
///
/// ```
/// use imap_activesync::Flag;
///
/// let seen = Flag::from("\\seen");
/// assert_eq!(seen, Flag::Seen);
/// assert_eq!(seen.as_imap_str(), "\\Seen");
///
/// let kw = Flag::Keyword("$label1".to_string());
/// assert_eq!(kw.as_imap_str(), "$label1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Flag {
    /// Message has been read (`\Seen`).
    Seen,
    /// Message has been answered (`\Answered`).
    Answered,
    /// Message is flagged for attention (`\Flagged`).
    Flagged,
    /// Message is marked for deletion (`\Deleted`).
    Deleted,
    /// Message is a draft (`\Draft`).
    Draft,
    /// Message arrived since the last session (`\Recent`).
    Recent,
    /// Message has been forwarded (`$Forwarded`, RFC 5550).
    Forwarded,
    /// A user-defined keyword flag (no `\` prefix).
    Keyword(String),
}

impl Flag {
    /// The IMAP wire representation of this flag.
    ///
    /// System flags include the leading backslash (e.g. `\Seen`).
    /// Keyword flags are returned as-is.
    #[must_use]
    pub fn as_imap_str(&self) -> &str {
        match self {
            Self::Seen => "\\Seen",
            Self::Answered => "\\Answered",
            Self::Flagged => "\\Flagged",
            Self::Deleted => "\\Deleted",
            Self::Draft => "\\Draft",
            Self::Recent => "\\Recent",
            Self::Forwarded => "$Forwarded",
            Self::Keyword(kw) => kw,
        }
    }

    /// Lowercased wire form, the key used by the flag to category table.
    #[must_use]
    pub fn lookup_key(&self) -> String {
        self.as_imap_str().to_lowercase()
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_imap_str())
    }
}

impl From<&str> for Flag {
    fn from(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "\\seen" => Self::Seen,
            "\\answered" => Self::Answered,
            "\\flagged" => Self::Flagged,
            "\\deleted" => Self::Deleted,
            "\\draft" => Self::Draft,
            "\\recent" => Self::Recent,
            "$forwarded" => Self::Forwarded,
            _ => Self::Keyword(s.to_string()),
        }
    }
}

impl From<String> for Flag {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<Flag> for String {
    fn from(flag: Flag) -> Self {
        flag.as_imap_str().to_string()
    }
}

/// Render flags as a parenthesized IMAP flag list, e.g. `(\Seen $label1)`.
#[must_use]
pub fn flag_list(flags: &[Flag]) -> String {
    let inner: Vec<&str> = flags.iter().map(Flag::as_imap_str).collect();
    format!("({})", inner.join(" "))
}
