//! ActiveSync protocol versions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Protocol version negotiated with the device.
///
/// Variants are declared in ascending order so comparisons follow the
/// protocol's own ordering.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub enum ProtocolVersion {
    #[default]
    V2_5,
    V12_0,
    V12_1,
    V14_0,
    V14_1,
    V16_0,
    V16_1,
}

impl ProtocolVersion {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::V2_5 => "2.5",
            Self::V12_0 => "12.0",
            Self::V12_1 => "12.1",
            Self::V14_0 => "14.0",
            Self::V14_1 => "14.1",
            Self::V16_0 => "16.0",
            Self::V16_1 => "16.1",
        }
    }

    /// 2.5 only knows a plain text body and the legacy attachment list.
    #[must_use]
    pub fn is_legacy(self) -> bool {
        self == Self::V2_5
    }

    /// AirSyncBase bodies: HTML, all-or-none, meeting requests.
    #[must_use]
    pub fn supports_html(self) -> bool {
        self >= Self::V12_0
    }

    #[must_use]
    pub fn supports_categories(self) -> bool {
        self > Self::V12_1
    }

    /// Message-Id, forwarded/answered and body preview.
    #[must_use]
    pub fn supports_extended_fields(self) -> bool {
        self >= Self::V14_0
    }

    #[must_use]
    pub fn supports_body_part(self) -> bool {
        self > Self::V14_0
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "2.5" => Ok(Self::V2_5),
            "12.0" | "12" => Ok(Self::V12_0),
            "12.1" => Ok(Self::V12_1),
            "14.0" | "14" => Ok(Self::V14_0),
            "14.1" => Ok(Self::V14_1),
            "16.0" | "16" => Ok(Self::V16_0),
            "16.1" => Ok(Self::V16_1),
            other => Err(format!("unsupported protocol version '{other}'")),
        }
    }
}

impl TryFrom<String> for ProtocolVersion {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ProtocolVersion> for String {
    fn from(v: ProtocolVersion) -> Self {
        v.as_str().to_string()
    }
}
