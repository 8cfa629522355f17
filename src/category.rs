//! User-defined IMAP keyword to category table
//!
//! Devices see categories; the mail store sees keyword flags. The
//! mapping is user configuration and is passed explicitly to whoever
//! needs it.

use crate::error::{Error, Result};
use crate::flag::Flag;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Flag to category table, keyed by lowercased IMAP flag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryMap {
    entries: BTreeMap<String, String>,
}

impl CategoryMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mapping. The flag is stored lowercased.
    #[must_use]
    pub fn with(mut self, flag: &str, category: impl Into<String>) -> Self {
        self.entries.insert(flag.to_lowercase(), category.into());
        self
    }

    /// Parse `flag=Category,flag2=Other Category`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a pair without `=` or with an empty
    /// side.
    pub fn parse(spec: &str) -> Result<Self> {
        let mut map = Self::new();
        for pair in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (flag, category) = pair
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("Invalid category mapping '{pair}'")))?;
            let (flag, category) = (flag.trim(), category.trim());
            if flag.is_empty() || category.is_empty() {
                return Err(Error::Config(format!("Invalid category mapping '{pair}'")));
            }
            map = map.with(flag, category);
        }
        Ok(map)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn category_for(&self, flag: &Flag) -> Option<&str> {
        self.entries.get(&flag.lookup_key()).map(String::as_str)
    }

    /// Categories for a message's flags, in flag order.
    #[must_use]
    pub fn categories(&self, flags: &[Flag]) -> Vec<String> {
        flags
            .iter()
            .filter_map(|f| self.category_for(f))
            .map(ToString::to_string)
            .collect()
    }

    /// All IMAP flags that carry a category.
    pub fn flags(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// Normalize a category name into an IMAP atom: lowercase, spaces become
/// `_`, and atom-specials and non-ASCII characters are dropped.
#[must_use]
pub fn category_atom(category: &str) -> String {
    category
        .chars()
        .map(|c| if c == ' ' { '_' } else { c })
        .filter(|c| {
            c.is_ascii_graphic() && !matches!(c, '(' | ')' | '{' | '%' | '*' | '"' | '\\' | ']')
        })
        .collect::<String>()
        .to_lowercase()
}
