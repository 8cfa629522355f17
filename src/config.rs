//! IMAP connection and sync configuration

use crate::category::CategoryMap;
use crate::error::{Error, Result};
use std::env;

/// IMAP connection configuration
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Skip certificate verification (self-signed bridges, test servers).
    pub accept_invalid_certs: bool,
}

impl ImapConfig {
    /// Load IMAP configuration from environment variables
    ///
    /// Reads from `.env` file if present. Required variables:
    /// - `IMAP_USERNAME`
    /// - `IMAP_PASSWORD`
    ///
    /// Optional (with defaults):
    /// - `IMAP_HOST` (default: `127.0.0.1`)
    /// - `IMAP_PORT` (default: `143`)
    /// - `IMAP_ACCEPT_INVALID_CERTS` (default: `false`)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            host: env::var("IMAP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("IMAP_PORT")
                .unwrap_or_else(|_| "143".to_string())
                .parse()
                .map_err(|e| Error::Config(format!("Invalid IMAP_PORT: {e}")))?,
            username: env::var("IMAP_USERNAME")
                .map_err(|_| Error::Config("IMAP_USERNAME not set".into()))?,
            password: env::var("IMAP_PASSWORD")
                .map_err(|_| Error::Config("IMAP_PASSWORD not set".into()))?,
            accept_invalid_certs: parse_bool("IMAP_ACCEPT_INVALID_CERTS")?,
        })
    }
}

/// Sync-side configuration shared by detection and message assembly.
#[derive(Debug, Clone, Default)]
pub struct SyncConfig {
    pub categories: CategoryMap,
}

impl SyncConfig {
    /// Load sync configuration from environment variables
    ///
    /// Optional:
    /// - `SYNC_FLAG_CATEGORIES`: `flag=Category` pairs separated by commas
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let categories = match env::var("SYNC_FLAG_CATEGORIES") {
            Ok(spec) => CategoryMap::parse(&spec)?,
            Err(_) => CategoryMap::new(),
        };
        Ok(Self { categories })
    }
}

fn parse_bool(var: &str) -> Result<bool> {
    match env::var(var) {
        Err(_) => Ok(false),
        Ok(v) => match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "" | "0" | "false" | "no" | "off" => Ok(false),
            other => Err(Error::Config(format!("Invalid {var}: {other}"))),
        },
    }
}
