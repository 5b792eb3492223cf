use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::{Result, VibifyError};

pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8888/callback";

/// Spotify application credentials read from a `KEY=value` file
#[derive(Debug, Clone, PartialEq)]
pub struct AppCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl AppCredentials {
    /// Load credentials from the given file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            VibifyError::CredentialsError(format!(
                "Failed to read credentials file {:?}: {}",
                path, e
            ))
        })?;

        let creds = Self::parse(&contents)?;
        log::info!("Loaded Spotify credentials from {:?}", path);
        Ok(creds)
    }

    /// Parse `KEY=value` lines. Blank lines and `#` comments are skipped.
    pub fn parse(contents: &str) -> Result<Self> {
        let mut values = HashMap::new();

        for (index, raw) in contents.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| {
                VibifyError::CredentialsError(format!(
                    "Line {} is not a KEY=value pair",
                    index + 1
                ))
            })?;

            values.insert(key.trim().to_string(), value.trim().to_string());
        }

        let mut required = |key: &str| {
            values
                .remove(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| VibifyError::CredentialsError(format!("{} is missing", key)))
        };

        let client_id = required("CLIENT_ID")?;
        let client_secret = required("CLIENT_SECRET")?;
        let redirect_uri = required("REDIRECT_URI").unwrap_or_else(|_| {
            log::warn!("REDIRECT_URI not set, using {}", DEFAULT_REDIRECT_URI);
            DEFAULT_REDIRECT_URI.to_string()
        });

        Ok(Self {
            client_id,
            client_secret,
            redirect_uri,
        })
    }
}
