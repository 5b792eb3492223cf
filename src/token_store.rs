use chrono::{DateTime, Duration, Utc};
use rspotify::Token;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use crate::error::Result;

/// Tokens are treated as expired this long before their real expiry
const EXPIRY_MARGIN_SECS: i64 = 60;

/// A complete, usable token. Records missing any field are never built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl TokenRecord {
    /// Build a record from an rspotify token. Returns `None` if the token has
    /// no refresh token or no expiry, since such a token cannot be kept alive.
    pub fn from_token(token: &Token) -> Option<Self> {
        let refresh_token = token.refresh_token.clone().filter(|t| !t.is_empty())?;
        let expires_at = token.expires_at?;

        let mut scopes: Vec<String> = token.scopes.iter().cloned().collect();
        scopes.sort();

        Some(Self {
            access_token: token.access_token.clone(),
            refresh_token,
            expires_at,
            scopes,
        })
    }

    pub fn to_token(&self) -> Token {
        let remaining = (self.expires_at - Utc::now()).max(Duration::zero());
        Token {
            access_token: self.access_token.clone(),
            expires_in: remaining,
            expires_at: Some(self.expires_at),
            refresh_token: Some(self.refresh_token.clone()),
            scopes: self.scopes.iter().cloned().collect::<HashSet<_>>(),
        }
    }

    /// Whether the token must be refreshed before use at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(EXPIRY_MARGIN_SECS) >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// JSON file holding the last obtained token
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the stored token. A missing or unreadable file yields `None`.
    pub fn load(&self) -> Result<Option<TokenRecord>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::info!("No stored token found at {:?}", self.path);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<TokenRecord>(&contents) {
            Ok(record) => {
                log::info!("Loaded token info from {:?}", self.path);
                Ok(Some(record))
            }
            Err(e) => {
                log::warn!("Ignoring unreadable token file {:?}: {}", self.path, e);
                Ok(None)
            }
        }
    }

    /// Write the record, replacing any previous one. The file is written to a
    /// sibling temp file first so a crash never leaves half a token on disk.
    pub fn save(&self, record: &TokenRecord) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(record)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;

        log::info!("Saved token info to {:?}", self.path);
        Ok(())
    }

    /// Remove the stored token. Already absent is not an error.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                log::info!("Cleared token info at {:?}", self.path);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_record(expires_in_secs: i64) -> TokenRecord {
    TokenRecord {
        access_token: "access".to_string(),
        refresh_token: "refresh".to_string(),
        expires_at: Utc::now() + Duration::seconds(expires_in_secs),
        scopes: vec!["user-read-playback-state".to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_check() {
        let now = Utc::now();
        let record = TokenRecord {
            expires_at: now + Duration::seconds(3600),
            ..sample_record(0)
        };
        assert!(!record.is_expired_at(now));
        assert!(record.is_expired_at(now + Duration::seconds(3600)));
        // Inside the safety margin counts as expired
        assert!(record.is_expired_at(now + Duration::seconds(3600 - 30)));
    }

    #[test]
    fn test_from_token_requires_refresh_token() {
        let mut token = sample_record(3600).to_token();
        token.refresh_token = None;
        assert!(TokenRecord::from_token(&token).is_none());
    }

    #[test]
    fn test_from_token_requires_expiry() {
        let mut token = sample_record(3600).to_token();
        token.expires_at = None;
        assert!(TokenRecord::from_token(&token).is_none());
    }

    #[test]
    fn test_token_conversion_keeps_fields() {
        let record = sample_record(3600);
        let back = TokenRecord::from_token(&record.to_token()).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token_info.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token_info.json"));
        let record = sample_record(3600);

        store.save(&record).unwrap();
        assert_eq!(store.load().unwrap(), Some(record));
        assert!(!dir.path().join("token_info.json.tmp").exists());
    }

    #[test]
    fn test_partial_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token_info.json");
        fs::write(&path, r#"{ "access_token": "only-this" }"#).unwrap();

        let store = TokenStore::new(&path);
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token_info.json"));
        store.save(&sample_record(3600)).unwrap();

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        // Clearing twice is fine
        store.clear().unwrap();
    }
}
