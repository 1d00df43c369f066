//! OAuth token file model

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{de::Error as _, Deserialize, Serialize};
use serde_json::Value;

use super::account::AccountProfile;

/// Tokens are refreshed slightly before they actually expire
const EXPIRY_SKEW_SECS: i64 = 60;

const LEGACY_TOKEN_KEY: &str = "access_token";

/// On-disk shape of a credential file
///
/// Fields this server does not understand are kept in `extra` and written
/// back untouched, since the same file is read by the worker.
///
/// Files may carry the token as `token`, as `access_token`, or as both after
/// an older refresh merged the two shapes. `token` wins; a legacy
/// `access_token` key stays in `extra` and is kept in step on refresh.
/// Use [`TokenCredential::from_json`] to read one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenCredential {
    #[serde(rename = "token", default)]
    pub access_token: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// RFC 3339 expiry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,

    /// Expiry in epoch milliseconds, as written by some CLI tools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_uri: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Successful response of the token endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct TokenRefresh {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl TokenCredential {
    /// Parse a credential file, falling back to the legacy token key
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        let mut credential: TokenCredential = serde_json::from_str(raw)?;
        if credential.access_token.is_empty() {
            match credential.extra.get(LEGACY_TOKEN_KEY).and_then(Value::as_str) {
                Some(token) if !token.is_empty() => credential.access_token = token.to_string(),
                _ => return Err(serde_json::Error::missing_field("token")),
            }
        }
        Ok(credential)
    }

    /// Effective expiry, whichever representation the file used
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expiry.or_else(|| {
            self.expiry_date
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        })
    }

    /// A token with no known expiry is treated as valid
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at() {
            Some(expiry) => now + Duration::seconds(EXPIRY_SKEW_SECS) >= expiry,
            None => false,
        }
    }

    /// Fill client credentials missing from the file with the account's own
    pub fn fill_client(&mut self, profile: &AccountProfile) {
        if self.client_id.as_deref().map_or(true, str::is_empty) && !profile.client_id.is_empty() {
            self.client_id = Some(profile.client_id.clone());
        }
        if self.client_secret.as_deref().map_or(true, str::is_empty)
            && !profile.client_secret.is_empty()
        {
            self.client_secret = Some(profile.client_secret.clone());
        }
        if self.token_uri.is_none() {
            self.token_uri = Some(profile.token_uri.clone());
        }
        if self.scopes.is_empty() {
            self.scopes = profile.scopes.clone();
        }
    }

    /// Merge a refresh response; a rotated refresh token replaces the old one
    pub fn apply_refresh(&mut self, refresh: TokenRefresh, now: DateTime<Utc>) {
        if let Some(legacy) = self.extra.get_mut(LEGACY_TOKEN_KEY) {
            *legacy = Value::String(refresh.access_token.clone());
        }
        self.access_token = refresh.access_token;
        if let Some(token) = refresh.refresh_token.filter(|t| !t.is_empty()) {
            self.refresh_token = Some(token);
        }
        let expiry = now + Duration::seconds(refresh.expires_in.unwrap_or(3600));
        self.expiry = Some(expiry);
        if self.expiry_date.is_some() {
            self.expiry_date = Some(expiry.timestamp_millis());
        }
    }
}
