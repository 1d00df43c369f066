//! Credential service

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::domain::account::AccountProfile;
use crate::domain::credential::{TokenCredential, TokenRefresh};
use crate::error::{Error, Result};
use crate::infra::json_file::write_json_atomic;

/// Authenticated HTTP session for one account
#[derive(Debug, Clone)]
pub struct Session {
    client: reqwest::Client,
}

impl Session {
    /// Build a client carrying bearer auth, the account's user agent and
    /// JSON content type on every request
    fn new(access_token: &str, profile: &AccountProfile, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", access_token))
            .map_err(|_| Error::CredentialInvalid("access token is not a valid header".into()))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&profile.user_agent)
                .map_err(|e| Error::Internal(format!("Invalid user agent: {}", e)))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

/// Credential service for loading and refreshing stored OAuth tokens
pub struct CredentialManager {
    tokens_dir: PathBuf,
    http: reqwest::Client,
    timeout: Duration,
}

impl CredentialManager {
    /// Create a new credential service rooted at `tokens_dir`
    pub fn new(tokens_dir: impl Into<PathBuf>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            tokens_dir: tokens_dir.into(),
            http,
            timeout,
        })
    }

    /// Directory holding credential files for an account type
    pub fn token_dir(&self, profile: &AccountProfile) -> PathBuf {
        self.tokens_dir.join(&profile.token_dir)
    }

    /// Resolve a credential file name to its path.
    ///
    /// Only bare file names are accepted; anything that could escape the
    /// account's token directory is rejected.
    pub fn credential_path(&self, profile: &AccountProfile, token_file: &str) -> Result<PathBuf> {
        let mut components = Path::new(token_file).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.token_dir(profile).join(token_file)),
            _ => Err(Error::InvalidParameter(format!(
                "invalid credential file name: {}",
                token_file
            ))),
        }
    }

    /// List the `.json` credential files available for an account type
    pub async fn list_token_files(&self, profile: &AccountProfile) -> Result<Vec<String>> {
        let dir = self.token_dir(profile);
        fs::create_dir_all(&dir).await?;

        let mut files = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".json") {
                files.push(name);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Load a credential, refreshing it first if it has expired, and return
    /// an authenticated session together with the credential in use.
    ///
    /// A failed refresh is logged and the stale token is used anyway; the
    /// provider rejects it later if it really is unusable.
    pub async fn obtain_session(
        &self,
        token_file: &str,
        profile: &AccountProfile,
    ) -> Result<(Session, TokenCredential)> {
        let path = self.credential_path(profile, token_file)?;
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::CredentialNotFound(token_file.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let mut credential = TokenCredential::from_json(&raw)
            .map_err(|e| Error::CredentialInvalid(format!("{}: {}", token_file, e)))?;
        credential.fill_client(profile);

        let now = Utc::now();
        if credential.is_expired(now) {
            match credential.refresh_token.clone() {
                Some(refresh_token) => {
                    match self.refresh(&credential, &refresh_token, profile).await {
                        Ok(refresh) => {
                            credential.apply_refresh(refresh, Utc::now());
                            if let Err(e) = write_json_atomic(&path, &credential).await {
                                warn!("Failed to persist refreshed token {}: {}", token_file, e);
                            } else {
                                info!("Refreshed access token for {}", token_file);
                            }
                        }
                        Err(e) => warn!("{} ({}), continuing with stale token", e, token_file),
                    }
                }
                None => debug!("Token {} expired and has no refresh token", token_file),
            }
        }

        let session = Session::new(&credential.access_token, profile, self.timeout)?;
        Ok((session, credential))
    }

    async fn refresh(
        &self,
        credential: &TokenCredential,
        refresh_token: &str,
        profile: &AccountProfile,
    ) -> Result<TokenRefresh> {
        let client_id = credential.client_id.as_deref().unwrap_or_default();
        let client_secret = credential.client_secret.as_deref().unwrap_or_default();

        let response = self
            .http
            .post(&profile.token_uri)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", client_id),
                ("client_secret", client_secret),
            ])
            .send()
            .await
            .map_err(|e| Error::CredentialRefreshFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::CredentialRefreshFailed(format!(
                "token endpoint returned {}",
                status
            )));
        }

        response
            .json::<TokenRefresh>()
            .await
            .map_err(|e| Error::CredentialRefreshFailed(e.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::{routing::post, Json, Router};
    use chrono::Duration as ChronoDuration;

    /// Serve `router` on an ephemeral local port and return its base URL
    pub(crate) async fn spawn_mock(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock server");
        let addr = listener.local_addr().expect("Failed to read mock address");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{}", addr)
    }

    pub(crate) fn write_token(dir: &Path, profile: &AccountProfile, name: &str, value: serde_json::Value) {
        let token_dir = dir.join(&profile.token_dir);
        std::fs::create_dir_all(&token_dir).expect("Failed to create token dir");
        std::fs::write(token_dir.join(name), value.to_string()).expect("Failed to write token");
    }

    async fn token_endpoint(calls: Arc<AtomicUsize>, succeed: bool) -> String {
        let router = Router::new().route(
            "/token",
            post(move || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if succeed {
                        Ok(Json(serde_json::json!({
                            "access_token": "ya29.fresh",
                            "expires_in": 3599,
                            "token_type": "Bearer"
                        })))
                    } else {
                        Err(axum::http::StatusCode::BAD_REQUEST)
                    }
                }
            }),
        );
        format!("{}/token", spawn_mock(router).await)
    }

    fn profile(token_uri: String) -> AccountProfile {
        AccountProfile {
            token_uri,
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            ..AccountProfile::standard()
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_credential_not_found() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let manager = CredentialManager::new(dir.path(), std::time::Duration::from_secs(2))
            .expect("Failed to create manager");

        let result = manager
            .obtain_session("nobody.json", &AccountProfile::standard())
            .await;
        assert!(matches!(result, Err(Error::CredentialNotFound(_))));
    }

    #[tokio::test]
    async fn test_path_traversal_is_rejected() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let manager = CredentialManager::new(dir.path(), std::time::Duration::from_secs(2))
            .expect("Failed to create manager");
        let profile = AccountProfile::standard();

        assert!(manager.credential_path(&profile, "../servers_config.json").is_err());
        assert!(manager.credential_path(&profile, "/etc/passwd").is_err());
        assert!(manager.credential_path(&profile, "alice.json").is_ok());
    }

    #[tokio::test]
    async fn test_unexpired_token_is_used_without_refresh() {
        let calls = Arc::new(AtomicUsize::new(0));
        let profile = profile(token_endpoint(calls.clone(), true).await);
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let expiry = Utc::now() + ChronoDuration::hours(1);
        write_token(
            dir.path(),
            &profile,
            "alice.json",
            serde_json::json!({
                "token": "ya29.current",
                "refresh_token": "1//r",
                "expiry": expiry.to_rfc3339(),
            }),
        );

        let manager = CredentialManager::new(dir.path(), std::time::Duration::from_secs(2))
            .expect("Failed to create manager");
        let (_session, credential) = manager
            .obtain_session("alice.json", &profile)
            .await
            .expect("Failed to obtain session");

        assert_eq!(credential.access_token, "ya29.current");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_once_and_persisted() {
        let calls = Arc::new(AtomicUsize::new(0));
        let profile = profile(token_endpoint(calls.clone(), true).await);
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let old_expiry = Utc::now() - ChronoDuration::hours(1);
        write_token(
            dir.path(),
            &profile,
            "alice.json",
            serde_json::json!({
                "token": "ya29.stale",
                "refresh_token": "1//r",
                "expiry": old_expiry.to_rfc3339(),
                "account": "alice@example.com",
            }),
        );

        let manager = CredentialManager::new(dir.path(), std::time::Duration::from_secs(2))
            .expect("Failed to create manager");
        let (_session, credential) = manager
            .obtain_session("alice.json", &profile)
            .await
            .expect("Failed to obtain session");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(credential.access_token, "ya29.fresh");

        let path = dir.path().join(&profile.token_dir).join("alice.json");
        let stored =
            TokenCredential::from_json(&std::fs::read_to_string(&path).expect("Failed to read token"))
                .expect("Failed to parse token");
        assert_eq!(stored.access_token, "ya29.fresh");
        assert_eq!(stored.refresh_token.as_deref(), Some("1//r"));
        assert!(stored.expires_at().expect("expiry missing") > Utc::now());
        assert_eq!(stored.client_id.as_deref(), Some("client"));
        assert_eq!(stored.extra["account"], "alice@example.com");
    }

    #[tokio::test]
    async fn test_file_with_both_token_keys_is_refreshed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let profile = profile(token_endpoint(calls.clone(), true).await);
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        write_token(
            dir.path(),
            &profile,
            "alice.json",
            serde_json::json!({
                "access_token": "ya29.cli",
                "token": "ya29.merged",
                "refresh_token": "1//r",
                "expiry_date": (Utc::now() - ChronoDuration::hours(1)).timestamp_millis(),
            }),
        );

        let manager = CredentialManager::new(dir.path(), std::time::Duration::from_secs(2))
            .expect("Failed to create manager");
        let (_session, credential) = manager
            .obtain_session("alice.json", &profile)
            .await
            .expect("Failed to obtain session");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(credential.access_token, "ya29.fresh");

        let path = dir.path().join(&profile.token_dir).join("alice.json");
        let stored: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).expect("Failed to read token"))
                .expect("Failed to parse token");
        assert_eq!(stored["token"], "ya29.fresh");
        assert_eq!(stored["access_token"], "ya29.fresh");
        assert!(stored["expiry_date"].as_i64().expect("expiry_date missing") > Utc::now().timestamp_millis());
    }

    #[tokio::test]
    async fn test_refresh_failure_falls_back_to_stale_token() {
        let calls = Arc::new(AtomicUsize::new(0));
        let profile = profile(token_endpoint(calls.clone(), false).await);
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let old_expiry = Utc::now() - ChronoDuration::hours(1);
        write_token(
            dir.path(),
            &profile,
            "alice.json",
            serde_json::json!({
                "token": "ya29.stale",
                "refresh_token": "1//r",
                "expiry": old_expiry.to_rfc3339(),
            }),
        );

        let manager = CredentialManager::new(dir.path(), std::time::Duration::from_secs(2))
            .expect("Failed to create manager");
        let (_session, credential) = manager
            .obtain_session("alice.json", &profile)
            .await
            .expect("Refresh failure must not fail the session");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(credential.access_token, "ya29.stale");

        let raw = std::fs::read_to_string(dir.path().join(&profile.token_dir).join("alice.json"))
            .expect("Failed to read token");
        assert!(raw.contains("ya29.stale"));
    }

    #[tokio::test]
    async fn test_list_token_files_filters_and_sorts() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let profile = AccountProfile::alternate();
        write_token(dir.path(), &profile, "b.json", serde_json::json!({"token": "x"}));
        write_token(dir.path(), &profile, "a.json", serde_json::json!({"token": "y"}));
        write_token(dir.path(), &profile, "notes.txt", serde_json::json!({}));

        let manager = CredentialManager::new(dir.path(), std::time::Duration::from_secs(2))
            .expect("Failed to create manager");
        let files = manager
            .list_token_files(&profile)
            .await
            .expect("Failed to list");
        assert_eq!(files, vec!["a.json".to_string(), "b.json".to_string()]);

        let empty = manager
            .list_token_files(&AccountProfile::standard())
            .await
            .expect("Failed to list");
        assert!(empty.is_empty());
    }
}
