//! Quota service

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::domain::account::AccountProfile;
use crate::domain::quota::{AccountSnapshot, UserProfile};
use crate::error::{Error, Result};
use crate::service::credential::{CredentialManager, Session};
use crate::service::provider;

/// Quota service for building per-account snapshots
pub struct QuotaAggregator {
    credentials: Arc<CredentialManager>,
    userinfo_url: String,
    limiter: Semaphore,
}

impl QuotaAggregator {
    /// Create a new quota service allowing `max_concurrent` fetches at once
    pub fn new(
        credentials: Arc<CredentialManager>,
        userinfo_url: impl Into<String>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            credentials,
            userinfo_url: userinfo_url.into(),
            limiter: Semaphore::new(max_concurrent.max(1)),
        }
    }

    /// Fetch profile, entitlement and quota for one account.
    ///
    /// Never fails: any problem is reported as an `error` snapshot.
    pub async fn fetch_account_data(
        &self,
        token_file: &str,
        project_id: &str,
        profile: &AccountProfile,
    ) -> AccountSnapshot {
        let _permit = match self.limiter.acquire().await {
            Ok(permit) => permit,
            Err(e) => return AccountSnapshot::error(token_file, e.to_string()),
        };

        match self.try_fetch(token_file, project_id, profile).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Quota fetch for {} failed: {}", token_file, e);
                AccountSnapshot::error(token_file, e.to_string())
            }
        }
    }

    async fn try_fetch(
        &self,
        token_file: &str,
        project_id: &str,
        profile: &AccountProfile,
    ) -> Result<AccountSnapshot> {
        let (session, _credential) = self.credentials.obtain_session(token_file, profile).await?;

        let (user, tier, quota) = futures::join!(
            self.fetch_user(&session),
            provider::load_code_assist(&session, profile, Some(project_id)),
            provider::fetch_quota(&session, profile, project_id),
        );

        let user = user?;
        let quotas = provider::normalize_quotas(profile.quota_shape, &quota?)?;
        if let Err(e) = &tier {
            debug!("Tier check for {} failed, applying fallback: {}", token_file, e);
        }
        let is_pro = provider::resolve_tier(profile.tier_policy, &tier);

        Ok(AccountSnapshot::success(token_file, user, quotas, is_pro))
    }

    /// Re-evaluate only the entitlement flag.
    ///
    /// Returns `None` when no session could be built, so callers keep the
    /// cached flag instead of overwriting it with a guess.
    pub async fn check_entitlement(
        &self,
        token_file: &str,
        project_id: &str,
        profile: &AccountProfile,
    ) -> Option<bool> {
        let (session, _credential) = match self.credentials.obtain_session(token_file, profile).await
        {
            Ok(session) => session,
            Err(e) => {
                debug!("Skipping entitlement check for {}: {}", token_file, e);
                return None;
            }
        };

        let tier = provider::load_code_assist(&session, profile, Some(project_id)).await;
        Some(provider::resolve_tier(profile.tier_policy, &tier))
    }

    async fn fetch_user(&self, session: &Session) -> Result<UserProfile> {
        let value = provider::get_json(session, &self.userinfo_url).await?;
        serde_json::from_value(value)
            .map_err(|e| Error::QuotaFetchFailure(format!("malformed user profile: {}", e)))
    }
}
