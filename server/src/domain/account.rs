//! Account type profiles
//!
//! Each account type is a fixed configuration record. Behavior that differs
//! between providers (tier interpretation, quota response shape) is selected
//! by the [`TierPolicy`] and [`QuotaShape`] tags rather than by subtyping.

use serde::{Deserialize, Serialize};

const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const EMAIL_SCOPE: &str = "https://www.googleapis.com/auth/userinfo.email";
const PROFILE_SCOPE: &str = "https://www.googleapis.com/auth/userinfo.profile";

/// Account type tag carried by every instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    #[default]
    Standard,
    Alternate,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Standard => "standard",
            AccountType::Alternate => "alternate",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "standard" => Some(AccountType::Standard),
            "alternate" => Some(AccountType::Alternate),
            _ => None,
        }
    }
}

/// How a `loadCodeAssist` response is turned into the Pro flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierPolicy {
    /// `currentTier`, or the default entry of `allowedTiers`, unless the tier
    /// is listed in `ineligibleTiers`. A failed check means not Pro.
    AllowedTiers,
    /// `paidTier` wins, otherwise `currentTier`. When the check itself fails
    /// the account may be assumed Pro.
    PaidTier { assume_pro_on_failure: bool },
}

/// Shape of the quota endpoint response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaShape {
    /// `retrieveUserQuota`: flat `buckets` list
    Buckets,
    /// `fetchAvailableModels`: `models` map keyed by model id
    ModelMap,
}

impl QuotaShape {
    /// Method path appended to the account's base URL
    pub fn method(&self) -> &'static str {
        match self {
            QuotaShape::Buckets => "v1internal:retrieveUserQuota",
            QuotaShape::ModelMap => "v1internal:fetchAvailableModels",
        }
    }
}

/// Provider profile for one account type
#[derive(Debug, Clone)]
pub struct AccountProfile {
    pub account_type: AccountType,
    pub client_id: String,
    pub client_secret: String,
    pub base_url: String,
    pub token_uri: String,
    pub scopes: Vec<String>,
    pub user_agent: String,
    /// Directory under the tokens root holding this type's credential files
    pub token_dir: String,
    pub tier_policy: TierPolicy,
    pub quota_shape: QuotaShape,
    /// Whether a placeholder project id may be generated when none is found
    pub generates_projects: bool,
}

impl AccountProfile {
    /// Built-in profile for `standard` accounts
    pub fn standard() -> Self {
        Self {
            account_type: AccountType::Standard,
            client_id: String::new(),
            client_secret: String::new(),
            base_url: "https://cloudcode-pa.googleapis.com".to_string(),
            token_uri: "https://oauth2.googleapis.com/token".to_string(),
            scopes: vec![
                CLOUD_PLATFORM_SCOPE.to_string(),
                EMAIL_SCOPE.to_string(),
                PROFILE_SCOPE.to_string(),
                "openid".to_string(),
            ],
            user_agent: "GeminiCLI/v0.1.5".to_string(),
            token_dir: "standard".to_string(),
            tier_policy: TierPolicy::AllowedTiers,
            quota_shape: QuotaShape::Buckets,
            generates_projects: false,
        }
    }

    /// Built-in profile for `alternate` accounts
    pub fn alternate() -> Self {
        Self {
            account_type: AccountType::Alternate,
            client_id: String::new(),
            client_secret: String::new(),
            base_url: "https://daily-cloudcode-pa.googleapis.com".to_string(),
            token_uri: "https://oauth2.googleapis.com/token".to_string(),
            scopes: vec![
                CLOUD_PLATFORM_SCOPE.to_string(),
                EMAIL_SCOPE.to_string(),
                PROFILE_SCOPE.to_string(),
                "https://www.googleapis.com/auth/cclog".to_string(),
                "https://www.googleapis.com/auth/experimentsandconfigs".to_string(),
            ],
            user_agent: "antigravity/1.11.5".to_string(),
            token_dir: "alternate".to_string(),
            tier_policy: TierPolicy::PaidTier {
                assume_pro_on_failure: true,
            },
            quota_shape: QuotaShape::ModelMap,
            generates_projects: true,
        }
    }

    /// Full URL of a `v1internal` method on this account's API
    pub fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), method)
    }
}

/// Lookup table from account type tag to profile
#[derive(Debug, Clone)]
pub struct AccountRegistry {
    standard: AccountProfile,
    alternate: AccountProfile,
}

impl AccountRegistry {
    pub fn new(standard: AccountProfile, alternate: AccountProfile) -> Self {
        Self {
            standard,
            alternate,
        }
    }

    pub fn get(&self, account_type: AccountType) -> &AccountProfile {
        match account_type {
            AccountType::Standard => &self.standard,
            AccountType::Alternate => &self.alternate,
        }
    }
}
