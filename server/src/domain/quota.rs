//! Quota snapshot domain model

use serde::{Deserialize, Serialize};

/// Outcome of a snapshot fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    Success,
    Error,
}

/// Distinguishes flat bucket quota from per-model quota
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaKind {
    Bucket,
    Model,
}

/// Normalized quota record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaRecord {
    pub kind: QuotaKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_fraction: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_amount: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_time: Option<String>,
}

/// Profile returned by the identity endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

/// Normalized result of a quota/profile fetch for one account
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSnapshot {
    pub status: SnapshotStatus,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserProfile>,
    pub quotas: Vec<QuotaRecord>,
    pub is_pro: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AccountSnapshot {
    pub fn success(
        filename: &str,
        user: UserProfile,
        quotas: Vec<QuotaRecord>,
        is_pro: bool,
    ) -> Self {
        Self {
            status: SnapshotStatus::Success,
            filename: filename.to_string(),
            user: Some(user),
            quotas,
            is_pro,
            message: None,
        }
    }

    pub fn error(filename: &str, message: impl Into<String>) -> Self {
        let mut message = message.into();
        if message.trim().is_empty() {
            message = "unknown error".to_string();
        }
        Self {
            status: SnapshotStatus::Error,
            filename: filename.to_string(),
            user: None,
            quotas: Vec::new(),
            is_pro: false,
            message: Some(message),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == SnapshotStatus::Success
    }
}
