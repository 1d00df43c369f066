//! Provider API calls and per-type response interpretation

use serde_json::{json, Value};
use tracing::debug;

use crate::domain::account::{AccountProfile, QuotaShape, TierPolicy};
use crate::domain::quota::{QuotaKind, QuotaRecord};
use crate::error::{Error, Result};
use crate::service::credential::Session;

/// Tier ids that never count as Pro
const FREE_TIERS: &[&str] = &["free-tier", "legacy-tier"];

/// Method used for both the tier check and internal project lookup
const LOAD_CODE_ASSIST: &str = "v1internal:loadCodeAssist";

/// POST a JSON body and return the decoded JSON response.
///
/// Non-2xx statuses and undecodable bodies are errors.
pub async fn post_json(session: &Session, url: &str, body: &Value) -> Result<Value> {
    let response = session.client().post(url).json(body).send().await?;
    decode(response, url).await
}

/// GET a URL and return the decoded JSON response
pub async fn get_json(session: &Session, url: &str) -> Result<Value> {
    let response = session.client().get(url).send().await?;
    decode(response, url).await
}

async fn decode(response: reqwest::Response, url: &str) -> Result<Value> {
    let status = response.status();
    if !status.is_success() {
        debug!("{} returned {}", url, status);
        return Err(Error::QuotaFetchFailure(format!(
            "API error {} from {}",
            status.as_u16(),
            url
        )));
    }
    response
        .json::<Value>()
        .await
        .map_err(|e| Error::QuotaFetchFailure(format!("malformed response from {}: {}", url, e)))
}

/// Call `loadCodeAssist`, optionally scoped to a project
pub async fn load_code_assist(
    session: &Session,
    profile: &AccountProfile,
    project_id: Option<&str>,
) -> Result<Value> {
    let mut metadata = json!({
        "ideType": "IDE_UNSPECIFIED",
        "platform": "PLATFORM_UNSPECIFIED",
        "pluginType": "GEMINI",
    });
    let mut body = json!({});
    if let Some(project_id) = project_id {
        metadata["duetProject"] = json!(project_id);
        body["cloudaicompanionProject"] = json!(project_id);
    }
    body["metadata"] = metadata;

    post_json(session, &profile.method_url(LOAD_CODE_ASSIST), &body).await
}

/// Call the account type's quota endpoint
pub async fn fetch_quota(
    session: &Session,
    profile: &AccountProfile,
    project_id: &str,
) -> Result<Value> {
    let url = profile.method_url(profile.quota_shape.method());
    post_json(session, &url, &json!({ "project": project_id })).await
}

/// Turn a tier check outcome into the Pro flag according to the policy
pub fn resolve_tier(policy: TierPolicy, outcome: &Result<Value>) -> bool {
    match outcome {
        Ok(response) => interpret_tier(policy, response),
        Err(_) => match policy {
            TierPolicy::AllowedTiers => false,
            TierPolicy::PaidTier {
                assume_pro_on_failure,
            } => assume_pro_on_failure,
        },
    }
}

/// Interpret a successful `loadCodeAssist` response
pub fn interpret_tier(policy: TierPolicy, response: &Value) -> bool {
    match policy {
        TierPolicy::AllowedTiers => {
            let tier_id = response["currentTier"]["id"].as_str().or_else(|| {
                response["allowedTiers"]
                    .as_array()?
                    .iter()
                    .find(|t| t["isDefault"].as_bool() == Some(true))?["id"]
                    .as_str()
            });
            let Some(tier_id) = tier_id else {
                return false;
            };
            if FREE_TIERS.contains(&tier_id) {
                return false;
            }
            let vetoed = response["ineligibleTiers"]
                .as_array()
                .map(|tiers| tiers.iter().any(|t| t["tierId"].as_str() == Some(tier_id)))
                .unwrap_or(false);
            !vetoed
        }
        TierPolicy::PaidTier { .. } => {
            if let Some(paid) = response["paidTier"]["id"].as_str() {
                if !paid.is_empty() {
                    return true;
                }
            }
            response["currentTier"]["id"]
                .as_str()
                .map(|id| !id.is_empty() && !FREE_TIERS.contains(&id))
                .unwrap_or(false)
        }
    }
}

/// Extract the provider-assigned project from a `loadCodeAssist` response
pub fn internal_project(response: &Value) -> Option<String> {
    let project = &response["cloudaicompanionProject"];
    project
        .as_str()
        .or_else(|| project["id"].as_str())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Normalize a quota response into records
pub fn normalize_quotas(shape: QuotaShape, response: &Value) -> Result<Vec<QuotaRecord>> {
    match shape {
        QuotaShape::Buckets => {
            let buckets = match &response["buckets"] {
                Value::Null => return Ok(Vec::new()),
                Value::Array(buckets) => buckets,
                _ => return Err(malformed("buckets is not a list")),
            };
            Ok(buckets
                .iter()
                .map(|bucket| QuotaRecord {
                    kind: QuotaKind::Bucket,
                    model_id: string_field(bucket, "modelId"),
                    display_name: None,
                    token_type: string_field(bucket, "tokenType"),
                    remaining_fraction: bucket["remainingFraction"].as_f64(),
                    remaining_amount: string_field(bucket, "remainingAmount"),
                    reset_time: string_field(bucket, "resetTime"),
                })
                .collect())
        }
        QuotaShape::ModelMap => {
            let models = match &response["models"] {
                Value::Null => return Ok(Vec::new()),
                Value::Object(models) => models,
                _ => return Err(malformed("models is not a map")),
            };
            Ok(models
                .iter()
                .filter(|(_, model)| model["quotaInfo"].is_object())
                .map(|(model_id, model)| {
                    let quota = &model["quotaInfo"];
                    QuotaRecord {
                        kind: QuotaKind::Model,
                        model_id: Some(model_id.clone()),
                        display_name: string_field(model, "displayName"),
                        token_type: None,
                        remaining_fraction: quota["remainingFraction"].as_f64(),
                        remaining_amount: None,
                        reset_time: string_field(quota, "resetTime"),
                    }
                })
                .collect())
        }
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value[key].as_str().map(str::to_string)
}

fn malformed(reason: &str) -> Error {
    Error::QuotaFetchFailure(format!("malformed quota payload: {}", reason))
}
