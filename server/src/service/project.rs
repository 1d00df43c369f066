//! Project discovery service

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::account::AccountProfile;
use crate::domain::instance::{ProjectEntry, ProjectSource};
use crate::error::Result;
use crate::service::credential::CredentialManager;
use crate::service::provider;

/// Resolves candidate project ids for a credential file
pub struct ProjectResolver {
    credentials: Arc<CredentialManager>,
    resource_manager_url: String,
}

impl ProjectResolver {
    pub fn new(credentials: Arc<CredentialManager>, resource_manager_url: impl Into<String>) -> Self {
        Self {
            credentials,
            resource_manager_url: resource_manager_url.into(),
        }
    }

    /// Collect candidates from the internal tier lookup, then the cloud
    /// project listing. If both come back empty and the account type allows
    /// it, a placeholder id is generated.
    ///
    /// Only a missing or unreadable credential is an error; lookup failures
    /// just contribute no candidates.
    pub async fn resolve(&self, token_file: &str, profile: &AccountProfile) -> Result<Vec<ProjectEntry>> {
        let (session, _credential) = self.credentials.obtain_session(token_file, profile).await?;
        let mut candidates: Vec<ProjectEntry> = Vec::new();

        match provider::load_code_assist(&session, profile, None).await {
            Ok(response) => {
                if let Some(id) = provider::internal_project(&response) {
                    candidates.push(ProjectEntry::new(id, ProjectSource::Internal));
                }
            }
            Err(e) => warn!("Internal project lookup for {} failed: {}", token_file, e),
        }

        match provider::get_json(&session, &self.resource_manager_url).await {
            Ok(response) => {
                let projects = response["projects"].as_array().cloned().unwrap_or_default();
                for project in projects {
                    let active = project["lifecycleState"]
                        .as_str()
                        .map_or(true, |state| state == "ACTIVE");
                    if let (true, Some(id)) = (active, project["projectId"].as_str()) {
                        if !candidates.iter().any(|c| c.id == id) {
                            candidates.push(ProjectEntry::new(id, ProjectSource::Cloud));
                        }
                    }
                }
            }
            Err(e) => warn!("Cloud project listing for {} failed: {}", token_file, e),
        }

        if candidates.is_empty() && profile.generates_projects {
            let id = generate_project_id();
            info!("No project found for {}, generated {}", token_file, id);
            candidates.push(ProjectEntry::new(id, ProjectSource::Generated));
        }

        Ok(candidates)
    }
}

fn generate_project_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("proxy-project-{}", &suffix[..8])
}
