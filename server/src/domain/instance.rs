//! Server instance domain model

use serde::{Deserialize, Serialize};

use super::account::AccountType;

/// Where a project id came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectSource {
    /// Returned by the provider's internal tier lookup
    Internal,
    /// Listed by the cloud resource manager
    Cloud,
    /// Entered by hand
    Custom,
    /// Placeholder generated locally
    Generated,
}

/// One entry in an instance's project history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawProjectEntry")]
pub struct ProjectEntry {
    pub id: String,
    pub source: ProjectSource,
}

impl ProjectEntry {
    pub fn new(id: impl Into<String>, source: ProjectSource) -> Self {
        Self {
            id: id.into(),
            source,
        }
    }
}

/// Older instance files store the history as bare strings
#[derive(Deserialize)]
#[serde(untagged)]
enum RawProjectEntry {
    Plain(String),
    Tagged { id: String, source: ProjectSource },
}

impl From<RawProjectEntry> for ProjectEntry {
    fn from(raw: RawProjectEntry) -> Self {
        match raw {
            RawProjectEntry::Plain(id) => ProjectEntry::new(id, ProjectSource::Custom),
            RawProjectEntry::Tagged { id, source } => ProjectEntry::new(id, source),
        }
    }
}

/// Derived worker status, never persisted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    #[default]
    Stopped,
    Running,
}

/// Persisted server instance definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInstance {
    /// Unique identifier, fixed at creation
    pub id: String,

    /// Display label
    pub name: String,

    /// Account type tag
    #[serde(rename = "type", default)]
    pub account_type: AccountType,

    /// Credential file name inside the account type's token directory
    #[serde(alias = "token_file")]
    pub token_file: String,

    /// Currently selected project
    #[serde(alias = "project_id")]
    pub project_id: String,

    /// Previously used projects; always contains `project_id`
    #[serde(default, alias = "project_ids")]
    pub project_history: Vec<ProjectEntry>,

    /// Port the worker binds
    pub port: u16,

    /// Shared secret forwarded to the worker
    pub password: String,

    /// Cached entitlement flag
    #[serde(default, alias = "is_pro")]
    pub is_pro: bool,
}

impl ServerInstance {
    /// Create a new instance from request parameters
    pub fn new(id: String, params: InstanceParams) -> Self {
        let mut instance = Self {
            id,
            name: params.name,
            account_type: params.account_type,
            token_file: params.token_file,
            project_id: String::new(),
            project_history: params.project_history.unwrap_or_default(),
            port: params.port,
            password: params.password,
            is_pro: params.is_pro.unwrap_or(false),
        };
        instance.select_project(
            params.project_id,
            params.project_source.unwrap_or(ProjectSource::Custom),
        );
        instance
    }

    /// Apply an update, keeping the id and merging the project history.
    ///
    /// A supplied history replaces the stored one; an omitted history keeps it.
    pub fn apply(&mut self, params: InstanceParams) {
        self.name = params.name;
        self.account_type = params.account_type;
        self.token_file = params.token_file;
        self.port = params.port;
        self.password = params.password;
        if let Some(is_pro) = params.is_pro {
            self.is_pro = is_pro;
        }
        if let Some(history) = params.project_history {
            self.project_history = history;
        }
        self.select_project(
            params.project_id,
            params.project_source.unwrap_or(ProjectSource::Custom),
        );
    }

    /// Select a project, appending it to the history if it is new
    pub fn select_project(&mut self, project_id: String, source: ProjectSource) {
        if !self.project_history.iter().any(|p| p.id == project_id) {
            self.project_history
                .push(ProjectEntry::new(project_id.clone(), source));
        }
        self.project_id = project_id;
    }

    /// Restore the history invariant for records written by hand or by
    /// older versions
    pub fn normalize(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.project_history.retain(|p| seen.insert(p.id.clone()));
        if !self.project_id.is_empty() {
            let project_id = self.project_id.clone();
            self.select_project(project_id, ProjectSource::Custom);
        }
    }

    pub fn history_ids(&self) -> Vec<&str> {
        self.project_history.iter().map(|p| p.id.as_str()).collect()
    }
}

/// Parameters for creating or updating an instance
#[derive(Debug, Clone)]
pub struct InstanceParams {
    pub name: String,
    pub account_type: AccountType,
    pub token_file: String,
    pub project_id: String,
    pub project_source: Option<ProjectSource>,
    pub project_history: Option<Vec<ProjectEntry>>,
    pub port: u16,
    pub password: String,
    pub is_pro: Option<bool>,
}

impl InstanceParams {
    /// Reject parameters that could never produce a runnable worker
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".to_string());
        }
        if self.token_file.trim().is_empty() {
            return Err("tokenFile must not be empty".to_string());
        }
        if self.project_id.trim().is_empty() {
            return Err("projectId must not be empty".to_string());
        }
        if self.port == 0 {
            return Err("port must be between 1 and 65535".to_string());
        }
        Ok(())
    }
}
