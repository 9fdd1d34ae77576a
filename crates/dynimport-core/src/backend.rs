//! Backend trait for provisioning implementations

use crate::stack::Stack;
use crate::template::StackDiff;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Trait for stack provisioning backends
/// This allows us to swap between the local emulator and real AWS
#[async_trait]
pub trait ProvisioningBackend: Send + Sync {
    /// Create the stack, or update it in place
    async fn apply(&mut self, stack: &Stack) -> Result<ApplyOutcome>;

    /// What `apply` would change
    async fn diff(&self, stack: &Stack) -> Result<StackDiff>;

    /// Tear the stack down with everything it owns
    async fn destroy(&mut self, stack_name: &str) -> Result<ApplyOutcome>;

    /// Current state of a deployed stack
    async fn describe(&self, stack_name: &str) -> Result<Option<DeployedStack>>;

    async fn list_stacks(&self) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyOutcome {
    Created,
    Updated,
    Unchanged,
    Destroyed,
    NotFound,
}

impl fmt::Display for ApplyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApplyOutcome::Created => "created",
            ApplyOutcome::Updated => "updated",
            ApplyOutcome::Unchanged => "unchanged",
            ApplyOutcome::Destroyed => "destroyed",
            ApplyOutcome::NotFound => "not found",
        };
        f.write_str(s)
    }
}

/// A stack as the backend currently holds it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployedStack {
    pub name: String,
    pub status: String,
    pub template: Value,
    /// Physical names claimed by the stack
    #[serde(default)]
    pub role_names: Vec<String>,
    #[serde(default)]
    pub function_names: Vec<String>,
}

/// Configuration for backend implementations
#[derive(Debug, Clone)]
pub enum BackendConfig {
    /// Local emulator (no AWS required)
    Emulator {
        /// Directory for persisted state; in-memory when `None`
        state_dir: Option<String>,
    },
    /// Real AWS CloudFormation
    Aws {
        region: Option<String>,
        profile: Option<String>,
        /// Custom endpoint (for testing)
        endpoint: Option<String>,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Emulator { state_dir: None }
    }
}
