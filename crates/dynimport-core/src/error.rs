//! Error taxonomy for resource graph construction and provisioning

use dynimport_pattern::PatternError;
use thiserror::Error;

/// Errors raised while building or provisioning an import stack.
///
/// Every variant is fatal to the provisioning attempt; nothing here is retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StackError {
    #[error("invalid {kind} '{value}': {reason}")]
    InvalidResourceName {
        kind: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid resource shape: {0}")]
    InvalidResourceShape(String),

    #[error("principal '{principal}' is not trusted in partition '{partition}'")]
    PrincipalNotTrusted { principal: String, partition: String },

    #[error("provisioning conflict on stack '{stack}': {reason}")]
    ProvisioningConflict { stack: String, reason: String },

    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),

    #[error("invalid value '{value}' for parameter '{name}': {reason}")]
    InvalidParameterValue {
        name: String,
        value: String,
        reason: String,
    },

    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("least privilege violation in statement '{sid}': {reason}")]
    LeastPrivilegeViolation { sid: String, reason: String },

    #[error(transparent)]
    Pattern(#[from] PatternError),
}

impl StackError {
    pub(crate) fn invalid_name(kind: &'static str, value: &str, reason: impl Into<String>) -> Self {
        Self::InvalidResourceName {
            kind,
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    pub fn conflict(stack: &str, reason: impl Into<String>) -> Self {
        Self::ProvisioningConflict {
            stack: stack.to_string(),
            reason: reason.into(),
        }
    }
}

pub type StackResult<T> = Result<T, StackError>;
