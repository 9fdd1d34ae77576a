//! Policy evaluation engine for the provisioning emulator

use dynimport_core::{Effect, ManagedGrantReference, PermissionStatement, Role};
use dynimport_pattern::wildcard_match;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimulationError {
    #[error("action '{0}' is not of the form service:Name")]
    MalformedAction(String),

    #[error("resource must be an ARN or '*', got '{0}'")]
    MalformedResource(String),
}

/// Outcome of evaluating one request against a role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Allowed { source: String },
    ExplicitDeny { source: String },
    ImplicitDeny,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

/// Statement inside a provider-curated managed policy
#[derive(Debug, Clone)]
struct CatalogueStatement {
    actions: Vec<String>,
    resources: Vec<String>,
}

/// Engine that evaluates requests the way the provider does: explicit deny
/// beats allow, anything not allowed is denied.
#[derive(Debug)]
pub struct PolicySimulator {
    /// Managed policy name -> its allow statements
    catalogue: BTreeMap<String, Vec<CatalogueStatement>>,
    /// Deny statements applied on top of every role
    guardrails: Vec<PermissionStatement>,
}

impl PolicySimulator {
    pub fn new() -> Self {
        let mut catalogue = BTreeMap::new();
        catalogue.insert(
            ManagedGrantReference::S3_READ_ONLY.to_string(),
            vec![CatalogueStatement {
                actions: [
                    "s3:Get*",
                    "s3:List*",
                    "s3:Describe*",
                    "s3-object-lambda:Get*",
                    "s3-object-lambda:List*",
                ]
                .iter()
                .map(|a| a.to_string())
                .collect(),
                resources: vec!["*".to_string()],
            }],
        );
        Self {
            catalogue,
            guardrails: Vec::new(),
        }
    }

    /// Add a deny statement evaluated for every role
    pub fn with_guardrail(mut self, statement: PermissionStatement) -> Self {
        self.guardrails.push(statement);
        self
    }

    /// Register a managed policy the catalogue does not know yet
    pub fn with_managed_policy(mut self, name: &str, actions: &[&str], resources: &[&str]) -> Self {
        self.catalogue.entry(name.to_string()).or_default().push(CatalogueStatement {
            actions: actions.iter().map(|a| a.to_string()).collect(),
            resources: resources.iter().map(|r| r.to_string()).collect(),
        });
        self
    }

    /// Would `role` be allowed to perform `action` on `resource`?
    pub fn evaluate(&self, role: &Role, action: &str, resource: &str) -> Result<Decision, SimulationError> {
        if !action.split_once(':').is_some_and(|(svc, name)| !svc.is_empty() && !name.is_empty()) {
            return Err(SimulationError::MalformedAction(action.to_string()));
        }
        if resource != "*" && !resource.starts_with("arn:") {
            return Err(SimulationError::MalformedResource(resource.to_string()));
        }

        let inline: Vec<&PermissionStatement> = role.statements().collect();
        let denies = self
            .guardrails
            .iter()
            .chain(inline.iter().copied())
            .filter(|s| s.effect == Effect::Deny);
        for statement in denies {
            if statement_matches(statement, action, resource) {
                return Ok(Decision::ExplicitDeny {
                    source: statement.sid.clone(),
                });
            }
        }

        for statement in inline.iter().filter(|s| s.effect == Effect::Allow) {
            if statement_matches(statement, action, resource) {
                return Ok(Decision::Allowed {
                    source: statement.sid.clone(),
                });
            }
        }

        for grant in &role.managed_grants {
            let Some(statements) = self.catalogue.get(&grant.name) else {
                tracing::warn!(grant = %grant.name, "managed policy not in simulator catalogue");
                continue;
            };
            let hit = statements.iter().any(|s| {
                s.actions.iter().any(|a| action_matches(a, action))
                    && s.resources.iter().any(|r| wildcard_match(r, resource))
            });
            if hit {
                return Ok(Decision::Allowed {
                    source: grant.name.clone(),
                });
            }
        }

        Ok(Decision::ImplicitDeny)
    }
}

impl Default for PolicySimulator {
    fn default() -> Self {
        Self::new()
    }
}

/// Action names compare case-insensitively; the pattern may carry wildcards.
fn action_matches(pattern: &str, action: &str) -> bool {
    wildcard_match(&pattern.to_ascii_lowercase(), &action.to_ascii_lowercase())
}

fn statement_matches(statement: &PermissionStatement, action: &str, resource: &str) -> bool {
    statement
        .actions
        .iter()
        .any(|a| action_matches(&a.to_string(), action))
        && statement.resources.iter().any(|r| r.matches(resource))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynimport_core::{assemble, Action, Concern, ResourcePattern, StackConfig, IMPORTER_ROLE_ID};

    const TABLE_ARN: &str = "arn:aws:dynamodb:us-east-1:413157014023:table/rd-sample";

    fn role() -> Role {
        let config = StackConfig {
            account_id: Some("413157014023".to_string()),
            region: Some("us-east-1".to_string()),
            ..StackConfig::default()
        };
        let stack = assemble(&config).unwrap();
        stack.role(IMPORTER_ROLE_ID).unwrap().clone()
    }

    #[test]
    fn test_inline_allow() {
        let sim = PolicySimulator::new();
        let decision = sim.evaluate(&role(), "dynamodb:ImportTable", TABLE_ARN).unwrap();
        assert_eq!(
            decision,
            Decision::Allowed {
                source: "TableImportLifecycle".to_string()
            }
        );
        // case-insensitive action names
        assert!(sim.evaluate(&role(), "DynamoDB:importtable", TABLE_ARN).unwrap().is_allowed());
    }

    #[test]
    fn test_other_table_denied() {
        let sim = PolicySimulator::new();
        let other = "arn:aws:dynamodb:us-east-1:413157014023:table/payroll";
        assert_eq!(
            sim.evaluate(&role(), "dynamodb:DeleteTable", other).unwrap(),
            Decision::ImplicitDeny
        );
    }

    #[test]
    fn test_listing_is_unscoped() {
        let sim = PolicySimulator::new();
        assert!(sim.evaluate(&role(), "dynamodb:ListTables", "*").unwrap().is_allowed());
    }

    #[test]
    fn test_log_stream_writes() {
        let sim = PolicySimulator::new();
        let stream = "arn:aws:logs:us-east-1:413157014023:log-group:/aws/lambda/importer:log-stream:2024/01/01";
        assert!(sim.evaluate(&role(), "logs:PutLogEvents", stream).unwrap().is_allowed());
        let foreign = "arn:aws:logs:us-east-1:413157014023:log-group:/ecs/app:log-stream:x";
        assert!(!sim.evaluate(&role(), "logs:PutLogEvents", foreign).unwrap().is_allowed());
    }

    #[test]
    fn test_managed_grant_expansion() {
        let sim = PolicySimulator::new();
        let decision = sim
            .evaluate(&role(), "s3:GetObject", "arn:aws:s3:::audit-413157014023-accounts/account-emails.csv")
            .unwrap();
        assert_eq!(
            decision,
            Decision::Allowed {
                source: "AmazonS3ReadOnlyAccess".to_string()
            }
        );
        assert_eq!(
            sim.evaluate(&role(), "s3:PutObject", "arn:aws:s3:::audit-413157014023-accounts/x").unwrap(),
            Decision::ImplicitDeny
        );
    }

    #[test]
    fn test_explicit_deny_wins() {
        let guardrail = PermissionStatement::deny(
            "NoTableDeletion",
            Concern::TableLifecycle,
            [Action::DeleteTable],
            [ResourcePattern::any()],
        )
        .unwrap();
        let sim = PolicySimulator::new().with_guardrail(guardrail);
        assert_eq!(
            sim.evaluate(&role(), "dynamodb:DeleteTable", TABLE_ARN).unwrap(),
            Decision::ExplicitDeny {
                source: "NoTableDeletion".to_string()
            }
        );
        assert!(sim.evaluate(&role(), "dynamodb:ImportTable", TABLE_ARN).unwrap().is_allowed());
    }

    #[test]
    fn test_unknown_managed_policy_contributes_nothing() {
        let mut role = role();
        role.managed_grants.push(ManagedGrantReference::aws_managed(
            dynimport_core::Partition::Aws,
            "AmazonSQSFullAccess",
        ));
        let sim = PolicySimulator::new();
        assert_eq!(
            sim.evaluate(&role, "sqs:SendMessage", "arn:aws:sqs:us-east-1:413157014023:q").unwrap(),
            Decision::ImplicitDeny
        );

        let sim = PolicySimulator::new().with_managed_policy("AmazonSQSFullAccess", &["sqs:*"], &["*"]);
        assert!(sim
            .evaluate(&role, "sqs:SendMessage", "arn:aws:sqs:us-east-1:413157014023:q")
            .unwrap()
            .is_allowed());
    }

    #[test]
    fn test_malformed_requests() {
        let sim = PolicySimulator::new();
        assert!(matches!(
            sim.evaluate(&role(), "ImportTable", TABLE_ARN),
            Err(SimulationError::MalformedAction(_))
        ));
        assert!(matches!(
            sim.evaluate(&role(), "dynamodb:ImportTable", "rd-sample"),
            Err(SimulationError::MalformedResource(_))
        ));
    }
}
