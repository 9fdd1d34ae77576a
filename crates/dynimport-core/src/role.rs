//! Role composition

use crate::error::{StackError, StackResult};
use crate::naming;
use crate::types::*;
use serde::{Deserialize, Serialize};

/// An assumable identity owned by a stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub logical_id: String,
    /// Physical name; left to the provider when `None`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_name: Option<String>,
    pub description: String,
    pub principal: ServicePrincipal,
    /// Attachment order is kept for audit output; evaluation treats it as a union.
    pub inline_policies: Vec<InlinePolicy>,
    pub managed_grants: Vec<ManagedGrantReference>,
}

impl Role {
    /// Every inline statement, in attachment order
    pub fn statements(&self) -> impl Iterator<Item = &PermissionStatement> {
        self.inline_policies.iter().flat_map(|p| p.statements.iter())
    }

    pub fn with_name(mut self, role_name: &str) -> StackResult<Self> {
        naming::validate_role_name(role_name)?;
        self.role_name = Some(role_name.to_string());
        Ok(self)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Bind inline policies and managed grants to one principal.
///
/// Fails only when `partition` does not trust `principal`.
pub fn compose_role(
    logical_id: &str,
    principal: ServicePrincipal,
    inline_policies: Vec<InlinePolicy>,
    managed_grants: Vec<ManagedGrantReference>,
    partition: Partition,
) -> StackResult<Role> {
    if !partition.trusts(&principal) {
        return Err(StackError::PrincipalNotTrusted {
            principal: principal.to_string(),
            partition: partition.to_string(),
        });
    }

    let mut grants: Vec<ManagedGrantReference> = Vec::new();
    for grant in managed_grants {
        if !grants.contains(&grant) {
            grants.push(grant);
        }
    }

    tracing::debug!(
        role = logical_id,
        principal = %principal,
        policies = inline_policies.len(),
        grants = grants.len(),
        "composed role"
    );

    Ok(Role {
        logical_id: logical_id.to_string(),
        role_name: None,
        description: String::new(),
        principal,
        inline_policies,
        managed_grants: grants,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::{build_statements, into_policies, StatementContext};

    fn policies() -> Vec<InlinePolicy> {
        let ctx = StatementContext::new("413157014023", "us-east-1", "rd-sample");
        into_policies(build_statements(&ctx).unwrap())
    }

    #[test]
    fn test_compose_keeps_order() {
        let role = compose_role(
            "DynDbImporterRole",
            ServicePrincipal::lambda(),
            policies(),
            vec![ManagedGrantReference::s3_read_only(Partition::Aws)],
            Partition::Aws,
        )
        .unwrap();

        let sids: Vec<&str> = role.statements().map(|s| s.sid.as_str()).collect();
        assert_eq!(
            sids,
            vec!["TableImportLifecycle", "TableEnumeration", "LambdaLogGroups", "LambdaLogEvents"]
        );
        assert_eq!(role.managed_grants.len(), 1);
    }

    #[test]
    fn test_untrusted_principal() {
        let err = compose_role(
            "R",
            ServicePrincipal::new("ec2.amazonaws.com"),
            policies(),
            vec![],
            Partition::Aws,
        )
        .unwrap_err();
        assert_eq!(
            err,
            StackError::PrincipalNotTrusted {
                principal: "ec2.amazonaws.com".to_string(),
                partition: "aws".to_string(),
            }
        );
    }

    #[test]
    fn test_duplicate_grants_collapse() {
        let grant = ManagedGrantReference::s3_read_only(Partition::Aws);
        let role = compose_role(
            "R",
            ServicePrincipal::lambda(),
            vec![],
            vec![grant.clone(), grant],
            Partition::Aws,
        )
        .unwrap();
        assert_eq!(role.managed_grants.len(), 1);
    }

    #[test]
    fn test_role_name_validated() {
        let role = compose_role("R", ServicePrincipal::lambda(), vec![], vec![], Partition::Aws).unwrap();
        assert!(role.clone().with_name("DynDbImporterRole").is_ok());
        assert!(role.with_name("bad name").is_err());
    }
}
