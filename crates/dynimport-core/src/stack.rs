//! Stack assembly: parameters -> statements -> role -> compute unit

use crate::compute::*;
use crate::config::StackConfig;
use crate::error::{StackError, StackResult};
use crate::naming;
use crate::params::*;
use crate::permissions::{audit_role, build_statements, into_policies, AuditReport, StatementContext};
use crate::role::{compose_role, Role};
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const IMPORTER_ROLE_ID: &str = "DynDbImporterRole";
pub const IMPORTER_FUNCTION_ID: &str = "DynDbImporter";

/// One provisioning unit. Owns every parameter, role and compute unit in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stack {
    pub name: String,
    pub description: String,
    pub context: StatementContext,
    pub parameters: ParameterSet,
    pub resolved: ResolvedParameters,
    pub roles: Vec<Role>,
    pub functions: Vec<ComputeUnitDescriptor>,
}

impl Stack {
    pub fn role(&self, logical_id: &str) -> Option<&Role> {
        self.roles.iter().find(|r| r.logical_id == logical_id)
    }

    pub fn function(&self, logical_id: &str) -> Option<&ComputeUnitDescriptor> {
        self.functions.iter().find(|f| f.logical_id == logical_id)
    }

    /// The role a compute unit runs as
    pub fn bound_role(&self, function: &ComputeUnitDescriptor) -> Option<&Role> {
        self.role(&function.role)
    }

    /// Least-privilege audit of every role in the stack
    pub fn audit(&self) -> StackResult<AuditReport> {
        let mut report = AuditReport::default();
        for role in &self.roles {
            report.findings.extend(audit_role(role, &self.context)?.findings);
        }
        Ok(report)
    }
}

/// Build the whole resource graph or fail with the first violated invariant.
///
/// Nothing is returned on failure; there is no partially built stack.
pub fn assemble(config: &StackConfig) -> StackResult<Stack> {
    naming::validate_stack_name(&config.stack_name)?;
    let account_id = config
        .account_id
        .as_deref()
        .ok_or_else(|| StackError::invalid_name("account id", "", "not configured"))?;
    let region = config
        .region
        .as_deref()
        .ok_or_else(|| StackError::invalid_name("region", "", "not configured"))?;

    let parameters = ParameterSet::import_stack();
    let resolved = parameters.resolve(&config.parameters)?;
    let table_name = resolved.require(DYNAMODB_TABLE_NAME)?;
    let bucket = resolved.require(S3_BUCKET)?;
    let log_level = resolved.require(LOG_LEVEL)?;

    let context = StatementContext {
        partition: config.partition,
        account_id: account_id.to_string(),
        region: region.to_string(),
        table_name: table_name.to_string(),
        import_logging: config.import_logging,
    };
    let statements = build_statements(&context)?;

    let mut role = compose_role(
        IMPORTER_ROLE_ID,
        ServicePrincipal::lambda(),
        into_policies(statements),
        vec![ManagedGrantReference::s3_read_only(config.partition)],
        config.partition,
    )?
    .with_description("Role for DynDbImporter Lambda");
    if let Some(name) = &config.role_name {
        role = role.with_name(name)?;
    }

    let env: BTreeMap<String, String> = [
        (ENV_LOG_LEVEL, log_level),
        (ENV_TABLE_NAME, table_name),
        (ENV_S3_BUCKET, bucket),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    let mut function = ComputeUnitDescriptor::new(
        IMPORTER_FUNCTION_ID,
        config.image.clone(),
        env,
        config.memory_mb,
        config.timeout_seconds,
        &role,
    )?
    .with_description("Image-based Lambda to import CSV data into DynamoDB table");
    if let Some(name) = &config.function_name {
        function = function.with_name(name)?;
    }

    audit_role(&role, &context)?.into_result()?;

    tracing::debug!(
        stack = %config.stack_name,
        table = table_name,
        bucket = bucket,
        "assembled stack"
    );

    Ok(Stack {
        name: config.stack_name.clone(),
        description: config.description.clone(),
        context,
        parameters,
        resolved,
        roles: vec![role],
        functions: vec![function],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> StackConfig {
        StackConfig {
            account_id: Some("413157014023".to_string()),
            region: Some("us-east-1".to_string()),
            ..StackConfig::default()
        }
    }

    #[test]
    fn test_assemble_defaults() {
        let stack = assemble(&config()).unwrap();
        assert_eq!(stack.name, "DynTestStack");
        assert_eq!(stack.roles.len(), 1);
        assert_eq!(stack.functions.len(), 1);

        let function = stack.function(IMPORTER_FUNCTION_ID).unwrap();
        assert_eq!(function.memory_mb, 512);
        assert_eq!(function.timeout_seconds, 300);
        let keys: Vec<&str> = function.env.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["log_level", "s3_bucket", "table_name"]);
        assert_eq!(function.env["table_name"], "rd-sample");
        assert_eq!(function.env["s3_bucket"], "audit-413157014023-accounts");
        assert_eq!(function.env["log_level"], "INFO");

        let role = stack.bound_role(function).unwrap();
        assert_eq!(role.principal, ServicePrincipal::lambda());
        assert_eq!(
            role.managed_grants[0].arn,
            "arn:aws:iam::aws:policy/AmazonS3ReadOnlyAccess"
        );
    }

    #[test]
    fn test_assemble_is_deterministic() {
        let mut cfg = config();
        cfg.parameters.insert(DYNAMODB_TABLE_NAME.to_string(), "accounts".to_string());
        assert_eq!(assemble(&cfg).unwrap(), assemble(&cfg).unwrap());
    }

    #[test]
    fn test_overrides_flow_into_statements() {
        let mut cfg = config();
        cfg.parameters.insert(DYNAMODB_TABLE_NAME.to_string(), "accounts".to_string());
        let stack = assemble(&cfg).unwrap();
        let role = stack.role(IMPORTER_ROLE_ID).unwrap();
        let table = role
            .statements()
            .find(|s| s.concern == Concern::TableLifecycle)
            .unwrap();
        assert!(table.resource_arns()[0].ends_with(":table/accounts"));
        assert_eq!(stack.function(IMPORTER_FUNCTION_ID).unwrap().env["table_name"], "accounts");
    }

    #[test]
    fn test_missing_account_fails() {
        let cfg = StackConfig {
            account_id: None,
            ..config()
        };
        assert!(matches!(
            assemble(&cfg),
            Err(StackError::InvalidResourceName { kind: "account id", .. })
        ));
    }

    #[test]
    fn test_shape_errors_surface() {
        let cfg = StackConfig {
            memory_mb: 64,
            ..config()
        };
        assert!(matches!(assemble(&cfg), Err(StackError::InvalidResourceShape(_))));
    }

    #[test]
    fn test_stack_audit_is_clean() {
        let stack = assemble(&config()).unwrap();
        assert!(stack.audit().unwrap().is_clean());
    }

    #[test]
    fn test_physical_names() {
        let cfg = StackConfig {
            role_name: Some("dyndb-importer-role".to_string()),
            function_name: Some("dyndb-importer".to_string()),
            ..config()
        };
        let stack = assemble(&cfg).unwrap();
        assert_eq!(stack.roles[0].role_name.as_deref(), Some("dyndb-importer-role"));
        assert_eq!(stack.functions[0].function_name.as_deref(), Some("dyndb-importer"));
    }
}
