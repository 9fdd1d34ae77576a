//! Permission statement synthesis and least-privilege audit

use crate::error::{StackError, StackResult};
use crate::naming;
use crate::role::Role;
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const LAMBDA_LOG_GROUP: &str = "arn:${Partition}:logs:${Region}:${AccountId}:log-group:/aws/lambda/*";
const LAMBDA_LOG_STREAM: &str =
    "arn:${Partition}:logs:${Region}:${AccountId}:log-group:/aws/lambda/*:log-stream:*";
const IMPORT_LOG_GROUP: &str = "arn:${Partition}:logs:${Region}:${AccountId}:log-group:/aws-dynamodb/*";
const IMPORT_LOG_STREAM: &str =
    "arn:${Partition}:logs:${Region}:${AccountId}:log-group:/aws-dynamodb/*:log-stream:*";
const TABLE: &str = "arn:${Partition}:dynamodb:${Region}:${AccountId}:table/${TableName}";
const GLOBAL_TABLE: &str = "arn:${Partition}:dynamodb::${AccountId}:global-table/${TableName}";
const TABLE_BACKUPS: &str = "arn:${Partition}:dynamodb:${Region}:${AccountId}:table/${TableName}/backup/*";

const LAMBDA_LOG_NAMESPACE: &str = "/aws/lambda/";
const IMPORT_LOG_NAMESPACE: &str = "/aws-dynamodb/";

pub const LOGS_POLICY: &str = "cw-logs-policy";
pub const IMPORTER_POLICY: &str = "dyndb-importer-policy";

/// Everything a statement template may refer to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementContext {
    pub partition: Partition,
    pub account_id: String,
    pub region: String,
    pub table_name: String,
    /// Grant the table import job its own `/aws-dynamodb/*` log namespace
    #[serde(default)]
    pub import_logging: bool,
}

impl StatementContext {
    pub fn new(account_id: &str, region: &str, table_name: &str) -> Self {
        Self {
            partition: Partition::Aws,
            account_id: account_id.to_string(),
            region: region.to_string(),
            table_name: table_name.to_string(),
            import_logging: false,
        }
    }

    pub fn validate(&self) -> StackResult<()> {
        naming::validate_account_id(&self.account_id)?;
        naming::validate_region(&self.region)?;
        naming::validate_table_name(&self.table_name)
    }

    fn bindings(&self) -> BTreeMap<String, String> {
        [
            ("Partition", self.partition.as_str()),
            ("Region", self.region.as_str()),
            ("AccountId", self.account_id.as_str()),
            ("TableName", self.table_name.as_str()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    /// Log-group namespaces the worker may touch
    fn log_namespaces(&self) -> &'static [&'static str] {
        if self.import_logging {
            &[LAMBDA_LOG_NAMESPACE, IMPORT_LOG_NAMESPACE]
        } else {
            &[LAMBDA_LOG_NAMESPACE]
        }
    }

    fn log_group_prefix(&self, namespace: &str) -> String {
        format!(
            "arn:{}:logs:{}:{}:log-group:{}",
            self.partition, self.region, self.account_id, namespace
        )
    }

    /// The exact table, global-table and backup ARNs the worker manages
    fn table_arns(&self) -> StackResult<Vec<String>> {
        let bindings = self.bindings();
        [TABLE, GLOBAL_TABLE, TABLE_BACKUPS]
            .iter()
            .map(|t| ResourcePattern::resolve(t, &bindings).map(|p| p.arn().to_string()))
            .collect()
    }
}

/// Build the worker's statements, ordered by concern.
///
/// Same context in, same statements out, in the same order.
pub fn build_statements(ctx: &StatementContext) -> StackResult<Vec<PermissionStatement>> {
    ctx.validate()?;
    let bindings = ctx.bindings();
    let pattern = |template: &str| ResourcePattern::resolve(template, &bindings);

    let mut statements = vec![
        PermissionStatement::allow(
            "LambdaLogGroups",
            Concern::LogGroupLifecycle,
            [Action::CreateLogGroup, Action::CreateLogStream],
            [pattern(LAMBDA_LOG_GROUP)?],
        )?,
        PermissionStatement::allow(
            "LambdaLogEvents",
            Concern::LogStreamWrites,
            [Action::PutLogEvents],
            [pattern(LAMBDA_LOG_STREAM)?],
        )?,
        PermissionStatement::allow(
            "TableImportLifecycle",
            Concern::TableLifecycle,
            [
                Action::CreateTable,
                Action::ImportTable,
                Action::DescribeTable,
                Action::DescribeImport,
                Action::DeleteBackup,
                Action::DeleteTable,
                Action::ListImports,
            ],
            [pattern(TABLE)?, pattern(GLOBAL_TABLE)?, pattern(TABLE_BACKUPS)?],
        )?,
        // ListTables and ListGlobalTables have no resource-level scoping.
        PermissionStatement::allow(
            "TableEnumeration",
            Concern::TableEnumeration,
            [Action::ListTables, Action::ListGlobalTables],
            [ResourcePattern::any()],
        )?,
    ];

    if ctx.import_logging {
        statements.push(PermissionStatement::allow(
            "ImportLogGroups",
            Concern::LogGroupLifecycle,
            [
                Action::CreateLogGroup,
                Action::CreateLogStream,
                Action::DescribeLogGroups,
                Action::DescribeLogStreams,
                Action::PutRetentionPolicy,
            ],
            [pattern(IMPORT_LOG_GROUP)?],
        )?);
        statements.push(PermissionStatement::allow(
            "ImportLogEvents",
            Concern::LogStreamWrites,
            [Action::PutLogEvents],
            [pattern(IMPORT_LOG_STREAM)?],
        )?);
    }

    tracing::debug!(
        table = %ctx.table_name,
        count = statements.len(),
        "built permission statements"
    );
    Ok(statements)
}

/// Split statements into the two inline policies the role carries
pub fn into_policies(statements: Vec<PermissionStatement>) -> Vec<InlinePolicy> {
    let (logs, importer): (Vec<_>, Vec<_>) = statements.into_iter().partition(|s| {
        matches!(s.concern, Concern::LogGroupLifecycle | Concern::LogStreamWrites)
    });
    vec![
        InlinePolicy::new(IMPORTER_POLICY, importer),
        InlinePolicy::new(LOGS_POLICY, logs),
    ]
    .into_iter()
    .filter(|p| !p.statements.is_empty())
    .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FindingKind {
    /// Resource scope is the minimum the action needs
    Scoped,
    /// Unscoped listing grant that the provider cannot narrow
    DocumentedException,
    /// Provider-managed bundle attached by reference
    CoarseManagedGrant,
    Violation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFinding {
    pub subject: String,
    pub kind: FindingKind,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    pub findings: Vec<AuditFinding>,
}

impl AuditReport {
    pub fn violations(&self) -> impl Iterator<Item = &AuditFinding> {
        self.findings.iter().filter(|f| f.kind == FindingKind::Violation)
    }

    pub fn of_kind(&self, kind: FindingKind) -> impl Iterator<Item = &AuditFinding> {
        self.findings.iter().filter(move |f| f.kind == kind)
    }

    pub fn is_clean(&self) -> bool {
        self.violations().next().is_none()
    }

    /// The first violation as an error, if any
    pub fn into_result(self) -> StackResult<Self> {
        if let Some(v) = self.violations().next() {
            return Err(StackError::LeastPrivilegeViolation {
                sid: v.subject.clone(),
                reason: v.detail.clone(),
            });
        }
        Ok(self)
    }
}

/// Check every statement and managed grant on `role` against the minimum scope
pub fn audit_role(role: &Role, ctx: &StatementContext) -> StackResult<AuditReport> {
    let table_arns = ctx.table_arns()?;
    let mut report = AuditReport::default();

    for statement in role.statements() {
        report.findings.push(audit_statement(statement, ctx, &table_arns));
    }

    // Read-only object storage is the only bundle inside the worker's scope.
    let s3_read_only = ManagedGrantReference::s3_read_only(ctx.partition);
    for grant in &role.managed_grants {
        let finding = if *grant == s3_read_only {
            tracing::warn!(grant = %grant.arn, "coarse managed grant attached");
            AuditFinding {
                subject: grant.name.clone(),
                kind: FindingKind::CoarseManagedGrant,
                detail: format!("attached by reference: {}", grant.arn),
            }
        } else {
            AuditFinding {
                subject: grant.name.clone(),
                kind: FindingKind::Violation,
                detail: format!("managed grant {} is outside the worker's capability groups", grant.arn),
            }
        };
        report.findings.push(finding);
    }

    Ok(report)
}

fn audit_statement(
    statement: &PermissionStatement,
    ctx: &StatementContext,
    table_arns: &[String],
) -> AuditFinding {
    let finding = |kind: FindingKind, detail: String| AuditFinding {
        subject: statement.sid.clone(),
        kind,
        detail,
    };

    if statement.effect == Effect::Deny {
        return finding(FindingKind::Scoped, "deny statements only narrow access".to_string());
    }

    let permitted = statement.concern.permitted_actions();
    if let Some(action) = statement.actions.iter().find(|a| !permitted.contains(*a)) {
        return finding(
            FindingKind::Violation,
            format!("{} does not belong to {:?}", action, statement.concern),
        );
    }

    if statement.resources.iter().any(ResourcePattern::is_unscoped) {
        if let Some(action) = statement
            .actions
            .iter()
            .find(|a| !a.requires_unscoped_resource())
        {
            return finding(
                FindingKind::Violation,
                format!("{} is granted on '*' but supports resource scoping", action),
            );
        }
        return finding(
            FindingKind::DocumentedException,
            "listing APIs do not support resource-level scoping".to_string(),
        );
    }

    for resource in &statement.resources {
        let arn = resource.arn();
        let in_scope = match statement.concern {
            Concern::LogGroupLifecycle => ctx.log_namespaces().iter().any(|ns| {
                let prefix = ctx.log_group_prefix(ns);
                arn.strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.contains(":log-stream:"))
            }),
            Concern::LogStreamWrites => ctx.log_namespaces().iter().any(|ns| {
                let prefix = ctx.log_group_prefix(ns);
                arn.strip_prefix(&prefix)
                    .is_some_and(|rest| rest.contains(":log-stream:"))
            }),
            Concern::TableLifecycle => table_arns.iter().any(|t| t == arn),
            Concern::TableEnumeration => false,
        };
        if !in_scope {
            return finding(
                FindingKind::Violation,
                format!("resource '{}' is outside the {:?} scope", arn, statement.concern),
            );
        }
    }

    finding(
        FindingKind::Scoped,
        format!("{} resource(s) within minimum scope", statement.resources.len()),
    )
}
