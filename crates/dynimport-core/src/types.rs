//! Core data types for the import stack's permission model

use crate::error::{StackError, StackResult};
use dynimport_pattern::{wildcard_match, Template};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Provider partition, the second field of every ARN
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Partition {
    #[default]
    #[serde(rename = "aws")]
    Aws,
    #[serde(rename = "aws-cn")]
    AwsCn,
    #[serde(rename = "aws-us-gov")]
    AwsUsGov,
}

impl Partition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Aws => "aws",
            Partition::AwsCn => "aws-cn",
            Partition::AwsUsGov => "aws-us-gov",
        }
    }

    /// Service principals this partition accepts in a role trust policy
    pub fn trusted_principals(&self) -> &'static [&'static str] {
        match self {
            Partition::Aws => &[
                "lambda.amazonaws.com",
                "edgelambda.amazonaws.com",
                "ecs-tasks.amazonaws.com",
                "states.amazonaws.com",
            ],
            Partition::AwsUsGov => &[
                "lambda.amazonaws.com",
                "ecs-tasks.amazonaws.com",
                "states.amazonaws.com",
            ],
            Partition::AwsCn => &["lambda.amazonaws.com", "ecs-tasks.amazonaws.com"],
        }
    }

    pub fn trusts(&self, principal: &ServicePrincipal) -> bool {
        self.trusted_principals().contains(&principal.as_str())
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Partition {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aws" => Ok(Partition::Aws),
            "aws-cn" => Ok(Partition::AwsCn),
            "aws-us-gov" => Ok(Partition::AwsUsGov),
            other => Err(StackError::invalid_name(
                "partition",
                other,
                "expected aws, aws-cn or aws-us-gov",
            )),
        }
    }
}

/// Service identity allowed to assume a role (e.g. `lambda.amazonaws.com`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServicePrincipal(String);

impl ServicePrincipal {
    pub const LAMBDA: &'static str = "lambda.amazonaws.com";

    pub fn new(principal: impl Into<String>) -> Self {
        Self(principal.into())
    }

    /// The serverless compute runtime
    pub fn lambda() -> Self {
        Self::new(Self::LAMBDA)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServicePrincipal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

/// Actions the import worker may be granted.
///
/// Anything outside this vocabulary fails to parse with `UnknownAction`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Action {
    // CloudWatch Logs
    CreateLogGroup,
    CreateLogStream,
    PutLogEvents,
    DescribeLogGroups,
    DescribeLogStreams,
    PutRetentionPolicy,

    // DynamoDB
    CreateTable,
    ImportTable,
    DescribeTable,
    DescribeImport,
    DeleteBackup,
    DeleteTable,
    ListImports,
    ListTables,
    ListGlobalTables,
}

impl Action {
    pub const ALL: [Action; 15] = [
        Action::CreateLogGroup,
        Action::CreateLogStream,
        Action::PutLogEvents,
        Action::DescribeLogGroups,
        Action::DescribeLogStreams,
        Action::PutRetentionPolicy,
        Action::CreateTable,
        Action::ImportTable,
        Action::DescribeTable,
        Action::DescribeImport,
        Action::DeleteBackup,
        Action::DeleteTable,
        Action::ListImports,
        Action::ListTables,
        Action::ListGlobalTables,
    ];

    pub fn service(&self) -> &'static str {
        match self {
            Action::CreateLogGroup
            | Action::CreateLogStream
            | Action::PutLogEvents
            | Action::DescribeLogGroups
            | Action::DescribeLogStreams
            | Action::PutRetentionPolicy => "logs",
            _ => "dynamodb",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Action::CreateLogGroup => "CreateLogGroup",
            Action::CreateLogStream => "CreateLogStream",
            Action::PutLogEvents => "PutLogEvents",
            Action::DescribeLogGroups => "DescribeLogGroups",
            Action::DescribeLogStreams => "DescribeLogStreams",
            Action::PutRetentionPolicy => "PutRetentionPolicy",
            Action::CreateTable => "CreateTable",
            Action::ImportTable => "ImportTable",
            Action::DescribeTable => "DescribeTable",
            Action::DescribeImport => "DescribeImport",
            Action::DeleteBackup => "DeleteBackup",
            Action::DeleteTable => "DeleteTable",
            Action::ListImports => "ListImports",
            Action::ListTables => "ListTables",
            Action::ListGlobalTables => "ListGlobalTables",
        }
    }

    /// Listing APIs that cannot be restricted to a resource ARN
    pub fn requires_unscoped_resource(&self) -> bool {
        matches!(self, Action::ListTables | Action::ListGlobalTables)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.service(), self.name())
    }
}

impl FromStr for Action {
    type Err = StackError;

    /// Service prefix and action name are matched case-insensitively, as IAM does.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .iter()
            .copied()
            .find(|a| a.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| StackError::UnknownAction(s.to_string()))
    }
}

impl TryFrom<String> for Action {
    type Error = StackError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Action> for String {
    fn from(action: Action) -> Self {
        action.to_string()
    }
}

/// Capability group a statement belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Concern {
    LogGroupLifecycle,
    LogStreamWrites,
    TableLifecycle,
    TableEnumeration,
}

impl Concern {
    /// Actions a statement of this concern may carry
    pub fn permitted_actions(&self) -> &'static [Action] {
        match self {
            Concern::LogGroupLifecycle => &[
                Action::CreateLogGroup,
                Action::CreateLogStream,
                Action::DescribeLogGroups,
                Action::DescribeLogStreams,
                Action::PutRetentionPolicy,
            ],
            Concern::LogStreamWrites => &[Action::PutLogEvents],
            Concern::TableLifecycle => &[
                Action::CreateTable,
                Action::ImportTable,
                Action::DescribeTable,
                Action::DescribeImport,
                Action::DeleteBackup,
                Action::DeleteTable,
                Action::ListImports,
            ],
            Concern::TableEnumeration => &[Action::ListTables, Action::ListGlobalTables],
        }
    }
}

/// A templated resource identifier together with its build-time rendering
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourcePattern {
    template: String,
    arn: String,
}

impl ResourcePattern {
    /// Parse `template` and substitute every `${Placeholder}` from `bindings`.
    pub fn resolve(template: &str, bindings: &BTreeMap<String, String>) -> StackResult<Self> {
        let parsed = Template::parse(template)?;
        let arn = parsed.render(bindings)?;
        Ok(Self {
            template: template.to_string(),
            arn,
        })
    }

    /// The literal `*` resource
    pub fn any() -> Self {
        Self {
            template: "*".to_string(),
            arn: "*".to_string(),
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn arn(&self) -> &str {
        &self.arn
    }

    pub fn is_unscoped(&self) -> bool {
        self.arn == "*"
    }

    /// Does this pattern cover the concrete `resource` ARN?
    pub fn matches(&self, resource: &str) -> bool {
        wildcard_match(&self.arn, resource)
    }
}

impl fmt::Display for ResourcePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.arn)
    }
}

/// A single access-control statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionStatement {
    pub sid: String,
    pub concern: Concern,
    pub effect: Effect,
    pub actions: Vec<Action>,
    pub resources: Vec<ResourcePattern>,
}

impl PermissionStatement {
    /// Build an `Allow` statement. Duplicates are dropped, first occurrence wins.
    pub fn allow(
        sid: impl Into<String>,
        concern: Concern,
        actions: impl IntoIterator<Item = Action>,
        resources: impl IntoIterator<Item = ResourcePattern>,
    ) -> StackResult<Self> {
        let sid = sid.into();

        let mut unique_actions: Vec<Action> = Vec::new();
        for action in actions {
            if !unique_actions.contains(&action) {
                unique_actions.push(action);
            }
        }
        let mut unique_resources: Vec<ResourcePattern> = Vec::new();
        for resource in resources {
            if !unique_resources.contains(&resource) {
                unique_resources.push(resource);
            }
        }

        if unique_actions.is_empty() {
            return Err(StackError::InvalidResourceShape(format!(
                "statement '{}' has no actions",
                sid
            )));
        }
        if unique_resources.is_empty() {
            return Err(StackError::InvalidResourceShape(format!(
                "statement '{}' has no resources",
                sid
            )));
        }

        Ok(Self {
            sid,
            concern,
            effect: Effect::Allow,
            actions: unique_actions,
            resources: unique_resources,
        })
    }

    /// Build a `Deny` statement under the same rules as [`PermissionStatement::allow`].
    pub fn deny(
        sid: impl Into<String>,
        concern: Concern,
        actions: impl IntoIterator<Item = Action>,
        resources: impl IntoIterator<Item = ResourcePattern>,
    ) -> StackResult<Self> {
        let mut statement = Self::allow(sid, concern, actions, resources)?;
        statement.effect = Effect::Deny;
        Ok(statement)
    }

    pub fn resource_arns(&self) -> Vec<&str> {
        self.resources.iter().map(|r| r.arn()).collect()
    }

    /// Does this statement name `action` on `resource`?
    pub fn covers(&self, action: &Action, resource: &str) -> bool {
        self.actions.contains(action) && self.resources.iter().any(|r| r.matches(resource))
    }
}

/// A named group of statements attached inline to a role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlinePolicy {
    pub name: String,
    pub statements: Vec<PermissionStatement>,
}

impl InlinePolicy {
    pub fn new(name: impl Into<String>, statements: Vec<PermissionStatement>) -> Self {
        Self {
            name: name.into(),
            statements,
        }
    }
}

/// A provider-curated permission bundle attached by reference.
///
/// Kept apart from `PermissionStatement` so audits can report coarse grants
/// separately from the synthesized ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManagedGrantReference {
    pub name: String,
    pub arn: String,
}

impl ManagedGrantReference {
    pub const S3_READ_ONLY: &'static str = "AmazonS3ReadOnlyAccess";

    /// A provider-owned policy, `arn:{partition}:iam::aws:policy/{name}`
    pub fn aws_managed(partition: Partition, name: &str) -> Self {
        Self {
            name: name.to_string(),
            arn: format!("arn:{}:iam::aws:policy/{}", partition, name),
        }
    }

    pub fn s3_read_only(partition: Partition) -> Self {
        Self::aws_managed(partition, Self::S3_READ_ONLY)
    }
}
