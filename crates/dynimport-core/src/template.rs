//! Provider document synthesis and document diffing

use crate::compute::{ArtifactReference, ComputeUnitDescriptor};
use crate::role::Role;
use crate::stack::Stack;
use crate::types::{Effect, PermissionStatement};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::fmt;

const POLICY_VERSION: &str = "2012-10-17";

impl Stack {
    /// Render the stack as a CloudFormation template.
    ///
    /// Parameter values are already substituted; they are recorded under
    /// `Metadata` for inspection only.
    pub fn to_template(&self) -> Value {
        let mut resources = Map::new();
        for role in &self.roles {
            resources.insert(role.logical_id.clone(), role_resource(role));
        }
        for function in &self.functions {
            resources.insert(function.logical_id.clone(), function_resource(function));
        }

        let mut outputs = Map::new();
        for function in &self.functions {
            outputs.insert(
                format!("{}Name", function.logical_id),
                json!({ "Value": { "Ref": function.logical_id } }),
            );
        }
        for role in &self.roles {
            outputs.insert(
                format!("{}Arn", role.logical_id),
                json!({ "Value": { "Fn::GetAtt": [role.logical_id, "Arn"] } }),
            );
        }

        let parameters: Vec<Value> = self
            .parameters
            .iter()
            .map(|p| {
                json!({
                    "Name": p.name,
                    "Type": p.param_type,
                    "Description": p.description,
                    "Default": p.default,
                    "Value": self.resolved.get(&p.name),
                })
            })
            .collect();

        json!({
            "AWSTemplateFormatVersion": "2010-09-09",
            "Description": self.description,
            "Metadata": {
                "dynimport": {
                    "Parameters": parameters,
                    "Partition": self.context.partition.as_str(),
                    "AccountId": self.context.account_id,
                    "Region": self.context.region,
                }
            },
            "Resources": resources,
            "Outputs": outputs,
        })
    }

    pub fn to_template_string(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.to_template())
    }
}

/// A statement as it appears in a policy document
pub fn statement_document(statement: &PermissionStatement) -> Value {
    let effect = match statement.effect {
        Effect::Allow => "Allow",
        Effect::Deny => "Deny",
    };
    let actions: Vec<String> = statement.actions.iter().map(|a| a.to_string()).collect();
    json!({
        "Sid": statement.sid,
        "Effect": effect,
        "Action": actions,
        "Resource": statement.resource_arns(),
    })
}

fn role_resource(role: &Role) -> Value {
    let policies: Vec<Value> = role
        .inline_policies
        .iter()
        .map(|policy| {
            let statements: Vec<Value> = policy.statements.iter().map(statement_document).collect();
            json!({
                "PolicyName": policy.name,
                "PolicyDocument": { "Version": POLICY_VERSION, "Statement": statements },
            })
        })
        .collect();
    let managed: Vec<&str> = role.managed_grants.iter().map(|g| g.arn.as_str()).collect();

    let mut properties = json!({
        "Description": role.description,
        "AssumeRolePolicyDocument": {
            "Version": POLICY_VERSION,
            "Statement": [{
                "Effect": "Allow",
                "Principal": { "Service": role.principal.as_str() },
                "Action": "sts:AssumeRole",
            }],
        },
        "Policies": policies,
        "ManagedPolicyArns": managed,
    });
    if let Some(name) = &role.role_name {
        properties["RoleName"] = json!(name);
    }

    json!({ "Type": "AWS::IAM::Role", "Properties": properties })
}

fn function_resource(function: &ComputeUnitDescriptor) -> Value {
    let mut properties = json!({
        "Description": function.description,
        "PackageType": "Image",
        "Role": { "Fn::GetAtt": [function.role, "Arn"] },
        "MemorySize": function.memory_mb,
        "Timeout": function.timeout_seconds,
        "Environment": { "Variables": function.env },
    });
    if let Some(name) = &function.function_name {
        properties["FunctionName"] = json!(name);
    }

    let mut resource = json!({
        "Type": "AWS::Lambda::Function",
        "DependsOn": [function.role],
    });
    match &function.image {
        ArtifactReference::ImageUri(uri) => {
            properties["Code"] = json!({ "ImageUri": uri });
        }
        ArtifactReference::Asset { directory } => {
            // Filled in by the packaging step once the image is pushed.
            properties["Code"] = json!({});
            resource["Metadata"] = json!({
                "aws:asset:path": directory,
                "aws:asset:property": "Code.ImageUri",
            });
        }
    }
    resource["Properties"] = properties;
    resource
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceChange {
    pub logical_id: String,
    pub resource_type: String,
    pub kind: ChangeKind,
}

/// Resource-level difference between a deployed and a desired template
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackDiff {
    pub changes: Vec<ResourceChange>,
    /// Anything outside `Resources` differs (description, outputs, metadata)
    pub template_changed: bool,
}

impl StackDiff {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && !self.template_changed
    }
}

impl fmt::Display for StackDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return writeln!(f, "no differences");
        }
        for change in &self.changes {
            let marker = match change.kind {
                ChangeKind::Added => '+',
                ChangeKind::Removed => '-',
                ChangeKind::Modified => '~',
            };
            writeln!(f, "{} {} ({})", marker, change.logical_id, change.resource_type)?;
        }
        if self.template_changed {
            writeln!(f, "~ template metadata")?;
        }
        Ok(())
    }
}

/// Compare two templates. `deployed = None` means nothing is deployed yet.
pub fn diff_templates(deployed: Option<&Value>, desired: &Value) -> StackDiff {
    let empty = Map::new();
    let resources = |t: Option<&Value>| -> Map<String, Value> {
        t.and_then(|t| t.get("Resources"))
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_else(|| empty.clone())
    };
    let old = resources(deployed);
    let new = resources(Some(desired));

    let ids: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    let mut changes = Vec::new();
    for id in ids {
        let kind = match (old.get(id), new.get(id)) {
            (None, Some(_)) => ChangeKind::Added,
            (Some(_), None) => ChangeKind::Removed,
            (Some(a), Some(b)) if a != b => ChangeKind::Modified,
            _ => continue,
        };
        let resource_type = new
            .get(id)
            .or_else(|| old.get(id))
            .and_then(|r| r.get("Type"))
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .to_string();
        changes.push(ResourceChange {
            logical_id: id.clone(),
            resource_type,
            kind,
        });
    }

    let without_resources = |t: &Value| -> Value {
        let mut t = t.clone();
        if let Some(obj) = t.as_object_mut() {
            obj.remove("Resources");
        }
        t
    };
    let template_changed = match deployed {
        Some(d) => without_resources(d) != without_resources(desired),
        None => false,
    };

    StackDiff {
        changes,
        template_changed,
    }
}
