//! Operator-facing stack parameters

use crate::error::{StackError, StackResult};
use crate::naming;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const S3_BUCKET: &str = "S3Bucket";
pub const DYNAMODB_TABLE_NAME: &str = "DynamoDBTableName";
pub const LOG_LEVEL: &str = "LogLevel";

pub const DEFAULT_S3_BUCKET: &str = "audit-413157014023-accounts";
pub const DEFAULT_TABLE_NAME: &str = "rd-sample";
pub const DEFAULT_LOG_LEVEL: &str = "INFO";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterType {
    String,
    Number,
}

/// A named, typed, defaulted input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    pub description: String,
    pub default: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_values: Vec<String>,
}

impl Parameter {
    pub fn string(name: &str, description: &str, default: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type: ParameterType::String,
            description: description.to_string(),
            default: default.to_string(),
            allowed_values: Vec::new(),
        }
    }

    pub fn with_allowed_values(mut self, values: &[&str]) -> Self {
        self.allowed_values = values.iter().map(|v| v.to_string()).collect();
        self
    }

    /// Type and allowed-value checks for a candidate value
    pub fn check(&self, value: &str) -> StackResult<()> {
        let invalid = |reason: String| StackError::InvalidParameterValue {
            name: self.name.clone(),
            value: value.to_string(),
            reason,
        };

        if value.is_empty() {
            return Err(invalid("value must not be empty".to_string()));
        }
        if self.param_type == ParameterType::Number && value.parse::<f64>().is_err() {
            return Err(invalid("expected a number".to_string()));
        }
        if !self.allowed_values.is_empty() && !self.allowed_values.iter().any(|v| v == value) {
            return Err(invalid(format!(
                "allowed values are {}",
                self.allowed_values.join(", ")
            )));
        }
        Ok(())
    }
}

/// The ordered set of parameters a stack declares
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSet {
    parameters: Vec<Parameter>,
}

impl ParameterSet {
    pub fn new(parameters: Vec<Parameter>) -> Self {
        Self { parameters }
    }

    /// The import stack's parameters
    pub fn import_stack() -> Self {
        Self::new(vec![
            Parameter::string(
                S3_BUCKET,
                "S3 Bucket where account-emails.csv is located",
                DEFAULT_S3_BUCKET,
            ),
            Parameter::string(
                DYNAMODB_TABLE_NAME,
                "DynamoDB Table name to import account-emails.csv data",
                DEFAULT_TABLE_NAME,
            ),
            Parameter::string(LOG_LEVEL, "Log level for the importer", DEFAULT_LOG_LEVEL)
                .with_allowed_values(&["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"]),
        ])
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter()
    }

    /// Apply operator overrides on top of the defaults.
    ///
    /// Unknown names are rejected rather than ignored so a typo cannot silently
    /// leave a default in place.
    pub fn resolve(&self, overrides: &BTreeMap<String, String>) -> StackResult<ResolvedParameters> {
        if let Some(unknown) = overrides.keys().find(|k| self.get(k).is_none()) {
            return Err(StackError::UnknownParameter(unknown.clone()));
        }

        let mut values = BTreeMap::new();
        for parameter in &self.parameters {
            let value = overrides
                .get(&parameter.name)
                .cloned()
                .unwrap_or_else(|| parameter.default.clone());
            parameter.check(&value)?;
            values.insert(parameter.name.clone(), value);
        }

        let resolved = ResolvedParameters { values };
        if let Some(bucket) = resolved.get(S3_BUCKET) {
            naming::validate_bucket_name(bucket)?;
        }
        if let Some(table) = resolved.get(DYNAMODB_TABLE_NAME) {
            naming::validate_table_name(table)?;
        }
        Ok(resolved)
    }
}

impl Default for ParameterSet {
    fn default() -> Self {
        Self::import_stack()
    }
}

/// Concrete parameter values for one provisioning attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResolvedParameters {
    values: BTreeMap<String, String>,
}

impl ResolvedParameters {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Value of a parameter the stack is known to declare
    pub fn require(&self, name: &str) -> StackResult<&str> {
        self.get(name)
            .ok_or_else(|| StackError::UnknownParameter(name.to_string()))
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.values
    }
}
