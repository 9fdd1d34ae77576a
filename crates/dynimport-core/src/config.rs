//! Stack configuration file

use crate::compute::ArtifactReference;
use crate::error::StackError;
use crate::types::Partition;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_STACK_NAME: &str = "DynTestStack";
pub const DEFAULT_ASSET_DIR: &str = "src/lambda/dyndb-import-test";
pub const DEFAULT_MEMORY_MB: u32 = 512;
pub const DEFAULT_TIMEOUT_SECONDS: u32 = 300;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Stack(#[from] StackError),
}

/// Everything needed to assemble one import stack.
///
/// ```yaml
/// stack_name: DynTestStack
/// account_id: "413157014023"
/// region: us-east-1
/// parameters:
///   DynamoDBTableName: rd-sample
/// image:
///   image_uri: 413157014023.dkr.ecr.us-east-1.amazonaws.com/dyndb-importer:latest
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    pub stack_name: String,
    pub description: String,
    pub account_id: Option<String>,
    pub region: Option<String>,
    pub partition: Partition,
    /// Overrides keyed by parameter name
    pub parameters: BTreeMap<String, String>,
    pub image: ArtifactReference,
    pub memory_mb: u32,
    pub timeout_seconds: u32,
    pub import_logging: bool,
    pub role_name: Option<String>,
    pub function_name: Option<String>,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            stack_name: DEFAULT_STACK_NAME.to_string(),
            description: "One-shot CSV import from S3 into DynamoDB".to_string(),
            account_id: None,
            region: None,
            partition: Partition::Aws,
            parameters: BTreeMap::new(),
            image: ArtifactReference::Asset {
                directory: DEFAULT_ASSET_DIR.to_string(),
            },
            memory_mb: DEFAULT_MEMORY_MB,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            import_logging: false,
            role_name: None,
            function_name: None,
        }
    }
}

impl StackConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(ConfigError::from)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(ConfigError::from)
    }

    /// Merge a `Key=Value[,Key=Value]` override list; later values win.
    pub fn apply_overrides(&mut self, input: &str) -> Result<(), ConfigError> {
        let pairs = dynimport_pattern::parse_overrides(input).map_err(StackError::from)?;
        for (key, value) in pairs {
            self.parameters.insert(key, value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_original_stack() {
        let config = StackConfig::from_yaml("{}").unwrap();
        assert_eq!(config.stack_name, "DynTestStack");
        assert_eq!(config.memory_mb, 512);
        assert_eq!(config.timeout_seconds, 300);
        assert_eq!(config.partition, Partition::Aws);
        assert!(matches!(config.image, ArtifactReference::Asset { .. }));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "stack_name: ImportStack\naccount_id: \"413157014023\"\nregion: us-east-1\n\
             parameters:\n  DynamoDBTableName: accounts\n\
             image:\n  image_uri: registry.example.com/importer:1.2.0\n\
             import_logging: true"
        )
        .unwrap();

        let config = StackConfig::from_file(file.path()).unwrap();
        assert_eq!(config.stack_name, "ImportStack");
        assert_eq!(config.account_id.as_deref(), Some("413157014023"));
        assert_eq!(config.parameters.get("DynamoDBTableName").map(String::as_str), Some("accounts"));
        assert_eq!(config.image.image_uri(), Some("registry.example.com/importer:1.2.0"));
        assert!(config.import_logging);
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = StackConfig::default();
        config.apply_overrides("S3Bucket=imports,DynamoDBTableName=accounts").unwrap();
        config.apply_overrides("DynamoDBTableName=accounts-v2").unwrap();
        assert_eq!(config.parameters.get("S3Bucket").map(String::as_str), Some("imports"));
        assert_eq!(config.parameters.get("DynamoDBTableName").map(String::as_str), Some("accounts-v2"));
        assert!(matches!(
            config.apply_overrides("no-equals-sign"),
            Err(ConfigError::Stack(StackError::Pattern(_)))
        ));
    }

    #[test]
    fn test_yaml_error() {
        assert!(matches!(
            StackConfig::from_yaml("memory_mb: lots"),
            Err(ConfigError::Yaml(_))
        ));
    }
}
