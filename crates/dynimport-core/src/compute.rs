//! Compute unit descriptor for the import worker

use crate::error::{StackError, StackResult};
use crate::naming;
use crate::role::Role;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;

pub const MEMORY_MB: RangeInclusive<u32> = 128..=10240;
pub const TIMEOUT_SECONDS: RangeInclusive<u32> = 1..=900;

pub const ENV_LOG_LEVEL: &str = "log_level";
pub const ENV_TABLE_NAME: &str = "table_name";
pub const ENV_S3_BUCKET: &str = "s3_bucket";

/// Variables the worker reads at start-up
pub const REQUIRED_ENV: [&str; 3] = [ENV_LOG_LEVEL, ENV_TABLE_NAME, ENV_S3_BUCKET];

/// Where the worker's container image comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactReference {
    /// A pullable image, `registry/repository:tag` or `registry/repository@sha256:<digest>`
    ImageUri(String),
    /// A local directory with a Dockerfile, built by the packaging step
    Asset { directory: String },
}

impl ArtifactReference {
    pub fn validate(&self) -> StackResult<()> {
        let shape = |msg: String| Err(StackError::InvalidResourceShape(msg));
        match self {
            ArtifactReference::ImageUri(uri) => {
                if uri.chars().any(char::is_whitespace) {
                    return shape(format!("image uri '{}' contains whitespace", uri));
                }
                let Some((registry, reference)) = uri.rsplit_once('/') else {
                    return shape(format!("image uri '{}' has no registry", uri));
                };
                if registry.is_empty() {
                    return shape(format!("image uri '{}' has no registry", uri));
                }
                if let Some((repo, digest)) = reference.split_once("@sha256:") {
                    let hex = digest.len() == 64 && digest.bytes().all(|b| b.is_ascii_hexdigit());
                    if repo.is_empty() || !hex {
                        return shape(format!("image uri '{}' has a malformed digest", uri));
                    }
                    return Ok(());
                }
                match reference.split_once(':') {
                    Some((repo, tag)) if !repo.is_empty() && !tag.is_empty() => Ok(()),
                    _ => shape(format!("image uri '{}' needs a tag or digest", uri)),
                }
            }
            ArtifactReference::Asset { directory } => {
                if directory.trim().is_empty() {
                    return shape("image asset directory is empty".to_string());
                }
                Ok(())
            }
        }
    }

    pub fn image_uri(&self) -> Option<&str> {
        match self {
            ArtifactReference::ImageUri(uri) => Some(uri),
            ArtifactReference::Asset { .. } => None,
        }
    }
}

/// The worker's runtime shape and environment contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeUnitDescriptor {
    pub logical_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    pub description: String,
    pub image: ArtifactReference,
    pub env: BTreeMap<String, String>,
    pub memory_mb: u32,
    pub timeout_seconds: u32,
    /// Logical id of the bound role; the stack owns the role itself
    pub role: String,
}

impl ComputeUnitDescriptor {
    pub fn new(
        logical_id: &str,
        image: ArtifactReference,
        env: BTreeMap<String, String>,
        memory_mb: u32,
        timeout_seconds: u32,
        role: &Role,
    ) -> StackResult<Self> {
        image.validate()?;

        if !MEMORY_MB.contains(&memory_mb) {
            return Err(StackError::InvalidResourceShape(format!(
                "memory {} MB is outside {}..={} MB",
                memory_mb,
                MEMORY_MB.start(),
                MEMORY_MB.end()
            )));
        }
        if !TIMEOUT_SECONDS.contains(&timeout_seconds) {
            return Err(StackError::InvalidResourceShape(format!(
                "timeout {} s is outside {}..={} s",
                timeout_seconds,
                TIMEOUT_SECONDS.start(),
                TIMEOUT_SECONDS.end()
            )));
        }
        if let Some(missing) = REQUIRED_ENV.iter().find(|k| !env.contains_key(**k)) {
            return Err(StackError::InvalidResourceShape(format!(
                "environment variable '{}' is required",
                missing
            )));
        }
        if let Some((key, _)) = env.iter().find(|(_, v)| v.is_empty()) {
            return Err(StackError::InvalidResourceShape(format!(
                "environment variable '{}' is empty",
                key
            )));
        }

        Ok(Self {
            logical_id: logical_id.to_string(),
            function_name: None,
            description: String::new(),
            image,
            env,
            memory_mb,
            timeout_seconds,
            role: role.logical_id.clone(),
        })
    }

    pub fn with_name(mut self, function_name: &str) -> StackResult<Self> {
        naming::validate_function_name(function_name)?;
        self.function_name = Some(function_name.to_string());
        Ok(self)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::compose_role;
    use crate::types::{Partition, ServicePrincipal};

    fn role() -> Role {
        compose_role("DynDbImporterRole", ServicePrincipal::lambda(), vec![], vec![], Partition::Aws).unwrap()
    }

    fn env() -> BTreeMap<String, String> {
        [
            (ENV_LOG_LEVEL, "INFO"),
            (ENV_TABLE_NAME, "rd-sample"),
            (ENV_S3_BUCKET, "audit-413157014023-accounts"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn image() -> ArtifactReference {
        ArtifactReference::ImageUri(
            "413157014023.dkr.ecr.us-east-1.amazonaws.com/dyndb-importer:latest".to_string(),
        )
    }

    fn describe(memory_mb: u32, timeout_seconds: u32) -> StackResult<ComputeUnitDescriptor> {
        ComputeUnitDescriptor::new("DynDbImporter", image(), env(), memory_mb, timeout_seconds, &role())
    }

    #[test]
    fn test_memory_boundaries() {
        assert!(describe(128, 300).is_ok());
        assert!(describe(10240, 300).is_ok());
        assert!(matches!(describe(127, 300), Err(StackError::InvalidResourceShape(_))));
        assert!(matches!(describe(10241, 300), Err(StackError::InvalidResourceShape(_))));
    }

    #[test]
    fn test_timeout_boundaries() {
        assert!(describe(512, 900).is_ok());
        assert!(matches!(describe(512, 0), Err(StackError::InvalidResourceShape(_))));
        assert!(matches!(describe(512, 901), Err(StackError::InvalidResourceShape(_))));
    }

    #[test]
    fn test_missing_table_name() {
        let mut env = env();
        env.remove(ENV_TABLE_NAME);
        let err = ComputeUnitDescriptor::new("DynDbImporter", image(), env, 512, 300, &role()).unwrap_err();
        assert_eq!(
            err,
            StackError::InvalidResourceShape("environment variable 'table_name' is required".to_string())
        );
    }

    #[test]
    fn test_bound_to_role() {
        let descriptor = describe(512, 300).unwrap();
        assert_eq!(descriptor.role, "DynDbImporterRole");
    }

    #[test]
    fn test_image_references() {
        let digest = format!("registry.example.com/importer@sha256:{}", "a".repeat(64));
        assert!(ArtifactReference::ImageUri(digest).validate().is_ok());
        assert!(ArtifactReference::ImageUri("importer:latest".to_string()).validate().is_err());
        assert!(ArtifactReference::ImageUri("registry.example.com/importer".to_string())
            .validate()
            .is_err());
        assert!(ArtifactReference::ImageUri("registry.example.com/importer@sha256:abc".to_string())
            .validate()
            .is_err());
        assert!(ArtifactReference::Asset { directory: "src/lambda/dyndb-import-test".to_string() }
            .validate()
            .is_ok());
        assert!(ArtifactReference::Asset { directory: " ".to_string() }.validate().is_err());
    }
}
