//! # AWS CloudFormation Backend
//!
//! Applies the synthesized template as a CloudFormation stack.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_cloudformation::error::ProvideErrorMetadata;
use aws_sdk_cloudformation::types::{Capability, StackStatus};
use aws_sdk_cloudformation::Client;
use dynimport_core::*;
use serde_json::Value;

const ROLE_TYPE: &str = "AWS::IAM::Role";
const FUNCTION_TYPE: &str = "AWS::Lambda::Function";

/// AWS CloudFormation backend implementation
pub struct AwsBackend {
    client: Client,
    region: String,
}

impl AwsBackend {
    /// Create new AWS backend with default config
    pub async fn new() -> Result<Self> {
        Self::with_config(None, None, None).await
    }

    /// Create AWS backend with custom configuration
    pub async fn with_config(
        region: Option<String>,
        profile: Option<String>,
        endpoint: Option<String>,
    ) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        if let Some(region) = &region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(profile) = profile {
            loader = loader.profile_name(&profile);
        }

        let aws_config = loader.load().await;

        let mut builder = aws_sdk_cloudformation::config::Builder::from(&aws_config);
        // Custom endpoint, e.g. LocalStack
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        let client = Client::from_conf(builder.build());

        let region_name = aws_config
            .region()
            .map(|r| r.as_ref().to_string())
            .unwrap_or_else(|| "us-east-1".to_string());
        tracing::debug!(region = %region_name, "configured CloudFormation client");

        Ok(Self {
            client,
            region: region_name,
        })
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    async fn deployed_template(&self, stack_name: &str) -> Result<Option<Value>> {
        match self.client.get_template().stack_name(stack_name).send().await {
            Ok(output) => {
                let body = output.template_body().unwrap_or("{}");
                let template = serde_json::from_str(body)
                    .with_context(|| format!("stack {} has a non-JSON template", stack_name))?;
                Ok(Some(template))
            }
            Err(e) if e.as_service_error().and_then(|s| s.message()).is_some_and(is_missing_stack) => Ok(None),
            Err(e) => Err(anyhow!("Failed to fetch template for {}: {}", stack_name, e)),
        }
    }

    async fn stack_status(&self, stack_name: &str) -> Result<Option<StackStatus>> {
        match self.client.describe_stacks().stack_name(stack_name).send().await {
            Ok(output) => Ok(output.stacks().first().and_then(|s| s.stack_status()).cloned()),
            Err(e) if e.as_service_error().and_then(|s| s.message()).is_some_and(is_missing_stack) => Ok(None),
            Err(e) => Err(anyhow!("Failed to describe stack {}: {}", stack_name, e)),
        }
    }

    async fn create(&self, stack: &Stack, body: String) -> Result<ApplyOutcome> {
        let result = self
            .client
            .create_stack()
            .stack_name(&stack.name)
            .template_body(body)
            .capabilities(Capability::CapabilityNamedIam)
            .send()
            .await;

        match result {
            Ok(output) => {
                tracing::info!(stack = %stack.name, id = output.stack_id().unwrap_or_default(), "stack creation started");
                Ok(ApplyOutcome::Created)
            }
            Err(e) => {
                if let Some(service) = e.as_service_error() {
                    if service.is_already_exists_exception() || service.is_limit_exceeded_exception() {
                        let reason = service.message().unwrap_or("rejected by CloudFormation");
                        return Err(StackError::conflict(&stack.name, reason).into());
                    }
                }
                Err(anyhow!("Failed to create stack {}: {}", stack.name, e))
            }
        }
    }

    async fn update(&self, stack: &Stack, body: String) -> Result<ApplyOutcome> {
        let result = self
            .client
            .update_stack()
            .stack_name(&stack.name)
            .template_body(body)
            .capabilities(Capability::CapabilityNamedIam)
            .send()
            .await;

        match result {
            Ok(_) => {
                tracing::info!(stack = %stack.name, "stack update started");
                Ok(ApplyOutcome::Updated)
            }
            Err(e) => match e.as_service_error().and_then(|s| s.message()) {
                Some(message) if is_no_updates(message) => Ok(ApplyOutcome::Unchanged),
                Some(message) if message.contains("already exists") => {
                    Err(StackError::conflict(&stack.name, message).into())
                }
                _ => Err(anyhow!("Failed to update stack {}: {}", stack.name, e)),
            },
        }
    }

    async fn physical_names(&self, stack_name: &str) -> Result<(Vec<String>, Vec<String>)> {
        let output = self
            .client
            .describe_stack_resources()
            .stack_name(stack_name)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to list resources of {}: {}", stack_name, e))?;

        let mut roles = Vec::new();
        let mut functions = Vec::new();
        for resource in output.stack_resources() {
            let Some(id) = resource.physical_resource_id() else { continue };
            match resource.resource_type() {
                Some(ROLE_TYPE) => roles.push(id.to_string()),
                Some(FUNCTION_TYPE) => functions.push(id.to_string()),
                _ => {}
            }
        }
        Ok((roles, functions))
    }
}

#[async_trait]
impl ProvisioningBackend for AwsBackend {
    async fn apply(&mut self, stack: &Stack) -> Result<ApplyOutcome> {
        let body = template_body(stack)?;
        match self.stack_status(&stack.name).await? {
            None | Some(StackStatus::DeleteComplete) => self.create(stack, body).await,
            Some(_) => self.update(stack, body).await,
        }
    }

    async fn diff(&self, stack: &Stack) -> Result<StackDiff> {
        let current = self.deployed_template(&stack.name).await?;
        Ok(diff_templates(current.as_ref(), &stack.to_template()))
    }

    async fn destroy(&mut self, stack_name: &str) -> Result<ApplyOutcome> {
        if self.stack_status(stack_name).await?.is_none() {
            return Ok(ApplyOutcome::NotFound);
        }
        self.client
            .delete_stack()
            .stack_name(stack_name)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to delete stack {}: {}", stack_name, e))?;
        tracing::info!(stack = stack_name, "stack deletion started");
        Ok(ApplyOutcome::Destroyed)
    }

    async fn describe(&self, stack_name: &str) -> Result<Option<DeployedStack>> {
        let Some(status) = self.stack_status(stack_name).await? else {
            return Ok(None);
        };
        let template = self.deployed_template(stack_name).await?.unwrap_or(Value::Null);
        let (role_names, function_names) = self.physical_names(stack_name).await?;
        Ok(Some(DeployedStack {
            name: stack_name.to_string(),
            status: status.as_str().to_string(),
            template,
            role_names,
            function_names,
        }))
    }

    async fn list_stacks(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let output = self
                .client
                .list_stacks()
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| anyhow!("Failed to list stacks: {}", e))?;
            for summary in output.stack_summaries() {
                if summary.stack_status() == Some(&StackStatus::DeleteComplete) {
                    continue;
                }
                if let Some(name) = summary.stack_name() {
                    names.push(name.to_string());
                }
            }
            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Template body for CloudFormation; every compute unit needs a pushed image
pub fn template_body(stack: &Stack) -> Result<String> {
    if let Some(function) = stack.functions.iter().find(|f| f.image.image_uri().is_none()) {
        return Err(anyhow!(
            "function {} uses a local image asset; push the image and configure image_uri",
            function.logical_id
        ));
    }
    Ok(stack.to_template_string()?)
}

fn is_no_updates(message: &str) -> bool {
    message.contains("No updates are to be performed")
}

fn is_missing_stack(message: &str) -> bool {
    message.contains("does not exist")
}

// Export the main constructor
pub async fn create_aws_backend(
    region: Option<String>,
    profile: Option<String>,
    endpoint: Option<String>,
) -> Result<AwsBackend> {
    AwsBackend::with_config(region, profile, endpoint).await
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
    fn test_asset_images_rejected() {
        let stack = assemble(&config()).unwrap();
        let err = template_body(&stack).unwrap_err();
        assert!(err.to_string().contains("image_uri"));
    }

    #[test]
    fn test_template_body_with_image() {
        let stack = assemble(&StackConfig {
            image: ArtifactReference::ImageUri(
                "413157014023.dkr.ecr.us-east-1.amazonaws.com/dyndb-importer:latest".to_string(),
            ),
            ..config()
        })
        .unwrap();
        let body = template_body(&stack).unwrap();
        let parsed: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["Resources"][IMPORTER_FUNCTION_ID]["Type"], FUNCTION_TYPE);
    }

    #[test]
    fn test_message_classification() {
        assert!(is_no_updates("No updates are to be performed."));
        assert!(is_missing_stack("Stack with id DynTestStack does not exist"));
        assert!(!is_missing_stack("Rate exceeded"));
    }

    #[tokio::test]
    async fn test_backend_construction_offline() {
        let backend = AwsBackend::with_config(
            Some("eu-west-1".to_string()),
            None,
            Some("http://localhost:4566".to_string()),
        )
        .await
        .unwrap();
        assert_eq!(backend.region(), "eu-west-1");
    }
}
