//! # Provisioning Emulator
//!
//! Local implementation of the provisioning backend. Deployed stacks live in a
//! sled database, so plans can be applied, diffed and destroyed without an
//! AWS account.

use anyhow::Result;
use async_trait::async_trait;
use dynimport_core::*;
use std::collections::BTreeSet;

pub mod engine;
pub mod storage;

pub use engine::{Decision, PolicySimulator, SimulationError};
pub use storage::{StackStore, StateExporter};

/// Default per-account IAM role quota
pub const DEFAULT_ROLE_QUOTA: usize = 1000;

/// Provisioning Emulator Backend
pub struct EmulatorBackend {
    store: StackStore,
    role_quota: usize,
}

impl EmulatorBackend {
    /// Create a new emulator backend; state is kept in memory when `state_dir` is `None`
    pub async fn new(state_dir: Option<String>) -> Result<Self> {
        let store = match &state_dir {
            Some(dir) => {
                tokio::fs::create_dir_all(dir).await?;
                tracing::info!(state_dir = %dir, "opened emulator state");
                StackStore::open(dir)?
            }
            None => StackStore::temporary()?,
        };
        Ok(Self {
            store,
            role_quota: DEFAULT_ROLE_QUOTA,
        })
    }

    pub fn with_role_quota(mut self, role_quota: usize) -> Self {
        self.role_quota = role_quota;
        self
    }

    /// Get current state (for debugging/inspection)
    pub fn deployed(&self) -> Result<Vec<DeployedStack>> {
        self.store.all()
    }

    /// Refuse physical names already claimed by another stack, and role counts over quota
    fn check_conflicts(&self, stack: &Stack, claimed: &DeployedStack) -> Result<()> {
        let others: Vec<DeployedStack> = self
            .store
            .all()?
            .into_iter()
            .filter(|d| d.name != stack.name)
            .collect();

        let taken_roles: BTreeSet<&str> = others.iter().flat_map(|d| d.role_names.iter().map(String::as_str)).collect();
        let taken_functions: BTreeSet<&str> =
            others.iter().flat_map(|d| d.function_names.iter().map(String::as_str)).collect();

        if let Some(name) = claimed.role_names.iter().find(|n| taken_roles.contains(n.as_str())) {
            return Err(StackError::conflict(&stack.name, format!("role name '{}' already exists", name)).into());
        }
        if let Some(name) = claimed.function_names.iter().find(|n| taken_functions.contains(n.as_str())) {
            return Err(StackError::conflict(&stack.name, format!("function name '{}' already exists", name)).into());
        }

        let total_roles = taken_roles.len() + claimed.role_names.len();
        if total_roles > self.role_quota {
            return Err(StackError::conflict(
                &stack.name,
                format!("role quota of {} exceeded ({} roles)", self.role_quota, total_roles),
            )
            .into());
        }
        Ok(())
    }
}

/// Physical names the stack would claim; unnamed resources get `{stack}-{logical id}`.
///
/// Derived names obey the same limits as explicit ones.
fn physical_names(stack: &Stack, status: &str) -> Result<DeployedStack> {
    let derive = |explicit: &Option<String>, logical_id: &str| {
        explicit
            .clone()
            .unwrap_or_else(|| format!("{}-{}", stack.name, logical_id))
    };

    let role_names: Vec<String> = stack.roles.iter().map(|r| derive(&r.role_name, &r.logical_id)).collect();
    for name in &role_names {
        naming::validate_role_name(name)?;
    }
    let function_names: Vec<String> = stack
        .functions
        .iter()
        .map(|f| derive(&f.function_name, &f.logical_id))
        .collect();
    for name in &function_names {
        naming::validate_function_name(name)?;
    }

    Ok(DeployedStack {
        name: stack.name.clone(),
        status: status.to_string(),
        template: stack.to_template(),
        role_names,
        function_names,
    })
}

#[async_trait]
impl ProvisioningBackend for EmulatorBackend {
    async fn apply(&mut self, stack: &Stack) -> Result<ApplyOutcome> {
        let existing = self.store.get(&stack.name)?;
        let (outcome, status) = match &existing {
            None => (ApplyOutcome::Created, "CREATE_COMPLETE"),
            Some(_) => (ApplyOutcome::Updated, "UPDATE_COMPLETE"),
        };
        let desired = physical_names(stack, status)?;

        if let Some(current) = &existing {
            if current.template == desired.template {
                tracing::info!(stack = %stack.name, "no changes to apply");
                return Ok(ApplyOutcome::Unchanged);
            }
        }

        self.check_conflicts(stack, &desired)?;
        self.store.put(&desired).await?;
        tracing::info!(stack = %stack.name, outcome = %outcome, "applied stack");
        Ok(outcome)
    }

    async fn diff(&self, stack: &Stack) -> Result<StackDiff> {
        let current = self.store.get(&stack.name)?;
        Ok(diff_templates(current.as_ref().map(|d| &d.template), &stack.to_template()))
    }

    async fn destroy(&mut self, stack_name: &str) -> Result<ApplyOutcome> {
        match self.store.remove(stack_name).await? {
            Some(_) => {
                tracing::info!(stack = stack_name, "destroyed stack");
                Ok(ApplyOutcome::Destroyed)
            }
            None => Ok(ApplyOutcome::NotFound),
        }
    }

    async fn describe(&self, stack_name: &str) -> Result<Option<DeployedStack>> {
        self.store.get(stack_name)
    }

    async fn list_stacks(&self) -> Result<Vec<String>> {
        self.store.names()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(stack_name: &str) -> StackConfig {
        StackConfig {
            stack_name: stack_name.to_string(),
            account_id: Some("413157014023".to_string()),
            region: Some("us-east-1".to_string()),
            ..StackConfig::default()
        }
    }

    fn stack(stack_name: &str) -> Stack {
        assemble(&config(stack_name)).unwrap()
    }

    #[tokio::test]
    async fn test_apply_lifecycle() {
        let mut backend = EmulatorBackend::new(None).await.unwrap();
        let s = stack("DynTestStack");

        assert_eq!(backend.apply(&s).await.unwrap(), ApplyOutcome::Created);
        assert_eq!(backend.apply(&s).await.unwrap(), ApplyOutcome::Unchanged);

        let mut cfg = config("DynTestStack");
        cfg.parameters.insert(DYNAMODB_TABLE_NAME.to_string(), "accounts".to_string());
        let changed = assemble(&cfg).unwrap();
        assert_eq!(backend.apply(&changed).await.unwrap(), ApplyOutcome::Updated);

        let deployed = backend.describe("DynTestStack").await.unwrap().unwrap();
        assert_eq!(deployed.status, "UPDATE_COMPLETE");
        assert_eq!(deployed.role_names, vec!["DynTestStack-DynDbImporterRole".to_string()]);

        assert_eq!(backend.destroy("DynTestStack").await.unwrap(), ApplyOutcome::Destroyed);
        assert_eq!(backend.destroy("DynTestStack").await.unwrap(), ApplyOutcome::NotFound);
        assert!(backend.list_stacks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_diff_against_deployed() {
        let mut backend = EmulatorBackend::new(None).await.unwrap();
        let s = stack("DynTestStack");
        let diff = backend.diff(&s).await.unwrap();
        assert!(diff.changes.iter().all(|c| c.kind == ChangeKind::Added));

        backend.apply(&s).await.unwrap();
        assert!(backend.diff(&s).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_role_name_conflicts() {
        let mut backend = EmulatorBackend::new(None).await.unwrap();
        let mut first = config("First");
        first.role_name = Some("dyndb-importer-role".to_string());
        let mut second = config("Second");
        second.role_name = Some("dyndb-importer-role".to_string());

        backend.apply(&assemble(&first).unwrap()).await.unwrap();
        let err = backend.apply(&assemble(&second).unwrap()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StackError>(),
            Some(StackError::ProvisioningConflict { stack, .. }) if stack == "Second"
        ));
        // the failed apply left nothing behind
        assert_eq!(backend.list_stacks().await.unwrap(), vec!["First".to_string()]);
    }

    #[tokio::test]
    async fn test_role_quota() {
        let mut backend = EmulatorBackend::new(None).await.unwrap().with_role_quota(1);
        backend.apply(&stack("First")).await.unwrap();
        let err = backend.apply(&stack("Second")).await.unwrap_err();
        assert!(err.to_string().contains("role quota"));
    }

    #[tokio::test]
    async fn test_state_persists() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = dir.path().join("state").to_string_lossy().to_string();
        {
            let mut backend = EmulatorBackend::new(Some(state_dir.clone())).await.unwrap();
            backend.apply(&stack("DynTestStack")).await.unwrap();
        }
        let backend = EmulatorBackend::new(Some(state_dir)).await.unwrap();
        assert_eq!(backend.list_stacks().await.unwrap(), vec!["DynTestStack".to_string()]);
    }

    #[tokio::test]
    async fn test_derived_names_respect_limits() {
        let mut backend = EmulatorBackend::new(None).await.unwrap();
        let long_name = format!("Import{}", "x".repeat(54));
        let err = backend.apply(&stack(&long_name)).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StackError>(),
            Some(StackError::InvalidResourceName { kind: "role name", .. })
        ));
        assert!(backend.list_stacks().await.unwrap().is_empty());

        // an explicit name sidesteps the derived one
        let mut cfg = config(&long_name);
        cfg.role_name = Some("dyndb-importer-role".to_string());
        cfg.function_name = Some("dyndb-importer".to_string());
        assert_eq!(backend.apply(&assemble(&cfg).unwrap()).await.unwrap(), ApplyOutcome::Created);
    }
}
