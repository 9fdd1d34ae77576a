//! Persistent storage for the provisioning emulator

use anyhow::{Context, Result};
use dynimport_core::DeployedStack;
use std::path::Path;

const STACKS_TREE: &str = "stacks";

/// Deployed stacks keyed by stack name, one JSON document each
#[derive(Debug, Clone)]
pub struct StackStore {
    tree: sled::Tree,
    db: sled::Db,
}

impl StackStore {
    /// Open (or create) a store under `dir`
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let db = sled::open(dir).with_context(|| format!("opening emulator state at {}", dir.display()))?;
        Self::from_db(db)
    }

    /// A store that disappears when dropped
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self> {
        let tree = db.open_tree(STACKS_TREE)?;
        Ok(Self { tree, db })
    }

    pub fn get(&self, name: &str) -> Result<Option<DeployedStack>> {
        match self.tree.get(name.as_bytes())? {
            Some(bytes) => {
                let stack = serde_json::from_slice(&bytes)
                    .with_context(|| format!("corrupt state for stack {}", name))?;
                Ok(Some(stack))
            }
            None => Ok(None),
        }
    }

    pub async fn put(&self, stack: &DeployedStack) -> Result<()> {
        let bytes = serde_json::to_vec(stack)?;
        self.tree.insert(stack.name.as_bytes(), bytes)?;
        self.db.flush_async().await?;
        Ok(())
    }

    pub async fn remove(&self, name: &str) -> Result<Option<DeployedStack>> {
        let removed = match self.tree.remove(name.as_bytes())? {
            Some(bytes) => Some(serde_json::from_slice(&bytes)?),
            None => None,
        };
        self.db.flush_async().await?;
        Ok(removed)
    }

    /// Every deployed stack, ordered by name
    pub fn all(&self) -> Result<Vec<DeployedStack>> {
        self.tree
            .iter()
            .values()
            .map(|v| Ok(serde_json::from_slice(&v?)?))
            .collect()
    }

    pub fn names(&self) -> Result<Vec<String>> {
        self.tree
            .iter()
            .keys()
            .map(|k| Ok(String::from_utf8_lossy(&k?).into_owned()))
            .collect()
    }
}

/// Export state to different formats
pub struct StateExporter;

impl StateExporter {
    /// All deployed templates as one JSON object keyed by stack name
    pub fn to_json(stacks: &[DeployedStack]) -> Result<String> {
        let map: serde_json::Map<String, serde_json::Value> = stacks
            .iter()
            .map(|s| (s.name.clone(), s.template.clone()))
            .collect();
        Ok(serde_json::to_string_pretty(&map)?)
    }

    /// Export state as a human-readable summary
    pub fn to_summary(stacks: &[DeployedStack]) -> String {
        let mut summary = String::new();
        summary.push_str("🦀 Provisioning Emulator State Summary\n");
        summary.push_str("=====================================\n\n");

        let roles: usize = stacks.iter().map(|s| s.role_names.len()).sum();
        let functions: usize = stacks.iter().map(|s| s.function_names.len()).sum();
        summary.push_str("📊 **Statistics:**\n");
        summary.push_str(&format!("- Stacks: {}\n", stacks.len()));
        summary.push_str(&format!("- Roles: {}\n", roles));
        summary.push_str(&format!("- Functions: {}\n\n", functions));

        for stack in stacks {
            summary.push_str(&format!("📦 **{}** ({})\n", stack.name, stack.status));
            for role in &stack.role_names {
                summary.push_str(&format!("  👤 {}\n", role));
            }
            for function in &stack.function_names {
                summary.push_str(&format!("  λ {}\n", function));
            }
        }

        summary
    }
}
