use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use dynimport_aws::AwsBackend;
use dynimport_core::*;
use dynimport_emulator::{Decision, EmulatorBackend, PolicySimulator, StateExporter};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dynimport")]
#[command(about = "Build, audit and provision the DynamoDB CSV import stack")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Stack configuration file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Target account id; overrides the config file
    #[arg(long, global = true)]
    account: Option<String>,

    /// Target region; overrides the config file
    #[arg(long, global = true)]
    region: Option<String>,

    /// Parameter override, e.g. `DynamoDBTableName=accounts` (repeatable)
    #[arg(short = 'p', long = "param", global = true)]
    params: Vec<String>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the provider template
    Synth {
        /// Write the template here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Least-privilege report for every role
    Audit,
    /// Evaluate one request against the importer role
    Simulate {
        /// Action, e.g. "dynamodb:ImportTable"
        #[arg(short, long)]
        action: String,
        /// Resource ARN or "*"
        #[arg(short, long)]
        resource: String,
    },
    /// Create or update the stack
    Apply(BackendArgs),
    /// Show what apply would change
    Diff(BackendArgs),
    /// Delete the stack
    Destroy(BackendArgs),
    /// Show deployed state
    Status(BackendArgs),
}

#[derive(Args, Clone)]
struct BackendArgs {
    #[arg(long, value_enum, default_value_t = BackendKind::Emulator)]
    backend: BackendKind,

    /// Emulator state directory (in-memory when omitted)
    #[arg(long)]
    state_dir: Option<String>,

    /// AWS profile name
    #[arg(long)]
    profile: Option<String>,

    /// Custom endpoint (for testing)
    #[arg(long)]
    endpoint: Option<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum BackendKind {
    Emulator,
    Aws,
}

impl BackendArgs {
    fn to_config(&self, region: Option<String>) -> BackendConfig {
        match self.backend {
            BackendKind::Emulator => BackendConfig::Emulator {
                state_dir: self.state_dir.clone(),
            },
            BackendKind::Aws => BackendConfig::Aws {
                region,
                profile: self.profile.clone(),
                endpoint: self.endpoint.clone(),
            },
        }
    }
}

/// Factory for creating backend instances
struct BackendFactory;

impl BackendFactory {
    async fn create(config: BackendConfig) -> Result<Box<dyn ProvisioningBackend>> {
        match config {
            BackendConfig::Emulator { state_dir } => Ok(Box::new(EmulatorBackend::new(state_dir).await?)),
            BackendConfig::Aws {
                region,
                profile,
                endpoint,
            } => Ok(Box::new(AwsBackend::with_config(region, profile, endpoint).await?)),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("❌ {:#}", e);
        std::process::exit(exit_code(&e));
    }
}

/// 2 for invalid input, 3 for provider conflicts, 1 otherwise
fn exit_code(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<StackError>() {
        Some(StackError::ProvisioningConflict { .. }) => 3,
        Some(_) => 2,
        None => match error.downcast_ref::<ConfigError>() {
            Some(_) => 2,
            None => 1,
        },
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Synth { output } => {
            let stack = assemble(&config)?;
            let body = stack.to_template_string()?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, body)
                        .await
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("📄 Wrote template for {} to {}", stack.name, path.display());
                }
                None => println!("{}", body),
            }
        }

        Commands::Audit => {
            let stack = assemble(&config)?;
            show_audit(&stack.audit()?);
        }

        Commands::Simulate { action, resource } => {
            let stack = assemble(&config)?;
            simulate(&stack, &action, &resource)?;
        }

        Commands::Apply(args) => {
            let stack = assemble(&config)?;
            let mut backend = BackendFactory::create(args.to_config(config.region.clone())).await?;
            println!("🚀 Applying {}", stack.name);
            let outcome = backend.apply(&stack).await?;
            println!("✅ Stack {} {}", stack.name, outcome);
        }

        Commands::Diff(args) => {
            let stack = assemble(&config)?;
            let backend = BackendFactory::create(args.to_config(config.region.clone())).await?;
            let diff = backend.diff(&stack).await?;
            println!("🔍 Changes for {}:", stack.name);
            print!("{}", diff);
        }

        Commands::Destroy(args) => {
            let mut backend = BackendFactory::create(args.to_config(config.region.clone())).await?;
            match backend.destroy(&config.stack_name).await? {
                ApplyOutcome::NotFound => println!("🤷 Stack {} is not deployed", config.stack_name),
                outcome => println!("🗑️  Stack {} {}", config.stack_name, outcome),
            }
        }

        Commands::Status(args) => {
            let is_emulator = args.backend == BackendKind::Emulator;
            let backend = BackendFactory::create(args.to_config(config.region.clone())).await?;
            show_status(&*backend, &config.stack_name, is_emulator).await?;
        }
    }

    Ok(())
}

/// Config file, then `--account`/`--region`, then `--param` overrides in order
fn load_config(cli: &Cli) -> Result<StackConfig> {
    let mut config = match &cli.config {
        Some(path) => StackConfig::from_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => StackConfig::default(),
    };
    if let Some(account) = &cli.account {
        config.account_id = Some(account.clone());
    }
    if let Some(region) = &cli.region {
        config.region = Some(region.clone());
    }
    for param in &cli.params {
        config.apply_overrides(param)?;
    }
    tracing::debug!(stack = %config.stack_name, overrides = config.parameters.len(), "loaded configuration");
    Ok(config)
}

fn show_audit(report: &AuditReport) {
    println!("🔐 Least-privilege audit:");
    for finding in &report.findings {
        let marker = match finding.kind {
            FindingKind::Scoped => "✅",
            FindingKind::DocumentedException => "📝",
            FindingKind::CoarseManagedGrant => "⚠️ ",
            FindingKind::Violation => "❌",
        };
        println!("  {} {}: {}", marker, finding.subject, finding.detail);
    }
    if report.is_clean() {
        println!("🎉 No violations");
    }
}

fn simulate(stack: &Stack, action: &str, resource: &str) -> Result<()> {
    let role = stack
        .role(IMPORTER_ROLE_ID)
        .with_context(|| format!("stack {} has no importer role", stack.name))?;
    let decision = PolicySimulator::new().evaluate(role, action, resource)?;
    match decision {
        Decision::Allowed { source } => println!("🔍 {} on {}: ALLOWED (by {})", action, resource, source),
        Decision::ExplicitDeny { source } => {
            println!("🔍 {} on {}: DENIED (explicitly, by {})", action, resource, source)
        }
        Decision::ImplicitDeny => println!("🔍 {} on {}: DENIED (no statement allows it)", action, resource),
    }
    Ok(())
}

async fn show_status(backend: &dyn ProvisioningBackend, stack_name: &str, is_emulator: bool) -> Result<()> {
    let names = backend.list_stacks().await?;
    println!("📊 Deployed stacks: {}", names.len());

    if is_emulator {
        let mut deployed = Vec::new();
        for name in &names {
            if let Some(stack) = backend.describe(name).await? {
                deployed.push(stack);
            }
        }
        print!("{}", StateExporter::to_summary(&deployed));
        return Ok(());
    }

    match backend.describe(stack_name).await? {
        Some(stack) => {
            println!("📦 {} ({})", stack.name, stack.status);
            for role in &stack.role_names {
                println!("  👤 {}", role);
            }
            for function in &stack.function_names {
                println!("  λ {}", function);
            }
        }
        None => println!("🤷 Stack {} is not deployed", stack_name),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("dynimport").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_overrides_layer_in_order() {
        let cli = parse(&[
            "synth",
            "--account",
            "413157014023",
            "--region",
            "us-east-1",
            "-p",
            "DynamoDBTableName=accounts",
            "--param",
            "DynamoDBTableName=accounts-v2,S3Bucket=imports",
        ]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.account_id.as_deref(), Some("413157014023"));
        assert_eq!(config.parameters["DynamoDBTableName"], "accounts-v2");
        assert_eq!(config.parameters["S3Bucket"], "imports");
    }

    #[test]
    fn test_backend_args() {
        let cli = parse(&["apply", "--backend", "aws", "--profile", "audit", "--region", "eu-west-1"]);
        let Commands::Apply(args) = &cli.command else {
            panic!("expected apply");
        };
        match args.to_config(cli.region.clone()) {
            BackendConfig::Aws { region, profile, .. } => {
                assert_eq!(region.as_deref(), Some("eu-west-1"));
                assert_eq!(profile.as_deref(), Some("audit"));
            }
            other => panic!("unexpected backend {:?}", other),
        }
    }

    #[test]
    fn test_exit_codes() {
        let conflict: anyhow::Error = StackError::conflict("DynTestStack", "role name taken").into();
        assert_eq!(exit_code(&conflict), 3);
        let invalid: anyhow::Error = StackError::UnknownParameter("Bogus".to_string()).into();
        assert_eq!(exit_code(&invalid), 2);
        assert_eq!(exit_code(&anyhow::anyhow!("network down")), 1);
    }

    #[tokio::test]
    async fn test_emulator_round_trip() {
        let cli = parse(&["apply", "--account", "413157014023", "--region", "us-east-1"]);
        let config = load_config(&cli).unwrap();
        let stack = assemble(&config).unwrap();
        let mut backend = BackendFactory::create(BackendConfig::Emulator { state_dir: None })
            .await
            .unwrap();
        assert_eq!(backend.apply(&stack).await.unwrap(), ApplyOutcome::Created);
        assert!(backend.diff(&stack).await.unwrap().is_empty());
    }
}
