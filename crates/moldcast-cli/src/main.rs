//! moldcast command-line interface.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use moldcast_core::{decode_payload, render, repair, sanitize, to_json_schema, OperationCatalog};
use moldcast_runtime::{builtin_catalog, Engine, Settings};

#[derive(Parser)]
#[command(name = "moldcast")]
#[command(about = "Structured generation that survives truncated and partial model output")]
#[command(version)]
struct Cli {
    /// Raise log verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a named operation and print its result as JSON
    Run {
        /// Operation name, e.g. grade-essay
        operation: String,

        /// Settings file (YAML)
        #[arg(short, long, value_name = "FILE")]
        settings: PathBuf,

        /// Extra operations file (YAML), merged over the built-ins
        #[arg(long, value_name = "FILE")]
        operations: Option<PathBuf>,

        /// Input value as key=value
        #[arg(short, long = "input", value_name = "KEY=VALUE", value_parser = parse_key_val)]
        inputs: Vec<(String, String)>,

        /// Input value read from a file, as key=path
        #[arg(long = "input-file", value_name = "KEY=PATH", value_parser = parse_key_val)]
        input_files: Vec<(String, String)>,

        /// Print only the merged value, without stage reports
        #[arg(long)]
        value_only: bool,
    },

    /// Resolve the configured provider and check that it answers
    Check {
        /// Settings file (YAML)
        #[arg(short, long, value_name = "FILE")]
        settings: PathBuf,
    },

    /// List available operations and their inputs
    List {
        #[arg(long, value_name = "FILE")]
        operations: Option<PathBuf>,
    },

    /// Show the prompt mock (or JSON Schema) for an operation's stages
    Render {
        operation: String,

        /// Only this stage
        #[arg(long)]
        stage: Option<String>,

        /// Emit JSON Schema instead of the prompt mock
        #[arg(long)]
        json_schema: bool,

        #[arg(long, value_name = "FILE")]
        operations: Option<PathBuf>,
    },

    /// Strip fences and prose from model output (file or stdin)
    Sanitize { file: Option<PathBuf> },

    /// Sanitize, repair and parse model output (file or stdin)
    Repair { file: Option<PathBuf> },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    if key.trim().is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.trim().to_string(), value.to_string()))
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn,moldcast_runtime=info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn load_catalog(extra: Option<&Path>) -> Result<OperationCatalog> {
    let mut catalog = builtin_catalog().context("Built-in operations are invalid")?;
    if let Some(path) = extra {
        let custom = OperationCatalog::from_yaml_file(path)
            .with_context(|| format!("Failed to load operations from {}", path.display()))?;
        catalog.extend(custom);
    }
    Ok(catalog)
}

fn read_input(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut text = String::new();
            io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read stdin")?;
            Ok(text)
        }
    }
}

async fn run(
    operation: &str,
    settings: &Path,
    operations: Option<&Path>,
    inputs: Vec<(String, String)>,
    input_files: Vec<(String, String)>,
    value_only: bool,
) -> Result<()> {
    let settings = Settings::from_yaml_file(settings)
        .with_context(|| format!("Failed to load settings from {}", settings.display()))?;

    let mut values: BTreeMap<String, String> = inputs.into_iter().collect();
    for (key, path) in input_files {
        let text = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read input '{}' from {}", key, path))?;
        values.insert(key, text);
    }

    let mut builder = Engine::builder()
        .settings(settings.provider)
        .config(settings.runtime);
    if let Some(path) = operations {
        builder = builder.operations(
            OperationCatalog::from_yaml_file(path)
                .with_context(|| format!("Failed to load operations from {}", path.display()))?,
        );
    }
    let engine = builder.build().context("Failed to build engine")?;

    let result = engine
        .run_operation(operation, &values)
        .await
        .with_context(|| format!("Operation '{}' could not start", operation))?;

    for stage in result.failed_stages() {
        tracing::warn!(
            stage = %stage.stage,
            error = stage.error.as_deref().unwrap_or("unknown"),
            "Stage degraded to its default"
        );
    }

    let output = if value_only {
        serde_json::to_string_pretty(&result.value)?
    } else {
        serde_json::to_string_pretty(&result)?
    };
    println!("{}", output);
    Ok(())
}

async fn check(settings: &Path) -> Result<()> {
    let settings = Settings::from_yaml_file(settings)
        .with_context(|| format!("Failed to load settings from {}", settings.display()))?;
    let engine = Engine::from_settings(settings).context("Failed to build engine")?;

    let (provider, healthy) = engine
        .check_provider()
        .await
        .context("Provider could not be configured")?;
    if !healthy {
        bail!("Provider '{}' did not answer", provider);
    }
    println!("{}: ok", provider);
    Ok(())
}

fn list(operations: Option<&Path>) -> Result<()> {
    let catalog = load_catalog(operations)?;
    for operation in catalog.iter() {
        let inputs: Vec<_> = operation.required_inputs().into_iter().collect();
        let stages: Vec<_> = operation.stages.iter().map(|s| s.name.as_str()).collect();
        println!("{}", operation.name);
        if !operation.description.is_empty() {
            println!("  {}", operation.description);
        }
        println!("  stages: {}", stages.join(", "));
        println!("  inputs: {}", inputs.join(", "));
    }
    Ok(())
}

fn render_operation(
    name: &str,
    stage: Option<&str>,
    json_schema: bool,
    operations: Option<&Path>,
) -> Result<()> {
    let catalog = load_catalog(operations)?;
    let operation = catalog
        .get(name)
        .ok_or_else(|| anyhow!("Unknown operation: {}", name))?;

    let stages: Vec<_> = operation
        .stages
        .iter()
        .filter(|s| stage.map_or(true, |wanted| s.name == wanted))
        .collect();
    if stages.is_empty() {
        bail!("Operation '{}' has no stage named '{}'", name, stage.unwrap_or_default());
    }

    for stage in stages {
        println!("# {}", stage.name);
        if json_schema {
            println!("{}", serde_json::to_string_pretty(&to_json_schema(&stage.schema))?);
        } else {
            println!("{}", render(&stage.schema));
        }
    }
    Ok(())
}

fn repair_payload(file: Option<&Path>) -> Result<()> {
    let text = read_input(file)?;
    match decode_payload(&text) {
        Ok(decoded) => {
            if decoded.repaired {
                tracing::info!("Payload was repaired");
            }
            println!("{}", serde_json::to_string_pretty(&decoded.value)?);
        }
        Err(e) => {
            tracing::warn!(error = %e, "Payload could not be repaired");
            println!("{}", repair(&sanitize(&text)));
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Run {
            operation,
            settings,
            operations,
            inputs,
            input_files,
            value_only,
        } => {
            run(
                &operation,
                &settings,
                operations.as_deref(),
                inputs,
                input_files,
                value_only,
            )
            .await
        }
        Command::Check { settings } => check(&settings).await,
        Command::List { operations } => list(operations.as_deref()),
        Command::Render {
            operation,
            stage,
            json_schema,
            operations,
        } => render_operation(&operation, stage.as_deref(), json_schema, operations.as_deref()),
        Command::Sanitize { file } => {
            println!("{}", sanitize(&read_input(file.as_deref())?));
            Ok(())
        }
        Command::Repair { file } => repair_payload(file.as_deref()),
    }
}
