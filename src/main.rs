//! CLI entry point: loads a PoC document, validates it, seeds an execution
//! context, and runs it through the [`vpr::orchestrator::Orchestrator`].
//!
//! ## Example
//!
//! ```bash
//! vpr -p ./pocs/idor.yaml -url https://staging.example.test -log-level debug
//! ```

use clap::Parser;
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, Level};
use vpr::context::Context;
use vpr::limits::{self, ExecutionLimits};
use vpr::orchestrator::Orchestrator;
use vpr::protocol::RunReport;
use vpr::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig};
use vpr::{loader, validation};

#[derive(Parser)]
#[command(name = "vpr")]
#[command(about = "Vulnerability Proof-of-Concept Runner", long_about = None)]
struct Cli {
    /// Path to the PoC document (YAML or JSON).
    #[arg(short = 'p', long = "poc")]
    poc: PathBuf,

    /// Overrides `environment.target_host`.
    #[arg(long = "host")]
    host: Option<String>,

    /// Overrides `environment.target_port`.
    #[arg(long = "port")]
    port: Option<u16>,

    /// Overrides `environment.target_url`.
    #[arg(long = "url")]
    url: Option<String>,

    /// Where to write the JSON run report; stdout if omitted.
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Log level: error, warn, info, debug, trace.
    #[arg(long = "log-level", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut telemetry_config = TelemetryConfig::from_env();
    telemetry_config.log_level = cli.log_level.parse().unwrap_or(Level::INFO);
    if let Err(e) = init_telemetry(telemetry_config) {
        eprintln!("warning: failed to initialize telemetry: {e}");
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }

    let exit_code = run(&cli).await;
    shutdown_telemetry();
    exit_code
}

async fn run(cli: &Cli) -> ExitCode {
    let poc = match loader::load_poc_from_file(&cli.poc) {
        Ok(poc) => poc,
        Err(e) => {
            error!(error = %e, "failed to load PoC document");
            return ExitCode::FAILURE;
        }
    };
    info!(poc_id = %poc.metadata.id, title = %poc.metadata.title, "PoC loaded");

    if let Err(errors) = validation::validate_poc(&poc) {
        error!("PoC failed validation with {} error(s):", errors.len());
        for err in &errors {
            error!("  - {err}");
        }
        return ExitCode::FAILURE;
    }

    let limits = ExecutionLimits::from_env();
    let step_count = validation::count_steps(&poc);
    let total_retries = validation::count_total_retries(&poc);
    let limit_result = limits::validate_limits(step_count, total_retries, &limits);
    if !limit_result.passed {
        error!("PoC exceeds execution limits:");
        for violation in &limit_result.violations {
            error!("  - {}", violation.message);
        }
        return ExitCode::FAILURE;
    }

    let mut ctx = Context::new();
    seed_context(&mut ctx, &poc.context);
    apply_cli_overrides(&mut ctx, cli);

    let orchestrator = Orchestrator::new();
    let report = orchestrator.run(&poc, ctx).await;

    print_report(&report, cli.output.as_deref());

    if report.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Populates the variable store from the PoC's declared context section,
/// before any CLI overrides or step execution touches it.
fn seed_context(ctx: &mut Context, decl: &vpr::protocol::ContextDeclaration) {
    for user in &decl.users {
        let mut entry = serde_json::json!({"id": user.id});
        if let Some(credentials) = &user.credentials {
            entry["credentials"] = credentials.clone();
        }
        if let Some(credentials_ref) = &user.credentials_ref {
            entry["credentials_ref"] = Value::String(credentials_ref.clone());
        }
        let _ = ctx.set(&format!("users.{}", user.id), entry);
    }
    for resource in &decl.resources {
        let entry = serde_json::json!({
            "id": resource.id,
            "type": resource.resource_type,
            "identifier": resource.identifier,
        });
        let _ = ctx.set(&format!("resources.{}", resource.id), entry);
    }
    for env in &decl.environment {
        let entry = serde_json::json!({"id": env.id, "value": env.value});
        let _ = ctx.set(&format!("environment.{}", env.id), entry);
    }
    for file in &decl.files {
        let entry = serde_json::json!({"id": file.id, "local_path": file.local_path});
        let _ = ctx.set(&format!("files.{}", file.id), entry);
    }
    for variable in &decl.variables {
        let value = variable.value.clone().unwrap_or(Value::Null);
        let _ = ctx.set_variable(&variable.id, value);
    }
}

fn apply_cli_overrides(ctx: &mut Context, cli: &Cli) {
    if let Some(host) = &cli.host {
        let _ = ctx.set(
            "environment.target_host",
            serde_json::json!({"id": "target_host", "value": host}),
        );
    }
    if let Some(port) = cli.port {
        let _ = ctx.set(
            "environment.target_port",
            serde_json::json!({"id": "target_port", "value": port}),
        );
    }
    if let Some(url) = &cli.url {
        let _ = ctx.set(
            "environment.target_url",
            serde_json::json!({"id": "target_url", "value": url}),
        );
    }
}

fn print_report(report: &RunReport, output: Option<&std::path::Path>) {
    let json = serde_json::to_string_pretty(report).expect("RunReport always serializes");
    match output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, &json) {
                error!(error = %e, path = %path.display(), "failed to write report");
            } else {
                info!(path = %path.display(), "report written");
            }
        }
        None => println!("{json}"),
    }
}
