//! Rego evaluation with `mongodb.query` installed.
//!
//! Loads policies and data, connects to MongoDB, evaluates one query and
//! prints the result document as JSON.

use rego_mongo_bridge::{
    Config, ConnectionManager, Error, EvaluationSignal, PolicyHost, QueryBridge, Result, Telemetry,
};

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Rego with MongoDB queries
#[derive(Parser, Debug)]
#[command(name = "rego-mongo")]
#[command(about = "Evaluate Rego policies that query MongoDB")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Log level or filter directive
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Enable JSON log format
    #[arg(long, env = "JSON_LOGS")]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate a query
    Eval {
        /// Policy (.rego) or data (.json) file; repeatable
        #[arg(short, long = "data", required = true)]
        data: Vec<PathBuf>,

        /// Input document
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Cancel the evaluation after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Rego query, e.g. `data.authz.allow`
        query: String,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(&args.log_level, args.json_logs) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(category = e.category(), error = %e, "rego-mongo failed");
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let config = Config::load(args.config.as_deref())?;
    config.validate()?;

    match args.command {
        Command::Eval {
            data,
            input,
            timeout_ms,
            query,
        } => eval(&config, &data, input.as_deref(), timeout_ms, &query),
    }
}

fn eval(
    config: &Config,
    data: &[PathBuf],
    input: Option<&Path>,
    timeout_ms: Option<u64>,
    query: &str,
) -> Result<()> {
    // Evaluation blocks this thread, so the runtime must not be driven by it.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let connections = Arc::new(ConnectionManager::new());
    runtime.block_on(connections.initialize(&config.store()?))?;

    let telemetry = Arc::new(Telemetry::new());
    let bridge = QueryBridge::new(
        connections,
        runtime.handle().clone(),
        config.query_limits(),
        Arc::clone(&telemetry),
    );

    let mut host = PolicyHost::new(Arc::clone(&telemetry));
    host.register(Arc::new(bridge))?;

    for path in data {
        load_document(&mut host, path)?;
    }
    if let Some(path) = input {
        host.set_input_json(&std::fs::read_to_string(path)?)?;
    }

    let signal = EvaluationSignal::new();
    let watcher = signal.clone();
    runtime.spawn(async move {
        match timeout_ms {
            Some(ms) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => warn!("Interrupted, canceling evaluation"),
                    _ = tokio::time::sleep(Duration::from_millis(ms)) => {
                        warn!(timeout_ms = ms, "Evaluation timed out, canceling")
                    }
                }
            }
            None => {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                warn!("Interrupted, canceling evaluation");
            }
        }
        watcher.cancel();
    });

    let result = host.evaluate(query, &signal)?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    info!(metrics = ?telemetry.metrics(), "Evaluation finished");
    Ok(())
}

fn load_document(host: &mut PolicyHost, path: &Path) -> Result<()> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("rego") => host.add_policy_file(path),
        Some("json") => host.add_data_json(&std::fs::read_to_string(path)?),
        _ => Err(Error::config(format!(
            "{}: expected a .rego policy or a .json data file",
            path.display()
        ))),
    }
}

/// Initialize the logging system. Logs go to stderr so stdout stays JSON.
fn init_logging(level: &str, json_format: bool) -> Result<()> {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    let installed = if json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| Error::internal(format!("Failed to set logging subscriber: {}", e)))
}
