use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use alkemy_contracts::events::EventWriter;
use alkemy_contracts::receipts::{build_receipt, receipt_path, write_receipt};
use alkemy_contracts::request::{GenerationKind, GenerationRequest};
use alkemy_contracts::result::GenerationResult;
use alkemy_engine::{Clock, GenerationError, ProviderSettings, SystemClock, TaskCoordinator};
use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "alkemy-rs", version, about = "Alkemy generation job runner")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Generate(GenerateArgs),
    Providers(ProvidersArgs),
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    /// image, video, world or speech
    #[arg(long, value_parser = parse_kind)]
    kind: GenerationKind,
    #[arg(long, default_value = "")]
    prompt: String,
    #[arg(long)]
    provider: Option<String>,
    /// KEY=VALUE; values that parse as JSON are passed as JSON.
    #[arg(long = "param", value_parser = parse_param)]
    params: Vec<(String, Value)>,
    /// Seconds between status reads.
    #[arg(long)]
    interval: Option<f64>,
    /// Seconds before the run gives up.
    #[arg(long)]
    max_wait: Option<f64>,
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    quiet: bool,
}

#[derive(Debug, Parser)]
struct ProvidersArgs {
    /// Probe each provider's health endpoint.
    #[arg(long)]
    health: bool,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("alkemy-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => run_generate(args),
        Command::Providers(args) => run_providers(args),
    }
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let request = build_request(&args);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let registry = ProviderSettings::from_env().build_registry(clock.clone());
    let adapter = registry.resolve(&request)?;

    let mut poll = adapter.default_poll_options(&request);
    if let Some(interval) = args.interval {
        poll.interval = seconds(interval, "--interval")?;
    }
    if let Some(max_wait) = args.max_wait {
        poll.max_wait = seconds(max_wait, "--max-wait")?;
    }

    if let Some(out) = &args.out {
        fs::create_dir_all(out)
            .with_context(|| format!("failed to create output dir {}", out.display()))?;
    }
    let events = match (&args.events, &args.out) {
        (Some(path), _) => EventWriter::new(path.clone(), session_id()),
        (None, Some(out)) => EventWriter::new(out.join("events.jsonl"), session_id()),
        (None, None) => EventWriter::disabled(),
    };

    let coordinator = TaskCoordinator::new(clock, events);
    let provider = adapter.name().to_string();
    let handle = coordinator.spawn(request.clone(), adapter, Some(poll));
    let mut last_job_id = None;
    let mut last_elapsed_ms = 0;
    for update in handle.progress().iter() {
        if update.job_id.is_some() {
            last_job_id = update.job_id.clone();
        }
        last_elapsed_ms = update.elapsed_ms;
        if !args.quiet {
            eprintln!(
                "[{provider}] {:<10} {:>3}% {:>6}ms{}",
                update.phase.as_str(),
                update.progress,
                update.elapsed_ms,
                update
                    .message
                    .as_deref()
                    .map(|message| format!("  {message}"))
                    .unwrap_or_default()
            );
        }
    }

    let result = match handle.wait() {
        Ok(result) => result,
        Err(err) => failed_run_result(&err, &provider, last_job_id, last_elapsed_ms),
    };

    if let Some(out) = &args.out {
        let receipt_name = if result.job_id.is_empty() {
            session_id()
        } else {
            result.job_id.clone()
        };
        let path = receipt_path(out, &receipt_name);
        write_receipt(&path, &build_receipt(&request, None, &result))?;
        if !args.quiet {
            eprintln!("receipt: {}", path.display());
        }
    }

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(if result.is_success() { 0 } else { 2 })
}

fn run_providers(args: ProvidersArgs) -> Result<i32> {
    let settings = ProviderSettings::from_env();
    let registry = settings.build_registry(Arc::new(SystemClock::new()));
    let mut providers = Vec::new();
    for adapter in registry.iter() {
        let kinds: Vec<&str> = adapter
            .supported_kinds()
            .iter()
            .map(GenerationKind::as_str)
            .collect();
        let mut entry = json!({
            "name": adapter.name(),
            "kinds": kinds,
        });
        if args.health {
            entry["health"] = json!(adapter.health().label());
        }
        providers.push(entry);
    }
    let missing: Vec<Value> = settings
        .missing()
        .into_iter()
        .map(|(name, env_key)| json!({"name": name, "env": env_key}))
        .collect();
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "registered": providers,
            "not_configured": missing,
        }))?
    );
    Ok(0)
}

/// Stand-in result for a run that ended in `Err`, so the receipt still
/// records where the run got to.
fn failed_run_result(
    err: &GenerationError,
    provider: &str,
    job_id: Option<String>,
    elapsed_ms: u64,
) -> GenerationResult {
    GenerationResult::failed(
        err.kind(),
        err.to_string(),
        elapsed_ms,
        provider,
        job_id.unwrap_or_default(),
    )
}

fn build_request(args: &GenerateArgs) -> GenerationRequest {
    let mut request = GenerationRequest::new(args.kind, args.prompt.clone());
    for (key, value) in &args.params {
        request = request.with_param(key.clone(), value.clone());
    }
    if let Some(provider) = &args.provider {
        request = request.with_provider(provider.clone());
    }
    request
}

fn parse_kind(raw: &str) -> Result<GenerationKind> {
    GenerationKind::parse(raw).ok_or_else(|| {
        let known: Vec<&str> = GenerationKind::ALL.iter().map(|kind| kind.as_str()).collect();
        anyhow!("unknown kind {raw:?}; expected one of {}", known.join(", "))
    })
}

fn parse_param(raw: &str) -> Result<(String, Value)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("expected KEY=VALUE, got {raw:?}");
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("parameter name is empty in {raw:?}");
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn seconds(value: f64, flag: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| anyhow!("{flag} must be a non-negative number of seconds, got {value}"))
}

fn session_id() -> String {
    Uuid::new_v4().to_string()
}
