//! docgate-check
//!
//! Evaluate one request offline against a rule file and a document fixture

use anyhow::{anyhow, Context};
use clap::Parser;
use docgate::{DecisionEngine, EngineConfig, MemoryStore, Operation, Request, Ruleset};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "docgate-check")]
#[command(about = "Evaluate an access request against document rules")]
struct Args {
    /// Rule declarations (.toml or .json)
    #[arg(short = 'r', long)]
    rules: PathBuf,

    /// Document fixture: JSON object of path -> fields
    #[arg(short = 'd', long)]
    documents: PathBuf,

    /// Operation (get, list, create, update, delete)
    #[arg(short = 'o', long)]
    op: String,

    /// Target document path
    #[arg(short = 'p', long)]
    path: String,

    /// Subject of the authenticated principal; omit for an anonymous request
    #[arg(short = 's', long)]
    subject: Option<String>,

    /// Engine configuration (.toml)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,
}

fn load_rules(path: &Path) -> anyhow::Result<Ruleset> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let rules = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Ruleset::from_json(&text)?,
        _ => Ruleset::from_toml(&text)?,
    };
    Ok(rules)
}

fn run(args: Args) -> anyhow::Result<bool> {
    let operation: Operation = args.op.parse().map_err(|e: String| anyhow!(e))?;

    let rules = load_rules(&args.rules)?;
    let fixture = std::fs::read_to_string(&args.documents)
        .with_context(|| format!("reading {}", args.documents.display()))?;
    let store = MemoryStore::from_json(&fixture)?;
    let config = match &args.config {
        Some(path) => EngineConfig::from_toml(
            &std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?,
        )?,
        None => EngineConfig::default(),
    };
    info!(documents = store.len(), "Loaded fixture");

    let engine = DecisionEngine::with_config(Arc::new(rules), Arc::new(store), config);

    let mut request = Request::new(operation, args.path);
    if let Some(subject) = args.subject {
        request = request.with_subject(subject);
    }
    let decision = engine.evaluate(&request);

    let faults: Vec<String> = decision.faults.iter().map(|f| f.to_string()).collect();
    let output = serde_json::json!({
        "allow": decision.allow,
        "operation": request.operation,
        "path": request.path,
        "matched_scope": decision.matched_scope,
        "reason": decision.reason.map(|r| r.to_string()),
        "fetches": decision.fetches,
        "faults": faults,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(decision.allow)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    match run(Args::parse()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(2)
        }
    }
}
