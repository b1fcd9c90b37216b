use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use dualwrite::core::prelude::*;
use dualwrite::{DualWriter, Mode, ModeConfig, ModeStrategy, DEFAULT_RESOURCE};
use dualwrite_persist::SqliteStore;
use dualwrite_predicate::{Predicate, ThresholdFunc};
use metrics::counter;
use serde::Serialize;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "dualwritectl", version, about = "Dual-write migration CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespace (organization) the request is scoped to
    #[arg(long = "ns", global = true, default_value = "default")]
    namespace: String,

    /// Mode config file (YAML or JSON); DUALWRITE_MODE* env vars override it
    #[arg(long = "config", global = true, env = "DUALWRITE_CONFIG")]
    config: Option<PathBuf>,

    /// Resource type, used to pick the configured mode
    #[arg(long = "resource", global = true, default_value = DEFAULT_RESOURCE)]
    resource: String,

    /// Force a migration mode (1-4), ignoring the config
    #[arg(long = "mode", global = true)]
    mode: Option<Mode>,

    /// Legacy store path (default: $DUALWRITE_LEGACY_DB or ~/.dualwrite/legacy.db)
    #[arg(long = "legacy-db", global = true)]
    legacy_db: Option<String>,

    /// Unified store path (default: $DUALWRITE_UNIFIED_DB or ~/.dualwrite/unified.db)
    #[arg(long = "unified-db", global = true)]
    unified_db: Option<String>,

    /// Operations the legacy store serves, e.g. "get,list"; defaults to all
    #[arg(long = "legacy-caps", global = true)]
    legacy_caps: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print which store serves reads and writes in each mode
    Modes,
    /// Evaluate a threshold predicate against values
    Threshold {
        /// gt, lt, within_range or outside_range
        func: String,
        #[arg(required = true, allow_negative_numbers = true)]
        params: Vec<f64>,
        /// Value to test; repeatable
        #[arg(long = "value", required = true, allow_negative_numbers = true)]
        values: Vec<f64>,
    },
    #[command(flatten)]
    Store(StoreCommand),
}

#[derive(Subcommand, Debug)]
enum StoreCommand {
    /// Create an object from a YAML/JSON file
    Create {
        #[arg(long = "file", short = 'f')]
        file: PathBuf,
        #[arg(long = "dry-run", action = ArgAction::SetTrue)]
        dry_run: bool,
    },
    /// Fetch one object
    Get { name: String },
    /// List objects
    Ls {
        /// Label selector, e.g. "team=core,!deprecated"
        #[arg(long = "selector", short = 'l')]
        selector: Option<String>,
        #[arg(long = "limit")]
        limit: Option<usize>,
        /// Continue token from a previous page
        #[arg(long = "continue")]
        continue_token: Option<String>,
    },
    /// Replace an object from a YAML/JSON file
    Update {
        name: String,
        #[arg(long = "file", short = 'f')]
        file: PathBuf,
        /// Create the object if it does not exist
        #[arg(long = "force", action = ArgAction::SetTrue)]
        force: bool,
        #[arg(long = "dry-run", action = ArgAction::SetTrue)]
        dry_run: bool,
    },
    /// Delete one object
    Rm {
        name: String,
        #[arg(long = "dry-run", action = ArgAction::SetTrue)]
        dry_run: bool,
    },
    /// Delete every object matching a selector
    RmAll {
        #[arg(long = "selector", short = 'l')]
        selector: Option<String>,
        #[arg(long = "dry-run", action = ArgAction::SetTrue)]
        dry_run: bool,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Modes => "modes",
            Commands::Threshold { .. } => "threshold",
            Commands::Store(StoreCommand::Create { .. }) => "create",
            Commands::Store(StoreCommand::Get { .. }) => "get",
            Commands::Store(StoreCommand::Ls { .. }) => "ls",
            Commands::Store(StoreCommand::Update { .. }) => "update",
            Commands::Store(StoreCommand::Rm { .. }) => "rm",
            Commands::Store(StoreCommand::RmAll { .. }) => "rm-all",
        }
    }
}

fn init_tracing() {
    let env = std::env::var("DUALWRITE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("DUALWRITE_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid DUALWRITE_METRICS_ADDR; expected host:port");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    counter!("dualwritectl_commands_total", 1u64, "command" => cli.command.name());

    match &cli.command {
        Commands::Modes => print_modes(cli.output),
        Commands::Threshold { func, params, values } => threshold(cli.output, func, params, values),
        Commands::Store(cmd) => {
            let writer = build_writer(&cli)?;
            let token = CancellationToken::new();
            tokio::spawn({
                let token = token.clone();
                async move {
                    if signal::ctrl_c().await.is_ok() {
                        warn!("interrupt received; cancelling request");
                        token.cancel();
                    }
                }
            });
            let ctx = RequestContext::new(cli.namespace.clone()).with_cancellation(token);
            info!(request_id = %ctx.request_id, ns = %ctx.namespace, cmd = cli.command.name(), "request started");
            run(cmd, &writer, &ctx, cli.output).await
        }
    }
}

fn build_writer(cli: &Cli) -> Result<DualWriter> {
    let mut legacy = open_store(cli.legacy_db.as_deref(), "DUALWRITE_LEGACY_DB", "legacy.db")?;
    if let Some(spec) = cli.legacy_caps.as_deref() {
        legacy = legacy.with_capabilities(parse_caps(spec)?);
    }
    let unified = open_store(cli.unified_db.as_deref(), "DUALWRITE_UNIFIED_DB", "unified.db")?;
    let source: Arc<dyn StorageAdapter> = Arc::new(legacy);
    let target: Arc<dyn StorageAdapter> = Arc::new(unified);

    let writer = match cli.mode {
        Some(mode) => DualWriter::new(mode, source, target).with_resource(cli.resource.as_str()),
        None => load_config(cli.config.as_deref())?.writer(&cli.resource, source, target),
    };
    info!(mode = writer.mode().number(), resource = %writer.resource(), "dual writer ready");
    Ok(writer)
}

fn open_store(path: Option<&str>, env_var: &str, file: &str) -> Result<SqliteStore> {
    match path {
        Some(p) => SqliteStore::open(p),
        None => SqliteStore::open_default(env_var, file),
    }
}

fn load_config(path: Option<&Path>) -> Result<ModeConfig> {
    let cfg = match path {
        Some(p) => ModeConfig::load(p)?,
        None => ModeConfig::default(),
    };
    cfg.with_env_overrides().context("applying DUALWRITE_MODE overrides")
}

/// Comma-separated operation names, e.g. `get,list,delete_collection`.
fn parse_caps(spec: &str) -> Result<Capabilities> {
    let mut caps = Capabilities::NONE;
    for raw in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let wanted = raw.to_ascii_lowercase().replace('-', "_");
        let Some(op) = Operation::ALL.into_iter().find(|op| op.as_str() == wanted) else {
            let known: Vec<&str> = Operation::ALL.iter().map(|op| op.as_str()).collect();
            bail!("unknown operation {raw:?}; expected one of {}", known.join(", "));
        };
        caps = caps.with(op);
    }
    Ok(caps)
}

fn read_resource(path: &Path) -> Result<Resource> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parsing resource from {}", path.display()))
}

async fn run(cmd: &StoreCommand, writer: &DualWriter, ctx: &RequestContext, output: Output) -> Result<()> {
    match cmd {
        StoreCommand::Create { file, dry_run } => {
            let obj = read_resource(file)?;
            let opts = CreateOptions { dry_run: *dry_run, ..Default::default() };
            let created = writer.create(ctx, obj, None, &opts).await.context("create failed")?;
            print_object(output, "created", &created)?;
        }
        StoreCommand::Get { name } => {
            let obj = writer.get(ctx, name, &GetOptions::default()).await.with_context(|| format!("get {name}"))?;
            match output {
                Output::Human => println!("{}", serde_yaml::to_string(&obj)?),
                Output::Json => println!("{}", serde_json::to_string_pretty(&obj)?),
            }
        }
        StoreCommand::Ls { selector, limit, continue_token } => {
            let opts = ListOptions { label_selector: selector.clone(), limit: *limit, continue_token: continue_token.clone() };
            let list = writer.list(ctx, &opts).await.context("list failed")?;
            print_list(output, &list)?;
        }
        StoreCommand::Update { name, file, force, dry_run } => {
            let obj = read_resource(file)?;
            let opts = UpdateOptions { dry_run: *dry_run, force_allow_create: *force };
            let out = writer.update(ctx, name, obj, None, &opts).await.with_context(|| format!("update {name}"))?;
            print_object(output, if out.created { "created" } else { "updated" }, &out.object)?;
        }
        StoreCommand::Rm { name, dry_run } => {
            let opts = DeleteOptions { dry_run: *dry_run, ..Default::default() };
            let out = writer.delete(ctx, name, None, &opts).await.with_context(|| format!("delete {name}"))?;
            print_object(output, "deleted", &out.object)?;
        }
        StoreCommand::RmAll { selector, dry_run } => {
            let opts = DeleteOptions { dry_run: *dry_run, ..Default::default() };
            let list_opts = ListOptions { label_selector: selector.clone(), ..Default::default() };
            match writer.delete_collection(ctx, None, &opts, &list_opts).await {
                Ok(deleted) => match output {
                    Output::Human => println!("deleted {} objects", deleted.len()),
                    Output::Json => println!("{}", serde_json::to_string_pretty(&deleted)?),
                },
                Err(e) if e.deleted_before_failure() > 0 => {
                    bail!("deleted {} objects before failing: {}", e.deleted_before_failure(), e)
                }
                Err(e) => return Err(e).context("delete collection failed"),
            }
        }
    }
    Ok(())
}

fn print_object(output: Output, verb: &str, obj: &Resource) -> Result<()> {
    match output {
        Output::Human => {
            let rv = obj.resource_version().unwrap_or("-");
            println!("{verb} {}/{} (rv {rv})", obj.metadata.namespace, obj.name());
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(obj)?),
    }
    Ok(())
}

fn print_list(output: Output, list: &ResourceList) -> Result<()> {
    match output {
        Output::Human => {
            println!("NAMESPACE   NAME                 RV       AGE");
            for item in &list.items {
                let rv = item.resource_version().unwrap_or("-");
                println!("{:<11} {:<20} {:<8} {}", item.metadata.namespace, item.name(), rv, render_age(item.metadata.creation_ts));
            }
            if let Some(token) = &list.continue_token {
                println!("(more: --continue {token})");
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(list)?),
    }
    Ok(())
}

#[derive(Serialize)]
struct ModeRow {
    mode: u8,
    reads: Role,
    writes: Vec<Role>,
}

fn print_modes(output: Output) -> Result<()> {
    let rows: Vec<ModeRow> = Mode::ALL
        .into_iter()
        .map(|m| {
            let s = m.strategy();
            ModeRow { mode: m.number(), reads: s.read_adapter(), writes: s.write_order().to_vec() }
        })
        .collect();
    match output {
        Output::Human => {
            println!("MODE  READS   WRITES");
            for row in &rows {
                let writes: Vec<&str> = row.writes.iter().map(|r| r.as_str()).collect();
                println!("{:<5} {:<7} {}", row.mode, row.reads.as_str(), writes.join(" -> "));
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
    }
    Ok(())
}

fn threshold(output: Output, func: &str, params: &[f64], values: &[f64]) -> Result<()> {
    let func: ThresholdFunc = func.parse()?;
    let predicate = Predicate::new(func, params)?;
    match output {
        Output::Human => {
            for v in values {
                println!("{v}\t{}", if predicate.eval(*v) { 1 } else { 0 });
            }
        }
        Output::Json => {
            let rows: Vec<serde_json::Value> =
                values.iter().map(|v| serde_json::json!({ "value": v, "holds": predicate.eval(*v) })).collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }
    Ok(())
}

fn render_age(creation_ts: i64) -> String {
    if creation_ts <= 0 { return "-".to_string(); }
    let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_secs() as i64;
    let mut secs = (now - creation_ts).max(0) as u64;
    let days = secs / 86_400; secs %= 86_400;
    let hours = secs / 3600; secs %= 3600;
    let mins = secs / 60; secs %= 60;
    if days > 0 { format!("{}d{}h", days, hours) }
    else if hours > 0 { format!("{}h{}m", hours, mins) }
    else if mins > 0 { format!("{}m", mins) }
    else { format!("{}s", secs) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_parse_operation_names() {
        let caps = parse_caps("get, list,delete-collection").unwrap();
        assert!(caps.supports(Operation::Get) && caps.supports(Operation::DeleteCollection));
        assert!(!caps.supports(Operation::Create));
        assert_eq!(parse_caps("").unwrap(), Capabilities::NONE);
        assert!(parse_caps("get,patch").unwrap_err().to_string().contains("\"patch\""));
    }

    #[test]
    fn store_commands_flatten_into_top_level() {
        let cli = Cli::try_parse_from(["dualwritectl", "--mode", "3", "rm-all", "-l", "team=core"]).unwrap();
        assert_eq!(cli.mode, Some(Mode::Three));
        assert!(matches!(cli.command, Commands::Store(StoreCommand::RmAll { selector: Some(ref s), .. }) if s == "team=core"));
        assert!(Cli::try_parse_from(["dualwritectl", "--mode", "5", "modes"]).is_err());
    }

    #[test]
    fn threshold_accepts_negative_params() {
        let cli = Cli::try_parse_from(["dualwritectl", "threshold", "within_range", "-5", "5", "--value", "-1"]).unwrap();
        match cli.command {
            Commands::Threshold { func, params, values } => {
                assert_eq!(func, "within_range");
                assert_eq!(params, vec![-5.0, 5.0]);
                assert_eq!(values, vec![-1.0]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn manifest_file_with_label_map() {
        let path = std::env::temp_dir().join(format!("dualwritectl-manifest-{}.yaml", std::process::id()));
        std::fs::write(&path, "metadata:\n  name: cpu\n  labels:\n    team: core\nspec:\n  title: CPU\n").unwrap();
        let obj = read_resource(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(obj.name(), "cpu");
        assert_eq!(obj.metadata.label("team"), Some("core"));
        assert_eq!(obj.spec["title"], "CPU");
    }

    #[test]
    fn age_rendering() {
        assert_eq!(render_age(0), "-");
        let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_secs() as i64;
        assert_eq!(render_age(now - 2 * 86_400 - 3 * 3600), "2d3h");
    }
}
