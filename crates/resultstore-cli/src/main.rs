use clap::{Parser, Subcommand};
use resultstore_core::config::{self, StoreConfig};
use resultstore_core::dispatch::Dispatcher;
use resultstore_core::errors::StoreError;
use resultstore_core::model::{GroupRef, NewResult, COMMON_OUTCOMES};
use resultstore_core::query::{Page, QueryFilter};
use resultstore_core::service::ResultService;
use resultstore_core::storage::Store;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "resultstore",
    version,
    about = "Store and query CI test results, fanning out notifications"
)]
struct Cli {
    /// Configuration file (database path, notification backends).
    #[arg(long, env = "RESULTSTORE_CONFIG", default_value = "resultstore.yaml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a sample configuration file and initialize the database.
    Init,
    /// Record one test result.
    Submit(SubmitArgs),
    /// Query stored results with filters and cursor paging.
    Query(QueryArgs),
    /// Fetch a single record by its identifier.
    Get(GetArgs),
    /// List known testcases or groups.
    List(ListArgs),
    Version,
}

#[derive(Parser)]
struct SubmitArgs {
    #[arg(long)]
    testcase: String,
    /// Outcome string, e.g. PASSED, FAILED, NEEDS_INSPECTION. Custom values
    /// are accepted as-is.
    #[arg(long)]
    outcome: String,
    #[arg(long)]
    note: Option<String>,
    #[arg(long)]
    ref_url: Option<String>,
    #[arg(long)]
    testcase_ref_url: Option<String>,
    /// Group uuid to attach the result to. Repeatable; unseen uuids create
    /// the group.
    #[arg(long = "group")]
    groups: Vec<String>,
    /// Metadata pair key=value. Repeatable; a repeated key keeps every value.
    #[arg(long = "data")]
    data: Vec<String>,
}

#[derive(Parser)]
struct QueryArgs {
    /// Exact testcase name. Repeatable (values OR together).
    #[arg(long = "testcase")]
    testcases: Vec<String>,
    /// Match testcases whose name starts with this prefix.
    #[arg(long)]
    testcase_prefix: Option<String>,
    /// Outcome filter. Repeatable (values OR together).
    #[arg(long = "outcome")]
    outcomes: Vec<String>,
    /// Group uuid filter. Repeatable.
    #[arg(long = "group")]
    groups: Vec<String>,
    /// Metadata filter key=value. Repeatable; same key ORs, distinct keys AND.
    #[arg(long = "data")]
    data: Vec<String>,
    /// Inclusive lower bound, RFC 3339 (e.g. 2026-08-01T00:00:00Z).
    #[arg(long)]
    since: Option<String>,
    /// Exclusive upper bound, RFC 3339.
    #[arg(long)]
    until: Option<String>,
    #[arg(long, default_value_t = 20)]
    limit: u32,
    /// Resume token from a previous page's next_token.
    #[arg(long)]
    page_token: Option<String>,
    /// Oldest first instead of the default newest first.
    #[arg(long)]
    ascending: bool,
    /// Only the newest result per testcase (ignores paging).
    #[arg(long)]
    latest: bool,
}

#[derive(Parser)]
struct GetArgs {
    #[command(subcommand)]
    what: GetSub,
}

#[derive(Subcommand)]
enum GetSub {
    Result { id: String },
    Testcase { name: String },
    Group { uuid: String },
}

#[derive(Parser)]
struct ListArgs {
    #[command(subcommand)]
    what: ListSub,
}

#[derive(Subcommand)]
enum ListSub {
    Testcases {
        /// Restrict to names starting with this prefix.
        #[arg(long)]
        prefix: Option<String>,
    },
    Groups,
}

mod exit_codes {
    pub const OK: i32 = 0;
    pub const ERROR: i32 = 1;
    pub const CONFIG_ERROR: i32 = 2;
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    init_logging();
    let cli = Cli::parse();
    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            match e.downcast_ref::<StoreError>() {
                Some(StoreError::Configuration(_)) => exit_codes::CONFIG_ERROR,
                _ => exit_codes::ERROR,
            }
        }
    };
    std::process::exit(code);
}

async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Init => cmd_init(&cli.config),
        Command::Submit(args) => cmd_submit(&cli.config, args).await,
        Command::Query(args) => cmd_query(&cli.config, args),
        Command::Get(args) => cmd_get(&cli.config, args),
        Command::List(args) => cmd_list(&cli.config, args),
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_init(config_path: &PathBuf) -> anyhow::Result<i32> {
    if !config_path.exists() {
        if let Some(parent) = config_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        config::write_sample_config(config_path)?;
        eprintln!("created {}", config_path.display());
    } else {
        eprintln!("note: {} already exists", config_path.display());
    }

    let cfg = config::load_config(config_path)?;
    let store = open_store(&cfg)?;
    store.init_schema()?;
    eprintln!("database ready at {}", cfg.database.display());
    Ok(exit_codes::OK)
}

async fn cmd_submit(config_path: &PathBuf, args: SubmitArgs) -> anyhow::Result<i32> {
    let cfg = config::load_config(config_path)?;
    let service = build_service(&cfg)?;

    if !COMMON_OUTCOMES.contains(&args.outcome.as_str()) {
        warn!(
            outcome = %args.outcome,
            common = ?COMMON_OUTCOMES,
            "uncommon outcome, storing verbatim"
        );
    }

    let new = NewResult {
        testcase: args.testcase,
        testcase_ref_url: args.testcase_ref_url,
        outcome: args.outcome,
        note: args.note,
        ref_url: args.ref_url,
        groups: args.groups.iter().map(|u| GroupRef::by_uuid(u)).collect(),
        data: parse_pairs(&args.data)?,
    };

    let record = service.create_result(&new).await?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(exit_codes::OK)
}

fn cmd_query(config_path: &PathBuf, args: QueryArgs) -> anyhow::Result<i32> {
    let cfg = config::load_config(config_path)?;
    let store = open_store(&cfg)?;

    let mut filter = QueryFilter {
        testcases: args.testcases,
        testcase_prefix: args.testcase_prefix,
        outcomes: args.outcomes,
        groups: args.groups,
        since: args.since.as_deref().map(parse_timestamp).transpose()?,
        until: args.until.as_deref().map(parse_timestamp).transpose()?,
        ..QueryFilter::default()
    };
    for (key, value) in parse_pairs(&args.data)? {
        match filter.data.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value),
            None => filter.data.push((key, vec![value])),
        }
    }

    if args.latest {
        let results = store.latest_results(&filter)?;
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(exit_codes::OK);
    }

    let page = Page {
        limit: args.limit,
        token: args.page_token,
        ascending: args.ascending,
    };
    let page = store.query_results(&filter, &page)?;
    println!("{}", serde_json::to_string_pretty(&page)?);
    Ok(exit_codes::OK)
}

fn cmd_get(config_path: &PathBuf, args: GetArgs) -> anyhow::Result<i32> {
    let cfg = config::load_config(config_path)?;
    let store = open_store(&cfg)?;

    let json = match args.what {
        GetSub::Result { id } => serde_json::to_string_pretty(&store.get_result(&id)?)?,
        GetSub::Testcase { name } => serde_json::to_string_pretty(&store.get_testcase(&name)?)?,
        GetSub::Group { uuid } => serde_json::to_string_pretty(&store.get_group(&uuid)?)?,
    };
    println!("{json}");
    Ok(exit_codes::OK)
}

fn cmd_list(config_path: &PathBuf, args: ListArgs) -> anyhow::Result<i32> {
    let cfg = config::load_config(config_path)?;
    let store = open_store(&cfg)?;

    let json = match args.what {
        ListSub::Testcases { prefix } => {
            serde_json::to_string_pretty(&store.list_testcases(prefix.as_deref())?)?
        }
        ListSub::Groups => serde_json::to_string_pretty(&store.list_groups()?)?,
    };
    println!("{json}");
    Ok(exit_codes::OK)
}

fn open_store(cfg: &StoreConfig) -> anyhow::Result<Store> {
    let store = Store::open(&cfg.database)?;
    store.init_schema()?;
    Ok(store)
}

fn build_service(cfg: &StoreConfig) -> anyhow::Result<ResultService> {
    let store = open_store(cfg)?;
    let backends = resultstore_publishers::activate_backends(&cfg.notify)?;
    let dispatcher = Dispatcher::new(backends)
        .with_timeout(Duration::from_secs(cfg.notify.dispatch_timeout_seconds));
    Ok(ResultService::new(store, Arc::new(dispatcher)))
}

fn parse_pairs(raw: &[String]) -> anyhow::Result<Vec<(String, String)>> {
    raw.iter()
        .map(|pair| {
            pair.split_once('=')
                .filter(|(k, _)| !k.is_empty())
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| anyhow::anyhow!("expected key=value, got '{pair}'"))
        })
        .collect()
}

fn parse_timestamp(raw: &str) -> anyhow::Result<i64> {
    let parsed = chrono::DateTime::parse_from_rfc3339(raw)
        .map_err(|e| anyhow::anyhow!("invalid RFC 3339 timestamp '{raw}': {e}"))?;
    Ok(parsed.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_split_on_first_equals() {
        let pairs = parse_pairs(&["arch=x86_64".into(), "item=a=b".into()]).unwrap();
        assert_eq!(pairs[0], ("arch".to_string(), "x86_64".to_string()));
        assert_eq!(pairs[1], ("item".to_string(), "a=b".to_string()));
    }

    #[test]
    fn pairs_without_equals_are_rejected() {
        assert!(parse_pairs(&["archx86_64".into()]).is_err());
        assert!(parse_pairs(&["=value".into()]).is_err());
    }

    #[test]
    fn timestamps_parse_to_utc_millis() {
        let millis = parse_timestamp("1970-01-01T00:00:01Z").unwrap();
        assert_eq!(millis, 1_000);
        assert!(parse_timestamp("yesterday").is_err());
    }
}
