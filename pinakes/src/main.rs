use clap::{Parser, Subcommand, ValueEnum};
use pinakes::backfill::{BackfillEngine, BackfillOpts};
use pinakes::config::{
    CONFIG_KEYS, DB_PATH, DEFAULT_APPVIEW, DEFAULT_MAX_DEPTH, EMBEDDINGS_SCAN_BATCH, PLC_URL,
};
use pinakes::embedder::Embedder;
use pinakes::error::PinakesError;
use pinakes::progress::{LogWriter, Progress};
use pinakes::rpc::RpcManager;
use pinakes::store::{SearchOptions, SortOrder, Store};
use pinakes::{explain, search};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "pinakes", about = "Personal searchable index of posts you might have seen")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Manage stored configuration (keys: did, appview)
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Crawl the network outward from the configured account
    Backfill {
        /// Expansion depth budget
        #[arg(long)]
        depth: Option<usize>,
        /// Compute embeddings while crawling
        #[arg(long)]
        embeddings: bool,
        #[arg(long, env = "PINAKES_APPVIEW")]
        appview: Option<String>,
    },
    /// Ingest one repository from a CAR file, a DID or a handle
    Import {
        /// File path, DID or handle
        source: String,
        /// Repository owner; required when importing a CAR file
        #[arg(long)]
        did: Option<String>,
        #[arg(long)]
        depth: Option<usize>,
        /// Ignore the stored revision and re-process every record
        #[arg(long)]
        force: bool,
    },
    /// Generate embeddings for posts already in the index
    Embeddings {
        /// Re-embed rows that already have vectors
        #[arg(long)]
        force: bool,
    },
    /// Search the index
    Search {
        query: String,
        /// Rank by vector similarity instead of substring match
        #[arg(long)]
        vector: bool,
        #[arg(long)]
        results: Option<usize>,
        /// Restrict to these authors (DID or handle, repeatable)
        #[arg(long = "creator")]
        creators: Vec<String>,
        /// Restrict to replies to these authors (repeatable)
        #[arg(long = "parent-author")]
        parent_authors: Vec<String>,
        /// Restrict to threads rooted at these authors (repeatable)
        #[arg(long = "root-author")]
        root_authors: Vec<String>,
        /// Only posts created before this time (ISO date or datetime)
        #[arg(long)]
        before: Option<String>,
        /// Only posts created after this time (ISO date or datetime)
        #[arg(long)]
        after: Option<String>,
        #[arg(long)]
        order: Option<OrderArg>,
        /// Maximum cosine distance for vector search
        #[arg(long)]
        threshold: Option<f64>,
        /// Also match against image alt text
        #[arg(long = "include-alt")]
        include_alt: bool,
    },
    /// Show why a post is in the index
    Explain { uri: String },
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    Delete { key: String },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OrderArg {
    Asc,
    Desc,
}

impl From<OrderArg> for SortOrder {
    fn from(order: OrderArg) -> Self {
        match order {
            OrderArg::Asc => SortOrder::Ascending,
            OrderArg::Desc => SortOrder::Descending,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(|| LogWriter)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ERROR: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), PinakesError> {
    let store = Store::open(&*DB_PATH)?;
    match cli.command {
        Command::Config { action } => config_command(&store, action),
        Command::Backfill {
            depth,
            embeddings,
            appview,
        } => backfill_command(store, depth, embeddings, appview).await,
        Command::Import {
            source,
            did,
            depth,
            force,
        } => import_command(store, source, did, depth, force).await,
        Command::Embeddings { force } => embeddings_command(store, force).await,
        Command::Search {
            query,
            vector,
            results,
            creators,
            parent_authors,
            root_authors,
            before,
            after,
            order,
            threshold,
            include_alt,
        } => {
            let opts = SearchOptions {
                creators,
                parent_authors,
                root_authors,
                before: before.as_deref().map(parse_time).transpose()?,
                after: after.as_deref().map(parse_time).transpose()?,
                order: order.map(Into::into),
                results,
                include_alt_text: include_alt,
                threshold,
            };
            search_command(store, query, vector, opts).await
        }
        Command::Explain { uri } => {
            print!("{}", explain::explain(&store, &uri)?);
            Ok(())
        }
    }
}

fn require_key(key: &str) -> Result<(), PinakesError> {
    if CONFIG_KEYS.contains(&key) {
        Ok(())
    } else {
        Err(PinakesError::Config(format!(
            "unknown key `{key}`, expected one of: {}",
            CONFIG_KEYS.join(", ")
        )))
    }
}

fn config_command(store: &Store, action: ConfigAction) -> Result<(), PinakesError> {
    match action {
        ConfigAction::Set { key, value } => {
            require_key(&key)?;
            store.set_config(&key, &value)?;
        }
        ConfigAction::Get { key } => {
            require_key(&key)?;
            match store.get_config(&key)? {
                Some(value) => println!("{value}"),
                None => eprintln!("{key} is not set"),
            }
        }
        ConfigAction::Delete { key } => {
            require_key(&key)?;
            store.delete_config(&key)?;
        }
    }
    Ok(())
}

fn configured_appview(store: &Store, flag: Option<String>) -> Result<String, PinakesError> {
    Ok(flag
        .or(store.get_config("appview")?)
        .unwrap_or_else(|| DEFAULT_APPVIEW.clone()))
}

async fn backfill_command(
    store: Store,
    depth: Option<usize>,
    embeddings: bool,
    appview: Option<String>,
) -> Result<(), PinakesError> {
    let user_did = store.get_config("did")?.ok_or_else(|| {
        PinakesError::Config("no account configured; run `pinakes config set did <did>`".into())
    })?;
    let appview = configured_appview(&store, appview)?;

    let progress = Progress::start();
    let engine = BackfillEngine::new(
        store,
        Arc::new(RpcManager::new(PLC_URL.clone())),
        Arc::new(Embedder::new()),
        progress.clone(),
        user_did,
        BackfillOpts {
            max_depth: depth.unwrap_or(DEFAULT_MAX_DEPTH),
            embeddings,
            appview,
        },
    );

    let started = Instant::now();
    let result = engine.run(false).await;
    progress.finish();
    result?;
    println!("backfill finished in {:.1?}", started.elapsed());
    Ok(())
}

async fn import_command(
    store: Store,
    source: String,
    did: Option<String>,
    depth: Option<usize>,
    force: bool,
) -> Result<(), PinakesError> {
    let appview = configured_appview(&store, None)?;
    let rpc = Arc::new(RpcManager::new(PLC_URL.clone()));
    let started = Instant::now();

    let path = std::path::Path::new(&source);
    let progress = Progress::start();
    let result = if path.exists() {
        let Some(did) = did else {
            progress.finish();
            return Err(PinakesError::Config(
                "importing a CAR file requires --did".into(),
            ));
        };
        let bytes = std::fs::read(path)
            .map_err(|err| PinakesError::Other(format!("could not read {source}: {err}")))?;
        let user_did = store.get_config("did")?.unwrap_or_else(|| did.clone());
        let engine = import_engine(store, rpc, progress.clone(), user_did, depth, appview);
        engine.import_car(&bytes, &did, force).await
    } else {
        let target = if source.starts_with("did:") {
            source.clone()
        } else {
            search::resolve_actor(&rpc, &appview, &source).await?
        };
        let user_did = store.get_config("did")?.unwrap_or_else(|| target.clone());
        let engine = import_engine(store, rpc, progress.clone(), user_did, depth, appview);
        engine.import_repo(&target, force).await;
        Ok(())
    };
    progress.finish();
    result?;
    println!("import finished in {:.1?}", started.elapsed());
    Ok(())
}

fn import_engine(
    store: Store,
    rpc: Arc<RpcManager>,
    progress: Progress,
    user_did: String,
    depth: Option<usize>,
    appview: String,
) -> Arc<BackfillEngine> {
    BackfillEngine::new(
        store,
        rpc,
        Arc::new(Embedder::new()),
        progress,
        user_did,
        BackfillOpts {
            max_depth: depth.unwrap_or(DEFAULT_MAX_DEPTH),
            embeddings: false,
            appview,
        },
    )
}

async fn embeddings_command(store: Store, force: bool) -> Result<(), PinakesError> {
    let embedder = Embedder::new();
    let progress = Progress::start();
    let mut after: Option<(String, String)> = None;
    let mut total = 0usize;

    loop {
        let batch = store.posts_for_embedding(
            force,
            after.as_ref().map(|(creator, rkey)| (creator.as_str(), rkey.as_str())),
            EMBEDDINGS_SCAN_BATCH,
        )?;
        if batch.is_empty() {
            break;
        }
        after = batch
            .last()
            .map(|post| (post.creator.clone(), post.rkey.clone()));

        let batch = embedder.embed_posts(batch).await?;
        store.insert_posts(&batch)?;
        total += batch.len();
        for _ in &batch {
            progress.inc("embeddings");
        }
    }

    progress.finish();
    println!("embedded {total} posts");
    Ok(())
}

async fn search_command(
    store: Store,
    query: String,
    vector: bool,
    opts: SearchOptions,
) -> Result<(), PinakesError> {
    let appview = configured_appview(&store, None)?;
    let rpc = RpcManager::new(PLC_URL.clone());
    let embedder = Embedder::new();

    let hits = search::search_posts(&store, &rpc, &embedder, &appview, &query, vector, opts).await?;
    if hits.is_empty() {
        println!("no results");
        return Ok(());
    }

    for hit in hits {
        let when = chrono::DateTime::from_timestamp_millis(hit.post.created_at)
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "????-??-??".to_string());
        match hit.distance {
            Some(distance) => println!("{when}  {distance:.3}  {}", hit.post.uri()),
            None => println!("{when}  {}", hit.post.uri()),
        }
        let mut text = hit.post.text.replace('\n', " ");
        if text.chars().count() > 120 {
            text = text.chars().take(119).collect::<String>() + "…";
        }
        if !text.is_empty() {
            println!("    {text}");
        }
    }
    Ok(())
}

/// Accept a bare date or a full RFC 3339 timestamp.
fn parse_time(input: &str) -> Result<i64, PinakesError> {
    if let Ok(datetime) = chrono::DateTime::parse_from_rfc3339(input) {
        return Ok(datetime.timestamp_millis());
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        let midnight = date.and_hms_opt(0, 0, 0).expect("valid midnight");
        return Ok(midnight.and_utc().timestamp_millis());
    }
    Err(PinakesError::Config(format!(
        "could not parse time `{input}`; expected YYYY-MM-DD or an RFC 3339 timestamp"
    )))
}
