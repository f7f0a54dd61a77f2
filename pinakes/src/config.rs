use std::sync::LazyLock;
use std::time::Duration;

/// Database file created in the working directory unless overridden.
pub static DB_PATH: LazyLock<String> =
    LazyLock::new(|| std::env::var("PINAKES_DB").unwrap_or_else(|_| "pinakes.db".to_string()));

pub static DEFAULT_APPVIEW: LazyLock<String> = LazyLock::new(|| {
    std::env::var("PINAKES_APPVIEW").unwrap_or_else(|_| "https://public.api.bsky.app".to_string())
});

pub static PLC_URL: LazyLock<String> = LazyLock::new(|| {
    std::env::var("PINAKES_PLC_URL").unwrap_or_else(|_| "https://plc.directory".to_string())
});

/// Reply noise from the first-party service account is skipped wholesale.
pub const FIRST_PARTY_SERVICE_DID: &str = "did:plc:z72i7hdynmk6r22z27h6tvur";

// Backfill engine
pub const DEFAULT_MAX_DEPTH: usize = 5;
pub const REDUCED_MAX_DEPTH: usize = 2;
/// Accounts following more than this many repos get the reduced depth.
pub const FOLLOWS_DEPTH_THRESHOLD: usize = 250;
pub const WRITE_POSTS_BATCH_SIZE: usize = 20;

// Queue shapes
pub const POST_QUEUE_SOFT_CONCURRENCY: usize = 25;
pub const POST_QUEUE_HARD_CONCURRENCY: usize = 100;
pub const POST_QUEUE_MAX_SIZE: usize = 100_000;
pub const REPO_QUEUE_SOFT_CONCURRENCY: usize = 10;
pub const REPO_QUEUE_HARD_CONCURRENCY: usize = 20;
pub const REPO_QUEUE_SOFT_TIMEOUT: Duration = Duration::from_secs(60);
pub const REPO_QUEUE_MAX_SIZE: usize = 1_000;
pub const EMBEDDINGS_QUEUE_HARD_CONCURRENCY: usize = 1;

// RPC
pub const SERVICE_CONCURRENCY: usize = 10;
pub const SERVICE_INTERVAL: Duration = Duration::from_secs(300);
pub const SERVICE_INTERVAL_CAP: usize = 3_000;
pub const MAX_RETRIES: u32 = 5;
pub const DID_ENDPOINT_CACHE_SIZE: usize = 100_000;

// Per-request timeouts
pub const THREAD_VIEW_TIMEOUT: Duration = Duration::from_secs(10);
pub const RECORD_FETCH_TIMEOUT: Duration = Duration::from_secs(15);
pub const REPO_FETCH_TIMEOUT: Duration = Duration::from_secs(60);
pub const PROFILE_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Thread view request shape; deep enough to cover the widest descent the
/// reply-count scale allows.
pub const THREAD_FETCH_DEPTH: usize = 20;
pub const THREAD_FETCH_PARENT_HEIGHT: usize = 50;

// Embeddings
pub const EMBEDDING_DIM: usize = 384;
/// Rows scanned per batch by the standalone embeddings command.
pub const EMBEDDINGS_SCAN_BATCH: usize = 100;

// Search
pub const DEFAULT_SEARCH_RESULTS: usize = 20;
pub const DEFAULT_VECTOR_THRESHOLD: f64 = 0.5;

/// Keys the config table accepts.
pub const CONFIG_KEYS: &[&str] = &["did", "appview"];
