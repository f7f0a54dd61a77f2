
use crate::config::{DEFAULT_SEARCH_RESULTS, DEFAULT_VECTOR_THRESHOLD, EMBEDDING_DIM};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("embedding length {0} does not match the schema dimension")]
    BadEmbedding(usize),
}

/// One indexed post, keyed by `(creator, rkey)`.
#[derive(Debug, Clone, PartialEq)]
pub struct PostRow {
    pub creator: String,
    pub rkey: String,
    /// Millisecond epoch.
    pub created_at: i64,
    pub text: String,
    pub embedding: Option<Vec<f32>>,
    pub alt_text: Option<String>,
    pub alt_text_embedding: Option<Vec<f32>>,
    pub reply_parent: Option<String>,
    pub reply_root: Option<String>,
    pub quoted: Option<String>,
    pub embed_title: Option<String>,
    pub embed_description: Option<String>,
    pub embed_url: Option<String>,
    pub inclusion_reason: String,
    pub inclusion_context: Option<String>,
}

impl PostRow {
    pub fn uri(&self) -> String {
        format!("at://{}/app.bsky.feed.post/{}", self.creator, self.rkey)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    fn sql(self) -> &'static str {
        match self {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub creators: Vec<String>,
    pub parent_authors: Vec<String>,
    pub root_authors: Vec<String>,
    /// Millisecond epoch, exclusive.
    pub before: Option<i64>,
    /// Millisecond epoch, exclusive.
    pub after: Option<i64>,
    pub order: Option<SortOrder>,
    pub results: Option<usize>,
    pub include_alt_text: bool,
    pub threshold: Option<f64>,
}

const POST_COLUMNS: &str = "creator, rkey, created_at, text, embedding, alt_text, \
     alt_text_embedding, reply_parent, reply_root, quoted, embed_title, embed_description, \
     embed_url, inclusion_reason, inclusion_context";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS post (
    creator TEXT NOT NULL,
    rkey TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    text TEXT NOT NULL DEFAULT '',
    embedding BLOB,
    alt_text TEXT,
    alt_text_embedding BLOB,
    reply_parent TEXT,
    reply_root TEXT,
    quoted TEXT,
    embed_title TEXT,
    embed_description TEXT,
    embed_url TEXT,
    inclusion_reason TEXT NOT NULL,
    inclusion_context TEXT,
    PRIMARY KEY (creator, rkey)
);
CREATE INDEX IF NOT EXISTS post_creator_idx ON post (creator);
CREATE TABLE IF NOT EXISTS repo (
    did TEXT PRIMARY KEY,
    rev TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS config (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

/// A stored non-null vector survives a re-observation that does not carry
/// one; everything else is last-writer-wins.
const UPSERT_POST: &str = "
INSERT INTO post (creator, rkey, created_at, text, embedding, alt_text, alt_text_embedding,
                  reply_parent, reply_root, quoted, embed_title, embed_description, embed_url,
                  inclusion_reason, inclusion_context)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
ON CONFLICT (creator, rkey) DO UPDATE SET
    created_at = excluded.created_at,
    text = excluded.text,
    embedding = coalesce(excluded.embedding, post.embedding),
    alt_text = excluded.alt_text,
    alt_text_embedding = coalesce(excluded.alt_text_embedding, post.alt_text_embedding),
    reply_parent = excluded.reply_parent,
    reply_root = excluded.reply_root,
    quoted = excluded.quoted,
    embed_title = excluded.embed_title,
    embed_description = excluded.embed_description,
    embed_url = excluded.embed_url,
    inclusion_reason = excluded.inclusion_reason,
    inclusion_context = excluded.inclusion_context
";

/// Pack a vector as little-endian f32 bytes.
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn cosine_distance_bytes(a: &[u8], b: &[u8]) -> f64 {
    let a = decode_vector(a);
    let b = decode_vector(b);
    if a.is_empty() || a.len() != b.len() {
        return 1.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "cosine_distance",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let a = ctx
                .get_raw(0)
                .as_blob()
                .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?;
            let b = ctx
                .get_raw(1)
                .as_blob()
                .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?;
            Ok(cosine_distance_bytes(a, b))
        },
    )
}

/// The on-disk index. All state the crawler persists lives behind this
/// handle; callers never see SQL.
#[derive(Clone)]
pub struct Store {
    pool: Pool<SqliteConnectionManager>,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            register_functions(conn)
        });
        let pool = Pool::builder().build(manager)?;
        let store = Self { pool };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Batched idempotent upsert.
    pub fn insert_posts(&self, posts: &[PostRow]) -> Result<usize, StoreError> {
        for post in posts {
            for vector in [&post.embedding, &post.alt_text_embedding]
                .into_iter()
                .flatten()
            {
                if vector.len() != EMBEDDING_DIM {
                    return Err(StoreError::BadEmbedding(vector.len()));
                }
            }
        }

        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(UPSERT_POST)?;
            for post in posts {
                stmt.execute(params![
                    post.creator,
                    post.rkey,
                    post.created_at,
                    post.text,
                    post.embedding.as_deref().map(encode_vector),
                    post.alt_text,
                    post.alt_text_embedding.as_deref().map(encode_vector),
                    post.reply_parent,
                    post.reply_root,
                    post.quoted,
                    post.embed_title,
                    post.embed_description,
                    post.embed_url,
                    post.inclusion_reason,
                    post.inclusion_context,
                ])?;
            }
        }
        tx.commit()?;
        Ok(posts.len())
    }

    pub fn get_post(&self, creator: &str, rkey: &str) -> Result<Option<PostRow>, StoreError> {
        let conn = self.pool.get()?;
        let sql = format!("SELECT {POST_COLUMNS} FROM post WHERE creator = ?1 AND rkey = ?2");
        conn.query_row(&sql, params![creator, rkey], row_to_post)
            .optional()
            .map_err(Into::into)
    }

    /// Page through posts for the standalone embeddings pass. Keyset
    /// pagination on the primary key; `force` includes rows that already
    /// have vectors.
    pub fn posts_for_embedding(
        &self,
        force: bool,
        after: Option<(&str, &str)>,
        limit: usize,
    ) -> Result<Vec<PostRow>, StoreError> {
        let conn = self.pool.get()?;
        let (creator, rkey) = after.unwrap_or(("", ""));
        let sql = format!(
            "SELECT {POST_COLUMNS} FROM post \
             WHERE (?1 OR embedding IS NULL) AND (creator, rkey) > (?2, ?3) \
             ORDER BY creator, rkey LIMIT ?4"
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![force, creator, rkey, limit as i64], row_to_post)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn set_repo_rev(&self, did: &str, rev: &str) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO repo (did, rev) VALUES (?1, ?2)
             ON CONFLICT (did) DO UPDATE SET rev = excluded.rev",
            params![did, rev],
        )?;
        Ok(())
    }

    pub fn get_repo_rev(&self, did: &str) -> Result<Option<String>, StoreError> {
        let conn = self.pool.get()?;
        conn.query_row(
            "SELECT rev FROM repo WHERE did = ?1",
            params![did],
            |row| row.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn get_config(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.pool.get()?;
        conn.query_row(
            "SELECT value FROM config WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn set_config(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO config (key, value) VALUES (?1, ?2)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn delete_config(&self, key: &str) -> Result<bool, StoreError> {
        let conn = self.pool.get()?;
        let changed = conn.execute("DELETE FROM config WHERE key = ?1", params![key])?;
        Ok(changed > 0)
    }

    /// Substring search: scalar filters plus `LIKE %query%` over text (and
    /// alt text when requested). An empty query selects on filters alone.
    pub fn search_posts_text(
        &self,
        query: Option<&str>,
        opts: &SearchOptions,
    ) -> Result<Vec<PostRow>, StoreError> {
        let mut clauses: Vec<String> = Vec::new();
        let mut bound: Vec<Box<dyn ToSql>> = Vec::new();
        build_filters(opts, &mut clauses, &mut bound);

        if let Some(query) = query.filter(|q| !q.is_empty()) {
            let pattern = format!("%{query}%");
            if opts.include_alt_text {
                clauses.push("(text LIKE ? OR alt_text LIKE ?)".into());
                bound.push(Box::new(pattern.clone()));
                bound.push(Box::new(pattern));
            } else {
                clauses.push("text LIKE ?".into());
                bound.push(Box::new(pattern));
            }
        }

        let where_sql = where_clause(&clauses);
        let order = opts.order.unwrap_or(SortOrder::Descending).sql();
        let limit = opts.results.unwrap_or(DEFAULT_SEARCH_RESULTS);
        let sql = format!(
            "SELECT {POST_COLUMNS} FROM post {where_sql} ORDER BY created_at {order} LIMIT {limit}"
        );

        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(bound.iter().map(|p| p.as_ref() as &dyn ToSql)),
            row_to_post,
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Cosine-distance ranking over the same filter set. The best distance is
    /// the text embedding's, or the minimum across text and alt-text when
    /// `include_alt_text` is set and an alt vector exists.
    pub fn search_posts_vector(
        &self,
        query_vec: &[f32],
        opts: &SearchOptions,
    ) -> Result<Vec<(PostRow, f64)>, StoreError> {
        if query_vec.len() != EMBEDDING_DIM {
            return Err(StoreError::BadEmbedding(query_vec.len()));
        }
        let blob = encode_vector(query_vec);

        let mut bound: Vec<Box<dyn ToSql>> = Vec::new();
        let distance_expr = if opts.include_alt_text {
            bound.push(Box::new(blob.clone()));
            bound.push(Box::new(blob.clone()));
            bound.push(Box::new(blob));
            "CASE WHEN alt_text_embedding IS NOT NULL \
             THEN min(cosine_distance(embedding, ?), cosine_distance(alt_text_embedding, ?)) \
             ELSE cosine_distance(embedding, ?) END"
        } else {
            bound.push(Box::new(blob));
            "cosine_distance(embedding, ?)"
        };

        let mut clauses: Vec<String> = vec!["embedding IS NOT NULL".into()];
        build_filters(opts, &mut clauses, &mut bound);
        let where_sql = where_clause(&clauses);

        let order = opts.order.unwrap_or(SortOrder::Ascending).sql();
        let limit = opts.results.unwrap_or(DEFAULT_SEARCH_RESULTS);
        let sql = format!(
            "SELECT * FROM ( \
               SELECT {POST_COLUMNS}, {distance_expr} AS distance FROM post {where_sql} \
             ) WHERE distance <= ? ORDER BY distance {order} LIMIT {limit}"
        );
        bound.push(Box::new(opts.threshold.unwrap_or(DEFAULT_VECTOR_THRESHOLD)));

        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(bound.iter().map(|p| p.as_ref() as &dyn ToSql)),
            |row| {
                let post = row_to_post(row)?;
                let distance: f64 = row.get(15)?;
                Ok((post, distance))
            },
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

fn where_clause(clauses: &[String]) -> String {
    if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    }
}

fn build_filters(opts: &SearchOptions, clauses: &mut Vec<String>, bound: &mut Vec<Box<dyn ToSql>>) {
    if !opts.creators.is_empty() {
        let marks = vec!["?"; opts.creators.len()].join(", ");
        clauses.push(format!("creator IN ({marks})"));
        for creator in &opts.creators {
            bound.push(Box::new(creator.clone()));
        }
    }
    author_filter("reply_parent", &opts.parent_authors, clauses, bound);
    author_filter("reply_root", &opts.root_authors, clauses, bound);
    if let Some(before) = opts.before {
        clauses.push("created_at < ?".into());
        bound.push(Box::new(before));
    }
    if let Some(after) = opts.after {
        clauses.push("created_at > ?".into());
        bound.push(Box::new(after));
    }
}

fn author_filter(
    column: &str,
    authors: &[String],
    clauses: &mut Vec<String>,
    bound: &mut Vec<Box<dyn ToSql>>,
) {
    if authors.is_empty() {
        return;
    }
    let likes = authors
        .iter()
        .map(|_| format!("{column} LIKE ?"))
        .collect::<Vec<_>>()
        .join(" OR ");
    clauses.push(format!("({likes})"));
    for author in authors {
        bound.push(Box::new(format!("at://{author}%")));
    }
}

fn row_to_post(row: &Row<'_>) -> rusqlite::Result<PostRow> {
    Ok(PostRow {
        creator: row.get(0)?,
        rkey: row.get(1)?,
        created_at: row.get(2)?,
        text: row.get(3)?,
        embedding: row
            .get::<_, Option<Vec<u8>>>(4)?
            .map(|bytes| decode_vector(&bytes)),
        alt_text: row.get(5)?,
        alt_text_embedding: row
            .get::<_, Option<Vec<u8>>>(6)?
            .map(|bytes| decode_vector(&bytes)),
        reply_parent: row.get(7)?,
        reply_root: row.get(8)?,
        quoted: row.get(9)?,
        embed_title: row.get(10)?,
        embed_description: row.get(11)?,
        embed_url: row.get(12)?,
        inclusion_reason: row.get(13)?,
        inclusion_context: row.get(14)?,
    })
}
