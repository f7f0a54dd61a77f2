mod post;

use crate::config::{
    EMBEDDINGS_QUEUE_HARD_CONCURRENCY, FOLLOWS_DEPTH_THRESHOLD, POST_QUEUE_HARD_CONCURRENCY,
    POST_QUEUE_MAX_SIZE, POST_QUEUE_SOFT_CONCURRENCY, REDUCED_MAX_DEPTH,
    REPO_QUEUE_HARD_CONCURRENCY, REPO_QUEUE_MAX_SIZE, REPO_QUEUE_SOFT_CONCURRENCY,
    REPO_QUEUE_SOFT_TIMEOUT, WRITE_POSTS_BATCH_SIZE,
};
use crate::embedder::Embedder;
use crate::error::PinakesError;
use crate::progress::Progress;
use crate::queue::{QueueEvent, TaskError, TaskQueue, TaskQueueOpts};
use crate::rpc::{RpcError, RpcManager};
use crate::store::{PostRow, Store};
use crate::uri::{is_tid, AtUri};
use dashmap::DashSet;
use pinakes_lexicon::app::bsky::embed::record_with_media::MediaUnion;
use pinakes_lexicon::app::bsky::embed::Embeds;
use pinakes_lexicon::app::bsky::feed::{Post, ThreadViewPost};
use pinakes_lexicon::record::{
    KnownRecord, FOLLOW_COLLECTION, LIKE_COLLECTION, POST_COLLECTION,
};
use pinakes_repo::{decode_repo, DecodedRepo};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

const ALT_TEXT_DELIMITER: &str = "\n\n";

/// Why a post is in the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InclusionReason {
    Own,
    LikedBySelf,
    RepostedBy,
    AncestorOf,
    DescendantOf,
    QuotedBy,
    LinkedBy,
    ByFollow,
}

impl InclusionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            InclusionReason::Own => "self",
            InclusionReason::LikedBySelf => "liked_by_self",
            InclusionReason::RepostedBy => "reposted_by",
            InclusionReason::AncestorOf => "ancestor_of",
            InclusionReason::DescendantOf => "descendant_of",
            InclusionReason::QuotedBy => "quoted_by",
            InclusionReason::LinkedBy => "linked_by",
            InclusionReason::ByFollow => "by_follow",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Inclusion {
    pub reason: InclusionReason,
    /// Meaning depends on the reason: the reposter's DID for `reposted_by`,
    /// the source post URI for thread- and quote-derived reasons.
    pub context: Option<String>,
}

/// A record already decoded along the discovery path, attached to the job so
/// processing does not re-fetch it.
#[derive(Debug, Clone)]
pub enum PostSource {
    Record(Post),
    Thread(ThreadViewPost),
}

#[derive(Debug, Clone)]
pub struct PostJob {
    pub uri: String,
    pub inclusion: Inclusion,
    pub record: Option<PostSource>,
    pub depth: usize,
}

#[derive(Debug, Clone)]
pub struct RepoJob {
    pub did: String,
    /// The crawl root gets all four collections; discovered repos only
    /// posts and reposts.
    pub own: bool,
    /// Ignore the stored rev and re-process every record.
    pub force: bool,
}

#[derive(Debug, Clone)]
pub struct BackfillOpts {
    pub max_depth: usize,
    pub embeddings: bool,
    pub appview: String,
}

/// The crawler: three queues expanding outward from one repository, a dedup
/// set over post URIs, and a write buffer feeding the store and the
/// embedding side-channel.
pub struct BackfillEngine {
    pub(crate) store: Store,
    pub(crate) rpc: Arc<RpcManager>,
    pub(crate) embedder: Arc<Embedder>,
    pub(crate) progress: Progress,
    pub(crate) user_did: String,
    pub(crate) appview: String,
    embeddings_enabled: bool,
    max_depth: AtomicUsize,
    default_max_depth: usize,
    pub(crate) seen_posts: DashSet<u32>,
    pending_writes: Mutex<Vec<PostRow>>,
    pub(crate) repo_queue: TaskQueue<RepoJob>,
    pub(crate) post_queue: TaskQueue<PostJob>,
    embeddings_queue: TaskQueue<Vec<PostRow>>,
}

impl BackfillEngine {
    pub fn new(
        store: Store,
        rpc: Arc<RpcManager>,
        embedder: Arc<Embedder>,
        progress: Progress,
        user_did: String,
        opts: BackfillOpts,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<BackfillEngine>| {
            let repo_queue = {
                let weak = weak.clone();
                TaskQueue::new(
                    TaskQueueOpts::hard(REPO_QUEUE_HARD_CONCURRENCY)
                        .soft(REPO_QUEUE_SOFT_CONCURRENCY)
                        .soft_timeout(REPO_QUEUE_SOFT_TIMEOUT)
                        .max_queue_size(REPO_QUEUE_MAX_SIZE),
                    move |job: RepoJob| -> crate::queue::TaskFuture {
                        let engine = weak.upgrade().expect("engine dropped");
                        Box::pin(async move { engine.process_repo(job).await })
                    },
                )
            };
            let post_queue = {
                let weak = weak.clone();
                TaskQueue::new(
                    TaskQueueOpts::hard(POST_QUEUE_HARD_CONCURRENCY)
                        .soft(POST_QUEUE_SOFT_CONCURRENCY)
                        .max_queue_size(POST_QUEUE_MAX_SIZE),
                    move |job: PostJob| -> crate::queue::TaskFuture {
                        let engine = weak.upgrade().expect("engine dropped");
                        Box::pin(async move { engine.process_post(job).await })
                    },
                )
            };
            let embeddings_queue = {
                let weak = weak.clone();
                TaskQueue::new(
                    TaskQueueOpts::hard(EMBEDDINGS_QUEUE_HARD_CONCURRENCY),
                    move |batch: Vec<PostRow>| -> crate::queue::TaskFuture {
                        let engine = weak.upgrade().expect("engine dropped");
                        Box::pin(async move { engine.process_embeddings(batch).await })
                    },
                )
            };

            wire_observer(&repo_queue, &progress, "repos");
            wire_observer(&post_queue, &progress, "posts");
            wire_observer(&embeddings_queue, &progress, "embedding batches");

            Self {
                store,
                rpc,
                embedder,
                progress,
                user_did,
                appview: opts.appview,
                embeddings_enabled: opts.embeddings,
                max_depth: AtomicUsize::new(opts.max_depth),
                default_max_depth: opts.max_depth,
                seen_posts: DashSet::new(),
                pending_writes: Mutex::new(Vec::new()),
                repo_queue,
                post_queue,
                embeddings_queue,
            }
        })
    }

    pub(crate) fn max_depth(&self) -> usize {
        self.max_depth.load(Ordering::Relaxed)
    }

    /// Crawl everything reachable from the configured account.
    pub async fn run(self: &Arc<Self>, force: bool) -> Result<(), PinakesError> {
        match self.rpc.get_profile(&self.appview, &self.user_did).await {
            Ok(profile) => {
                let follows = profile.follows_count.unwrap_or(0);
                if follows > FOLLOWS_DEPTH_THRESHOLD && self.max_depth() == self.default_max_depth
                {
                    tracing::info!(
                        "account follows {follows} repos, reducing depth {} -> {}",
                        self.default_max_depth,
                        REDUCED_MAX_DEPTH
                    );
                    self.max_depth.store(REDUCED_MAX_DEPTH, Ordering::Relaxed);
                }
            }
            Err(err) => {
                tracing::warn!("profile lookup failed for {}: {err}", self.user_did);
            }
        }

        self.repo_queue
            .add(RepoJob {
                did: self.user_did.clone(),
                own: true,
                force,
            })
            .await;
        self.drain().await;
        Ok(())
    }

    /// Crawl outward from one repository fetched over the network.
    pub async fn import_repo(self: &Arc<Self>, did: &str, force: bool) {
        self.repo_queue
            .add(RepoJob {
                did: did.to_string(),
                own: did == self.user_did,
                force,
            })
            .await;
        self.drain().await;
    }

    /// Ingest an already-fetched CAR archive, then crawl outward from it.
    pub async fn import_car(
        self: &Arc<Self>,
        bytes: &[u8],
        did: &str,
        force: bool,
    ) -> Result<(), PinakesError> {
        let decoded = decode_repo(bytes).await?;
        if decoded.did != did {
            return Err(PinakesError::Other(format!(
                "archive belongs to {}, not {did}",
                decoded.did
            )));
        }
        let job = RepoJob {
            did: did.to_string(),
            own: did == self.user_did,
            force,
        };
        self.ingest_repo(&decoded, &job).await;
        self.drain().await;
        Ok(())
    }

    /// Poll all queues to empty. Draining one queue can re-enqueue on
    /// another, so loop until a full pass sees everything idle.
    async fn drain(self: &Arc<Self>) {
        loop {
            self.repo_queue.process_all().await;
            self.post_queue.process_all().await;
            self.embeddings_queue.process_all().await;
            if self.repo_queue.is_idle()
                && self.post_queue.is_idle()
                && self.embeddings_queue.is_idle()
            {
                break;
            }
        }
        self.flush_pending().await;
        self.embeddings_queue.process_all().await;
    }

    pub(crate) async fn process_repo(self: Arc<Self>, job: RepoJob) -> Result<(), TaskError> {
        let car = match self.rpc.get_repo(&job.did).await {
            Ok(bytes) => bytes,
            Err(err) if err.is_not_found() => {
                tracing::info!("skipping repo {}: {err}", job.did);
                return Ok(());
            }
            Err(err) if err.is_cancellation() => {
                return Err(TaskError::Cancelled(err.to_string()))
            }
            Err(err) => {
                return Err(TaskError::Failed(format!(
                    "repo fetch for {} failed: {err}",
                    job.did
                )))
            }
        };

        let decoded = decode_repo(&car).await.map_err(|err| {
            TaskError::Failed(format!("repo decode for {} failed: {err}", job.did))
        })?;

        self.ingest_repo(&decoded, &job).await;
        Ok(())
    }

    pub(crate) async fn ingest_repo(&self, repo: &DecodedRepo, job: &RepoJob) {
        let last_rev = if job.force {
            None
        } else {
            match self.store.get_repo_rev(&job.did) {
                Ok(rev) => rev,
                Err(err) => {
                    tracing::error!("rev lookup failed for {}: {err}", job.did);
                    None
                }
            }
        };

        for entry in repo.entries() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!("skipping record in {}: {err}", job.did);
                    continue;
                }
            };
            if !KnownRecord::is_known_collection(&entry.collection) {
                continue;
            }
            if !job.own
                && (entry.collection == LIKE_COLLECTION || entry.collection == FOLLOW_COLLECTION)
            {
                continue;
            }
            if should_skip_record(&entry.rkey, last_rev.as_deref(), &entry.collection) {
                continue;
            }

            let record = match serde_json::from_value::<KnownRecord>(entry.record.clone()) {
                Ok(record) => record,
                Err(err) => {
                    tracing::warn!(
                        "malformed {} record {} in {}: {err}",
                        entry.collection,
                        entry.rkey,
                        job.did
                    );
                    continue;
                }
            };

            match record {
                KnownRecord::Post(post) => {
                    let uri = AtUri::new(&job.did, POST_COLLECTION, &entry.rkey);
                    let reason = if job.own {
                        InclusionReason::Own
                    } else {
                        InclusionReason::ByFollow
                    };
                    self.post_queue
                        .prepend(PostJob {
                            uri: uri.to_string(),
                            inclusion: Inclusion {
                                reason,
                                context: None,
                            },
                            record: Some(PostSource::Record(post)),
                            depth: 0,
                        })
                        .await;
                }
                KnownRecord::Repost(repost) => {
                    self.post_queue
                        .add(PostJob {
                            uri: repost.subject.uri,
                            inclusion: Inclusion {
                                reason: InclusionReason::RepostedBy,
                                context: Some(job.did.clone()),
                            },
                            record: None,
                            depth: 0,
                        })
                        .await;
                }
                KnownRecord::Like(like) => {
                    self.post_queue
                        .add(PostJob {
                            uri: like.subject.uri,
                            inclusion: Inclusion {
                                reason: InclusionReason::LikedBySelf,
                                context: None,
                            },
                            record: None,
                            depth: 0,
                        })
                        .await;
                }
                KnownRecord::Follow(follow) => {
                    self.repo_queue
                        .add(RepoJob {
                            did: follow.subject,
                            own: false,
                            force: false,
                        })
                        .await;
                }
            }
        }

        if let Err(err) = self.store.set_repo_rev(&job.did, &repo.rev) {
            tracing::error!("failed to persist rev for {}: {err}", job.did);
        }
    }

    async fn process_embeddings(self: Arc<Self>, batch: Vec<PostRow>) -> Result<(), TaskError> {
        let batch = self
            .embedder
            .embed_posts(batch)
            .await
            .map_err(|err| TaskError::Failed(err.to_string()))?;

        // ingest never waits on inference; the rows are upserted a second
        // time with their vectors filled in
        self.store
            .insert_posts(&batch)
            .map_err(|err| TaskError::Failed(err.to_string()))?;
        Ok(())
    }

    pub(crate) async fn buffer_post(&self, row: PostRow) {
        let batch = {
            let mut pending = self.pending_writes.lock().unwrap();
            pending.push(row);
            if pending.len() >= WRITE_POSTS_BATCH_SIZE {
                Some(std::mem::take(&mut *pending))
            } else {
                None
            }
        };
        if let Some(batch) = batch {
            self.flush_batch(batch).await;
        }
    }

    pub(crate) async fn flush_pending(&self) {
        let batch = std::mem::take(&mut *self.pending_writes.lock().unwrap());
        if !batch.is_empty() {
            self.flush_batch(batch).await;
        }
    }

    async fn flush_batch(&self, batch: Vec<PostRow>) {
        if let Err(err) = self.store.insert_posts(&batch) {
            // re-observations of the same posts will retry this batch
            tracing::error!("failed to write {} posts: {err}", batch.len());
        }
        if self.embeddings_enabled {
            self.embeddings_queue.add(batch).await;
        }
    }
}

fn wire_observer<T: Clone + Send + 'static>(
    queue: &TaskQueue<T>,
    progress: &Progress,
    name: &'static str,
) {
    let progress = progress.clone();
    queue.set_observer(move |event| {
        if event == QueueEvent::Completed {
            progress.inc(name);
        }
    });
}

pub(crate) fn rpc_task_error(err: RpcError) -> TaskError {
    if err.is_cancellation() {
        TaskError::Cancelled(err.to_string())
    } else {
        TaskError::Failed(err.to_string())
    }
}

/// Records below the stored rev were seen on a previous crawl. Follows are
/// exempt: the followed account may have new content even when the follow
/// record itself is old.
pub(crate) fn should_skip_record(rkey: &str, last_rev: Option<&str>, collection: &str) -> bool {
    let Some(rev) = last_rev else { return false };
    if !is_tid(rev) {
        return false;
    }
    if collection == FOLLOW_COLLECTION {
        return false;
    }
    rkey < rev
}

/// 32-bit FNV-1a over the URI string; the dedup set stores these, not the
/// URIs themselves.
pub(crate) fn hash32(input: &str) -> u32 {
    let mut hash = 0x811c_9dc5u32;
    for byte in input.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Interpolate `value` on a log-scaled domain against a linear range,
/// clamping outside the domain.
pub(crate) fn log_scale(domain: (f64, f64), range: (f64, f64), value: f64) -> f64 {
    let clamped = value.clamp(domain.0, domain.1);
    let t = (clamped.ln() - domain.0.ln()) / (domain.1.ln() - domain.0.ln());
    range.0 + t * (range.1 - range.0)
}

/// How deep to descend into a thread, scaled down as reply counts grow.
pub(crate) fn thread_descent_levels(reply_count: usize) -> usize {
    log_scale((5.0, 200.0), (20.0, 3.0), reply_count.max(1) as f64).round() as usize
}

pub(crate) fn image_alts(images: &pinakes_lexicon::app::bsky::embed::images::Images) -> Vec<String> {
    images
        .images
        .iter()
        .map(|image| image.alt.clone())
        .filter(|alt| !alt.is_empty())
        .collect()
}

/// Concatenated per-image alt texts, if any.
pub(crate) fn alt_text(record: &Post) -> Option<String> {
    let alts: Vec<String> = match &record.embed {
        Some(Embeds::Images(images)) => image_alts(images),
        Some(Embeds::Video(video)) => video
            .alt
            .iter()
            .filter(|alt| !alt.is_empty())
            .cloned()
            .collect(),
        Some(Embeds::RecordWithMedia(embed)) => match &embed.media {
            MediaUnion::Images(images) => image_alts(images),
            MediaUnion::Video(video) => video
                .alt
                .iter()
                .filter(|alt| !alt.is_empty())
                .cloned()
                .collect(),
            MediaUnion::External(_) => Vec::new(),
        },
        _ => Vec::new(),
    };
    if alts.is_empty() {
        None
    } else {
        Some(alts.join(ALT_TEXT_DELIMITER))
    }
}

pub(crate) fn quoted_uri(record: &Post) -> Option<String> {
    match &record.embed {
        Some(Embeds::Record(embed)) => Some(embed.record.uri.clone()),
        Some(Embeds::RecordWithMedia(embed)) => Some(embed.record.record.uri.clone()),
        _ => None,
    }
}

/// External-link card fields, when the post carries one.
pub(crate) fn embed_card(record: &Post) -> (Option<String>, Option<String>, Option<String>) {
    let external = match &record.embed {
        Some(Embeds::External(embed)) => Some(&embed.external),
        Some(Embeds::RecordWithMedia(embed)) => match &embed.media {
            MediaUnion::External(external) => Some(&external.external),
            _ => None,
        },
        _ => None,
    };
    match external {
        Some(external) => (
            Some(external.title.clone()),
            Some(external.description.clone()),
            Some(external.uri.clone()),
        ),
        None => (None, None, None),
    }
}

/// `https://bsky.app/profile/<actor>/post/<rkey>` links point back into the
/// network; the actor segment may be a DID or a handle.
pub(crate) fn bsky_app_post_link(link: &str) -> Option<(String, String)> {
    let parsed = url::Url::parse(link).ok()?;
    if parsed.host_str() != Some("bsky.app") {
        return None;
    }
    let segments: Vec<&str> = parsed.path_segments()?.filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        ["profile", actor, "post", rkey] => Some((actor.to_string(), rkey.to_string())),
        _ => None,
    }
}

/// Assemble the row to persist. Fails only on an unparseable `createdAt`.
pub(crate) fn build_post_row(
    uri: &AtUri,
    record: &Post,
    inclusion: &Inclusion,
) -> Result<PostRow, PinakesError> {
    let created_at = chrono::DateTime::parse_from_rfc3339(&record.created_at)
        .map_err(|err| {
            PinakesError::MalformedRecord(uri.to_string(), format!("bad createdAt: {err}"))
        })?
        .timestamp_millis();
    let (embed_title, embed_description, embed_url) = embed_card(record);
    Ok(PostRow {
        creator: uri.did.clone(),
        rkey: uri.rkey.clone(),
        created_at,
        text: record.text.clone(),
        embedding: None,
        alt_text: alt_text(record),
        alt_text_embedding: None,
        reply_parent: record.reply.as_ref().map(|reply| reply.parent.uri.clone()),
        reply_root: record.reply.as_ref().map(|reply| reply.root.uri.clone()),
        quoted: quoted_uri(record),
        embed_title,
        embed_description,
        embed_url,
        inclusion_reason: inclusion.reason.as_str().to_string(),
        inclusion_context: inclusion.context.clone(),
    })
}
