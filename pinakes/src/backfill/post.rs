use super::{
    build_post_row, embed_card, hash32, quoted_uri, rpc_task_error, thread_descent_levels,
    BackfillEngine, Inclusion, InclusionReason, PostJob, PostSource,
};
use crate::config::FIRST_PARTY_SERVICE_DID;
use crate::queue::TaskError;
use crate::uri::AtUri;
use pinakes_lexicon::app::bsky::embed::record::ViewUnion;
use pinakes_lexicon::app::bsky::embed::EmbedViews;
use pinakes_lexicon::app::bsky::feed::{Post, ThreadViewPost, ThreadViewPostEnum};
use pinakes_lexicon::record::POST_COLLECTION;
use std::sync::Arc;

impl BackfillEngine {
    /// Process one discovered post: dedup, materialize the record, persist,
    /// then expand through quotes, links, ancestors and descendants.
    pub(crate) async fn process_post(self: Arc<Self>, job: PostJob) -> Result<(), TaskError> {
        if job.depth > self.max_depth() {
            return Ok(());
        }
        if !self.seen_posts.insert(hash32(&job.uri)) {
            return Ok(());
        }

        let uri = match AtUri::parse(&job.uri) {
            Ok(uri) => uri,
            Err(err) => {
                tracing::warn!("dropping post with invalid uri: {err}");
                return Ok(());
            }
        };
        if uri.did == FIRST_PARTY_SERVICE_DID {
            return Ok(());
        }

        let (record, mut thread): (Post, Option<ThreadViewPost>) = match &job.record {
            Some(PostSource::Record(post)) => (post.clone(), None),
            Some(PostSource::Thread(view)) => match parse_post_record(&view.post.record) {
                Ok(post) => (post, Some(view.clone())),
                Err(err) => {
                    tracing::warn!("malformed record in thread view for {}: {err}", job.uri);
                    return Ok(());
                }
            },
            None => match self.fetch_post(&uri, &job.uri).await? {
                Some(found) => found,
                None => return Ok(()),
            },
        };

        let row = match build_post_row(&uri, &record, &job.inclusion) {
            Ok(row) => row,
            Err(err) => {
                tracing::warn!("{err}");
                return Ok(());
            }
        };
        self.buffer_post(row).await;

        self.expand_quote(&record, thread.as_ref(), &job).await;
        self.expand_post_link(&record, &job).await;

        let is_reply = record.reply.is_some();
        match job.inclusion.reason {
            // the ancestor that queued us already fanned out siblings
            InclusionReason::DescendantOf => return Ok(()),
            // walking up; the root will not be re-queued from here
            InclusionReason::AncestorOf if is_reply => return Ok(()),
            _ => {}
        }

        if is_reply && job.depth + 1 <= self.max_depth() {
            if let Some(reply) = &record.reply {
                self.post_queue
                    .add(PostJob {
                        uri: reply.root.uri.clone(),
                        inclusion: Inclusion {
                            reason: InclusionReason::AncestorOf,
                            context: Some(job.uri.clone()),
                        },
                        record: None,
                        depth: job.depth + 1,
                    })
                    .await;
            }
            return Ok(());
        }

        if thread.is_none() {
            thread = match self.rpc.get_post_thread(&self.appview, &job.uri).await {
                Ok(output) => match output.thread {
                    ThreadViewPostEnum::ThreadViewPost(view) => Some(view),
                    ThreadViewPostEnum::NotFoundPost(_) | ThreadViewPostEnum::BlockedPost(_) => {
                        None
                    }
                },
                Err(err) if err.is_cancellation() => {
                    return Err(TaskError::Cancelled(err.to_string()))
                }
                Err(err) if err.is_not_found() => None,
                Err(err) => {
                    tracing::debug!("thread fetch failed for {}: {err}", job.uri);
                    None
                }
            };
        }

        match thread {
            Some(view) => self.expand_thread(&view, &job).await,
            None => {
                // no thread view available; enqueue the raw ancestor refs
                if let Some(reply) = &record.reply {
                    let mut targets = vec![reply.parent.uri.clone()];
                    if reply.root.uri != reply.parent.uri {
                        targets.push(reply.root.uri.clone());
                    }
                    for target in targets {
                        self.post_queue
                            .add(PostJob {
                                uri: target,
                                inclusion: Inclusion {
                                    reason: InclusionReason::AncestorOf,
                                    context: Some(job.uri.clone()),
                                },
                                record: None,
                                depth: job.depth,
                            })
                            .await;
                    }
                }
            }
        }
        Ok(())
    }

    /// Fetch a post, preferring the thread view for its inlined context.
    /// `Ok(None)` means the post positively does not exist; stay quiet, it
    /// is the steady-state baseline.
    async fn fetch_post(
        &self,
        uri: &AtUri,
        raw_uri: &str,
    ) -> Result<Option<(Post, Option<ThreadViewPost>)>, TaskError> {
        match self.rpc.get_post_thread(&self.appview, raw_uri).await {
            Ok(output) => match output.thread {
                ThreadViewPostEnum::ThreadViewPost(view) => {
                    match parse_post_record(&view.post.record) {
                        Ok(post) => Ok(Some((post, Some(view)))),
                        Err(err) => {
                            tracing::warn!(
                                "malformed record in thread view for {raw_uri}: {err}"
                            );
                            Ok(None)
                        }
                    }
                }
                ThreadViewPostEnum::NotFoundPost(_) | ThreadViewPostEnum::BlockedPost(_) => {
                    Ok(None)
                }
            },
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) if err.is_cancellation() => Err(TaskError::Cancelled(err.to_string())),
            Err(thread_err) => {
                tracing::debug!("thread view failed for {raw_uri}, fetching record: {thread_err}");
                match self.rpc.get_record(&uri.did, &uri.collection, &uri.rkey).await {
                    Ok(record) => match parse_post_record(&record.value) {
                        Ok(post) => Ok(Some((post, None))),
                        Err(err) => {
                            tracing::warn!("malformed record at {raw_uri}: {err}");
                            Ok(None)
                        }
                    },
                    Err(err) if err.is_not_found() => Ok(None),
                    Err(err) => Err(rpc_task_error(err)),
                }
            }
        }
    }

    /// Queue the quoted post. With an inlined view the record rides along
    /// and the job jumps the line; otherwise the fetch happens later.
    async fn expand_quote(&self, record: &Post, thread: Option<&ThreadViewPost>, job: &PostJob) {
        let Some(quoted) = quoted_uri(record) else {
            return;
        };
        let inclusion = Inclusion {
            reason: InclusionReason::QuotedBy,
            context: Some(job.uri.clone()),
        };
        let depth = job.depth + 1;
        match thread.and_then(|view| inlined_quote(view, &quoted)) {
            Some(post) => {
                self.post_queue
                    .prepend(PostJob {
                        uri: quoted,
                        inclusion,
                        record: Some(PostSource::Record(post)),
                        depth,
                    })
                    .await;
            }
            None => {
                self.post_queue
                    .add(PostJob {
                        uri: quoted,
                        inclusion,
                        record: None,
                        depth,
                    })
                    .await;
            }
        }
    }

    /// An external card pointing back at a post on the network is one more
    /// discovery path.
    async fn expand_post_link(&self, record: &Post, job: &PostJob) {
        let (_, _, embed_url) = embed_card(record);
        let Some((actor, rkey)) = embed_url.as_deref().and_then(super::bsky_app_post_link) else {
            return;
        };
        let did = if actor.starts_with("did:") {
            actor
        } else {
            match self.rpc.resolve_handle(&self.appview, &actor).await {
                Ok(did) => did,
                Err(err) => {
                    tracing::debug!("could not resolve linked handle {actor}: {err}");
                    return;
                }
            }
        };
        let uri = AtUri::new(&did, POST_COLLECTION, &rkey);
        self.post_queue
            .add(PostJob {
                uri: uri.to_string(),
                inclusion: Inclusion {
                    reason: InclusionReason::LinkedBy,
                    context: Some(job.uri.clone()),
                },
                record: None,
                depth: job.depth + 1,
            })
            .await;
    }

    /// Walk up the inlined parent chain, then fan out over the replies.
    /// Thread-derived expansion keeps the current depth; only quote and
    /// root-refetch expansion consume budget.
    async fn expand_thread(&self, thread: &ThreadViewPost, job: &PostJob) {
        let depth = job.depth;

        let mut parent = thread.parent.as_deref();
        while let Some(node) = parent {
            match node {
                ThreadViewPostEnum::ThreadViewPost(view) => {
                    let source = ThreadViewPost {
                        post: view.post.clone(),
                        parent: None,
                        replies: view.replies.clone(),
                    };
                    self.post_queue
                        .prepend(PostJob {
                            uri: view.post.uri.clone(),
                            inclusion: Inclusion {
                                reason: InclusionReason::AncestorOf,
                                context: Some(job.uri.clone()),
                            },
                            record: Some(PostSource::Thread(source)),
                            depth,
                        })
                        .await;
                    parent = view.parent.as_deref();
                }
                ThreadViewPostEnum::BlockedPost(blocked) => {
                    // opaque ancestor; it terminates the walk
                    self.post_queue
                        .add(PostJob {
                            uri: blocked.uri.clone(),
                            inclusion: Inclusion {
                                reason: InclusionReason::AncestorOf,
                                context: Some(job.uri.clone()),
                            },
                            record: None,
                            depth,
                        })
                        .await;
                    break;
                }
                ThreadViewPostEnum::NotFoundPost(_) => break,
            }
        }

        let reply_count = thread.post.reply_count.unwrap_or(0);
        let levels = thread_descent_levels(reply_count);
        let mut descendants = Vec::new();
        collect_descendants(thread, &job.uri, depth, levels, &mut descendants);
        for descendant in descendants {
            self.post_queue.prepend(descendant).await;
        }
    }
}

fn parse_post_record(value: &serde_json::Value) -> Result<Post, serde_json::Error> {
    serde_json::from_value::<Post>(value.clone())
}

/// The quoted post's record, when the thread view inlined it.
fn inlined_quote(thread: &ThreadViewPost, quoted: &str) -> Option<Post> {
    let record_view = match thread.post.embed.as_ref()? {
        EmbedViews::RecordView(view) => view,
        EmbedViews::RecordWithMediaView(view) => &view.record,
        _ => return None,
    };
    match &record_view.record {
        ViewUnion::ViewRecord(view) if view.uri == quoted => {
            parse_post_record(&view.value).ok()
        }
        _ => None,
    }
}

/// Depth-first over the inlined reply tree, collecting every node as a
/// descendant of `origin`. `levels_left` bounds the descent.
fn collect_descendants(
    node: &ThreadViewPost,
    origin: &str,
    depth: usize,
    levels_left: usize,
    out: &mut Vec<PostJob>,
) {
    if levels_left == 0 {
        return;
    }
    let Some(replies) = &node.replies else { return };
    for reply in replies {
        if let ThreadViewPostEnum::ThreadViewPost(view) = reply.as_ref() {
            let source = ThreadViewPost {
                post: view.post.clone(),
                parent: None,
                replies: None,
            };
            out.push(PostJob {
                uri: view.post.uri.clone(),
                inclusion: Inclusion {
                    reason: InclusionReason::DescendantOf,
                    context: Some(origin.to_string()),
                },
                record: Some(PostSource::Thread(source)),
                depth,
            });
            collect_descendants(view, origin, depth, levels_left - 1, out);
        }
    }
}
