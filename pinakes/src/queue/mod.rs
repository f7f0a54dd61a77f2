mod tests;

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;

pub const DEFAULT_SOFT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum TaskError {
    /// Transport-level cancellation (timeouts and the like). The queue
    /// re-appends the task's arguments instead of surfacing the error.
    #[error("task cancelled: {0}")]
    Cancelled(String),
    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEvent {
    Queued,
    Completed,
    Errored,
    Drained,
}

pub type TaskFuture = Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send>>;
type Handler<T> = Arc<dyn Fn(T) -> TaskFuture + Send + Sync>;
type Observer = Arc<dyn Fn(QueueEvent) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct TaskQueueOpts {
    /// Strict cap on concurrently running tasks.
    pub hard_concurrency: usize,
    /// Admission-control cap: tasks running longer than `soft_timeout` stop
    /// counting against it, letting faster tasks drain past the stragglers.
    pub soft_concurrency: Option<usize>,
    /// Producers suspend in `add`/`prepend` while the waiting set is at this
    /// size.
    pub max_queue_size: Option<usize>,
    pub soft_timeout: Duration,
}

impl TaskQueueOpts {
    pub fn hard(hard_concurrency: usize) -> Self {
        Self {
            hard_concurrency,
            soft_concurrency: None,
            max_queue_size: None,
            soft_timeout: DEFAULT_SOFT_TIMEOUT,
        }
    }

    pub fn soft(mut self, soft_concurrency: usize) -> Self {
        self.soft_concurrency = Some(soft_concurrency);
        self
    }

    pub fn max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = Some(size);
        self
    }

    pub fn soft_timeout(mut self, timeout: Duration) -> Self {
        self.soft_timeout = timeout;
        self
    }
}

/// A queue of task *arguments*, not task handles: memory scales with the
/// waiting set, and the handler is invoked as capacity frees up. FIFO except
/// for `prepend`, which jumps the line.
pub struct TaskQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for TaskQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<T> {
    opts: TaskQueueOpts,
    handler: Handler<T>,
    state: Mutex<State<T>>,
    /// Signalled whenever queue space may have opened up.
    space: Notify,
    /// Signalled when both the waiting set and the running set are empty.
    drained: Notify,
    observer: Mutex<Option<Observer>>,
}

struct State<T> {
    waiting: VecDeque<T>,
    running: usize,
    active: usize,
}

impl<T: Clone + Send + 'static> TaskQueue<T> {
    pub fn new<F>(opts: TaskQueueOpts, handler: F) -> Self
    where
        F: Fn(T) -> TaskFuture + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                opts,
                handler: Arc::new(handler),
                state: Mutex::new(State {
                    waiting: VecDeque::new(),
                    running: 0,
                    active: 0,
                }),
                space: Notify::new(),
                drained: Notify::new(),
                observer: Mutex::new(None),
            }),
        }
    }

    pub fn set_observer<F>(&self, observer: F)
    where
        F: Fn(QueueEvent) + Send + Sync + 'static,
    {
        *self.inner.observer.lock().unwrap() = Some(Arc::new(observer));
    }

    /// Append to the tail. Suspends while the waiting set is full.
    pub async fn add(&self, args: T) {
        self.push(args, false).await;
    }

    /// Insert at the head, breaking FIFO order. Used for arguments that
    /// already carry a decoded record, so the record is consumed before
    /// evicting newer additions.
    pub async fn prepend(&self, args: T) {
        self.push(args, true).await;
    }

    async fn push(&self, args: T, front: bool) {
        let mut args = Some(args);
        loop {
            let mut space = std::pin::pin!(self.inner.space.notified());
            space.as_mut().enable();
            {
                let mut state = self.inner.state.lock().unwrap();
                let has_space = self
                    .inner
                    .opts
                    .max_queue_size
                    .map_or(true, |cap| state.waiting.len() < cap);
                if has_space {
                    let args = args.take().unwrap();
                    if front {
                        state.waiting.push_front(args);
                    } else {
                        state.waiting.push_back(args);
                    }
                    break;
                }
            }
            space.await;
        }
        self.inner.emit(QueueEvent::Queued);
        dispatch(&self.inner);
    }

    /// Completes when both the waiting set and the running set are empty.
    /// Safe to call concurrently with producers.
    pub async fn process_all(&self) {
        loop {
            let mut drained = std::pin::pin!(self.inner.drained.notified());
            drained.as_mut().enable();
            {
                let state = self.inner.state.lock().unwrap();
                if state.waiting.is_empty() && state.running == 0 {
                    return;
                }
            }
            drained.await;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().unwrap().waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn running(&self) -> usize {
        self.inner.state.lock().unwrap().running
    }

    pub fn active(&self) -> usize {
        self.inner.state.lock().unwrap().active
    }

    pub fn is_idle(&self) -> bool {
        let state = self.inner.state.lock().unwrap();
        state.waiting.is_empty() && state.running == 0
    }
}

impl<T> Inner<T> {
    fn emit(&self, event: QueueEvent) {
        let observer = self.observer.lock().unwrap().clone();
        if let Some(observer) = observer {
            observer(event);
        }
    }
}

/// Start waiting tasks while both concurrency gates allow it.
fn dispatch<T: Clone + Send + 'static>(inner: &Arc<Inner<T>>) {
    loop {
        let args = {
            let mut state = inner.state.lock().unwrap();
            let soft_ok = inner
                .opts
                .soft_concurrency
                .map_or(true, |soft| state.active < soft);
            if state.running >= inner.opts.hard_concurrency || !soft_ok {
                break;
            }
            match state.waiting.pop_front() {
                Some(args) => {
                    state.running += 1;
                    state.active += 1;
                    args
                }
                None => break,
            }
        };
        inner.space.notify_waiters();
        let inner = Arc::clone(inner);
        tokio::spawn(run_task(inner, args));
    }
}

async fn run_task<T: Clone + Send + 'static>(inner: Arc<Inner<T>>, args: T) {
    let fut = (inner.handler)(args.clone());
    let mut demoted = false;

    let result = if inner.opts.soft_concurrency.is_some() {
        tokio::pin!(fut);
        let demote_at = tokio::time::sleep(inner.opts.soft_timeout);
        tokio::pin!(demote_at);
        loop {
            tokio::select! {
                result = &mut fut => break result,
                () = &mut demote_at, if !demoted => {
                    demoted = true;
                    inner.state.lock().unwrap().active -= 1;
                    dispatch(&inner);
                }
            }
        }
    } else {
        fut.await
    };

    let requeued = matches!(result, Err(TaskError::Cancelled(_)));
    {
        let mut state = inner.state.lock().unwrap();
        state.running -= 1;
        if !demoted {
            state.active -= 1;
        }
        if requeued {
            // Re-append past the size cap: a full queue must not deadlock
            // its own retry.
            state.waiting.push_back(args);
        }
    }

    match &result {
        Ok(()) => inner.emit(QueueEvent::Completed),
        Err(TaskError::Cancelled(message)) => {
            tracing::debug!("re-queueing cancelled task: {message}");
        }
        Err(TaskError::Failed(message)) => {
            tracing::error!("task failed: {message}");
            inner.emit(QueueEvent::Errored);
        }
    }

    dispatch(&inner);
    inner.space.notify_waiters();

    let idle = {
        let state = inner.state.lock().unwrap();
        state.waiting.is_empty() && state.running == 0
    };
    if idle {
        inner.emit(QueueEvent::Drained);
        inner.drained.notify_waiters();
    }
}
