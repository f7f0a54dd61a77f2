use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::{HashMap, VecDeque};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

const RATE_WINDOW: Duration = Duration::from_secs(10);

/// The multi-bar currently owning the terminal, if any. Log lines are routed
/// through it so bars are not corrupted by interleaved writes.
static ACTIVE: OnceLock<Mutex<Option<MultiProgress>>> = OnceLock::new();

fn active() -> &'static Mutex<Option<MultiProgress>> {
    ACTIVE.get_or_init(|| Mutex::new(None))
}

/// Writer handed to the tracing subscriber: while a progress display is
/// active, suspend it around each write; otherwise write straight through.
#[derive(Clone, Default)]
pub struct LogWriter;

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let guard = active().lock().unwrap();
        match guard.as_ref() {
            Some(multi) => multi.suspend(|| io::stderr().write(buf)),
            None => io::stderr().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

struct Counter {
    bar: ProgressBar,
    window: VecDeque<Instant>,
}

struct ProgressInner {
    multi: MultiProgress,
    counters: Mutex<HashMap<String, Counter>>,
    finished: AtomicBool,
}

/// Named counters rendered as spinner bars with a rolling-window throughput
/// readout. Installs itself as the log sink on start and restores plain
/// stderr when finished; the release is idempotent.
#[derive(Clone)]
pub struct Progress {
    inner: Arc<ProgressInner>,
}

impl Progress {
    pub fn start() -> Self {
        let multi = MultiProgress::new();
        *active().lock().unwrap() = Some(multi.clone());
        Self {
            inner: Arc::new(ProgressInner {
                multi,
                counters: Mutex::new(HashMap::new()),
                finished: AtomicBool::new(false),
            }),
        }
    }

    /// A display that renders nothing; counters are still tracked.
    pub fn hidden() -> Self {
        Self {
            inner: Arc::new(ProgressInner {
                multi: MultiProgress::with_draw_target(indicatif::ProgressDrawTarget::hidden()),
                counters: Mutex::new(HashMap::new()),
                finished: AtomicBool::new(false),
            }),
        }
    }

    pub fn inc(&self, name: &str) {
        let mut counters = self.inner.counters.lock().unwrap();
        let counter = counters.entry(name.to_string()).or_insert_with(|| {
            let bar = self.inner.multi.add(ProgressBar::new_spinner());
            bar.set_style(
                ProgressStyle::with_template("{spinner} {prefix:>12} {pos} ({msg})")
                    .expect("static template"),
            );
            bar.set_prefix(name.to_string());
            bar.enable_steady_tick(Duration::from_millis(100));
            Counter {
                bar,
                window: VecDeque::new(),
            }
        });

        let now = Instant::now();
        counter.window.push_back(now);
        while counter
            .window
            .front()
            .is_some_and(|t| now.duration_since(*t) > RATE_WINDOW)
        {
            counter.window.pop_front();
        }
        let rate = counter.window.len() as f64 / RATE_WINDOW.as_secs_f64();
        counter.bar.set_message(format!("{rate:.1}/s"));
        counter.bar.inc(1);
    }

    pub fn count(&self, name: &str) -> u64 {
        self.inner
            .counters
            .lock()
            .unwrap()
            .get(name)
            .map_or(0, |c| c.bar.position())
    }

    /// Print a line above the bars.
    pub fn println(&self, message: &str) {
        let _ = self.inner.multi.println(message);
    }

    pub fn finish(&self) {
        if self.inner.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        for counter in self.inner.counters.lock().unwrap().values() {
            counter.bar.finish();
        }
        *active().lock().unwrap() = None;
    }
}

impl Drop for ProgressInner {
    fn drop(&mut self) {
        if !self.finished.swap(true, Ordering::SeqCst) {
            *active().lock().unwrap() = None;
        }
    }
}
