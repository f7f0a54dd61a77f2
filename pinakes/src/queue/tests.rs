#[cfg(test)]
mod queue_tests {
    use crate::queue::{QueueEvent, TaskError, TaskQueue, TaskQueueOpts};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::Notify;
    use tokio::time::{sleep, timeout};

    #[tokio::test]
    async fn processes_everything_then_drains() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let queue = {
            let seen = Arc::clone(&seen);
            TaskQueue::new(TaskQueueOpts::hard(4), move |n: u32| {
                let seen = Arc::clone(&seen);
                Box::pin(async move {
                    seen.lock().unwrap().push(n);
                    Ok(())
                })
            })
        };

        for n in 0..50 {
            queue.add(n).await;
        }
        queue.process_all().await;

        let mut got = seen.lock().unwrap().clone();
        got.sort_unstable();
        assert_eq!(got, (0..50).collect::<Vec<_>>());
        assert!(queue.is_idle());
    }

    #[tokio::test]
    async fn hard_concurrency_is_a_strict_cap() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let queue = {
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            TaskQueue::new(TaskQueueOpts::hard(3), move |_n: u32| {
                let current = Arc::clone(&current);
                let peak = Arc::clone(&peak);
                Box::pin(async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(5)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            })
        };

        for n in 0..30 {
            queue.add(n).await;
        }
        queue.process_all().await;

        assert!(peak.load(Ordering::SeqCst) <= 3, "ran more than hard cap");
    }

    #[tokio::test(start_paused = true)]
    async fn soft_demotion_lets_fast_tasks_drain() {
        // One long-running task occupies the single soft slot; once demoted,
        // the short tasks behind it start without waiting for it to finish.
        let done = Arc::new(AtomicUsize::new(0));
        let queue = {
            let done = Arc::clone(&done);
            TaskQueue::new(
                TaskQueueOpts::hard(5)
                    .soft(1)
                    .soft_timeout(Duration::from_millis(100)),
                move |n: u32| {
                    let done = Arc::clone(&done);
                    Box::pin(async move {
                        if n == 0 {
                            sleep(Duration::from_secs(3600)).await;
                        }
                        done.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                },
            )
        };

        queue.add(0).await;
        for n in 1..4 {
            queue.add(n).await;
        }

        // Before the soft timeout only the straggler occupies a slot.
        tokio::task::yield_now().await;
        assert_eq!(queue.running(), 1);

        // After demotion the remaining tasks run and finish while the
        // straggler keeps counting against `running` only.
        sleep(Duration::from_millis(200)).await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert_eq!(queue.running(), 1);
        assert_eq!(queue.active(), 0);
    }

    #[tokio::test]
    async fn add_suspends_at_max_queue_size() {
        let release = Arc::new(Notify::new());
        let queue = {
            let release = Arc::clone(&release);
            TaskQueue::new(
                TaskQueueOpts::hard(1).max_queue_size(1),
                move |_n: u32| {
                    let release = Arc::clone(&release);
                    Box::pin(async move {
                        release.notified().await;
                        Ok(())
                    })
                },
            )
        };

        queue.add(1).await; // starts running immediately
        queue.add(2).await; // fills the waiting set
        assert_eq!(queue.len(), 1);

        // The third producer must block until a slot frees up.
        let blocked = timeout(Duration::from_millis(50), queue.add(3)).await;
        assert!(blocked.is_err(), "add should suspend while queue is full");

        release.notify_waiters();
        timeout(Duration::from_secs(1), queue.add(3))
            .await
            .expect("add should resume once space opens");

        release.notify_waiters();
        loop {
            release.notify_waiters();
            if queue.is_idle() {
                break;
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn cancellation_reappends_to_the_tail() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let errored = Arc::new(AtomicUsize::new(0));
        let queue = {
            let attempts = Arc::clone(&attempts);
            TaskQueue::new(TaskQueueOpts::hard(1), move |_n: u32| {
                let attempts = Arc::clone(&attempts);
                Box::pin(async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(TaskError::Cancelled("timed out".into()))
                    } else {
                        Ok(())
                    }
                })
            })
        };
        {
            let errored = Arc::clone(&errored);
            queue.set_observer(move |event| {
                if event == QueueEvent::Errored {
                    errored.fetch_add(1, Ordering::SeqCst);
                }
            });
        }

        queue.add(7).await;
        queue.process_all().await;

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        // a cancellation is retried, not surfaced on the error channel
        assert_eq!(errored.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failures_are_dropped_and_reported() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let errored = Arc::new(AtomicUsize::new(0));
        let queue = {
            let attempts = Arc::clone(&attempts);
            TaskQueue::new(TaskQueueOpts::hard(1), move |_n: u32| {
                let attempts = Arc::clone(&attempts);
                Box::pin(async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(TaskError::Failed("schema mismatch".into()))
                })
            })
        };
        {
            let errored = Arc::clone(&errored);
            queue.set_observer(move |event| {
                if event == QueueEvent::Errored {
                    errored.fetch_add(1, Ordering::SeqCst);
                }
            });
        }

        queue.add(1).await;
        queue.process_all().await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(errored.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn prepend_jumps_the_line() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let gate = Arc::new(Notify::new());
        let queue = {
            let order = Arc::clone(&order);
            let gate = Arc::clone(&gate);
            TaskQueue::new(TaskQueueOpts::hard(1), move |n: u32| {
                let order = Arc::clone(&order);
                let gate = Arc::clone(&gate);
                Box::pin(async move {
                    if n == 0 {
                        gate.notified().await;
                    }
                    order.lock().unwrap().push(n);
                    Ok(())
                })
            })
        };

        queue.add(0).await; // running, holds the single slot
        queue.add(1).await;
        queue.add(2).await;
        queue.prepend(3).await;
        gate.notify_waiters();
        queue.process_all().await;

        assert_eq!(*order.lock().unwrap(), vec![0, 3, 1, 2]);
    }

    #[tokio::test]
    async fn drained_event_fires_once_work_is_gone() {
        let drained = Arc::new(AtomicUsize::new(0));
        let queue = TaskQueue::new(TaskQueueOpts::hard(2), move |_n: u32| {
            Box::pin(async move { Ok(()) })
        });
        {
            let drained = Arc::clone(&drained);
            queue.set_observer(move |event| {
                if event == QueueEvent::Drained {
                    drained.fetch_add(1, Ordering::SeqCst);
                }
            });
        }

        for n in 0..5 {
            queue.add(n).await;
        }
        queue.process_all().await;
        assert!(drained.load(Ordering::SeqCst) >= 1);
    }
}
