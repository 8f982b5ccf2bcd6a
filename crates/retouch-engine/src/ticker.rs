use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use retouch_contracts::events::EventWriter;
use retouch_contracts::presets::animation_tip_message;
use serde_json::json;

use crate::map_object;

const TICK_SLICE: Duration = Duration::from_millis(50);

/// Rotating user-facing hint while an animation renders. Cosmetic, but
/// `stop` must halt it for good.
pub trait ProgressTicker: Send + Sync {
    fn start(&self, messages: Vec<String>, interval: Duration);
    fn stop(&self);
    fn current(&self) -> Option<String>;
}

struct TickerWorker {
    handle: thread::JoinHandle<()>,
    stop_flag: Arc<AtomicBool>,
}

/// Background-thread ticker. The first message shows immediately.
pub struct ThreadTicker {
    events: EventWriter,
    message: Arc<Mutex<Option<String>>>,
    worker: Mutex<Option<TickerWorker>>,
}

impl ThreadTicker {
    pub fn new(events: EventWriter) -> Self {
        Self {
            events,
            message: Arc::new(Mutex::new(None)),
            worker: Mutex::new(None),
        }
    }

    fn set_message(slot: &Mutex<Option<String>>, value: Option<String>) {
        if let Ok(mut current) = slot.lock() {
            *current = value;
        }
    }
}

impl ProgressTicker for ThreadTicker {
    fn start(&self, messages: Vec<String>, interval: Duration) {
        self.stop();
        let interval = interval.max(TICK_SLICE);
        let messages: Vec<String> = messages
            .into_iter()
            .map(|tip| animation_tip_message(&tip))
            .collect();
        let Some(first) = messages.first().cloned() else {
            return;
        };
        Self::set_message(&self.message, Some(first.clone()));
        self.events.record(
            "progress_tip",
            map_object(json!({ "index": 0, "message": first })),
        );
        if messages.len() < 2 {
            return;
        }

        let stop_flag = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop_flag);
        let slot = Arc::clone(&self.message);
        let events = self.events.clone();
        let spawned = thread::Builder::new()
            .name("retouch-progress-ticker".to_string())
            .spawn(move || {
                let mut index = 0usize;
                let mut last_tick = Instant::now();
                while !worker_stop.load(Ordering::SeqCst) {
                    thread::sleep(TICK_SLICE);
                    if last_tick.elapsed() < interval {
                        continue;
                    }
                    if worker_stop.load(Ordering::SeqCst) {
                        break;
                    }
                    last_tick = Instant::now();
                    index = (index + 1) % messages.len();
                    Self::set_message(&slot, Some(messages[index].clone()));
                    events.record(
                        "progress_tip",
                        map_object(json!({ "index": index, "message": messages[index] })),
                    );
                }
            });
        // A ticker that fails to spawn just keeps showing the first tip.
        if let Ok(handle) = spawned {
            if let Ok(mut worker) = self.worker.lock() {
                *worker = Some(TickerWorker { handle, stop_flag });
            }
        }
    }

    fn stop(&self) {
        let worker = self.worker.lock().ok().and_then(|mut slot| slot.take());
        if let Some(worker) = worker {
            worker.stop_flag.store(true, Ordering::SeqCst);
            let _ = worker.handle.join();
        }
        Self::set_message(&self.message, None);
    }

    fn current(&self) -> Option<String> {
        self.message.lock().ok().and_then(|slot| slot.clone())
    }
}

impl Drop for ThreadTicker {
    fn drop(&mut self) {
        self.stop();
    }
}

struct LeaseInner {
    ticker: Arc<dyn ProgressTicker>,
    released: AtomicBool,
}

impl LeaseInner {
    fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.ticker.stop();
        }
    }
}

impl Drop for LeaseInner {
    fn drop(&mut self) {
        self.release();
    }
}

/// Scoped ownership of a started ticker. However many clones call
/// `release`, the ticker is stopped exactly once.
#[derive(Clone)]
pub struct TickerLease {
    inner: Arc<LeaseInner>,
}

impl TickerLease {
    pub fn acquire(
        ticker: Arc<dyn ProgressTicker>,
        messages: Vec<String>,
        interval: Duration,
    ) -> Self {
        ticker.start(messages, interval);
        Self {
            inner: Arc::new(LeaseInner {
                ticker,
                released: AtomicBool::new(false),
            }),
        }
    }

    pub fn release(&self) {
        self.inner.release();
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::SeqCst)
    }

    /// Guard that releases when it goes out of scope.
    pub fn release_on_drop(&self) -> LeaseGuard {
        LeaseGuard {
            lease: self.clone(),
        }
    }
}

pub struct LeaseGuard {
    lease: TickerLease,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.lease.release();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    /// Counts lifecycle calls instead of running a timer.
    #[derive(Default)]
    pub(crate) struct CountingTicker {
        pub starts: AtomicUsize,
        pub stops: AtomicUsize,
    }

    impl CountingTicker {
        pub(crate) fn starts(&self) -> usize {
            self.starts.load(Ordering::SeqCst)
        }

        pub(crate) fn stops(&self) -> usize {
            self.stops.load(Ordering::SeqCst)
        }
    }

    impl ProgressTicker for CountingTicker {
        fn start(&self, _messages: Vec<String>, _interval: Duration) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }

        fn current(&self) -> Option<String> {
            None
        }
    }

    #[test]
    fn lease_stops_once_across_release_paths() {
        let ticker = Arc::new(CountingTicker::default());
        let lease = TickerLease::acquire(
            Arc::clone(&ticker) as Arc<dyn ProgressTicker>,
            vec!["a".to_string()],
            Duration::from_secs(4),
        );
        {
            let _guard = lease.release_on_drop();
        }
        lease.release();
        let clone = lease.clone();
        clone.release();
        drop(clone);
        drop(lease);
        assert_eq!(ticker.starts(), 1);
        assert_eq!(ticker.stops(), 1);
    }

    #[test]
    fn dropped_lease_releases_ticker() {
        let ticker = Arc::new(CountingTicker::default());
        let lease = TickerLease::acquire(
            Arc::clone(&ticker) as Arc<dyn ProgressTicker>,
            Vec::new(),
            Duration::from_secs(4),
        );
        assert!(!lease.is_released());
        drop(lease);
        assert_eq!(ticker.stops(), 1);
    }

    #[test]
    fn thread_ticker_rotates_and_stops() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let ticker = ThreadTicker::new(EventWriter::new(&path, "tick"));
        ticker.start(
            vec!["first".to_string(), "second".to_string()],
            Duration::from_millis(60),
        );
        assert_eq!(ticker.current().as_deref(), Some("Tip: first"));

        let deadline = Instant::now() + Duration::from_secs(5);
        while ticker.current().as_deref() != Some("Tip: second") && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(ticker.current().as_deref(), Some("Tip: second"));

        ticker.stop();
        assert_eq!(ticker.current(), None);
        let lines_after_stop = std::fs::read_to_string(&path)?.lines().count();
        thread::sleep(Duration::from_millis(200));
        assert_eq!(
            std::fs::read_to_string(&path)?.lines().count(),
            lines_after_stop
        );
        Ok(())
    }

    #[test]
    fn zero_interval_rotates_at_slice_pace() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let ticker = ThreadTicker::new(EventWriter::new(&path, "tick"));
        ticker.start(vec!["a".to_string(), "b".to_string()], Duration::ZERO);
        thread::sleep(Duration::from_millis(300));
        ticker.stop();

        let tips = std::fs::read_to_string(&path)?
            .lines()
            .filter(|line| line.contains("progress_tip"))
            .count();
        assert!(tips >= 2, "ticker never rotated");
        assert!(tips <= 10, "ticker spun {tips} times");
        Ok(())
    }
}
