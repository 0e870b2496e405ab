use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use ol_bootstrap::{
    ArchiveSegment, ArchiveSource, EpochNumber, PrefetchConfig, ReorderBuffer, RetryError,
    RetryObserver, RetryPolicy, SegmentExporter, SegmentPrefetcher, ShutdownSignal, Sleeper,
    SourceError, ValidatorSigner,
};

struct NoopSleeper;

impl Sleeper for NoopSleeper {
    fn sleep(&self, _duration: Duration) {}
}

struct SlowArchive {
    segments: HashMap<EpochNumber, ArchiveSegment>,
    delays: HashMap<EpochNumber, Duration>,
    in_flight: AtomicUsize,
    peak_claimed: Mutex<EpochNumber>,
}

impl SlowArchive {
    fn new(count: u64) -> Self {
        let signers = vec![ValidatorSigner::from_seed("val-0", [7; 32], 10)];
        let mut exporter = SegmentExporter::genesis(signers);
        let segments = (0..count)
            .map(|epoch| (epoch, exporter.export_segment(vec![epoch as u8; 8], 10)))
            .collect();
        Self {
            segments,
            delays: HashMap::new(),
            in_flight: AtomicUsize::new(0),
            peak_claimed: Mutex::new(0),
        }
    }

    fn with_delay(mut self, epoch: EpochNumber, millis: u64) -> Self {
        self.delays.insert(epoch, Duration::from_millis(millis));
        self
    }

    fn without(mut self, epoch: EpochNumber) -> Self {
        self.segments.remove(&epoch);
        self
    }
}

impl ArchiveSource for SlowArchive {
    fn name(&self) -> &str {
        "slow"
    }

    fn fetch_segment(&self, epoch: EpochNumber) -> Result<ArchiveSegment, SourceError> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        {
            let mut peak = self.peak_claimed.lock().unwrap();
            *peak = (*peak).max(epoch);
        }
        if let Some(delay) = self.delays.get(&epoch) {
            thread::sleep(*delay);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.segments
            .get(&epoch)
            .cloned()
            .ok_or_else(|| SourceError::NotFound {
                source_name: "slow".into(),
                what: format!("epoch {epoch}"),
            })
    }

    fn latest_available_epoch(&self) -> Result<EpochNumber, SourceError> {
        Ok(self.segments.keys().copied().max().unwrap_or(0))
    }
}

fn no_observer() -> RetryObserver {
    Arc::new(|_, _, _| {})
}

fn spawn(
    archive: Arc<SlowArchive>,
    first: EpochNumber,
    last: EpochNumber,
    config: PrefetchConfig,
    shutdown: ShutdownSignal,
    on_retry: RetryObserver,
) -> SegmentPrefetcher {
    SegmentPrefetcher::spawn(
        archive,
        first,
        last,
        &config,
        RetryPolicy::new(2, 1, 1),
        Arc::new(NoopSleeper),
        shutdown,
        on_retry,
    )
    .expect("spawn prefetch workers")
}

#[test]
fn reorder_buffer_releases_in_key_order() {
    let mut buffer = ReorderBuffer::new(3);
    buffer.insert(5, "five").unwrap();
    buffer.insert(4, "four").unwrap();
    assert_eq!(buffer.pop_ready(), None);
    assert_eq!(buffer.len(), 2);

    buffer.insert(3, "three").unwrap();
    assert_eq!(buffer.pop_ready(), Some((3, "three")));
    assert_eq!(buffer.pop_ready(), Some((4, "four")));
    assert_eq!(buffer.pop_ready(), Some((5, "five")));
    assert_eq!(buffer.pop_ready(), None);
    assert!(buffer.is_empty());
    assert_eq!(buffer.next_expected(), 6);

    assert_eq!(buffer.insert(4, "stale"), Err("stale"));
    buffer.insert(7, "seven").unwrap();
    assert_eq!(buffer.insert(7, "again"), Err("again"));
}

#[test]
fn delivers_epochs_in_plan_order_despite_slow_fetches() {
    let archive = Arc::new(
        SlowArchive::new(8)
            .with_delay(1, 60)
            .with_delay(2, 5)
            .with_delay(4, 30),
    );
    let config = PrefetchConfig {
        workers: 3,
        window: 4,
    };
    let mut prefetcher = spawn(
        Arc::clone(&archive),
        0,
        7,
        config,
        ShutdownSignal::new(),
        no_observer(),
    );

    let mut delivered = Vec::new();
    while let Some((epoch, outcome)) = prefetcher.next() {
        let segment = outcome.expect("segment fetched");
        assert_eq!(segment.epoch_number, epoch);
        delivered.push(epoch);
    }
    assert_eq!(delivered, (0..=7).collect::<Vec<_>>());
    assert_eq!(prefetcher.metrics().fetched(), 8);
    prefetcher.join();
}

#[test]
fn missing_epoch_is_reported_in_order() {
    let archive = Arc::new(SlowArchive::new(5).without(2));
    let retries = Arc::new(AtomicUsize::new(0));
    let observer: RetryObserver = {
        let retries = Arc::clone(&retries);
        Arc::new(move |epoch, _, _| {
            assert_eq!(epoch, 2);
            retries.fetch_add(1, Ordering::SeqCst);
        })
    };
    let mut prefetcher = spawn(
        archive,
        0,
        4,
        PrefetchConfig::default(),
        ShutdownSignal::new(),
        observer,
    );

    assert!(prefetcher.next().unwrap().1.is_ok());
    assert!(prefetcher.next().unwrap().1.is_ok());
    let (epoch, outcome) = prefetcher.next().unwrap();
    assert_eq!(epoch, 2);
    assert!(matches!(outcome, Err(RetryError::Exhausted { attempts: 2, .. })));
    assert_eq!(retries.load(Ordering::SeqCst), 1);
    assert_eq!(prefetcher.metrics().failed(), 1);
    prefetcher.join();
}

#[test]
fn workers_stay_inside_the_window() {
    let archive = Arc::new(SlowArchive::new(20));
    let config = PrefetchConfig {
        workers: 4,
        window: 3,
    };
    let mut prefetcher = spawn(
        Arc::clone(&archive),
        0,
        19,
        config,
        ShutdownSignal::new(),
        no_observer(),
    );

    let (epoch, _) = prefetcher.next().expect("first epoch");
    assert_eq!(epoch, 0);
    thread::sleep(Duration::from_millis(50));
    assert!(*archive.peak_claimed.lock().unwrap() <= 3);

    prefetcher.join();
    assert_eq!(archive.in_flight.load(Ordering::SeqCst), 0);
}

#[test]
fn shutdown_stops_delivery() {
    let archive = Arc::new(SlowArchive::new(10).with_delay(0, 200));
    let shutdown = ShutdownSignal::new();
    let mut prefetcher = spawn(
        archive,
        0,
        9,
        PrefetchConfig::default(),
        shutdown.clone(),
        no_observer(),
    );

    shutdown.request();
    assert!(prefetcher.next().is_none());
    prefetcher.join();
}

#[test]
fn empty_range_yields_nothing() {
    let archive = Arc::new(SlowArchive::new(3));
    let mut prefetcher = spawn(
        archive,
        3,
        2,
        PrefetchConfig::default(),
        ShutdownSignal::new(),
        no_observer(),
    );
    assert!(prefetcher.next().is_none());
    prefetcher.join();
}
