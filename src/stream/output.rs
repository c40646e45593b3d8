//! Outbound pacing scheduler.
//!
//! Sits between a sample producer and a [`SampleWriter`]. Samples arrive
//! through a bounded queue; once more than one sample is queued the
//! scheduler switches to buffering and from then on every arrival pushes
//! out the oldest queued sample. A cadence timer keeps the track alive
//! with 2-byte keepalive samples while nothing is queued, and adapts its
//! next wake-up to the measured send cost.
//!
//! The scheduler stops when every producer is gone or when its owner calls
//! [`PacingHandle::shutdown`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, info, warn};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::error::TransportError;
use crate::media::{audio_sample, Sample};
use crate::track::SampleWriter;

/// Lower bound for the timer interval
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Payload sent when nothing is queued
static KEEPALIVE_PAYLOAD: [u8; 2] = [0x00, 0x00];

/// Pacing scheduler configuration.
#[derive(Debug, Clone)]
pub struct PacingConfig {
    /// Target cadence (20ms)
    pub frame_duration: Duration,
    /// Producer queue capacity in samples
    pub queue_capacity: usize,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            frame_duration: Duration::from_millis(20),
            // 1.28 s at 20 ms
            queue_capacity: 64,
        }
    }
}

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacingState {
    /// At most one sample has ever been queued at once
    Idle,
    /// Arrivals push out the oldest queued sample
    Buffering,
}

/// Pacing statistics (lock-free atomic updates).
#[derive(Debug, Default)]
pub struct PacingStats {
    pub samples_sent: AtomicU64,
    pub keepalives_sent: AtomicU64,
    pub send_errors: AtomicU64,
    pub discarded: AtomicU64,
}

impl PacingStats {
    pub fn snapshot(&self) -> PacingStatsSnapshot {
        PacingStatsSnapshot {
            samples_sent: self.samples_sent.load(Ordering::Relaxed),
            keepalives_sent: self.keepalives_sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of pacing statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacingStatsSnapshot {
    pub samples_sent: u64,
    pub keepalives_sent: u64,
    pub send_errors: u64,
    pub discarded: u64,
}

/// Producer side of the pacing queue.
///
/// Backpressure: [`enqueue`](Self::enqueue) and
/// [`blocking_enqueue`](Self::blocking_enqueue) wait while the queue is
/// full, [`try_enqueue`](Self::try_enqueue) fails with
/// [`TransportError::QueueFull`]. Samples are never dropped silently.
/// The scheduler stops once every producer clone has been closed or
/// dropped, or when [`PacingHandle::shutdown`] is called.
#[derive(Debug, Clone)]
pub struct PacingProducer {
    tx: mpsc::Sender<Sample>,
}

impl PacingProducer {
    /// Queue a sample, waiting for space if the queue is full.
    pub async fn enqueue(&self, sample: Sample) -> Result<(), TransportError> {
        self.tx
            .send(sample)
            .await
            .map_err(|_| TransportError::QueueClosed)
    }

    /// Queue a sample or fail immediately if the queue is full.
    pub fn try_enqueue(&self, sample: Sample) -> Result<(), TransportError> {
        self.tx.try_send(sample).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::QueueFull,
            TrySendError::Closed(_) => TransportError::QueueClosed,
        })
    }

    /// Queue a sample from a non-async thread, blocking while the queue is full.
    ///
    /// Must not be called from within an async runtime.
    pub fn blocking_enqueue(&self, sample: Sample) -> Result<(), TransportError> {
        self.tx
            .blocking_send(sample)
            .map_err(|_| TransportError::QueueClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Release this producer clone.
    ///
    /// Only the last clone to go ends the scheduler; while other clones
    /// exist it keeps running. Use [`PacingHandle::shutdown`] to stop it
    /// regardless of outstanding clones.
    pub fn close(self) {
        drop(self);
    }
}

/// Owner handle of a running scheduler.
#[derive(Debug)]
pub struct PacingHandle {
    join: JoinHandle<()>,
    stats: Arc<PacingStats>,
    shutdown: Arc<Notify>,
}

impl PacingHandle {
    pub fn stats(&self) -> PacingStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stop the scheduler even if producers are still alive.
    ///
    /// Queued samples are discarded and every producer then sees
    /// `QueueClosed`. Returns the final statistics.
    pub async fn shutdown(self) -> PacingStatsSnapshot {
        self.shutdown.notify_one();
        self.join().await
    }

    /// Wait for the scheduler task to exit (after the producers are closed).
    pub async fn join(self) -> PacingStatsSnapshot {
        if let Err(e) = self.join.await {
            warn!("Pacing scheduler task failed: {}", e);
        }
        self.stats.snapshot()
    }
}

/// Pacing scheduler task state.
pub struct PacingScheduler {
    writer: Arc<dyn SampleWriter>,
    frame_duration: Duration,
    rx: mpsc::Receiver<Sample>,
    buffer: VecDeque<Sample>,
    state: PacingState,
    /// Interval until the next timer wake-up
    next_interval: Duration,
    /// Time of the previous tick that found data queued
    last_tick_send: Instant,
    /// How long the most recent write took
    last_send_cost: Duration,
    /// Start of the current keepalive-only period
    no_data_since: Option<Instant>,
    stats: Arc<PacingStats>,
    shutdown: Arc<Notify>,
}

impl PacingScheduler {
    /// Start a scheduler on `runtime` feeding `writer`.
    pub fn spawn(
        writer: Arc<dyn SampleWriter>,
        config: PacingConfig,
        runtime: &Handle,
    ) -> (PacingProducer, PacingHandle) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let stats = Arc::new(PacingStats::default());
        let shutdown = Arc::new(Notify::new());
        let scheduler = PacingScheduler {
            writer,
            frame_duration: config.frame_duration,
            rx,
            buffer: VecDeque::with_capacity(config.queue_capacity.max(1)),
            state: PacingState::Idle,
            next_interval: config.frame_duration,
            last_tick_send: Instant::now(),
            last_send_cost: Duration::ZERO,
            no_data_since: None,
            stats: stats.clone(),
            shutdown: shutdown.clone(),
        };

        let join = runtime.spawn(scheduler.run());
        (
            PacingProducer { tx },
            PacingHandle {
                join,
                stats,
                shutdown,
            },
        )
    }

    async fn run(mut self) {
        info!(
            "Pacing scheduler started ({} ms cadence)",
            self.frame_duration.as_millis()
        );
        let mut deadline = Instant::now() + self.next_interval;
        let shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    info!("Pacing scheduler shutdown requested");
                    break;
                }
                received = self.rx.recv() => match received {
                    Some(sample) => self.on_enqueue(sample),
                    None => break,
                },
                _ = sleep_until(deadline) => {
                    self.on_tick();
                    deadline = Instant::now() + self.next_interval.max(MIN_INTERVAL);
                }
            }
        }

        self.shutdown();
    }

    fn on_enqueue(&mut self, sample: Sample) {
        self.buffer.push_back(sample);
        if self.buffer.len() > 1 && self.state == PacingState::Idle {
            debug!("Pacing scheduler buffering");
            self.state = PacingState::Buffering;
        }

        if self.state == PacingState::Buffering {
            if let Some(oldest) = self.buffer.pop_front() {
                self.send(&oldest, false);
            }
        }
    }

    fn on_tick(&mut self) {
        let now = Instant::now();

        if !self.buffer.is_empty() && self.state == PacingState::Buffering {
            if let Some(since) = self.no_data_since.take() {
                debug!(
                    "No data period: {:.3} s",
                    now.saturating_duration_since(since).as_secs_f64()
                );
            }

            let since_last = now.saturating_duration_since(self.last_tick_send);
            let double = self.frame_duration * 2;
            self.next_interval = if since_last < double {
                double
                    .saturating_sub(since_last)
                    .saturating_sub(self.last_send_cost)
            } else {
                self.frame_duration.saturating_sub(self.last_send_cost)
            };
            self.last_tick_send = now;
        } else {
            if self.no_data_since.is_none() {
                self.no_data_since = Some(now);
                debug!("No data to send, sending keepalive");
            }
            let keepalive = audio_sample(Bytes::from_static(&KEEPALIVE_PAYLOAD), self.frame_duration);
            self.send(&keepalive, true);
        }
    }

    fn send(&mut self, sample: &Sample, keepalive: bool) {
        let start = Instant::now();
        match self.writer.write_sample(sample) {
            Ok(()) => {
                let counter = if keepalive {
                    &self.stats.keepalives_sent
                } else {
                    &self.stats.samples_sent
                };
                counter.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.stats.send_errors.fetch_add(1, Ordering::Relaxed);
                warn!("Error writing to track: {}", e);
            }
        }
        self.last_send_cost = start.elapsed();
    }

    fn shutdown(&mut self) {
        // Refuse further samples, then drop whatever is still in flight
        self.rx.close();
        let mut discarded = self.buffer.len();
        self.buffer.clear();
        while self.rx.try_recv().is_ok() {
            discarded += 1;
        }
        self.stats
            .discarded
            .fetch_add(discarded as u64, Ordering::Relaxed);
        info!(
            "Pacing queue closed, scheduler exiting ({} buffered samples discarded)",
            discarded
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSampleWriter {
        samples: Mutex<Vec<Bytes>>,
    }

    impl RecordingSampleWriter {
        fn payloads(&self) -> Vec<Bytes> {
            self.samples.lock().clone()
        }
    }

    impl SampleWriter for RecordingSampleWriter {
        fn write_sample(&self, sample: &Sample) -> Result<(), TransportError> {
            self.samples.lock().push(sample.data.clone());
            Ok(())
        }
    }

    fn data(byte: u8) -> Sample {
        audio_sample(vec![byte; 8], Duration::from_millis(20))
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalives_while_idle() {
        let writer = Arc::new(RecordingSampleWriter::default());
        let (producer, handle) =
            PacingScheduler::spawn(writer.clone(), PacingConfig::default(), &Handle::current());

        tokio::time::sleep(Duration::from_millis(105)).await;

        let sent = writer.payloads();
        assert!(sent.len() >= 4, "only {} keepalives", sent.len());
        assert!(sent.iter().all(|p| p.as_ref() == [0u8, 0]));
        assert!(handle.stats().keepalives_sent >= 4);

        producer.close();
        let stats = handle.join().await;
        assert_eq!(stats.samples_sent, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_arrivals_push_out_oldest() {
        let writer = Arc::new(RecordingSampleWriter::default());
        let (producer, handle) =
            PacingScheduler::spawn(writer.clone(), PacingConfig::default(), &Handle::current());

        for byte in 1..=3 {
            producer.enqueue(data(byte)).await.unwrap();
        }
        // Well before the first tick
        tokio::time::sleep(Duration::from_millis(5)).await;

        let sent = writer.payloads();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0][0], 1);
        assert_eq!(sent[1][0], 2);

        // Ticks with data queued only retime, they do not send
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(writer.payloads().len(), 2);

        producer.close();
        let stats = handle.join().await;
        assert_eq!(stats.samples_sent, 2);
        assert_eq!(stats.keepalives_sent, 0);
        assert_eq!(stats.discarded, 1);
    }

    #[tokio::test]
    async fn test_try_enqueue_reports_full_queue() {
        let writer = Arc::new(RecordingSampleWriter::default());
        let config = PacingConfig {
            queue_capacity: 1,
            ..Default::default()
        };
        let (producer, handle) = PacingScheduler::spawn(writer, config, &Handle::current());

        // The scheduler task has not run yet on this single-threaded runtime
        producer.try_enqueue(data(1)).unwrap();
        let err = producer.try_enqueue(data(2)).unwrap_err();
        assert!(matches!(err, TransportError::QueueFull));

        producer.close();
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_closing_one_clone_keeps_scheduler_running() {
        let writer = Arc::new(RecordingSampleWriter::default());
        let (producer, handle) =
            PacingScheduler::spawn(writer.clone(), PacingConfig::default(), &Handle::current());
        let other = producer.clone();

        producer.close();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());
        other.enqueue(data(1)).await.unwrap();
        assert!(!other.is_closed());

        other.close();
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_owner_shutdown_with_live_producers() {
        let writer = Arc::new(RecordingSampleWriter::default());
        let (producer, handle) =
            PacingScheduler::spawn(writer.clone(), PacingConfig::default(), &Handle::current());
        let other = producer.clone();

        for byte in 1..=3 {
            producer.enqueue(data(byte)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;

        let stats = handle.shutdown().await;
        assert_eq!(stats.samples_sent, 2);
        assert_eq!(stats.discarded, 1);

        assert!(other.is_closed());
        assert!(matches!(
            other.enqueue(data(4)).await,
            Err(TransportError::QueueClosed)
        ));
        assert!(matches!(
            producer.try_enqueue(data(5)),
            Err(TransportError::QueueClosed)
        ));
    }
}
