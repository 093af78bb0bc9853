/// Session-scoped frame pipeline
///
/// Two worker threads per session:
/// - reader: pulls frames from the source, resizes them and pushes
///   `{frame_number, frame}` into the bounded ingress queue
/// - inference: batches frames by size or timeout, runs the detector once per
///   batch, stabilizes identities per frame and publishes to the bounded
///   egress queue
///
/// Both queues use retry-with-backoff when full, so nothing is dropped under
/// backpressure. The display side is a non-blocking `display_step` that the
/// caller drives from its own timer; threat scoring runs there.
use crate::assessment::ThreatAssessment;
use crate::config::{PipelineConfig, SystemConfig};
use crate::detector_trait::Detector;
use crate::display::DisplayBuffer;
use crate::error::{Result, TrackingError};
use crate::identity::IdentityStabilizer;
use crate::operator::OperatorState;
use crate::tracking::{ExternalTracker, IouTrackerAdapter};
use crate::types::{Allegiance, BoundingBox, Frame, FrameOutput, ZoneKind};
use crate::video::{resize_frame, FrameSource};
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Builds a fresh external tracker for each session
pub type TrackerFactory = Arc<dyn Fn() -> Box<dyn ExternalTracker> + Send + Sync>;

/// Counters shared with the worker threads
#[derive(Debug, Default)]
pub struct PipelineStats {
    frames_read: AtomicU64,
    batches_run: AtomicU64,
    batches_failed: AtomicU64,
    frames_dropped: AtomicU64,
    frames_published: AtomicU64,
    queue_stalls: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_read: u64,
    pub batches_run: u64,
    pub batches_failed: u64,
    pub frames_dropped: u64,
    pub frames_published: u64,
    pub queue_stalls: u64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_read: self.frames_read.load(Ordering::Relaxed),
            batches_run: self.batches_run.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_published: self.frames_published.load(Ordering::Relaxed),
            queue_stalls: self.queue_stalls.load(Ordering::Relaxed),
        }
    }
}

/// Backoff policy shared by both producers
#[derive(Debug, Clone, Copy)]
struct Backpressure {
    backoff: Duration,
    stall_warn_retries: u32,
}

impl Backpressure {
    fn from_config(config: &PipelineConfig) -> Self {
        Self {
            backoff: Duration::from_millis(config.backoff_ms),
            stall_warn_retries: config.stall_warn_retries.max(1),
        }
    }

    /// Push `item`, sleeping between retries while the queue is full.
    ///
    /// Returns false on cancellation or when the consumer is gone.
    fn push<T>(
        &self,
        tx: &Sender<T>,
        item: T,
        cancel: &AtomicBool,
        stats: &PipelineStats,
        queue: &str,
    ) -> bool {
        let mut item = item;
        let mut retries = 0_u32;
        loop {
            match tx.try_send(item) {
                Ok(()) => return true,
                Err(TrySendError::Full(back)) => {
                    if cancel.load(Ordering::SeqCst) {
                        return false;
                    }
                    item = back;
                    retries += 1;
                    if retries % self.stall_warn_retries == 0 {
                        stats.queue_stalls.fetch_add(1, Ordering::Relaxed);
                        log::warn!("{} queue stalled: still full after {} retries", queue, retries);
                    }
                    thread::sleep(self.backoff);
                }
                Err(TrySendError::Disconnected(_)) => return false,
            }
        }
    }
}

/// Worker thread with a completion signal for bounded joins
struct Worker {
    name: &'static str,
    thread: Option<thread::JoinHandle<()>>,
    /// Disconnects when the thread exits, even on panic
    done_rx: Receiver<()>,
}

impl Worker {
    fn spawn<F>(name: &'static str, body: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (done_tx, done_rx) = bounded::<()>(1);
        let thread = thread::Builder::new()
            .name(format!("mtt-{}", name))
            .spawn(move || {
                let _done = done_tx;
                body();
            })?;
        Ok(Self {
            name,
            thread: Some(thread),
            done_rx,
        })
    }

    fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Wait up to `timeout`; false if the thread is still running
    fn join_within(&mut self, timeout: Duration) -> bool {
        match self.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(thread) = self.thread.take() {
                    if thread.join().is_err() {
                        log::error!("{} worker panicked", self.name);
                    }
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
        }
    }
}

struct Session {
    id: u64,
    cancel: Arc<AtomicBool>,
    workers: Vec<Worker>,
    ingress_rx: Receiver<Frame>,
    display: DisplayBuffer,
    started: Instant,
}

/// Frame pipeline with session lifecycle, display step and operator surface
pub struct FramePipeline {
    config: SystemConfig,
    detector: Arc<Mutex<Box<dyn Detector>>>,
    tracker_factory: TrackerFactory,
    assessment: ThreatAssessment,
    session: Option<Session>,
    current: Option<FrameOutput>,
    stats: Arc<PipelineStats>,
    sessions_started: u64,
}

impl FramePipeline {
    pub fn new(
        config: SystemConfig,
        detector: Box<dyn Detector>,
        tracker_factory: TrackerFactory,
    ) -> Result<Self> {
        config.validate()?;
        log::info!(
            "Frame pipeline: detector '{}', batch_size={}, timeout={}ms, queues {}/{}",
            detector.name(),
            config.pipeline.batch_size,
            config.pipeline.batch_timeout_ms,
            config.pipeline.ingress_capacity,
            config.pipeline.egress_capacity
        );
        Ok(Self {
            assessment: ThreatAssessment::new(config.threat.clone()),
            config,
            detector: Arc::new(Mutex::new(detector)),
            tracker_factory,
            session: None,
            current: None,
            stats: Arc::new(PipelineStats::default()),
            sessions_started: 0,
        })
    }

    /// Pipeline over the built-in IoU tracker configured from `config.tracker`
    pub fn with_iou_tracker(config: SystemConfig, detector: Box<dyn Detector>) -> Result<Self> {
        let tracker_config = config.tracker.clone();
        let factory: TrackerFactory = Arc::new(move || -> Box<dyn ExternalTracker> {
            Box::new(IouTrackerAdapter::new(&tracker_config))
        });
        Self::new(config, detector, factory)
    }

    /// Stop any running session, reset all state and start reader and
    /// inference workers on `source`.
    pub fn start_session(
        &mut self,
        source: Box<dyn FrameSource>,
        display_width: u32,
        display_height: u32,
    ) -> Result<()> {
        if display_width == 0 || display_height == 0 {
            return Err(TrackingError::config(format!(
                "invalid display size {}x{}",
                display_width, display_height
            )));
        }
        if let Err(e) = self.stop_session() {
            log::warn!("Previous session did not stop cleanly: {}", e);
        }

        self.assessment.reset();
        self.current = None;
        self.stats = Arc::new(PipelineStats::default());
        self.sessions_started += 1;
        let id = self.sessions_started;

        let pipeline = self.config.pipeline.clone();
        let (ingress_tx, ingress_rx) = bounded::<Frame>(pipeline.ingress_capacity);
        let (egress_tx, egress_rx) = bounded::<FrameOutput>(pipeline.egress_capacity);
        let cancel = Arc::new(AtomicBool::new(false));
        let backpressure = Backpressure::from_config(&pipeline);

        log::info!(
            "Session {} starting on {} at {}x{}",
            id,
            source.describe(),
            display_width,
            display_height
        );

        let reader = {
            let cancel = cancel.clone();
            let stats = self.stats.clone();
            Worker::spawn("reader", move || {
                reader_loop(
                    source,
                    (display_width, display_height),
                    ingress_tx,
                    backpressure,
                    &cancel,
                    &stats,
                )
            })?
        };

        let stabilizer = IdentityStabilizer::new(
            self.config.stabilizer.clone(),
            (self.tracker_factory)(),
        );
        let inference = {
            let cancel = cancel.clone();
            let stats = self.stats.clone();
            let detector = self.detector.clone();
            let rx = ingress_rx.clone();
            let batching = BatchPolicy {
                batch_size: pipeline.batch_size,
                timeout: Duration::from_millis(pipeline.batch_timeout_ms),
            };
            Worker::spawn("inference", move || {
                inference_loop(
                    rx,
                    egress_tx,
                    detector,
                    stabilizer,
                    batching,
                    backpressure,
                    &cancel,
                    &stats,
                )
            })
        };
        let inference = match inference {
            Ok(worker) => worker,
            Err(e) => {
                cancel.store(true, Ordering::SeqCst);
                return Err(e);
            }
        };

        self.session = Some(Session {
            id,
            cancel,
            workers: vec![reader, inference],
            ingress_rx,
            display: DisplayBuffer::new(egress_rx, pipeline.reorder_window, pipeline.max_gap_wait_ticks),
            started: Instant::now(),
        });
        Ok(())
    }

    /// Cancel both workers, wait for them up to the join timeout and drain
    /// the queues. No-op without a session.
    ///
    /// Workers still running at the deadline are detached and reported as
    /// [`TrackingError::ShutdownTimeout`].
    pub fn stop_session(&mut self) -> Result<()> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        session.cancel.store(true, Ordering::SeqCst);

        let timeout_ms = self.config.pipeline.join_timeout_ms;
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let mut stuck = Vec::new();
        for worker in session.workers.iter_mut() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !worker.join_within(remaining) {
                stuck.push(worker.name.to_string());
            }
        }

        let mut drained = session.ingress_rx.try_iter().count();
        while session.display.poll().is_some() {
            drained += 1;
        }

        let stats = self.stats.snapshot();
        log::info!(
            "Session {} stopped after {:.1}s: {} read, {} published, {} dropped, {} drained",
            session.id,
            session.started.elapsed().as_secs_f32(),
            stats.frames_read,
            stats.frames_published,
            stats.frames_dropped,
            drained
        );

        if stuck.is_empty() {
            Ok(())
        } else {
            log::warn!(
                "Session {}: workers {:?} did not stop within {}ms",
                session.id,
                stuck,
                timeout_ms
            );
            Err(TrackingError::ShutdownTimeout {
                tasks: stuck,
                timeout_ms,
            })
        }
    }

    /// One display tick: adopt and score the next frame in order.
    ///
    /// Never blocks; `None` means nothing new this tick.
    pub fn display_step(&mut self) -> Option<&FrameOutput> {
        let session = self.session.as_mut()?;
        let mut frame = session.display.poll()?;
        self.assessment.assess(&mut frame.objects);
        self.current = Some(frame);
        self.current.as_ref()
    }

    /// Re-score the current frame after an operator edit while paused
    pub fn refresh_current(&mut self) -> Option<&FrameOutput> {
        let frame = self.current.as_mut()?;
        self.assessment.reassess(&mut frame.objects);
        self.current.as_ref()
    }

    pub fn current_frame(&self) -> Option<&FrameOutput> {
        self.current.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Both workers have exited and every published frame was displayed
    pub fn is_exhausted(&self) -> bool {
        self.session
            .as_ref()
            .map_or(true, |s| s.workers.iter().all(Worker::is_finished) && s.display.is_drained())
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Frames the display gave up on because they never arrived
    pub fn frames_skipped(&self) -> u64 {
        self.session.as_ref().map_or(0, |s| s.display.frames_skipped())
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn operator(&self) -> &OperatorState {
        self.assessment.operator()
    }

    pub fn set_allegiance(&mut self, app_id: u32, status: Allegiance) {
        self.assessment.operator_mut().set_allegiance(app_id, status);
    }

    pub fn mark_selected(&mut self, status: Allegiance) -> usize {
        self.assessment.operator_mut().set_selected_allegiance(status)
    }

    pub fn reset_status(&mut self, app_id: u32) {
        self.assessment.operator_mut().reset_status(app_id);
    }

    pub fn select(&mut self, app_id: u32) {
        self.assessment.operator_mut().select(app_id);
    }

    /// Select the object of the current frame under a click
    pub fn select_at(&mut self, x: f32, y: f32) -> Option<u32> {
        let objects = self
            .current
            .as_ref()
            .map(|frame| frame.objects.as_slice())
            .unwrap_or(&[]);
        self.assessment.operator_mut().select_at(x, y, objects)
    }

    /// Select objects of the current frame touching `region`
    pub fn select_in_region(&mut self, region: BoundingBox) -> Vec<u32> {
        let objects = self
            .current
            .as_ref()
            .map(|frame| frame.objects.as_slice())
            .unwrap_or(&[]);
        self.assessment.operator_mut().select_in_region(region, objects)
    }

    pub fn clear_selection(&mut self) {
        self.assessment.operator_mut().clear_selection();
    }

    pub fn add_zone(&mut self, kind: ZoneKind, rect: BoundingBox) {
        self.assessment.operator_mut().add_zone(kind, rect);
    }

    pub fn clear_zones(&mut self) {
        self.assessment.operator_mut().clear_zones();
    }
}

impl Drop for FramePipeline {
    fn drop(&mut self) {
        if let Err(e) = self.stop_session() {
            log::warn!("Frame pipeline dropped with running workers: {}", e);
        }
    }
}

fn reader_loop(
    mut source: Box<dyn FrameSource>,
    (width, height): (u32, u32),
    ingress_tx: Sender<Frame>,
    backpressure: Backpressure,
    cancel: &AtomicBool,
    stats: &PipelineStats,
) {
    log::info!("Reader started: {}", source.describe());
    let mut frame_number = 0_u64;

    while !cancel.load(Ordering::SeqCst) {
        let image = match source.next_frame() {
            Ok(Some(image)) => image,
            Ok(None) => {
                log::info!("Reader reached end of stream after {} frames", frame_number);
                break;
            }
            Err(e) => {
                log::warn!("Decode failed at frame {}, ending stream: {}", frame_number, e);
                break;
            }
        };

        let frame = Frame::new(frame_number, resize_frame(image, width, height));
        if !backpressure.push(&ingress_tx, frame, cancel, stats, "ingress") {
            break;
        }
        stats.frames_read.fetch_add(1, Ordering::Relaxed);
        frame_number += 1;
    }

    log::debug!("Reader stopped at frame {}", frame_number);
}

#[derive(Debug, Clone, Copy)]
struct BatchPolicy {
    batch_size: usize,
    timeout: Duration,
}

#[allow(clippy::too_many_arguments)]
fn inference_loop(
    ingress_rx: Receiver<Frame>,
    egress_tx: Sender<FrameOutput>,
    detector: Arc<Mutex<Box<dyn Detector>>>,
    mut stabilizer: IdentityStabilizer,
    policy: BatchPolicy,
    backpressure: Backpressure,
    cancel: &AtomicBool,
    stats: &PipelineStats,
) {
    log::info!("Inference worker started");
    let mut batch: Vec<Frame> = Vec::with_capacity(policy.batch_size);
    let mut batch_start: Option<Instant> = None;

    loop {
        if cancel.load(Ordering::SeqCst) {
            break;
        }

        // Empty batch: wait a full timeout so cancellation is still polled
        let wait = batch_start
            .map(|start| policy.timeout.saturating_sub(start.elapsed()))
            .unwrap_or(policy.timeout);

        let keep_going = match ingress_rx.recv_timeout(wait) {
            Ok(frame) => {
                if batch.is_empty() {
                    batch_start = Some(Instant::now());
                }
                batch.push(frame);
                if batch.len() >= policy.batch_size {
                    batch_start = None;
                    run_batch(&mut batch, &detector, &mut stabilizer, &egress_tx, backpressure, cancel, stats)
                } else {
                    true
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if batch.is_empty() {
                    true
                } else {
                    batch_start = None;
                    run_batch(&mut batch, &detector, &mut stabilizer, &egress_tx, backpressure, cancel, stats)
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                if !batch.is_empty() {
                    run_batch(&mut batch, &detector, &mut stabilizer, &egress_tx, backpressure, cancel, stats);
                }
                false
            }
        };

        if !keep_going {
            break;
        }
    }

    log::info!("Inference worker stopped");
}

/// Detect, stabilize and publish one batch. False when publishing was cut
/// short by cancellation or a closed egress queue.
fn run_batch(
    batch: &mut Vec<Frame>,
    detector: &Mutex<Box<dyn Detector>>,
    stabilizer: &mut IdentityStabilizer,
    egress_tx: &Sender<FrameOutput>,
    backpressure: Backpressure,
    cancel: &AtomicBool,
    stats: &PipelineStats,
) -> bool {
    let frames = std::mem::take(batch);
    let (Some(first), Some(last)) = (frames.first(), frames.last()) else {
        return true;
    };
    let (first, last) = (first.frame_number, last.frame_number);
    let batch_start = Instant::now();

    let result = {
        let mut guard = match detector.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        catch_unwind(AssertUnwindSafe(|| guard.detect_batch(&frames)))
    };

    let detections = match result {
        Ok(Ok(detections)) if detections.len() == frames.len() => detections,
        Ok(Ok(detections)) => {
            drop_batch(
                stats,
                first,
                last,
                frames.len(),
                &format!("detector returned {} results for {} frames", detections.len(), frames.len()),
            );
            return true;
        }
        Ok(Err(e)) => {
            drop_batch(stats, first, last, frames.len(), &e.to_string());
            return true;
        }
        Err(_) => {
            drop_batch(stats, first, last, frames.len(), "detector panicked");
            return true;
        }
    };

    stats.batches_run.fetch_add(1, Ordering::Relaxed);
    log::debug!(
        "Batch {}..={} detected in {:.1}ms",
        first,
        last,
        batch_start.elapsed().as_secs_f32() * 1000.0
    );

    for (frame, frame_detections) in frames.into_iter().zip(detections) {
        let objects = match stabilizer.update(&frame, &frame_detections) {
            Ok(objects) => objects,
            Err(e) => {
                log::error!("Tracking failed on frame {}: {}", frame.frame_number, e);
                stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };

        let output = FrameOutput {
            frame_number: frame.frame_number,
            image: frame.image,
            objects,
        };
        if !backpressure.push(egress_tx, output, cancel, stats, "egress") {
            return false;
        }

        let published = stats.frames_published.fetch_add(1, Ordering::Relaxed) + 1;
        if published % 100 == 0 {
            let s = stats.snapshot();
            log::info!(
                "Pipeline stats: {} read, {} published, {} batches ({} failed), {} dropped, {} stalls, {} live ids",
                s.frames_read,
                s.frames_published,
                s.batches_run,
                s.batches_failed,
                s.frames_dropped,
                s.queue_stalls,
                stabilizer.num_live()
            );
        }
    }
    true
}

fn drop_batch(stats: &PipelineStats, first: u64, last: u64, len: usize, reason: &str) {
    stats.batches_failed.fetch_add(1, Ordering::Relaxed);
    stats.frames_dropped.fetch_add(len as u64, Ordering::Relaxed);
    log::error!("Batch {}..={} dropped ({} frames): {}", first, last, len, reason);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector_replay::ReplayDetector;
    use crate::types::Detection;
    use crate::video::MemoryFrameSource;
    use approx::assert_abs_diff_eq;
    use std::collections::BTreeMap;

    fn test_config() -> SystemConfig {
        let mut config = SystemConfig::default();
        config.pipeline.batch_size = 4;
        config.pipeline.batch_timeout_ms = 20;
        config.pipeline.ingress_capacity = 4;
        config.pipeline.egress_capacity = 4;
        config.pipeline.backoff_ms = 1;
        config.pipeline.max_gap_wait_ticks = 3;
        config.pipeline.join_timeout_ms = 1000;
        config
    }

    /// One tank drifting right by 2 px per frame
    fn tank_recording(frames: u64) -> BTreeMap<u64, Vec<Detection>> {
        (0..frames)
            .map(|n| {
                let x = 100.0 + 2.0 * n as f32;
                let det = Detection::new(BoundingBox::new(x, 100.0, x + 40.0, 140.0), 0.9, "Tank");
                (n, vec![det])
            })
            .collect()
    }

    /// Fails (or panics) on any batch containing `bad_frame`
    struct FlakyDetector {
        inner: ReplayDetector,
        bad_frame: u64,
        panic: bool,
    }

    impl Detector for FlakyDetector {
        fn detect_batch(&mut self, frames: &[Frame]) -> Result<Vec<Vec<Detection>>> {
            if frames.iter().any(|f| f.frame_number == self.bad_frame) {
                if self.panic {
                    panic!("detector blew up");
                }
                return Err(TrackingError::inference("device lost"));
            }
            self.inner.detect_batch(frames)
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    struct SlowDetector {
        delay: Duration,
    }

    impl Detector for SlowDetector {
        fn detect_batch(&mut self, frames: &[Frame]) -> Result<Vec<Vec<Detection>>> {
            thread::sleep(self.delay);
            Ok(vec![Vec::new(); frames.len()])
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    /// Drive the display until the session is exhausted or `limit` passes
    fn collect(pipeline: &mut FramePipeline, limit: Duration) -> Vec<FrameOutput> {
        let deadline = Instant::now() + limit;
        let mut seen = Vec::new();
        while Instant::now() < deadline {
            if let Some(frame) = pipeline.display_step().cloned() {
                seen.push(frame);
            } else if pipeline.is_exhausted() {
                break;
            } else {
                thread::sleep(Duration::from_millis(2));
            }
        }
        seen
    }

    fn assert_strictly_increasing(frames: &[FrameOutput]) {
        for pair in frames.windows(2) {
            assert!(
                pair[0].frame_number < pair[1].frame_number,
                "{} then {}",
                pair[0].frame_number,
                pair[1].frame_number
            );
        }
    }

    #[test]
    fn test_end_to_end_in_order() {
        let detector = ReplayDetector::new(tank_recording(20));
        let mut pipeline = FramePipeline::with_iou_tracker(test_config(), Box::new(detector)).unwrap();
        pipeline
            .start_session(Box::new(MemoryFrameSource::blank(20, 64, 48)), 32, 24)
            .unwrap();

        let frames = collect(&mut pipeline, Duration::from_secs(10));
        let numbers: Vec<u64> = frames.iter().map(|f| f.frame_number).collect();
        assert_eq!(numbers, (0..20).collect::<Vec<_>>());
        assert_eq!(frames[0].image.dimensions(), (32, 24));

        for frame in &frames {
            assert_eq!(frame.objects.len(), 1);
            let tank = &frame.objects[0];
            assert_eq!(tank.app_id, 1);
            assert_eq!(tank.class_name, "Tank");
            assert_abs_diff_eq!(tank.threat_level, 4.0, epsilon = 1e-4);
        }

        let stats = pipeline.stats();
        assert_eq!(stats.frames_read, 20);
        assert_eq!(stats.frames_published, 20);
        assert_eq!(stats.frames_dropped, 0);
        assert_eq!(pipeline.current_frame().map(|f| f.frame_number), Some(19));
        assert!(pipeline.stop_session().is_ok());
    }

    #[test]
    fn test_failed_batch_is_dropped_not_fatal() {
        for panic in [false, true] {
            let detector = FlakyDetector {
                inner: ReplayDetector::new(tank_recording(16)),
                bad_frame: 5,
                panic,
            };
            let mut pipeline = FramePipeline::with_iou_tracker(test_config(), Box::new(detector)).unwrap();
            pipeline
                .start_session(Box::new(MemoryFrameSource::blank(16, 8, 8)), 8, 8)
                .unwrap();

            let frames = collect(&mut pipeline, Duration::from_secs(10));
            assert_strictly_increasing(&frames);
            assert!(frames.iter().all(|f| f.frame_number != 5));
            assert_eq!(frames.last().map(|f| f.frame_number), Some(15));

            let stats = pipeline.stats();
            assert_eq!(stats.batches_failed, 1);
            assert_eq!(frames.len() as u64 + stats.frames_dropped, 16);
        }
    }

    #[test]
    fn test_backpressure_blocks_then_delivers_everything() {
        let mut config = test_config();
        config.pipeline.ingress_capacity = 2;
        config.pipeline.egress_capacity = 2;
        config.pipeline.stall_warn_retries = 10;
        let detector = ReplayDetector::new(BTreeMap::new());
        let mut pipeline = FramePipeline::with_iou_tracker(config, Box::new(detector)).unwrap();
        pipeline
            .start_session(Box::new(MemoryFrameSource::blank(30, 4, 4)), 4, 4)
            .unwrap();

        // Display consumer stalled
        thread::sleep(Duration::from_millis(300));
        let stalled = pipeline.stats();
        assert!(stalled.frames_read < 30);
        assert!(stalled.frames_published <= 3);
        assert!(stalled.queue_stalls >= 1);
        assert_eq!(stalled.frames_dropped, 0);

        let frames = collect(&mut pipeline, Duration::from_secs(10));
        let numbers: Vec<u64> = frames.iter().map(|f| f.frame_number).collect();
        assert_eq!(numbers, (0..30).collect::<Vec<_>>());
        assert_eq!(pipeline.stats().frames_dropped, 0);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let detector = ReplayDetector::new(BTreeMap::new());
        let mut pipeline = FramePipeline::with_iou_tracker(test_config(), Box::new(detector)).unwrap();
        assert!(pipeline.stop_session().is_ok());

        pipeline
            .start_session(Box::new(MemoryFrameSource::blank(10_000, 4, 4)), 4, 4)
            .unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(pipeline.stop_session().is_ok());
        assert!(pipeline.stop_session().is_ok());
        assert!(!pipeline.is_active());
        assert!(pipeline.display_step().is_none());
    }

    #[test]
    fn test_shutdown_timeout_reported() {
        let mut config = test_config();
        config.pipeline.join_timeout_ms = 50;
        config.pipeline.batch_size = 1;
        let detector = SlowDetector {
            delay: Duration::from_millis(500),
        };
        let mut pipeline = FramePipeline::with_iou_tracker(config, Box::new(detector)).unwrap();
        pipeline
            .start_session(Box::new(MemoryFrameSource::blank(4, 4, 4)), 4, 4)
            .unwrap();
        thread::sleep(Duration::from_millis(50));

        match pipeline.stop_session() {
            Err(TrackingError::ShutdownTimeout { tasks, timeout_ms }) => {
                assert_eq!(tasks, vec!["inference".to_string()]);
                assert_eq!(timeout_ms, 50);
            }
            other => panic!("expected shutdown timeout, got {:?}", other),
        }
        // Not fatal: the pipeline is usable again
        assert!(!pipeline.is_active());
        assert!(pipeline.stop_session().is_ok());
    }

    #[test]
    fn test_start_resets_operator_state() {
        let detector = ReplayDetector::new(tank_recording(8));
        let mut pipeline = FramePipeline::with_iou_tracker(test_config(), Box::new(detector)).unwrap();
        pipeline.add_zone(ZoneKind::Friendly, BoundingBox::new(0.0, 0.0, 10.0, 10.0));
        pipeline.set_allegiance(1, Allegiance::Foe);

        pipeline
            .start_session(Box::new(MemoryFrameSource::blank(8, 4, 4)), 320, 240)
            .unwrap();
        assert!(pipeline.operator().zones().is_empty());
        assert!(pipeline.operator().record(1).is_none());

        let frames = collect(&mut pipeline, Duration::from_secs(10));
        assert_eq!(frames.len(), 8);

        // Operator marks become visible on the next scoring pass
        pipeline.set_allegiance(1, Allegiance::Foe);
        let rescored = pipeline.refresh_current().unwrap();
        assert_abs_diff_eq!(rescored.objects[0].threat_level, 8.0, epsilon = 1e-4);

        let selected = pipeline.select_in_region(BoundingBox::new(0.0, 0.0, 320.0, 240.0));
        assert_eq!(selected, vec![1]);
        assert_eq!(pipeline.mark_selected(Allegiance::Friend), 1);
        assert_eq!(pipeline.refresh_current().unwrap().objects[0].threat_level, 0.0);

        // Click on the tank, then on empty ground
        assert_eq!(pipeline.select_at(130.0, 120.0), Some(1));
        assert_eq!(pipeline.operator().selected_ids(), vec![1]);
        assert_eq!(pipeline.select_at(5.0, 5.0), None);
        assert!(pipeline.operator().selected_ids().is_empty());
    }

    #[test]
    fn test_rejects_zero_display_size() {
        let detector = ReplayDetector::new(BTreeMap::new());
        let mut pipeline = FramePipeline::with_iou_tracker(test_config(), Box::new(detector)).unwrap();
        let result = pipeline.start_session(Box::new(MemoryFrameSource::blank(1, 4, 4)), 0, 4);
        assert!(matches!(result, Err(TrackingError::ConfigError(_))));
        assert!(!pipeline.is_active());
    }
}
