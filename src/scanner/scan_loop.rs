//! The continuous detection loop.
//!
//! Runs as its own tokio task while the camera streams. Every tick it pulls
//! the newest frame, keeps it for AI snapshots, and (in barcode and QR
//! modes) asks the detector for a code. A detection closes the gate for the
//! debounce window so one object lingering in frame is looked up once.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::camera::{CameraLease, FrameSlot};
use super::detector::{CodeDetector, CodeKind, Detection};
use super::{qr, ScanMode};

/// How long detection stays paused after a hit.
pub const DEBOUNCE: Duration = Duration::from_millis(3500);
pub const TICK: Duration = Duration::from_millis(50);

/// Shared pause state between the loop and the scanner workflow.
#[derive(Clone, Default)]
pub struct DetectionGate {
    paused_until: Arc<Mutex<Option<Instant>>>,
}

impl DetectionGate {
    pub fn pause_for(&self, window: Duration) {
        *self.paused_until.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now() + window);
    }

    pub fn resume(&self) {
        *self.paused_until.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn is_open(&self) -> bool {
        let mut guard = self.paused_until.lock().unwrap_or_else(|e| e.into_inner());
        match *guard {
            Some(until) if Instant::now() < until => false,
            Some(_) => {
                *guard = None;
                true
            }
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopEvent {
    Detected(Detection),
    /// The loop ended on its own; `error` is set when the camera or the
    /// detector failed.
    Stopped { error: Option<String> },
}

/// Running loop. Dropping the handle cancels the task, which releases the
/// camera as it exits.
pub struct ScanLoopHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ScanLoopHandle {
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Cancel and wait for the task, so the camera is free on return.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "detection loop task failed");
            }
        }
    }
}

impl Drop for ScanLoopHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub struct LoopConfig {
    pub mode: ScanMode,
    pub tick: Duration,
    pub debounce: Duration,
}

impl LoopConfig {
    pub fn new(mode: ScanMode) -> Self {
        Self {
            mode,
            tick: TICK,
            debounce: DEBOUNCE,
        }
    }
}

/// Whether a detection is worth a lookup in `mode`.
fn accepts(mode: ScanMode, detection: &Detection) -> bool {
    match mode {
        ScanMode::Barcode => !detection.text.trim().is_empty(),
        ScanMode::Qr => detection.kind == CodeKind::Qr && qr::parse(&detection.text).is_some(),
        ScanMode::Vision => false,
    }
}

/// Start the loop. The lease and detector move into the task and are
/// released when it ends.
pub fn spawn(
    mut lease: CameraLease,
    detector: Box<dyn CodeDetector>,
    config: LoopConfig,
    gate: DetectionGate,
    frames: FrameSlot,
    events: mpsc::Sender<LoopEvent>,
    cancel: CancellationToken,
) -> ScanLoopHandle {
    let task_cancel = cancel.clone();
    let task = tokio::spawn(async move {
        let detector_name = detector.name();
        info!(mode = config.mode.as_str(), detector = detector_name, "detection loop started");
        // Empty while a cancelled decode still owns the detector.
        let mut detector = Some(detector);
        let mut ticker = tokio::time::interval(config.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut error = None;

        loop {
            tokio::select! {
                _ = task_cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let frame = match lease.latest() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "camera stream failed");
                    error = Some(e.to_string());
                    break;
                }
            };
            if let Some(frame) = &frame {
                frames.store(frame.clone());
            }

            if config.mode == ScanMode::Vision || !gate.is_open() {
                continue;
            }
            let Some(mut current) = detector.take() else {
                break;
            };
            let result = if !current.uses_frames() {
                let result = current.detect(None);
                detector = Some(current);
                result
            } else if frame.is_none() {
                detector = Some(current);
                continue;
            } else {
                // Decoding a frame is CPU bound; keep it off the runtime threads.
                let job = tokio::task::spawn_blocking(move || {
                    let result = current.detect(frame.as_ref());
                    (current, result)
                });
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    joined = job => match joined {
                        Ok((returned, result)) => {
                            detector = Some(returned);
                            result
                        }
                        Err(e) => {
                            warn!(error = %e, detector = detector_name, "detector task failed");
                            error = Some(format!("Detector crashed: {e}"));
                            break;
                        }
                    },
                }
            };

            let detection = match result {
                Ok(Some(d)) => d,
                Ok(None) => continue,
                Err(e) => {
                    warn!(error = %e, detector = detector_name, "detector failed");
                    error = Some(e.to_string());
                    break;
                }
            };
            if !accepts(config.mode, &detection) {
                debug!(code = %detection.text, "ignoring code not valid for this mode");
                continue;
            }

            debug!(code = %detection.text, "code detected, pausing detection");
            gate.pause_for(config.debounce);
            let sent = tokio::select! {
                _ = task_cancel.cancelled() => false,
                sent = events.send(LoopEvent::Detected(detection)) => sent.is_ok(),
            };
            if !sent {
                break;
            }
        }

        if let Some(mut detector) = detector {
            detector.shutdown();
        }
        drop(lease);
        frames.clear();
        if !task_cancel.is_cancelled() {
            let _ = events.send(LoopEvent::Stopped { error }).await;
        }
        info!("detection loop stopped");
    });

    ScanLoopHandle {
        cancel,
        task: Some(task),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScanError;
    use crate::scanner::camera::{ChannelCamera, ChannelFrameSource, CameraSlot, Frame};
    use std::collections::VecDeque;

    /// Emits a scripted code on every frame it is shown.
    struct ScriptedDetector {
        codes: VecDeque<Detection>,
    }

    impl CodeDetector for ScriptedDetector {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn uses_frames(&self) -> bool {
            true
        }

        fn detect(&mut self, _frame: Option<&Frame>) -> Result<Option<Detection>, ScanError> {
            Ok(self.codes.pop_front())
        }
    }

    /// Records the thread each decode runs on.
    struct ThreadRecorder {
        seen: Arc<Mutex<Vec<std::thread::ThreadId>>>,
    }

    impl CodeDetector for ThreadRecorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn uses_frames(&self) -> bool {
            true
        }

        fn detect(&mut self, _frame: Option<&Frame>) -> Result<Option<Detection>, ScanError> {
            self.seen.lock().unwrap().push(std::thread::current().id());
            Ok(None)
        }
    }

    /// Holds the decode until the test releases it.
    struct StuckDetector {
        started: mpsc::UnboundedSender<()>,
        release: std::sync::mpsc::Receiver<()>,
    }

    impl CodeDetector for StuckDetector {
        fn name(&self) -> &'static str {
            "stuck"
        }

        fn uses_frames(&self) -> bool {
            true
        }

        fn detect(&mut self, _frame: Option<&Frame>) -> Result<Option<Detection>, ScanError> {
            let _ = self.started.send(());
            let _ = self.release.recv();
            Ok(None)
        }
    }

    fn code(text: &str, kind: CodeKind) -> Detection {
        Detection {
            text: text.into(),
            kind,
            bbox: None,
        }
    }

    fn frame() -> Frame {
        Frame::new(1, 1, vec![0, 0, 0]).unwrap()
    }

    #[test]
    fn test_gate_reopens_after_window() {
        let gate = DetectionGate::default();
        assert!(gate.is_open());
        gate.pause_for(Duration::from_secs(60));
        assert!(!gate.is_open());
        gate.resume();
        assert!(gate.is_open());
        gate.pause_for(Duration::ZERO);
        assert!(gate.is_open());
    }

    #[test]
    fn test_qr_mode_accepts_only_livedrop_payloads() {
        assert!(accepts(ScanMode::Qr, &code("LDDROP:42:SKU42:999", CodeKind::Qr)));
        assert!(!accepts(ScanMode::Qr, &code("https://example.com", CodeKind::Qr)));
        assert!(!accepts(ScanMode::Qr, &code("LDDROP:42:SKU42:999", CodeKind::Linear)));
        assert!(accepts(ScanMode::Barcode, &code("8964000123456", CodeKind::Linear)));
        assert!(!accepts(ScanMode::Vision, &code("8964000123456", CodeKind::Linear)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_detection_pauses_then_stop_releases_camera() {
        let (frames_tx, source) = ChannelFrameSource::pair(8);
        let slot = CameraSlot::new(Arc::new(ChannelCamera::new(source)));
        let lease = slot.acquire().unwrap();
        let detector = Box::new(ScriptedDetector {
            codes: VecDeque::from([
                code("8964000123456", CodeKind::Linear),
                code("SECOND", CodeKind::Linear),
            ]),
        });
        let gate = DetectionGate::default();
        let (tx, mut rx) = mpsc::channel(4);
        let handle = spawn(
            lease,
            detector,
            LoopConfig::new(ScanMode::Barcode),
            gate.clone(),
            FrameSlot::default(),
            tx,
            CancellationToken::new(),
        );

        frames_tx.send(frame()).await.unwrap();
        let first = rx.recv().await.unwrap();
        assert_eq!(first, LoopEvent::Detected(code("8964000123456", CodeKind::Linear)));
        assert!(!gate.is_open());

        // Frames keep coming but the gate stays shut inside the window.
        frames_tx.send(frame()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(DEBOUNCE).await;
        frames_tx.send(frame()).await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(second, LoopEvent::Detected(code("SECOND", CodeKind::Linear)));

        assert!(slot.is_in_use());
        handle.stop().await;
        assert!(!slot.is_in_use());
    }

    #[tokio::test(start_paused = true)]
    async fn test_camera_loss_reports_stop() {
        let (frames_tx, source) = ChannelFrameSource::pair(1);
        let slot = CameraSlot::new(Arc::new(ChannelCamera::new(source)));
        let (tx, mut rx) = mpsc::channel(4);
        let _handle = spawn(
            slot.acquire().unwrap(),
            Box::new(ScriptedDetector {
                codes: VecDeque::new(),
            }),
            LoopConfig::new(ScanMode::Barcode),
            DetectionGate::default(),
            FrameSlot::default(),
            tx,
            CancellationToken::new(),
        );
        drop(frames_tx);
        match rx.recv().await.unwrap() {
            LoopEvent::Stopped { error } => assert_eq!(error.as_deref(), Some("Camera stream ended")),
            other => panic!("unexpected event {other:?}"),
        }
        tokio::task::yield_now().await;
        assert!(!slot.is_in_use());
    }

    #[tokio::test]
    async fn test_frame_decode_leaves_the_runtime_thread() {
        let (frames_tx, source) = ChannelFrameSource::pair(8);
        let slot = CameraSlot::new(Arc::new(ChannelCamera::new(source)));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (tx, _rx) = mpsc::channel(4);
        let handle = spawn(
            slot.acquire().unwrap(),
            Box::new(ThreadRecorder { seen: seen.clone() }),
            LoopConfig::new(ScanMode::Barcode),
            DetectionGate::default(),
            FrameSlot::default(),
            tx,
            CancellationToken::new(),
        );

        frames_tx.send(frame()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while seen.lock().unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("no decode ran");
        handle.stop().await;

        let runtime_thread = std::thread::current().id();
        assert!(seen.lock().unwrap().iter().all(|id| *id != runtime_thread));
    }

    #[tokio::test]
    async fn test_stop_does_not_wait_for_a_running_decode() {
        let (frames_tx, source) = ChannelFrameSource::pair(8);
        let slot = CameraSlot::new(Arc::new(ChannelCamera::new(source)));
        let (started_tx, mut started) = mpsc::unbounded_channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let (tx, _rx) = mpsc::channel(4);
        let handle = spawn(
            slot.acquire().unwrap(),
            Box::new(StuckDetector {
                started: started_tx,
                release: release_rx,
            }),
            LoopConfig::new(ScanMode::Barcode),
            DetectionGate::default(),
            FrameSlot::default(),
            tx,
            CancellationToken::new(),
        );

        frames_tx.send(frame()).await.unwrap();
        started.recv().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle.stop())
            .await
            .expect("stop waited for the decode");
        assert!(!slot.is_in_use());

        release_tx.send(()).unwrap();
    }
}
