//! Product recognition workflow.
//!
//! Three modes share one camera: barcode and QR run the continuous
//! detection loop, AI vision snaps single frames on demand. Every resolved
//! product becomes the current match and goes to the top of a short
//! in-memory history.
//!
//! Phase model:
//! - **Idle**: camera off (never started, stopped, or failed)
//! - **Streaming**: camera on, nothing being decoded (AI mode)
//! - **Detecting**: loop decoding every frame
//! - **Paused**: a code was just handled; detection resumes after the
//!   debounce window or when the operator clears the match

pub mod camera;
pub mod detector;
pub mod qr;
pub mod scan_loop;
pub mod vision;

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backend::Backend;
use crate::error::{ApiResult, ScanError, VisionError};
use crate::keystore::{KeyStore, SecretKey};
use crate::models::Product;

use camera::{CameraSlot, FrameSlot};
use detector::{BoundingBox, CodeDetector, Detection};
use scan_loop::{DetectionGate, LoopConfig, LoopEvent, ScanLoopHandle};
use vision::ProductIdentifier;

pub const HISTORY_LIMIT: usize = 10;
/// How long a detected code's outline stays drawn.
pub const OVERLAY_TTL: Duration = Duration::from_millis(1500);

const EVENT_CAPACITY: usize = 32;
const LOOP_EVENT_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    #[default]
    Barcode,
    Qr,
    #[serde(rename = "ai")]
    Vision,
}

impl ScanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMode::Barcode => "barcode",
            ScanMode::Qr => "qr",
            ScanMode::Vision => "ai",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "barcode" => Some(ScanMode::Barcode),
            "qr" => Some(ScanMode::Qr),
            "ai" | "vision" => Some(ScanMode::Vision),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanPhase {
    Idle,
    Streaming,
    Detecting,
    Paused,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanMatch {
    pub product: Product,
    pub method: String,
    pub at: DateTime<Local>,
}

impl ScanMatch {
    fn now(product: Product, method: String) -> Self {
        Self {
            product,
            method,
            at: Local::now(),
        }
    }

    /// `03:45 PM`
    pub fn time_label(&self) -> String {
        self.at.format("%I:%M %p").to_string()
    }
}

/// Bounded most-recent-first match log.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct ScanHistory(VecDeque<ScanMatch>);

impl ScanHistory {
    pub fn push(&mut self, entry: ScanMatch) {
        self.0.push_front(entry);
        self.0.truncate(HISTORY_LIMIT);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScanMatch> {
        self.0.iter()
    }
}

/// Nothing in the catalog for what was scanned.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NoMatch {
    /// A code lookup came back empty; the shell offers product creation.
    Code { code: String },
    /// The AI found no catalog product; `suggestion` names what it saw.
    NotInDatabase { suggestion: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScanOutcome {
    Matched(ScanMatch),
    NotFound(NoMatch),
    /// Input was empty or not a LiveDrop code.
    Ignored,
}

/// Published to the shell on every visible change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScanEvent {
    Matched { product: Product, method: String },
    NotFound { no_match: NoMatch },
    Phase { phase: ScanPhase },
    Overlay { bbox: BoundingBox },
    Error { message: String },
}

#[derive(Debug, Clone, Copy)]
struct Overlay {
    bbox: BoundingBox,
    expires_at: Instant,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScannerView {
    pub mode: ScanMode,
    pub phase: ScanPhase,
    pub current: Option<ScanMatch>,
    pub no_match: Option<NoMatch>,
    pub history: ScanHistory,
    pub overlay: Option<BoundingBox>,
    pub last_error: Option<String>,
}

pub struct Scanner {
    mode: ScanMode,
    camera: CameraSlot,
    gate: DetectionGate,
    frames: FrameSlot,
    detection: Option<ScanLoopHandle>,
    current: Option<ScanMatch>,
    no_match: Option<NoMatch>,
    history: ScanHistory,
    overlay: Option<Overlay>,
    last_error: Option<String>,
    events: broadcast::Sender<ScanEvent>,
}

impl Scanner {
    pub fn new(camera: CameraSlot) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            mode: ScanMode::default(),
            camera,
            gate: DetectionGate::default(),
            frames: FrameSlot::default(),
            detection: None,
            current: None,
            no_match: None,
            history: ScanHistory::default(),
            overlay: None,
            last_error: None,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ScanEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    // -----------------------------------------------------------------------
    // State
    // -----------------------------------------------------------------------

    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    pub fn phase(&self) -> ScanPhase {
        match &self.detection {
            Some(handle) if handle.is_running() => {
                if self.mode == ScanMode::Vision {
                    ScanPhase::Streaming
                } else if self.gate.is_open() {
                    ScanPhase::Detecting
                } else {
                    ScanPhase::Paused
                }
            }
            _ => ScanPhase::Idle,
        }
    }

    pub fn current_match(&self) -> Option<&ScanMatch> {
        self.current.as_ref()
    }

    pub fn no_match(&self) -> Option<&NoMatch> {
        self.no_match.as_ref()
    }

    pub fn history(&self) -> &ScanHistory {
        &self.history
    }

    pub fn camera_in_use(&self) -> bool {
        self.camera.is_in_use()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Outline of the last detected code while it is still on screen.
    pub fn overlay(&self) -> Option<BoundingBox> {
        self.overlay
            .filter(|o| Instant::now() < o.expires_at)
            .map(|o| o.bbox)
    }

    pub fn view(&self) -> ScannerView {
        ScannerView {
            mode: self.mode,
            phase: self.phase(),
            current: self.current.clone(),
            no_match: self.no_match.clone(),
            history: self.history.clone(),
            overlay: self.overlay(),
            last_error: self.last_error.clone(),
        }
    }

    // -----------------------------------------------------------------------
    // Camera
    // -----------------------------------------------------------------------

    /// Switch mode. The camera stops and the current match is dropped.
    pub async fn set_mode(&mut self, mode: ScanMode) {
        if mode == self.mode {
            return;
        }
        self.stop_camera().await;
        self.mode = mode;
        self.current = None;
        self.no_match = None;
        info!(mode = mode.as_str(), "scanner mode changed");
    }

    /// Take the camera and start the detection loop. The returned receiver
    /// carries the loop's detections; feed each one to
    /// [`handle_loop_event`](Self::handle_loop_event).
    pub async fn start_camera(
        &mut self,
        detector: Box<dyn CodeDetector>,
    ) -> Result<mpsc::Receiver<LoopEvent>, ScanError> {
        self.stop_camera().await;

        let lease = match self.camera.acquire() {
            Ok(lease) => lease,
            Err(e) => {
                warn!(error = %e, "camera start failed");
                self.last_error = Some(e.to_string());
                self.emit(ScanEvent::Error {
                    message: format!("{e}. Use manual entry"),
                });
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::channel(LOOP_EVENT_CAPACITY);
        self.gate.resume();
        self.last_error = None;
        self.detection = Some(scan_loop::spawn(
            lease,
            detector,
            LoopConfig::new(self.mode),
            self.gate.clone(),
            self.frames.clone(),
            tx,
            CancellationToken::new(),
        ));
        self.emit(ScanEvent::Phase {
            phase: self.phase(),
        });
        Ok(rx)
    }

    /// Stop the loop and release the camera. Safe to call when stopped.
    pub async fn stop_camera(&mut self) {
        let Some(handle) = self.detection.take() else {
            return;
        };
        handle.stop().await;
        self.frames.clear();
        self.overlay = None;
        self.emit(ScanEvent::Phase {
            phase: ScanPhase::Idle,
        });
    }

    /// Apply one event from the detection loop.
    pub async fn handle_loop_event(
        &mut self,
        backend: &dyn Backend,
        event: LoopEvent,
    ) -> ApiResult<ScanOutcome> {
        match event {
            LoopEvent::Detected(detection) => self.handle_detection(backend, detection).await,
            LoopEvent::Stopped { error } => {
                self.detection = None;
                self.frames.clear();
                if let Some(message) = error {
                    self.last_error = Some(message.clone());
                    self.emit(ScanEvent::Error {
                        message: format!("{message}. Use manual entry"),
                    });
                }
                self.emit(ScanEvent::Phase {
                    phase: ScanPhase::Idle,
                });
                Ok(ScanOutcome::Ignored)
            }
        }
    }

    async fn handle_detection(
        &mut self,
        backend: &dyn Backend,
        detection: Detection,
    ) -> ApiResult<ScanOutcome> {
        if let Some(bbox) = detection.bbox {
            self.overlay = Some(Overlay {
                bbox,
                expires_at: Instant::now() + OVERLAY_TTL,
            });
            self.emit(ScanEvent::Overlay { bbox });
        }
        self.emit(ScanEvent::Phase {
            phase: ScanPhase::Paused,
        });
        match self.mode {
            ScanMode::Barcode => self.lookup_code(backend, &detection.text).await,
            ScanMode::Qr => self.lookup_qr(backend, &detection.text).await,
            ScanMode::Vision => Ok(ScanOutcome::Ignored),
        }
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    /// Barcode or SKU lookup; manual entry goes through here too.
    pub async fn lookup_code(&mut self, backend: &dyn Backend, code: &str) -> ApiResult<ScanOutcome> {
        let code = code.trim();
        if code.is_empty() {
            return Ok(ScanOutcome::Ignored);
        }
        let results = backend.scanner_lookup(code).await.map_err(|e| {
            warn!(code, error = %e, "code lookup failed");
            self.emit(ScanEvent::Error {
                message: format!("Lookup failed: {e}"),
            });
            e
        })?;

        match results.into_iter().next() {
            Some(product) => Ok(self.show_match(product, format!("Barcode: {code}"))),
            None => {
                info!(code, "no product for scanned code");
                Ok(self.show_no_match(NoMatch::Code {
                    code: code.to_string(),
                }))
            }
        }
    }

    /// LiveDrop label lookup. Only the id in the payload is used.
    pub async fn lookup_qr(&mut self, backend: &dyn Backend, raw: &str) -> ApiResult<ScanOutcome> {
        let Some(payload) = qr::parse(raw) else {
            self.gate.resume();
            return Ok(ScanOutcome::Ignored);
        };
        match backend.get_product(payload.product_id).await {
            Ok(product) => Ok(self.show_match(product, "QR Scan".to_string())),
            Err(e) => {
                // A label for a deleted product should not stall the loop.
                self.gate.resume();
                warn!(product_id = payload.product_id, error = %e, "QR product fetch failed");
                Err(e)
            }
        }
    }

    /// A product picked from the printable label grid.
    pub fn select_label(&mut self, product: Product) -> ScanOutcome {
        self.show_match(product, "QR Label".to_string())
    }

    /// Capture what an AI identification needs: the operator key and the
    /// newest frame as JPEG. Nothing is sent without both.
    pub fn prepare_identify(&self, keys: &dyn KeyStore) -> Result<IdentifyRequest, VisionError> {
        let request = keys
            .load()
            .ok_or(VisionError::MissingKey)
            .and_then(|api_key| {
                let frame = self.frames.get().ok_or(VisionError::NoFrame)?;
                Ok(IdentifyRequest {
                    api_key,
                    jpeg_base64: frame.to_jpeg_base64()?,
                })
            });
        if let Err(e) = &request {
            self.report_identify_error(e);
        }
        request
    }

    /// Apply the AI answer as a match or a not-in-database result.
    pub fn finish_identify(
        &mut self,
        result: Result<Identified, VisionError>,
    ) -> Result<ScanOutcome, VisionError> {
        match result {
            Ok(Identified::Product { product, method }) => Ok(self.show_match(product, method)),
            Ok(Identified::NotInDatabase { suggestion }) => {
                Ok(self.show_no_match(NoMatch::NotInDatabase { suggestion }))
            }
            Err(e) => {
                self.report_identify_error(&e);
                Err(e)
            }
        }
    }

    fn report_identify_error(&self, e: &VisionError) {
        warn!(error = %e, "AI identification failed");
        self.emit(ScanEvent::Error {
            message: e.notification(),
        });
    }

    /// Dismiss the match card and resume detection right away.
    pub fn clear_match(&mut self) {
        self.current = None;
        self.no_match = None;
        self.gate.resume();
    }

    fn show_match(&mut self, product: Product, method: String) -> ScanOutcome {
        info!(product_id = product.id, method = %method, "product matched");
        let entry = ScanMatch::now(product, method);
        self.history.push(entry.clone());
        self.current = Some(entry.clone());
        self.no_match = None;
        self.emit(ScanEvent::Matched {
            product: entry.product.clone(),
            method: entry.method.clone(),
        });
        ScanOutcome::Matched(entry)
    }

    fn show_no_match(&mut self, no_match: NoMatch) -> ScanOutcome {
        self.no_match = Some(no_match.clone());
        self.emit(ScanEvent::NotFound {
            no_match: no_match.clone(),
        });
        ScanOutcome::NotFound(no_match)
    }
}

/// Key and frame for one AI identification.
pub struct IdentifyRequest {
    api_key: SecretKey,
    jpeg_base64: String,
}

/// What the AI service recognised.
#[derive(Debug, Clone, PartialEq)]
pub enum Identified {
    Product { product: Product, method: String },
    NotInDatabase { suggestion: String },
}

/// Send `request` with the catalog and resolve the verdict to a product.
pub async fn run_identify(
    backend: &dyn Backend,
    identifier: &dyn ProductIdentifier,
    request: &IdentifyRequest,
) -> Result<Identified, VisionError> {
    let catalog = backend
        .catalog()
        .await
        .map_err(|e| VisionError::Request(e.to_string()))?;
    let verdict = identifier
        .identify(&request.api_key, &request.jpeg_base64, &catalog)
        .await?;
    match verdict.matched_id() {
        Some(id) => {
            let product = backend
                .get_product(id)
                .await
                .map_err(|e| VisionError::Request(e.to_string()))?;
            Ok(Identified::Product {
                product,
                method: verdict.method_label(),
            })
        }
        None => Ok(Identified::NotInDatabase {
            suggestion: verdict.suggestion_or_unknown(),
        }),
    }
}

/// Identify the product in the newest camera frame. The scanner stays
/// unlocked while the AI service answers, so stop and mode switches are
/// not held up.
pub async fn identify(
    scanner: &AsyncMutex<Scanner>,
    backend: &dyn Backend,
    identifier: &dyn ProductIdentifier,
    keys: &dyn KeyStore,
) -> Result<ScanOutcome, VisionError> {
    let request = scanner.lock().await.prepare_identify(keys)?;
    let result = run_identify(backend, identifier, &request).await;
    scanner.lock().await.finish_identify(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::MemoryKeyStore;
    use crate::scanner::camera::{ChannelCamera, ChannelFrameSource, Frame};
    use crate::scanner::detector::CodeKind;
    use crate::scanner::vision::VisionVerdict;
    use crate::testing::FakeBackend;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    fn product(id: i64, sku: &str) -> Product {
        Product {
            id,
            name: format!("Product {id}"),
            sku: sku.into(),
            barcode: Some(format!("89640000{id:05}")),
            price: 500.0,
            ..Default::default()
        }
    }

    fn backend() -> FakeBackend {
        let backend = FakeBackend::new();
        backend.insert_product(product(1, "MUG-01"));
        backend.insert_product(product(42, "SKU42"));
        backend
    }

    fn idle_scanner() -> Scanner {
        let (_tx, source) = ChannelFrameSource::pair(1);
        Scanner::new(CameraSlot::new(Arc::new(ChannelCamera::new(source))))
    }

    struct FakeIdentifier {
        verdict: VisionVerdict,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl ProductIdentifier for FakeIdentifier {
        async fn identify(
            &self,
            _api_key: &str,
            _jpeg_base64: &str,
            _catalog: &[Product],
        ) -> Result<VisionVerdict, VisionError> {
            *self.calls.lock().unwrap() += 1;
            Ok(self.verdict.clone())
        }
    }

    fn identifier(matched: bool, product_id: Option<i64>) -> FakeIdentifier {
        FakeIdentifier {
            verdict: VisionVerdict {
                matched,
                product_id,
                confidence: 91.0,
                reason: "shape".into(),
                suggestion: (!matched).then(|| "Steel Bottle".to_string()),
            },
            calls: Mutex::new(0),
        }
    }

    #[tokio::test]
    async fn test_barcode_match_sets_current_and_history() {
        let backend = backend();
        let mut scanner = idle_scanner();
        let outcome = scanner.lookup_code(&backend, " MUG-01 ").await.unwrap();
        let ScanOutcome::Matched(m) = outcome else {
            panic!("expected match");
        };
        assert_eq!(m.method, "Barcode: MUG-01");
        assert_eq!(scanner.current_match().unwrap().product.id, 1);
        assert_eq!(scanner.history().len(), 1);
        assert_eq!(backend.lookups(), vec!["MUG-01"]);
    }

    #[tokio::test]
    async fn test_unknown_code_is_not_found_without_history() {
        let backend = backend();
        let mut scanner = idle_scanner();
        scanner.lookup_code(&backend, "MUG-01").await.unwrap();

        let outcome = scanner.lookup_code(&backend, "0000000").await.unwrap();
        assert_eq!(
            outcome,
            ScanOutcome::NotFound(NoMatch::Code {
                code: "0000000".into()
            })
        );
        assert_eq!(scanner.history().len(), 1);
        // The previous match is still the one on the card.
        assert_eq!(scanner.current_match().unwrap().product.id, 1);
    }

    #[tokio::test]
    async fn test_manual_entry_ignores_blank_input() {
        let backend = backend();
        let mut scanner = idle_scanner();
        assert_eq!(
            scanner.lookup_code(&backend, "   ").await.unwrap(),
            ScanOutcome::Ignored
        );
        assert!(backend.lookups().is_empty());
    }

    #[tokio::test]
    async fn test_qr_payload_fetches_by_id() {
        let backend = backend();
        let mut scanner = idle_scanner();
        let outcome = scanner
            .lookup_qr(&backend, "LDDROP:42:WRONG-SKU:1")
            .await
            .unwrap();
        let ScanOutcome::Matched(m) = outcome else {
            panic!("expected match");
        };
        assert_eq!(m.product.id, 42);
        assert_eq!(m.product.sku, "SKU42");
        assert_eq!(m.method, "QR Scan");
        assert!(backend.lookups().is_empty());

        assert_eq!(
            scanner.lookup_qr(&backend, "hello").await.unwrap(),
            ScanOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn test_history_capped_most_recent_first_across_modes() {
        let backend = backend();
        let mut scanner = idle_scanner();
        for i in 0..6 {
            scanner.lookup_code(&backend, "MUG-01").await.unwrap();
            scanner
                .lookup_qr(&backend, &format!("LDDROP:42:SKU42:{i}"))
                .await
                .unwrap();
        }
        scanner.select_label(product(7, "LBL-7"));

        let history: Vec<_> = scanner.history().iter().collect();
        assert_eq!(history.len(), HISTORY_LIMIT);
        assert_eq!(history[0].method, "QR Label");
        assert_eq!(history[1].method, "QR Scan");
        assert_eq!(history[2].method, "Barcode: MUG-01");
    }

    #[tokio::test]
    async fn test_ai_requires_key_before_any_call() {
        let backend = backend();
        let scanner = AsyncMutex::new(idle_scanner());
        let ai = identifier(true, Some(1));
        let err = identify(&scanner, &backend, &ai, &MemoryKeyStore::new())
            .await
            .unwrap_err();
        assert!(matches!(err, VisionError::MissingKey));
        assert_eq!(*ai.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ai_requires_streaming_camera() {
        let backend = backend();
        let scanner = AsyncMutex::new(idle_scanner());
        let ai = identifier(true, Some(1));
        let err = identify(&scanner, &backend, &ai, &MemoryKeyStore::with_key("sk-ant-test"))
            .await
            .unwrap_err();
        assert!(matches!(err, VisionError::NoFrame));
    }

    #[tokio::test]
    async fn test_ai_match_and_not_in_database() {
        let backend = backend();
        let scanner = idle_scanner();
        scanner.frames.store(Frame::new(8, 8, vec![90; 8 * 8 * 3]).unwrap());
        let scanner = AsyncMutex::new(scanner);
        let keys = MemoryKeyStore::with_key("sk-ant-test");

        let outcome = identify(&scanner, &backend, &identifier(true, Some(42)), &keys)
            .await
            .unwrap();
        let ScanOutcome::Matched(m) = outcome else {
            panic!("expected match");
        };
        assert_eq!(m.method, "AI Vision (91%)");

        let outcome = identify(&scanner, &backend, &identifier(false, None), &keys)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ScanOutcome::NotFound(NoMatch::NotInDatabase {
                suggestion: "Steel Bottle".into()
            })
        );
        assert_eq!(scanner.lock().await.history().len(), 1);
    }

    struct SlowIdentifier;

    #[async_trait]
    impl ProductIdentifier for SlowIdentifier {
        async fn identify(
            &self,
            _api_key: &str,
            _jpeg_base64: &str,
            _catalog: &[Product],
        ) -> Result<VisionVerdict, VisionError> {
            tokio::time::sleep(Duration::from_secs(20)).await;
            Ok(VisionVerdict {
                matched: true,
                product_id: Some(1),
                confidence: 80.0,
                reason: String::new(),
                suggestion: None,
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_scanner_usable_while_ai_answers() {
        let backend = Arc::new(backend());
        let scanner = idle_scanner();
        scanner.frames.store(Frame::new(8, 8, vec![90; 8 * 8 * 3]).unwrap());
        let scanner = Arc::new(AsyncMutex::new(scanner));

        let task = tokio::spawn({
            let (scanner, backend) = (scanner.clone(), backend.clone());
            async move {
                let keys = MemoryKeyStore::with_key("sk-ant-test");
                identify(&scanner, backend.as_ref(), &SlowIdentifier, &keys).await
            }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        {
            let mut guard = scanner.try_lock().expect("scanner locked during AI call");
            guard.set_mode(ScanMode::Qr).await;
        }
        assert!(!task.is_finished());

        let outcome = task.await.unwrap().unwrap();
        assert!(matches!(outcome, ScanOutcome::Matched(_)));
        assert_eq!(scanner.lock().await.current_match().unwrap().product.id, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_camera_loop_end_to_end() {
        let backend = backend();
        let (frames_tx, source) = ChannelFrameSource::pair(4);
        let mut scanner = Scanner::new(CameraSlot::new(Arc::new(ChannelCamera::new(source))));
        let mut events = scanner.subscribe();

        struct OneShot(Option<Detection>);
        impl CodeDetector for OneShot {
            fn name(&self) -> &'static str {
                "one-shot"
            }
            fn uses_frames(&self) -> bool {
                true
            }
            fn detect(&mut self, _: Option<&Frame>) -> Result<Option<Detection>, ScanError> {
                Ok(self.0.take())
            }
        }

        let mut rx = scanner
            .start_camera(Box::new(OneShot(Some(Detection {
                text: "MUG-01".into(),
                kind: CodeKind::Linear,
                bbox: Some(BoundingBox {
                    x: 1.0,
                    y: 2.0,
                    width: 30.0,
                    height: 10.0,
                }),
            }))))
            .await
            .unwrap();
        assert_eq!(scanner.phase(), ScanPhase::Detecting);

        frames_tx.send(Frame::new(1, 1, vec![0, 0, 0]).unwrap()).await.unwrap();
        let event = rx.recv().await.unwrap();
        let outcome = scanner.handle_loop_event(&backend, event).await.unwrap();
        assert!(matches!(outcome, ScanOutcome::Matched(_)));
        assert_eq!(scanner.phase(), ScanPhase::Paused);
        assert!(scanner.overlay().is_some());

        tokio::time::sleep(OVERLAY_TTL).await;
        assert!(scanner.overlay().is_none());

        scanner.clear_match();
        assert_eq!(scanner.phase(), ScanPhase::Detecting);

        scanner.set_mode(ScanMode::Qr).await;
        assert_eq!(scanner.phase(), ScanPhase::Idle);
        assert!(scanner.current_match().is_none());

        let mut saw_match = false;
        while let Ok(event) = events.try_recv() {
            if let ScanEvent::Matched { method, .. } = event {
                assert_eq!(method, "Barcode: MUG-01");
                saw_match = true;
            }
        }
        assert!(saw_match);
    }

    #[tokio::test]
    async fn test_camera_failure_leaves_idle_with_error() {
        let (_tx, source) = ChannelFrameSource::pair(1);
        let slot = CameraSlot::new(Arc::new(ChannelCamera::new(source)));
        let _held = slot.acquire().unwrap();
        let mut scanner = Scanner::new(slot);

        let err = scanner
            .start_camera(Box::new(detector::RxingDetector::new()))
            .await;
        assert!(matches!(err, Err(ScanError::CameraBusy)));
        assert_eq!(scanner.phase(), ScanPhase::Idle);
        assert_eq!(scanner.last_error(), Some("Camera is already in use"));
    }
}
