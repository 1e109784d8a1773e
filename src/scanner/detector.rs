//! Code detectors.
//!
//! Two backends sit behind [`CodeDetector`]: the bundled `rxing` decoder
//! working on camera frames, and a hardware barcode scanner on a serial
//! port. Which one runs is a configuration choice ([`DetectorBackend`]),
//! never discovered at runtime.

use std::io::Read;
use std::time::Duration;

use rxing::BarcodeFormat;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, DetectorBackend};
use crate::error::ScanError;

use super::camera::Frame;

/// Accepted scanner line length.
const MIN_CODE_LEN: usize = 3;
const MAX_CODE_LEN: usize = 50;
/// Serial line buffer cap; anything longer is line noise.
const MAX_LINE_BUF: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeKind {
    Linear,
    Qr,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    /// Smallest box around the decoder's result points.
    pub fn around(points: impl IntoIterator<Item = (f32, f32)>) -> Option<Self> {
        let mut iter = points.into_iter();
        let (x0, y0) = iter.next()?;
        let (min_x, min_y, max_x, max_y) = iter.fold((x0, y0, x0, y0), |(a, b, c, d), (x, y)| {
            (a.min(x), b.min(y), c.max(x), d.max(y))
        });
        Some(Self {
            x: min_x,
            y: min_y,
            width: max_x - min_x,
            height: max_y - min_y,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub text: String,
    pub kind: CodeKind,
    /// Where the code sits in the frame; hardware scanners have none.
    pub bbox: Option<BoundingBox>,
}

pub trait CodeDetector: Send {
    fn name(&self) -> &'static str;

    /// Whether [`detect`](Self::detect) looks at camera frames at all.
    fn uses_frames(&self) -> bool;

    /// Decode at most one code. `frame` is the newest camera frame, if any.
    /// Frame decoders run on the blocking pool, so this may take a while.
    fn detect(&mut self, frame: Option<&Frame>) -> Result<Option<Detection>, ScanError>;

    /// Release hardware. Called once when the detection loop ends.
    fn shutdown(&mut self) {}
}

/// Build the configured detector.
pub fn from_config(config: &AppConfig) -> Result<Box<dyn CodeDetector>, ScanError> {
    match config.detector {
        DetectorBackend::Bundled => Ok(Box::new(RxingDetector::new())),
        DetectorBackend::Serial => Ok(Box::new(SerialScanDetector::open(
            &config.scanner_port,
            config.scanner_baud_rate,
        )?)),
    }
}

// ---------------------------------------------------------------------------
// Bundled decoder
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct RxingDetector;

impl RxingDetector {
    pub fn new() -> Self {
        Self
    }
}

impl CodeDetector for RxingDetector {
    fn name(&self) -> &'static str {
        "bundled"
    }

    fn uses_frames(&self) -> bool {
        true
    }

    fn detect(&mut self, frame: Option<&Frame>) -> Result<Option<Detection>, ScanError> {
        let Some(frame) = frame else {
            return Ok(None);
        };
        match rxing::helpers::detect_in_luma(frame.luma(), frame.width, frame.height, None) {
            Ok(result) => {
                let kind = if *result.getBarcodeFormat() == BarcodeFormat::QR_CODE {
                    CodeKind::Qr
                } else {
                    CodeKind::Linear
                };
                let bbox = BoundingBox::around(result.getPoints().iter().map(|p| (p.x, p.y)));
                Ok(Some(Detection {
                    text: result.getText().to_string(),
                    kind,
                    bbox,
                }))
            }
            // Not finding a code in a frame is the common case.
            Err(_) => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Serial hardware scanner
// ---------------------------------------------------------------------------

/// A serial/COM barcode scanner. A blocking reader thread splits the byte
/// stream into lines; `detect` drains whatever codes have arrived.
pub struct SerialScanDetector {
    codes: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
    port: String,
}

impl SerialScanDetector {
    pub fn open(port: &str, baud_rate: u32) -> Result<Self, ScanError> {
        let serial = serialport::new(port, baud_rate)
            .timeout(Duration::from_millis(200))
            .open()
            .map_err(|e| ScanError::Serial(format!("Failed to open {port}: {e}")))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let reader_cancel = cancel.clone();
        let port_name = port.to_string();
        std::thread::spawn(move || read_lines(serial, tx, reader_cancel, port_name));

        info!(port, baud_rate, "serial scanner opened");
        Ok(Self {
            codes: rx,
            cancel,
            port: port.to_string(),
        })
    }
}

fn read_lines(
    mut serial: Box<dyn serialport::SerialPort>,
    tx: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
    port: String,
) {
    let mut buf = [0u8; 256];
    let mut line_buf = LineBuffer::default();
    while !cancel.is_cancelled() {
        match serial.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                for code in line_buf.push(&String::from_utf8_lossy(&buf[..n])) {
                    debug!(port = %port, code = %code, "serial scanner: code read");
                    if tx.send(code).is_err() {
                        return;
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                warn!(port = %port, error = %e, "serial scanner read error");
                std::thread::sleep(Duration::from_secs(1));
            }
        }
    }
    info!(port = %port, "serial scanner reader stopped");
}

impl CodeDetector for SerialScanDetector {
    fn name(&self) -> &'static str {
        "serial"
    }

    fn uses_frames(&self) -> bool {
        false
    }

    fn detect(&mut self, _frame: Option<&Frame>) -> Result<Option<Detection>, ScanError> {
        match self.codes.try_recv() {
            Ok(text) => Ok(Some(Detection {
                text,
                kind: CodeKind::Linear,
                bbox: None,
            })),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(ScanError::Serial(format!(
                "reader for {} stopped",
                self.port
            ))),
        }
    }

    fn shutdown(&mut self) {
        self.cancel.cancel();
    }
}

impl Drop for SerialScanDetector {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Accumulates serial bytes and yields complete, plausible codes.
#[derive(Debug, Default)]
struct LineBuffer {
    buf: String,
}

impl LineBuffer {
    fn push(&mut self, data: &str) -> Vec<String> {
        self.buf.push_str(data);
        let mut codes = Vec::new();
        while let Some(pos) = self.buf.find(['\n', '\r']) {
            let code = self.buf[..pos].trim().to_string();
            self.buf.drain(..=pos);
            if (MIN_CODE_LEN..=MAX_CODE_LEN).contains(&code.len()) {
                codes.push(code);
            }
        }
        if self.buf.len() > MAX_LINE_BUF {
            self.buf.clear();
        }
        codes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_buffer_splits_and_filters() {
        let mut lines = LineBuffer::default();
        assert!(lines.push("8964000").is_empty());
        assert_eq!(lines.push("123456\r\nAB\n"), vec!["8964000123456"]);
        assert_eq!(lines.push("SKU-42\n"), vec!["SKU-42"]);
        let long = "X".repeat(60);
        assert!(lines.push(&format!("{long}\n")).is_empty());
    }

    #[test]
    fn test_line_buffer_drops_runaway_input() {
        let mut lines = LineBuffer::default();
        lines.push(&"9".repeat(600));
        assert!(lines.buf.is_empty());
    }

    #[test]
    fn test_bounding_box_around_points() {
        let bbox = BoundingBox::around([(10.0, 40.0), (90.0, 40.0), (90.0, 60.0), (10.0, 60.0)])
            .unwrap();
        assert_eq!(bbox.x, 10.0);
        assert_eq!(bbox.width, 80.0);
        assert_eq!(bbox.height, 20.0);
        assert!(BoundingBox::around(Vec::new()).is_none());
    }

    #[test]
    fn test_from_config_bundled_uses_frames() {
        let detector = from_config(&AppConfig::default()).unwrap();
        assert_eq!(detector.name(), "bundled");
        assert!(detector.uses_frames());
    }

    #[test]
    fn test_serial_backend_reports_missing_port() {
        let config = AppConfig {
            detector: DetectorBackend::Serial,
            scanner_port: "/dev/livedrop-no-such-port".into(),
            ..Default::default()
        };
        assert!(matches!(from_config(&config), Err(ScanError::Serial(_))));
    }

    #[test]
    fn test_bundled_detector_finds_nothing_in_blank_frame() {
        let frame = Frame::new(64, 64, vec![255; 64 * 64 * 3]).unwrap();
        let mut detector = RxingDetector::new();
        assert_eq!(detector.detect(Some(&frame)).unwrap(), None);
        assert_eq!(detector.detect(None).unwrap(), None);
    }

    #[test]
    fn test_bundled_detector_reads_rendered_label() {
        let png = crate::scanner::qr::render_png("LDDROP:42:SKU42:999").unwrap();
        let img = image::load_from_memory(&png).unwrap().to_rgb8();
        let frame = Frame::new(img.width(), img.height(), img.into_raw()).unwrap();
        let detection = RxingDetector::new().detect(Some(&frame)).unwrap().unwrap();
        assert_eq!(detection.text, "LDDROP:42:SKU42:999");
        assert_eq!(detection.kind, CodeKind::Qr);
        assert!(detection.bbox.is_some());
    }
}
