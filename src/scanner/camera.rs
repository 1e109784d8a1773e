//! Camera frames and the exclusive camera lease.
//!
//! The shell owns the capture device and pushes RGB frames into a channel;
//! the scanner pulls the newest one per tick. Only one lease on the camera
//! can exist at a time and dropping it releases the device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use base64::Engine;
use image::ImageEncoder;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{ScanError, VisionError};

/// JPEG quality for AI snapshots.
const SNAPSHOT_QUALITY: u8 = 80;

/// One RGB8 frame, row-major.
#[derive(Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.rgb.len())
            .finish()
    }
}

impl Frame {
    pub fn new(width: u32, height: u32, rgb: Vec<u8>) -> Result<Self, ScanError> {
        let expected = width as usize * height as usize * 3;
        if width == 0 || height == 0 || rgb.len() != expected {
            return Err(ScanError::CameraUnavailable(format!(
                "bad frame: {width}x{height} with {} bytes",
                rgb.len()
            )));
        }
        Ok(Self { width, height, rgb })
    }

    /// 8-bit luminance plane (BT.601 weights) for the decoder.
    pub fn luma(&self) -> Vec<u8> {
        self.rgb
            .chunks_exact(3)
            .map(|px| {
                let y = 299 * u32::from(px[0]) + 587 * u32::from(px[1]) + 114 * u32::from(px[2]);
                (y / 1000) as u8
            })
            .collect()
    }

    pub fn to_jpeg(&self) -> Result<Vec<u8>, VisionError> {
        let mut jpeg = Vec::new();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, SNAPSHOT_QUALITY)
            .write_image(
                &self.rgb,
                self.width,
                self.height,
                image::ExtendedColorType::Rgb8,
            )
            .map_err(|e| VisionError::Encode(e.to_string()))?;
        Ok(jpeg)
    }

    pub fn to_jpeg_base64(&self) -> Result<String, VisionError> {
        Ok(base64::engine::general_purpose::STANDARD.encode(self.to_jpeg()?))
    }
}

// ---------------------------------------------------------------------------
// Frame sources
// ---------------------------------------------------------------------------

pub trait FrameSource: Send {
    /// Newest frame since the last call, or `None` if nothing new arrived.
    fn latest(&mut self) -> Result<Option<Frame>, ScanError>;
}

/// Frames pushed by the shell over a bounded channel.
pub struct ChannelFrameSource {
    rx: mpsc::Receiver<Frame>,
}

impl ChannelFrameSource {
    /// A source plus the sender the capture side feeds.
    pub fn pair(buffer: usize) -> (mpsc::Sender<Frame>, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (tx, Self { rx })
    }
}

impl FrameSource for ChannelFrameSource {
    fn latest(&mut self) -> Result<Option<Frame>, ScanError> {
        let mut newest = None;
        loop {
            match self.rx.try_recv() {
                Ok(frame) => newest = Some(frame),
                Err(mpsc::error::TryRecvError::Empty) => return Ok(newest),
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    return match newest {
                        Some(frame) => Ok(Some(frame)),
                        None => Err(ScanError::CameraClosed),
                    };
                }
            }
        }
    }
}

/// Opens the capture device. Implemented by the shell.
pub trait CameraDevice: Send + Sync {
    fn open(&self) -> Result<Box<dyn FrameSource>, ScanError>;
}

/// A device whose frames come from a channel the shell feeds.
pub struct ChannelCamera {
    source: Mutex<Option<ChannelFrameSource>>,
}

impl ChannelCamera {
    pub fn new(source: ChannelFrameSource) -> Self {
        Self {
            source: Mutex::new(Some(source)),
        }
    }

    /// Hand the device a fresh channel after the previous one was consumed.
    pub fn replace(&self, source: ChannelFrameSource) {
        *self.source.lock().unwrap_or_else(|e| e.into_inner()) = Some(source);
    }
}

impl CameraDevice for ChannelCamera {
    fn open(&self) -> Result<Box<dyn FrameSource>, ScanError> {
        self.source
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .map(|s| Box::new(s) as Box<dyn FrameSource>)
            .ok_or_else(|| ScanError::CameraUnavailable("no capture stream attached".into()))
    }
}

// ---------------------------------------------------------------------------
// Exclusive access
// ---------------------------------------------------------------------------

/// The one camera in the process. Clones share the in-use flag.
#[derive(Clone)]
pub struct CameraSlot {
    device: Arc<dyn CameraDevice>,
    in_use: Arc<AtomicBool>,
}

impl CameraSlot {
    pub fn new(device: Arc<dyn CameraDevice>) -> Self {
        Self {
            device,
            in_use: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_in_use(&self) -> bool {
        self.in_use.load(Ordering::SeqCst)
    }

    /// Take the camera. Fails with `CameraBusy` while another lease lives.
    pub fn acquire(&self) -> Result<CameraLease, ScanError> {
        if self
            .in_use
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ScanError::CameraBusy);
        }
        match self.device.open() {
            Ok(source) => {
                info!("camera acquired");
                Ok(CameraLease {
                    source,
                    in_use: Arc::clone(&self.in_use),
                })
            }
            Err(e) => {
                self.in_use.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }
}

/// Exclusive camera access. Released on drop.
pub struct CameraLease {
    source: Box<dyn FrameSource>,
    in_use: Arc<AtomicBool>,
}

impl CameraLease {
    pub fn latest(&mut self) -> Result<Option<Frame>, ScanError> {
        self.source.latest()
    }
}

impl Drop for CameraLease {
    fn drop(&mut self) {
        self.in_use.store(false, Ordering::SeqCst);
        debug!("camera released");
    }
}

/// Most recent frame seen by the detection loop, read by AI snapshots.
#[derive(Clone, Default)]
pub struct FrameSlot(Arc<Mutex<Option<Frame>>>);

impl FrameSlot {
    pub fn store(&self, frame: Frame) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = Some(frame);
    }

    pub fn get(&self) -> Option<Frame> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear(&self) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}
