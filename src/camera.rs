use crate::config::CameraConfig;
use crate::error::CameraError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tracing::{debug, info};

/// A raw frame handed back by the camera collaborator.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Packed RGB24 pixel data, row-major
    pub data: Vec<u8>,
    /// Capture time
    pub timestamp: SystemTime,
}

impl Frame {
    pub fn expected_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 3
    }
}

/// The camera collaborator. Implementations wrap an external capture and
/// encoding driver; the crate only owns the handle's lifecycle.
///
/// Exclusivity contract: at any time the camera belongs to either the
/// recorder or the autonomy loop, never both. Callers release the device
/// with `close` before the next owner calls `open`; an `open` on a device
/// that was never released fails with `CameraError::Busy`.
#[async_trait]
pub trait CameraDriver: Send + Sync {
    /// Open the device and apply capture settings.
    async fn open(&self, config: &CameraConfig) -> Result<(), CameraError>;

    /// Release the device. Closing an already-closed camera is a no-op.
    async fn close(&self) -> Result<(), CameraError>;

    /// Capture a single frame. Runs to completion once started; it is not
    /// cancellable mid-flight.
    async fn capture_frame(&self) -> Result<Frame, CameraError>;

    /// Start encoding video to `path`.
    async fn start_recording(&self, path: &Path, quality: u32) -> Result<(), CameraError>;

    /// Finalize the video file started by `start_recording`.
    async fn stop_recording(&self) -> Result<(), CameraError>;

    /// Whether a video recording is currently in progress.
    fn is_recording(&self) -> bool;
}

/// Software stand-in for the hardware camera, used by the reference binary
/// and the test suite. Produces deterministic synthetic frames and creates
/// real (empty) video files so the recording lifecycle can be exercised
/// end to end.
pub struct SimulatedCamera {
    open: AtomicBool,
    recording: AtomicBool,
    frame_counter: AtomicU64,
    resolution: Mutex<(u32, u32)>,
    frame_interval: Mutex<Duration>,
    video_path: Mutex<Option<PathBuf>>,
}

impl SimulatedCamera {
    pub fn new() -> Self {
        Self {
            open: AtomicBool::new(false),
            recording: AtomicBool::new(false),
            frame_counter: AtomicU64::new(0),
            resolution: Mutex::new((160, 120)),
            frame_interval: Mutex::new(Duration::from_millis(5)),
            video_path: Mutex::new(None),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Number of frames handed out so far.
    pub fn frames_captured(&self) -> u64 {
        self.frame_counter.load(Ordering::SeqCst)
    }
}

impl Default for SimulatedCamera {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CameraDriver for SimulatedCamera {
    async fn open(&self, config: &CameraConfig) -> Result<(), CameraError> {
        if self.open.swap(true, Ordering::SeqCst) {
            return Err(CameraError::Busy {
                details: "simulated device already open".to_string(),
            });
        }
        *self.resolution.lock().unwrap() = config.resolution;
        if config.fps > 0 {
            *self.frame_interval.lock().unwrap() =
                Duration::from_micros(1_000_000 / u64::from(config.fps));
        }
        debug!(
            "Simulated camera opened at {}x{}",
            config.resolution.0, config.resolution.1
        );
        Ok(())
    }

    async fn close(&self) -> Result<(), CameraError> {
        self.recording.store(false, Ordering::SeqCst);
        if self.open.swap(false, Ordering::SeqCst) {
            debug!("Simulated camera closed");
        }
        Ok(())
    }

    async fn capture_frame(&self) -> Result<Frame, CameraError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(CameraError::NotOpen);
        }

        // Pace frame delivery like the hardware would.
        let interval = *self.frame_interval.lock().unwrap();
        tokio::time::sleep(interval).await;

        if !self.open.load(Ordering::SeqCst) {
            return Err(CameraError::NotOpen);
        }

        let (width, height) = *self.resolution.lock().unwrap();
        let n = self.frame_counter.fetch_add(1, Ordering::SeqCst);

        let mut data = Vec::with_capacity(Frame::expected_len(width, height));
        for y in 0..height {
            for x in 0..width {
                let v = (x + y + n as u32) as u8;
                data.extend_from_slice(&[v, v.wrapping_add(64), v.wrapping_add(128)]);
            }
        }

        Ok(Frame {
            width,
            height,
            data,
            timestamp: SystemTime::now(),
        })
    }

    async fn start_recording(&self, path: &Path, quality: u32) -> Result<(), CameraError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(CameraError::NotOpen);
        }
        if self.recording.swap(true, Ordering::SeqCst) {
            return Err(CameraError::Recording {
                details: "already recording".to_string(),
            });
        }

        tokio::fs::File::create(path).await.map_err(|e| {
            self.recording.store(false, Ordering::SeqCst);
            CameraError::Recording {
                details: format!("failed to create {}: {}", path.display(), e),
            }
        })?;

        *self.video_path.lock().unwrap() = Some(path.to_path_buf());
        info!(
            "Simulated camera recording to {} (quality {})",
            path.display(),
            quality
        );
        Ok(())
    }

    async fn stop_recording(&self) -> Result<(), CameraError> {
        if self.recording.swap(false, Ordering::SeqCst) {
            let path = self.video_path.lock().unwrap().take();
            if let Some(path) = path {
                debug!("Simulated camera finalized {}", path.display());
            }
        }
        Ok(())
    }

    fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }
}
