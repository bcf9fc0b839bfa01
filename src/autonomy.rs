use crate::camera::CameraDriver;
use crate::classifier::InferenceAdapter;
use crate::command::DriveCommand;
use crate::config::CameraConfig;
use crate::error::Result;
use crate::motor::DriveExecutor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Poll interval while a human override suspends the loop.
const OVERRIDE_POLL: Duration = Duration::from_millis(10);

/// Pause after a failed capture or inference before the next attempt, so a
/// dead camera doesn't spin the loop.
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// The mode/override pair shared between the command-receiving context and
/// the autonomy loop. Atomics, so flag changes are visible to the loop
/// immediately; it re-checks them every iteration and after the blocking
/// capture call.
pub struct ControlFlags {
    autonomous: AtomicBool,
    override_active: AtomicBool,
}

impl ControlFlags {
    pub fn new() -> Self {
        Self {
            autonomous: AtomicBool::new(false),
            override_active: AtomicBool::new(false),
        }
    }

    pub fn is_autonomous(&self) -> bool {
        self.autonomous.load(Ordering::SeqCst)
    }

    fn set_autonomous(&self, active: bool) {
        self.autonomous.store(active, Ordering::SeqCst);
    }

    pub fn override_active(&self) -> bool {
        self.override_active.load(Ordering::SeqCst)
    }

    /// Assert or clear momentary human control. Only meaningful while
    /// autonomous; harmless otherwise.
    pub fn set_override(&self, active: bool) {
        self.override_active.store(active, Ordering::SeqCst);
    }
}

impl Default for ControlFlags {
    fn default() -> Self {
        Self::new()
    }
}

/// The mode state machine. Owns the autonomy loop task: at most one is
/// alive at any time, spawned by [`enable`](AutonomyController::enable) and
/// joined by [`disable`](AutonomyController::disable).
pub struct AutonomyController {
    flags: Arc<ControlFlags>,
    camera: Arc<dyn CameraDriver>,
    camera_config: CameraConfig,
    executor: Arc<Mutex<DriveExecutor>>,
    adapter: Arc<InferenceAdapter>,
    task: Option<JoinHandle<()>>,
}

impl AutonomyController {
    pub fn new(
        flags: Arc<ControlFlags>,
        camera: Arc<dyn CameraDriver>,
        camera_config: CameraConfig,
        executor: Arc<Mutex<DriveExecutor>>,
        adapter: Arc<InferenceAdapter>,
    ) -> Self {
        Self {
            flags,
            camera,
            camera_config,
            executor,
            adapter,
            task: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.flags.is_autonomous()
    }

    /// Enter Autonomous mode: open the camera, clear any stale override,
    /// and launch the capture/infer/drive loop on its own task. No-op if
    /// already autonomous. A camera-open failure aborts the transition and
    /// leaves the mode Manual. The caller must have stopped any active
    /// recording first; the camera is expected to be released.
    pub async fn enable(&mut self) -> Result<bool> {
        if self.flags.is_autonomous() {
            debug!("Already autonomous, ignoring enable request");
            return Ok(false);
        }

        self.camera.open(&self.camera_config).await?;

        self.flags.set_override(false);
        self.flags.set_autonomous(true);

        let task = tokio::spawn(autonomy_loop(
            Arc::clone(&self.flags),
            Arc::clone(&self.camera),
            Arc::clone(&self.executor),
            Arc::clone(&self.adapter),
        ));
        self.task = Some(task);

        info!("Autonomous driving enabled");
        Ok(true)
    }

    /// Leave Autonomous mode. Clears the mode flag and joins the loop task;
    /// returns only after the loop has observed the flag and exited, so no
    /// stale capture or drive call can race with subsequent Manual-mode
    /// operations. If the camera driver hangs mid-capture this waits
    /// indefinitely; that risk is inherited from the drivers.
    pub async fn disable(&mut self) -> Result<bool> {
        if !self.flags.is_autonomous() && self.task.is_none() {
            debug!("Already manual, ignoring disable request");
            return Ok(false);
        }

        self.flags.set_autonomous(false);
        self.flags.set_override(false);

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Autonomy loop task failed: {}", e);
            }
        }

        // The loop's exit path already stopped the motors and released the
        // camera; repeat both in case the task died mid-iteration.
        {
            let executor = self.executor.lock().await;
            if let Err(e) = executor.drive(DriveCommand::Stop) {
                warn!("Failed to stop motors after autonomy exit: {}", e);
            }
            if let Err(e) = executor.release_all() {
                warn!("Failed to release motors after autonomy exit: {}", e);
            }
        }
        if let Err(e) = self.camera.close().await {
            warn!("Failed to release camera after autonomy exit: {}", e);
        }

        info!("Autonomous driving disabled");
        Ok(true)
    }
}

/// The capture -> infer -> drive cycle. Runs until the mode flag reads
/// Manual. The override flag is consulted before capture, after capture,
/// and after inference, bounding override latency to roughly one
/// capture+inference cycle. Capture or inference failure is fatal to that
/// iteration only.
async fn autonomy_loop(
    flags: Arc<ControlFlags>,
    camera: Arc<dyn CameraDriver>,
    executor: Arc<Mutex<DriveExecutor>>,
    adapter: Arc<InferenceAdapter>,
) {
    info!("Autonomy loop started");

    loop {
        tokio::task::yield_now().await;

        if !flags.is_autonomous() {
            break;
        }

        if flags.override_active() {
            tokio::time::sleep(OVERRIDE_POLL).await;
            continue;
        }

        let frame = match camera.capture_frame().await {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Frame capture failed, skipping iteration: {}", e);
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }
        };

        // An override that arrived mid-capture invalidates the frame.
        if flags.override_active() {
            continue;
        }

        let command = match adapter.infer(&frame) {
            Ok(command) => command,
            Err(e) => {
                warn!("Inference failed, skipping iteration: {}", e);
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }
        };
        debug!("Autonomy decision: {}", command);

        // Last checkpoint, under the motor lock: a human command asserts
        // the override before it touches the executor, so once it lands no
        // stale inference decision can overwrite it.
        {
            let executor = executor.lock().await;
            if flags.override_active() {
                continue;
            }
            if let Err(e) = executor.drive(command) {
                warn!("Drive actuation failed: {}", e);
            }
        }
    }

    // Terminal exit path: motors stopped, camera released.
    {
        let executor = executor.lock().await;
        if let Err(e) = executor.drive(DriveCommand::Stop) {
            warn!("Failed to stop motors on loop exit: {}", e);
        }
    }
    if let Err(e) = camera.close().await {
        warn!("Failed to release camera on loop exit: {}", e);
    }

    info!("Autonomy loop terminated");
}
