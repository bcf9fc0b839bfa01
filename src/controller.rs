use crate::autonomy::{AutonomyController, ControlFlags};
use crate::camera::CameraDriver;
use crate::classifier::{Classifier, InferenceAdapter};
use crate::command::DriveCommand;
use crate::config::DorabotConfig;
use crate::error::Result;
use crate::motor::{DriveExecutor, MotorDriver};
use crate::recorder::Recorder;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Small status snapshot returned to remote callers.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RobotStatus {
    pub autonomous: bool,
    pub override_active: bool,
    pub recording: bool,
    pub speed: u8,
}

/// The one object owning all mutable robot state: mode flags, motors,
/// recorder, and the autonomy loop. Every external entry point (HTTP macro
/// or serial link code) mutates state through these synchronized methods;
/// nothing reaches into the loop's internals.
///
/// Lock order, where two are held: autonomy before recorder. The drive
/// paths take one lock at a time.
pub struct RobotController {
    flags: Arc<ControlFlags>,
    executor: Arc<Mutex<DriveExecutor>>,
    recorder: Mutex<Recorder>,
    autonomy: Mutex<AutonomyController>,
    shutdown: CancellationToken,
}

impl RobotController {
    pub fn new(
        config: &DorabotConfig,
        camera: Arc<dyn CameraDriver>,
        motors: Box<dyn MotorDriver>,
        classifier: Box<dyn Classifier>,
    ) -> Result<Self> {
        let flags = Arc::new(ControlFlags::new());

        // Startup state: default speed applied, motors stopped.
        let executor = Arc::new(Mutex::new(DriveExecutor::new(
            motors,
            config.motor.left_channel,
            config.motor.right_channel,
            config.motor.default_speed,
        )?));

        let adapter = Arc::new(InferenceAdapter::new(classifier, config.model.input_side));

        let recorder = Recorder::new(
            Arc::clone(&camera),
            config.camera.clone(),
            config.recording.clone(),
        );

        let autonomy = AutonomyController::new(
            Arc::clone(&flags),
            camera,
            config.camera.clone(),
            Arc::clone(&executor),
            adapter,
        );

        Ok(Self {
            flags,
            executor,
            recorder: Mutex::new(recorder),
            autonomy: Mutex::new(autonomy),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn is_autonomous(&self) -> bool {
        self.flags.is_autonomous()
    }

    pub async fn status(&self) -> RobotStatus {
        RobotStatus {
            autonomous: self.flags.is_autonomous(),
            override_active: self.flags.override_active(),
            recording: self.recorder.lock().await.is_recording(),
            speed: self.executor.lock().await.speed(),
        }
    }

    /// Execute a human drive command. While autonomous this asserts the
    /// override (momentary human control); while manual it actuates and is
    /// appended to an active recording log.
    pub async fn drive(&self, command: DriveCommand) -> Result<()> {
        if self.flags.is_autonomous() {
            self.flags.set_override(true);
            self.executor.lock().await.drive(command)?;
            return Ok(());
        }

        self.executor.lock().await.drive(command)?;
        self.recorder.lock().await.log_command(command).await?;
        Ok(())
    }

    /// The joystick was released: clear the override and stop the motors.
    /// They stay stopped until the next human or inference command.
    pub async fn release_joystick(&self) -> Result<()> {
        self.flags.set_override(false);
        self.executor.lock().await.drive(DriveCommand::Stop)?;
        if !self.flags.is_autonomous() {
            self.recorder
                .lock()
                .await
                .log_command(DriveCommand::Stop)
                .await?;
        }
        Ok(())
    }

    /// Switch between Manual and Autonomous. Entering Autonomous stops any
    /// active recording first; leaving it joins the loop task before
    /// returning. Returns whether a transition happened.
    pub async fn set_autonomous(&self, enable: bool) -> Result<bool> {
        let mut autonomy = self.autonomy.lock().await;

        if enable {
            if autonomy.is_enabled() {
                return Ok(false);
            }
            {
                let mut recorder = self.recorder.lock().await;
                if recorder.stop().await?.is_some() {
                    info!("Stopped active recording before going autonomous");
                }
            }
            autonomy.enable().await?;
            Ok(true)
        } else {
            autonomy.disable().await
        }
    }

    /// Toggle the driving mode; returns the new autonomous state.
    pub async fn toggle_self_driving(&self) -> Result<bool> {
        let enable = !self.is_autonomous();
        self.set_autonomous(enable).await?;
        Ok(enable)
    }

    /// Start a recording session. Rejected (Ok(false)) while autonomous or
    /// when a session is already active.
    pub async fn start_recording(&self) -> Result<bool> {
        let autonomy = self.autonomy.lock().await;
        if autonomy.is_enabled() {
            warn!("Recording request rejected while autonomous");
            return Ok(false);
        }
        self.recorder.lock().await.start().await
    }

    /// Stop the active recording session; returns whether one was active.
    pub async fn stop_recording(&self) -> Result<bool> {
        Ok(self.recorder.lock().await.stop().await?.is_some())
    }

    /// Toggle recording; returns the new recording state.
    pub async fn toggle_recording(&self) -> Result<bool> {
        let autonomy = self.autonomy.lock().await;
        if autonomy.is_enabled() {
            warn!("Recording request rejected while autonomous");
            return Ok(false);
        }
        let mut recorder = self.recorder.lock().await;
        if recorder.is_recording() {
            recorder.stop().await?;
            Ok(false)
        } else {
            recorder.start().await
        }
    }

    /// Discard the active recording's file pair; returns whether one was
    /// active.
    pub async fn discard_recording(&self) -> Result<bool> {
        Ok(self.recorder.lock().await.discard().await?.is_some())
    }

    /// Append a raw peer line to an active recording log.
    pub async fn log_link_line(&self, line: &str) -> Result<()> {
        self.recorder.lock().await.log_line(line).await
    }

    pub async fn increase_speed(&self) -> Result<u8> {
        Ok(self.executor.lock().await.increase_speed()?)
    }

    pub async fn decrease_speed(&self) -> Result<u8> {
        Ok(self.executor.lock().await.decrease_speed()?)
    }

    /// Ask the process to exit; `halt` performs the actual cleanup.
    pub fn request_shutdown(&self) {
        info!("Shutdown requested");
        self.shutdown.cancel();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Final cleanup on every exit path: leave Autonomous (joining the
    /// loop), stop any recording, release every motor. Best effort; each
    /// step runs even if an earlier one fails.
    pub async fn halt(&self) {
        info!("Halting robot controller");

        {
            let mut autonomy = self.autonomy.lock().await;
            if let Err(e) = autonomy.disable().await {
                warn!("Failed to disable autonomy during halt: {}", e);
            }
        }

        {
            let mut recorder = self.recorder.lock().await;
            if let Err(e) = recorder.stop().await {
                warn!("Failed to stop recording during halt: {}", e);
            }
        }

        {
            let executor = self.executor.lock().await;
            if let Err(e) = executor.drive(DriveCommand::Stop) {
                warn!("Failed to stop motors during halt: {}", e);
            }
            if let Err(e) = executor.release_all() {
                warn!("Failed to release motors during halt: {}", e);
            }
        }
    }
}
