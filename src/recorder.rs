use crate::camera::CameraDriver;
use crate::command::DriveCommand;
use crate::config::{CameraConfig, RecordingConfig};
use crate::error::{RecordingError, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// One active training clip: a video file and a command log created and
/// destroyed together, sharing a base name and sequence index.
struct RecordingSession {
    index: u32,
    video_path: PathBuf,
    log_path: PathBuf,
    log: File,
    last_command: DriveCommand,
}

/// Manages the lifecycle of video+log file pairs. At most one session is
/// active at a time; mode gating (no recording while autonomous) is the
/// controller's job.
pub struct Recorder {
    camera: Arc<dyn CameraDriver>,
    camera_config: CameraConfig,
    config: RecordingConfig,
    session: Option<RecordingSession>,
}

impl Recorder {
    pub fn new(
        camera: Arc<dyn CameraDriver>,
        camera_config: CameraConfig,
        config: RecordingConfig,
    ) -> Self {
        Self {
            camera,
            camera_config,
            config,
            session: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    /// Sequence index of the active session, if any.
    pub fn current_index(&self) -> Option<u32> {
        self.session.as_ref().map(|s| s.index)
    }

    /// Begin a new session. Returns `Ok(false)` if one is already active.
    /// The sequence index is one greater than the highest index found among
    /// existing video and log files, so restarts never overwrite prior
    /// recordings. Any failure releases whatever was opened and leaves the
    /// recorder idle.
    pub async fn start(&mut self) -> Result<bool> {
        if self.session.is_some() {
            debug!("Recording already in progress, ignoring start request");
            return Ok(false);
        }

        let directory = PathBuf::from(&self.config.directory);
        fs::create_dir_all(&directory)
            .await
            .map_err(|e| io_error(&directory, e))?;

        let index = self.next_sequence_index(&directory).await?;
        let base = format!("{}{:05}", self.config.prefix, index);
        let video_path = directory.join(format!("{}{}", base, self.config.video_ext));
        let log_path = directory.join(format!("{}{}", base, self.config.log_ext));

        self.camera.open(&self.camera_config).await?;

        if let Err(e) = self
            .camera
            .start_recording(&video_path, self.camera_config.quality)
            .await
        {
            let _ = self.camera.close().await;
            return Err(e.into());
        }

        let mut log = match File::create(&log_path).await {
            Ok(log) => log,
            Err(e) => {
                self.abort_started_video(&video_path).await;
                return Err(io_error(&log_path, e).into());
            }
        };

        // Opening entry carries the "no command" sentinel.
        let sentinel = format!("{:.6} {}\n", unix_timestamp(), DriveCommand::Stop.label());
        if let Err(e) = log.write_all(sentinel.as_bytes()).await {
            self.abort_started_video(&video_path).await;
            let _ = fs::remove_file(&log_path).await;
            return Err(io_error(&log_path, e).into());
        }

        info!("Recording to {}", log_path.display());

        self.session = Some(RecordingSession {
            index,
            video_path,
            log_path,
            log,
            last_command: DriveCommand::Stop,
        });
        Ok(true)
    }

    /// End the active session: flush and close the log, finalize the video,
    /// release the camera, and relax file permissions so the clips can be
    /// pulled off the robot by a non-root user. Returns the finished file
    /// pair, or `None` if no session was active.
    pub async fn stop(&mut self) -> Result<Option<(PathBuf, PathBuf)>> {
        let Some(mut session) = self.session.take() else {
            return Ok(None);
        };

        info!("Stopping recording {:05}", session.index);

        let flush_result = session.log.flush().await;
        drop(session.log);

        if let Err(e) = self.camera.stop_recording().await {
            warn!("Failed to finalize video recording: {}", e);
        }
        if let Err(e) = self.camera.close().await {
            warn!("Failed to release camera: {}", e);
        }

        relax_permissions(&session.video_path);
        relax_permissions(&session.log_path);

        flush_result.map_err(|e| io_error(&session.log_path, e))?;
        Ok(Some((session.video_path, session.log_path)))
    }

    /// End the active session and delete its file pair; used when a human
    /// decides a just-recorded clip is bad training data. Returns the
    /// deleted pair, or `None` if no session was active.
    pub async fn discard(&mut self) -> Result<Option<(PathBuf, PathBuf)>> {
        let Some((video_path, log_path)) = self.stop().await? else {
            return Ok(None);
        };

        info!("Discarding recording {}", video_path.display());
        fs::remove_file(&video_path)
            .await
            .map_err(|e| io_error(&video_path, e))?;
        fs::remove_file(&log_path)
            .await
            .map_err(|e| io_error(&log_path, e))?;

        Ok(Some((video_path, log_path)))
    }

    /// Append a command to the log: first the command that was in effect
    /// until now (capturing its duration), then the new one, each
    /// timestamped. No-op when idle.
    pub async fn log_command(&mut self, command: DriveCommand) -> Result<()> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };

        let now = unix_timestamp();
        let entry = format!(
            "{:.6} {}\n{:.6} {}\n",
            now,
            session.last_command.label(),
            now,
            command.label()
        );
        session
            .log
            .write_all(entry.as_bytes())
            .await
            .map_err(|e| io_error(&session.log_path, e))?;
        session.last_command = command;
        Ok(())
    }

    /// Append a raw line (peer telemetry or a link code echo) to the log.
    /// No-op when idle.
    pub async fn log_line(&mut self, text: &str) -> Result<()> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };

        let entry = format!("{:.6} {}\n", unix_timestamp(), text.trim_end());
        session
            .log
            .write_all(entry.as_bytes())
            .await
            .map_err(|e| io_error(&session.log_path, e))?;
        Ok(())
    }

    async fn next_sequence_index(&self, directory: &Path) -> Result<u32> {
        let mut max_index: Option<u32> = None;
        let mut entries = fs::read_dir(directory)
            .await
            .map_err(|e| io_error(directory, e))?;

        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(directory, e))? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };

            for ext in [&self.config.video_ext, &self.config.log_ext] {
                if let Some(index) = parse_index(name, &self.config.prefix, ext) {
                    max_index = Some(max_index.map_or(index, |m| m.max(index)));
                }
            }
        }

        Ok(max_index.map_or(0, |m| m + 1))
    }

    /// Undo a partially started recording: finalize, delete the video file,
    /// release the camera. Best effort.
    async fn abort_started_video(&self, video_path: &Path) {
        if let Err(e) = self.camera.stop_recording().await {
            warn!("Failed to stop partial recording: {}", e);
        }
        if let Err(e) = fs::remove_file(video_path).await {
            warn!(
                "Failed to remove partial video {}: {}",
                video_path.display(),
                e
            );
        }
        let _ = self.camera.close().await;
    }
}

fn io_error(path: &Path, source: std::io::Error) -> RecordingError {
    RecordingError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Extract the 5-digit sequence index from `<prefix>NNNNN<ext>` file names.
fn parse_index(file_name: &str, prefix: &str, ext: &str) -> Option<u32> {
    let rest = file_name.strip_prefix(prefix)?;
    let digits = rest.strip_suffix(ext)?;
    if digits.len() == 5 && digits.bytes().all(|b| b.is_ascii_digit()) {
        digits.parse().ok()
    } else {
        None
    }
}

/// Unix timestamp with fractional seconds, as the log format records it.
fn unix_timestamp() -> f64 {
    let now = Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}

#[cfg(unix)]
fn relax_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o664)) {
        warn!("Failed to fix permissions on {}: {}", path.display(), e);
    }
}

#[cfg(not(unix))]
fn relax_permissions(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::SimulatedCamera;
    use crate::config::DorabotConfig;

    fn recorder_in(dir: &Path) -> Recorder {
        let defaults = DorabotConfig::default();
        let mut config = defaults.recording;
        config.directory = dir.to_string_lossy().to_string();
        Recorder::new(Arc::new(SimulatedCamera::new()), defaults.camera, config)
    }

    async fn touch(path: PathBuf) {
        File::create(path).await.unwrap();
    }

    #[tokio::test]
    async fn start_assigns_first_index_in_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = recorder_in(dir.path());

        assert!(recorder.start().await.unwrap());
        assert_eq!(recorder.current_index(), Some(0));
        assert!(dir.path().join("rec00000.h264").exists());
        assert!(dir.path().join("rec00000.txt").exists());
    }

    #[tokio::test]
    async fn second_start_is_rejected_and_session_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = recorder_in(dir.path());

        assert!(recorder.start().await.unwrap());
        assert!(!recorder.start().await.unwrap());
        assert_eq!(recorder.current_index(), Some(0));
        assert!(recorder.is_recording());
    }

    #[tokio::test]
    async fn sequence_index_is_max_plus_one() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            touch(dir.path().join(format!("rec{:05}.h264", i))).await;
            touch(dir.path().join(format!("rec{:05}.txt", i))).await;
        }

        let mut recorder = recorder_in(dir.path());
        assert!(recorder.start().await.unwrap());
        assert_eq!(recorder.current_index(), Some(5));
    }

    #[tokio::test]
    async fn sequence_index_spans_both_extensions() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path().join("rec00002.h264")).await;
        touch(dir.path().join("rec00007.txt")).await;
        // Files that do not match the naming scheme are ignored.
        touch(dir.path().join("rec123.h264")).await;
        touch(dir.path().join("other00099.h264")).await;

        let mut recorder = recorder_in(dir.path());
        assert!(recorder.start().await.unwrap());
        assert_eq!(recorder.current_index(), Some(8));
    }

    #[tokio::test]
    async fn discard_removes_exactly_its_own_pair() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path().join("rec00000.h264")).await;
        touch(dir.path().join("rec00000.txt")).await;

        let mut recorder = recorder_in(dir.path());
        assert!(recorder.start().await.unwrap());
        let (video, log) = recorder.discard().await.unwrap().unwrap();

        assert!(!video.exists());
        assert!(!log.exists());
        assert!(dir.path().join("rec00000.h264").exists());
        assert!(dir.path().join("rec00000.txt").exists());
        assert!(!recorder.is_recording());
    }

    #[tokio::test]
    async fn stop_without_session_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = recorder_in(dir.path());
        assert!(recorder.stop().await.unwrap().is_none());
        assert!(recorder.discard().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn log_records_previous_command_and_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = recorder_in(dir.path());

        recorder.start().await.unwrap();
        recorder.log_command(DriveCommand::Forward).await.unwrap();
        recorder.log_command(DriveCommand::Left).await.unwrap();
        let (_, log_path) = recorder.stop().await.unwrap().unwrap();

        let contents = std::fs::read_to_string(log_path).unwrap();
        let events: Vec<&str> = contents
            .lines()
            .map(|l| l.split_once(' ').unwrap().1)
            .collect();
        assert_eq!(events, ["none", "none", "forward", "forward", "left"]);
    }

    #[tokio::test]
    async fn log_timestamps_are_non_decreasing() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = recorder_in(dir.path());

        recorder.start().await.unwrap();
        for command in [
            DriveCommand::Forward,
            DriveCommand::Right,
            DriveCommand::Backward,
            DriveCommand::Stop,
        ] {
            recorder.log_command(command).await.unwrap();
        }
        recorder.log_line("L03").await.unwrap();
        let (_, log_path) = recorder.stop().await.unwrap().unwrap();

        let contents = std::fs::read_to_string(log_path).unwrap();
        let stamps: Vec<f64> = contents
            .lines()
            .map(|l| l.split_once(' ').unwrap().0.parse().unwrap())
            .collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn log_command_when_idle_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = recorder_in(dir.path());
        recorder.log_command(DriveCommand::Forward).await.unwrap();
        assert!(!recorder.is_recording());
    }

    #[tokio::test]
    async fn camera_is_released_after_stop() {
        let dir = tempfile::tempdir().unwrap();
        let defaults = DorabotConfig::default();
        let mut config = defaults.recording;
        config.directory = dir.path().to_string_lossy().to_string();
        let camera = Arc::new(SimulatedCamera::new());
        let mut recorder = Recorder::new(Arc::clone(&camera) as Arc<dyn CameraDriver>, defaults.camera, config);

        recorder.start().await.unwrap();
        assert!(camera.is_open());
        assert!(camera.is_recording());

        recorder.stop().await.unwrap();
        assert!(!camera.is_open());
        assert!(!camera.is_recording());
    }
}
