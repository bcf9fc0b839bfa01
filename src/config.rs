use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DorabotConfig {
    pub camera: CameraConfig,
    pub motor: MotorConfig,
    pub model: ModelConfig,
    pub recording: RecordingConfig,
    pub server: ServerConfig,
    pub link: LinkConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// Capture resolution (width, height)
    #[serde(default = "default_camera_resolution")]
    pub resolution: (u32, u32),

    /// Frames per second, 0 for camera default
    #[serde(default = "default_camera_fps")]
    pub fps: u32,

    /// ISO sensitivity, 0 for camera default
    #[serde(default = "default_camera_iso")]
    pub iso: u32,

    /// H.264 recording quality, 1..40 (lower is better)
    #[serde(default = "default_camera_quality")]
    pub quality: u32,

    /// Mirror the image horizontally
    #[serde(default)]
    pub hflip: bool,

    /// Mirror the image vertically
    #[serde(default)]
    pub vflip: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MotorConfig {
    /// Speed applied to both drive motors at startup (10..=255)
    #[serde(default = "default_motor_speed")]
    pub default_speed: u8,

    /// Motor HAT channel wired to the left drive motor
    #[serde(default = "default_left_channel")]
    pub left_channel: u8,

    /// Motor HAT channel wired to the right drive motor
    #[serde(default = "default_right_channel")]
    pub right_channel: u8,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ModelConfig {
    /// Path to the trained classifier parameter file
    #[serde(default = "default_model_param_file")]
    pub param_file: String,

    /// Side length of the square classifier input, in pixels
    #[serde(default = "default_model_input_side")]
    pub input_side: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RecordingConfig {
    /// Directory receiving video/log pairs
    #[serde(default = "default_recording_directory")]
    pub directory: String,

    /// File name prefix for recorded clips
    #[serde(default = "default_recording_prefix")]
    pub prefix: String,

    /// Extension of the encoded video file
    #[serde(default = "default_video_ext")]
    pub video_ext: String,

    /// Extension of the command log file
    #[serde(default = "default_log_ext")]
    pub log_ext: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// IP address to bind to
    #[serde(default = "default_server_ip")]
    pub ip: String,

    /// Port to listen on
    #[serde(default = "default_server_port")]
    pub port: u16,
}

/// Behavior of the serial `LFF` end-of-link code. Peer firmware documents
/// it both as "terminate link" and "shut down", so the choice is
/// configuration-selectable.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EndOfLinkAction {
    /// End the link session, keep the process running
    Terminate,
    /// End the link session and request process shutdown
    Shutdown,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LinkConfig {
    /// Serial device to read link commands from (e.g. /dev/ttyAMA0)
    pub device: Option<String>,

    /// What the LFF code does
    #[serde(default = "default_end_of_link")]
    pub end_of_link: EndOfLinkAction,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Power the host down when the process exits
    #[serde(default)]
    pub shutdown_on_exit: bool,
}

impl DorabotConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("dorabot.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default(
                "camera.resolution",
                vec![
                    default_camera_resolution().0,
                    default_camera_resolution().1,
                ],
            )?
            .set_default("camera.fps", default_camera_fps())?
            .set_default("camera.iso", default_camera_iso())?
            .set_default("camera.quality", default_camera_quality())?
            .set_default("camera.hflip", false)?
            .set_default("camera.vflip", false)?
            .set_default("motor.default_speed", default_motor_speed() as i64)?
            .set_default("motor.left_channel", default_left_channel() as i64)?
            .set_default("motor.right_channel", default_right_channel() as i64)?
            .set_default("model.param_file", default_model_param_file())?
            .set_default("model.input_side", default_model_input_side())?
            .set_default("recording.directory", default_recording_directory())?
            .set_default("recording.prefix", default_recording_prefix())?
            .set_default("recording.video_ext", default_video_ext())?
            .set_default("recording.log_ext", default_log_ext())?
            .set_default("server.ip", default_server_ip())?
            .set_default("server.port", default_server_port() as i64)?
            .set_default("link.end_of_link", "terminate")?
            .set_default("system.shutdown_on_exit", false)?
            .add_source(File::with_name(&path_str).required(false))
            .add_source(Environment::with_prefix("DORABOT").separator("_"))
            .build()?;

        let config: DorabotConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.resolution.0 == 0 || self.camera.resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Camera resolution must be greater than 0".to_string(),
            ));
        }

        if self.camera.quality == 0 || self.camera.quality > 40 {
            return Err(ConfigError::Message(
                "Camera quality must be in 1..=40".to_string(),
            ));
        }

        if self.motor.default_speed < 10 {
            return Err(ConfigError::Message(
                "Motor default_speed must be at least 10".to_string(),
            ));
        }

        if self.motor.left_channel == self.motor.right_channel {
            return Err(ConfigError::Message(
                "Left and right motor channels must differ".to_string(),
            ));
        }

        if self.model.input_side == 0 {
            return Err(ConfigError::Message(
                "Model input_side must be greater than 0".to_string(),
            ));
        }

        if self.recording.prefix.is_empty() {
            return Err(ConfigError::Message(
                "Recording prefix must not be empty".to_string(),
            ));
        }

        if !self.recording.video_ext.starts_with('.') || !self.recording.log_ext.starts_with('.') {
            return Err(ConfigError::Message(
                "Recording file extensions must start with '.'".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for DorabotConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                resolution: default_camera_resolution(),
                fps: default_camera_fps(),
                iso: default_camera_iso(),
                quality: default_camera_quality(),
                hflip: false,
                vflip: false,
            },
            motor: MotorConfig {
                default_speed: default_motor_speed(),
                left_channel: default_left_channel(),
                right_channel: default_right_channel(),
            },
            model: ModelConfig {
                param_file: default_model_param_file(),
                input_side: default_model_input_side(),
            },
            recording: RecordingConfig {
                directory: default_recording_directory(),
                prefix: default_recording_prefix(),
                video_ext: default_video_ext(),
                log_ext: default_log_ext(),
            },
            server: ServerConfig {
                ip: default_server_ip(),
                port: default_server_port(),
            },
            link: LinkConfig {
                device: None,
                end_of_link: default_end_of_link(),
            },
            system: SystemConfig {
                shutdown_on_exit: false,
            },
        }
    }
}

// Default value functions
fn default_camera_resolution() -> (u32, u32) {
    (160, 120)
}
fn default_camera_fps() -> u32 {
    90
}
fn default_camera_iso() -> u32 {
    0
}
fn default_camera_quality() -> u32 {
    23
}

fn default_motor_speed() -> u8 {
    150
}
fn default_left_channel() -> u8 {
    3
}
fn default_right_channel() -> u8 {
    1
}

fn default_model_param_file() -> String {
    "train/model/trained_dora_model_32x32.prm".to_string()
}
fn default_model_input_side() -> u32 {
    32
}

fn default_recording_directory() -> String {
    "train/video".to_string()
}
fn default_recording_prefix() -> String {
    "rec".to_string()
}
fn default_video_ext() -> String {
    ".h264".to_string()
}
fn default_log_ext() -> String {
    ".txt".to_string()
}

fn default_server_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_server_port() -> u16 {
    8000
}

fn default_end_of_link() -> EndOfLinkAction {
    EndOfLinkAction::Terminate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = DorabotConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_resolution() {
        let mut config = DorabotConfig::default();
        config.camera.resolution = (0, 120);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_shared_motor_channel() {
        let mut config = DorabotConfig::default();
        config.motor.left_channel = 1;
        config.motor.right_channel = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_bare_extension() {
        let mut config = DorabotConfig::default();
        config.recording.video_ext = "h264".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn end_of_link_parses_from_toml() {
        let parsed: LinkConfig = toml::from_str("end_of_link = \"shutdown\"").unwrap();
        assert_eq!(parsed.end_of_link, EndOfLinkAction::Shutdown);
    }
}
