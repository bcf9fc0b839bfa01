use thiserror::Error;

#[derive(Error, Debug)]
pub enum DorabotError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Motor error: {0}")]
    Motor(#[from] MotorError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Recording error: {0}")]
    Recording(#[from] RecordingError),

    #[error("System error: {message}")]
    System { message: String },
}

impl DorabotError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }
}

/// Camera collaborator failures. `Busy` and `Open` abort the requested mode
/// transition; `Capture` is transient and only fails the current loop
/// iteration.
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("camera device is busy: {details}")]
    Busy { details: String },

    #[error("camera is not open")]
    NotOpen,

    #[error("failed to open camera: {details}")]
    Open { details: String },

    #[error("frame capture failed: {details}")]
    Capture { details: String },

    #[error("video recording failed: {details}")]
    Recording { details: String },
}

#[derive(Error, Debug)]
pub enum MotorError {
    #[error("motor channel {channel} rejected command: {details}")]
    Actuation { channel: u8, details: String },

    #[error("motor driver unavailable: {details}")]
    Unavailable { details: String },
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("failed to load model parameters from {path}: {details}")]
    Load { path: String, details: String },

    #[error("input tensor has wrong length: expected {expected}, got {actual}")]
    InputShape { expected: usize, actual: usize },

    #[error("inference failed: {details}")]
    Inference { details: String },

    #[error("classifier returned out-of-range class index {index}")]
    ClassIndex { index: usize },
}

#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("recording I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, DorabotError>;
