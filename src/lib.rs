pub mod autonomy;
pub mod camera;
pub mod classifier;
pub mod command;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod link;
pub mod motor;
pub mod recorder;
pub mod server;

pub use autonomy::{AutonomyController, ControlFlags};
pub use camera::{CameraDriver, Frame, SimulatedCamera};
pub use classifier::{Classifier, InferenceAdapter, SimulatedClassifier};
pub use command::{DriveCommand, LinkCode, CLASS_NAMES};
pub use config::{DorabotConfig, EndOfLinkAction};
pub use controller::{RobotController, RobotStatus};
pub use dispatch::{CommandDispatcher, MacroOp};
pub use error::{DorabotError, Result};
pub use link::{LinkExit, LinkSession};
pub use motor::{DriveExecutor, MotorDirection, MotorDriver, SimulatedMotors};
pub use recorder::Recorder;
pub use server::MacroServer;
