use crate::command::DriveCommand;
use crate::controller::{RobotController, RobotStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// A remotely invokable operation. The transports never call controller
/// methods directly; they resolve a name through the dispatcher's table and
/// invoke the operation it maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroOp {
    GoForward,
    GoBackward,
    TurnLeft,
    TurnRight,
    Stop,
    ReleaseJoystick,
    ToggleSelfDriving,
    ToggleRecording,
    DiscardRecording,
    IncreaseSpeed,
    DecreaseSpeed,
    Shutdown,
}

/// The externally reachable command surface: a registration table mapping
/// operation names to operations, executed against the controller's
/// synchronized entry points. Safe to invoke concurrently with an in-flight
/// autonomy iteration.
pub struct CommandDispatcher {
    controller: Arc<RobotController>,
    table: HashMap<&'static str, MacroOp>,
}

impl CommandDispatcher {
    pub fn new(controller: Arc<RobotController>) -> Self {
        let mut table = HashMap::new();
        for (name, op) in [
            ("go_forward", MacroOp::GoForward),
            ("go_backward", MacroOp::GoBackward),
            ("turn_left", MacroOp::TurnLeft),
            ("turn_right", MacroOp::TurnRight),
            ("stop", MacroOp::Stop),
            ("release_joystick", MacroOp::ReleaseJoystick),
            ("toggle_self_driving", MacroOp::ToggleSelfDriving),
            ("toggle_recording", MacroOp::ToggleRecording),
            ("discard_recording", MacroOp::DiscardRecording),
            ("increase_speed", MacroOp::IncreaseSpeed),
            ("decrease_speed", MacroOp::DecreaseSpeed),
            ("shutdown", MacroOp::Shutdown),
        ] {
            table.insert(name, op);
        }

        Self { controller, table }
    }

    pub fn lookup(&self, name: &str) -> Option<MacroOp> {
        self.table.get(name).copied()
    }

    /// Registered operation names, sorted for stable listings.
    pub fn operation_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.table.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub async fn status(&self) -> RobotStatus {
        self.controller.status().await
    }

    /// Invoke an operation by name. Unknown names are ignored and yield
    /// `None`. Operation failures are logged, never propagated to the
    /// remote caller; the reply is always the post-operation status
    /// snapshot.
    pub async fn dispatch(&self, name: &str) -> Option<RobotStatus> {
        let Some(op) = self.lookup(name) else {
            warn!("Ignoring unknown macro: {}", name);
            return None;
        };

        debug!("Dispatching macro {} -> {:?}", name, op);
        self.execute(op).await;
        Some(self.controller.status().await)
    }

    /// Execute an already-resolved operation.
    pub async fn execute(&self, op: MacroOp) {
        let result = match op {
            MacroOp::GoForward => self.controller.drive(DriveCommand::Forward).await,
            MacroOp::GoBackward => self.controller.drive(DriveCommand::Backward).await,
            MacroOp::TurnLeft => self.controller.drive(DriveCommand::Left).await,
            MacroOp::TurnRight => self.controller.drive(DriveCommand::Right).await,
            MacroOp::Stop => self.controller.drive(DriveCommand::Stop).await,
            MacroOp::ReleaseJoystick => self.controller.release_joystick().await,
            MacroOp::ToggleSelfDriving => {
                self.controller.toggle_self_driving().await.map(|_| ())
            }
            MacroOp::ToggleRecording => self.controller.toggle_recording().await.map(|_| ()),
            MacroOp::DiscardRecording => self.controller.discard_recording().await.map(|_| ()),
            MacroOp::IncreaseSpeed => self.controller.increase_speed().await.map(|_| ()),
            MacroOp::DecreaseSpeed => self.controller.decrease_speed().await.map(|_| ()),
            MacroOp::Shutdown => {
                self.controller.request_shutdown();
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!("Macro {:?} failed: {}", op, e);
        }
    }
}
