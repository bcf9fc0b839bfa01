use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ModelError;

/// Class labels in classifier output order. The trained model predicts one
/// of these four classes per frame; there is no "stop" class.
pub const CLASS_NAMES: [&str; 4] = ["forward", "left", "right", "backward"];

/// A discrete steering action. Produced either by a human macro call or by
/// arg-max over the classifier's class scores; fully determines motor
/// actuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriveCommand {
    Forward,
    Left,
    Right,
    Backward,
    /// No command / stop; the motors are released.
    Stop,
}

impl DriveCommand {
    /// Map a classifier class index to a command.
    pub fn from_class_index(index: usize) -> Result<Self, ModelError> {
        match index {
            0 => Ok(Self::Forward),
            1 => Ok(Self::Left),
            2 => Ok(Self::Right),
            3 => Ok(Self::Backward),
            _ => Err(ModelError::ClassIndex { index }),
        }
    }

    /// Label used in command logs; `Stop` is recorded as the "no command"
    /// sentinel.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Left => "left",
            Self::Right => "right",
            Self::Backward => "backward",
            Self::Stop => "none",
        }
    }
}

impl fmt::Display for DriveCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A link command received from the serial peer as `Lxx` with two hex
/// digits. If present it must lead the received line; anything else on the
/// line is peer telemetry, not a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkCode {
    /// L01: return control to the human
    ManualControl,
    /// L02: transfer control to the robot
    AutonomousControl,
    /// L03: start recording a training clip
    StartRecording,
    /// L04: stop the current recording
    StopRecording,
    /// LFE: discard the current recording and resume with a fresh one
    DiscardRecording,
    /// LFF: end of link; terminate or shut down per configuration
    EndOfLink,
}

impl LinkCode {
    /// Parse the leading link command of a received line, if any.
    /// Unrecognized code values and malformed lines yield `None` and are
    /// ignored by the caller.
    pub fn parse(line: &str) -> Option<Self> {
        let rest = line.strip_prefix('L')?;
        let hex = rest.get(0..2)?;
        let val = u8::from_str_radix(hex, 16).ok()?;
        match val {
            0x01 => Some(Self::ManualControl),
            0x02 => Some(Self::AutonomousControl),
            0x03 => Some(Self::StartRecording),
            0x04 => Some(Self::StopRecording),
            0xFE => Some(Self::DiscardRecording),
            0xFF => Some(Self::EndOfLink),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_indices_map_to_commands() {
        assert_eq!(
            DriveCommand::from_class_index(0).unwrap(),
            DriveCommand::Forward
        );
        assert_eq!(
            DriveCommand::from_class_index(1).unwrap(),
            DriveCommand::Left
        );
        assert_eq!(
            DriveCommand::from_class_index(2).unwrap(),
            DriveCommand::Right
        );
        assert_eq!(
            DriveCommand::from_class_index(3).unwrap(),
            DriveCommand::Backward
        );
        assert!(DriveCommand::from_class_index(4).is_err());
    }

    #[test]
    fn labels_match_class_names() {
        for (index, name) in CLASS_NAMES.iter().enumerate() {
            assert_eq!(DriveCommand::from_class_index(index).unwrap().label(), *name);
        }
        assert_eq!(DriveCommand::Stop.label(), "none");
    }

    #[test]
    fn link_codes_parse() {
        assert_eq!(LinkCode::parse("L01"), Some(LinkCode::ManualControl));
        assert_eq!(LinkCode::parse("L02"), Some(LinkCode::AutonomousControl));
        assert_eq!(LinkCode::parse("L03"), Some(LinkCode::StartRecording));
        assert_eq!(LinkCode::parse("L04"), Some(LinkCode::StopRecording));
        assert_eq!(LinkCode::parse("LFE"), Some(LinkCode::DiscardRecording));
        assert_eq!(LinkCode::parse("LFF"), Some(LinkCode::EndOfLink));
    }

    #[test]
    fn link_code_must_lead_the_line() {
        assert_eq!(LinkCode::parse(" L01"), None);
        assert_eq!(LinkCode::parse("xL01"), None);
    }

    #[test]
    fn unknown_and_malformed_codes_are_ignored() {
        assert_eq!(LinkCode::parse("L00"), None);
        assert_eq!(LinkCode::parse("L7A"), None);
        assert_eq!(LinkCode::parse("Lzz"), None);
        assert_eq!(LinkCode::parse("L1"), None);
        assert_eq!(LinkCode::parse(""), None);
        assert_eq!(LinkCode::parse("joystick fwd=127"), None);
    }

    #[test]
    fn trailing_payload_does_not_affect_parse() {
        assert_eq!(LinkCode::parse("L03 extra"), Some(LinkCode::StartRecording));
    }
}
