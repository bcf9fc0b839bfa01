use crate::command::DriveCommand;
use crate::error::MotorError;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// Direction applied to a single motor channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorDirection {
    Forward,
    Backward,
    /// Free-running stop; the channel is de-energized.
    Released,
}

/// The motor collaborator. Implementations wrap an external motor HAT or an
/// equivalent drive peer; commands are discrete and idempotent.
pub trait MotorDriver: Send + Sync {
    fn run(&self, channel: u8, direction: MotorDirection) -> Result<(), MotorError>;

    /// Apply a PWM speed (0..=255) to a channel.
    fn set_speed(&self, channel: u8, speed: u8) -> Result<(), MotorError>;
}

/// Lowest usable PWM speed; below this the motors stall.
pub const MIN_SPEED: u8 = 10;

/// Speed change applied by the increase/decrease macros.
pub const SPEED_STEP: u8 = 10;

/// Motor channels the release-everything path touches, matching the four
/// ports on the drive board.
const ALL_CHANNELS: [u8; 4] = [1, 2, 3, 4];

/// Direction pair (left, right) actuating a drive command.
pub fn command_directions(command: DriveCommand) -> (MotorDirection, MotorDirection) {
    match command {
        DriveCommand::Forward => (MotorDirection::Backward, MotorDirection::Forward),
        DriveCommand::Backward => (MotorDirection::Forward, MotorDirection::Backward),
        DriveCommand::Left => (MotorDirection::Backward, MotorDirection::Released),
        DriveCommand::Right => (MotorDirection::Released, MotorDirection::Forward),
        DriveCommand::Stop => (MotorDirection::Released, MotorDirection::Released),
    }
}

/// Translates drive commands into motor actuation and owns the speed state.
/// Stateless given the current command: issuing the same command twice
/// leaves the motors in the same state.
pub struct DriveExecutor {
    driver: Box<dyn MotorDriver>,
    left_channel: u8,
    right_channel: u8,
    speed: u8,
}

impl DriveExecutor {
    pub fn new(
        driver: Box<dyn MotorDriver>,
        left_channel: u8,
        right_channel: u8,
        default_speed: u8,
    ) -> Result<Self, MotorError> {
        let mut executor = Self {
            driver,
            left_channel,
            right_channel,
            speed: 0,
        };
        executor.set_speed(default_speed)?;
        executor.drive(DriveCommand::Stop)?;
        Ok(executor)
    }

    /// Actuate a drive command on both motors.
    pub fn drive(&self, command: DriveCommand) -> Result<(), MotorError> {
        let (left, right) = command_directions(command);
        debug!("Drive {}: left={:?} right={:?}", command, left, right);
        self.driver.run(self.left_channel, left)?;
        self.driver.run(self.right_channel, right)?;
        Ok(())
    }

    /// Set the PWM speed on both drive motors, clamped to `MIN_SPEED..=255`.
    /// Returns the speed actually applied.
    pub fn set_speed(&mut self, speed: u8) -> Result<u8, MotorError> {
        let speed = speed.max(MIN_SPEED);
        self.driver.set_speed(self.left_channel, speed)?;
        self.driver.set_speed(self.right_channel, speed)?;
        self.speed = speed;
        Ok(speed)
    }

    pub fn increase_speed(&mut self) -> Result<u8, MotorError> {
        self.set_speed(self.speed.saturating_add(SPEED_STEP))
    }

    pub fn decrease_speed(&mut self) -> Result<u8, MotorError> {
        self.set_speed(self.speed.saturating_sub(SPEED_STEP))
    }

    pub fn speed(&self) -> u8 {
        self.speed
    }

    /// Release every motor channel on the board, not just the two drive
    /// motors. Used on every exit path.
    pub fn release_all(&self) -> Result<(), MotorError> {
        for channel in ALL_CHANNELS {
            self.driver.run(channel, MotorDirection::Released)?;
        }
        Ok(())
    }
}

/// In-memory motor board used by the reference binary and the test suite.
/// Records the last direction and speed per channel plus a running count of
/// `run` calls, so tests can assert on actuation history.
#[derive(Default)]
pub struct SimulatedMotors {
    state: Mutex<SimulatedMotorState>,
}

#[derive(Default)]
struct SimulatedMotorState {
    directions: HashMap<u8, MotorDirection>,
    speeds: HashMap<u8, u8>,
    run_calls: u64,
}

impl SimulatedMotors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn direction(&self, channel: u8) -> MotorDirection {
        self.state
            .lock()
            .unwrap()
            .directions
            .get(&channel)
            .copied()
            .unwrap_or(MotorDirection::Released)
    }

    pub fn speed(&self, channel: u8) -> Option<u8> {
        self.state.lock().unwrap().speeds.get(&channel).copied()
    }

    /// Total `run` calls issued so far, over all channels.
    pub fn run_calls(&self) -> u64 {
        self.state.lock().unwrap().run_calls
    }

    /// True when every channel is released.
    pub fn all_released(&self) -> bool {
        self.state
            .lock()
            .unwrap()
            .directions
            .values()
            .all(|d| *d == MotorDirection::Released)
    }
}

impl MotorDriver for SimulatedMotors {
    fn run(&self, channel: u8, direction: MotorDirection) -> Result<(), MotorError> {
        let mut state = self.state.lock().unwrap();
        state.directions.insert(channel, direction);
        state.run_calls += 1;
        Ok(())
    }

    fn set_speed(&self, channel: u8, speed: u8) -> Result<(), MotorError> {
        self.state.lock().unwrap().speeds.insert(channel, speed);
        Ok(())
    }
}

impl MotorDriver for std::sync::Arc<SimulatedMotors> {
    fn run(&self, channel: u8, direction: MotorDirection) -> Result<(), MotorError> {
        self.as_ref().run(channel, direction)
    }

    fn set_speed(&self, channel: u8, speed: u8) -> Result<(), MotorError> {
        self.as_ref().set_speed(channel, speed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn executor_with_board() -> (DriveExecutor, Arc<SimulatedMotors>) {
        let board = Arc::new(SimulatedMotors::new());
        let executor = DriveExecutor::new(Box::new(Arc::clone(&board)), 3, 1, 150).unwrap();
        (executor, board)
    }

    #[test]
    fn drive_table_matches_wiring() {
        let (executor, board) = executor_with_board();

        executor.drive(DriveCommand::Forward).unwrap();
        assert_eq!(board.direction(3), MotorDirection::Backward);
        assert_eq!(board.direction(1), MotorDirection::Forward);

        executor.drive(DriveCommand::Backward).unwrap();
        assert_eq!(board.direction(3), MotorDirection::Forward);
        assert_eq!(board.direction(1), MotorDirection::Backward);

        executor.drive(DriveCommand::Left).unwrap();
        assert_eq!(board.direction(3), MotorDirection::Backward);
        assert_eq!(board.direction(1), MotorDirection::Released);

        executor.drive(DriveCommand::Right).unwrap();
        assert_eq!(board.direction(3), MotorDirection::Released);
        assert_eq!(board.direction(1), MotorDirection::Forward);

        executor.drive(DriveCommand::Stop).unwrap();
        assert!(board.all_released());
    }

    #[test]
    fn drive_is_idempotent() {
        let (executor, board) = executor_with_board();

        executor.drive(DriveCommand::Forward).unwrap();
        let first = (board.direction(3), board.direction(1));
        executor.drive(DriveCommand::Forward).unwrap();
        let second = (board.direction(3), board.direction(1));

        assert_eq!(first, second);
    }

    #[test]
    fn speed_is_clamped_and_stepped() {
        let (mut executor, board) = executor_with_board();
        assert_eq!(executor.speed(), 150);

        assert_eq!(executor.set_speed(0).unwrap(), MIN_SPEED);
        assert_eq!(board.speed(3), Some(MIN_SPEED));
        assert_eq!(board.speed(1), Some(MIN_SPEED));

        assert_eq!(executor.increase_speed().unwrap(), MIN_SPEED + SPEED_STEP);

        executor.set_speed(250).unwrap();
        assert_eq!(executor.increase_speed().unwrap(), 255);
        assert_eq!(executor.increase_speed().unwrap(), 255);

        executor.set_speed(MIN_SPEED).unwrap();
        assert_eq!(executor.decrease_speed().unwrap(), MIN_SPEED);
    }

    #[test]
    fn release_all_covers_every_channel() {
        let (executor, board) = executor_with_board();
        executor.drive(DriveCommand::Forward).unwrap();

        executor.release_all().unwrap();
        for channel in [1, 2, 3, 4] {
            assert_eq!(board.direction(channel), MotorDirection::Released);
        }
    }
}
