use crate::command::LinkCode;
use crate::config::EndOfLinkAction;
use crate::controller::RobotController;
use crate::error::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

/// Why a link session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkExit {
    /// The peer sent `LFF` and the configured action is terminate.
    Terminated,
    /// The peer sent `LFF` and the configured action is shutdown; process
    /// shutdown has been requested.
    ShutdownRequested,
    /// The transport reached end of stream.
    Disconnected,
}

/// The serial-link command session: reads newline-terminated strings from
/// the microcontroller peer, applies leading `Lxx` link codes, and feeds
/// everything else (the peer's steering telemetry) to an active recording
/// log. The transport is any buffered reader; the binary wires a tty
/// device file.
pub struct LinkSession {
    controller: Arc<RobotController>,
    end_of_link: EndOfLinkAction,
}

impl LinkSession {
    pub fn new(controller: Arc<RobotController>, end_of_link: EndOfLinkAction) -> Self {
        Self {
            controller,
            end_of_link,
        }
    }

    /// Run the session until the peer ends the link or the transport
    /// closes. Command failures are logged and the session continues; only
    /// transport errors are propagated.
    pub async fn run<R: AsyncBufRead + Unpin>(&self, reader: R) -> Result<LinkExit> {
        info!("Link session started");
        let mut lines = reader.lines();

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    info!("Link peer disconnected");
                    return Ok(LinkExit::Disconnected);
                }
                Err(e) => {
                    warn!("Link read failed: {}", e);
                    return Err(e.into());
                }
            };

            if line.trim().is_empty() {
                debug!("Empty link line, ignoring");
                continue;
            }

            if let Some(exit) = self.handle_line(&line).await {
                return Ok(exit);
            }
        }
    }

    async fn handle_line(&self, line: &str) -> Option<LinkExit> {
        let Some(code) = LinkCode::parse(line) else {
            // Peer telemetry, not a command; it carries the human steering
            // state that makes recorded clips trainable.
            if let Err(e) = self.controller.log_link_line(line).await {
                warn!("Failed to log link line: {}", e);
            }
            return None;
        };

        // While autonomous only return-to-manual and end-of-link act.
        if self.controller.is_autonomous()
            && !matches!(code, LinkCode::ManualControl | LinkCode::EndOfLink)
        {
            debug!("Ignoring link code {:?} while autonomous", code);
            return None;
        }

        match code {
            LinkCode::ManualControl => {
                debug!("Transferring control to human");
                if let Err(e) = self.controller.set_autonomous(false).await {
                    warn!("Failed to leave autonomous mode: {}", e);
                }
            }
            LinkCode::AutonomousControl => {
                debug!("Transferring control to robot");
                if let Err(e) = self.controller.set_autonomous(true).await {
                    warn!("Failed to enter autonomous mode: {}", e);
                }
            }
            LinkCode::StartRecording => {
                self.start_and_echo(line).await;
            }
            LinkCode::StopRecording => {
                if let Err(e) = self.controller.stop_recording().await {
                    warn!("Failed to stop recording: {}", e);
                }
            }
            LinkCode::DiscardRecording => {
                // The human flagged the current clip as bad training data:
                // drop it and resume with a fresh one.
                match self.controller.discard_recording().await {
                    Ok(true) => self.start_and_echo(line).await,
                    Ok(false) => debug!("No recording to discard"),
                    Err(e) => warn!("Failed to discard recording: {}", e),
                }
            }
            LinkCode::EndOfLink => {
                return Some(match self.end_of_link {
                    EndOfLinkAction::Terminate => {
                        info!("Link terminated by peer");
                        LinkExit::Terminated
                    }
                    EndOfLinkAction::Shutdown => {
                        info!("Link peer requested shutdown");
                        self.controller.request_shutdown();
                        LinkExit::ShutdownRequested
                    }
                });
            }
        }

        None
    }

    /// Start a recording and echo the triggering code as its first peer
    /// line, mirroring what the peer sees.
    async fn start_and_echo(&self, line: &str) {
        match self.controller.start_recording().await {
            Ok(true) => {
                if let Err(e) = self.controller.log_link_line(line).await {
                    warn!("Failed to log link line: {}", e);
                }
            }
            Ok(false) => debug!("Recording start rejected"),
            Err(e) => warn!("Failed to start recording: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraDriver, SimulatedCamera};
    use crate::classifier::SimulatedClassifier;
    use crate::config::DorabotConfig;
    use crate::motor::SimulatedMotors;

    struct Rig {
        controller: Arc<RobotController>,
        dir: tempfile::TempDir,
    }

    fn rig() -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let mut config = DorabotConfig::default();
        config.recording.directory = dir.path().to_string_lossy().to_string();

        let controller = Arc::new(
            RobotController::new(
                &config,
                Arc::new(SimulatedCamera::new()) as Arc<dyn CameraDriver>,
                Box::new(SimulatedMotors::new()),
                Box::new(SimulatedClassifier::new(config.model.input_side)),
            )
            .unwrap(),
        );

        Rig { controller, dir }
    }

    fn session(rig: &Rig, action: EndOfLinkAction) -> LinkSession {
        LinkSession::new(Arc::clone(&rig.controller), action)
    }

    #[tokio::test]
    async fn record_stop_cycle_over_the_link() {
        let rig = rig();
        let script = b"L03\nfwd=64 turn=0\nL04\nLFF\n";

        let exit = session(&rig, EndOfLinkAction::Terminate)
            .run(&script[..])
            .await
            .unwrap();

        assert_eq!(exit, LinkExit::Terminated);
        assert!(!rig.controller.status().await.recording);
        let log = std::fs::read_to_string(rig.dir.path().join("rec00000.txt")).unwrap();
        assert!(log.lines().any(|l| l.ends_with(" L03")));
        assert!(log.lines().any(|l| l.ends_with(" fwd=64 turn=0")));
    }

    #[tokio::test]
    async fn discard_resumes_with_a_fresh_clip() {
        let rig = rig();
        let script = b"L03\ntelemetry\nLFE\nLFF\n";

        session(&rig, EndOfLinkAction::Terminate)
            .run(&script[..])
            .await
            .unwrap();

        // The discarded pair is gone, the resumed clip took the next index.
        assert!(!rig.dir.path().join("rec00000.h264").exists());
        assert!(!rig.dir.path().join("rec00000.txt").exists());
        assert!(rig.dir.path().join("rec00001.h264").exists());
        assert!(rig.dir.path().join("rec00001.txt").exists());
    }

    #[tokio::test]
    async fn autonomous_mode_filters_link_commands() {
        let rig = rig();
        let script = b"L02\nL03\nL01\nLFF\n";

        let exit = session(&rig, EndOfLinkAction::Terminate)
            .run(&script[..])
            .await
            .unwrap();

        assert_eq!(exit, LinkExit::Terminated);
        // L03 was dropped while autonomous; L01 returned control.
        assert!(!rig.controller.is_autonomous());
        assert!(!rig.dir.path().join("rec00000.h264").exists());
    }

    #[tokio::test]
    async fn unknown_codes_and_blanks_are_ignored() {
        let rig = rig();
        let script = b"\nL00\nL7A\nLFF\n";

        let exit = session(&rig, EndOfLinkAction::Terminate)
            .run(&script[..])
            .await
            .unwrap();

        assert_eq!(exit, LinkExit::Terminated);
        let status = rig.controller.status().await;
        assert!(!status.autonomous);
        assert!(!status.recording);
    }

    #[tokio::test]
    async fn end_of_link_can_request_shutdown() {
        let rig = rig();
        let token = rig.controller.shutdown_token();

        let exit = session(&rig, EndOfLinkAction::Shutdown)
            .run(&b"LFF\n"[..])
            .await
            .unwrap();

        assert_eq!(exit, LinkExit::ShutdownRequested);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn transport_eof_ends_the_session() {
        let rig = rig();

        let exit = session(&rig, EndOfLinkAction::Terminate)
            .run(&b"L03\n"[..])
            .await
            .unwrap();

        assert_eq!(exit, LinkExit::Disconnected);
        // The session left the recording running; shutdown paths clean up.
        assert!(rig.controller.status().await.recording);
    }
}
