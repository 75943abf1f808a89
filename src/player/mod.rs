//! Launching mpv and following its output until it exits.

pub mod events;
pub mod script;

use std::{io::ErrorKind, process::ExitStatus, process::Stdio, time::Duration};

use anyhow::{Result, anyhow};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, Command},
};
use tracing::{debug, info, trace, warn};

use crate::config::Settings;
use crate::types::{PlaybackFailure, PlaybackOutcome};
use events::PlayerEvent;

pub struct PlayerDriver {
    program: String,
    base_args: Vec<String>,
    startup_timeout: Duration,
}

impl PlayerDriver {
    pub fn new(
        program: impl Into<String>,
        base_args: Vec<String>,
        startup_timeout: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            base_args,
            startup_timeout,
        }
    }

    /// Uses the configured player command; `player_args` are added by the
    /// command builder, not here.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let (program, base_args) = settings.player_command()?;
        Ok(Self::new(program, base_args, settings.startup_timeout()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Runs the player to completion. Only a failure to spawn is an error;
    /// everything after that is reported through the outcome.
    pub async fn play(&self, args: &[String]) -> Result<PlaybackOutcome> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.base_args)
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        debug!(program = %self.program, ?args, "spawning player");
        let child = command.spawn().map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                anyhow!(
                    "Player '{}' not found. Install mpv or set `player` in the config.",
                    self.program
                )
            } else {
                anyhow!(err).context(format!("failed to launch player '{}'", self.program))
            }
        })?;

        info!("waiting for the stream to start");
        let (outcome, status) = monitor(child, self.startup_timeout).await;
        debug!(?status, started = outcome.started, "player exited");
        Ok(outcome)
    }
}

/// Reads the child's stdout until EOF, a pre-start open failure or the
/// startup deadline. The child is always reaped before returning.
async fn monitor(
    mut child: Child,
    startup_timeout: Duration,
) -> (PlaybackOutcome, Option<ExitStatus>) {
    let mut outcome = PlaybackOutcome::default();

    if let Some(stdout) = child.stdout.take() {
        let mut lines = BufReader::new(stdout).split(b'\n');
        let deadline = tokio::time::sleep(startup_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                segment = lines.next_segment() => {
                    let raw = match segment {
                        Ok(Some(raw)) => raw,
                        Ok(None) => break,
                        Err(err) => {
                            warn!("failed to read player output: {err}");
                            let _ = child.start_kill();
                            break;
                        }
                    };
                    let line = String::from_utf8_lossy(&raw);
                    if !apply_event(&mut outcome, PlayerEvent::decode(&line), &line) {
                        let _ = child.start_kill();
                        break;
                    }
                }
                () = &mut deadline, if !outcome.started => {
                    warn!(timeout = ?startup_timeout, "player did not start in time, killing it");
                    outcome.failure = Some(PlaybackFailure::StartupTimeout);
                    let _ = child.start_kill();
                    break;
                }
            }
        }
    } else {
        warn!("player stdout was not captured");
        let _ = child.start_kill();
    }

    let status = match child.wait().await {
        Ok(status) => Some(status),
        Err(err) => {
            debug!("failed to reap player: {err}");
            None
        }
    };
    (outcome, status)
}

/// Folds one event into the outcome. Returns `false` when the player should
/// be stopped.
fn apply_event(outcome: &mut PlaybackOutcome, event: PlayerEvent, line: &str) -> bool {
    match event {
        PlayerEvent::VideoStarted => {
            if !outcome.started {
                info!("stream is valid, playback started");
            }
            outcome.started = true;
        }
        PlayerEvent::OpenFailed if !outcome.started => {
            warn!("failed to open stream, the link is probably dead");
            outcome.failure = Some(PlaybackFailure::OpenFailed);
            return false;
        }
        PlayerEvent::OpenFailed => debug!(%line, "ignoring open failure after playback started"),
        PlayerEvent::Status { position, duration } => {
            outcome.last_position = position;
            outcome.total_duration = duration;
        }
        PlayerEvent::SubDelay(delay) => outcome.sub_delay = delay,
        PlayerEvent::Unrecognized => trace!(%line, "player output"),
    }
    true
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    fn shell(script: &str) -> Child {
        Command::new("/bin/sh")
            .arg("-c")
            .arg(script)
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .expect("spawn sh")
    }

    #[tokio::test]
    async fn video_signature_then_exit_counts_as_started() {
        let child = shell(
            "echo 'Playing: https://cdn.example/master.m3u8'; echo ' (+) Video --vid=1 (*) (h264 1920x1080)'; exit 3",
        );
        let (outcome, status) = monitor(child, Duration::from_secs(20)).await;
        assert!(outcome.started);
        assert_eq!(outcome.failure, None);
        assert_eq!(status.and_then(|s| s.code()), Some(3));
    }

    #[tokio::test]
    async fn latest_status_and_delay_are_kept() {
        let child = shell(
            "echo ' (+) Video --vid=1'; echo '::STATUS::1.0/1440.0'; echo '::STATUS::12.3/1440.0'; echo '::SUB_DELAY::0.100000'; echo '::SUB_DELAY::0.250000'",
        );
        let (outcome, _) = monitor(child, Duration::from_secs(20)).await;
        assert_eq!(
            outcome,
            PlaybackOutcome {
                started: true,
                sub_delay: 0.25,
                last_position: 12.3,
                total_duration: 1440.0,
                failure: None,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn silent_player_is_killed_after_startup_timeout() {
        let child = shell("exec sleep 30");
        let (outcome, status) = monitor(child, Duration::from_secs(20)).await;
        assert!(!outcome.started);
        assert_eq!(outcome.failure, Some(PlaybackFailure::StartupTimeout));
        assert_eq!(status.and_then(|s| s.signal()), Some(9));
    }

    #[tokio::test]
    async fn open_failure_before_start_kills_player() {
        let child = shell("echo '[ffmpeg] https: HTTP error 403 Forbidden'; exec sleep 30");
        let (outcome, status) = monitor(child, Duration::from_secs(20)).await;
        assert!(!outcome.started);
        assert_eq!(outcome.failure, Some(PlaybackFailure::OpenFailed));
        assert_eq!(status.and_then(|s| s.signal()), Some(9));
    }

    #[tokio::test]
    async fn open_failure_after_start_is_ignored() {
        let child = shell(
            "echo ' (+) Video --vid=1'; echo 'HTTP error 404 on a subtitle'; echo '::STATUS::5.0/100.0'",
        );
        let (outcome, _) = monitor(child, Duration::from_secs(20)).await;
        assert!(outcome.started);
        assert_eq!(outcome.failure, None);
        assert_eq!(outcome.last_position, 5.0);
    }

    #[tokio::test]
    async fn exit_without_signature_is_not_started() {
        let child = shell("echo '::STATUS::3.0/100.0'");
        let (outcome, status) = monitor(child, Duration::from_secs(20)).await;
        assert!(!outcome.started);
        assert_eq!(outcome.failure, None);
        assert_eq!(outcome.last_position, 3.0);
        assert!(status.is_some_and(|s| s.success()));
    }

    #[tokio::test]
    async fn driver_passes_base_args_before_call_args() {
        let driver = PlayerDriver::new(
            "/bin/sh",
            vec![String::from("-c"), String::from("echo \"$1 (+) Video --vid=1\"")],
            Duration::from_secs(20),
        );
        let outcome = driver
            .play(&[String::from("sh"), String::from("arg")])
            .await
            .expect("player should spawn");
        assert!(outcome.started);
    }

    #[tokio::test]
    async fn missing_player_is_a_launch_error() {
        let driver =
            PlayerDriver::new("hianime-mpv-no-such-player", Vec::new(), Duration::from_secs(1));
        let err = driver.play(&[]).await.expect_err("spawn should fail");
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn driver_from_settings_splits_player_command() {
        let settings = Settings {
            player: String::from("mpv --no-config"),
            startup_timeout_secs: 5,
            ..Settings::default()
        };
        let driver = PlayerDriver::from_settings(&settings).expect("driver");
        assert_eq!(driver.program(), "mpv");
        assert_eq!(driver.base_args, vec!["--no-config"]);
        assert_eq!(driver.startup_timeout, Duration::from_secs(5));
    }
}
