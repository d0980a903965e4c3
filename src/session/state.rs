//! Pure state machine for one camera session.
//!
//! This module implements the session lifecycle as a pure function:
//! `(State, Input) -> (NewState, Vec<SideEffect>)`
//!
//! The worker executes the side effects (device calls, event emission, remux
//! spawn) and feeds their outcome back in as a new input. Inputs that do not
//! apply to the current state return it unchanged with no effects, which is
//! what makes a second `Start` while recording (or a `Stop` while idle) a no-op.

use std::time::{Duration, Instant};

use super::types::{Event, RecordingPaths, PREVIEW_RUNNING};

/// Session state.
///
/// Each variant carries only the data relevant to that state.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SessionState {
    /// Device is being opened, configured and started.
    #[default]
    Initializing,

    /// Preview running, no encoder attached.
    Previewing,

    /// Encoder is being opened for `paths`.
    Starting { paths: RecordingPaths },

    /// Encoder is writing the elementary stream.
    Recording {
        paths: RecordingPaths,
        started_at: Instant,
    },

    /// Encoder stopped, preview being resumed.
    Stopping {
        paths: RecordingPaths,
        started_at: Instant,
    },

    /// Terminal. The worker loop exits.
    ShuttingDown,
}

impl SessionState {
    /// True while the encoder is writing a file.
    pub fn is_recording(&self) -> bool {
        matches!(self, SessionState::Recording { .. })
    }

    /// True only inside the start/stop transition window.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            SessionState::Starting { .. } | SessionState::Stopping { .. }
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::ShuttingDown)
    }

    /// Paths of the recording in flight, if any.
    pub fn paths(&self) -> Option<&RecordingPaths> {
        match self {
            SessionState::Starting { paths }
            | SessionState::Recording { paths, .. }
            | SessionState::Stopping { paths, .. } => Some(paths),
            _ => None,
        }
    }

    /// Time since the encoder started, if recording.
    pub fn elapsed(&self) -> Option<Duration> {
        match self {
            SessionState::Recording { started_at, .. }
            | SessionState::Stopping { started_at, .. } => Some(started_at.elapsed()),
            _ => None,
        }
    }
}

/// Inputs that can trigger state transitions.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionInput {
    /// Device opened, configured and preview started.
    DeviceStarted,

    /// Device could not be brought up. Unrecoverable.
    DeviceFailed { message: String },

    /// Operator asked to start recording.
    StartRequested { paths: RecordingPaths },

    /// Encoder bound to the elementary stream path.
    EncoderStarted,

    /// Encoder could not be opened.
    EncoderFailed { message: String },

    /// Operator asked to stop recording.
    StopRequested,

    /// Encoder stop and preview resume finished. `failure` combines the
    /// messages of whichever of the two steps failed.
    StopFinished { failure: Option<String> },

    /// Operator (or a dropped UI) asked the worker to exit.
    ShutdownRequested,
}

/// Side effects triggered by state transitions.
///
/// These are returned by `transition()` and executed by the worker.
/// The state machine itself never performs I/O.
#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    /// Post an event to the UI.
    Emit(Event),

    /// Start encoding to `paths.elementary`.
    OpenEncoder { paths: RecordingPaths },

    /// Stop the encoder, then unconditionally resume the preview pipeline.
    StopEncoderAndResumePreview,

    /// Hand the finished file pair to a new remux task.
    SpawnRemux { paths: RecordingPaths },

    /// Release the device. Errors are swallowed.
    Teardown { stop_encoder: bool },

    /// Leave the worker loop.
    Exit,
}

/// Pure state transition function.
///
/// Returns the new state and any side effects to execute.
/// Invalid transitions return the current state with an empty effect list.
pub fn transition(state: SessionState, input: SessionInput) -> (SessionState, Vec<SideEffect>) {
    match (&state, input) {
        // Initializing + DeviceStarted -> Previewing
        (SessionState::Initializing, SessionInput::DeviceStarted) => (
            SessionState::Previewing,
            vec![
                SideEffect::Emit(Event::Status(PREVIEW_RUNNING.to_string())),
                SideEffect::Emit(Event::Ready),
            ],
        ),

        // Initializing + DeviceFailed -> exit without entering another state
        (SessionState::Initializing, SessionInput::DeviceFailed { message }) => (
            state,
            vec![
                SideEffect::Emit(Event::Fatal(format!(
                    "failed to initialize camera: {message}"
                ))),
                SideEffect::Exit,
            ],
        ),

        // Previewing + StartRequested -> Starting
        (SessionState::Previewing, SessionInput::StartRequested { paths }) => (
            SessionState::Starting {
                paths: paths.clone(),
            },
            vec![
                SideEffect::Emit(Event::Status("starting recording".to_string())),
                SideEffect::OpenEncoder { paths },
            ],
        ),

        // Starting + EncoderStarted -> Recording
        (SessionState::Starting { paths }, SessionInput::EncoderStarted) => {
            let status = format!("recording {}", paths.container_name());
            (
                SessionState::Recording {
                    paths: paths.clone(),
                    started_at: Instant::now(),
                },
                vec![
                    SideEffect::Emit(Event::RecordingState(true)),
                    SideEffect::Emit(Event::Status(status)),
                ],
            )
        }

        // Starting + EncoderFailed -> back to Previewing
        (SessionState::Starting { .. }, SessionInput::EncoderFailed { message }) => (
            SessionState::Previewing,
            vec![
                SideEffect::Emit(Event::RecordingState(false)),
                SideEffect::Emit(Event::Error(format!(
                    "failed to start recording: {message}"
                ))),
                SideEffect::Emit(Event::Ready),
            ],
        ),

        // Recording + StopRequested -> Stopping
        (SessionState::Recording { paths, started_at }, SessionInput::StopRequested) => (
            SessionState::Stopping {
                paths: paths.clone(),
                started_at: *started_at,
            },
            vec![
                SideEffect::Emit(Event::Status("stopping recording".to_string())),
                SideEffect::StopEncoderAndResumePreview,
            ],
        ),

        // Stopping + StopFinished(ok) -> Previewing, remux in the background
        (SessionState::Stopping { paths, .. }, SessionInput::StopFinished { failure: None }) => (
            SessionState::Previewing,
            vec![
                SideEffect::Emit(Event::RecordingState(false)),
                SideEffect::SpawnRemux {
                    paths: paths.clone(),
                },
            ],
        ),

        // Stopping + StopFinished(err) -> Previewing, no remux
        (
            SessionState::Stopping { .. },
            SessionInput::StopFinished {
                failure: Some(message),
            },
        ) => (
            SessionState::Previewing,
            vec![
                SideEffect::Emit(Event::RecordingState(false)),
                SideEffect::Emit(Event::Error(message)),
                SideEffect::Emit(Event::Status(PREVIEW_RUNNING.to_string())),
                SideEffect::Emit(Event::Ready),
            ],
        ),

        // Any live state + ShutdownRequested -> ShuttingDown
        (SessionState::ShuttingDown, SessionInput::ShutdownRequested) => (state, vec![]),
        (_, SessionInput::ShutdownRequested) => {
            let stop_encoder = matches!(
                state,
                SessionState::Starting { .. }
                    | SessionState::Recording { .. }
                    | SessionState::Stopping { .. }
            );
            (
                SessionState::ShuttingDown,
                vec![SideEffect::Teardown { stop_encoder }, SideEffect::Exit],
            )
        }

        // Invalid transition: return current state with no effects
        _ => (state, vec![]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> RecordingPaths {
        RecordingPaths::new("/tmp/a.h264", "/tmp/a.mp4")
    }

    fn recording() -> SessionState {
        SessionState::Recording {
            paths: paths(),
            started_at: Instant::now(),
        }
    }

    fn emitted(effects: &[SideEffect]) -> Vec<Event> {
        effects
            .iter()
            .filter_map(|e| match e {
                SideEffect::Emit(event) => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_initializing_to_previewing() {
        let (state, effects) = transition(SessionState::Initializing, SessionInput::DeviceStarted);

        assert_eq!(state, SessionState::Previewing);
        assert_eq!(
            emitted(&effects),
            vec![Event::Status(PREVIEW_RUNNING.into()), Event::Ready]
        );
    }

    #[test]
    fn test_device_failure_is_fatal_and_exits() {
        let (state, effects) = transition(
            SessionState::Initializing,
            SessionInput::DeviceFailed {
                message: "no camera".into(),
            },
        );

        assert_eq!(state, SessionState::Initializing);
        assert!(matches!(&effects[0], SideEffect::Emit(Event::Fatal(m)) if m.contains("no camera")));
        assert_eq!(effects.last(), Some(&SideEffect::Exit));
    }

    #[test]
    fn test_start_opens_encoder() {
        let (state, effects) = transition(
            SessionState::Previewing,
            SessionInput::StartRequested { paths: paths() },
        );

        assert!(matches!(state, SessionState::Starting { .. }));
        assert!(state.is_busy());
        assert!(effects.contains(&SideEffect::OpenEncoder { paths: paths() }));
    }

    #[test]
    fn test_encoder_started_emits_recording_then_status() {
        let (state, effects) = transition(
            SessionState::Starting { paths: paths() },
            SessionInput::EncoderStarted,
        );

        assert!(state.is_recording());
        let events = emitted(&effects);
        assert_eq!(events[0], Event::RecordingState(true));
        assert!(matches!(&events[1], Event::Status(s) if s.contains("a.mp4")));
    }

    #[test]
    fn test_encoder_failure_returns_to_previewing() {
        let (state, effects) = transition(
            SessionState::Starting { paths: paths() },
            SessionInput::EncoderFailed {
                message: "busy".into(),
            },
        );

        assert_eq!(state, SessionState::Previewing);
        let events = emitted(&effects);
        assert_eq!(events[0], Event::RecordingState(false));
        assert!(matches!(&events[1], Event::Error(m) if m.contains("busy")));
        assert_eq!(events[2], Event::Ready);
    }

    #[test]
    fn test_start_while_recording_is_noop() {
        let state = recording();
        let (new_state, effects) = transition(
            state.clone(),
            SessionInput::StartRequested { paths: paths() },
        );

        assert_eq!(new_state, state);
        assert!(effects.is_empty());
    }

    #[test]
    fn test_stop_while_previewing_is_noop() {
        let (state, effects) = transition(SessionState::Previewing, SessionInput::StopRequested);

        assert_eq!(state, SessionState::Previewing);
        assert!(effects.is_empty());
    }

    #[test]
    fn test_stop_success_spawns_remux() {
        let (state, effects) = transition(recording(), SessionInput::StopRequested);
        assert!(matches!(state, SessionState::Stopping { .. }));
        assert!(effects.contains(&SideEffect::StopEncoderAndResumePreview));

        let (state, effects) = transition(state, SessionInput::StopFinished { failure: None });
        assert_eq!(state, SessionState::Previewing);
        assert_eq!(effects[0], SideEffect::Emit(Event::RecordingState(false)));
        assert_eq!(effects[1], SideEffect::SpawnRemux { paths: paths() });
    }

    #[test]
    fn test_stop_failure_skips_remux() {
        let (state, _) = transition(recording(), SessionInput::StopRequested);
        let (state, effects) = transition(
            state,
            SessionInput::StopFinished {
                failure: Some("stop failed | restart failed".into()),
            },
        );

        assert_eq!(state, SessionState::Previewing);
        assert!(!effects
            .iter()
            .any(|e| matches!(e, SideEffect::SpawnRemux { .. })));
        assert_eq!(
            emitted(&effects),
            vec![
                Event::RecordingState(false),
                Event::Error("stop failed | restart failed".into()),
                Event::Status(PREVIEW_RUNNING.into()),
                Event::Ready,
            ]
        );
    }

    #[test]
    fn test_shutdown_while_recording_stops_encoder() {
        let (state, effects) = transition(recording(), SessionInput::ShutdownRequested);

        assert!(state.is_terminal());
        assert_eq!(
            effects,
            vec![SideEffect::Teardown { stop_encoder: true }, SideEffect::Exit]
        );
        assert!(emitted(&effects).is_empty());
    }

    #[test]
    fn test_shutdown_while_previewing_leaves_encoder_alone() {
        let (_, effects) = transition(SessionState::Previewing, SessionInput::ShutdownRequested);

        assert_eq!(effects[0], SideEffect::Teardown { stop_encoder: false });
    }

    #[test]
    fn test_terminal_state_ignores_everything() {
        for input in [
            SessionInput::ShutdownRequested,
            SessionInput::StopRequested,
            SessionInput::StartRequested { paths: paths() },
        ] {
            let (state, effects) = transition(SessionState::ShuttingDown, input);
            assert!(state.is_terminal());
            assert!(effects.is_empty());
        }
    }
}
