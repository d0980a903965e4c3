//! Operator-facing controller: record, stop, and a close that waits for
//! in-flight recordings to be saved.

use std::path::{Path, PathBuf};

use super::coordinator::{Controls, Notice, RigCoordinator};
use super::types::RecordingPaths;
use crate::shared::paths::{ensure_dir, recording_stamp};

/// Answer to "recording in progress, quit anyway?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseChoice {
    SaveAndQuit,
    QuitWithoutSaving,
    KeepRecording,
}

pub trait ClosePrompt {
    fn ask(&mut self) -> CloseChoice;
}

impl<F> ClosePrompt for F
where
    F: FnMut() -> CloseChoice,
{
    fn ask(&mut self) -> CloseChoice {
        self()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Shutdown sent to every camera.
    Closed,
    /// Shutdown follows once every recording is saved.
    Deferred,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PollOutcome {
    pub notices: Vec<Notice>,
    pub controls: Controls,
    /// The UI should exit.
    pub exit: bool,
}

pub struct UiController {
    coordinator: RigCoordinator,
    output_dir: PathBuf,
    close_pending: bool,
    closed: bool,
}

impl UiController {
    pub fn new(coordinator: RigCoordinator, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            coordinator,
            output_dir: output_dir.into(),
            close_pending: false,
            closed: false,
        }
    }

    pub fn coordinator(&self) -> &RigCoordinator {
        &self.coordinator
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn is_recording(&self) -> bool {
        self.coordinator.any_recording()
    }

    /// Closing now would lose a recording, so the operator must be asked.
    pub fn needs_close_prompt(&self) -> bool {
        !self.closed && self.coordinator.any_recording_in_flight()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn controls(&self) -> Controls {
        let mut controls = self.coordinator.controls();
        if self.close_pending || self.closed {
            controls.record_enabled = false;
        }
        controls
    }

    /// Start recording on every camera. `Ok(None)` when Record is disabled.
    pub fn record(&mut self) -> std::io::Result<Option<Vec<RecordingPaths>>> {
        if !self.controls().record_enabled {
            return Ok(None);
        }
        ensure_dir(&self.output_dir)?;
        let stamp = recording_stamp(chrono::Local::now());
        Ok(self.coordinator.record(&self.output_dir, &stamp))
    }

    pub fn stop(&mut self) -> bool {
        self.coordinator.stop()
    }

    /// Close the rig, asking `prompt` first if a recording is running or
    /// starting. A remux still in flight delays the close without asking.
    pub fn close(&mut self, prompt: &mut dyn ClosePrompt) -> CloseOutcome {
        if self.closed {
            return CloseOutcome::Closed;
        }
        if self.coordinator.all_idle() {
            self.shutdown();
            return CloseOutcome::Closed;
        }
        if !self.coordinator.any_recording_in_flight() {
            tracing::info!(target: "system", "[CONTROLLER] Close deferred until remux finishes");
            self.close_pending = true;
            return CloseOutcome::Deferred;
        }

        match prompt.ask() {
            CloseChoice::SaveAndQuit => {
                tracing::info!(target: "system", "[CONTROLLER] Close deferred until recordings are saved");
                self.coordinator.stop();
                self.close_pending = true;
                CloseOutcome::Deferred
            }
            CloseChoice::QuitWithoutSaving => {
                tracing::warn!(target: "system", "[CONTROLLER] Closing without saving");
                self.shutdown();
                CloseOutcome::Closed
            }
            CloseChoice::KeepRecording => CloseOutcome::Cancelled,
        }
    }

    /// Drain camera events and advance a pending close.
    pub fn poll(&mut self) -> PollOutcome {
        let notices = self.coordinator.poll();

        if !self.closed {
            if let Some(Notice::Fatal { label, message, .. }) =
                notices.iter().find(|n| matches!(n, Notice::Fatal { .. }))
            {
                tracing::error!(target: "system", "[CONTROLLER] {} failed: {}, closing rig", label, message);
                self.shutdown();
            } else if self.close_pending && self.coordinator.all_idle() {
                tracing::info!(target: "system", "[CONTROLLER] Recordings saved, closing");
                self.shutdown();
            }
        }

        PollOutcome {
            notices,
            controls: self.controls(),
            exit: self.closed,
        }
    }

    /// Shut down (if not already) and wait for every worker thread.
    pub fn finish(mut self) {
        self.shutdown();
        self.coordinator.join_workers();
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.coordinator.shutdown();
        self.close_pending = false;
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::channel::{camera_link, WorkerEnds};
    use crate::session::types::{Command, Event};

    fn controller(n: usize) -> (UiController, Vec<WorkerEnds>, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let (links, ends): (Vec<_>, Vec<_>) = (0..n)
            .map(|i| camera_link(i, format!("cam{i}")))
            .unzip();
        let controller = UiController::new(RigCoordinator::from_links(links), tmp.path().join("out"));
        (controller, ends, tmp)
    }

    fn send_all(ends: &[WorkerEnds], event: Event) {
        for end in ends {
            end.events.send(event.clone()).unwrap();
        }
    }

    fn commands(end: &WorkerEnds) -> Vec<Command> {
        end.commands.try_iter().collect()
    }

    #[test]
    fn test_record_creates_output_dir() {
        let (mut ui, ends, _tmp) = controller(1);
        send_all(&ends, Event::Ready);
        ui.poll();

        let paths = ui.record().unwrap().unwrap();

        assert!(ui.output_dir().is_dir());
        assert!(paths[0].container.starts_with(ui.output_dir()));
        assert!(matches!(commands(&ends[0]).as_slice(), [Command::Start(_)]));
    }

    #[test]
    fn test_close_when_idle_shuts_down() {
        let (mut ui, ends, _tmp) = controller(2);
        send_all(&ends, Event::Ready);
        ui.poll();

        let mut never = || -> CloseChoice { panic!("prompt must not be shown") };
        assert_eq!(ui.close(&mut never), CloseOutcome::Closed);
        assert!(ui.poll().exit);
        for end in &ends {
            assert_eq!(commands(end), vec![Command::Shutdown]);
        }
    }

    #[test]
    fn test_save_and_quit_waits_for_remux() {
        let (mut ui, ends, _tmp) = controller(2);
        send_all(&ends, Event::Ready);
        send_all(&ends, Event::RecordingState(true));
        ui.poll();

        let mut save = || CloseChoice::SaveAndQuit;
        assert_eq!(ui.close(&mut save), CloseOutcome::Deferred);
        for end in &ends {
            assert_eq!(commands(end), vec![Command::Stop]);
        }
        assert!(!ui.controls().record_enabled);

        send_all(&ends, Event::RecordingState(false));
        assert!(!ui.poll().exit);

        ends[0].events.send(Event::Ready).unwrap();
        assert!(!ui.poll().exit);

        ends[1].events.send(Event::Ready).unwrap();
        assert!(ui.poll().exit);
        for end in &ends {
            assert_eq!(commands(end), vec![Command::Shutdown]);
        }
    }

    #[test]
    fn test_close_right_after_record_asks_and_stops() {
        let (mut ui, ends, _tmp) = controller(1);
        send_all(&ends, Event::Ready);
        ui.poll();
        ui.record().unwrap().unwrap();
        assert!(ui.needs_close_prompt());

        let mut asked = 0;
        let mut save = || {
            asked += 1;
            CloseChoice::SaveAndQuit
        };
        assert_eq!(ui.close(&mut save), CloseOutcome::Deferred);
        assert_eq!(asked, 1);
        assert!(matches!(
            commands(&ends[0]).as_slice(),
            [Command::Start(_), Command::Stop]
        ));

        send_all(&ends, Event::RecordingState(true));
        send_all(&ends, Event::RecordingState(false));
        assert!(!ui.poll().exit);

        send_all(&ends, Event::Ready);
        assert!(ui.poll().exit);
        assert_eq!(commands(&ends[0]), vec![Command::Shutdown]);
    }

    #[test]
    fn test_close_during_remux_waits_without_asking() {
        let (mut ui, ends, tmp) = controller(1);
        send_all(&ends, Event::Ready);
        send_all(&ends, Event::RecordingState(true));
        send_all(&ends, Event::RecordingState(false));
        send_all(&ends, Event::Status("saving a.mp4".into()));
        ui.poll();
        assert!(!ui.needs_close_prompt());

        let mut never = || -> CloseChoice { panic!("prompt must not be shown") };
        assert_eq!(ui.close(&mut never), CloseOutcome::Deferred);
        assert!(commands(&ends[0]).is_empty());
        assert!(!ui.poll().exit);
        assert!(!ui.controls().record_enabled);

        send_all(&ends, Event::Saved(tmp.path().join("a.mp4")));
        send_all(&ends, Event::Status("preview running".into()));
        assert!(!ui.poll().exit);

        send_all(&ends, Event::Ready);
        assert!(ui.poll().exit);
        assert_eq!(commands(&ends[0]), vec![Command::Shutdown]);
    }

    #[test]
    fn test_quit_without_saving_shuts_down_immediately() {
        let (mut ui, ends, _tmp) = controller(1);
        send_all(&ends, Event::RecordingState(true));
        ui.poll();

        let mut discard = || CloseChoice::QuitWithoutSaving;
        assert_eq!(ui.close(&mut discard), CloseOutcome::Closed);
        assert_eq!(commands(&ends[0]), vec![Command::Shutdown]);
    }

    #[test]
    fn test_keep_recording_cancels_close() {
        let (mut ui, ends, _tmp) = controller(1);
        send_all(&ends, Event::RecordingState(true));
        ui.poll();

        let mut keep = || CloseChoice::KeepRecording;
        assert_eq!(ui.close(&mut keep), CloseOutcome::Cancelled);
        assert!(commands(&ends[0]).is_empty());
        assert!(ui.is_recording());
    }

    #[test]
    fn test_fatal_closes_remaining_cameras() {
        let (mut ui, ends, _tmp) = controller(2);
        send_all(&ends, Event::Ready);
        ends[1].events.send(Event::Fatal("camera vanished".into())).unwrap();

        let outcome = ui.poll();

        assert!(outcome.exit);
        assert!(matches!(outcome.notices.as_slice(), [Notice::Fatal { camera_id: 1, .. }]));
        assert_eq!(commands(&ends[0]), vec![Command::Shutdown]);
    }
}
