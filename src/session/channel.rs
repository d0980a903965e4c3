//! Channel pair linking the UI to one camera worker.

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};

use super::errors::SessionError;
use super::frame::{Frame, FrameSlot};
use super::types::{CameraId, Command, Event, RecordingPaths};
use std::sync::Arc;

/// UI side of a camera session.
#[derive(Debug)]
pub struct CameraLink {
    pub camera_id: CameraId,
    pub label: String,
    commands: Sender<Command>,
    events: Receiver<Event>,
    frames: FrameSlot,
}

impl CameraLink {
    pub fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .map_err(|_| SessionError::Disconnected(self.camera_id))
    }

    pub fn start(&self, paths: RecordingPaths) -> Result<(), SessionError> {
        self.send(Command::Start(paths))
    }

    pub fn stop(&self) -> Result<(), SessionError> {
        self.send(Command::Stop)
    }

    pub fn shutdown(&self) -> Result<(), SessionError> {
        self.send(Command::Shutdown)
    }

    /// Collect every event currently queued, in order. Never blocks.
    pub fn drain_events(&self) -> Vec<Event> {
        let mut events = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        events
    }

    /// Block for the next event, up to `timeout`.
    pub fn recv_event_timeout(&self, timeout: std::time::Duration) -> Option<Event> {
        self.events.recv_timeout(timeout).ok()
    }

    pub fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.frames.latest()
    }

    pub fn frame_slot(&self) -> &FrameSlot {
        &self.frames
    }
}

/// Worker side of a camera session.
#[derive(Debug)]
pub struct WorkerEnds {
    pub commands: Receiver<Command>,
    pub events: Sender<Event>,
    pub frames: FrameSlot,
}

/// Create a linked pair of ends for camera `camera_id`.
pub fn camera_link(camera_id: CameraId, label: impl Into<String>) -> (CameraLink, WorkerEnds) {
    let (command_tx, command_rx) = unbounded();
    let (event_tx, event_rx) = unbounded();
    let frames = FrameSlot::new();

    let link = CameraLink {
        camera_id,
        label: label.into(),
        commands: command_tx,
        events: event_rx,
        frames: frames.clone(),
    };
    let ends = WorkerEnds {
        commands: command_rx,
        events: event_tx,
        frames,
    };

    (link, ends)
}
