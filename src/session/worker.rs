//! CameraWorker - single owner of one camera device.
//!
//! The worker runs on its own thread and is the only code that touches its
//! `FrameSource`. It interleaves three jobs in one loop:
//! - drain the command queue and feed each command through the state machine
//! - capture one preview frame, annotate it, publish it to the frame slot
//! - wait one frame interval (woken early by a new command)
//!
//! Every device failure is translated into an `Event` here and never escapes.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, TryRecvError};

use super::channel::{camera_link, CameraLink, WorkerEnds};
use super::errors::SessionError;
use super::remux::{spawn_remux_task, RemuxJob, Remuxer};
use super::state::{transition, SessionInput, SessionState, SideEffect};
use super::types::{CameraConfig, Command, Event, RecordingPaths, PREVIEW_RUNNING};
use crate::detect::FrameAnnotator;
use crate::device::{Backend, FrameSource, StreamConfig};

/// Pause after a missed frame before trying again.
const CAPTURE_RETRY_DELAY: Duration = Duration::from_millis(20);

pub struct CameraWorker {
    config: CameraConfig,
    backend: Arc<dyn Backend>,
    remuxer: Arc<dyn Remuxer>,
    annotator: Option<Box<dyn FrameAnnotator>>,
    ends: WorkerEnds,
    state: SessionState,
    source: Option<Box<dyn FrameSource>>,
}

/// Spawn a worker thread for `config` and return the UI end of its channels.
pub fn spawn_camera(
    config: CameraConfig,
    backend: Arc<dyn Backend>,
    remuxer: Arc<dyn Remuxer>,
    annotator: Option<Box<dyn FrameAnnotator>>,
) -> Result<(CameraLink, JoinHandle<()>), SessionError> {
    let camera_id = config.camera_id;
    let (link, ends) = camera_link(camera_id, config.label.clone());
    let worker = CameraWorker::new(config, backend, remuxer, annotator, ends);

    let handle = std::thread::Builder::new()
        .name(format!("worker-{}", link.label))
        .spawn(move || worker.run())
        .map_err(|source| SessionError::Spawn {
            camera: camera_id,
            source,
        })?;

    Ok((link, handle))
}

impl CameraWorker {
    pub fn new(
        config: CameraConfig,
        backend: Arc<dyn Backend>,
        remuxer: Arc<dyn Remuxer>,
        annotator: Option<Box<dyn FrameAnnotator>>,
        ends: WorkerEnds,
    ) -> Self {
        Self {
            config,
            backend,
            remuxer,
            annotator,
            ends,
            state: SessionState::default(),
            source: None,
        }
    }

    /// Worker main loop. Returns once the session reaches a terminal state.
    pub fn run(mut self) {
        tracing::info!(target: "camera", "[WORKER {}] Starting on {} backend", self.config.label, self.backend.name());

        if !self.open_device() {
            return;
        }

        let interval = self.config.frame_interval();
        loop {
            if !self.drain_commands() {
                break;
            }

            self.capture_and_publish();

            match self.ends.commands.recv_timeout(interval) {
                Ok(command) => {
                    if !self.handle_command(command) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    if !self.handle_command(Command::Shutdown) {
                        break;
                    }
                }
            }
        }

        tracing::info!(target: "camera", "[WORKER {}] Exited", self.config.label);
    }

    /// Open, configure and start the device. Returns false if the worker must exit.
    fn open_device(&mut self) -> bool {
        let stream = StreamConfig::from(&self.config);
        let result = self.backend.open(self.config.camera_index).and_then(|mut source| {
            source.configure(stream)?;
            source.start()?;
            Ok(source)
        });

        let input = match result {
            Ok(source) => {
                self.source = Some(source);
                SessionInput::DeviceStarted
            }
            Err(e) => {
                tracing::error!(target: "camera", "[WORKER {}] Device init failed: {}", self.config.label, e);
                SessionInput::DeviceFailed {
                    message: e.to_string(),
                }
            }
        };

        self.apply(input)
    }

    /// Handle every queued command. Returns false once the worker must exit.
    fn drain_commands(&mut self) -> bool {
        loop {
            match self.ends.commands.try_recv() {
                Ok(command) => {
                    if !self.handle_command(command) {
                        return false;
                    }
                }
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return self.handle_command(Command::Shutdown),
            }
        }
    }

    fn handle_command(&mut self, command: Command) -> bool {
        tracing::debug!(target: "camera", "[WORKER {}] Command {:?} in {:?}", self.config.label, command, self.state);
        let input = match command {
            Command::Start(paths) => SessionInput::StartRequested { paths },
            Command::Stop => SessionInput::StopRequested,
            Command::Shutdown => SessionInput::ShutdownRequested,
        };
        self.apply(input)
    }

    /// Run `input` (and any inputs produced by its effects) through the state
    /// machine. Returns false if an `Exit` effect was executed.
    fn apply(&mut self, input: SessionInput) -> bool {
        let mut pending = VecDeque::from([input]);
        let mut keep_running = true;

        while let Some(input) = pending.pop_front() {
            let (next, effects) = transition(std::mem::take(&mut self.state), input);
            self.state = next;

            for effect in effects {
                match self.execute_effect(effect) {
                    EffectResult::Continue => {}
                    EffectResult::Feed(input) => pending.push_back(input),
                    EffectResult::Exit => keep_running = false,
                }
            }
        }

        keep_running
    }

    fn execute_effect(&mut self, effect: SideEffect) -> EffectResult {
        match effect {
            SideEffect::Emit(event) => {
                self.emit(event);
                EffectResult::Continue
            }
            SideEffect::OpenEncoder { paths } => EffectResult::Feed(self.open_encoder(&paths)),
            SideEffect::StopEncoderAndResumePreview => {
                EffectResult::Feed(SessionInput::StopFinished {
                    failure: self.stop_encoder_and_resume(),
                })
            }
            SideEffect::SpawnRemux { paths } => {
                self.spawn_remux(paths);
                EffectResult::Continue
            }
            SideEffect::Teardown { stop_encoder } => {
                self.teardown(stop_encoder);
                EffectResult::Continue
            }
            SideEffect::Exit => EffectResult::Exit,
        }
    }

    fn emit(&self, event: Event) {
        tracing::debug!(target: "camera", "[WORKER {}] Event {:?}", self.config.label, event);
        if self.ends.events.send(event).is_err() {
            tracing::debug!(target: "camera", "[WORKER {}] UI gone, event dropped", self.config.label);
        }
    }

    fn open_encoder(&mut self, paths: &RecordingPaths) -> SessionInput {
        let Some(source) = self.source.as_mut() else {
            return SessionInput::EncoderFailed {
                message: "camera is not open".into(),
            };
        };

        match source.start_encoding(self.config.bitrate, &paths.elementary) {
            Ok(()) => {
                tracing::info!(target: "camera", "[WORKER {}] Recording to {}", self.config.label, paths.elementary.display());
                SessionInput::EncoderStarted
            }
            Err(e) => {
                tracing::error!(target: "camera", "[WORKER {}] Encoder start failed: {}", self.config.label, e);
                SessionInput::EncoderFailed {
                    message: e.to_string(),
                }
            }
        }
    }

    /// Stop the encoder, then always try to bring the preview back.
    /// Returns the combined failure message, if any step failed.
    fn stop_encoder_and_resume(&mut self) -> Option<String> {
        let Some(source) = self.source.as_mut() else {
            return Some("camera is not open".into());
        };

        let stopped = source.stop_encoding();
        let resumed = source.start();

        let failure = match (stopped, resumed) {
            (Ok(()), Ok(())) => None,
            (Err(stop), Err(resume)) => Some(format!(
                "stop recording failed: {stop} | restart preview failed: {resume}"
            )),
            (Err(stop), Ok(())) => Some(format!("stop recording failed: {stop}")),
            (Ok(()), Err(resume)) => Some(format!("failed to restart preview after stop: {resume}")),
        };

        match &failure {
            Some(message) => {
                tracing::error!(target: "camera", "[WORKER {}] {}", self.config.label, message)
            }
            None => tracing::info!(
                target: "camera",
                "[WORKER {}] Recording stopped after {:.1}s: {}",
                self.config.label,
                self.state.elapsed().unwrap_or_default().as_secs_f64(),
                self.state
                    .paths()
                    .map(|p| p.elementary.display().to_string())
                    .unwrap_or_default()
            ),
        }
        failure
    }

    fn spawn_remux(&self, paths: RecordingPaths) {
        let job = RemuxJob {
            input: paths.elementary,
            output: paths.container,
            frame_rate: self.config.frame_rate,
        };

        if let Err(e) = spawn_remux_task(
            &self.config.label,
            job,
            Arc::clone(&self.remuxer),
            self.ends.events.clone(),
        ) {
            tracing::error!(target: "camera", "[WORKER {}] Could not start remux task: {}", self.config.label, e);
            self.emit(Event::Error(format!("remux failed: {e}")));
            self.emit(Event::Status(PREVIEW_RUNNING.to_string()));
            self.emit(Event::Ready);
        }
    }

    /// Best-effort release of the device. Never reports errors.
    fn teardown(&mut self, stop_encoder: bool) {
        tracing::info!(target: "camera", "[WORKER {}] Tearing down (stop_encoder={})", self.config.label, stop_encoder);

        let Some(mut source) = self.source.take() else {
            return;
        };
        if stop_encoder {
            if let Err(e) = source.stop_encoding() {
                tracing::warn!(target: "camera", "[WORKER {}] Encoder stop during teardown: {}", self.config.label, e);
            }
        }
        if let Err(e) = source.stop() {
            tracing::warn!(target: "camera", "[WORKER {}] Device stop during teardown: {}", self.config.label, e);
        }
    }

    fn capture_and_publish(&mut self) {
        let Some(source) = self.source.as_mut() else {
            return;
        };

        match source.capture_frame() {
            Ok(mut frame) => {
                if let Some(annotator) = self.annotator.as_mut() {
                    annotator.annotate(&mut frame);
                }
                self.ends.frames.publish(frame);
            }
            Err(e) => {
                tracing::trace!(target: "camera", "[WORKER {}] Frame missed: {}", self.config.label, e);
                std::thread::sleep(CAPTURE_RETRY_DELAY);
            }
        }
    }
}

enum EffectResult {
    Continue,
    Feed(SessionInput),
    Exit,
}
