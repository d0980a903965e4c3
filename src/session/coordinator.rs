//! RigCoordinator - UI-side view over every camera worker in the rig.
//!
//! The coordinator never touches a device. It owns the `CameraLink`s, folds
//! their events into a per-camera `CameraView`, and derives which operator
//! controls are enabled:
//! - Record only when every camera is ready and none is recording
//! - Stop when any camera is recording

use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

use super::channel::CameraLink;
use super::errors::SessionError;
use super::frame::Frame;
use super::remux::Remuxer;
use super::types::{CameraConfig, CameraId, Event, RecordingPaths};
use super::worker::spawn_camera;
use crate::detect::FrameAnnotator;
use crate::device::Backend;

/// Last known state of one camera, as seen by the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraView {
    pub camera_id: CameraId,
    pub label: String,
    pub ready: bool,
    pub recording: bool,
    /// `Start` sent, encoder not acknowledged yet.
    pub starting: bool,
    /// Recording stopped, remux not finished yet.
    pub saving: bool,
    pub status: String,
    pub fatal: Option<String>,
    pub last_saved: Option<std::path::PathBuf>,
}

impl CameraView {
    fn new(camera_id: CameraId, label: &str) -> Self {
        Self {
            camera_id,
            label: label.to_string(),
            ready: false,
            recording: false,
            starting: false,
            saving: false,
            status: "starting".to_string(),
            fatal: None,
            last_saved: None,
        }
    }

    /// Nothing would be lost if the camera were shut down now.
    pub fn is_idle(&self) -> bool {
        self.fatal.is_some() || !(self.recording || self.starting || self.saving)
    }

    /// Recording, or about to.
    pub fn has_recording_in_flight(&self) -> bool {
        self.fatal.is_none() && (self.recording || self.starting)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Controls {
    pub record_enabled: bool,
    pub stop_enabled: bool,
}

/// Something the operator should be told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Saved {
        camera_id: CameraId,
        label: String,
        path: std::path::PathBuf,
    },
    Alert {
        camera_id: CameraId,
        label: String,
        message: String,
    },
    Fatal {
        camera_id: CameraId,
        label: String,
        message: String,
    },
}

pub struct RigCoordinator {
    links: Vec<CameraLink>,
    views: Vec<CameraView>,
    workers: Vec<JoinHandle<()>>,
    controls: Controls,
}

impl RigCoordinator {
    /// Coordinate links whose workers are managed elsewhere.
    pub fn from_links(links: Vec<CameraLink>) -> Self {
        let views = links
            .iter()
            .map(|link| CameraView::new(link.camera_id, &link.label))
            .collect();
        Self {
            links,
            views,
            workers: Vec::new(),
            controls: Controls::default(),
        }
    }

    /// Spawn one worker per config.
    ///
    /// `annotator_for` is asked once per camera for an optional frame annotator.
    pub fn spawn(
        configs: Vec<CameraConfig>,
        backend: Arc<dyn Backend>,
        remuxer: Arc<dyn Remuxer>,
        mut annotator_for: impl FnMut(&CameraConfig) -> Option<Box<dyn FrameAnnotator>>,
    ) -> Result<Self, SessionError> {
        let mut links = Vec::with_capacity(configs.len());
        let mut workers = Vec::with_capacity(configs.len());

        for config in configs {
            let annotator = annotator_for(&config);
            tracing::info!(target: "camera", "[COORDINATOR] Spawning worker {} (index {})", config.label, config.camera_index);
            match spawn_camera(config, Arc::clone(&backend), Arc::clone(&remuxer), annotator) {
                Ok((link, handle)) => {
                    links.push(link);
                    workers.push(handle);
                }
                Err(e) => {
                    // Release the workers already running before reporting.
                    for link in &links {
                        let _ = link.shutdown();
                    }
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(e);
                }
            }
        }

        let mut coordinator = Self::from_links(links);
        coordinator.workers = workers;
        Ok(coordinator)
    }

    pub fn views(&self) -> &[CameraView] {
        &self.views
    }

    pub fn controls(&self) -> Controls {
        self.controls
    }

    pub fn camera_count(&self) -> usize {
        self.links.len()
    }

    /// Send `Start` to every camera with paths stamped `stamp` under `output_dir`.
    ///
    /// Returns `None` (and sends nothing) while Record is disabled.
    pub fn record(&mut self, output_dir: &Path, stamp: &str) -> Option<Vec<RecordingPaths>> {
        if !self.controls.record_enabled {
            tracing::debug!(target: "camera", "[COORDINATOR] Record ignored, controls {:?}", self.controls);
            return None;
        }

        let mut started = Vec::with_capacity(self.links.len());
        for (link, view) in self.links.iter().zip(self.views.iter_mut()) {
            let paths = RecordingPaths::in_dir(output_dir, &link.label, stamp);
            match link.start(paths.clone()) {
                Ok(()) => {
                    view.ready = false;
                    view.starting = true;
                    started.push(paths);
                }
                Err(e) => {
                    tracing::warn!(target: "camera", "[COORDINATOR] {}", e);
                }
            }
        }

        tracing::info!(target: "camera", "[COORDINATOR] Record sent to {} camera(s)", started.len());
        self.recompute_controls();
        Some(started)
    }

    /// Send `Stop` to every camera. Cameras that are not recording ignore it,
    /// and one still opening its encoder handles the start first.
    pub fn stop(&mut self) -> bool {
        if !self.controls.stop_enabled && !self.any_starting() {
            return false;
        }
        for link in &self.links {
            if let Err(e) = link.stop() {
                tracing::warn!(target: "camera", "[COORDINATOR] {}", e);
            }
        }
        tracing::info!(target: "camera", "[COORDINATOR] Stop sent");
        true
    }

    /// Send `Shutdown` to every camera. Safe to call more than once.
    pub fn shutdown(&mut self) {
        tracing::info!(target: "camera", "[COORDINATOR] Shutting down {} camera(s)", self.links.len());
        for link in &self.links {
            let _ = link.shutdown();
        }
        self.controls = Controls::default();
    }

    /// Fold one event from `camera` into its view.
    pub fn apply(&mut self, camera: CameraId, event: Event) -> Option<Notice> {
        let view = self.views.iter_mut().find(|v| v.camera_id == camera)?;

        let notice = match event {
            Event::Ready => {
                view.ready = true;
                view.starting = false;
                view.saving = false;
                None
            }
            Event::Status(text) => {
                view.status = text;
                None
            }
            Event::RecordingState(recording) => {
                view.recording = recording;
                view.ready = false;
                view.starting = false;
                view.saving = !recording;
                None
            }
            Event::Saved(path) => {
                view.status = format!("saved {}", super::types::file_name(&path));
                view.last_saved = Some(path.clone());
                Some(Notice::Saved {
                    camera_id: camera,
                    label: view.label.clone(),
                    path,
                })
            }
            Event::Error(message) => {
                view.status = "error".to_string();
                Some(Notice::Alert {
                    camera_id: camera,
                    label: view.label.clone(),
                    message,
                })
            }
            Event::Fatal(message) => {
                view.ready = false;
                view.recording = false;
                view.starting = false;
                view.saving = false;
                view.status = "failed".to_string();
                view.fatal = Some(message.clone());
                Some(Notice::Fatal {
                    camera_id: camera,
                    label: view.label.clone(),
                    message,
                })
            }
        };

        self.recompute_controls();
        notice
    }

    /// Drain every pending event from every camera.
    pub fn poll(&mut self) -> Vec<Notice> {
        let batches: Vec<(CameraId, Vec<Event>)> = self
            .links
            .iter()
            .map(|link| (link.camera_id, link.drain_events()))
            .collect();

        let mut notices = Vec::new();
        for (camera, events) in batches {
            for event in events {
                notices.extend(self.apply(camera, event));
            }
        }
        notices
    }

    /// True when every camera is idle or dead.
    pub fn all_idle(&self) -> bool {
        self.views.iter().all(CameraView::is_idle)
    }

    /// True while any camera is recording or has an unacknowledged `Start`.
    pub fn any_recording_in_flight(&self) -> bool {
        self.views.iter().any(CameraView::has_recording_in_flight)
    }

    pub fn any_starting(&self) -> bool {
        self.views.iter().any(|v| v.starting && v.fatal.is_none())
    }

    pub fn any_recording(&self) -> bool {
        self.views.iter().any(|v| v.recording)
    }

    pub fn any_fatal(&self) -> bool {
        self.views.iter().any(|v| v.fatal.is_some())
    }

    /// Latest frame of every camera, in rig order.
    pub fn latest_frames(&self) -> Vec<Option<Arc<Frame>>> {
        self.links.iter().map(CameraLink::latest_frame).collect()
    }

    /// Wait for every spawned worker thread to exit.
    pub fn join_workers(&mut self) {
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!(target: "camera", "[COORDINATOR] Worker thread panicked");
            }
        }
    }

    fn recompute_controls(&mut self) {
        let live = !self.views.is_empty() && !self.any_fatal();
        self.controls = Controls {
            record_enabled: live && self.views.iter().all(|v| v.ready && !v.recording),
            stop_enabled: self.any_recording(),
        };
    }
}
