pub mod channel;
pub mod controller;
pub mod coordinator;
pub mod errors;
pub mod frame;
pub mod remux;
pub mod state;
pub mod types;
pub mod worker;

pub use channel::{camera_link, CameraLink, WorkerEnds};
pub use controller::{CloseChoice, CloseOutcome, ClosePrompt, PollOutcome, UiController};
pub use coordinator::{CameraView, Controls, Notice, RigCoordinator};
pub use errors::{CaptureError, DeviceError, RemuxError, SessionError};
pub use frame::{compose_side_by_side, Frame, FrameSlot};
pub use remux::{FfmpegRemuxer, RemuxJob, Remuxer};
pub use types::{CameraConfig, CameraId, Command, Event, RecordingPaths, Size, PREVIEW_RUNNING};
pub use worker::spawn_camera;
