//! Test-pattern backend. Runs anywhere, with injectable faults.

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use image::{Rgb, RgbImage};

use super::{Backend, FrameSource, StreamConfig};
use crate::session::errors::{CaptureError, DeviceError};
use crate::session::frame::Frame;

/// Annex-B start code plus a fake NAL header.
const NAL_PREFIX: [u8; 5] = [0x00, 0x00, 0x00, 0x01, 0x65];

/// Failures to inject into one synthetic camera.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultPlan {
    pub fail_open: bool,
    pub fail_start_encoding: bool,
    pub fail_stop_encoding: bool,
    /// Resuming the preview after a stop fails.
    pub fail_resume: bool,
    /// Every Nth capture misses.
    pub drop_every: Option<u64>,
    /// Stopping the encoder also stops the preview, like some device stacks do.
    pub stop_encoding_tears_down_preview: bool,
}

/// Counters a test can read while the worker owns the camera.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeState {
    pub opened: bool,
    pub configured: bool,
    pub started: bool,
    pub frames_captured: u64,
    pub encoding: bool,
    pub encodings_started: u32,
    pub encoder_output: Option<PathBuf>,
    pub closed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SyntheticProbe(Arc<Mutex<ProbeState>>);

impl SyntheticProbe {
    pub fn snapshot(&self) -> ProbeState {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn update(&self, f: impl FnOnce(&mut ProbeState)) {
        f(&mut self.0.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

#[derive(Debug, Default)]
pub struct SyntheticBackend {
    faults: HashMap<u32, FaultPlan>,
    probes: Mutex<HashMap<u32, SyntheticProbe>>,
}

impl SyntheticBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_faults(mut self, camera_index: u32, plan: FaultPlan) -> Self {
        self.faults.insert(camera_index, plan);
        self
    }

    /// Probe for `camera_index`. Shared with the camera once it is opened.
    pub fn probe(&self, camera_index: u32) -> SyntheticProbe {
        self.probes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(camera_index)
            .or_default()
            .clone()
    }
}

impl Backend for SyntheticBackend {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn open(&self, camera_index: u32) -> Result<Box<dyn FrameSource>, DeviceError> {
        let faults = self.faults.get(&camera_index).cloned().unwrap_or_default();
        if faults.fail_open {
            return Err(DeviceError::CameraNotFound(camera_index));
        }

        let probe = self.probe(camera_index);
        probe.update(|p| p.opened = true);
        tracing::debug!(target: "camera", "[SYNTHETIC] Opened camera {}", camera_index);

        Ok(Box::new(SyntheticCamera {
            camera_index,
            faults,
            probe,
            config: None,
            running: false,
            resumed_once: false,
            tick: 0,
            encoder: None,
        }))
    }
}

struct SyntheticCamera {
    camera_index: u32,
    faults: FaultPlan,
    probe: SyntheticProbe,
    config: Option<StreamConfig>,
    running: bool,
    resumed_once: bool,
    tick: u64,
    encoder: Option<File>,
}

impl SyntheticCamera {
    fn pattern(&self, config: &StreamConfig) -> Frame {
        let width = config.preview_size.width.max(1);
        let height = config.preview_size.height.max(1);
        let shade = (self.camera_index as u8).wrapping_mul(60);
        let bar = (self.tick % u64::from(width)) as u32;
        RgbImage::from_fn(width, height, |x, y| {
            if x == bar {
                Rgb([255, 255, 255])
            } else {
                Rgb([shade, (y % 256) as u8, (x % 256) as u8])
            }
        })
    }
}

impl FrameSource for SyntheticCamera {
    fn configure(&mut self, config: StreamConfig) -> Result<(), DeviceError> {
        self.config = Some(config);
        self.probe.update(|p| p.configured = true);
        Ok(())
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        if self.config.is_none() {
            return Err(DeviceError::NotConfigured);
        }
        if self.faults.fail_resume && self.resumed_once {
            return Err(DeviceError::Start("pipeline did not come back".into()));
        }
        if self.running {
            return Ok(());
        }
        self.running = true;
        self.resumed_once = true;
        self.probe.update(|p| p.started = true);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.running = false;
        self.probe.update(|p| p.started = false);
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<Frame, CaptureError> {
        if !self.running {
            return Err(CaptureError::NotRunning);
        }
        let config = self.config.ok_or(CaptureError::NotRunning)?;
        self.tick += 1;

        if let Some(n) = self.faults.drop_every {
            if n > 0 && self.tick % n == 0 {
                return Err(CaptureError::NoFrame);
            }
        }

        if let Some(file) = self.encoder.as_mut() {
            let _ = file.write_all(&NAL_PREFIX);
            let _ = file.write_all(&self.tick.to_be_bytes());
        }

        self.probe.update(|p| p.frames_captured += 1);
        Ok(self.pattern(&config))
    }

    fn start_encoding(&mut self, _bitrate: u32, output: &Path) -> Result<(), DeviceError> {
        if self.faults.fail_start_encoding {
            return Err(DeviceError::Encoder("encoder busy".into()));
        }
        let mut file = File::create(output).map_err(|e| DeviceError::Encoder(e.to_string()))?;
        file.write_all(&NAL_PREFIX)
            .map_err(|e| DeviceError::Encoder(e.to_string()))?;

        self.encoder = Some(file);
        let output = output.to_path_buf();
        self.probe.update(|p| {
            p.encoding = true;
            p.encodings_started += 1;
            p.encoder_output = Some(output);
        });
        Ok(())
    }

    fn stop_encoding(&mut self) -> Result<(), DeviceError> {
        let Some(mut file) = self.encoder.take() else {
            return Err(DeviceError::EncoderNotRunning);
        };
        self.probe.update(|p| p.encoding = false);

        if self.faults.stop_encoding_tears_down_preview {
            self.running = false;
        }
        if self.faults.fail_stop_encoding {
            return Err(DeviceError::Stop("encoder did not flush".into()));
        }
        file.flush().map_err(|e| DeviceError::Stop(e.to_string()))
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        self.probe.update(|p| {
            p.closed = true;
            p.encoding = false;
            p.started = false;
        });
    }
}
