pub mod budget;
pub mod console;
pub mod core;
pub mod detect;
pub mod device;
pub mod session;
pub mod shared;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};

use crate::core::logging::init_logging;
use crate::core::settings::{
    get_settings_path, load_settings, load_settings_from_file, save_settings, save_settings_to_file, RigSettings,
};
use crate::device::{Backend, RpicamBackend, SyntheticBackend};
use crate::session::{FfmpegRemuxer, RigCoordinator, UiController};
use crate::shared::errors::AppError;
use crate::shared::paths::{ensure_dir, get_log_dir};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// rpicam-vid / libcamera-vid command line tools.
    Rpicam,
    /// Generated test pattern, no camera needed.
    Synthetic,
}

#[derive(Parser, Debug)]
#[command(
    name = "camrig",
    version,
    about = "Preview and record one or two Raspberry Pi cameras"
)]
pub struct Cli {
    /// Settings file (defaults to settings.json in the data directory).
    #[arg(long, env = "CAMRIG_CONFIG")]
    pub config: Option<PathBuf>,

    /// Number of cameras to drive.
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=2))]
    pub cameras: Option<u8>,

    /// Camera backend.
    #[arg(long, value_enum, default_value_t = BackendKind::Rpicam)]
    pub backend: BackendKind,

    /// Directory recordings are written to.
    #[arg(long, env = "CAMRIG_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Write the resolved settings back to the settings file and exit.
    #[arg(long)]
    pub save_config: bool,

    /// Mirror logs to stderr.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Merge the settings file with command line overrides.
pub fn resolve_settings(cli: &Cli) -> Result<RigSettings, AppError> {
    let mut settings = match &cli.config {
        Some(path) => load_settings_from_file(path)?,
        None => load_settings(),
    };
    if let Some(count) = cli.cameras {
        settings = settings.with_camera_count(usize::from(count))?;
    }
    if let Some(output) = &cli.output {
        settings.output_dir = Some(output.clone());
    }
    settings.validate()?;
    Ok(settings)
}

/// Persist `settings` to `--config` if given, else the default location.
pub fn write_settings(cli: &Cli, settings: &RigSettings) -> Result<PathBuf, AppError> {
    match &cli.config {
        Some(path) => {
            save_settings_to_file(settings, path)?;
            Ok(path.clone())
        }
        None => {
            save_settings(settings)?;
            Ok(get_settings_path())
        }
    }
}

fn build_backend(kind: BackendKind, settings: &RigSettings) -> Result<Arc<dyn Backend>, AppError> {
    let backend: Arc<dyn Backend> = match kind {
        BackendKind::Rpicam => Arc::new(RpicamBackend::discover(settings.stop_timeouts())?),
        BackendKind::Synthetic => Arc::new(SyntheticBackend::new()),
    };
    Ok(backend)
}

fn report_budget(settings: &RigSettings, output_dir: &std::path::Path) {
    match budget::available_bytes(output_dir) {
        Ok(bytes) => {
            let line = budget::describe_budget(bytes, settings.total_bitrate());
            tracing::info!(target: "system", "Storage: {}", line);
            println!("{}: {line}", output_dir.display());

            for camera in &settings.cameras {
                let raw = budget::minutes_until_full_uncompressed(
                    bytes,
                    camera.record_size.width,
                    camera.record_size.height,
                    f64::from(camera.frame_rate),
                    budget::YUV420_BITS_PER_PIXEL,
                );
                tracing::debug!(
                    target: "system",
                    "Storage: {} raw YUV420 {}x{}@{} would fill in {:.0} min",
                    camera.label,
                    camera.record_size.width,
                    camera.record_size.height,
                    camera.frame_rate,
                    raw
                );
            }
        }
        Err(e) => {
            tracing::warn!(target: "system", "Could not query free space on {}: {}", output_dir.display(), e);
        }
    }
}

pub fn run_with(cli: Cli) -> Result<(), AppError> {
    let _logging = init_logging(&get_log_dir(), cli.verbose)?;

    let settings = resolve_settings(&cli)?;
    if cli.save_config {
        let path = write_settings(&cli, &settings)?;
        println!("settings written to {}", path.display());
        return Ok(());
    }
    tracing::info!(target: "system", "Starting with {} camera(s), {:?} backend", settings.cameras.len(), cli.backend);

    let output_dir = settings.output_dir();
    ensure_dir(&output_dir)?;
    report_budget(&settings, &output_dir);

    let remuxer = FfmpegRemuxer::new(&settings.remux_tool);
    remuxer.check_available()?;
    tracing::info!(target: "system", "Remux tool: {}", remuxer.program().display());

    let backend = build_backend(cli.backend, &settings)?;
    let coordinator = RigCoordinator::spawn(
        settings.camera_configs(),
        backend,
        Arc::new(remuxer),
        |_| None,
    )?;
    tracing::info!(target: "system", "Rig running with {} camera(s)", coordinator.camera_count());

    let controller = UiController::new(coordinator, output_dir);
    console::run_console(controller, settings.poll_interval())
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    match run_with(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(target: "system", "Fatal: {}", e);
            eprintln!("camrig: {e}");
            ExitCode::FAILURE
        }
    }
}
