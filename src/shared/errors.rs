use thiserror::Error;

use crate::core::logging::LoggingError;
use crate::core::settings::SettingsError;
use crate::session::errors::{DeviceError, RemuxError, SessionError};

/// Everything that can stop the application before or while it runs.
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Logging(#[from] LoggingError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Remux(#[from] RemuxError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
