//! Error type shared by every capture component.

use std::io;

/// Error type for capture operations.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The configured device identifier does not name a usable device.
    #[error("invalid device '{0}'")]
    InvalidDevice(String),
    /// No attempted pixel encoding could be negotiated.
    #[error("format negotiation failed: {0}")]
    Negotiation(String),
    /// The backend replaced the negotiated pixel encoding.
    #[error("pixel format was adjusted from {requested} to {actual}")]
    FormatAdjusted {
        /// Encoding that was accepted.
        requested: String,
        /// Encoding the backend switched to.
        actual: String,
    },
    /// The backend granted fewer buffers than double-buffering needs.
    #[error("insufficient buffers: granted {granted}, need at least {minimum}")]
    InsufficientBuffers {
        /// Buffers granted by the backend.
        granted: u32,
        /// Minimum pool size.
        minimum: u32,
    },
    /// A control directive could not be parsed or applied.
    #[error("control '{name}': {reason}")]
    Control {
        /// Control name as written by the user.
        name: String,
        /// What went wrong.
        reason: String,
    },
    /// No frame was ready; the caller should retry on the next tick.
    #[error("no frame ready")]
    NotReady,
    /// One delivered frame was short or undecodable; the stream is intact.
    #[error("corrupt frame: {0}")]
    CorruptFrame(String),
    /// Operation requested in the wrong driver state.
    #[error("driver is {actual}, expected {expected}")]
    State {
        /// State required by the operation.
        expected: &'static str,
        /// Current state.
        actual: &'static str,
    },
    /// Backend or feature not available in this build.
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// Backend-reported failure.
    #[error("device error: {0}")]
    Device(String),
    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),
    /// A captured frame does not show the expected content.
    #[error("frame validation failed: {0}")]
    Validation(String),
    /// I/O error from a device call.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl CaptureError {
    /// Whether a capture call failing with this error should be retried
    /// without tearing the driver down.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NotReady | Self::CorruptFrame(_) => true,
            Self::Io(err) => matches!(
                err.raw_os_error(),
                Some(libc::EIO | libc::EAGAIN)
            ) || err.kind() == io::ErrorKind::WouldBlock,
            _ => false,
        }
    }

    /// Whether this error is a configuration-time failure that must stop
    /// capture from starting.
    pub const fn is_config_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidDevice(_)
                | Self::Negotiation(_)
                | Self::FormatAdjusted { .. }
                | Self::InsufficientBuffers { .. }
                | Self::Config(_)
        )
    }

    pub(crate) fn control<N: Into<String>, R: Into<String>>(name: N, reason: R) -> Self {
        Self::Control {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for capture operations.
pub type Result<T> = std::result::Result<T, CaptureError>;
