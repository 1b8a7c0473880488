//! Simulation error types.
//!
//! Graph construction and evaluation errors come from `kiln_ir` and are
//! wrapped unchanged, so a failing assertion keeps its tick and message.

use std::io;

use kiln_config::ConfigError;
use kiln_ir::IrError;

/// Errors that can occur during simulation setup, execution or tracing.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// Compiling or evaluating a device failed.
    #[error(transparent)]
    Ir(#[from] IrError),

    /// The simulation configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An I/O error occurred while writing trace output.
    #[error("trace I/O error: {0}")]
    Io(#[from] io::Error),

    /// A simulator was created without any device.
    #[error("simulator has no devices")]
    NoDevices,

    /// A device index is out of range.
    #[error("no device at index {0}")]
    UnknownDevice(usize),

    /// A device has no input, output or tap with the given name.
    #[error("device '{device}' has no port '{port}'")]
    UnknownPort {
        /// Name of the device.
        device: String,
        /// Requested port name.
        port: String,
    },

    /// A waveform change referenced a signal that was never registered.
    #[error("unregistered trace signal {0}")]
    UnregisteredSignal(u32),
}

/// Convenience alias for results in this crate.
pub type SimResult<T> = Result<T, SimError>;
