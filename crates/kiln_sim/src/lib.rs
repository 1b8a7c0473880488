//! Cycle-based simulator for Kiln circuits.
//!
//! This crate drives compiled [`kiln_ir::Context`] graphs with a shared clock,
//! using the two-phase `tick_next`/`tick` protocol followed by a settling
//! `eval`, and records per-step signal values as VCD or text tables.
//!
//! # Architecture
//!
//! A [`Device`] owns one compiled context and knows its clock and reset
//! inputs. A [`Simulator`] steps any number of devices in lock step, half a
//! clock period at a time. A [`Tracer`] wraps a simulator, samples every
//! input, output and tap after each step, and replays the buffered samples
//! into a [`WaveformRecorder`] such as [`VcdRecorder`].
//!
//! # Usage
//!
//! ```
//! use kiln_ir::{AluOp, Context};
//! use kiln_sim::{Device, Simulator};
//!
//! let mut ctx = Context::new("counter");
//! let next = ctx.var(4);
//! let count = ctx.register(next).unwrap();
//! let one = ctx.literal_u64(1, 4).unwrap();
//! let inc = ctx.alu2(AluOp::Add, count, one).unwrap();
//! ctx.assign(next, inc).unwrap();
//! let out = ctx.output("count", 4).unwrap();
//! ctx.assign(out, count).unwrap();
//!
//! let mut sim = Simulator::new(vec![Device::new(ctx).unwrap()]).unwrap();
//! sim.run(3).unwrap();
//! assert_eq!(sim.output(0, "count").unwrap().to_u64(), Some(3));
//! ```
//!
//! # Modules
//!
//! - `error`: Simulation error types
//! - `device`: Compiled circuits and their port access
//! - `simulator`: The clocked step/run/reset loop
//! - `tracer`: Per-step capture, VCD and text output
//! - `waveform`: Waveform recording (VCD format)

#![warn(missing_docs)]

pub mod device;
pub mod error;
pub mod simulator;
pub mod tracer;
pub mod waveform;

use std::path::Path;

use kiln_config::KilnConfig;
use kiln_ir::Context;
use tracing::info;

pub use device::Device;
pub use error::{SimError, SimResult};
pub use simulator::Simulator;
pub use tracer::{TraceSignal, Tracer};
pub use waveform::{VcdRecorder, WaveformRecorder};

/// High-level entry point: compiles `contexts`, runs the configured reset
/// sequence and cycle count, and writes the trace if a path is configured.
///
/// Returns the tracer so callers can inspect outputs and samples.
pub fn simulate(contexts: Vec<Context>, config: &KilnConfig) -> SimResult<Tracer> {
    let devices = contexts
        .into_iter()
        .map(|ctx| Device::with_config(ctx, config))
        .collect::<SimResult<Vec<_>>>()?;
    let sim = Simulator::with_config(devices, config.sim.clone())?;
    let mut tracer = Tracer::new(sim);
    tracer.run_configured()?;
    if let Some(path) = tracer.save()? {
        info!(path = %path.display(), "simulation trace saved");
    }
    Ok(tracer)
}

/// Like [`simulate`], reading `kiln.toml` from `project_dir` (defaults if absent).
pub fn simulate_project(contexts: Vec<Context>, project_dir: &Path) -> SimResult<Tracer> {
    let config = kiln_config::load_config(project_dir)?;
    simulate(contexts, &config)
}
