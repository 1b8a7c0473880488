//! Per-step signal capture and waveform output.
//!
//! A [`Tracer`] wraps a [`Simulator`] and records the inputs, outputs and taps
//! of every device after each step. The buffered trace is written afterwards,
//! either as VCD through a [`WaveformRecorder`] or as a plain-text table.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use kiln_common::BitVector;
use kiln_config::TraceFormat;
use kiln_ir::NodeId;
use tracing::info;

use crate::error::SimResult;
use crate::simulator::Simulator;
use crate::waveform::{VcdRecorder, WaveformRecorder};

/// One recorded signal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceSignal {
    /// Name, unique across all devices of the trace.
    pub name: String,
    /// Index of the owning device.
    pub device: usize,
    /// Port node inside the device.
    pub node: NodeId,
    /// Width in bits.
    pub width: u32,
}

/// Recorded values of every signal at one point in time.
#[derive(Clone, Debug)]
struct Sample {
    time: u64,
    values: Vec<BitVector>,
}

/// A simulator that records signal values per step.
#[derive(Debug)]
pub struct Tracer {
    sim: Simulator,
    signals: Vec<TraceSignal>,
    samples: Vec<Sample>,
}

impl Tracer {
    /// Wraps `sim`, selecting signals with its `trace.signals` setting, and
    /// records the current state as the first sample.
    pub fn new(sim: Simulator) -> Self {
        let signals = select_signals(&sim);
        let mut tracer = Self {
            sim,
            signals,
            samples: Vec::new(),
        };
        let first = capture(&tracer.signals, &tracer.sim);
        tracer.samples.push(first);
        tracer
    }

    /// Returns the wrapped simulator.
    pub fn simulator(&self) -> &Simulator {
        &self.sim
    }

    /// Returns the wrapped simulator mutably, e.g. to drive inputs.
    ///
    /// Steps run directly on it are not recorded.
    pub fn simulator_mut(&mut self) -> &mut Simulator {
        &mut self.sim
    }

    /// Unwraps the simulator, discarding the trace.
    pub fn into_simulator(self) -> Simulator {
        self.sim
    }

    /// Returns the recorded signals.
    pub fn signals(&self) -> &[TraceSignal] {
        &self.signals
    }

    /// Number of recorded samples.
    pub fn num_samples(&self) -> usize {
        self.samples.len()
    }

    /// Returns the value of the named signal in sample `index`.
    pub fn value(&self, signal: &str, index: usize) -> Option<&BitVector> {
        let pos = self.signals.iter().position(|s| s.name == signal)?;
        self.samples.get(index).map(|s| &s.values[pos])
    }

    /// Runs half a clock period and records it.
    pub fn step(&mut self) -> SimResult<()> {
        self.sim.step()?;
        let sample = capture(&self.signals, &self.sim);
        self.samples.push(sample);
        Ok(())
    }

    /// Runs `cycles` full clock cycles, recording every step.
    pub fn run(&mut self, cycles: u64) -> SimResult<()> {
        let signals = &self.signals;
        let samples = &mut self.samples;
        self.sim
            .run_observed(cycles, &mut |sim| samples.push(capture(signals, sim)))
    }

    /// Runs the simulator's reset sequence, recording every step.
    pub fn reset(&mut self) -> SimResult<()> {
        let signals = &self.signals;
        let samples = &mut self.samples;
        self.sim
            .reset_observed(&mut |sim| samples.push(capture(signals, sim)))
    }

    /// Resets, then runs the configured number of cycles.
    pub fn run_configured(&mut self) -> SimResult<()> {
        self.reset()?;
        self.run(self.sim.config().cycles)
    }

    /// Writes the trace as VCD, one scope per device.
    pub fn write_vcd<W: Write>(&self, writer: W) -> SimResult<()> {
        let mut recorder = VcdRecorder::with_timescale(writer, &self.sim.config().trace.timescale);
        self.replay(&mut recorder)
    }

    /// Replays the trace into any waveform recorder.
    ///
    /// Only changed values are recorded after the first sample.
    pub fn replay(&self, recorder: &mut dyn WaveformRecorder) -> SimResult<()> {
        for (index, dev) in self.sim.devices().iter().enumerate() {
            recorder.begin_scope(dev.name())?;
            for (id, sig) in self.signals.iter().enumerate() {
                if sig.device == index {
                    let local = self.local_name(sig);
                    recorder.register_signal(id as u32, local, sig.width)?;
                }
            }
            recorder.end_scope()?;
        }
        let mut prev: Option<&Sample> = None;
        for sample in &self.samples {
            for (id, value) in sample.values.iter().enumerate() {
                if prev.map_or(true, |p| p.values[id] != *value) {
                    recorder.record_change(sample.time, id as u32, value)?;
                }
            }
            prev = Some(sample);
        }
        recorder.finalize()
    }

    /// Writes the trace as a text table: a header row of signal names, then
    /// one row per sample with the time followed by hex values.
    pub fn write_text<W: Write>(&self, mut writer: W) -> SimResult<()> {
        let widths: Vec<usize> = self
            .signals
            .iter()
            .map(|s| s.name.len().max(s.width.div_ceil(4) as usize))
            .collect();
        let time_width = self
            .samples
            .last()
            .map_or(1, |s| s.time.to_string().len())
            .max(4);
        write!(writer, "{:>time_width$}", "time")?;
        for (sig, w) in self.signals.iter().zip(widths.iter().copied()) {
            write!(writer, " {:>w$}", sig.name)?;
        }
        writeln!(writer)?;
        for sample in &self.samples {
            write!(writer, "{:>time_width$}", sample.time)?;
            for (value, w) in sample.values.iter().zip(widths.iter().copied()) {
                write!(writer, " {:>w$}", format!("{value:x}"))?;
            }
            writeln!(writer)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Writes the trace to the configured path in the configured format.
    ///
    /// Returns the path written, or `None` when no path is configured.
    pub fn save(&self) -> SimResult<Option<PathBuf>> {
        let trace = &self.sim.config().trace;
        let Some(path) = trace.path.as_ref().map(PathBuf::from) else {
            return Ok(None);
        };
        let writer = BufWriter::new(File::create(&path)?);
        match trace.format {
            TraceFormat::Vcd => self.write_vcd(writer)?,
            TraceFormat::Text => self.write_text(writer)?,
        }
        info!(path = %path.display(), samples = self.samples.len(), "trace written");
        Ok(Some(path))
    }

    fn local_name<'a>(&self, sig: &'a TraceSignal) -> &'a str {
        let dev = self.sim.devices()[sig.device].name();
        sig.name
            .strip_prefix(dev)
            .and_then(|rest| rest.strip_prefix('.'))
            .filter(|_| self.sim.devices().len() > 1)
            .unwrap_or(&sig.name)
    }
}

/// Picks the inputs, outputs and taps of every device accepted by the
/// trace settings. Names are prefixed with the device name when tracing
/// more than one device, and suffixed with an index on collision.
fn select_signals(sim: &Simulator) -> Vec<TraceSignal> {
    let trace = &sim.config().trace;
    let multi = sim.devices().len() > 1;
    let mut taken = HashSet::new();
    let mut signals = Vec::new();
    for (device, dev) in sim.devices().iter().enumerate() {
        let ctx = dev.context();
        let ports = ctx.inputs().iter().chain(ctx.outputs()).chain(ctx.taps());
        for &node in ports {
            let Some(port) = ctx.node_name(node) else {
                continue;
            };
            if !trace.records(port) {
                continue;
            }
            let base = if multi {
                format!("{}.{port}", dev.name())
            } else {
                port.to_string()
            };
            let mut name = base.clone();
            let mut suffix = 1;
            while !taken.insert(name.clone()) {
                name = format!("{base}_{suffix}");
                suffix += 1;
            }
            let width = ctx.width(node).unwrap_or(0);
            signals.push(TraceSignal {
                name,
                device,
                node,
                width,
            });
        }
    }
    signals
}

fn capture(signals: &[TraceSignal], sim: &Simulator) -> Sample {
    let values = signals
        .iter()
        .map(|sig| {
            sim.devices()[sig.device]
                .context()
                .value(sig.node)
                .cloned()
                .unwrap_or_else(|_| BitVector::new(sig.width))
        })
        .collect();
    Sample {
        time: sim.time(),
        values,
    }
}
