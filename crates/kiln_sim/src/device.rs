//! Compiled circuits ready for simulation.

use kiln_common::BitVector;
use kiln_config::KilnConfig;
use kiln_ir::{CompileStats, Compiler, Context, NodeId};
use tracing::debug;

use crate::error::{SimError, SimResult};

/// One compiled circuit driven by a [`Simulator`](crate::Simulator).
///
/// The clock and reset inputs are the context's implicit ones. A context that
/// never used the implicit clock may still expose an input named after
/// `sim.clock` in the configuration; that input is toggled instead.
#[derive(Debug)]
pub struct Device {
    ctx: Context,
    clock: Option<NodeId>,
    reset: Option<NodeId>,
    stats: CompileStats,
}

impl Device {
    /// Compiles `ctx` with the default configuration.
    pub fn new(ctx: Context) -> SimResult<Self> {
        Self::with_config(ctx, &KilnConfig::default())
    }

    /// Compiles `ctx` with the `[compile]` switches of `config`.
    pub fn with_config(mut ctx: Context, config: &KilnConfig) -> SimResult<Self> {
        let stats = Compiler::new(&mut ctx, &config.compile).run()?;
        debug!(device = ctx.name(), %stats, "device compiled");
        let clock = ctx
            .clock_input()
            .or_else(|| ctx.input_id(&config.sim.clock).ok());
        let reset = ctx
            .reset_input()
            .or_else(|| ctx.input_id(&config.sim.reset).ok());
        Ok(Self {
            ctx,
            clock,
            reset,
            stats,
        })
    }

    /// Returns the device's name.
    pub fn name(&self) -> &str {
        self.ctx.name()
    }

    /// Returns the compiled circuit.
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub(crate) fn context_mut(&mut self) -> &mut Context {
        &mut self.ctx
    }

    /// Returns the counters of the compile run.
    pub fn stats(&self) -> &CompileStats {
        &self.stats
    }

    /// Returns the clock input toggled by the simulator.
    pub fn clock(&self) -> Option<NodeId> {
        self.clock
    }

    /// Returns the reset input driven by `Simulator::reset`.
    pub fn reset(&self) -> Option<NodeId> {
        self.reset
    }

    /// Drives an input port.
    pub fn set_input(&mut self, name: &str, value: BitVector) -> SimResult<()> {
        let id = self.port(self.ctx.input_id(name), name)?;
        self.ctx.set_input_value(id, value)?;
        Ok(())
    }

    /// Drives an input port from a `u64`.
    pub fn set_input_u64(&mut self, name: &str, value: u64) -> SimResult<()> {
        let id = self.port(self.ctx.input_id(name), name)?;
        let width = self.ctx.width(id)?;
        let bv = BitVector::try_from_u64(value, width).ok_or_else(|| {
            kiln_ir::IrError::LiteralOutOfRange {
                value: value.to_string(),
                width,
            }
        })?;
        self.ctx.set_input_value(id, bv)?;
        Ok(())
    }

    /// Returns the current value of an output port.
    pub fn output(&self, name: &str) -> SimResult<&BitVector> {
        let id = self.port(self.ctx.output_id(name), name)?;
        Ok(self.ctx.value(id)?)
    }

    /// Returns the current value of a tap.
    pub fn tap(&self, name: &str) -> SimResult<&BitVector> {
        let id = self.port(self.ctx.tap_id(name), name)?;
        Ok(self.ctx.value(id)?)
    }

    pub(crate) fn drive(&mut self, input: Option<NodeId>, level: bool) -> SimResult<()> {
        if let Some(id) = input {
            self.ctx.set_input_value(id, BitVector::from_bool(level))?;
        }
        Ok(())
    }

    fn port<T, E>(&self, lookup: Result<T, E>, name: &str) -> SimResult<T> {
        lookup.map_err(|_| SimError::UnknownPort {
            device: self.name().to_string(),
            port: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_ir::AluOp;

    fn xor_device() -> Device {
        let mut ctx = Context::new("xor");
        let a = ctx.input("a", 4).unwrap();
        let b = ctx.input("b", 4).unwrap();
        let x = ctx.alu2(AluOp::Xor, a, b).unwrap();
        let o = ctx.output("x", 4).unwrap();
        ctx.assign(o, x).unwrap();
        Device::new(ctx).unwrap()
    }

    #[test]
    fn combinational_device_has_no_clock() {
        let dev = xor_device();
        assert_eq!(dev.name(), "xor");
        assert!(dev.clock().is_none());
        assert!(dev.reset().is_none());
        assert!(dev.stats().nodes_after <= dev.stats().nodes_before);
    }

    #[test]
    fn unknown_port_names_device() {
        let mut dev = xor_device();
        let err = dev.set_input_u64("c", 1).unwrap_err();
        assert!(matches!(err, SimError::UnknownPort { ref port, .. } if port == "c"));
        assert!(matches!(dev.tap("x"), Err(SimError::UnknownPort { .. })));
    }

    #[test]
    fn oversized_input_is_rejected() {
        let mut dev = xor_device();
        assert!(matches!(
            dev.set_input_u64("a", 16),
            Err(SimError::Ir(kiln_ir::IrError::LiteralOutOfRange { .. }))
        ));
    }

    #[test]
    fn configured_clock_name_is_found() {
        let mut ctx = Context::new("explicit");
        let clk = ctx.input("sysclk", 1).unwrap();
        ctx.push_clock(clk, kiln_ir::Edge::Pos).unwrap();
        let d = ctx.input("d", 2).unwrap();
        let r = ctx.register(d).unwrap();
        let o = ctx.output("q", 2).unwrap();
        ctx.assign(o, r).unwrap();
        let mut config = KilnConfig::default();
        config.sim.clock = "sysclk".to_string();
        let dev = Device::with_config(ctx, &config).unwrap();
        assert_eq!(dev.clock(), Some(clk));
        assert!(dev.reset().is_some());
    }
}
