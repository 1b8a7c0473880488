//! The two-phase clocked simulation loop.
//!
//! Every [`Simulator::step`] is half a clock period: the clock input of each
//! device is toggled, then all devices run `tick_next` (sample clock domains
//! and compute next state), `tick` (commit) and `eval` (settle combinational
//! logic, run prints and asserts). Devices share the clock but not signals.

use kiln_common::BitVector;
use kiln_config::SimConfig;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{SimError, SimResult};

/// Drives one or more compiled devices with a common clock.
#[derive(Debug)]
pub struct Simulator {
    devices: Vec<Device>,
    config: SimConfig,
    time: u64,
    clock_level: bool,
}

impl Simulator {
    /// Creates a simulator with the default settings.
    pub fn new(devices: Vec<Device>) -> SimResult<Self> {
        Self::with_config(devices, SimConfig::default())
    }

    /// Creates a simulator and evaluates every device once at time 0.
    pub fn with_config(devices: Vec<Device>, config: SimConfig) -> SimResult<Self> {
        if devices.is_empty() {
            return Err(SimError::NoDevices);
        }
        let mut sim = Self {
            devices,
            config,
            time: 0,
            clock_level: false,
        };
        for dev in &mut sim.devices {
            dev.drive(dev.clock(), false)?;
            dev.context_mut().eval(0)?;
        }
        info!(devices = sim.devices.len(), "simulator ready");
        Ok(sim)
    }

    /// Returns the settings this simulator was created with.
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Half clock periods run so far.
    pub fn time(&self) -> u64 {
        self.time
    }

    /// Full clock cycles run so far.
    pub fn cycles(&self) -> u64 {
        self.time / 2
    }

    /// Current level of the shared clock.
    pub fn clock_level(&self) -> bool {
        self.clock_level
    }

    /// Returns all devices in creation order.
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Returns one device.
    pub fn device(&self, index: usize) -> SimResult<&Device> {
        self.devices.get(index).ok_or(SimError::UnknownDevice(index))
    }

    /// Returns one device mutably.
    pub fn device_mut(&mut self, index: usize) -> SimResult<&mut Device> {
        self.devices
            .get_mut(index)
            .ok_or(SimError::UnknownDevice(index))
    }

    /// Drives an input of a device. The value is seen from the next step on.
    pub fn set_input(&mut self, device: usize, name: &str, value: BitVector) -> SimResult<()> {
        self.device_mut(device)?.set_input(name, value)
    }

    /// Drives an input of a device from a `u64`.
    pub fn set_input_u64(&mut self, device: usize, name: &str, value: u64) -> SimResult<()> {
        self.device_mut(device)?.set_input_u64(name, value)
    }

    /// Returns the current value of a device output.
    pub fn output(&self, device: usize, name: &str) -> SimResult<&BitVector> {
        self.device(device)?.output(name)
    }

    /// Returns the current value of a device tap.
    pub fn tap(&self, device: usize, name: &str) -> SimResult<&BitVector> {
        self.device(device)?.tap(name)
    }

    /// Re-evaluates every device at the current time without clocking.
    ///
    /// Use after changing inputs to observe combinational results.
    pub fn settle(&mut self) -> SimResult<()> {
        let t = self.time;
        for dev in &mut self.devices {
            dev.context_mut().eval(t)?;
        }
        Ok(())
    }

    /// Runs half a clock period.
    pub fn step(&mut self) -> SimResult<()> {
        self.time += 1;
        self.clock_level = !self.clock_level;
        let (t, level) = (self.time, self.clock_level);
        for dev in &mut self.devices {
            dev.drive(dev.clock(), level)?;
            dev.context_mut().tick_next(t)?;
        }
        for dev in &mut self.devices {
            dev.context_mut().tick(t)?;
        }
        for dev in &mut self.devices {
            dev.context_mut().eval(t)?;
        }
        Ok(())
    }

    /// Runs one full clock cycle.
    pub fn tick(&mut self) -> SimResult<()> {
        self.run(1)
    }

    /// Runs `cycles` full clock cycles.
    pub fn run(&mut self, cycles: u64) -> SimResult<()> {
        self.run_observed(cycles, &mut |_| {})?;
        info!(cycles, time = self.time, "run finished");
        Ok(())
    }

    /// Runs full cycles until `done` holds or `max_cycles` have elapsed.
    ///
    /// Returns the number of cycles run when `done` became true, `None` on timeout.
    pub fn run_until(
        &mut self,
        max_cycles: u64,
        mut done: impl FnMut(&Simulator) -> bool,
    ) -> SimResult<Option<u64>> {
        for cycle in 1..=max_cycles {
            self.run_observed(1, &mut |_| {})?;
            if done(self) {
                info!(cycles = cycle, time = self.time, "run condition met");
                return Ok(Some(cycle));
            }
        }
        info!(max_cycles, "run condition not met");
        Ok(None)
    }

    /// Holds reset high for `reset_cycles` cycles, then releases it.
    pub fn reset(&mut self) -> SimResult<()> {
        self.reset_observed(&mut |_| {})
    }

    /// Resets, then runs the configured number of cycles.
    pub fn run_configured(&mut self) -> SimResult<()> {
        self.reset()?;
        self.run(self.config.cycles)
    }

    /// Drains the print output of every device.
    pub fn take_print_log(&mut self) -> Vec<String> {
        self.devices
            .iter_mut()
            .flat_map(|dev| dev.context_mut().take_print_log())
            .collect()
    }

    pub(crate) fn run_observed(
        &mut self,
        cycles: u64,
        observe: &mut dyn FnMut(&Simulator),
    ) -> SimResult<()> {
        for _ in 0..cycles * 2 {
            self.step()?;
            observe(self);
        }
        Ok(())
    }

    pub(crate) fn reset_observed(&mut self, observe: &mut dyn FnMut(&Simulator)) -> SimResult<()> {
        let cycles = self.config.reset_cycles;
        debug!(cycles, "asserting reset");
        self.drive_reset(true)?;
        self.run_observed(u64::from(cycles), observe)?;
        self.drive_reset(false)?;
        self.settle()?;
        observe(self);
        Ok(())
    }

    fn drive_reset(&mut self, level: bool) -> SimResult<()> {
        for dev in &mut self.devices {
            dev.drive(dev.reset(), level)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_ir::{AluOp, Context};

    fn counter(width: u32) -> Device {
        let mut ctx = Context::new("counter");
        let next = ctx.var(width);
        let count = ctx.register(next).unwrap();
        let one = ctx.literal_u64(1, width).unwrap();
        let inc = ctx.alu2(AluOp::Add, count, one).unwrap();
        ctx.assign(next, inc).unwrap();
        let o = ctx.output("count", width).unwrap();
        ctx.assign(o, count).unwrap();
        Device::new(ctx).unwrap()
    }

    fn count(sim: &Simulator) -> u64 {
        sim.output(0, "count").unwrap().to_u64().unwrap()
    }

    #[test]
    fn empty_simulator_is_rejected() {
        assert!(matches!(Simulator::new(Vec::new()), Err(SimError::NoDevices)));
    }

    #[test]
    fn step_is_half_a_cycle() {
        let mut sim = Simulator::new(vec![counter(4)]).unwrap();
        sim.step().unwrap();
        assert!(sim.clock_level());
        assert_eq!(count(&sim), 1);
        sim.step().unwrap();
        assert!(!sim.clock_level());
        assert_eq!(count(&sim), 1);
        assert_eq!(sim.cycles(), 1);
    }

    #[test]
    fn run_and_reset() {
        let mut sim = Simulator::new(vec![counter(4)]).unwrap();
        sim.run(5).unwrap();
        assert_eq!(count(&sim), 5);
        sim.reset().unwrap();
        assert_eq!(count(&sim), 0);
        sim.tick().unwrap();
        assert_eq!(count(&sim), 1);
    }

    #[test]
    fn run_until_reports_cycle() {
        let mut sim = Simulator::new(vec![counter(4)]).unwrap();
        let hit = sim.run_until(20, |s| count(s) == 7).unwrap();
        assert_eq!(hit, Some(7));
        let miss = sim.run_until(3, |s| count(s) == 0).unwrap();
        assert_eq!(miss, None);
    }

    #[test]
    fn devices_share_the_clock() {
        let mut sim = Simulator::new(vec![counter(2), counter(8)]).unwrap();
        sim.run(6).unwrap();
        assert_eq!(sim.output(0, "count").unwrap().to_u64(), Some(2));
        assert_eq!(sim.output(1, "count").unwrap().to_u64(), Some(6));
        assert!(matches!(sim.output(2, "count"), Err(SimError::UnknownDevice(2))));
    }

    #[test]
    fn run_configured_uses_config() {
        let config = SimConfig {
            cycles: 3,
            reset_cycles: 2,
            ..SimConfig::default()
        };
        let mut sim = Simulator::with_config(vec![counter(4)], config).unwrap();
        sim.run(4).unwrap();
        sim.run_configured().unwrap();
        assert_eq!(count(&sim), 3);
        assert_eq!(sim.cycles(), 4 + 2 + 3);
    }
}
