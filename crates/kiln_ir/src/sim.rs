//! Two-phase evaluation of a context.
//!
//! Every simulation step runs [`Context::tick_next`] (sample clock events and
//! capture next state), [`Context::tick`] (commit captured state) and
//! [`Context::eval`] (recompute every observable value). Node values are
//! memoized per evaluation stamp, so each node is computed at most once per
//! phase.

use crate::context::Context;
use crate::error::{IrError, IrResult};
use crate::format;
use crate::ids::{ClockDomainId, NodeId};
use crate::node::{Node, NodeKind};
use kiln_common::BitVector;
use std::collections::HashSet;
use tracing::{info, trace};

/// Side effect of computing one node.
enum Effect {
    None,
    Value(BitVector),
    Print(String),
    Bind,
    CallUdf(Vec<BitVector>),
}

impl Context {
    /// Samples every clock domain and lets the users of fired domains capture
    /// their next state. Children are sampled first.
    pub fn tick_next(&mut self, t: u64) -> IrResult<()> {
        self.stamp += 1;
        for bind in self.bindings.clone() {
            self.eval_node(bind, t)?;
            if let Some(child) = self.instance_of_mut(bind) {
                child.tick_next(t)?;
            }
        }
        let domains: Vec<ClockDomainId> = self.domains.ids().collect();
        for cd in domains {
            let signals: Vec<NodeId> = self.domains[cd].events().iter().map(|e| e.signal).collect();
            for signal in &signals {
                self.eval_node(*signal, t)?;
            }
            let values: Vec<BitVector> = signals
                .iter()
                .map(|s| self.nodes.get(*s).value.clone())
                .collect();
            if self.domains.get_mut(cd).sample(&values) {
                trace!(domain = %cd, tick = t, "clock domain fired");
                for user in self.domains[cd].users().to_vec() {
                    self.capture_next(user, t)?;
                }
            }
        }
        Ok(())
    }

    /// Commits the state captured by the last [`tick_next`](Self::tick_next).
    pub fn tick(&mut self, t: u64) -> IrResult<()> {
        let fired: Vec<ClockDomainId> = self
            .domains
            .iter()
            .filter(|(_, cd)| cd.fired())
            .map(|(id, _)| id)
            .collect();
        for cd in fired {
            for user in self.domains[cd].users().to_vec() {
                self.commit(user);
            }
        }
        for bind in self.bindings.clone() {
            if let Some(child) = self.instance_of_mut(bind) {
                child.tick(t)?;
            }
        }
        Ok(())
    }

    /// Recomputes outputs, taps, asserts, prints and instances.
    pub fn eval(&mut self, t: u64) -> IrResult<()> {
        self.stamp += 1;
        let roots: Vec<NodeId> = self
            .outputs
            .iter()
            .chain(&self.taps)
            .chain(&self.sinks)
            .chain(&self.bindings)
            .copied()
            .collect();
        for root in roots {
            self.eval_node(root, t)?;
        }
        Ok(())
    }

    /// Computes `root` and everything it combinationally depends on.
    pub(crate) fn eval_node(&mut self, root: NodeId, t: u64) -> IrResult<()> {
        let stamp = self.stamp;
        if self.nodes.get(root).stamp == stamp {
            return Ok(());
        }
        let mut stack: Vec<(NodeId, usize)> = vec![(root, 0)];
        let mut on_stack: HashSet<NodeId> = HashSet::from([root]);
        while let Some(&(id, next)) = stack.last() {
            match self.nodes.get(id).comb_deps().get(next).copied() {
                Some(dep) => {
                    if let Some(top) = stack.last_mut() {
                        top.1 += 1;
                    }
                    if self.nodes.get(dep).stamp == stamp {
                        continue;
                    }
                    if !on_stack.insert(dep) {
                        return Err(IrError::CombinationalLoop(dep));
                    }
                    stack.push((dep, 0));
                }
                None => {
                    self.compute(id, t)?;
                    self.nodes.get_mut(id).stamp = stamp;
                    on_stack.remove(&id);
                    stack.pop();
                }
            }
        }
        Ok(())
    }

    fn val(&self, id: NodeId) -> &BitVector {
        &self.nodes.get(id).value
    }

    /// Returns whether a predicated sink is active, and the index of its first payload source.
    fn sink_guard(&self, node: &Node, predicated: bool) -> (bool, usize) {
        if predicated {
            (self.val(node.srcs[0]).to_bool(), 1)
        } else {
            (true, 0)
        }
    }

    fn compute(&mut self, id: NodeId, t: u64) -> IrResult<()> {
        let node = self.nodes.get(id);
        let effect = match &node.kind {
            NodeKind::Undef
            | NodeKind::Literal
            | NodeKind::Input
            | NodeKind::Reg { .. }
            | NodeKind::Latch { .. }
            | NodeKind::Memory(_) => Effect::None,
            NodeKind::Time => Effect::Value(BitVector::from_u64(t, 64)),
            NodeKind::Udf(state) if state.cd.is_none() => {
                Effect::CallUdf(node.srcs.iter().map(|s| self.val(*s).clone()).collect())
            }
            NodeKind::Udf(_) => Effect::None,
            NodeKind::Output | NodeKind::Tap => Effect::Value(self.val(node.srcs[0]).clone()),
            NodeKind::Proxy { ranges } => {
                let sources: Vec<&BitVector> = node.srcs.iter().map(|s| self.val(*s)).collect();
                Effect::Value(ranges.gather(node.width, &sources))
            }
            NodeKind::Alu { op } => {
                let a = self.val(node.srcs[0]);
                let b = node.srcs.get(1).map(|s| self.val(*s));
                let value = op
                    .apply(a, b)
                    .ok_or(IrError::DivideByZero { node: id, tick: t })?;
                Effect::Value(value)
            }
            NodeKind::Select { has_key } => Effect::Value(self.select_value(node, *has_key)),
            NodeKind::MemPort(_) => Effect::Value(self.read_port(node)),
            NodeKind::Bind(_) => Effect::Bind,
            NodeKind::BindPort { output } => {
                let value = match &self.nodes.get(node.srcs[0]).kind {
                    NodeKind::Bind(inst) => inst
                        .child
                        .outputs
                        .get(*output)
                        .map(|o| inst.child.nodes.get(*o).value.clone()),
                    _ => None,
                };
                Effect::Value(value.unwrap_or_else(|| BitVector::new(node.width)))
            }
            NodeKind::Assert {
                message,
                predicated,
            } => {
                let (active, first) = self.sink_guard(node, *predicated);
                if active && !self.val(node.srcs[first]).to_bool() {
                    return Err(IrError::AssertionFailure {
                        tick: t,
                        message: message.clone(),
                    });
                }
                Effect::None
            }
            NodeKind::Print { format, predicated } => {
                let (active, first) = self.sink_guard(node, *predicated);
                if active {
                    let args: Vec<&BitVector> =
                        node.srcs[first..].iter().map(|s| self.val(*s)).collect();
                    Effect::Print(format::render(format, &args))
                } else {
                    Effect::None
                }
            }
        };
        match effect {
            Effect::None => {}
            Effect::Value(value) => self.nodes.get_mut(id).value = value,
            Effect::Print(line) => {
                info!(target: "kiln::print", tick = t, "{line}");
                self.print_log.push(line);
            }
            Effect::Bind => self.eval_bind(id, t)?,
            Effect::CallUdf(inputs) => {
                let value = self.call_udf(id, &inputs)?;
                self.nodes.get_mut(id).value = value;
            }
        }
        Ok(())
    }

    /// Runs a function node's callback and checks the width of its result.
    fn call_udf(&mut self, id: NodeId, inputs: &[BitVector]) -> IrResult<BitVector> {
        let node = self.nodes.get_mut(id);
        let width = node.width;
        let NodeKind::Udf(state) = &mut node.kind else {
            return Err(IrError::UnknownNode(id));
        };
        let args: Vec<&BitVector> = inputs.iter().collect();
        let value = state.udf.eval(&args);
        if value.width() != width {
            return Err(IrError::WidthMismatch {
                op: format!("udf {}", state.name),
                lhs: width,
                rhs: value.width(),
            });
        }
        Ok(value)
    }

    fn select_value(&self, node: &Node, has_key: bool) -> BitVector {
        let srcs = &node.srcs;
        let (key, first) = if has_key {
            (Some(self.val(srcs[0])), 1)
        } else {
            (None, 0)
        };
        let default = srcs.len() - 1;
        for arm in (first..default).step_by(2) {
            let pred = self.val(srcs[arm]);
            let hit = match key {
                Some(key) => pred == key,
                None => pred.to_bool(),
            };
            if hit {
                return self.val(srcs[arm + 1]).clone();
            }
        }
        self.val(srcs[default]).clone()
    }

    /// Asynchronous read; addresses past the end read zero.
    fn read_port(&self, port: &Node) -> BitVector {
        let mem = self.nodes.get(port.srcs[0]);
        let NodeKind::Memory(state) = &mem.kind else {
            return BitVector::new(port.width);
        };
        match self.val(port.srcs[1]).to_u64() {
            Some(addr) if addr < state.num_items as u64 => {
                mem.value.read(addr as u32 * state.data_width, state.data_width)
            }
            _ => BitVector::new(port.width),
        }
    }

    /// Pushes the bind node's input values into the child and settles it.
    fn eval_bind(&mut self, bind: NodeId, t: u64) -> IrResult<()> {
        let values: Vec<BitVector> = self
            .nodes
            .get(bind)
            .srcs
            .iter()
            .map(|s| self.val(*s).clone())
            .collect();
        let Some(child) = self.instance_of_mut(bind) else {
            return Err(IrError::UnknownNode(bind));
        };
        for (input, value) in child.inputs.clone().into_iter().zip(values) {
            child.set_input_value(input, value)?;
        }
        child.eval(t)
    }

    /// Captures the next state of a stateful node whose domain fired.
    fn capture_next(&mut self, id: NodeId, t: u64) -> IrResult<()> {
        let srcs = self.nodes.get(id).srcs.clone();
        for src in &srcs {
            self.eval_node(*src, t)?;
        }
        match &self.nodes.get(id).kind {
            NodeKind::Reg { .. } => {
                let next = self.val(srcs[0]).clone();
                if let NodeKind::Reg { next: slot, .. } = &mut self.nodes.get_mut(id).kind {
                    *slot = next;
                }
            }
            NodeKind::Latch { .. } => {
                let (data, init, enable, reset) = (srcs[0], srcs[1], srcs[2], srcs[3]);
                let next = if self.val(reset).to_bool() {
                    self.val(init).clone()
                } else if self.val(enable).to_bool() {
                    self.val(data).clone()
                } else {
                    self.nodes.get(id).value.clone()
                };
                if let NodeKind::Latch { next: slot, .. } = &mut self.nodes.get_mut(id).kind {
                    *slot = next;
                }
            }
            NodeKind::Memory(_) => {
                for port in srcs {
                    self.capture_write(port, t)?;
                }
            }
            NodeKind::Udf(_) => {
                let next = if self.val(srcs[0]).to_bool() {
                    if let NodeKind::Udf(state) = &mut self.nodes.get_mut(id).kind {
                        state.udf.reset();
                    }
                    BitVector::new(self.nodes.get(id).width)
                } else {
                    let inputs: Vec<BitVector> = srcs[1..].iter().map(|s| self.val(*s).clone()).collect();
                    self.call_udf(id, &inputs)?
                };
                if let NodeKind::Udf(state) = &mut self.nodes.get_mut(id).kind {
                    state.next = next;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn capture_write(&mut self, port: NodeId, t: u64) -> IrResult<()> {
        let node = self.nodes.get(port);
        let NodeKind::MemPort(state) = &node.kind else {
            return Ok(());
        };
        let Some(wdata) = state.wdata.map(|i| node.srcs[i]) else {
            return Ok(());
        };
        let wenable = state.wenable.map(|i| node.srcs[i]);
        let addr = node.srcs[1];
        for dep in [Some(addr), Some(wdata), wenable].into_iter().flatten() {
            self.eval_node(dep, t)?;
        }
        let enabled = wenable.map_or(true, |en| self.val(en).to_bool());
        let pending = match self.val(addr).to_u64() {
            Some(a) if enabled => Some((a, self.val(wdata).clone())),
            _ => None,
        };
        if let NodeKind::MemPort(state) = &mut self.nodes.get_mut(port).kind {
            state.pending = pending;
        }
        Ok(())
    }

    fn commit(&mut self, id: NodeId) {
        let node = self.nodes.get_mut(id);
        match &mut node.kind {
            NodeKind::Reg { next, .. } | NodeKind::Latch { next, .. } => {
                node.value = next.clone();
            }
            NodeKind::Udf(state) => node.value = state.next.clone(),
            NodeKind::Memory(state) => {
                let (data_width, num_items) = (state.data_width, state.num_items);
                let ports = node.srcs.clone();
                for port in ports {
                    let pending = match &mut self.nodes.get_mut(port).kind {
                        NodeKind::MemPort(p) => p.pending.take(),
                        _ => None,
                    };
                    if let Some((addr, data)) = pending {
                        if addr < num_items as u64 {
                            self.nodes.get_mut(id).value.write(
                                addr as u32 * data_width,
                                &data,
                                0,
                                data_width,
                            );
                        }
                    }
                }
            }
            _ => {}
        }
    }
}
