//! The circuit builder.
//!
//! A [`Context`] owns every node of one circuit together with the caches and
//! lists that make construction and simulation cheap: interned literals,
//! ALU common-subexpression cache, clock domains keyed by sensitivity list,
//! per-kind node lists, the explicit clock/reset stacks, and the conditional
//! branch stack. All construction goes through its factory methods, each of
//! which validates widths and operand kinds before a node is created.

use crate::alu::AluOp;
use crate::arena::Arena;
use crate::cdomain::{ClockDomain, ClockEvent, Edge};
use crate::cond::Branch;
use crate::error::{IrError, IrResult};
use crate::format;
use crate::ids::{ClockDomainId, NodeId};
use crate::node::{Instance, MemPortState, MemoryState, Node, NodeKind, Udf, UdfState};
use crate::proxy::{ProxyRange, RangeList};
use kiln_common::{BitVector, NameTable};
use std::collections::HashMap;
use std::fmt;

/// Default name of the implicit clock input.
pub const DEFAULT_CLOCK: &str = "clk";
/// Default name of the implicit reset input.
pub const DEFAULT_RESET: &str = "reset";

pub(crate) type AluKey = (AluOp, NodeId, Option<NodeId>);

/// Owner and builder of one circuit's dataflow graph.
pub struct Context {
    pub(crate) name: String,
    pub(crate) names: NameTable,
    pub(crate) nodes: Arena<NodeId, Node>,
    pub(crate) inputs: Vec<NodeId>,
    pub(crate) outputs: Vec<NodeId>,
    pub(crate) taps: Vec<NodeId>,
    pub(crate) stateful: Vec<NodeId>,
    pub(crate) bindings: Vec<NodeId>,
    pub(crate) sinks: Vec<NodeId>,
    pub(crate) literals: HashMap<BitVector, NodeId>,
    pub(crate) alu_cache: HashMap<AluKey, NodeId>,
    pub(crate) domains: Arena<ClockDomainId, ClockDomain>,
    pub(crate) domain_cache: HashMap<Vec<ClockEvent>, ClockDomainId>,
    clock_stack: Vec<ClockEvent>,
    reset_stack: Vec<NodeId>,
    pub(crate) default_clock: Option<NodeId>,
    pub(crate) default_reset: Option<NodeId>,
    clock_name: String,
    reset_name: String,
    pub(crate) branches: Vec<Branch>,
    pub(crate) var_scope: HashMap<NodeId, u32>,
    pub(crate) next_block: u32,
    pub(crate) time_node: Option<NodeId>,
    pub(crate) stamp: u64,
    pub(crate) print_log: Vec<String>,
}

impl Context {
    /// Creates an empty circuit with the default clock and reset input names.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_signal_names(name, DEFAULT_CLOCK, DEFAULT_RESET)
    }

    /// Creates an empty circuit whose implicit clock and reset inputs use the given names.
    pub fn with_signal_names(
        name: impl Into<String>,
        clock: impl Into<String>,
        reset: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            names: NameTable::new(),
            nodes: Arena::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            taps: Vec::new(),
            stateful: Vec::new(),
            bindings: Vec::new(),
            sinks: Vec::new(),
            literals: HashMap::new(),
            alu_cache: HashMap::new(),
            domains: Arena::new(),
            domain_cache: HashMap::new(),
            clock_stack: Vec::new(),
            reset_stack: Vec::new(),
            default_clock: None,
            default_reset: None,
            clock_name: clock.into(),
            reset_name: reset.into(),
            branches: Vec::new(),
            var_scope: HashMap::new(),
            next_block: 1,
            time_node: None,
            stamp: 0,
            print_log: Vec::new(),
        }
    }

    /// Returns the circuit's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    // ---------------------------------------------------------------------
    // Read-only graph access
    // ---------------------------------------------------------------------

    /// Returns the node with the given id.
    pub fn node(&self, id: NodeId) -> IrResult<&Node> {
        self.nodes.try_get(id).ok_or(IrError::UnknownNode(id))
    }

    /// Iterates over live nodes in creation order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Returns the number of live nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the width of a node.
    pub fn width(&self, id: NodeId) -> IrResult<u32> {
        Ok(self.node(id)?.width)
    }

    /// Returns the value computed for a node by the most recent evaluation.
    pub fn value(&self, id: NodeId) -> IrResult<&BitVector> {
        Ok(&self.node(id)?.value)
    }

    /// Returns a node's name, if it has one.
    pub fn node_name(&self, id: NodeId) -> Option<&str> {
        let name = self.nodes.try_get(id)?.name?;
        Some(self.names.resolve(name))
    }

    /// Attaches a diagnostic name to a node.
    pub fn set_name(&mut self, id: NodeId, name: &str) -> IrResult<()> {
        self.node(id)?;
        let name = self.names.intern(name);
        self.nodes.get_mut(id).name = Some(name);
        Ok(())
    }

    /// Returns the input ports in creation order.
    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    /// Returns the output ports in creation order.
    pub fn outputs(&self) -> &[NodeId] {
        &self.outputs
    }

    /// Returns the taps in creation order.
    pub fn taps(&self) -> &[NodeId] {
        &self.taps
    }

    /// Returns registers, latches and memories in creation order.
    pub fn stateful_nodes(&self) -> &[NodeId] {
        &self.stateful
    }

    /// Returns the bind nodes in creation order.
    pub fn bindings(&self) -> &[NodeId] {
        &self.bindings
    }

    /// Returns the assert and print nodes in creation order.
    pub fn sinks(&self) -> &[NodeId] {
        &self.sinks
    }

    /// Returns the clock domain with the given id.
    pub fn clock_domain(&self, id: ClockDomainId) -> Option<&ClockDomain> {
        self.domains.try_get(id)
    }

    /// Iterates over live clock domains.
    pub fn clock_domains(&self) -> impl Iterator<Item = (ClockDomainId, &ClockDomain)> {
        self.domains.iter()
    }

    /// Returns the child circuit of a bind node.
    pub fn instance(&self, bind: NodeId) -> IrResult<&Context> {
        match &self.node(bind)?.kind {
            NodeKind::Bind(inst) => Ok(&inst.child),
            _ => Err(IrError::InvalidOperand {
                node: bind,
                reason: "not a bind node".into(),
            }),
        }
    }

    /// Returns the lines produced by print nodes since the last [`take_print_log`](Self::take_print_log).
    pub fn print_log(&self) -> &[String] {
        &self.print_log
    }

    /// Drains the print log.
    pub fn take_print_log(&mut self) -> Vec<String> {
        std::mem::take(&mut self.print_log)
    }

    /// Returns true if the circuit (or any child) has taps, asserts or prints.
    pub fn has_sinks(&self) -> bool {
        !self.sinks.is_empty()
            || !self.taps.is_empty()
            || self.bindings.iter().any(|b| {
                matches!(&self.nodes.get(*b).kind, NodeKind::Bind(inst) if inst.child.has_sinks())
            })
    }

    fn find_named(&self, list: &[NodeId], name: &str) -> Option<NodeId> {
        let key = self.names.lookup(name)?;
        list.iter()
            .copied()
            .find(|id| self.nodes.get(*id).name == Some(key))
    }

    /// Returns the input port with the given name.
    pub fn input_id(&self, name: &str) -> IrResult<NodeId> {
        self.find_named(&self.inputs, name)
            .ok_or_else(|| IrError::UnknownPort(name.to_string()))
    }

    /// Returns the output port with the given name.
    pub fn output_id(&self, name: &str) -> IrResult<NodeId> {
        self.find_named(&self.outputs, name)
            .ok_or_else(|| IrError::UnknownPort(name.to_string()))
    }

    /// Returns the tap with the given name.
    pub fn tap_id(&self, name: &str) -> IrResult<NodeId> {
        self.find_named(&self.taps, name)
            .ok_or_else(|| IrError::UnknownPort(name.to_string()))
    }

    /// Returns the current value of a named output.
    pub fn output_value(&self, name: &str) -> IrResult<&BitVector> {
        self.value(self.output_id(name)?)
    }

    /// Returns the current value of a named tap.
    pub fn tap_value(&self, name: &str) -> IrResult<&BitVector> {
        self.value(self.tap_id(name)?)
    }

    /// Drives an input port. The new value is seen by the next evaluation phase.
    pub fn set_input(&mut self, name: &str, value: BitVector) -> IrResult<()> {
        let id = self.input_id(name)?;
        self.set_input_value(id, value)
    }

    /// Drives an input port from a `u64`, which must fit the port's width.
    pub fn set_input_u64(&mut self, name: &str, value: u64) -> IrResult<()> {
        let id = self.input_id(name)?;
        let width = self.nodes.get(id).width;
        let bv = BitVector::try_from_u64(value, width).ok_or(IrError::LiteralOutOfRange {
            value: value.to_string(),
            width,
        })?;
        self.set_input_value(id, bv)
    }

    /// Drives an input port by id.
    pub fn set_input_value(&mut self, id: NodeId, value: BitVector) -> IrResult<()> {
        let node = self.nodes.try_get(id).ok_or(IrError::UnknownNode(id))?;
        if !matches!(node.kind, NodeKind::Input) {
            return Err(IrError::InvalidOperand {
                node: id,
                reason: "not an input".into(),
            });
        }
        if node.width != value.width() {
            return Err(IrError::WidthMismatch {
                op: "set_input".into(),
                lhs: node.width,
                rhs: value.width(),
            });
        }
        self.nodes.get_mut(id).value = value;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Node creation
    // ---------------------------------------------------------------------

    pub(crate) fn add_node(
        &mut self,
        kind: NodeKind,
        width: u32,
        srcs: Vec<NodeId>,
        value: BitVector,
    ) -> NodeId {
        debug_assert_eq!(value.width(), width);
        debug_assert!(srcs.iter().all(|s| self.nodes.contains(*s)));
        let id = self.nodes.next_id();
        self.nodes.alloc(Node {
            id,
            name: None,
            width,
            value,
            srcs,
            kind,
            stamp: 0,
        })
    }

    fn check_width(&self, id: NodeId, expected: u32, op: &str) -> IrResult<()> {
        let width = self.width(id)?;
        if width != expected {
            return Err(IrError::WidthMismatch {
                op: op.to_string(),
                lhs: expected,
                rhs: width,
            });
        }
        Ok(())
    }

    fn check_port_name(&self, name: &str) -> IrResult<()> {
        let taken = self.find_named(&self.inputs, name).is_some()
            || self.find_named(&self.outputs, name).is_some()
            || self.find_named(&self.taps, name).is_some();
        if taken {
            return Err(IrError::DuplicatePort(name.to_string()));
        }
        Ok(())
    }

    /// Returns the literal node for `value`, creating it on first use.
    pub fn literal(&mut self, value: BitVector) -> NodeId {
        if let Some(id) = self.literals.get(&value) {
            return *id;
        }
        let width = value.width();
        let id = self.add_node(NodeKind::Literal, width, Vec::new(), value.clone());
        self.literals.insert(value, id);
        id
    }

    /// Returns the literal node for `value` at `width` bits.
    pub fn literal_u64(&mut self, value: u64, width: u32) -> IrResult<NodeId> {
        let bv = BitVector::try_from_u64(value, width).ok_or(IrError::LiteralOutOfRange {
            value: value.to_string(),
            width,
        })?;
        Ok(self.literal(bv))
    }

    /// Parses a literal such as `"1010b"` or `"5e8d"` and returns its node.
    pub fn literal_str(&mut self, text: &str) -> IrResult<NodeId> {
        let bv = BitVector::parse(text).map_err(|e| IrError::LiteralOutOfRange {
            value: format!("{text} ({e})"),
            width: 0,
        })?;
        Ok(self.literal(bv))
    }

    /// Creates a placeholder for a never-assigned value.
    pub fn undef(&mut self, width: u32) -> NodeId {
        self.add_node(NodeKind::Undef, width, Vec::new(), BitVector::new(width))
    }

    /// Creates an input port.
    pub fn input(&mut self, name: &str, width: u32) -> IrResult<NodeId> {
        self.check_port_name(name)?;
        let id = self.add_node(NodeKind::Input, width, Vec::new(), BitVector::new(width));
        self.set_name(id, name)?;
        self.inputs.push(id);
        Ok(id)
    }

    /// Creates an output port. Drive it with [`assign`](Self::assign).
    pub fn output(&mut self, name: &str, width: u32) -> IrResult<NodeId> {
        if !self.branches.is_empty() {
            return Err(IrError::DeclarationInConditional(format!("output '{name}'")));
        }
        self.check_port_name(name)?;
        let driver = self.var(width);
        let id = self.add_node(NodeKind::Output, width, vec![driver], BitVector::new(width));
        self.set_name(id, name)?;
        self.outputs.push(id);
        Ok(id)
    }

    /// Creates a named observation point on `src`.
    pub fn tap(&mut self, name: &str, src: NodeId) -> IrResult<NodeId> {
        self.check_port_name(name)?;
        let width = self.width(src)?;
        let id = self.add_node(NodeKind::Tap, width, vec![src], BitVector::new(width));
        self.set_name(id, name)?;
        self.taps.push(id);
        Ok(id)
    }

    /// Creates an assignable variable initialised to an undefined value.
    ///
    /// Reads of a variable see its final assigned value: every node built
    /// from it observes later assignments too.
    pub fn var(&mut self, width: u32) -> NodeId {
        let undef = self.undef(width);
        let mut ranges = RangeList::new();
        ranges.insert(ProxyRange::new(0, 0, 0, width));
        let id = self.new_proxy(width, vec![undef], ranges);
        let scope = self.current_block();
        self.var_scope.insert(id, scope);
        id
    }

    /// Creates a variable initialised to `init`.
    pub fn var_init(&mut self, init: NodeId) -> IrResult<NodeId> {
        let width = self.width(init)?;
        let id = self.var(width);
        self.assign(id, init)?;
        Ok(id)
    }

    pub(crate) fn new_proxy(&mut self, width: u32, srcs: Vec<NodeId>, ranges: RangeList) -> NodeId {
        self.add_node(NodeKind::Proxy { ranges }, width, srcs, BitVector::new(width))
    }

    /// Creates a new proxy holding the same ranges as `proxy`.
    pub(crate) fn copy_proxy(&mut self, proxy: NodeId) -> NodeId {
        let node = self.nodes.get(proxy);
        match &node.kind {
            NodeKind::Proxy { ranges } => {
                let (width, srcs, ranges) = (node.width, node.srcs.clone(), ranges.clone());
                self.new_proxy(width, srcs, ranges)
            }
            _ => {
                let width = node.width;
                let mut ranges = RangeList::new();
                ranges.insert(ProxyRange::new(0, 0, 0, width));
                self.new_proxy(width, vec![proxy], ranges)
            }
        }
    }

    /// Writes `length` bits of `src` (from `src_offset`) into `proxy` at `dst_offset`.
    ///
    /// Sources no longer referenced by any range are dropped.
    pub(crate) fn proxy_write(
        &mut self,
        proxy: NodeId,
        dst_offset: u32,
        src: NodeId,
        src_offset: u32,
        length: u32,
    ) -> IrResult<()> {
        let node = self.nodes.get_mut(proxy);
        let Node { kind, srcs, .. } = node;
        let NodeKind::Proxy { ranges } = kind else {
            return Err(IrError::NotAssignable(proxy));
        };
        let idx = match srcs.iter().position(|s| *s == src) {
            Some(i) => i,
            None => {
                srcs.push(src);
                srcs.len() - 1
            }
        };
        ranges.insert(ProxyRange::new(idx as u32, dst_offset, src_offset, length));
        let used = ranges.used_sources();
        if used.len() != srcs.len() {
            let kept: Vec<NodeId> = used.iter().map(|i| srcs[*i as usize]).collect();
            ranges.remap_sources(|old| used.iter().position(|u| *u == old).unwrap_or(0) as u32);
            *srcs = kept;
        }
        Ok(())
    }

    /// Creates (or reuses) a unary ALU node.
    pub fn alu1(&mut self, op: AluOp, a: NodeId) -> IrResult<NodeId> {
        if op.arity() != 1 {
            return Err(IrError::InvalidOperand {
                node: a,
                reason: format!("{op} takes two operands"),
            });
        }
        let width = self.width(a)?;
        let key = (op, a, None);
        if let Some(id) = self.alu_cache.get(&key) {
            return Ok(*id);
        }
        let rw = op.result_width(width);
        let id = self.add_node(NodeKind::Alu { op }, rw, vec![a], BitVector::new(rw));
        self.alu_cache.insert(key, id);
        Ok(id)
    }

    /// Creates (or reuses) a binary ALU node.
    ///
    /// Operands must share a width, except for shift and rotate amounts.
    pub fn alu2(&mut self, op: AluOp, a: NodeId, b: NodeId) -> IrResult<NodeId> {
        if op.arity() != 2 {
            return Err(IrError::InvalidOperand {
                node: a,
                reason: format!("{op} takes one operand"),
            });
        }
        let wa = self.width(a)?;
        let wb = self.width(b)?;
        if !op.is_shift() && wa != wb {
            return Err(IrError::WidthMismatch {
                op: op.name().to_string(),
                lhs: wa,
                rhs: wb,
            });
        }
        let (a, b) = if op.is_commutative() && b < a { (b, a) } else { (a, b) };
        let key = (op, a, Some(b));
        if let Some(id) = self.alu_cache.get(&key) {
            return Ok(*id);
        }
        let rw = op.result_width(wa);
        let id = self.add_node(NodeKind::Alu { op }, rw, vec![a, b], BitVector::new(rw));
        self.alu_cache.insert(key, id);
        Ok(id)
    }

    /// Creates a two-way multiplexer: `pred ? a : b`.
    pub fn select(&mut self, pred: NodeId, a: NodeId, b: NodeId) -> IrResult<NodeId> {
        self.select_chain(&[(pred, a)], b)
    }

    /// Creates a priority multiplexer: the first arm whose predicate is true wins.
    pub fn select_chain(&mut self, arms: &[(NodeId, NodeId)], default: NodeId) -> IrResult<NodeId> {
        let width = self.width(default)?;
        let mut srcs = Vec::with_capacity(arms.len() * 2 + 1);
        for (pred, value) in arms {
            self.check_width(*pred, 1, "select predicate")?;
            self.check_width(*value, width, "select")?;
            srcs.push(*pred);
            srcs.push(*value);
        }
        if arms.iter().all(|(_, v)| *v == default) {
            return Ok(default);
        }
        srcs.push(default);
        Ok(self.add_node(
            NodeKind::Select { has_key: false },
            width,
            srcs,
            BitVector::new(width),
        ))
    }

    /// Creates a keyed multiplexer: the first arm whose case value equals `key` wins.
    pub fn case(&mut self, key: NodeId, arms: &[(NodeId, NodeId)], default: NodeId) -> IrResult<NodeId> {
        let key_width = self.width(key)?;
        let width = self.width(default)?;
        let mut srcs = Vec::with_capacity(arms.len() * 2 + 2);
        srcs.push(key);
        for (case, value) in arms {
            let case_width = self.width(*case)?;
            if case_width != key_width {
                return Err(IrError::CaseWidthMismatch {
                    key: key_width,
                    case: case_width,
                });
            }
            self.check_width(*value, width, "case")?;
            srcs.push(*case);
            srcs.push(*value);
        }
        if arms.is_empty() {
            return Ok(default);
        }
        srcs.push(default);
        Ok(self.add_node(
            NodeKind::Select { has_key: true },
            width,
            srcs,
            BitVector::new(width),
        ))
    }

    /// Returns bits `[offset, offset + length)` of `src`.
    pub fn slice(&mut self, src: NodeId, offset: u32, length: u32) -> IrResult<NodeId> {
        let width = self.width(src)?;
        if offset as u64 + length as u64 > width as u64 {
            return Err(IrError::SliceOutOfBounds {
                node: src,
                offset,
                length,
                width,
            });
        }
        if offset == 0 && length == width {
            return Ok(src);
        }
        let mut ranges = RangeList::new();
        ranges.insert(ProxyRange::new(0, 0, offset, length));
        Ok(self.new_proxy(length, vec![src], ranges))
    }

    /// Concatenates `parts`; the first part ends up in the most significant bits.
    pub fn concat(&mut self, parts: &[NodeId]) -> IrResult<NodeId> {
        match parts {
            [] => Err(IrError::InvalidOperand {
                node: self.nodes.next_id(),
                reason: "concatenation of nothing".into(),
            }),
            [single] => {
                self.node(*single)?;
                Ok(*single)
            }
            _ => {
                let mut total: u32 = 0;
                for p in parts {
                    total = total.checked_add(self.width(*p)?).ok_or(IrError::InvalidOperand {
                        node: *p,
                        reason: "concatenation too wide".into(),
                    })?;
                }
                let id = self.new_proxy(total, Vec::new(), RangeList::new());
                let mut offset = 0;
                for p in parts.iter().rev() {
                    let w = self.nodes.get(*p).width;
                    self.proxy_write(id, offset, *p, 0, w)?;
                    offset += w;
                }
                Ok(id)
            }
        }
    }

    /// Zero-extends `src` to `width` bits.
    pub fn zext(&mut self, src: NodeId, width: u32) -> IrResult<NodeId> {
        let w = self.width(src)?;
        if width < w {
            return Err(IrError::WidthMismatch {
                op: "zext".into(),
                lhs: w,
                rhs: width,
            });
        }
        if width == w {
            return Ok(src);
        }
        let zeros = self.literal(BitVector::new(width - w));
        self.concat(&[zeros, src])
    }

    /// Sign-extends `src` to `width` bits.
    pub fn sext(&mut self, src: NodeId, width: u32) -> IrResult<NodeId> {
        let w = self.width(src)?;
        if width < w {
            return Err(IrError::WidthMismatch {
                op: "sext".into(),
                lhs: w,
                rhs: width,
            });
        }
        if width == w {
            return Ok(src);
        }
        if w == 0 {
            return Err(IrError::InvalidOperand {
                node: src,
                reason: "cannot sign-extend a zero-width value".into(),
            });
        }
        let id = self.new_proxy(width, Vec::new(), RangeList::new());
        self.proxy_write(id, 0, src, 0, w)?;
        for bit in w..width {
            self.proxy_write(id, bit, src, w - 1, 1)?;
        }
        Ok(id)
    }

    // ---------------------------------------------------------------------
    // Clocks, resets and stateful nodes
    // ---------------------------------------------------------------------

    /// Makes `signal` (sampled on `edge`) the clock of subsequently created registers and memories.
    pub fn push_clock(&mut self, signal: NodeId, edge: Edge) -> IrResult<()> {
        self.check_width(signal, 1, "clock")?;
        self.clock_stack.push(ClockEvent::new(signal, edge));
        Ok(())
    }

    /// Restores the previous clock.
    pub fn pop_clock(&mut self) -> Option<ClockEvent> {
        self.clock_stack.pop()
    }

    /// Makes `signal` the reset of subsequently created registers.
    pub fn push_reset(&mut self, signal: NodeId) -> IrResult<()> {
        self.check_width(signal, 1, "reset")?;
        self.reset_stack.push(signal);
        Ok(())
    }

    /// Restores the previous reset.
    pub fn pop_reset(&mut self) -> Option<NodeId> {
        self.reset_stack.pop()
    }

    fn implicit_input(&mut self, name: &str) -> IrResult<NodeId> {
        match self.find_named(&self.inputs, name) {
            Some(id) => {
                self.check_width(id, 1, name)?;
                Ok(id)
            }
            None => self.input(name, 1),
        }
    }

    /// Returns the implicit clock input, creating it on first use.
    pub fn default_clock(&mut self) -> IrResult<NodeId> {
        if let Some(id) = self.default_clock {
            return Ok(id);
        }
        let name = self.clock_name.clone();
        let id = self.implicit_input(&name)?;
        self.default_clock = Some(id);
        Ok(id)
    }

    /// Returns the implicit clock input if anything has used it.
    pub fn clock_input(&self) -> Option<NodeId> {
        self.default_clock
    }

    /// Returns the implicit reset input if anything has used it.
    pub fn reset_input(&self) -> Option<NodeId> {
        self.default_reset
    }

    /// Returns the implicit reset input, creating it on first use.
    pub fn default_reset(&mut self) -> IrResult<NodeId> {
        if let Some(id) = self.default_reset {
            return Ok(id);
        }
        let name = self.reset_name.clone();
        let id = self.implicit_input(&name)?;
        self.default_reset = Some(id);
        Ok(id)
    }

    /// Returns the clock event new stateful nodes are sensitive to.
    pub fn clock_event(&mut self) -> IrResult<ClockEvent> {
        match self.clock_stack.last() {
            Some(event) => Ok(*event),
            None => Ok(ClockEvent::new(self.default_clock()?, Edge::Pos)),
        }
    }

    /// Returns the reset signal new registers use.
    pub fn reset_signal(&mut self) -> IrResult<NodeId> {
        match self.reset_stack.last() {
            Some(id) => Ok(*id),
            None => self.default_reset(),
        }
    }

    /// Returns the clock domain for a sensitivity list, creating it on first use.
    pub(crate) fn domain_for(&mut self, events: Vec<ClockEvent>) -> ClockDomainId {
        if let Some(id) = self.domain_cache.get(&events) {
            return *id;
        }
        let id = self.domains.alloc(ClockDomain::new(events.clone()));
        self.domain_cache.insert(events, id);
        id
    }

    fn initial_value(&self, init: NodeId) -> BitVector {
        let node = self.nodes.get(init);
        match node.kind {
            NodeKind::Literal => node.value.clone(),
            _ => BitVector::new(node.width),
        }
    }

    /// Creates a register whose next value is `next` and whose reset value is zero.
    pub fn register(&mut self, next: NodeId) -> IrResult<NodeId> {
        self.make_register(next, None)
    }

    /// Creates a register whose next value is `next` and whose reset value is `init`.
    pub fn register_with_init(&mut self, next: NodeId, init: NodeId) -> IrResult<NodeId> {
        self.make_register(next, Some(init))
    }

    fn make_register(&mut self, next: NodeId, init: Option<NodeId>) -> IrResult<NodeId> {
        let width = self.width(next)?;
        let init = match init {
            Some(init) => {
                self.check_width(init, width, "register init")?;
                init
            }
            None => self.literal(BitVector::new(width)),
        };
        let reset = self.reset_signal()?;
        let data = self.select(reset, init, next)?;
        let event = self.clock_event()?;
        let cd = self.domain_for(vec![event]);
        let initial = self.initial_value(init);
        let id = self.add_node(
            NodeKind::Reg {
                cd,
                next: initial.clone(),
            },
            width,
            vec![data],
            initial,
        );
        self.domains.get_mut(cd).add_use(id);
        self.stateful.push(id);
        Ok(id)
    }

    /// Creates a level-sensitive latch.
    ///
    /// While `reset` is high the latch holds `init`; otherwise while `enable`
    /// is high it follows `data`; otherwise it holds its value.
    pub fn latch(&mut self, data: NodeId, init: NodeId, enable: NodeId, reset: NodeId) -> IrResult<NodeId> {
        let width = self.width(data)?;
        self.check_width(init, width, "latch init")?;
        self.check_width(enable, 1, "latch enable")?;
        self.check_width(reset, 1, "latch reset")?;
        let cd = self.domain_for(vec![
            ClockEvent::new(enable, Edge::Any),
            ClockEvent::new(data, Edge::Any),
            ClockEvent::new(reset, Edge::Any),
            ClockEvent::new(init, Edge::Any),
        ]);
        let initial = self.initial_value(init);
        let id = self.add_node(
            NodeKind::Latch {
                cd,
                next: initial.clone(),
            },
            width,
            vec![data, init, enable, reset],
            initial,
        );
        self.domains.get_mut(cd).add_use(id);
        self.stateful.push(id);
        Ok(id)
    }

    /// Creates a memory of `num_items` words of `data_width` bits.
    ///
    /// Writable memories commit writes on the current clock. `init` supplies the
    /// initial contents (item 0 in the low bits).
    pub fn memory(
        &mut self,
        data_width: u32,
        num_items: u32,
        writable: bool,
        init: Option<BitVector>,
    ) -> IrResult<NodeId> {
        if !self.branches.is_empty() {
            return Err(IrError::MemoryInConditional);
        }
        let width = data_width
            .checked_mul(num_items)
            .filter(|w| *w > 0)
            .ok_or_else(|| IrError::InvalidOperand {
                node: self.nodes.next_id(),
                reason: format!("invalid memory geometry {data_width}x{num_items}"),
            })?;
        let value = match init {
            Some(init) if init.width() != width => {
                return Err(IrError::WidthMismatch {
                    op: "memory init".into(),
                    lhs: width,
                    rhs: init.width(),
                })
            }
            Some(init) => init,
            None => BitVector::new(width),
        };
        let cd = if writable {
            let event = self.clock_event()?;
            Some(self.domain_for(vec![event]))
        } else {
            None
        };
        let id = self.add_node(
            NodeKind::Memory(MemoryState {
                data_width,
                num_items,
                writable,
                cd,
                ports: Vec::new(),
            }),
            width,
            Vec::new(),
            value,
        );
        if let Some(cd) = cd {
            self.domains.get_mut(cd).add_use(id);
        }
        self.stateful.push(id);
        Ok(id)
    }

    fn memory_state(&self, mem: NodeId) -> IrResult<&MemoryState> {
        match &self.node(mem)?.kind {
            NodeKind::Memory(state) => Ok(state),
            _ => Err(IrError::InvalidOperand {
                node: mem,
                reason: "not a memory".into(),
            }),
        }
    }

    /// Returns the port of `mem` addressed by `addr`, creating it on first use.
    fn mem_port(&mut self, mem: NodeId, addr: NodeId) -> IrResult<NodeId> {
        self.node(addr)?;
        let state = self.memory_state(mem)?;
        let data_width = state.data_width;
        if let Some(port) = state
            .ports
            .iter()
            .copied()
            .find(|p| self.nodes.get(*p).srcs[1] == addr)
        {
            return Ok(port);
        }
        let index = state.ports.len() as u32;
        let port = self.add_node(
            NodeKind::MemPort(MemPortState {
                index,
                wdata: None,
                wenable: None,
                read: false,
                pending: None,
            }),
            data_width,
            vec![mem, addr],
            BitVector::new(data_width),
        );
        if let NodeKind::Memory(state) = &mut self.nodes.get_mut(mem).kind {
            state.ports.push(port);
        }
        Ok(port)
    }

    /// Returns an asynchronous read of `mem` at `addr`.
    pub fn mem_read(&mut self, mem: NodeId, addr: NodeId) -> IrResult<NodeId> {
        let port = self.mem_port(mem, addr)?;
        if let NodeKind::MemPort(state) = &mut self.nodes.get_mut(port).kind {
            state.read = true;
        }
        Ok(port)
    }

    /// Schedules a synchronous write of `data` to `mem` at `addr`.
    ///
    /// Inside a conditional block the write is additionally gated by the
    /// block's predicate.
    pub fn mem_write(
        &mut self,
        mem: NodeId,
        addr: NodeId,
        data: NodeId,
        enable: Option<NodeId>,
    ) -> IrResult<()> {
        let state = self.memory_state(mem)?;
        if !state.writable {
            return Err(IrError::InvalidOperand {
                node: mem,
                reason: "memory is read-only".into(),
            });
        }
        let data_width = state.data_width;
        self.check_width(data, data_width, "memory write")?;
        if let Some(en) = enable {
            self.check_width(en, 1, "memory write enable")?;
        }
        let enable = match (enable, self.current_predicate()?) {
            (en, None) => en,
            (None, Some(pred)) => Some(pred),
            (Some(en), Some(pred)) => Some(self.alu2(AluOp::And, en, pred)?),
        };
        let port = self.mem_port(mem, addr)?;
        let node = self.nodes.get_mut(port);
        let Node { kind, srcs, .. } = node;
        let NodeKind::MemPort(state) = kind else {
            return Err(IrError::InvalidOperand {
                node: port,
                reason: "not a memory port".into(),
            });
        };
        let first_write = state.wdata.is_none();
        match state.wdata {
            Some(i) => srcs[i] = data,
            None => {
                srcs.push(data);
                state.wdata = Some(srcs.len() - 1);
            }
        }
        if let Some(en) = enable {
            match state.wenable {
                Some(i) => srcs[i] = en,
                None => {
                    srcs.push(en);
                    state.wenable = Some(srcs.len() - 1);
                }
            }
        }
        if first_write {
            self.nodes.get_mut(mem).srcs.push(port);
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // User-defined functions
    // ---------------------------------------------------------------------

    fn udf_state(
        &self,
        name: &str,
        width: u32,
        inputs: &[NodeId],
        udf: Box<dyn Udf>,
    ) -> IrResult<UdfState> {
        for input in inputs {
            self.node(*input)?;
        }
        Ok(UdfState {
            name: name.to_string(),
            cd: None,
            next: BitVector::new(width),
            udf,
        })
    }

    /// Creates a combinational user-defined function of `width` bits over `inputs`.
    ///
    /// `udf` is called on every evaluation that needs the node's value.
    pub fn udf(
        &mut self,
        name: &str,
        width: u32,
        inputs: &[NodeId],
        udf: Box<dyn Udf>,
    ) -> IrResult<NodeId> {
        let state = self.udf_state(name, width, inputs, udf)?;
        Ok(self.add_node(
            NodeKind::Udf(state),
            width,
            inputs.to_vec(),
            BitVector::new(width),
        ))
    }

    /// Creates a clocked user-defined function of `width` bits over `inputs`.
    ///
    /// The function joins the current clock's domain. On each firing edge it
    /// is reset while the current reset signal is high and evaluated
    /// otherwise; the result is committed by the following `tick`. The node
    /// reads zero until then.
    pub fn udf_seq(
        &mut self,
        name: &str,
        width: u32,
        inputs: &[NodeId],
        udf: Box<dyn Udf>,
    ) -> IrResult<NodeId> {
        let mut state = self.udf_state(name, width, inputs, udf)?;
        let reset = self.reset_signal()?;
        let event = self.clock_event()?;
        let cd = self.domain_for(vec![event]);
        state.cd = Some(cd);
        let mut srcs = Vec::with_capacity(inputs.len() + 1);
        srcs.push(reset);
        srcs.extend_from_slice(inputs);
        let id = self.add_node(NodeKind::Udf(state), width, srcs, BitVector::new(width));
        self.domains.get_mut(cd).add_use(id);
        self.stateful.push(id);
        Ok(id)
    }

    /// Returns the 64-bit node carrying the current simulation tick, creating it on first use.
    pub fn time(&mut self) -> NodeId {
        if let Some(id) = self.time_node {
            return id;
        }
        let id = self.add_node(NodeKind::Time, 64, Vec::new(), BitVector::new(64));
        self.time_node = Some(id);
        id
    }

    // ---------------------------------------------------------------------
    // Sinks
    // ---------------------------------------------------------------------

    /// Creates an assertion that `cond` holds whenever the current block is active.
    pub fn assert(&mut self, cond: NodeId, message: &str) -> IrResult<NodeId> {
        self.check_width(cond, 1, "assert")?;
        let pred = self.current_predicate()?;
        let mut srcs = Vec::with_capacity(2);
        srcs.extend(pred);
        srcs.push(cond);
        let id = self.add_node(
            NodeKind::Assert {
                message: message.to_string(),
                predicated: pred.is_some(),
            },
            0,
            srcs,
            BitVector::new(0),
        );
        self.sinks.push(id);
        Ok(id)
    }

    /// Creates a print of `format` (with `{index}` placeholders) over `args`.
    pub fn print(&mut self, format: &str, args: &[NodeId]) -> IrResult<NodeId> {
        format::validate(format, args.len()).map_err(|reason| IrError::InvalidFormat {
            format: format.to_string(),
            reason,
        })?;
        for arg in args {
            self.node(*arg)?;
        }
        let pred = self.current_predicate()?;
        let mut srcs = Vec::with_capacity(args.len() + 1);
        srcs.extend(pred);
        srcs.extend_from_slice(args);
        let id = self.add_node(
            NodeKind::Print {
                format: format.to_string(),
                predicated: pred.is_some(),
            },
            0,
            srcs,
            BitVector::new(0),
        );
        self.sinks.push(id);
        Ok(id)
    }

    // ---------------------------------------------------------------------
    // Instantiation
    // ---------------------------------------------------------------------

    /// Instantiates `child` inside this circuit.
    ///
    /// The child's implicit clock and reset inputs are driven by this
    /// circuit's current clock and reset; every other input gets a driver
    /// variable to be connected with [`bind_input`](Self::bind_input).
    pub fn instantiate(&mut self, child: Context) -> IrResult<NodeId> {
        if !child.branches.is_empty() {
            return Err(IrError::UnterminatedBranch(child.branches.len()));
        }
        if !self.branches.is_empty() {
            return Err(IrError::DeclarationInConditional(format!(
                "instance '{}'",
                child.name
            )));
        }
        let mut srcs = Vec::with_capacity(child.inputs.len());
        for input in &child.inputs {
            let driver = if Some(*input) == child.default_clock {
                self.clock_event()?.signal
            } else if Some(*input) == child.default_reset {
                self.reset_signal()?
            } else {
                let width = child.nodes.get(*input).width;
                self.var(width)
            };
            srcs.push(driver);
        }
        let name = child.name.clone();
        let ports = vec![None; child.outputs.len()];
        let id = self.add_node(
            NodeKind::Bind(Box::new(Instance { child, ports })),
            0,
            srcs,
            BitVector::new(0),
        );
        self.set_name(id, &name)?;
        self.bindings.push(id);
        Ok(id)
    }

    fn instance_mut(&mut self, bind: NodeId) -> IrResult<&mut Instance> {
        self.node(bind)?;
        match &mut self.nodes.get_mut(bind).kind {
            NodeKind::Bind(inst) => Ok(inst),
            _ => Err(IrError::InvalidOperand {
                node: bind,
                reason: "not a bind node".into(),
            }),
        }
    }

    /// Drives the child input `name` of `bind` with `src`.
    pub fn bind_input(&mut self, bind: NodeId, name: &str, src: NodeId) -> IrResult<()> {
        let child = self.instance(bind)?;
        let input = child.input_id(name)?;
        let index = child
            .inputs
            .iter()
            .position(|i| *i == input)
            .ok_or_else(|| IrError::UnknownPort(name.to_string()))?;
        let driver = self.nodes.get(bind).srcs[index];
        self.assign(driver, src)
    }

    /// Returns a node reading the child output `name` of `bind`.
    pub fn bind_output(&mut self, bind: NodeId, name: &str) -> IrResult<NodeId> {
        let child = self.instance(bind)?;
        let output = child.output_id(name)?;
        let width = child.nodes.get(output).width;
        let index = child
            .outputs
            .iter()
            .position(|o| *o == output)
            .ok_or_else(|| IrError::UnknownPort(name.to_string()))?;
        if let Some(port) = self.instance_mut(bind)?.ports[index] {
            return Ok(port);
        }
        let port = self.add_node(
            NodeKind::BindPort { output: index },
            width,
            vec![bind],
            BitVector::new(width),
        );
        self.instance_mut(bind)?.ports[index] = Some(port);
        Ok(port)
    }

    pub(crate) fn instance_of_mut(&mut self, bind: NodeId) -> Option<&mut Context> {
        match &mut self.nodes.get_mut(bind).kind {
            NodeKind::Bind(inst) => Some(&mut inst.child),
            _ => None,
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.name)
            .field("nodes", &self.nodes.len())
            .field("domains", &self.domains.len())
            .field("open_branches", &self.branches.len())
            .finish()
    }
}
