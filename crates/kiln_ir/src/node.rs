//! Graph nodes.
//!
//! Every vertex of a circuit graph is a [`Node`]: an id, an optional name, a
//! width, the value computed by the most recent evaluation, an ordered list
//! of source node ids, and a [`NodeKind`] fixing how many sources there are
//! and what each one means.

use crate::alu::AluOp;
use crate::context::Context;
use crate::ids::{ClockDomainId, NodeId};
use crate::proxy::RangeList;
use kiln_common::{BitVector, Name};
use std::fmt;

/// A vertex of the dataflow graph.
#[derive(Debug)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) name: Option<Name>,
    pub(crate) width: u32,
    pub(crate) value: BitVector,
    pub(crate) srcs: Vec<NodeId>,
    pub(crate) kind: NodeKind,
    pub(crate) stamp: u64,
}

/// The closed set of node variants.
#[derive(Debug)]
pub enum NodeKind {
    /// Placeholder for a value that was never assigned. Reads as zero.
    Undef,
    /// Constant; the node's value never changes.
    Literal,
    /// Top-level input port.
    Input,
    /// Top-level output port. Source 0 is the output's driver proxy.
    Output,
    /// Named observation point. Source 0 is the observed node.
    Tap,
    /// Bit-level assembly of its sources.
    Proxy {
        /// Ranges copied from the sources.
        ranges: RangeList,
    },
    /// Arithmetic, logic, shift or compare operator over 1 or 2 sources.
    Alu {
        /// The operator.
        op: AluOp,
    },
    /// Multiplexer. Sources are `[key?, pred0, val0, pred1, val1, ..., default]`.
    ///
    /// Without a key each `pred_i` is a 1-bit condition; with a key each
    /// `pred_i` is a case value compared for equality with the key. The first
    /// match wins.
    Select {
        /// Whether source 0 is a switch key.
        has_key: bool,
    },
    /// Edge-triggered register. Source 0 is the next value.
    Reg {
        /// The register's clock domain.
        cd: ClockDomainId,
        /// Value captured by the last firing `tick_next`.
        next: BitVector,
    },
    /// Level-sensitive latch. Sources are `[data, init, enable, reset]`.
    Latch {
        /// The latch's clock domain (any-edge on all four sources).
        cd: ClockDomainId,
        /// Value captured by the last firing `tick_next`.
        next: BitVector,
    },
    /// Addressed storage array. Sources are its write ports.
    Memory(MemoryState),
    /// Read and/or write port. Sources are `[memory, addr, wdata?, wenable?]`.
    MemPort(MemPortState),
    /// Instantiation of a child circuit. Sources drive the child's inputs in order.
    Bind(Box<Instance>),
    /// One output of an instantiated child. Source 0 is the bind node.
    BindPort {
        /// Index into the child's output list.
        output: usize,
    },
    /// Zero-width check. Sources are `[pred?, cond]`.
    Assert {
        /// Message reported on failure.
        message: String,
        /// Whether source 0 is a guarding predicate.
        predicated: bool,
    },
    /// Zero-width formatted print. Sources are `[pred?, args...]`.
    Print {
        /// Format string with `{index}` or `{index:fmt}` placeholders.
        format: String,
        /// Whether source 0 is a guarding predicate.
        predicated: bool,
    },
    /// User-defined function. Sources are its inputs; a clocked one has its
    /// reset signal prepended.
    Udf(UdfState),
    /// Current simulation tick, 64 bits wide.
    Time,
}

/// Behavior of a user-defined function node.
///
/// A combinational function is called on every evaluation that reaches it. A
/// clocked one is called when its clock domain fires, and its result becomes
/// the node's value at the following `tick`.
pub trait Udf {
    /// Computes the output from the current input values.
    ///
    /// The result must have the width the node was declared with.
    fn eval(&mut self, inputs: &[&BitVector]) -> BitVector;

    /// Clears internal state. Called instead of `eval` while a clocked
    /// function's reset is high.
    fn reset(&mut self) {}
}

/// A user-defined function and its bookkeeping.
pub struct UdfState {
    /// Name used in dumps, errors and fingerprints.
    pub name: String,
    /// Clock domain of a clocked function.
    pub cd: Option<ClockDomainId>,
    /// Value captured by the last firing `tick_next`.
    pub next: BitVector,
    pub(crate) udf: Box<dyn Udf>,
}

impl UdfState {
    /// Returns the source index of the first function input.
    pub fn first_input(&self) -> usize {
        usize::from(self.cd.is_some())
    }
}

impl fmt::Debug for UdfState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdfState")
            .field("name", &self.name)
            .field("cd", &self.cd)
            .field("next", &self.next)
            .finish_non_exhaustive()
    }
}

/// Configuration and port bookkeeping of a memory node.
#[derive(Debug, Clone)]
pub struct MemoryState {
    /// Bits per item.
    pub data_width: u32,
    /// Number of items.
    pub num_items: u32,
    /// Whether the memory accepts writes.
    pub writable: bool,
    /// Clock domain of the write ports, if writable.
    pub cd: Option<ClockDomainId>,
    /// All ports in creation order.
    pub ports: Vec<NodeId>,
}

/// State of one memory port.
#[derive(Debug, Clone)]
pub struct MemPortState {
    /// Position of the port in its memory's port list at creation.
    pub index: u32,
    /// Source index of the write data, if the port writes.
    pub wdata: Option<usize>,
    /// Source index of the write enable, if the write is gated.
    pub wenable: Option<usize>,
    /// Whether the port's value is read.
    pub read: bool,
    /// Write captured by the last firing `tick_next`: `(address, data)`.
    pub pending: Option<(u64, BitVector)>,
}

/// An instantiated child circuit.
#[derive(Debug)]
pub struct Instance {
    /// The child's graph.
    pub child: Context,
    /// Output nodes of the child that have a bind port, by output index.
    pub ports: Vec<Option<NodeId>>,
}

impl Node {
    /// Returns the node's id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Returns the node's name, if any.
    pub fn name(&self) -> Option<Name> {
        self.name
    }

    /// Returns the output width in bits.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Returns the value computed by the most recent evaluation.
    pub fn value(&self) -> &BitVector {
        &self.value
    }

    /// Returns the ordered source list.
    pub fn srcs(&self) -> &[NodeId] {
        &self.srcs
    }

    /// Returns the node's variant.
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Returns the clock domain of a stateful node.
    pub fn clock_domain(&self) -> Option<ClockDomainId> {
        match &self.kind {
            NodeKind::Reg { cd, .. } | NodeKind::Latch { cd, .. } => Some(*cd),
            NodeKind::Memory(mem) => mem.cd,
            NodeKind::Udf(udf) => udf.cd,
            _ => None,
        }
    }

    /// Returns true for registers, latches, memories and clocked functions.
    pub fn is_stateful(&self) -> bool {
        match &self.kind {
            NodeKind::Reg { .. } | NodeKind::Latch { .. } | NodeKind::Memory(_) => true,
            NodeKind::Udf(udf) => udf.cd.is_some(),
            _ => false,
        }
    }

    /// Returns the nodes whose current values this node's evaluation reads.
    ///
    /// Stateful nodes read only their own state, and a memory port only needs
    /// its address; everything they sample happens in `tick_next`.
    pub fn comb_deps(&self) -> &[NodeId] {
        match &self.kind {
            NodeKind::Undef
            | NodeKind::Literal
            | NodeKind::Input
            | NodeKind::Reg { .. }
            | NodeKind::Latch { .. }
            | NodeKind::Memory(_)
            | NodeKind::Time => &[],
            NodeKind::Udf(udf) if udf.cd.is_some() => &[],
            NodeKind::MemPort(_) => &self.srcs[1..2],
            _ => &self.srcs,
        }
    }
}

impl NodeKind {
    /// Returns the short tag used in dumps and views.
    pub fn tag(&self) -> &'static str {
        match self {
            NodeKind::Undef => "undef",
            NodeKind::Literal => "lit",
            NodeKind::Input => "input",
            NodeKind::Output => "output",
            NodeKind::Tap => "tap",
            NodeKind::Proxy { .. } => "proxy",
            NodeKind::Alu { .. } => "alu",
            NodeKind::Select { .. } => "sel",
            NodeKind::Reg { .. } => "reg",
            NodeKind::Latch { .. } => "latch",
            NodeKind::Memory(_) => "mem",
            NodeKind::MemPort(_) => "memport",
            NodeKind::Bind(_) => "bind",
            NodeKind::BindPort { .. } => "bindport",
            NodeKind::Assert { .. } => "assert",
            NodeKind::Print { .. } => "print",
            NodeKind::Udf(_) => "udf",
            NodeKind::Time => "time",
        }
    }
}

impl fmt::Display for Node {
    /// Formats as `#id <- kind<width>(#src, ...)`, with the value for literals.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <- {}", self.id, self.kind.tag())?;
        if let NodeKind::Alu { op } = &self.kind {
            write!(f, ".{op}")?;
        }
        write!(f, "<{}>", self.width)?;
        if !self.srcs.is_empty() {
            f.write_str("(")?;
            for (i, src) in self.srcs.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{src}")?;
            }
            f.write_str(")")?;
        }
        match &self.kind {
            NodeKind::Literal => write!(f, " = {}", self.value),
            NodeKind::Proxy { ranges } => {
                f.write_str(" [")?;
                for (i, r) in ranges.ranges().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(
                        f,
                        "{}+{}<-s{}@{}",
                        r.dst_offset, r.length, r.src_idx, r.src_offset
                    )?;
                }
                f.write_str("]")
            }
            NodeKind::Reg { cd, .. } | NodeKind::Latch { cd, .. } => write!(f, " @{cd}"),
            NodeKind::Udf(udf) => {
                write!(f, " {}", udf.name)?;
                match udf.cd {
                    Some(cd) => write!(f, " @{cd}"),
                    None => Ok(()),
                }
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ProxyRange;

    fn node(kind: NodeKind, width: u32, srcs: &[u32]) -> Node {
        Node {
            id: NodeId::from_raw(5),
            name: None,
            width,
            value: BitVector::from_u64(0xa, width),
            srcs: srcs.iter().map(|s| NodeId::from_raw(*s)).collect(),
            kind,
            stamp: 0,
        }
    }

    #[test]
    fn display_alu() {
        let n = node(NodeKind::Alu { op: AluOp::Add }, 8, &[1, 2]);
        assert_eq!(n.to_string(), "#5 <- alu.add<8>(#1, #2)");
    }

    #[test]
    fn display_literal() {
        let n = node(NodeKind::Literal, 4, &[]);
        assert_eq!(n.to_string(), "#5 <- lit<4> = 4'ha");
    }

    #[test]
    fn display_proxy_ranges() {
        let mut ranges = RangeList::new();
        ranges.insert(ProxyRange::new(0, 0, 2, 4));
        let n = node(NodeKind::Proxy { ranges }, 4, &[3]);
        assert_eq!(n.to_string(), "#5 <- proxy<4>(#3) [0+4<-s0@2]");
    }

    #[test]
    fn comb_deps_skip_state() {
        let reg = node(
            NodeKind::Reg {
                cd: ClockDomainId::from_raw(0),
                next: BitVector::new(4),
            },
            4,
            &[1],
        );
        assert!(reg.comb_deps().is_empty());
        assert!(reg.is_stateful());
        assert_eq!(reg.clock_domain(), Some(ClockDomainId::from_raw(0)));

        let port = node(
            NodeKind::MemPort(MemPortState {
                index: 0,
                wdata: Some(2),
                wenable: None,
                read: true,
                pending: None,
            }),
            4,
            &[1, 2, 3],
        );
        assert_eq!(port.comb_deps(), &[NodeId::from_raw(2)]);
    }

    struct Passthrough;

    impl Udf for Passthrough {
        fn eval(&mut self, inputs: &[&BitVector]) -> BitVector {
            inputs[0].clone()
        }
    }

    fn udf(cd: Option<u32>) -> Node {
        node(
            NodeKind::Udf(UdfState {
                name: "pass".into(),
                cd: cd.map(ClockDomainId::from_raw),
                next: BitVector::new(4),
                udf: Box::new(Passthrough),
            }),
            4,
            &[1, 2],
        )
    }

    #[test]
    fn clocked_udf_is_stateful() {
        let comb = udf(None);
        assert!(!comb.is_stateful());
        assert_eq!(comb.comb_deps().len(), 2);
        assert_eq!(comb.to_string(), "#5 <- udf<4>(#1, #2) pass");

        let seq = udf(Some(1));
        assert!(seq.is_stateful());
        assert!(seq.comb_deps().is_empty());
        assert_eq!(seq.clock_domain(), Some(ClockDomainId::from_raw(1)));
        assert!(seq.to_string().ends_with(" pass @cd1"));
    }
}
