//! Read-only views of a context for emitters, dumps and fingerprints.

use crate::cdomain::ClockEvent;
use crate::context::Context;
use crate::error::IrResult;
use crate::ids::{ClockDomainId, NodeId};
use crate::node::{Node, NodeKind};
use crate::proxy::ProxyRange;
use kiln_common::{BitVector, ContentHash, ContentHasher};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::fmt::Write;

/// Serializable description of one node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NodeView {
    /// Node id.
    pub id: NodeId,
    /// Kind tag (`"alu"`, `"reg"`, ...).
    pub kind: &'static str,
    /// Diagnostic name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Width in bits.
    pub width: u32,
    /// Ordered sources.
    pub srcs: Vec<NodeId>,
    /// ALU operator name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub op: Option<&'static str>,
    /// Clock domain of a stateful node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clock_domain: Option<ClockDomainId>,
    /// Sensitivity list of that clock domain.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<ClockEvent>,
    /// Value of a literal, or current contents of a memory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<BitVector>,
    /// Ranges of a proxy.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ranges: Vec<ProxyRange>,
    /// `(data_width, num_items, writable)` of a memory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<(u32, u32, bool)>,
    /// Assert message, print format or function name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Name of the instantiated child of a bind node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

/// Node counts per kind.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ContextStats {
    /// Live nodes.
    pub nodes: usize,
    /// Input ports.
    pub inputs: usize,
    /// Output ports.
    pub outputs: usize,
    /// Taps.
    pub taps: usize,
    /// Literals.
    pub literals: usize,
    /// Undefined placeholders.
    pub undefs: usize,
    /// Proxies.
    pub proxies: usize,
    /// ALU nodes.
    pub alus: usize,
    /// Selects.
    pub selects: usize,
    /// Registers.
    pub registers: usize,
    /// Latches.
    pub latches: usize,
    /// Memories.
    pub memories: usize,
    /// Memory ports.
    pub mem_ports: usize,
    /// Instantiated children.
    pub bindings: usize,
    /// Asserts and prints.
    pub sinks: usize,
    /// User-defined functions.
    pub udfs: usize,
    /// Live clock domains.
    pub clock_domains: usize,
}

impl fmt::Display for ContextStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "nodes: {}", self.nodes)?;
        writeln!(
            f,
            "  ports: {} in, {} out, {} taps",
            self.inputs, self.outputs, self.taps
        )?;
        writeln!(
            f,
            "  logic: {} literals, {} undefs, {} proxies, {} alus, {} selects",
            self.literals, self.undefs, self.proxies, self.alus, self.selects
        )?;
        writeln!(
            f,
            "  state: {} registers, {} latches, {} memories ({} ports)",
            self.registers, self.latches, self.memories, self.mem_ports
        )?;
        writeln!(
            f,
            "  bindings: {}, sinks: {}, udfs: {}",
            self.bindings, self.sinks, self.udfs
        )?;
        write!(f, "clock domains: {}", self.clock_domains)
    }
}

impl Context {
    /// Returns a serializable view of one node.
    pub fn view(&self, node: &Node) -> NodeView {
        let mut view = NodeView {
            id: node.id,
            kind: node.kind.tag(),
            name: node.name.map(|n| self.names.resolve(n).to_string()),
            width: node.width,
            srcs: node.srcs.clone(),
            op: None,
            clock_domain: node.clock_domain(),
            events: Vec::new(),
            value: None,
            ranges: Vec::new(),
            memory: None,
            text: None,
            instance: None,
        };
        if let Some(cd) = view.clock_domain.and_then(|cd| self.domains.try_get(cd)) {
            view.events = cd.events().to_vec();
        }
        match &node.kind {
            NodeKind::Literal => view.value = Some(node.value.clone()),
            NodeKind::Alu { op } => view.op = Some(op.name()),
            NodeKind::Proxy { ranges } => view.ranges = ranges.ranges().to_vec(),
            NodeKind::Memory(state) => {
                view.memory = Some((state.data_width, state.num_items, state.writable));
                view.value = Some(node.value.clone());
            }
            NodeKind::Assert { message, .. } => view.text = Some(message.clone()),
            NodeKind::Print { format, .. } => view.text = Some(format.clone()),
            NodeKind::Bind(inst) => view.instance = Some(inst.child.name().to_string()),
            NodeKind::Udf(state) => view.text = Some(state.name.clone()),
            _ => {}
        }
        view
    }

    /// Returns views of every live node in creation order.
    pub fn views(&self) -> Vec<NodeView> {
        self.nodes.values().map(|n| self.view(n)).collect()
    }

    /// Renders the graph as text, one node per line, children indented below their bind node.
    pub fn dump_ast(&self) -> String {
        let mut out = String::new();
        self.dump_into(&mut out, 0);
        out
    }

    fn dump_into(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        let _ = writeln!(out, "{indent}context {}", self.name);
        for node in self.nodes.values() {
            let _ = write!(out, "{indent}  {node}");
            if let Some(name) = node.name {
                let _ = write!(out, " \"{}\"", self.names.resolve(name));
            }
            out.push('\n');
            if let NodeKind::Bind(inst) = &node.kind {
                inst.child.dump_into(out, depth + 2);
            }
        }
        for (id, cd) in self.domains.iter() {
            let events: Vec<String> = cd
                .events()
                .iter()
                .map(|e| format!("{} {}", e.edge, e.signal))
                .collect();
            let _ = writeln!(
                out,
                "{indent}  {id}: [{}] users {}",
                events.join(", "),
                cd.users().len()
            );
        }
    }

    /// Renders the dependency tree of `root` down to `depth` levels.
    ///
    /// Each line is a node, indented below the node that reads it. A node
    /// already printed is shown again as `#id ...` without its sources.
    pub fn dump_cfg(&self, root: NodeId, depth: usize) -> IrResult<String> {
        self.node(root)?;
        let mut out = String::new();
        let mut seen = HashSet::new();
        self.dump_cfg_into(&mut out, root, 0, depth, &mut seen);
        Ok(out)
    }

    fn dump_cfg_into(
        &self,
        out: &mut String,
        id: NodeId,
        level: usize,
        depth: usize,
        seen: &mut HashSet<NodeId>,
    ) {
        let indent = "  ".repeat(level);
        if !seen.insert(id) {
            let _ = writeln!(out, "{indent}{id} ...");
            return;
        }
        let node = self.nodes.get(id);
        let _ = write!(out, "{indent}{node}");
        if let Some(name) = node.name {
            let _ = write!(out, " \"{}\"", self.names.resolve(name));
        }
        out.push('\n');
        if level < depth {
            for src in &node.srcs {
                self.dump_cfg_into(out, *src, level + 1, depth, seen);
            }
        }
    }

    /// Counts live nodes per kind.
    pub fn dump_stats(&self) -> ContextStats {
        let mut stats = ContextStats {
            nodes: self.nodes.len(),
            clock_domains: self.domains.len(),
            ..ContextStats::default()
        };
        for node in self.nodes.values() {
            let slot = match node.kind {
                NodeKind::Undef => &mut stats.undefs,
                NodeKind::Literal => &mut stats.literals,
                NodeKind::Input => &mut stats.inputs,
                NodeKind::Output => &mut stats.outputs,
                NodeKind::Tap => &mut stats.taps,
                NodeKind::Proxy { .. } => &mut stats.proxies,
                NodeKind::Alu { .. } => &mut stats.alus,
                NodeKind::Select { .. } => &mut stats.selects,
                NodeKind::Reg { .. } => &mut stats.registers,
                NodeKind::Latch { .. } => &mut stats.latches,
                NodeKind::Memory(_) => &mut stats.memories,
                NodeKind::MemPort(_) => &mut stats.mem_ports,
                NodeKind::Bind(_) => &mut stats.bindings,
                NodeKind::Udf(_) => &mut stats.udfs,
                NodeKind::BindPort { .. } | NodeKind::Time => continue,
                NodeKind::Assert { .. } | NodeKind::Print { .. } => &mut stats.sinks,
            };
            *slot += 1;
        }
        stats
    }

    /// Returns a structural hash of the graph.
    ///
    /// Two contexts built by the same sequence of factory calls have equal
    /// fingerprints. Simulation state is not hashed.
    pub fn fingerprint(&self) -> ContentHash {
        let mut hasher = ContentHasher::new();
        self.hash_into(&mut hasher);
        hasher.finish()
    }

    fn hash_into(&self, h: &mut ContentHasher) {
        h.write_str(&self.name);
        for node in self.nodes.values() {
            h.write_u32(node.id.as_raw());
            h.write_str(node.kind.tag());
            h.write_u32(node.width);
            h.write_str(node.name.map_or("", |n| self.names.resolve(n)));
            h.write_u32(node.srcs.len() as u32);
            for src in &node.srcs {
                h.write_u32(src.as_raw());
            }
            match &node.kind {
                NodeKind::Literal => hash_bits(h, &node.value),
                NodeKind::Alu { op } => h.write_str(op.name()),
                NodeKind::Select { has_key } => h.write_u32(*has_key as u32),
                NodeKind::Proxy { ranges } => {
                    for r in ranges.ranges() {
                        for v in [r.src_idx, r.dst_offset, r.src_offset, r.length] {
                            h.write_u32(v);
                        }
                    }
                }
                NodeKind::Reg { cd, .. } | NodeKind::Latch { cd, .. } => h.write_u32(cd.as_raw()),
                NodeKind::Memory(state) => {
                    h.write_u32(state.data_width);
                    h.write_u32(state.num_items);
                    h.write_u32(state.writable as u32);
                }
                NodeKind::BindPort { output } => h.write_u64(*output as u64),
                NodeKind::Assert { message, .. } => h.write_str(message),
                NodeKind::Print { format, .. } => h.write_str(format),
                NodeKind::Bind(inst) => inst.child.hash_into(h),
                NodeKind::Udf(state) => {
                    h.write_str(&state.name);
                    h.write_u32(state.cd.map_or(u32::MAX, |cd| cd.as_raw()));
                }
                _ => {}
            }
        }
        for (id, cd) in self.domains.iter() {
            h.write_u32(id.as_raw());
            for event in cd.events() {
                h.write_u32(event.signal.as_raw());
                h.write_str(&event.edge.to_string());
            }
        }
    }
}

fn hash_bits(h: &mut ContentHasher, value: &BitVector) {
    h.write_u32(value.width());
    for word in value.words() {
        h.write_u64(word);
    }
}

#[cfg(test)]
mod tests {
    use crate::alu::AluOp;
    use crate::context::Context;
    use crate::ids::NodeId;
    use crate::node::Udf;
    use kiln_common::BitVector;

    fn build() -> Context {
        let mut ctx = Context::new("top");
        let a = ctx.input("a", 4).unwrap();
        let b = ctx.input("b", 4).unwrap();
        let x = ctx.alu2(AluOp::Xor, a, b).unwrap();
        let r = ctx.register(x).unwrap();
        let o = ctx.output("o", 4).unwrap();
        ctx.assign(o, r).unwrap();
        ctx
    }

    #[test]
    fn fingerprint_is_deterministic() {
        assert_eq!(build().fingerprint(), build().fingerprint());
        let mut other = build();
        other.input("c", 1).unwrap();
        assert_ne!(build().fingerprint(), other.fingerprint());
    }

    #[test]
    fn fingerprint_ignores_simulation_state() {
        let mut ctx = build();
        let before = ctx.fingerprint();
        ctx.set_input_u64("a", 3).unwrap();
        ctx.eval(0).unwrap();
        assert_eq!(ctx.fingerprint(), before);
    }

    #[test]
    fn stats_count_kinds() {
        let stats = build().dump_stats();
        assert_eq!(stats.inputs, 4); // a, b, clk, reset
        assert_eq!(stats.outputs, 1);
        assert_eq!(stats.registers, 1);
        assert_eq!(stats.alus, 1);
        assert_eq!(stats.clock_domains, 1);
        assert!(stats.to_string().contains("1 registers"));
    }

    #[test]
    fn dump_lists_named_nodes() {
        let text = build().dump_ast();
        assert!(text.starts_with("context top\n"));
        assert!(text.contains("alu.xor<4>"));
        assert!(text.contains("\"o\""));
        assert!(text.contains("posedge"));
    }

    #[test]
    fn views_serialize() {
        let ctx = build();
        let views = ctx.views();
        let json = serde_json::to_value(&views).unwrap();
        let reg = views.iter().find(|v| v.kind == "reg").unwrap();
        assert!(reg.clock_domain.is_some());
        assert_eq!(reg.events.len(), 1);
        let lit = json
            .as_array()
            .unwrap()
            .iter()
            .find(|v| v["kind"] == "lit")
            .unwrap();
        assert_eq!(lit["width"], 4);
    }

    struct Parity;

    impl Udf for Parity {
        fn eval(&mut self, inputs: &[&BitVector]) -> BitVector {
            BitVector::from_bool(inputs[0].reduce_xor())
        }
    }

    #[test]
    fn dump_cfg_stops_at_depth() {
        let ctx = build();
        let o = ctx.output_id("o").unwrap();
        let shallow = ctx.dump_cfg(o, 0).unwrap();
        assert_eq!(shallow.lines().count(), 1);
        assert!(shallow.starts_with(&format!("{o} <- output<4>")));

        let full = ctx.dump_cfg(o, 16).unwrap();
        assert!(full.contains("    "));
        assert!(full.contains("alu.xor<4>"));
        assert!(full.contains("\"a\""));
        let reg = full.lines().find(|l| l.contains("reg<4>")).unwrap();
        assert!(reg.starts_with("    "));
    }

    #[test]
    fn dump_cfg_marks_shared_sources() {
        let mut ctx = Context::new("share");
        let a = ctx.input("a", 4).unwrap();
        let sq = ctx.alu2(AluOp::Mul, a, a).unwrap();
        let text = ctx.dump_cfg(sq, 4).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert_eq!(text.lines().last(), Some(format!("  {a} ...").as_str()));
        assert!(ctx.dump_cfg(NodeId::from_raw(999), 1).is_err());
    }

    #[test]
    fn udfs_are_counted_viewed_and_hashed() {
        let make = |name: &str| {
            let mut ctx = Context::new("par");
            let a = ctx.input("a", 4).unwrap();
            let p = ctx.udf(name, 1, &[a], Box::new(Parity)).unwrap();
            let o = ctx.output("p", 1).unwrap();
            ctx.assign(o, p).unwrap();
            (ctx, p)
        };
        let (ctx, p) = make("parity");
        assert_eq!(ctx.dump_stats().udfs, 1);
        let view = ctx.view(ctx.node(p).unwrap());
        assert_eq!(view.kind, "udf");
        assert_eq!(view.text.as_deref(), Some("parity"));
        assert_eq!(ctx.fingerprint(), make("parity").0.fingerprint());
        assert_ne!(ctx.fingerprint(), make("xor").0.fingerprint());
    }
}
