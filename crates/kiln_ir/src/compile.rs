//! Compilation: structural checks, identity-proxy elision and dead code
//! elimination.
//!
//! The [`Compiler`] runs an ordered list of passes over a context (and,
//! first, over every instantiated child). Which optional passes run is
//! controlled by [`CompileConfig`].

use crate::context::Context;
use crate::error::{IrError, IrResult};
use crate::ids::{ClockDomainId, NodeId};
use crate::node::NodeKind;
use kiln_config::CompileConfig;
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::debug;

/// Counters reported by a compile run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CompileStats {
    /// Live nodes before compilation.
    pub nodes_before: usize,
    /// Live nodes after compilation.
    pub nodes_after: usize,
    /// Identity proxies bypassed.
    pub proxies_elided: usize,
    /// Nodes removed by dead code elimination.
    pub nodes_removed: usize,
    /// Clock domains destroyed because their last user was removed.
    pub domains_removed: usize,
    /// Instantiated children compiled (recursively).
    pub children: usize,
}

impl fmt::Display for CompileStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} nodes ({} removed, {} proxies elided, {} domains removed, {} children)",
            self.nodes_before,
            self.nodes_after,
            self.nodes_removed,
            self.proxies_elided,
            self.domains_removed,
            self.children
        )
    }
}

/// One compile step over a context.
pub(crate) trait Pass {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Runs the pass, failing if the context violates the pass's check.
    fn run(&self, ctx: &mut Context, stats: &mut CompileStats) -> IrResult<()>;
}

/// Drives the compile passes over one context and its children.
pub struct Compiler<'a> {
    ctx: &'a mut Context,
    config: &'a CompileConfig,
}

impl<'a> Compiler<'a> {
    /// Creates a compiler for `ctx`.
    pub fn new(ctx: &'a mut Context, config: &'a CompileConfig) -> Self {
        Self { ctx, config }
    }

    fn passes(&self) -> Vec<Box<dyn Pass>> {
        let mut passes: Vec<Box<dyn Pass>> = vec![Box::new(SyntaxCheck)];
        if self.config.elide_identity_proxies {
            passes.push(Box::new(ProxyElision));
        }
        if self.config.dead_code_elimination {
            passes.push(Box::new(DeadCodeElimination));
        }
        if self.config.check_undefined {
            passes.push(Box::new(UndefinedCheck));
        }
        if self.config.check_combinational_loops {
            passes.push(Box::new(LoopCheck));
        }
        passes.push(Box::new(DomainCheck));
        passes
    }

    /// Compiles children first, then runs every enabled pass.
    ///
    /// The graph must not be modified afterwards.
    pub fn run(self) -> IrResult<CompileStats> {
        let mut stats = CompileStats {
            nodes_before: self.ctx.node_count(),
            ..CompileStats::default()
        };
        for bind in self.ctx.bindings.clone() {
            if let Some(child) = self.ctx.instance_of_mut(bind) {
                let child_stats = Compiler::new(child, self.config).run()?;
                stats.children += 1 + child_stats.children;
            }
        }
        for pass in self.passes() {
            pass.run(self.ctx, &mut stats)?;
            debug!(
                context = self.ctx.name(),
                pass = pass.name(),
                nodes = self.ctx.node_count(),
                "compile pass finished"
            );
        }
        stats.nodes_after = self.ctx.node_count();
        debug!(context = self.ctx.name(), %stats, "compiled");
        Ok(stats)
    }
}

impl Context {
    /// Compiles the context with every pass enabled.
    pub fn compile(&mut self) -> IrResult<CompileStats> {
        let config = CompileConfig::default();
        Compiler::new(self, &config).run()
    }

    /// Nodes that are observable or externally driven.
    pub(crate) fn roots(&self) -> Vec<NodeId> {
        let live_bindings = self.bindings.iter().copied().filter(|b| {
            matches!(&self.nodes.get(*b).kind, NodeKind::Bind(inst) if inst.child.has_sinks())
        });
        self.outputs
            .iter()
            .chain(&self.taps)
            .chain(&self.sinks)
            .chain(&self.inputs)
            .copied()
            .chain(live_bindings)
            .collect()
    }

    /// Sources of `id` plus, for stateful nodes, the signals of its clock domain.
    fn structural_deps(&self, id: NodeId) -> Vec<NodeId> {
        let node = self.nodes.get(id);
        let mut deps = node.srcs.clone();
        if let Some(cd) = node.clock_domain() {
            if let Some(domain) = self.domains.try_get(cd) {
                deps.extend(domain.events().iter().map(|e| e.signal));
            }
        }
        deps
    }
}

struct SyntaxCheck;

impl Pass for SyntaxCheck {
    fn name(&self) -> &'static str {
        "syntax-check"
    }

    fn run(&self, ctx: &mut Context, _stats: &mut CompileStats) -> IrResult<()> {
        match ctx.branches.len() {
            0 => Ok(()),
            open => Err(IrError::UnterminatedBranch(open)),
        }
    }
}

/// Redirects readers of single-source, full-width, offset-zero proxies to the source.
struct ProxyElision;

impl ProxyElision {
    fn is_identity(ctx: &Context, id: NodeId) -> Option<NodeId> {
        let node = ctx.nodes.get(id);
        match &node.kind {
            NodeKind::Proxy { ranges } if node.srcs.len() == 1 => {
                let src = node.srcs[0];
                ranges
                    .is_identity(node.width, ctx.nodes.get(src).width)
                    .then_some(src)
            }
            _ => None,
        }
    }

    fn resolve(ctx: &Context, id: NodeId) -> IrResult<NodeId> {
        let mut cur = id;
        for _ in 0..=ctx.nodes.len() {
            match Self::is_identity(ctx, cur) {
                Some(src) => cur = src,
                None => return Ok(cur),
            }
        }
        Err(IrError::CombinationalLoop(id))
    }
}

impl Pass for ProxyElision {
    fn name(&self) -> &'static str {
        "proxy-elision"
    }

    fn run(&self, ctx: &mut Context, stats: &mut CompileStats) -> IrResult<()> {
        let mut map: HashMap<NodeId, NodeId> = HashMap::new();
        for id in ctx.nodes.ids().collect::<Vec<_>>() {
            if Self::is_identity(ctx, id).is_some() {
                map.insert(id, Self::resolve(ctx, id)?);
            }
        }
        if map.is_empty() {
            return Ok(());
        }
        for (_, node) in ctx.nodes.iter_mut() {
            for src in &mut node.srcs {
                if let Some(target) = map.get(src) {
                    *src = *target;
                }
            }
        }
        for (_, domain) in ctx.domains.iter_mut() {
            domain.remap_signals(|s| map.get(&s).copied().unwrap_or(s));
        }

        ctx.domain_cache.clear();
        let domains: Vec<(ClockDomainId, Vec<_>)> = ctx
            .domains
            .iter()
            .map(|(id, d)| (id, d.events().to_vec()))
            .collect();
        for (id, events) in domains {
            ctx.domain_cache.entry(events).or_insert(id);
        }

        ctx.alu_cache.clear();
        let alus: Vec<_> = ctx
            .nodes
            .values()
            .filter_map(|n| match n.kind {
                NodeKind::Alu { op } => Some(((op, n.srcs[0], n.srcs.get(1).copied()), n.id)),
                _ => None,
            })
            .collect();
        for (key, id) in alus {
            ctx.alu_cache.entry(key).or_insert(id);
        }

        stats.proxies_elided += map.len();
        Ok(())
    }
}

/// Removes every node not reachable backwards from a root.
struct DeadCodeElimination;

impl Pass for DeadCodeElimination {
    fn name(&self) -> &'static str {
        "dce"
    }

    fn run(&self, ctx: &mut Context, stats: &mut CompileStats) -> IrResult<()> {
        let mut live: HashSet<NodeId> = HashSet::new();
        let mut worklist = ctx.roots();
        while let Some(id) = worklist.pop() {
            if live.insert(id) {
                worklist.extend(ctx.structural_deps(id));
            }
        }

        let dead: Vec<NodeId> = ctx.nodes.ids().filter(|id| !live.contains(id)).collect();
        for id in &dead {
            let Some(node) = ctx.nodes.remove(*id) else {
                continue;
            };
            if let Some(cd) = node.clock_domain() {
                if ctx.domains.contains(cd) && ctx.domains.get_mut(cd).remove_use(*id) {
                    ctx.domains.remove(cd);
                    ctx.domain_cache.retain(|_, v| *v != cd);
                    stats.domains_removed += 1;
                }
            }
            if let NodeKind::MemPort(_) = node.kind {
                let mem = node.srcs[0];
                if ctx.nodes.contains(mem) {
                    if let NodeKind::Memory(state) = &mut ctx.nodes.get_mut(mem).kind {
                        state.ports.retain(|p| p != id);
                    }
                }
            }
        }

        let nodes = &ctx.nodes;
        ctx.stateful.retain(|id| nodes.contains(*id));
        ctx.bindings.retain(|id| nodes.contains(*id));
        ctx.literals.retain(|_, id| nodes.contains(*id));
        ctx.alu_cache.retain(|_, id| nodes.contains(*id));
        ctx.var_scope.retain(|id, _| nodes.contains(*id));
        ctx.time_node = ctx.time_node.filter(|id| nodes.contains(*id));

        debug_assert!(ctx
            .nodes
            .values()
            .all(|n| n.srcs.iter().all(|s| ctx.nodes.contains(*s))));
        stats.nodes_removed += dead.len();
        Ok(())
    }
}

/// Rejects undefined placeholders reachable from a root.
struct UndefinedCheck;

impl Pass for UndefinedCheck {
    fn name(&self) -> &'static str {
        "undefined-check"
    }

    fn run(&self, ctx: &mut Context, _stats: &mut CompileStats) -> IrResult<()> {
        let mut seen: HashSet<NodeId> = HashSet::new();
        for root in ctx.roots() {
            let mut stack = vec![root];
            while let Some(id) = stack.pop() {
                if !seen.insert(id) {
                    continue;
                }
                if matches!(ctx.nodes.get(id).kind, NodeKind::Undef) {
                    return Err(IrError::UndefinedNode { undef: id, root });
                }
                stack.extend(ctx.structural_deps(id));
            }
        }
        Ok(())
    }
}

/// Rejects cycles that do not pass through a stateful node.
struct LoopCheck;

impl Pass for LoopCheck {
    fn name(&self) -> &'static str {
        "loop-check"
    }

    fn run(&self, ctx: &mut Context, _stats: &mut CompileStats) -> IrResult<()> {
        let mut graph: DiGraphMap<NodeId, ()> = DiGraphMap::new();
        for (id, node) in ctx.nodes.iter() {
            graph.add_node(id);
            for dep in node.comb_deps() {
                graph.add_edge(*dep, id, ());
            }
        }
        toposort(&graph, None)
            .map(|_| ())
            .map_err(|cycle| IrError::CombinationalLoop(cycle.node_id()))
    }
}

/// Checks that stateful nodes and their clock domains agree.
struct DomainCheck;

impl Pass for DomainCheck {
    fn name(&self) -> &'static str {
        "domain-check"
    }

    fn run(&self, ctx: &mut Context, _stats: &mut CompileStats) -> IrResult<()> {
        for id in &ctx.stateful {
            let Some(cd) = ctx.nodes.get(*id).clock_domain() else {
                continue;
            };
            let listed = ctx
                .domains
                .try_get(cd)
                .is_some_and(|d| d.users().contains(id));
            if !listed {
                return Err(IrError::ClockDomainMismatch {
                    node: *id,
                    reason: format!("not registered with {cd}"),
                });
            }
        }
        for (cd, domain) in ctx.domains.iter() {
            for user in domain.users() {
                let owner = ctx.nodes.try_get(*user).and_then(|n| n.clock_domain());
                if owner != Some(cd) {
                    return Err(IrError::ClockDomainMismatch {
                        node: *user,
                        reason: format!("listed by {cd} but not clocked by it"),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alu::AluOp;
    use kiln_common::BitVector;

    fn adder() -> (Context, NodeId) {
        let mut ctx = Context::new("top");
        let a = ctx.input("a", 8).unwrap();
        let b = ctx.input("b", 8).unwrap();
        let sum = ctx.alu2(AluOp::Add, a, b).unwrap();
        let out = ctx.output("sum", 8).unwrap();
        ctx.assign(out, sum).unwrap();
        (ctx, sum)
    }

    #[test]
    fn dead_logic_removed() {
        let (mut ctx, sum) = adder();
        let a = ctx.input_id("a").unwrap();
        let unused = ctx.alu1(AluOp::Inv, a).unwrap();
        let stats = ctx.compile().unwrap();
        assert!(ctx.node(unused).is_err());
        assert!(ctx.node(sum).is_ok());
        assert!(stats.nodes_removed > 0);
        assert_eq!(stats.nodes_after, ctx.node_count());
    }

    #[test]
    fn dce_keeps_alu_cache_consistent() {
        let (mut ctx, _) = adder();
        let a = ctx.input_id("a").unwrap();
        let unused = ctx.alu1(AluOp::Inv, a).unwrap();
        ctx.compile().unwrap();
        assert!(!ctx.alu_cache.values().any(|id| *id == unused));
    }

    #[test]
    fn identity_proxies_elided() {
        let (mut ctx, sum) = adder();
        let out = ctx.output_id("sum").unwrap();
        let stats = ctx.compile().unwrap();
        assert!(stats.proxies_elided >= 1);
        assert_eq!(ctx.node(out).unwrap().srcs(), &[sum]);
    }

    #[test]
    fn elision_can_be_disabled() {
        let (mut ctx, sum) = adder();
        let out = ctx.output_id("sum").unwrap();
        let config = CompileConfig {
            elide_identity_proxies: false,
            ..CompileConfig::default()
        };
        let stats = Compiler::new(&mut ctx, &config).run().unwrap();
        assert_eq!(stats.proxies_elided, 0);
        assert_ne!(ctx.node(out).unwrap().srcs(), &[sum]);
    }

    #[test]
    fn open_branch_rejected() {
        let (mut ctx, _) = adder();
        ctx.begin_branch(None).unwrap();
        assert_eq!(ctx.compile().unwrap_err(), IrError::UnterminatedBranch(1));
    }

    #[test]
    fn unassigned_output_is_undefined() {
        let mut ctx = Context::new("top");
        let out = ctx.output("o", 4).unwrap();
        let err = ctx.compile().unwrap_err();
        assert!(matches!(err, IrError::UndefinedNode { root, .. } if root == out));
    }

    #[test]
    fn combinational_loop_rejected() {
        let mut ctx = Context::new("top");
        let v = ctx.var(4);
        let inv = ctx.alu1(AluOp::Inv, v).unwrap();
        ctx.assign(v, inv).unwrap();
        let out = ctx.output("o", 4).unwrap();
        ctx.assign(out, v).unwrap();
        assert!(matches!(
            ctx.compile(),
            Err(IrError::CombinationalLoop(_))
        ));
    }

    #[test]
    fn register_feedback_is_not_a_loop() {
        let mut ctx = Context::new("counter");
        let next = ctx.var(4);
        let count = ctx.register(next).unwrap();
        let one = ctx.literal_u64(1, 4).unwrap();
        let inc = ctx.alu2(AluOp::Add, count, one).unwrap();
        ctx.assign(next, inc).unwrap();
        let out = ctx.output("count", 4).unwrap();
        ctx.assign(out, count).unwrap();
        ctx.compile().unwrap();
        assert_eq!(ctx.stateful_nodes(), &[count]);
    }

    #[test]
    fn dead_register_releases_domain() {
        let mut ctx = Context::new("top");
        let d = ctx.input("d", 4).unwrap();
        let r = ctx.register(d).unwrap();
        let cd = ctx.node(r).unwrap().clock_domain().unwrap();
        let out = ctx.output("o", 4).unwrap();
        ctx.assign(out, d).unwrap();
        let stats = ctx.compile().unwrap();
        assert!(ctx.node(r).is_err());
        assert!(ctx.clock_domain(cd).is_none());
        assert_eq!(stats.domains_removed, 1);
        assert!(ctx.stateful_nodes().is_empty());
    }

    struct Hold;

    impl crate::node::Udf for Hold {
        fn eval(&mut self, inputs: &[&BitVector]) -> BitVector {
            inputs[0].clone()
        }
    }

    #[test]
    fn clocked_udf_survives_with_its_domain() {
        let mut ctx = Context::new("top");
        let d = ctx.input("d", 4).unwrap();
        let live = ctx.udf_seq("hold", 4, &[d], Box::new(Hold)).unwrap();
        let dead = ctx.udf_seq("spare", 4, &[d], Box::new(Hold)).unwrap();
        let cd = ctx.node(live).unwrap().clock_domain().unwrap();
        let out = ctx.output("o", 4).unwrap();
        ctx.assign(out, live).unwrap();
        let stats = ctx.compile().unwrap();
        assert!(ctx.node(dead).is_err());
        assert_eq!(stats.domains_removed, 0);
        assert_eq!(ctx.clock_domain(cd).unwrap().users(), &[live]);
        assert_eq!(ctx.stateful_nodes(), &[live]);
    }

    #[test]
    fn dead_time_node_is_recreated() {
        let (mut ctx, _) = adder();
        let stale = ctx.time();
        ctx.compile().unwrap();
        assert!(ctx.node(stale).is_err());
        let now = ctx.time();
        assert!(ctx.node(now).is_ok());
    }

    #[test]
    fn unused_read_port_dropped_from_memory() {
        let mut ctx = Context::new("top");
        let addr = ctx.input("addr", 2).unwrap();
        let other = ctx.input("other", 2).unwrap();
        let rom = ctx
            .memory(4, 4, false, Some(BitVector::from_u64(0x4321, 16)))
            .unwrap();
        let used = ctx.mem_read(rom, addr).unwrap();
        let unused = ctx.mem_read(rom, other).unwrap();
        let out = ctx.output("o", 4).unwrap();
        ctx.assign(out, used).unwrap();
        ctx.compile().unwrap();
        assert!(ctx.node(unused).is_err());
        let NodeKind::Memory(state) = ctx.node(rom).unwrap().kind() else {
            panic!("expected memory");
        };
        assert_eq!(state.ports, vec![used]);
    }

    #[test]
    fn stats_display() {
        let stats = CompileStats {
            nodes_before: 10,
            nodes_after: 7,
            proxies_elided: 1,
            nodes_removed: 3,
            domains_removed: 0,
            children: 0,
        };
        assert_eq!(
            stats.to_string(),
            "10 -> 7 nodes (3 removed, 1 proxies elided, 0 domains removed, 0 children)"
        );
    }
}
