//! Conditional assignment and its lowering into multiplexers.
//!
//! A branch is an if/elif/else chain (no key) or a switch (key). Each block
//! of the open branch writes into private shadow copies of the destinations
//! it assigns, remembering which bits it wrote. Closing the branch folds the
//! shadows of every destination into a chain of two-way selects per
//! bit interval and assigns the result one scope further out.

use crate::alu::AluOp;
use crate::context::Context;
use crate::error::{IrError, IrResult};
use crate::ids::NodeId;
use crate::node::NodeKind;
use std::collections::{BTreeSet, HashMap};
use tracing::trace;

/// An open conditional.
#[derive(Debug)]
pub(crate) struct Branch {
    key: Option<NodeId>,
    blocks: Vec<Block>,
    block_open: bool,
    /// Value of each destination as seen outside the branch when first written.
    outer: HashMap<NodeId, NodeId>,
    /// Destinations in first-write order.
    order: Vec<NodeId>,
}

#[derive(Debug)]
struct Block {
    id: u32,
    pred: Option<NodeId>,
    shadows: HashMap<NodeId, Shadow>,
}

#[derive(Debug)]
struct Shadow {
    node: NodeId,
    /// Sorted, disjoint, merged `[lo, hi)` intervals written by the block.
    written: Vec<(u32, u32)>,
}

impl Shadow {
    fn mark(&mut self, lo: u32, hi: u32) {
        let mut merged = Vec::with_capacity(self.written.len() + 1);
        let (mut lo, mut hi) = (lo, hi);
        for &(a, b) in &self.written {
            if b < lo || a > hi {
                merged.push((a, b));
            } else {
                lo = lo.min(a);
                hi = hi.max(b);
            }
        }
        merged.push((lo, hi));
        merged.sort_unstable();
        self.written = merged;
    }

    fn covers(&self, lo: u32, hi: u32) -> bool {
        self.written.iter().any(|&(a, b)| a <= lo && hi <= b)
    }
}

impl Context {
    /// Id of the innermost open block, or 0 at top level.
    pub(crate) fn current_block(&self) -> u32 {
        match self.branches.last() {
            Some(branch) if branch.block_open => branch.blocks.last().map_or(0, |b| b.id),
            _ => 0,
        }
    }

    /// Returns the number of open branches.
    pub fn branch_depth(&self) -> usize {
        self.branches.len()
    }

    /// Opens a conditional. With a `key` the branch is a switch over it.
    pub fn begin_branch(&mut self, key: Option<NodeId>) -> IrResult<()> {
        if let Some(key) = key {
            self.node(key)?;
        }
        if let Some(branch) = self.branches.last() {
            if !branch.block_open {
                return Err(IrError::NoOpenBlock);
            }
        }
        self.branches.push(Branch {
            key,
            blocks: Vec::new(),
            block_open: false,
            outer: HashMap::new(),
            order: Vec::new(),
        });
        Ok(())
    }

    /// Opens the next block of the innermost branch, closing the previous one.
    ///
    /// `pred` is a 1-bit condition for an if-chain or a case value for a
    /// switch; `None` opens the else/default block, which must come last.
    pub fn begin_block(&mut self, pred: Option<NodeId>) -> IrResult<()> {
        let branch = self.branches.last().ok_or(IrError::NoOpenBranch)?;
        if branch.blocks.last().is_some_and(|b| b.pred.is_none()) {
            return Err(IrError::BlockAfterDefault);
        }
        let key = branch.key;
        let pred = match (pred, key) {
            (None, _) => None,
            (Some(cond), None) => {
                let width = self.width(cond)?;
                if width != 1 {
                    return Err(IrError::WidthMismatch {
                        op: "branch predicate".into(),
                        lhs: 1,
                        rhs: width,
                    });
                }
                Some(cond)
            }
            (Some(case), Some(key)) => {
                let key_width = self.width(key)?;
                let case_width = self.width(case)?;
                if key_width != case_width {
                    return Err(IrError::CaseWidthMismatch {
                        key: key_width,
                        case: case_width,
                    });
                }
                Some(self.alu2(AluOp::Eq, key, case)?)
            }
        };
        let id = self.next_block;
        self.next_block += 1;
        if let Some(branch) = self.branches.last_mut() {
            branch.blocks.push(Block {
                id,
                pred,
                shadows: HashMap::new(),
            });
            branch.block_open = true;
        }
        Ok(())
    }

    /// Closes the open block of the innermost branch.
    pub fn end_block(&mut self) -> IrResult<()> {
        let branch = self.branches.last_mut().ok_or(IrError::NoOpenBranch)?;
        if !branch.block_open {
            return Err(IrError::NoOpenBlock);
        }
        branch.block_open = false;
        Ok(())
    }

    /// Closes the innermost branch and lowers its assignments into selects.
    pub fn end_branch(&mut self) -> IrResult<()> {
        let branch = self.branches.pop().ok_or(IrError::NoOpenBranch)?;
        for dst in &branch.order {
            self.fold_destination(&branch, *dst)?;
        }
        Ok(())
    }

    fn fold_destination(&mut self, branch: &Branch, dst: NodeId) -> IrResult<()> {
        let outer = branch.outer[&dst];
        let writers: Vec<Option<&Shadow>> =
            branch.blocks.iter().map(|b| b.shadows.get(&dst)).collect();

        let mut cuts = BTreeSet::new();
        for shadow in writers.iter().flatten() {
            for &(lo, hi) in &shadow.written {
                cuts.insert(lo);
                cuts.insert(hi);
            }
        }
        let cuts: Vec<u32> = cuts.into_iter().collect();

        // Elementary pieces, merged while the set of writing blocks is unchanged.
        let mut pieces: Vec<(u32, u32, Vec<bool>)> = Vec::new();
        for w in cuts.windows(2) {
            let (lo, hi) = (w[0], w[1]);
            let mask: Vec<bool> = writers
                .iter()
                .map(|s| s.is_some_and(|s| s.covers(lo, hi)))
                .collect();
            if !mask.iter().any(|m| *m) {
                continue;
            }
            match pieces.last_mut() {
                Some(last) if last.1 == lo && last.2 == mask => last.1 = hi,
                _ => pieces.push((lo, hi, mask)),
            }
        }

        for (lo, hi, mask) in pieces {
            let source = |i: usize| -> NodeId {
                match writers[i] {
                    Some(shadow) if mask[i] => shadow.node,
                    _ => outer,
                }
            };
            let len = hi - lo;
            let last = branch.blocks.len() - 1;
            let has_default = branch.blocks[last].pred.is_none();
            let (base, arms) = if has_default {
                (source(last), last)
            } else {
                (outer, branch.blocks.len())
            };
            let mut acc_src = Some(base);
            let mut acc = self.slice(base, lo, len)?;
            for i in (0..arms).rev() {
                let src = source(i);
                if acc_src == Some(src) {
                    continue;
                }
                let Some(pred) = branch.blocks[i].pred else {
                    continue;
                };
                let value = self.slice(src, lo, len)?;
                acc = self.select(pred, value, acc)?;
                acc_src = None;
            }
            trace!(dst = %dst, lo, hi, result = %acc, "folded conditional interval");
            self.assign_slice(dst, lo, acc)?;
        }
        Ok(())
    }

    /// Returns the conjunction of the effective predicates of every open block.
    ///
    /// A block's effective predicate is its own predicate and the negation
    /// of every earlier block's predicate in the same branch. Returns `None`
    /// at top level or when every open block is unconditional.
    pub fn current_predicate(&mut self) -> IrResult<Option<NodeId>> {
        let mut terms: Vec<(Option<NodeId>, Vec<NodeId>)> = Vec::new();
        for branch in &self.branches {
            if !branch.block_open {
                return Err(IrError::NoOpenBlock);
            }
            let Some((current, earlier)) = branch.blocks.split_last() else {
                continue;
            };
            terms.push((current.pred, earlier.iter().filter_map(|b| b.pred).collect()));
        }
        let mut acc: Option<NodeId> = None;
        for (pred, earlier) in terms {
            let mut term = pred;
            for p in earlier {
                let not_p = self.alu1(AluOp::Inv, p)?;
                term = Some(self.and_opt(term, not_p)?);
            }
            if let Some(term) = term {
                acc = Some(self.and_opt(acc, term)?);
            }
        }
        Ok(acc)
    }

    fn and_opt(&mut self, acc: Option<NodeId>, term: NodeId) -> IrResult<NodeId> {
        match acc {
            Some(acc) => self.alu2(AluOp::And, acc, term),
            None => Ok(term),
        }
    }

    /// Resolves the proxy an assignment to `dst` writes into.
    fn assign_target(&self, dst: NodeId) -> IrResult<NodeId> {
        let node = self.node(dst)?;
        match node.kind {
            NodeKind::Output => Ok(node.srcs[0]),
            NodeKind::Proxy { .. } if self.var_scope.contains_key(&dst) => Ok(dst),
            _ => Err(IrError::NotAssignable(dst)),
        }
    }

    /// Assigns all of `src` to `dst`.
    pub fn assign(&mut self, dst: NodeId, src: NodeId) -> IrResult<()> {
        let dst_width = self.width(self.assign_target(dst)?)?;
        let src_width = self.width(src)?;
        if dst_width != src_width {
            return Err(IrError::WidthMismatch {
                op: "assign".into(),
                lhs: dst_width,
                rhs: src_width,
            });
        }
        self.assign_slice(dst, 0, src)
    }

    /// Assigns `src` to bits `[offset, offset + width(src))` of `dst`.
    pub fn assign_slice(&mut self, dst: NodeId, offset: u32, src: NodeId) -> IrResult<()> {
        let target = self.assign_target(dst)?;
        let width = self.width(target)?;
        let len = self.width(src)?;
        if offset as u64 + len as u64 > width as u64 {
            return Err(IrError::SliceOutOfBounds {
                node: dst,
                offset,
                length: len,
                width,
            });
        }
        if len == 0 {
            return Ok(());
        }
        let Some(branch) = self.branches.last() else {
            return self.proxy_write(target, offset, src, 0, len);
        };
        if !branch.block_open {
            return Err(IrError::NoOpenBlock);
        }
        if self.var_scope.get(&target) == Some(&self.current_block()) {
            return self.proxy_write(target, offset, src, 0, len);
        }
        let shadow = self.shadow_for(target)?;
        self.proxy_write(shadow, offset, src, 0, len)?;
        if let Some(s) = self.current_shadow_mut(target) {
            s.mark(offset, offset + len);
        }
        Ok(())
    }

    fn current_shadow_mut(&mut self, dst: NodeId) -> Option<&mut Shadow> {
        self.branches
            .last_mut()?
            .blocks
            .last_mut()?
            .shadows
            .get_mut(&dst)
    }

    /// Node holding `dst`'s value as seen inside the open block of branch `level - 1`.
    fn visible_value(&self, dst: NodeId, level: usize) -> NodeId {
        for branch in self.branches[..level].iter().rev() {
            let Some(block) = branch.blocks.last() else {
                continue;
            };
            if let Some(shadow) = block.shadows.get(&dst) {
                return shadow.node;
            }
            if self.var_scope.get(&dst) == Some(&block.id) {
                return dst;
            }
            if let Some(outer) = branch.outer.get(&dst) {
                return *outer;
            }
        }
        dst
    }

    /// Returns the open block's shadow of `dst`, creating it on first write.
    fn shadow_for(&mut self, dst: NodeId) -> IrResult<NodeId> {
        let level = self.branches.len();
        let branch = self.branches.last().ok_or(IrError::NoOpenBranch)?;
        let block = branch.blocks.last().ok_or(IrError::NoOpenBlock)?;
        if let Some(shadow) = block.shadows.get(&dst) {
            return Ok(shadow.node);
        }
        let outer = match branch.outer.get(&dst) {
            Some(outer) => *outer,
            None => {
                let visible = self.visible_value(dst, level - 1);
                let snapshot = self.copy_proxy(visible);
                if let Some(branch) = self.branches.last_mut() {
                    branch.outer.insert(dst, snapshot);
                    branch.order.push(dst);
                }
                snapshot
            }
        };
        let node = self.copy_proxy(outer);
        if let Some(block) = self.branches.last_mut().and_then(|b| b.blocks.last_mut()) {
            block.shadows.insert(
                dst,
                Shadow {
                    node,
                    written: Vec::new(),
                },
            );
        }
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(ctx: &mut Context) -> (NodeId, NodeId, NodeId) {
        let p = ctx.input("p", 1).unwrap();
        let a = ctx.input("a", 4).unwrap();
        let b = ctx.input("b", 4).unwrap();
        (p, a, b)
    }

    #[test]
    fn shadow_marks_merge() {
        let mut s = Shadow {
            node: NodeId::from_raw(0),
            written: Vec::new(),
        };
        s.mark(4, 8);
        s.mark(0, 2);
        s.mark(2, 4);
        assert_eq!(s.written, vec![(0, 8)]);
        assert!(s.covers(1, 7));
        s.mark(10, 12);
        assert!(!s.covers(7, 11));
    }

    #[test]
    fn block_requires_branch() {
        let mut ctx = Context::new("top");
        assert_eq!(ctx.begin_block(None), Err(IrError::NoOpenBranch));
        assert_eq!(ctx.end_branch(), Err(IrError::NoOpenBranch));
        assert_eq!(ctx.end_block(), Err(IrError::NoOpenBranch));
    }

    #[test]
    fn block_after_default_rejected() {
        let mut ctx = Context::new("top");
        let (p, _, _) = inputs(&mut ctx);
        ctx.begin_branch(None).unwrap();
        ctx.begin_block(None).unwrap();
        assert_eq!(ctx.begin_block(Some(p)), Err(IrError::BlockAfterDefault));
    }

    #[test]
    fn assign_between_blocks_needs_open_block() {
        let mut ctx = Context::new("top");
        let (p, a, _) = inputs(&mut ctx);
        let v = ctx.var(4);
        ctx.begin_branch(None).unwrap();
        assert_eq!(ctx.assign(v, a), Err(IrError::NoOpenBlock));
        ctx.begin_block(Some(p)).unwrap();
        ctx.end_block().unwrap();
        assert_eq!(ctx.assign(v, a), Err(IrError::NoOpenBlock));
    }

    #[test]
    fn inputs_are_not_assignable() {
        let mut ctx = Context::new("top");
        let (_, a, b) = inputs(&mut ctx);
        assert_eq!(ctx.assign(a, b), Err(IrError::NotAssignable(a)));
        let s = ctx.slice(b, 0, 2).unwrap();
        let c = ctx.literal_u64(0, 2).unwrap();
        assert_eq!(ctx.assign(s, c), Err(IrError::NotAssignable(s)));
    }

    #[test]
    fn switch_case_width_checked() {
        let mut ctx = Context::new("top");
        let (_, a, _) = inputs(&mut ctx);
        let c = ctx.literal_u64(1, 3).unwrap();
        ctx.begin_branch(Some(a)).unwrap();
        assert_eq!(
            ctx.begin_block(Some(c)),
            Err(IrError::CaseWidthMismatch { key: 4, case: 3 })
        );
    }

    #[test]
    fn if_else_builds_single_select() {
        let mut ctx = Context::new("top");
        let (p, a, b) = inputs(&mut ctx);
        let out = ctx.output("o", 4).unwrap();
        ctx.begin_branch(None).unwrap();
        ctx.begin_block(Some(p)).unwrap();
        ctx.assign(out, a).unwrap();
        ctx.begin_block(None).unwrap();
        ctx.assign(out, b).unwrap();
        ctx.end_branch().unwrap();

        let selects = ctx
            .nodes()
            .filter(|n| matches!(n.kind(), NodeKind::Select { .. }))
            .count();
        assert_eq!(selects, 1);
    }

    #[test]
    fn unwritten_intervals_get_no_select() {
        let mut ctx = Context::new("top");
        let (p, _, _) = inputs(&mut ctx);
        let out = ctx.output("o", 8).unwrap();
        let lo = ctx.literal_u64(0xf, 4).unwrap();
        ctx.begin_branch(None).unwrap();
        ctx.begin_block(Some(p)).unwrap();
        ctx.assign_slice(out, 0, lo).unwrap();
        ctx.end_branch().unwrap();
        let sel: Vec<_> = ctx
            .nodes()
            .filter(|n| matches!(n.kind(), NodeKind::Select { .. }))
            .collect();
        assert_eq!(sel.len(), 1);
        assert_eq!(sel[0].width(), 4);
    }

    #[test]
    fn local_variables_are_written_directly() {
        let mut ctx = Context::new("top");
        let (p, a, _) = inputs(&mut ctx);
        ctx.begin_branch(None).unwrap();
        ctx.begin_block(Some(p)).unwrap();
        let local = ctx.var(4);
        ctx.assign(local, a).unwrap();
        ctx.end_branch().unwrap();
        assert!(ctx.node(local).unwrap().srcs().contains(&a));
        assert!(!ctx
            .nodes()
            .any(|n| matches!(n.kind(), NodeKind::Select { .. })));
    }

    #[test]
    fn predicate_conjoins_nested_blocks() {
        let mut ctx = Context::new("top");
        let (p, _, _) = inputs(&mut ctx);
        let q = ctx.input("q", 1).unwrap();
        assert_eq!(ctx.current_predicate().unwrap(), None);
        ctx.begin_branch(None).unwrap();
        ctx.begin_block(Some(p)).unwrap();
        assert_eq!(ctx.current_predicate().unwrap(), Some(p));
        ctx.begin_block(None).unwrap();
        let not_p = ctx.alu1(AluOp::Inv, p).unwrap();
        assert_eq!(ctx.current_predicate().unwrap(), Some(not_p));
        ctx.begin_branch(None).unwrap();
        ctx.begin_block(Some(q)).unwrap();
        let both = ctx.alu2(AluOp::And, not_p, q).unwrap();
        assert_eq!(ctx.current_predicate().unwrap(), Some(both));
    }

    #[test]
    fn memory_rejected_inside_branch() {
        let mut ctx = Context::new("top");
        let (p, _, _) = inputs(&mut ctx);
        ctx.begin_branch(None).unwrap();
        ctx.begin_block(Some(p)).unwrap();
        assert_eq!(
            ctx.memory(8, 4, true, None).unwrap_err(),
            IrError::MemoryInConditional
        );
    }

    #[test]
    fn ports_and_instances_rejected_inside_branch() {
        let mut ctx = Context::new("top");
        let (p, _, _) = inputs(&mut ctx);
        ctx.begin_branch(None).unwrap();
        ctx.begin_block(Some(p)).unwrap();
        let before = ctx.node_count();
        assert_eq!(
            ctx.output("q", 8).unwrap_err(),
            IrError::DeclarationInConditional("output 'q'".into())
        );
        assert_eq!(
            ctx.instantiate(Context::new("leaf")).unwrap_err(),
            IrError::DeclarationInConditional("instance 'leaf'".into())
        );
        assert_eq!(ctx.node_count(), before);
        ctx.end_block().unwrap();
        ctx.end_branch().unwrap();
        assert!(ctx.output("q", 8).is_ok());
        assert!(ctx.instantiate(Context::new("leaf")).is_ok());
    }
}
