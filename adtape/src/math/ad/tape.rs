//! The reverse-mode tape: node arena, ordered registry and backward pass.
//!
//! Every thread owns one [`Tape`] behind a thread local; [`Var`] handles
//! created on a thread always refer to that thread's tape. Nodes are
//! registered in construction order, which is a valid topological order of
//! the graph, so the backward pass is a single descending sweep.

use std::cell::RefCell;
use std::fmt::Write as _;
use std::marker::PhantomData;

use super::node::{NodeId, Op, Operand, Vari};
use super::var::Var;
use crate::memory::arena::{Arena, ArenaConfig, Checkpoint, Slot, Span, DEFAULT_INITIAL_BLOCK_BYTES};
use crate::utils::errors::{AdError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TapeConfig {
    pub initial_block_bytes: usize,
    pub registry_capacity: usize,
}

impl Default for TapeConfig {
    fn default() -> Self {
        Self {
            initial_block_bytes: DEFAULT_INITIAL_BLOCK_BYTES,
            registry_capacity: 128,
        }
    }
}

impl TapeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial_block_bytes(mut self, bytes: usize) -> Self {
        self.initial_block_bytes = bytes;
        self
    }

    pub fn with_registry_capacity(mut self, capacity: usize) -> Self {
        self.registry_capacity = capacity;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TapeStats {
    pub nodes: usize,
    pub nested_depth: usize,
    pub blocks: usize,
    pub reserved_bytes: usize,
}

#[derive(Debug, Clone, Copy)]
struct NestedMark {
    registry_len: usize,
    nodes: Checkpoint,
    operands: Checkpoint,
    constants: Checkpoint,
}

#[derive(Debug)]
pub struct Tape {
    nodes: Arena<Vari>,
    operands: Arena<usize>,
    constants: Arena<f64>,
    registry: Vec<Slot>,
    nested: Vec<NestedMark>,
    stamp: u64,
    config: TapeConfig,
}

impl Default for Tape {
    fn default() -> Self {
        Self::new(TapeConfig::default())
    }
}

#[inline]
fn value_at(nodes: &Arena<Vari>, registry: &[Slot], index: usize) -> f64 {
    registry
        .get(index)
        .and_then(|s| nodes.get(*s))
        .map_or(f64::NAN, |n| n.value)
}

#[inline]
fn accumulate(nodes: &mut Arena<Vari>, registry: &[Slot], index: usize, delta: f64) {
    if let Some(n) = registry.get(index).and_then(|s| nodes.get_mut(*s)) {
        n.adjoint += delta;
    }
}

impl Tape {
    pub fn new(config: TapeConfig) -> Self {
        let arena = ArenaConfig::new().with_initial_block_bytes(config.initial_block_bytes);
        Self {
            nodes: Arena::new(arena),
            operands: Arena::new(arena),
            constants: Arena::new(arena),
            registry: Vec::with_capacity(config.registry_capacity),
            nested: Vec::new(),
            stamp: 0,
            config,
        }
    }

    pub fn config(&self) -> TapeConfig {
        self.config
    }

    /// Number of registered nodes.
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn nested_depth(&self) -> usize {
        self.nested.len()
    }

    pub fn stats(&self) -> TapeStats {
        TapeStats {
            nodes: self.registry.len(),
            nested_depth: self.nested.len(),
            blocks: self.nodes.block_count()
                + self.operands.block_count()
                + self.constants.block_count(),
            reserved_bytes: self.nodes.reserved_bytes()
                + self.operands.reserved_bytes()
                + self.constants.reserved_bytes(),
        }
    }

    /* ---- construction ---- */

    /// Allocates a node from the arena and appends it to the registry.
    pub fn push(&mut self, value: f64, op: Op) -> Result<NodeId> {
        let slot = self.nodes.alloc(Vari::new(value, op, self.stamp))?;
        self.registry.push(slot);
        Ok(NodeId {
            index: self.registry.len() - 1,
            stamp: self.stamp,
        })
    }

    pub fn push_leaf(&mut self, value: f64) -> Result<NodeId> {
        self.push(value, Op::Leaf)
    }

    /// Stores a list of operand positions for a vector node.
    pub fn push_operands(&mut self, indices: &[usize]) -> Result<Span> {
        self.operands.alloc_slice(indices)
    }

    /// Stores a list of constants (or precomputed partials) for a vector node.
    pub fn push_constants(&mut self, values: &[f64]) -> Result<Span> {
        self.constants.alloc_slice(values)
    }

    /// Checks that `id` refers to a node that is still live on this tape and
    /// returns its registry position.
    pub fn resolve(&self, id: NodeId) -> Result<usize> {
        match self.registry.get(id.index).and_then(|s| self.nodes.get(*s)) {
            Some(node) if node.stamp == id.stamp => Ok(id.index),
            _ => Err(AdError::StaleHandle),
        }
    }

    pub fn node(&self, index: usize) -> Option<&Vari> {
        self.registry.get(index).and_then(|s| self.nodes.get(*s))
    }

    fn node_mut(&mut self, index: usize) -> Option<&mut Vari> {
        let slot = *self.registry.get(index)?;
        self.nodes.get_mut(slot)
    }

    pub fn value(&self, id: NodeId) -> Result<f64> {
        let index = self.resolve(id)?;
        Ok(value_at(&self.nodes, &self.registry, index))
    }

    pub fn adjoint(&self, id: NodeId) -> Result<f64> {
        let index = self.resolve(id)?;
        Ok(self.node(index).map_or(0.0, |n| n.adjoint))
    }

    /// Registry positions of the nodes `index` reads from.
    pub fn dependencies(&self, index: usize) -> Vec<usize> {
        let Some(node) = self.node(index) else {
            return Vec::new();
        };
        match node.op {
            Op::Leaf => Vec::new(),
            Op::Unary(_, a) | Op::BinaryVarConst(_, a, _) | Op::BinaryConstVar(_, _, a) => vec![a],
            Op::Binary(_, a, b) => vec![a, b],
            Op::Ternary(_, args) => args
                .iter()
                .filter_map(|o| match o {
                    Operand::Var(j) => Some(*j),
                    Operand::Const(_) => None,
                })
                .collect(),
            Op::Sum(span) | Op::DotProductConst(span, _) | Op::Precomputed(span, _) => {
                self.operands.slice(span).to_vec()
            }
            Op::DotProduct(a, b) => {
                let mut deps = self.operands.slice(a).to_vec();
                deps.extend_from_slice(self.operands.slice(b));
                deps
            }
        }
    }

    /* ---- backward pass ---- */

    /// Adds this node's local partials, scaled by its adjoint, into the
    /// adjoints of its operands.
    pub fn backward_step(&mut self, index: usize) {
        let Some(node) = self.node(index).copied() else {
            return;
        };
        let Tape {
            nodes,
            operands,
            constants,
            registry,
            ..
        } = self;
        let adj = node.adjoint;
        let v = node.value;
        match node.op {
            Op::Leaf => {}
            Op::Unary(op, a) => {
                let x = value_at(nodes, registry, a);
                accumulate(nodes, registry, a, adj * op.deriv(x, v));
            }
            Op::Binary(op, a, b) => {
                let l = value_at(nodes, registry, a);
                let r = value_at(nodes, registry, b);
                accumulate(nodes, registry, a, adj * op.d_left(l, r, v));
                accumulate(nodes, registry, b, adj * op.d_right(l, r, v));
            }
            Op::BinaryVarConst(op, a, c) => {
                let l = value_at(nodes, registry, a);
                accumulate(nodes, registry, a, adj * op.d_left(l, c, v));
            }
            Op::BinaryConstVar(op, c, b) => {
                let r = value_at(nodes, registry, b);
                accumulate(nodes, registry, b, adj * op.d_right(c, r, v));
            }
            Op::Ternary(op, args) => {
                let vals = args.map(|o| match o {
                    Operand::Var(j) => value_at(nodes, registry, j),
                    Operand::Const(c) => c,
                });
                let partials = op.partials(vals[0], vals[1], vals[2], v);
                for (arg, d) in args.iter().zip(partials) {
                    if let Operand::Var(j) = arg {
                        accumulate(nodes, registry, *j, adj * d);
                    }
                }
            }
            Op::Sum(span) => {
                for &j in operands.slice(span) {
                    accumulate(nodes, registry, j, adj);
                }
            }
            Op::DotProduct(a, b) => {
                for (&ja, &jb) in operands.slice(a).iter().zip(operands.slice(b)) {
                    let va = value_at(nodes, registry, ja);
                    let vb = value_at(nodes, registry, jb);
                    accumulate(nodes, registry, ja, adj * vb);
                    accumulate(nodes, registry, jb, adj * va);
                }
            }
            Op::DotProductConst(span, cs) | Op::Precomputed(span, cs) => {
                for (&j, &c) in operands.slice(span).iter().zip(constants.slice(cs)) {
                    accumulate(nodes, registry, j, adj * c);
                }
            }
        }
    }

    /// Seeds `root` with adjoint 1 and runs every node from `root` down to
    /// the start of the innermost nested scope (or the start of the tape) in
    /// descending registry order.
    pub fn backward(&mut self, root: NodeId) -> Result<()> {
        let root = self.resolve(root)?;
        let floor = self.nested.last().map_or(0, |m| m.registry_len);
        let lower = if root >= floor { floor } else { 0 };
        if let Some(node) = self.node_mut(root) {
            node.adjoint = 1.0;
        }
        for i in (lower..=root).rev() {
            self.backward_step(i);
        }
        log::trace!("tape: backward pass over {} nodes", root + 1 - lower);
        Ok(())
    }

    pub fn set_zero_all_adjoints(&mut self) {
        let Tape {
            nodes, registry, ..
        } = self;
        for slot in registry.iter() {
            if let Some(n) = nodes.get_mut(*slot) {
                n.adjoint = 0.0;
            }
        }
    }

    /// Zeroes the adjoints of the innermost nested scope only.
    fn zero_scope_adjoints(&mut self) {
        let floor = self.nested.last().map_or(0, |m| m.registry_len);
        let Tape {
            nodes, registry, ..
        } = self;
        for slot in registry.iter().skip(floor) {
            if let Some(n) = nodes.get_mut(*slot) {
                n.adjoint = 0.0;
            }
        }
    }

    /// One backward pass per dependent; row `i` holds the partials of
    /// `dependents[i]` with respect to each independent.
    pub fn jacobian(&mut self, dependents: &[NodeId], independents: &[NodeId]) -> Result<Vec<Vec<f64>>> {
        for id in dependents.iter().chain(independents) {
            self.resolve(*id)?;
        }
        let mut rows = Vec::with_capacity(dependents.len());
        for (i, dep) in dependents.iter().enumerate() {
            if i > 0 {
                self.zero_scope_adjoints();
            }
            self.backward(*dep)?;
            let row = independents
                .iter()
                .map(|x| self.adjoint(*x))
                .collect::<Result<Vec<f64>>>()?;
            rows.push(row);
        }
        Ok(rows)
    }

    /* ---- memory ---- */

    /// Invalidates every node and rewinds all arenas to their first block.
    pub fn recover(&mut self) -> Result<()> {
        if !self.nested.is_empty() {
            return Err(AdError::NestedScopeActive);
        }
        self.registry.clear();
        self.nodes.recover();
        self.operands.recover();
        self.constants.recover();
        self.stamp = self.stamp.wrapping_add(1);
        Ok(())
    }

    /// Like [`Tape::recover`], but also returns all blocks except the first
    /// of each arena to the system.
    pub fn release(&mut self) -> Result<()> {
        if !self.nested.is_empty() {
            return Err(AdError::NestedScopeActive);
        }
        self.registry.clear();
        self.registry.shrink_to(self.config.registry_capacity);
        self.nodes.release();
        self.operands.release();
        self.constants.release();
        self.stamp = self.stamp.wrapping_add(1);
        Ok(())
    }

    pub fn start_nested(&mut self) {
        self.nested.push(NestedMark {
            registry_len: self.registry.len(),
            nodes: self.nodes.checkpoint(),
            operands: self.operands.checkpoint(),
            constants: self.constants.checkpoint(),
        });
        log::debug!("tape: nested scope #{} opened at node {}", self.nested.len(), self.registry.len());
    }

    /// Discards every node created since the innermost `start_nested`.
    pub fn recover_nested(&mut self) -> Result<()> {
        let mark = self.nested.pop().ok_or(AdError::NoNestedScope)?;
        self.registry.truncate(mark.registry_len);
        self.nodes.rewind(mark.nodes);
        self.operands.rewind(mark.operands);
        self.constants.rewind(mark.constants);
        self.stamp = self.stamp.wrapping_add(1);
        log::debug!("tape: nested scope #{} closed", self.nested.len() + 1);
        Ok(())
    }

    /// Closes scopes until fewer than `depth` remain open.
    pub(crate) fn recover_nested_to(&mut self, depth: usize) {
        while depth > 0 && self.nested.len() >= depth {
            if self.recover_nested().is_err() {
                break;
            }
        }
    }

    /* ---- diagnostics ---- */

    pub fn stack_dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "STACK, size={}", self.registry.len());
        for i in 0..self.registry.len() {
            if let Some(n) = self.node(i) {
                let _ = writeln!(out, "{}  {} : {}", i, n.value, n.adjoint);
            }
        }
        out
    }
}

/* ═══════════════════════  THREAD-LOCAL TAPE  ═══════════════════════ */

thread_local! {
    static TAPE: RefCell<Tape> = RefCell::new(Tape::default());
}

#[inline]
pub(crate) fn with_tape<R>(f: impl FnOnce(&mut Tape) -> R) -> R {
    TAPE.with(|t| f(&mut t.borrow_mut()))
}

/// Errors that cannot be returned through an operator: a stale operand or an
/// arena that cannot grow.
pub(crate) fn raise(err: AdError) -> ! {
    if let AdError::OutOfMemory { .. } = err {
        log::error!("tape: {}", err);
    }
    panic!("{}", err)
}

/// Replaces this thread's tape with an empty one built from `config`.
pub fn configure(config: TapeConfig) -> Result<()> {
    with_tape(|t| {
        if !t.is_empty() || t.nested_depth() > 0 {
            return Err(AdError::TapeInUse);
        }
        let stamp = t.stamp.wrapping_add(1);
        *t = Tape::new(config);
        t.stamp = stamp;
        log::debug!("tape: reconfigured with {:?}", config);
        Ok(())
    })
}

/// Invalidates every node on this thread's tape, keeping its memory for reuse.
pub fn recover_memory() -> Result<()> {
    with_tape(|t| t.recover())
}

/// Recovers and returns all but the first arena block to the system.
pub fn free_memory() -> Result<()> {
    with_tape(|t| t.release())
}

pub fn start_nested() {
    with_tape(|t| t.start_nested())
}

pub fn recover_memory_nested() -> Result<()> {
    with_tape(|t| t.recover_nested())
}

/// Backward pass rooted at `root`; adjoints stay readable until the next
/// recovery.
pub fn grad(root: NodeId) -> Result<()> {
    with_tape(|t| t.backward(root))
}

pub fn set_zero_all_adjoints() {
    with_tape(|t| t.set_zero_all_adjoints())
}

/// `J[i][k] = ∂dependents[i] / ∂independents[k]`. Does not recover memory.
pub fn jacobian(dependents: &[Var], independents: &[Var]) -> Result<Vec<Vec<f64>>> {
    let deps: Vec<NodeId> = dependents.iter().map(Var::id).collect();
    let indeps: Vec<NodeId> = independents.iter().map(Var::id).collect();
    with_tape(|t| t.jacobian(&deps, &indeps))
}

pub fn stack_len() -> usize {
    with_tape(|t| t.len())
}

pub fn nested_depth() -> usize {
    with_tape(|t| t.nested_depth())
}

pub fn stats() -> TapeStats {
    with_tape(|t| t.stats())
}

pub fn stack_dump() -> String {
    with_tape(|t| t.stack_dump())
}

pub fn log_stack() {
    for line in stack_dump().lines() {
        log::debug!("{}", line);
    }
}

/// Opens a nested scope that is recovered when the guard is dropped, also on
/// early return or unwinding.
#[must_use = "the nested scope is recovered as soon as the guard is dropped"]
pub struct NestedScope {
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl NestedScope {
    pub fn enter() -> Self {
        let depth = with_tape(|t| {
            t.start_nested();
            t.nested_depth()
        });
        Self {
            depth,
            _not_send: PhantomData,
        }
    }
}

impl Drop for NestedScope {
    fn drop(&mut self) {
        let depth = self.depth;
        let _ = TAPE.try_with(|t| {
            if let Ok(mut t) = t.try_borrow_mut() {
                t.recover_nested_to(depth);
            }
        });
    }
}

/// Runs `f` inside a nested scope. Handles created inside `f` are stale once
/// it returns, so `f` should hand back plain values.
pub fn nested<R>(f: impl FnOnce() -> R) -> R {
    let _scope = NestedScope::enter();
    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::ad::node::{BinaryOp, UnaryOp};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn tiny() -> Tape {
        Tape::new(TapeConfig::new().with_initial_block_bytes(256))
    }

    #[test]
    fn nodes_start_with_zero_adjoint() {
        let mut tape = tiny();
        let a = tape.push_leaf(2.0).unwrap();
        assert_eq!(tape.value(a).unwrap(), 2.0);
        assert_eq!(tape.adjoint(a).unwrap(), 0.0);
        assert_eq!(tape.len(), 1);
    }

    #[test]
    fn backward_applies_product_rule() {
        let mut tape = tiny();
        let a = tape.push_leaf(2.0).unwrap();
        let b = tape.push_leaf(3.0).unwrap();
        let c = tape.push(6.0, Op::Binary(BinaryOp::Mul, a.index, b.index)).unwrap();
        let d = tape.push(8.0, Op::Binary(BinaryOp::Add, c.index, a.index)).unwrap();
        tape.backward(d).unwrap();
        assert_eq!(tape.adjoint(a).unwrap(), 4.0);
        assert_eq!(tape.adjoint(b).unwrap(), 2.0);
        assert_eq!(tape.adjoint(d).unwrap(), 1.0);
    }

    #[test]
    fn backward_from_interior_node() {
        let mut tape = tiny();
        let a = tape.push_leaf(2.0).unwrap();
        let c = tape.push(4.0, Op::BinaryVarConst(BinaryOp::Mul, a.index, 2.0)).unwrap();
        let _later = tape.push(5.0, Op::Unary(UnaryOp::Exp, c.index)).unwrap();
        tape.backward(c).unwrap();
        assert_eq!(tape.adjoint(a).unwrap(), 2.0);
    }

    #[test]
    fn unreached_inputs_keep_zero_adjoint() {
        let mut tape = tiny();
        let a = tape.push_leaf(2.0).unwrap();
        let unrelated = tape.push_leaf(7.0).unwrap();
        let c = tape.push(-2.0, Op::Unary(UnaryOp::Neg, a.index)).unwrap();
        tape.backward(c).unwrap();
        assert_eq!(tape.adjoint(a).unwrap(), -1.0);
        assert_eq!(tape.adjoint(unrelated).unwrap(), 0.0);
    }

    #[test]
    fn vector_nodes_propagate_through_spans() {
        let mut tape = tiny();
        let xs: Vec<NodeId> = [1.0, 2.0, 3.0].iter().map(|v| tape.push_leaf(*v).unwrap()).collect();
        let idx: Vec<usize> = xs.iter().map(|x| x.index).collect();
        let span = tape.push_operands(&idx).unwrap();
        let cs = tape.push_constants(&[4.0, 5.0, 6.0]).unwrap();
        let dot = tape.push(32.0, Op::DotProductConst(span, cs)).unwrap();
        let span2 = tape.push_operands(&[idx[0], dot.index]).unwrap();
        let total = tape.push(33.0, Op::Sum(span2)).unwrap();
        tape.backward(total).unwrap();
        assert_eq!(tape.adjoint(xs[0]).unwrap(), 5.0);
        assert_eq!(tape.adjoint(xs[1]).unwrap(), 5.0);
        assert_eq!(tape.adjoint(xs[2]).unwrap(), 6.0);
    }

    #[test]
    fn recovery_invalidates_handles_and_reuses_blocks() {
        let mut tape = tiny();
        let mut last = tape.push_leaf(1.0).unwrap();
        for _ in 0..200 {
            last = tape.push(1.0, Op::Unary(UnaryOp::Identity, last.index)).unwrap();
        }
        let blocks = tape.stats().blocks;
        tape.recover().unwrap();
        assert!(tape.is_empty());
        assert_eq!(tape.value(last), Err(AdError::StaleHandle));
        let mut again = tape.push_leaf(1.0).unwrap();
        for _ in 0..200 {
            again = tape.push(1.0, Op::Unary(UnaryOp::Identity, again.index)).unwrap();
        }
        assert_eq!(tape.stats().blocks, blocks);
        assert_eq!(tape.adjoint(again).unwrap(), 0.0);
        assert_eq!(tape.value(last), Err(AdError::StaleHandle));
    }

    #[test]
    fn stamps_do_not_repeat_past_u32_range() {
        let mut tape = tiny();
        let old = tape.push_leaf(1.0).unwrap();
        tape.recover().unwrap();
        tape.stamp = old.stamp + (1u64 << 32);
        let new = tape.push_leaf(2.0).unwrap();
        assert_eq!(new.index, old.index);
        assert_eq!(tape.value(old), Err(AdError::StaleHandle));
        assert_eq!(tape.value(new).unwrap(), 2.0);
        tape.recover().unwrap();
        assert_eq!(tape.stamp, (1u64 << 32) + 1);
    }

    #[test]
    fn recovered_nodes_never_leak_adjoints() {
        let mut tape = tiny();
        let a = tape.push_leaf(3.0).unwrap();
        let b = tape.push(9.0, Op::Binary(BinaryOp::Mul, a.index, a.index)).unwrap();
        tape.backward(b).unwrap();
        assert_eq!(tape.adjoint(a).unwrap(), 6.0);
        tape.recover().unwrap();
        let x = tape.push_leaf(1.0).unwrap();
        let y = tape.push_leaf(1.0).unwrap();
        assert_eq!(tape.adjoint(x).unwrap(), 0.0);
        assert_eq!(tape.adjoint(y).unwrap(), 0.0);
    }

    #[test]
    fn release_keeps_tape_usable() {
        let mut tape = tiny();
        let mut last = tape.push_leaf(1.0).unwrap();
        for _ in 0..500 {
            last = tape.push(1.0, Op::Unary(UnaryOp::Identity, last.index)).unwrap();
        }
        assert!(tape.stats().blocks > 1);
        tape.release().unwrap();
        assert_eq!(tape.stats().blocks, 1);
        let a = tape.push_leaf(2.0).unwrap();
        let b = tape.push(4.0, Op::BinaryVarConst(BinaryOp::Pow, a.index, 2.0)).unwrap();
        tape.backward(b).unwrap();
        assert_eq!(tape.adjoint(a).unwrap(), 4.0);
    }

    #[test]
    fn nested_scope_rewinds_only_inner_nodes() {
        let mut tape = tiny();
        let outer = tape.push_leaf(1.5).unwrap();
        tape.start_nested();
        let inner = tape.push_leaf(2.5).unwrap();
        let prod = tape.push(5.0, Op::Binary(BinaryOp::Mul, inner.index, inner.index)).unwrap();
        tape.backward(prod).unwrap();
        assert_eq!(tape.adjoint(inner).unwrap(), 5.0);
        assert_eq!(tape.recover(), Err(AdError::NestedScopeActive));
        tape.recover_nested().unwrap();
        assert_eq!(tape.len(), 1);
        assert_eq!(tape.value(outer).unwrap(), 1.5);
        assert_eq!(tape.value(inner), Err(AdError::StaleHandle));
        let reused = tape.push_leaf(9.0).unwrap();
        assert_eq!(reused.index, inner.index);
        assert_eq!(tape.value(inner), Err(AdError::StaleHandle));
        assert_eq!(tape.recover_nested(), Err(AdError::NoNestedScope));
    }

    #[test]
    fn nested_backward_stops_at_scope_boundary() {
        let mut tape = tiny();
        let outer = tape.push_leaf(1.0).unwrap();
        let outer_sq = tape.push(1.0, Op::Binary(BinaryOp::Mul, outer.index, outer.index)).unwrap();
        tape.backward(outer_sq).unwrap();
        assert_eq!(tape.adjoint(outer).unwrap(), 2.0);
        tape.start_nested();
        let x = tape.push_leaf(3.0).unwrap();
        let y = tape.push(9.0, Op::Binary(BinaryOp::Mul, x.index, x.index)).unwrap();
        tape.backward(y).unwrap();
        assert_eq!(tape.adjoint(x).unwrap(), 6.0);
        assert_eq!(tape.adjoint(outer).unwrap(), 2.0);
        tape.recover_nested().unwrap();
    }

    #[test]
    fn jacobian_zeroes_adjoints_between_roots() {
        let mut tape = tiny();
        let a = tape.push_leaf(2.0).unwrap();
        let b = tape.push_leaf(5.0).unwrap();
        let f0 = tape.push(10.0, Op::Binary(BinaryOp::Mul, a.index, b.index)).unwrap();
        let f1 = tape.push(7.0, Op::Binary(BinaryOp::Add, a.index, b.index)).unwrap();
        let j = tape.jacobian(&[f0, f1], &[a, b]).unwrap();
        assert_eq!(j, vec![vec![5.0, 2.0], vec![1.0, 1.0]]);
    }

    #[test]
    fn stack_dump_lists_every_node() {
        let mut tape = tiny();
        let a = tape.push_leaf(2.0).unwrap();
        let b = tape.push(-2.0, Op::Unary(UnaryOp::Neg, a.index)).unwrap();
        tape.backward(b).unwrap();
        let dump = tape.stack_dump();
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines[0], "STACK, size=2");
        assert_eq!(lines[1], "0  2 : -1");
        assert_eq!(lines[2], "1  -2 : 1");
    }

    #[test]
    fn random_dags_are_registered_in_topological_order() {
        let mut rng = StdRng::seed_from_u64(7);
        let unary = [UnaryOp::Exp, UnaryOp::Sin, UnaryOp::Neg, UnaryOp::Tanh];
        let binary = [BinaryOp::Add, BinaryOp::Sub, BinaryOp::Mul, BinaryOp::Div];
        for _ in 0..20 {
            let mut tape = tiny();
            let mut ids: Vec<NodeId> = (0..3).map(|_| tape.push_leaf(rng.gen::<f64>()).unwrap()).collect();
            for _ in 0..200 {
                let a = ids[rng.gen_range(0..ids.len())];
                let b = ids[rng.gen_range(0..ids.len())];
                let va = tape.value(a).unwrap();
                let vb = tape.value(b).unwrap();
                let id = match rng.gen_range(0..4) {
                    0 => {
                        let op = unary[rng.gen_range(0..unary.len())];
                        tape.push(op.eval(va), Op::Unary(op, a.index)).unwrap()
                    }
                    1 => {
                        let op = binary[rng.gen_range(0..binary.len())];
                        tape.push(op.eval(va, vb), Op::Binary(op, a.index, b.index)).unwrap()
                    }
                    2 => {
                        let span = tape.push_operands(&[a.index, b.index]).unwrap();
                        tape.push(va + vb, Op::Sum(span)).unwrap()
                    }
                    _ => tape.push(va * 0.5, Op::BinaryVarConst(BinaryOp::Mul, a.index, 0.5)).unwrap(),
                };
                ids.push(id);
            }
            for i in 0..tape.len() {
                for dep in tape.dependencies(i) {
                    assert!(dep < i, "node {} depends on later node {}", i, dep);
                }
            }
        }
    }

    #[test]
    fn thread_tape_can_only_be_reconfigured_when_empty() {
        recover_memory().unwrap();
        configure(TapeConfig::new().with_initial_block_bytes(1024)).unwrap();
        let _x = Var::new(1.0);
        assert_eq!(configure(TapeConfig::default()), Err(AdError::TapeInUse));
        recover_memory().unwrap();
        configure(TapeConfig::default()).unwrap();
    }

    #[test]
    fn nested_guard_recovers_on_drop() {
        recover_memory().unwrap();
        let outer = Var::new(1.0);
        {
            let _scope = NestedScope::enter();
            let _inner = Var::new(2.0) * outer;
            assert_eq!(nested_depth(), 1);
            assert_eq!(stack_len(), 3);
        }
        assert_eq!(nested_depth(), 0);
        assert_eq!(stack_len(), 1);
        let sum = nested(|| {
            let a = Var::new(3.0);
            (a + a).value()
        });
        assert_eq!(sum, 6.0);
        assert_eq!(stack_len(), 1);
        recover_memory().unwrap();
    }
}
