//! The worklist-driven rewrite engine (iterative GVN).
//!
//! Each visit of a node runs, in order:
//!
//!  1. `identity`: is the node provably one of the nodes we already have?
//!  2. `value`: recompute the node's lattice type from its inputs. If the
//!     type collapses to a singleton, the node becomes a constant.
//!  3. `ideal`: shape rewrites, producing a cheaper or more canonical
//!     subgraph.
//!  4. GVN: hash-cons the node against structurally identical ones.
//!
//! Whenever any step changes a node, the node's users go back on the
//! worklist, so every consequence is eventually propagated; the loop ends
//! when the worklist is empty, which is the fixpoint. The worklist is a
//! FIFO with a membership bitmap: a node is queued at most once no matter
//! how many times it is re-triggered, and processing is iterative, never
//! recursive, so deep graphs cannot overflow the stack.
//!
//! The final graph does not depend on the order nodes are taken off the
//! worklist: every rule rewrites toward a canonical form regardless of what
//! has or has not been visited yet. That confluence is load-bearing (and
//! tested): it is what makes the fixpoint well-defined.

mod bits;
mod ideal_arith;
mod ideal_bits;
mod ideal_float;
mod identity;
mod memory;
mod value;

pub(crate) use memory::forwarded_value;

use crate::{
    compile::CompileError,
    config::OptConfig,
    ir::{Graph, NodeIdx, Op},
    lattice::Type,
};
use index_vec::IndexVec;
use smallvec::SmallVec;
use std::{
    collections::{HashMap, VecDeque},
    fmt,
};

/// What one engine run did, for logging.
#[derive(Debug, Default)]
pub struct Stats {
    visits: usize,
    identities: usize,
    retypes: usize,
    folds: usize,
    ideals: usize,
    cse: usize,
}

impl Stats {
    /// How many graph changes this run made in total.
    fn progress(&self) -> usize {
        self.identities + self.retypes + self.folds + self.ideals + self.cse
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} visits, {} identity folds, {} retypes, {} constant folds, {} shape rewrites, {} cse merges",
            self.visits, self.identities, self.retypes, self.folds, self.ideals, self.cse
        )
    }
}

/// A FIFO of node indices with at-most-once membership.
struct Worklist {
    queue: VecDeque<NodeIdx>,
    on: IndexVec<NodeIdx, bool>,
}

impl Worklist {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            on: IndexVec::new(),
        }
    }

    fn push(&mut self, n: NodeIdx) {
        while self.on.len() <= usize::from(n) {
            self.on.push(false);
        }
        if !self.on[n] {
            self.on[n] = true;
            self.queue.push_back(n);
        }
    }

    fn pop(&mut self) -> Option<NodeIdx> {
        let n = self.queue.pop_front()?;
        self.on[n] = false;
        Some(n)
    }
}

/// The GVN identity of a node: its operation and inputs, plus the exact
/// type for constants (which have no inputs to distinguish them).
#[derive(PartialEq, Eq, Hash)]
struct GvnKey {
    op: Op,
    ins: SmallVec<[NodeIdx; 2]>,
    con: Option<Type>,
}

fn gvn_key(g: &Graph, n: NodeIdx) -> GvnKey {
    let op = g.op(n);
    GvnKey {
        op,
        ins: SmallVec::from_slice(g.ins(n)),
        con: if matches!(op, Op::Con) {
            Some(g.ty(n))
        } else {
            None
        },
    }
}

/// Run the engine to a fixpoint over the whole graph.
pub fn run(g: &mut Graph, config: &OptConfig) -> Result<Stats, CompileError> {
    let seed = g.iter_live().collect::<Vec<_>>();
    run_seeded(g, config, seed)
}

/// Run the engine seeded with an explicit node order. The final graph is
/// the same for any seed order covering the live nodes; only the statistics
/// may differ.
pub(crate) fn run_seeded(
    g: &mut Graph,
    config: &OptConfig,
    seed: Vec<NodeIdx>,
) -> Result<Stats, CompileError> {
    let mut wl = Worklist::new();
    for n in seed {
        wl.push(n);
    }
    let mut gvn: HashMap<GvnKey, NodeIdx> = HashMap::new();
    let mut stats = Stats::default();
    while let Some(n) = wl.pop() {
        if matches!(g.op(n), Op::Dead) {
            continue;
        }
        stats.visits += 1;
        // A node nobody observes is dead; reclaiming it may free its inputs.
        if !g.is_root(n) && g.outs(n).is_empty() {
            g.kill(n);
            continue;
        }
        if let Some(m) = identity::identity(g, n) {
            if m != n {
                stats.identities += 1;
                subsume_and_requeue(g, &mut wl, n, m);
                continue;
            }
        }
        let old = g.ty(n);
        let new = value::value(g, n);
        if new != old && new.subsumes(&old) {
            g.set_ty(n, new);
            stats.retypes += 1;
            for u in g.outs(n).to_vec() {
                wl.push(u);
            }
            if new.is_con() && folds_to_con(g.op(n)) {
                stats.folds += 1;
                let c = g.push(Op::Con, &[], new)?;
                subsume_and_requeue(g, &mut wl, n, c);
                continue;
            }
        }
        // Canonical operand order: a lone constant sits on the right, so
        // structurally equal expressions look equal to GVN.
        if g.op(n).is_commutative() {
            let (a, b) = (g.ins(n)[0], g.ins(n)[1]);
            if g.op(a) == Op::Con && g.op(b) != Op::Con {
                g.swap_ins(n, 0, 1);
            }
        }
        if let Some(m) = ideal(g, config, n)? {
            stats.ideals += 1;
            if m == n {
                // Changed in place; revisit it and everyone watching it.
                for u in g.outs(n).to_vec() {
                    wl.push(u);
                }
                wl.push(n);
            } else {
                subsume_and_requeue(g, &mut wl, n, m);
            }
            continue;
        }
        if g.op(n).is_gvn_able() {
            let key = gvn_key(g, n);
            match gvn.get(&key) {
                Some(&m)
                    if m != n && !matches!(g.op(m), Op::Dead) && gvn_key(g, m) == key =>
                {
                    stats.cse += 1;
                    subsume_and_requeue(g, &mut wl, n, m);
                }
                _ => {
                    gvn.insert(key, n);
                }
            }
        }
    }
    Ok(stats)
}

/// Replace `n` with `m` and requeue everything that can now make progress.
fn subsume_and_requeue(g: &mut Graph, wl: &mut Worklist, n: NodeIdx, m: NodeIdx) {
    let users = g.outs(n).to_vec();
    g.subsume(n, m);
    wl.push(m);
    for u in users {
        wl.push(u);
    }
}

/// Is a singleton-typed node of this op replaceable by a constant? Pure
/// data ops and phis are; memory, control and loads are not (their types do
/// not carry their effects).
fn folds_to_con(op: Op) -> bool {
    (op.is_gvn_able() || matches!(op, Op::Phi)) && !matches!(op, Op::Con)
}

fn ideal(g: &mut Graph, config: &OptConfig, n: NodeIdx) -> Result<Option<NodeIdx>, CompileError> {
    match g.op(n) {
        Op::Add
        | Op::Sub
        | Op::Mul
        | Op::Div
        | Op::Rem
        | Op::UDiv
        | Op::URem
        | Op::Min
        | Op::Max
        | Op::CMove => ideal_arith::ideal(g, config, n),
        Op::And | Op::Or | Op::Xor | Op::Shl | Op::AShr | Op::LShr | Op::RotL | Op::RotR => {
            ideal_bits::ideal(g, config, n)
        }
        Op::Abs | Op::FDiv => ideal_float::ideal(g, config, n),
        Op::Load { .. } | Op::Store { .. } => memory::ideal(g, config, n),
        Op::Region | Op::Loop | Op::OuterStripMinedLoop => ideal_region(g, n),
        _ => Ok(None),
    }
}

/// Drop unreachable entries from a control merge, keeping its phis in step.
/// A loop whose backedge died is a plain region; a region left with one
/// live entry folds away via `identity` once its phis have collapsed.
fn ideal_region(g: &mut Graph, n: NodeIdx) -> Result<Option<NodeIdx>, CompileError> {
    let dead = g
        .ins(n)
        .iter()
        .enumerate()
        .filter(|(_, &c)| g.ty(c) == Type::Top)
        .map(|(i, _)| i)
        .collect::<Vec<_>>();
    if dead.is_empty() || dead.len() == g.ins(n).len() {
        return Ok(None);
    }
    let phis = g
        .outs(n)
        .iter()
        .copied()
        .filter(|&u| g.op(u) == Op::Phi && g.ins(u)[0] == n)
        .collect::<Vec<_>>();
    for &i in dead.iter().rev() {
        for &phi in &phis {
            g.remove_in(phi, i + 1);
        }
        g.remove_in(n, i);
    }
    if matches!(g.op(n), Op::Loop | Op::OuterStripMinedLoop) && g.ins(n).len() == 1 {
        g.set_op(n, Op::Region);
    }
    Ok(Some(n))
}
