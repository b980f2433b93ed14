//! Loop and range analysis.
//!
//! The analysis recognises counted loops in their canonical bottom-tested
//! form: a [crate::ir::Op::Loop] head, one integer induction phi updated by
//! a constant stride, and a single exit test against a loop-invariant limit
//! at the bottom of the body. On those it performs:
//!
//!  - degenerate unrolling: a loop whose body provably runs exactly once is
//!    replaced by its straight-line body (the engine then folds the loop
//!    control away entirely);
//!  - range-check elimination: an in-loop `RangeCheck` of the induction
//!    variable against an invariant bound is replaced by two predicates
//!    hoisted in front of the loop, one for the first value and one for the
//!    last, after which the in-loop check is constant-true;
//!  - safepoint policy: a loop whose static trip count is at most
//!    [SHORT_LOOP_TRIP_MAX] drops its backedge safepoints, since it provably
//!    terminates promptly without them. Everything else keeps a safepoint
//!    reachable on every backedge path;
//!  - strip mining: a long or unbounded loop that carries a safepoint is
//!    wrapped in an [crate::ir::Op::OuterStripMinedLoop] shell carrying the
//!    safepoint on the outer backedge, leaving the inner backedge
//!    safepoint-free.

use crate::{
    compile::CompileError,
    config::OptConfig,
    ir::{Graph, NodeIdx, Op, Pred},
    lattice::{con_add, TyInt, Type},
};
use std::collections::HashSet;

/// The longest static trip count for which a loop may run without a
/// safepoint on its backedge. A fixed policy constant, not a heuristic.
pub const SHORT_LOOP_TRIP_MAX: u64 = 1024;

/// A recognised counted loop.
pub(crate) struct CountedLoop {
    /// The loop head.
    pub(crate) head: NodeIdx,
    /// The induction phi.
    pub(crate) iv: NodeIdx,
    /// `iv + stride`, the backedge value of the induction phi.
    pub(crate) incr: NodeIdx,
    /// The induction variable's entry value.
    pub(crate) init: NodeIdx,
    pub(crate) stride: i64,
    /// The loop-invariant bound the exit test compares against.
    pub(crate) limit: NodeIdx,
    /// The exit test's comparison node.
    pub(crate) cmp: NodeIdx,
    /// The comparison predicate, normalised so the induction value is its
    /// left operand.
    pub(crate) pred: Pred,
    /// Does the exit test look at `incr` (rather than `iv`)?
    pub(crate) cmp_on_incr: bool,
    /// The projection staying in the loop, and whether that is the true arm.
    pub(crate) body_proj: NodeIdx,
    pub(crate) continue_on_true: bool,
    /// The projection leaving the loop.
    pub(crate) exit_proj: NodeIdx,
    /// Safepoints on the backedge path, in backedge-to-test order.
    pub(crate) backedge_safepoints: Vec<NodeIdx>,
}

/// Find every counted loop in the graph.
pub(crate) fn find_counted(g: &Graph) -> Vec<CountedLoop> {
    g.iter_live()
        .filter(|&n| g.op(n) == Op::Loop)
        .filter_map(|n| analyse(g, n))
        .collect()
}

fn analyse(g: &Graph, head: NodeIdx) -> Option<CountedLoop> {
    let backedge = g.ins(head)[1];
    // Walk up from the backedge to the exit test, collecting safepoints.
    let mut safepoints = Vec::new();
    let mut cur = backedge;
    let body_proj = loop {
        match g.op(cur) {
            Op::Safepoint => {
                safepoints.push(cur);
                cur = g.ins(cur)[0];
            }
            Op::IfTrue | Op::IfFalse => break cur,
            _ => return None,
        }
    };
    let exit_if = g.ins(body_proj)[0];
    if g.op(exit_if) != Op::If {
        return None;
    }
    let continue_on_true = g.op(body_proj) == Op::IfTrue;
    let exit_proj = g.out_with_op(
        exit_if,
        if continue_on_true {
            Op::IfFalse
        } else {
            Op::IfTrue
        },
    )?;
    // The test's control must reach back to the head within the body,
    // stepping over in-body guards.
    let mut c = g.ins(exit_if)[0];
    let mut fuel = 16u32;
    while c != head {
        if fuel == 0 {
            return None;
        }
        fuel -= 1;
        match g.op(c) {
            Op::Safepoint => {
                safepoints.push(c);
                c = g.ins(c)[0];
            }
            // A reconverging diamond inside the body is stepped through on
            // its first entry; all paths lead back to the head.
            Op::IfTrue | Op::IfFalse | Op::If | Op::RangeCheck | Op::ZeroTrap | Op::Region => {
                c = g.ins(c)[0];
            }
            _ => return None,
        }
    }
    let cond = g.ins(exit_if)[1];
    let Op::Cmp(pred) = g.op(cond) else {
        return None;
    };
    let (cl, cr) = (g.ins(cond)[0], g.ins(cond)[1]);
    // Find the induction phi the test is about.
    for &phi in g.outs(head) {
        if g.op(phi) != Op::Phi || g.ins(phi)[0] != head || g.ins(phi).len() != 3 {
            continue;
        }
        if g.int_ty(phi).is_none() {
            continue;
        }
        let incr = g.ins(phi)[2];
        if g.op(incr) != Op::Add || g.ins(incr)[0] != phi {
            continue;
        }
        let Some(stride) = g.as_int_con(g.ins(incr)[1]) else {
            continue;
        };
        let (iv_operand, limit, pred) = if cl == phi || cl == incr {
            (cl, cr, pred)
        } else if cr == phi || cr == incr {
            (cr, cl, pred.swap())
        } else {
            continue;
        };
        if depends_on(g, limit, phi) {
            continue;
        }
        return Some(CountedLoop {
            head,
            iv: phi,
            incr,
            init: g.ins(phi)[1],
            stride,
            limit,
            cmp: cond,
            pred,
            cmp_on_incr: iv_operand == incr,
            body_proj,
            continue_on_true,
            exit_proj,
            backedge_safepoints: safepoints,
        });
    }
    None
}

/// Does the value of `from` depend (through data edges) on `target`?
/// Conservatively answers yes when the walk becomes large.
fn depends_on(g: &Graph, from: NodeIdx, target: NodeIdx) -> bool {
    if from == target {
        return true;
    }
    let mut stack = vec![from];
    let mut seen = HashSet::new();
    while let Some(x) = stack.pop() {
        if x == target {
            return true;
        }
        if !seen.insert(x) {
            continue;
        }
        if seen.len() > 64 {
            return true;
        }
        stack.extend(g.ins(x).iter().copied());
    }
    false
}

/// The number of body executions, when statically known and no larger than
/// [SHORT_LOOP_TRIP_MAX]. The loop is bottom-tested, so the body always runs
/// at least once; the induction value is stepped exactly as the machine
/// would, wraparound included.
fn trip_count(g: &Graph, lp: &CountedLoop) -> Option<u64> {
    let init = g.as_int_con(lp.init)?;
    let limit = g.as_int_con(lp.limit)?;
    let w = g.int_ty(lp.iv)?.bitw;
    let mut iv = init;
    let mut trips = 0u64;
    loop {
        trips += 1;
        if trips > SHORT_LOOP_TRIP_MAX {
            return None;
        }
        let next = con_add(w, iv, lp.stride);
        let tested = if lp.cmp_on_incr { next } else { iv };
        if lp.pred.eval_int(w, tested, limit) != lp.continue_on_true {
            return Some(trips);
        }
        iv = next;
    }
}

/// Run loop optimisations over every counted loop. The engine is expected
/// to run afterwards to fold what this exposes.
pub fn run(g: &mut Graph, config: &OptConfig) -> Result<(), CompileError> {
    for lp in find_counted(g) {
        // An earlier loop's transformation may have restructured us away.
        if g.op(lp.head) != Op::Loop {
            continue;
        }
        let trips = trip_count(g, &lp);
        if trips == Some(1) {
            unroll_degenerate(g, &lp);
            continue;
        }
        if config.range_check_elim {
            eliminate_range_checks(g, &lp)?;
        }
        match trips {
            Some(_) => {
                // Provably short: the backedge needs no safepoint.
                for &sp in &lp.backedge_safepoints {
                    let prev = g.ins(sp)[0];
                    g.subsume(sp, prev);
                }
            }
            None => {
                if config.strip_mine && !lp.backedge_safepoints.is_empty() {
                    strip_mine(g, &lp)?;
                }
            }
        }
    }
    Ok(())
}

/// A single-trip loop is its body: every phi of the head only ever holds
/// its entry value inside the body, so rewiring the phis to those values
/// makes the exit test constant and the engine unravels the loop control.
fn unroll_degenerate(g: &mut Graph, lp: &CountedLoop) {
    let phis = g
        .outs(lp.head)
        .iter()
        .copied()
        .filter(|&u| g.op(u) == Op::Phi && g.ins(u)[0] == lp.head)
        .collect::<Vec<_>>();
    for phi in phis {
        let entry_val = g.ins(phi)[1];
        g.subsume(phi, entry_val);
    }
}

/// Hoist an in-loop range check of the induction variable against an
/// invariant bound into two predicates ahead of the loop: one covering the
/// first induction value, one covering the last. The in-loop check then
/// folds to constant-true. Only the canonical upward-counting form is
/// handled.
fn eliminate_range_checks(g: &mut Graph, lp: &CountedLoop) -> Result<(), CompileError> {
    if lp.stride != 1 || lp.pred != Pred::Slt || !lp.continue_on_true {
        return Ok(());
    }
    let checks = g
        .iter_live()
        .filter(|&rc| {
            g.op(rc) == Op::RangeCheck
                && in_loop_body(g, rc, lp)
                && is_iv_bound_check(g, rc, lp)
        })
        .collect::<Vec<_>>();
    for rc in checks {
        let bound = g.ins(g.ins(rc)[1])[1];
        let entry = g.ins(lp.head)[0];
        let bool_ty = Type::Int(TyInt::new(32, 0, 1));
        let c1 = g.push(Op::Cmp(Pred::Ult), &[lp.init, bound], bool_ty)?;
        let rc1 = g.push(Op::RangeCheck, &[entry, c1], Type::Ctrl)?;
        let p1 = g.push(Op::IfTrue, &[rc1], Type::Ctrl)?;
        let c2 = g.push(Op::Cmp(Pred::Ule), &[lp.limit, bound], bool_ty)?;
        let rc2 = g.push(Op::RangeCheck, &[p1, c2], Type::Ctrl)?;
        let p2 = g.push(Op::IfTrue, &[rc2], Type::Ctrl)?;
        g.set_in(lp.head, 0, p2);
        // The predicates cover every induction value: the in-loop check is
        // now always true.
        let one = g.con_int(32, 1)?;
        g.set_in(rc, 1, one);
    }
    Ok(())
}

/// Is the control of `rc` inside the body of `lp`?
fn in_loop_body(g: &Graph, rc: NodeIdx, lp: &CountedLoop) -> bool {
    let mut c = g.ins(rc)[0];
    let mut fuel = 16u32;
    loop {
        if c == lp.head {
            return true;
        }
        if fuel == 0 {
            return false;
        }
        fuel -= 1;
        match g.op(c) {
            Op::Safepoint | Op::IfTrue | Op::IfFalse | Op::If | Op::RangeCheck
            | Op::ZeroTrap | Op::Region => c = g.ins(c)[0],
            _ => return false,
        }
    }
}

/// Is `rc`'s condition `iv <u bound` with a loop-invariant bound?
fn is_iv_bound_check(g: &Graph, rc: NodeIdx, lp: &CountedLoop) -> bool {
    let cond = g.ins(rc)[1];
    if g.op(cond) != Op::Cmp(Pred::Ult) {
        return false;
    }
    g.ins(cond)[0] == lp.iv && !depends_on(g, g.ins(cond)[1], lp.iv)
}

/// Wrap the loop in an outer strip-mined shell: the inner backedge loses
/// its safepoints, and the outer loop carries one on its backedge, which is
/// guarded by the same exit condition. The shell is a placeholder for the
/// downstream expansion that picks the actual strip length; until then it
/// never iterates, so the program's behaviour is unchanged while the
/// safepoint stays reachable on every backedge path.
fn strip_mine(g: &mut Graph, lp: &CountedLoop) -> Result<(), CompileError> {
    for &sp in &lp.backedge_safepoints {
        let prev = g.ins(sp)[0];
        g.subsume(sp, prev);
    }
    let entry = g.ins(lp.head)[0];
    let oif = g.push(Op::If, &[lp.exit_proj, lp.cmp], Type::Ctrl)?;
    let (cont_op, exit_op) = if lp.continue_on_true {
        (Op::IfTrue, Op::IfFalse)
    } else {
        (Op::IfFalse, Op::IfTrue)
    };
    let ot = g.push(cont_op, &[oif], Type::Ctrl)?;
    let sp = g.push(Op::Safepoint, &[ot], Type::Ctrl)?;
    let outer = g.push(Op::OuterStripMinedLoop, &[entry, sp], Type::Ctrl)?;
    g.set_in(lp.head, 0, outer);
    let of = g.push(exit_op, &[oif], Type::Ctrl)?;
    for u in g.outs(lp.exit_proj).to_vec() {
        if u == oif {
            continue;
        }
        let slots = g
            .ins(u)
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == lp.exit_proj)
            .map(|(i, _)| i)
            .collect::<Vec<_>>();
        for s in slots {
            g.set_in(u, s, of);
        }
    }
    Ok(())
}
