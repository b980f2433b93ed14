//! Structural well-formedness checks.
//!
//! These are lightweight invariant checks, run after each phase in debug and
//! test builds: they catch edge-list corruption and gross shape violations,
//! not semantic bugs.

use super::{Graph, NodeIdx, Op};
use crate::lattice::Type;

pub(super) fn assert_well_formed(g: &Graph) {
    for n in g.iter_live() {
        let op = g.op(n);
        // Arity.
        if let Some(a) = op.arity() {
            assert_eq!(
                g.ins(n).len(),
                a,
                "%{}: {:?} has {} inputs, expected {a}",
                usize::from(n),
                op,
                g.ins(n).len()
            );
        }
        // Edge symmetry and liveness of inputs.
        for &i in g.ins(n) {
            assert!(
                !matches!(g.op(i), Op::Dead),
                "%{}: input %{} is dead",
                usize::from(n),
                usize::from(i)
            );
            let occurs_in = g.ins(n).iter().filter(|&&x| x == i).count();
            let occurs_out = g.outs(i).iter().filter(|&&x| x == n).count();
            assert_eq!(
                occurs_in,
                occurs_out,
                "%{} <-> %{}: edge lists out of sync",
                usize::from(n),
                usize::from(i)
            );
        }
        for &u in g.outs(n) {
            assert!(
                !matches!(g.op(u), Op::Dead),
                "%{}: user %{} is dead",
                usize::from(n),
                usize::from(u)
            );
        }
        check_ty_kind(g, n);
        // A phi must have one value per region input.
        if matches!(op, Op::Phi) {
            let region = g.ins(n)[0];
            assert!(
                matches!(
                    g.op(region),
                    Op::Region | Op::Loop | Op::OuterStripMinedLoop
                ),
                "%{}: phi over a non-region",
                usize::from(n)
            );
            assert_eq!(
                g.ins(n).len(),
                g.ins(region).len() + 1,
                "%{}: phi arity does not match its region",
                usize::from(n)
            );
        }
        if matches!(op, Op::IfTrue | Op::IfFalse) {
            assert!(
                matches!(g.op(g.ins(n)[0]), Op::If | Op::RangeCheck),
                "%{}: projection of a non-if",
                usize::from(n)
            );
        }
    }
}

fn check_ty_kind(g: &Graph, n: NodeIdx) {
    let ty = g.ty(n);
    let ctrl_ok = matches!(ty, Type::Ctrl | Type::Top);
    match g.op(n) {
        Op::Start
        | Op::If
        | Op::RangeCheck
        | Op::IfTrue
        | Op::IfFalse
        | Op::Region
        | Op::Loop
        | Op::OuterStripMinedLoop
        | Op::Safepoint
        | Op::ZeroTrap => {
            assert!(ctrl_ok, "%{}: control node with type {ty}", usize::from(n))
        }
        Op::InitMem | Op::Store { .. } | Op::MemBar(_) | Op::Call | Op::VecStore { .. } => {
            assert!(
                matches!(ty, Type::Mem | Type::Top),
                "%{}: memory node with type {ty}",
                usize::from(n)
            )
        }
        Op::Alloc => assert!(
            matches!(ty, Type::Ptr(_) | Type::Top),
            "%{}: alloc with type {ty}",
            usize::from(n)
        ),
        Op::Cmp(_) | Op::FCmp(_) => {
            if let Type::Int(t) = ty {
                assert!(
                    t.lo >= 0 && t.hi <= 1,
                    "%{}: comparison out of [0, 1]",
                    usize::from(n)
                );
            }
        }
        _ => (),
    }
}
