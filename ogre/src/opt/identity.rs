//! Per-opcode no-op detection.
//!
//! [identity] answers "is this node provably the same value as one of the
//! nodes already in the graph?" and returns that node if so. It is cheap and
//! purely local: it looks only at the node, its inputs and their types. It
//! runs before the shape rewrites on every visit.
//!
//! Floating-point identities here are bit-exact: `x - 0.0`, `x + (-0.0)`,
//! `x * 1.0` and `x / 1.0` preserve every input bit pattern including NaNs
//! and signed zeros, while the tempting `x + 0.0` does not (`-0.0 + 0.0` is
//! `+0.0`) and is deliberately absent.

use super::bits;
use crate::{
    ir::{Graph, NodeIdx, Op},
    lattice::{mask_shift, max_for, min_for, zext},
};

pub(super) fn identity(g: &Graph, n: NodeIdx) -> Option<NodeIdx> {
    let ins = g.ins(n);
    match g.op(n) {
        Op::Add => con_zero_side(g, n),
        Op::Sub => {
            if g.as_int_con(ins[1]) == Some(0) {
                return Some(ins[0]);
            }
            // 0 - (0 - x) is x.
            if g.as_int_con(ins[0]) == Some(0)
                && g.op(ins[1]) == Op::Sub
                && g.as_int_con(g.ins(ins[1])[0]) == Some(0)
            {
                return Some(g.ins(ins[1])[1]);
            }
            None
        }
        Op::Mul => con_side(g, n, 1),
        Op::Div | Op::UDiv => {
            if g.as_int_con(ins[1]) == Some(1) {
                Some(ins[0])
            } else {
                None
            }
        }
        Op::And => {
            if ins[0] == ins[1] {
                return Some(ins[0]);
            }
            if g.as_int_con(ins[1]) == Some(-1) {
                return Some(ins[0]);
            }
            if g.as_int_con(ins[0]) == Some(-1) {
                return Some(ins[1]);
            }
            // A mask is redundant when every bit it clears is already zero.
            redundant_mask(g, n, ins[0], ins[1]).or_else(|| redundant_mask(g, n, ins[1], ins[0]))
        }
        Op::Or => {
            if ins[0] == ins[1] {
                return Some(ins[0]);
            }
            con_zero_side(g, n)
        }
        Op::Xor => con_zero_side(g, n),
        Op::Shl | Op::AShr | Op::LShr | Op::RotL | Op::RotR => {
            let t = g.int_ty(n)?;
            if let Some(s) = g.as_int_con(ins[1]) {
                if mask_shift(t.bitw, s) == 0 {
                    return Some(ins[0]);
                }
            }
            match g.op(n) {
                Op::AShr => shl_shr_round_trip(g, n, /* signed = */ true),
                Op::LShr => shl_shr_round_trip(g, n, /* signed = */ false),
                _ => None,
            }
        }
        Op::ReverseBytes => involution(g, n, Op::ReverseBytes),
        Op::FNeg => involution(g, n, Op::FNeg),
        Op::L2I => inverse(g, n, Op::I2L),
        Op::F2IBits => inverse(g, n, Op::I2FBits),
        Op::I2FBits => inverse(g, n, Op::F2IBits),
        Op::D2LBits => inverse(g, n, Op::L2DBits),
        Op::L2DBits => inverse(g, n, Op::D2LBits),
        Op::Abs => {
            // abs is idempotent, and a no-op on a provably non-negative int.
            if g.op(ins[0]) == Op::Abs {
                return Some(ins[0]);
            }
            if g.int_ty(ins[0]).map(|t| t.nonneg()).unwrap_or(false) {
                return Some(ins[0]);
            }
            None
        }
        Op::Min => {
            if ins[0] == ins[1] {
                return Some(ins[0]);
            }
            let (a, b) = (g.int_ty(ins[0])?, g.int_ty(ins[1])?);
            if a.hi <= b.lo {
                Some(ins[0])
            } else if b.hi <= a.lo {
                Some(ins[1])
            } else if b.as_con() == Some(max_for(a.bitw)) {
                Some(ins[0])
            } else {
                None
            }
        }
        Op::Max => {
            if ins[0] == ins[1] {
                return Some(ins[0]);
            }
            let (a, b) = (g.int_ty(ins[0])?, g.int_ty(ins[1])?);
            if a.lo >= b.hi {
                Some(ins[0])
            } else if b.lo >= a.hi {
                Some(ins[1])
            } else if b.as_con() == Some(min_for(a.bitw)) {
                Some(ins[0])
            } else {
                None
            }
        }
        Op::FAdd => {
            if is_float_con(g, ins[1], -0.0) {
                return Some(ins[0]);
            }
            if is_float_con(g, ins[0], -0.0) {
                return Some(ins[1]);
            }
            None
        }
        Op::FSub => {
            if is_float_con(g, ins[1], 0.0) {
                Some(ins[0])
            } else {
                None
            }
        }
        Op::FMul => {
            if is_float_con(g, ins[1], 1.0) {
                return Some(ins[0]);
            }
            if is_float_con(g, ins[0], 1.0) {
                return Some(ins[1]);
            }
            None
        }
        Op::FDiv => {
            if is_float_con(g, ins[1], 1.0) {
                Some(ins[0])
            } else {
                None
            }
        }
        Op::CMove => {
            if ins[1] == ins[2] {
                Some(ins[1])
            } else {
                None
            }
        }
        Op::Phi => {
            // A phi whose live inputs all agree (ignoring itself through the
            // backedge) is that value.
            let mut unique = None;
            for &v in &ins[1..] {
                if v == n {
                    continue;
                }
                match unique {
                    None => unique = Some(v),
                    Some(u) if u == v => (),
                    Some(_) => return None,
                }
            }
            unique
        }
        Op::Region => {
            // A one-entry merge is no merge, but its phis must fold first.
            if ins.len() == 1 && !g.outs(n).iter().any(|&u| g.op(u) == Op::Phi) {
                Some(ins[0])
            } else {
                None
            }
        }
        Op::IfTrue => {
            let iff = ins[0];
            match g.as_int_con(g.ins(iff)[1]) {
                Some(c) if c != 0 => Some(g.ins(iff)[0]),
                _ => None,
            }
        }
        Op::IfFalse => {
            let iff = ins[0];
            match g.as_int_con(g.ins(iff)[1]) {
                Some(0) => Some(g.ins(iff)[0]),
                _ => None,
            }
        }
        Op::ZeroTrap => {
            // The trap guards a division; once the divisor provably cannot
            // be zero (by range, or by a bit known to be set) the guard is a
            // plain pass-through of its control.
            let nonzero = g.int_ty(ins[1]).map(|t| t.nonzero()).unwrap_or(false)
                || bits::known_bits(g, ins[1]).ones != 0;
            if nonzero {
                Some(ins[0])
            } else {
                None
            }
        }
        _ => None,
    }
}

/// For a commutative op with a zero identity element: `x op 0` is `x`.
fn con_zero_side(g: &Graph, n: NodeIdx) -> Option<NodeIdx> {
    con_side(g, n, 0)
}

fn con_side(g: &Graph, n: NodeIdx, unit: i64) -> Option<NodeIdx> {
    let ins = g.ins(n);
    if g.as_int_con(ins[1]) == Some(unit) {
        return Some(ins[0]);
    }
    if g.as_int_con(ins[0]) == Some(unit) {
        return Some(ins[1]);
    }
    None
}

/// `f(f(x))` is `x`.
fn involution(g: &Graph, n: NodeIdx, op: Op) -> Option<NodeIdx> {
    let inner = g.ins(n)[0];
    if g.op(inner) == op {
        Some(g.ins(inner)[0])
    } else {
        None
    }
}

/// `f(x)` where `x = f_inverse(y)` is `y`, for exact (bit-reinterpreting or
/// width-restoring) conversion pairs.
fn inverse(g: &Graph, n: NodeIdx, inv: Op) -> Option<NodeIdx> {
    let inner = g.ins(n)[0];
    if g.op(inner) == inv {
        Some(g.ins(inner)[0])
    } else {
        None
    }
}

/// Is `And(x, mask)` a no-op because every bit the constant mask clears is
/// already known zero in `x`?
fn redundant_mask(g: &Graph, n: NodeIdx, x: NodeIdx, mask: NodeIdx) -> Option<NodeIdx> {
    let t = g.int_ty(n)?;
    let m = g.as_int_con(mask)?;
    let kb = bits::known_bits(g, x);
    let cleared = !zext(t.bitw, m) & if t.bitw == 64 { u64::MAX } else { (1u64 << t.bitw) - 1 };
    if kb.covers_zeros(cleared) {
        Some(x)
    } else {
        None
    }
}

/// `(x << k) >> k` (or `>>>`) is `x` exactly when every value `x` can take
/// survives the round trip through the narrowed width.
fn shl_shr_round_trip(g: &Graph, n: NodeIdx, signed: bool) -> Option<NodeIdx> {
    let ins = g.ins(n);
    let shl = ins[0];
    if g.op(shl) != Op::Shl {
        return None;
    }
    let t = g.int_ty(n)?;
    let k = mask_shift(t.bitw, g.as_int_con(ins[1])?);
    let k2 = mask_shift(t.bitw, g.as_int_con(g.ins(shl)[1])?);
    if k == 0 || k != k2 {
        return None;
    }
    let x = g.ins(shl)[0];
    let xt = g.int_ty(x)?;
    let narrow = t.bitw - k;
    if signed {
        if xt.fits_signed(narrow) {
            return Some(x);
        }
    } else if xt.nonneg() && (xt.hi as u64) < (1u64 << narrow.min(63)) {
        return Some(x);
    }
    None
}

fn is_float_con(g: &Graph, n: NodeIdx, v: f64) -> bool {
    match g.ty(n).float() {
        Some(t) => match (t.as_f32(), t.as_f64()) {
            (Some(c), _) => c.to_bits() == (v as f32).to_bits(),
            (_, Some(c)) => c.to_bits() == v.to_bits(),
            _ => false,
        },
        None => false,
    }
}
