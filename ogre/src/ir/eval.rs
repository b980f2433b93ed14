//! A reference evaluator for data graphs, for use in testing only.
//!
//! This is the differential-testing oracle: the optimized and unoptimized
//! renditions of a computation must evaluate bit-identically on every probed
//! input. Floats are compared as raw bit patterns, so a rewrite that flips
//! the sign of a zero or launders a NaN payload fails the comparison.

use super::{Graph, NodeIdx, Op};
use crate::lattice::{self, Type};
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Val {
    /// An integer in canonical sign-extended form.
    I(i64),
    /// An f32, as raw bits.
    F32(u32),
    /// An f64, as raw bits.
    F64(u64),
}

impl Val {
    pub(crate) fn f32(v: f32) -> Self {
        Val::F32(v.to_bits())
    }

    pub(crate) fn f64(v: f64) -> Self {
        Val::F64(v.to_bits())
    }

    fn as_i(&self) -> i64 {
        match self {
            Val::I(v) => *v,
            _ => panic!("expected an integer"),
        }
    }

    fn as_f32(&self) -> f32 {
        match self {
            Val::F32(b) => f32::from_bits(*b),
            _ => panic!("expected an f32"),
        }
    }

    fn as_f64(&self) -> f64 {
        match self {
            Val::F64(b) => f64::from_bits(*b),
            _ => panic!("expected an f64"),
        }
    }
}

/// Evaluate the data node `n` with the given parameter values.
///
/// # Panics
///
/// If the evaluation reaches a control, memory or vector node, or divides by
/// zero.
pub(crate) fn eval(g: &Graph, n: NodeIdx, params: &[Val]) -> Val {
    let mut memo = HashMap::new();
    eval_memo(g, n, params, &mut memo)
}

fn eval_memo(g: &Graph, n: NodeIdx, params: &[Val], memo: &mut HashMap<NodeIdx, Val>) -> Val {
    if let Some(v) = memo.get(&n) {
        return *v;
    }
    let arg = |i: usize, memo: &mut HashMap<NodeIdx, Val>| eval_memo(g, g.ins(n)[i], params, memo);
    let bitw = || g.int_ty(n).map(|t| t.bitw).unwrap_or(64);
    let v = match g.op(n) {
        Op::Con => match g.ty(n) {
            Type::Int(t) => Val::I(t.as_con().unwrap()),
            Type::Float(t) => {
                if t.bitw == 32 {
                    Val::F32(t.as_f32().unwrap().to_bits())
                } else {
                    Val::F64(t.as_f64().unwrap().to_bits())
                }
            }
            ty => panic!("cannot evaluate constant of type {ty}"),
        },
        Op::Param(i) => params[i as usize],
        Op::Add => Val::I(lattice::con_add(bitw(), arg(0, memo).as_i(), arg(1, memo).as_i())),
        Op::Sub => Val::I(lattice::con_sub(bitw(), arg(0, memo).as_i(), arg(1, memo).as_i())),
        Op::Mul => Val::I(lattice::con_mul(bitw(), arg(0, memo).as_i(), arg(1, memo).as_i())),
        Op::Div => Val::I(lattice::con_div(bitw(), arg(0, memo).as_i(), arg(1, memo).as_i())),
        Op::Rem => Val::I(lattice::con_rem(bitw(), arg(0, memo).as_i(), arg(1, memo).as_i())),
        Op::UDiv => Val::I(lattice::con_udiv(bitw(), arg(0, memo).as_i(), arg(1, memo).as_i())),
        Op::URem => Val::I(lattice::con_urem(bitw(), arg(0, memo).as_i(), arg(1, memo).as_i())),
        Op::And => Val::I(lattice::con_and(bitw(), arg(0, memo).as_i(), arg(1, memo).as_i())),
        Op::Or => Val::I(lattice::con_or(bitw(), arg(0, memo).as_i(), arg(1, memo).as_i())),
        Op::Xor => Val::I(lattice::con_xor(bitw(), arg(0, memo).as_i(), arg(1, memo).as_i())),
        Op::Shl => Val::I(lattice::con_shl(bitw(), arg(0, memo).as_i(), arg(1, memo).as_i())),
        Op::AShr => Val::I(lattice::con_ashr(bitw(), arg(0, memo).as_i(), arg(1, memo).as_i())),
        Op::LShr => Val::I(lattice::con_lshr(bitw(), arg(0, memo).as_i(), arg(1, memo).as_i())),
        Op::RotL => Val::I(lattice::con_rotl(bitw(), arg(0, memo).as_i(), arg(1, memo).as_i())),
        Op::RotR => Val::I(lattice::con_rotr(bitw(), arg(0, memo).as_i(), arg(1, memo).as_i())),
        Op::Min => Val::I(arg(0, memo).as_i().min(arg(1, memo).as_i())),
        Op::Max => Val::I(arg(0, memo).as_i().max(arg(1, memo).as_i())),
        Op::Abs => match g.ty(n) {
            Type::Int(t) => Val::I(lattice::con_abs(t.bitw, arg(0, memo).as_i())),
            Type::Float(t) if t.bitw == 32 => Val::f32(arg(0, memo).as_f32().abs()),
            Type::Float(_) => Val::f64(arg(0, memo).as_f64().abs()),
            ty => panic!("abs of {ty}"),
        },
        Op::ReverseBytes => Val::I(lattice::con_bswap(bitw(), arg(0, memo).as_i())),
        Op::I2L => Val::I(arg(0, memo).as_i()),
        Op::L2I => Val::I(lattice::reduce(32, arg(0, memo).as_i())),
        Op::I2F => Val::f32(arg(0, memo).as_i() as i32 as f32),
        Op::F2I => Val::I(arg(0, memo).as_f32() as i32 as i64),
        Op::F2IBits => Val::I(arg(0, memo).as_f32().to_bits() as i32 as i64),
        Op::I2FBits => Val::F32(arg(0, memo).as_i() as u32),
        Op::D2LBits => Val::I(arg(0, memo).as_f64().to_bits() as i64),
        Op::L2DBits => Val::F64(arg(0, memo).as_i() as u64),
        Op::FAdd | Op::FSub | Op::FMul | Op::FDiv | Op::FRem => {
            let float32 = matches!(g.ty(n), Type::Float(t) if t.bitw == 32);
            if float32 {
                let (a, b) = (arg(0, memo).as_f32(), arg(1, memo).as_f32());
                Val::f32(match g.op(n) {
                    Op::FAdd => a + b,
                    Op::FSub => a - b,
                    Op::FMul => a * b,
                    Op::FDiv => a / b,
                    Op::FRem => a % b,
                    _ => unreachable!(),
                })
            } else {
                let (a, b) = (arg(0, memo).as_f64(), arg(1, memo).as_f64());
                Val::f64(match g.op(n) {
                    Op::FAdd => a + b,
                    Op::FSub => a - b,
                    Op::FMul => a * b,
                    Op::FDiv => a / b,
                    Op::FRem => a % b,
                    _ => unreachable!(),
                })
            }
        }
        Op::FNeg => match g.ty(n) {
            Type::Float(t) if t.bitw == 32 => Val::f32(-arg(0, memo).as_f32()),
            _ => Val::f64(-arg(0, memo).as_f64()),
        },
        Op::Cmp(p) => {
            let w = g.int_ty(g.ins(n)[0]).map(|t| t.bitw).unwrap_or(64);
            Val::I(p.eval_int(w, arg(0, memo).as_i(), arg(1, memo).as_i()) as i64)
        }
        Op::FCmp(p) => {
            let res = match g.ty(g.ins(n)[0]) {
                Type::Float(t) if t.bitw == 32 => {
                    let (a, b) = (arg(0, memo).as_f32(), arg(1, memo).as_f32());
                    eval_fcmp(p, a.partial_cmp(&b))
                }
                _ => {
                    let (a, b) = (arg(0, memo).as_f64(), arg(1, memo).as_f64());
                    eval_fcmp(p, a.partial_cmp(&b))
                }
            };
            Val::I(res as i64)
        }
        Op::CMove => {
            if arg(0, memo).as_i() != 0 {
                arg(1, memo)
            } else {
                arg(2, memo)
            }
        }
        op => panic!("cannot evaluate {op:?}"),
    };
    memo.insert(n, v);
    v
}

fn eval_fcmp(p: super::Pred, ord: Option<std::cmp::Ordering>) -> bool {
    use std::cmp::Ordering::*;
    use super::Pred;
    match ord {
        // An unordered comparison (NaN on either side) is false for
        // everything except "not equal".
        None => matches!(p, Pred::Ne),
        Some(o) => match p {
            Pred::Eq => o == Equal,
            Pred::Ne => o != Equal,
            Pred::Slt => o == Less,
            Pred::Sle => o != Greater,
            Pred::Sgt => o == Greater,
            Pred::Sge => o != Less,
            _ => unreachable!("unsigned float comparison"),
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn eval_int_expr() {
        let g = Graph::from_str(
            "
            %0: i32 = param 0
            %1: i32 = 3
            %2: i32 = mul %0, %1
            %3: i32 = 1
            %4: i32 = add %2, %3
            blackbox %4
        ",
        );
        let r = eval(&g, NodeIdx::from_usize(4), &[Val::I(5)]);
        assert_eq!(r, Val::I(16));
    }

    #[test]
    fn eval_preserves_nan_and_zero_sign() {
        let g = Graph::from_str(
            "
            %0: f64 = param 0
            %1: f64 = -0
            %2: f64 = fsub %0, %1
            blackbox %2
        ",
        );
        // -0.0 - (-0.0) is +0.0: bit pattern differs from the -0.0 input.
        let r = eval(&g, NodeIdx::from_usize(2), &[Val::f64(-0.0)]);
        assert_eq!(r, Val::f64(0.0));
        assert_ne!(r, Val::f64(-0.0));
        let r = eval(&g, NodeIdx::from_usize(2), &[Val::f64(f64::NAN)]);
        assert!(f64::from_bits(match r {
            Val::F64(b) => b,
            _ => panic!(),
        })
        .is_nan());
    }

    #[test]
    fn eval_division_edges() {
        let g = Graph::from_str(
            "
            %0: i32 = param 0
            %1: i32 = param 1
            %2: i32 = div %0, %1
            blackbox %2
        ",
        );
        let r = eval(&g, NodeIdx::from_usize(2), &[Val::I(i32::MIN as i64), Val::I(-1)]);
        assert_eq!(r, Val::I(i32::MIN as i64));
    }
}
