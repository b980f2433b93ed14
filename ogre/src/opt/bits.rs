//! Known-bits reasoning.
//!
//! A bounded, on-demand structural walk computing which bits of a node's
//! value are known to be zero or one. This powers redundant-mask removal
//! (e.g. `(x >>> 28) & 15` is just `x >>> 28` at 32 bits) beyond what the
//! range lattice can see: a range knows magnitudes, known bits know
//! positions.

use crate::{
    ir::{Graph, NodeIdx, Op},
    lattice::{smear_ones, zext, Type},
};

/// How deep the structural walk may recurse before falling back to
/// type-derived information only.
const MAX_DEPTH: u8 = 8;

/// Bits of a `bitw`-wide value known to be zero or one. Both masks only
/// populate the low `bitw` bits; `zeros & ones == 0` always holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct KnownBits {
    pub(crate) bitw: u32,
    pub(crate) zeros: u64,
    pub(crate) ones: u64,
}

impl KnownBits {
    fn mask(bitw: u32) -> u64 {
        if bitw == 64 {
            u64::MAX
        } else {
            (1u64 << bitw) - 1
        }
    }

    fn unknown(bitw: u32) -> Self {
        Self {
            bitw,
            zeros: 0,
            ones: 0,
        }
    }

    fn con(bitw: u32, v: i64) -> Self {
        let ones = zext(bitw, v);
        Self {
            bitw,
            zeros: !ones & Self::mask(bitw),
            ones,
        }
    }

    /// What the node's lattice type alone tells us.
    fn from_ty(bitw: u32, ty: &Type) -> Self {
        match ty {
            Type::Int(t) if t.bitw == bitw => {
                if let Some(c) = t.as_con() {
                    Self::con(bitw, c)
                } else if t.nonneg() {
                    // Every bit above the highest bit `hi` can reach is zero.
                    Self {
                        bitw,
                        zeros: Self::mask(bitw) & !smear_ones(t.hi as u64),
                        ones: 0,
                    }
                } else {
                    Self::unknown(bitw)
                }
            }
            _ => Self::unknown(bitw),
        }
    }

    /// Merge in knowledge from another sound source, never contradicting
    /// what is already known.
    fn refine(mut self, other: Self) -> Self {
        self.zeros |= other.zeros & !self.ones;
        self.ones |= other.ones & !self.zeros;
        self
    }

    /// Are all bits selected by `m` (zero-extended) known zero?
    pub(crate) fn covers_zeros(&self, m: u64) -> bool {
        m & !self.zeros == 0
    }
}

/// Compute the known bits of `n`, which must be an integer-typed node.
pub(crate) fn known_bits(g: &Graph, n: NodeIdx) -> KnownBits {
    walk(g, n, MAX_DEPTH)
}

fn walk(g: &Graph, n: NodeIdx, depth: u8) -> KnownBits {
    let Some(t) = g.int_ty(n) else {
        return KnownBits::unknown(64);
    };
    let bitw = t.bitw;
    let from_ty = KnownBits::from_ty(bitw, &g.ty(n));
    if depth == 0 {
        return from_ty;
    }
    let m = KnownBits::mask(bitw);
    let structural = match g.op(n) {
        Op::And => {
            let (a, b) = bin(g, n, depth);
            KnownBits {
                bitw,
                zeros: a.zeros | b.zeros,
                ones: a.ones & b.ones,
            }
        }
        Op::Or => {
            let (a, b) = bin(g, n, depth);
            KnownBits {
                bitw,
                zeros: a.zeros & b.zeros,
                ones: a.ones | b.ones,
            }
        }
        Op::Xor => {
            let (a, b) = bin(g, n, depth);
            KnownBits {
                bitw,
                zeros: (a.zeros & b.zeros) | (a.ones & b.ones),
                ones: (a.ones & b.zeros) | (a.zeros & b.ones),
            }
        }
        Op::Shl => match shift_count(g, n, bitw) {
            Some(s) => {
                let a = walk(g, g.ins(n)[0], depth - 1);
                KnownBits {
                    bitw,
                    zeros: ((a.zeros << s) | low_ones(s)) & m,
                    ones: (a.ones << s) & m,
                }
            }
            None => KnownBits::unknown(bitw),
        },
        Op::LShr => match shift_count(g, n, bitw) {
            Some(s) => {
                let a = walk(g, g.ins(n)[0], depth - 1);
                // The top `s` bits are filled with zeros.
                let hi = m & !(m >> s);
                KnownBits {
                    bitw,
                    zeros: ((a.zeros & m) >> s) | hi,
                    ones: (a.ones & m) >> s,
                }
            }
            None => KnownBits::unknown(bitw),
        },
        Op::AShr => match shift_count(g, n, bitw) {
            Some(s) => {
                let a = walk(g, g.ins(n)[0], depth - 1);
                let sign = 1u64 << (bitw - 1);
                let hi = m & !(m >> s);
                if a.zeros & sign != 0 {
                    // Sign known zero: behaves like a logical shift.
                    KnownBits {
                        bitw,
                        zeros: ((a.zeros & m) >> s) | hi,
                        ones: (a.ones & m) >> s,
                    }
                } else if a.ones & sign != 0 {
                    KnownBits {
                        bitw,
                        zeros: (a.zeros & m) >> s,
                        ones: ((a.ones & m) >> s) | hi,
                    }
                } else {
                    // Sign unknown: only the shifted body bits survive.
                    KnownBits {
                        bitw,
                        zeros: ((a.zeros & m) >> s) & !hi,
                        ones: ((a.ones & m) >> s) & !hi,
                    }
                }
            }
            None => KnownBits::unknown(bitw),
        },
        Op::I2L => {
            let a = walk(g, g.ins(n)[0], depth - 1);
            let sign = 1u64 << 31;
            if a.zeros & sign != 0 {
                KnownBits {
                    bitw: 64,
                    zeros: a.zeros | !KnownBits::mask(32),
                    ones: a.ones,
                }
            } else if a.ones & sign != 0 {
                KnownBits {
                    bitw: 64,
                    zeros: a.zeros,
                    ones: a.ones | !KnownBits::mask(32),
                }
            } else {
                KnownBits {
                    bitw: 64,
                    zeros: a.zeros & KnownBits::mask(32) & !sign,
                    ones: a.ones & KnownBits::mask(32) & !sign,
                }
            }
        }
        Op::L2I => {
            let a = walk(g, g.ins(n)[0], depth - 1);
            KnownBits {
                bitw: 32,
                zeros: a.zeros & m,
                ones: a.ones & m,
            }
        }
        _ => KnownBits::unknown(bitw),
    };
    structural.refine(from_ty)
}

fn bin(g: &Graph, n: NodeIdx, depth: u8) -> (KnownBits, KnownBits) {
    (
        walk(g, g.ins(n)[0], depth - 1),
        walk(g, g.ins(n)[1], depth - 1),
    )
}

/// The effective (width-masked) constant shift count of `n`, if there is one.
fn shift_count(g: &Graph, n: NodeIdx, bitw: u32) -> Option<u32> {
    g.as_int_con(g.ins(n)[1])
        .map(|c| crate::lattice::mask_shift(bitw, c))
}

fn low_ones(s: u32) -> u64 {
    if s == 0 {
        0
    } else {
        (1u64 << s) - 1
    }
}
