//! The sea-of-nodes graph.
//!
//! A [Graph] is an arena of [Node]s addressed by stable [NodeIdx] indices.
//! Nodes are never removed from the arena: a dead node is overwritten with an
//! [Op::Dead] tombstone once its use count reaches zero, and its index is
//! never reused within one compilation. Every node records both its inputs
//! (`ins`, the ordered def edges this node consumes) and its uses (`outs`,
//! one entry per use occurrence), so redirecting all users of a node to a
//! replacement is a local operation.
//!
//! Data nodes float freely: they have no control input and are constrained
//! only by their data dependencies. Control is an explicit chain of nodes
//! (`Start`, `If`/`IfTrue`/`IfFalse`, `Region`, `Loop`, `Safepoint`,
//! `ZeroTrap`, `Return`); memory is an explicit chain of `Mem`-typed values
//! threaded through `InitMem`, `Store`, `MemBar`, `Call` and `Phi`. The
//! divide-by-zero trap is the [Op::ZeroTrap] control node: a front end
//! places one before any signed or unsigned division whose divisor it cannot
//! prove non-zero, and the optimizer removes it again exactly when the
//! divisor's type excludes zero.
//!
//! Each node carries a memoized lattice [Type]. The type is always a sound
//! over-approximation of the node's runtime values and only narrows over the
//! course of a compilation.
//!
//! ## Text form
//!
//! A graph can be rendered to text ([std::fmt::Display]) and, in tests,
//! parsed back from it ([parser]). Rendering numbers nodes by a
//! deterministic traversal from the graph's sinks, so two structurally
//! identical graphs render identically regardless of the order their nodes
//! were created in.

#[cfg(test)]
pub(crate) mod eval;
#[cfg(test)]
pub(crate) mod parser;
#[cfg(any(debug_assertions, test))]
mod well_formed;

use crate::{
    compile::CompileError,
    lattice::{TyInt, Type},
};
use index_vec::IndexVec;
use smallvec::SmallVec;
use std::{collections::HashMap, fmt};
use strum::{EnumCount, EnumDiscriminants};

index_vec::define_index_type! {
    pub struct NodeIdx = u32;
}

/// An integer comparison predicate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Pred {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
    Ult,
    Ule,
    Ugt,
    Uge,
}

impl Pred {
    pub fn name(&self) -> &'static str {
        match self {
            Pred::Eq => "eq",
            Pred::Ne => "ne",
            Pred::Slt => "slt",
            Pred::Sle => "sle",
            Pred::Sgt => "sgt",
            Pred::Sge => "sge",
            Pred::Ult => "ult",
            Pred::Ule => "ule",
            Pred::Ugt => "ugt",
            Pred::Uge => "uge",
        }
    }

    /// The predicate obtained by swapping the operands (not the negation).
    pub fn swap(&self) -> Pred {
        match self {
            Pred::Eq => Pred::Eq,
            Pred::Ne => Pred::Ne,
            Pred::Slt => Pred::Sgt,
            Pred::Sle => Pred::Sge,
            Pred::Sgt => Pred::Slt,
            Pred::Sge => Pred::Sle,
            Pred::Ult => Pred::Ugt,
            Pred::Ule => Pred::Uge,
            Pred::Ugt => Pred::Ult,
            Pred::Uge => Pred::Ule,
        }
    }

    /// Evaluate the predicate on two canonical `bitw`-bit values.
    pub(crate) fn eval_int(&self, bitw: u32, a: i64, b: i64) -> bool {
        use crate::lattice::zext;
        match self {
            Pred::Eq => a == b,
            Pred::Ne => a != b,
            Pred::Slt => a < b,
            Pred::Sle => a <= b,
            Pred::Sgt => a > b,
            Pred::Sge => a >= b,
            Pred::Ult => zext(bitw, a) < zext(bitw, b),
            Pred::Ule => zext(bitw, a) <= zext(bitw, b),
            Pred::Ugt => zext(bitw, a) > zext(bitw, b),
            Pred::Uge => zext(bitw, a) >= zext(bitw, b),
        }
    }
}

/// The kind of a memory barrier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BarKind {
    /// A store-store barrier publishing a freshly allocated object's fields.
    StoreStore,
    /// A release barrier for a volatile field store.
    Release,
}

impl BarKind {
    pub fn name(&self) -> &'static str {
        match self {
            BarKind::StoreStore => "storestore",
            BarKind::Release => "release",
        }
    }
}

/// A node's operation. The comment on each variant documents its input
/// layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumCount, EnumDiscriminants)]
#[strum_discriminants(name(OpKind), derive(Hash, strum::Display))]
pub enum Op {
    /// A constant; its value is the node's (singleton) type. Inputs: none.
    Con,
    /// The n'th incoming parameter. Inputs: none.
    Param(u32),
    // Integer arithmetic, all widths. Inputs: `[lhs, rhs]`.
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    UDiv,
    URem,
    And,
    Or,
    Xor,
    Shl,
    AShr,
    LShr,
    RotL,
    RotR,
    Min,
    Max,
    /// Inputs: `[val]`.
    Abs,
    /// Byte reversal. Inputs: `[val]`.
    ReverseBytes,
    // Conversions. Inputs: `[val]`.
    I2L,
    L2I,
    I2F,
    F2I,
    F2IBits,
    I2FBits,
    D2LBits,
    L2DBits,
    // Float arithmetic. Inputs: `[lhs, rhs]`, except FNeg: `[val]`.
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
    FNeg,
    /// Integer comparison; produces an i32 in `[0, 1]`. Inputs: `[lhs, rhs]`.
    Cmp(Pred),
    /// Float comparison; false on NaN except for `Ne`. Inputs: `[lhs, rhs]`.
    FCmp(Pred),
    /// Conditional move. Inputs: `[cond, tval, fval]`.
    CMove,
    // Control.
    /// Inputs: none.
    Start,
    /// The graph's sink. Inputs: `[ctrl, vals...]`.
    Return,
    /// Inputs: `[ctrl, cond]`.
    If,
    /// An `If` guarding an array index; loop opts may hoist it. Inputs:
    /// `[ctrl, cond]`.
    RangeCheck,
    /// Inputs: `[if]`.
    IfTrue,
    /// Inputs: `[if]`.
    IfFalse,
    /// A control merge. Inputs: `[ctrls...]`.
    Region,
    /// A loop head: a two-input region. Inputs: `[entry, backedge]`.
    Loop,
    /// The outer loop created by strip mining. Inputs: `[entry, backedge]`.
    OuterStripMinedLoop,
    /// Inputs: `[ctrl]`.
    Safepoint,
    /// Traps at runtime if the divisor is zero. Inputs: `[ctrl, divisor]`.
    ZeroTrap,
    /// Inputs: `[region, vals...]`, one value per region input.
    Phi,
    // Memory.
    /// The initial memory state. Inputs: none.
    InitMem,
    /// Inputs: `[mem, base]`.
    Load { off: i32 },
    /// Inputs: `[mem, base, val]`.
    Store { off: i32, volatile: bool },
    /// A fresh allocation. Inputs: `[mem]`.
    Alloc,
    /// Inputs: `[mem, obj]`.
    MemBar(BarKind),
    /// An opaque, uninlined call. Inputs: `[mem, args...]`.
    Call,
    // Vector.
    /// Inputs: `[mem, base]`.
    VecLoad { off: i32, lanes: u8 },
    /// Inputs: `[mem, base, val]`.
    VecStore { off: i32, lanes: u8 },
    /// A lane-wise binary op. Inputs: `[lhs, rhs]`.
    VecBin { op: OpKind, lanes: u8 },
    /// A lane-wise unary op (a packed conversion). Inputs: `[val]`.
    VecUn { op: OpKind, lanes: u8 },
    /// An opaque value sink, keeping its input observable. Inputs: `[val]`.
    #[cfg(test)]
    BlackBox,
    /// The tombstone left behind by a removed node.
    Dead,
}

impl Op {
    /// Is this a pure data op, safe to value-number structurally?
    pub(crate) fn is_gvn_able(&self) -> bool {
        matches!(
            self,
            Op::Con
                | Op::Param(_)
                | Op::Add
                | Op::Sub
                | Op::Mul
                | Op::Div
                | Op::Rem
                | Op::UDiv
                | Op::URem
                | Op::And
                | Op::Or
                | Op::Xor
                | Op::Shl
                | Op::AShr
                | Op::LShr
                | Op::RotL
                | Op::RotR
                | Op::Min
                | Op::Max
                | Op::Abs
                | Op::ReverseBytes
                | Op::I2L
                | Op::L2I
                | Op::I2F
                | Op::F2I
                | Op::F2IBits
                | Op::I2FBits
                | Op::D2LBits
                | Op::L2DBits
                | Op::FAdd
                | Op::FSub
                | Op::FMul
                | Op::FDiv
                | Op::FRem
                | Op::FNeg
                | Op::Cmp(_)
                | Op::FCmp(_)
                | Op::CMove
        )
    }

    /// Is this op commutative in its two inputs?
    pub(crate) fn is_commutative(&self) -> bool {
        matches!(
            self,
            Op::Add
                | Op::Mul
                | Op::And
                | Op::Or
                | Op::Xor
                | Op::Min
                | Op::Max
                | Op::Cmp(Pred::Eq)
                | Op::Cmp(Pred::Ne)
        )
    }

    /// The number of inputs this op requires, or `None` for variadic ops.
    pub(crate) fn arity(&self) -> Option<usize> {
        match self {
            Op::Con | Op::Param(_) | Op::Start | Op::InitMem | Op::Dead => Some(0),
            Op::Abs
            | Op::ReverseBytes
            | Op::I2L
            | Op::L2I
            | Op::I2F
            | Op::F2I
            | Op::F2IBits
            | Op::I2FBits
            | Op::D2LBits
            | Op::L2DBits
            | Op::FNeg
            | Op::IfTrue
            | Op::IfFalse
            | Op::Safepoint
            | Op::VecUn { .. } => Some(1),
            Op::Add
            | Op::Sub
            | Op::Mul
            | Op::Div
            | Op::Rem
            | Op::UDiv
            | Op::URem
            | Op::And
            | Op::Or
            | Op::Xor
            | Op::Shl
            | Op::AShr
            | Op::LShr
            | Op::RotL
            | Op::RotR
            | Op::Min
            | Op::Max
            | Op::FAdd
            | Op::FSub
            | Op::FMul
            | Op::FDiv
            | Op::FRem
            | Op::Cmp(_)
            | Op::FCmp(_)
            | Op::If
            | Op::RangeCheck
            | Op::Loop
            | Op::OuterStripMinedLoop
            | Op::ZeroTrap
            | Op::Load { .. }
            | Op::VecLoad { .. }
            | Op::MemBar(_)
            | Op::VecBin { .. } => Some(2),
            Op::CMove | Op::Store { .. } | Op::VecStore { .. } => Some(3),
            Op::Alloc => Some(1),
            Op::Return | Op::Region | Op::Phi | Op::Call => None,
            #[cfg(test)]
            Op::BlackBox => Some(1),
        }
    }
}

#[derive(Debug)]
pub struct Node {
    op: Op,
    ins: SmallVec<[NodeIdx; 2]>,
    outs: SmallVec<[NodeIdx; 2]>,
    ty: Type,
}

/// A program graph: the unit of compilation. The graph exclusively owns its
/// node arena; dropping it drops every node.
#[derive(Debug, Default)]
pub struct Graph {
    nodes: IndexVec<NodeIdx, Node>,
}

impl Graph {
    pub fn new() -> Self {
        Self {
            nodes: IndexVec::new(),
        }
    }

    /// Append a new node. The new node's use count is zero; its inputs gain
    /// a use each.
    pub fn push(&mut self, op: Op, ins: &[NodeIdx], ty: Type) -> Result<NodeIdx, CompileError> {
        if self.nodes.len() >= u32::MAX as usize {
            return Err(CompileError::LimitExceeded(
                "node arena exhausted".to_owned(),
            ));
        }
        debug_assert!(op.arity().map(|a| a == ins.len()).unwrap_or(true));
        let nidx = self.nodes.push(Node {
            op,
            ins: SmallVec::from_slice(ins),
            outs: SmallVec::new(),
            ty,
        });
        for &i in ins {
            self.nodes[i].outs.push(nidx);
        }
        Ok(nidx)
    }

    /// Append an integer constant node.
    pub fn con_int(&mut self, bitw: u32, v: i64) -> Result<NodeIdx, CompileError> {
        self.push(Op::Con, &[], Type::int_con(bitw, v))
    }

    /// Append a node with no inputs yet; the caller wires them afterwards
    /// with [Self::add_in]. Only for graph construction from text.
    #[cfg(test)]
    pub(crate) fn push_raw(&mut self, op: Op, ty: Type) -> NodeIdx {
        self.nodes.push(Node {
            op,
            ins: SmallVec::new(),
            outs: SmallVec::new(),
            ty,
        })
    }

    pub fn op(&self, n: NodeIdx) -> Op {
        self.nodes[n].op
    }

    pub fn ty(&self, n: NodeIdx) -> Type {
        self.nodes[n].ty
    }

    pub(crate) fn set_ty(&mut self, n: NodeIdx, ty: Type) {
        self.nodes[n].ty = ty;
    }

    pub fn ins(&self, n: NodeIdx) -> &[NodeIdx] {
        &self.nodes[n].ins
    }

    pub fn outs(&self, n: NodeIdx) -> &[NodeIdx] {
        &self.nodes[n].outs
    }

    /// The integer type of `n`, if it has one.
    pub fn int_ty(&self, n: NodeIdx) -> Option<TyInt> {
        match self.nodes[n].ty {
            Type::Int(t) => Some(t),
            _ => None,
        }
    }

    /// The constant value of `n`, if its type is a singleton integer.
    pub fn as_int_con(&self, n: NodeIdx) -> Option<i64> {
        self.nodes[n].ty.as_int_con()
    }

    /// How many live (non-tombstone) nodes does the graph hold?
    pub fn num_live(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| !matches!(n.op, Op::Dead))
            .count()
    }

    pub fn iter_live(&self) -> impl Iterator<Item = NodeIdx> + '_ {
        self.nodes
            .iter_enumerated()
            .filter(|(_, n)| !matches!(n.op, Op::Dead))
            .map(|(i, _)| i)
    }

    /// How many live nodes have op kind `k`?
    pub fn count_op(&self, k: OpKind) -> usize {
        self.nodes
            .iter()
            .filter(|n| !matches!(n.op, Op::Dead) && OpKind::from(&n.op) == k)
            .count()
    }

    /// Replace the op of `n` in place, keeping its edges.
    pub(crate) fn set_op(&mut self, n: NodeIdx, op: Op) {
        debug_assert!(op.arity().map(|a| a == self.nodes[n].ins.len()).unwrap_or(true));
        self.nodes[n].op = op;
    }

    /// Swap two input slots of `n`. The use lists are unaffected: both defs
    /// are still used exactly as often.
    pub(crate) fn swap_ins(&mut self, n: NodeIdx, a: usize, b: usize) {
        self.nodes[n].ins.swap(a, b);
    }

    /// Rewire input `slot` of `n` to `new`.
    pub(crate) fn set_in(&mut self, n: NodeIdx, slot: usize, new: NodeIdx) {
        let old = self.nodes[n].ins[slot];
        if old == new {
            return;
        }
        self.remove_one_out(old, n);
        self.nodes[n].ins[slot] = new;
        self.nodes[new].outs.push(n);
    }

    /// Append an input to a variadic node.
    pub(crate) fn add_in(&mut self, n: NodeIdx, new: NodeIdx) {
        self.nodes[n].ins.push(new);
        self.nodes[new].outs.push(n);
    }

    /// Remove input `slot` of a variadic node, shifting later slots down.
    pub(crate) fn remove_in(&mut self, n: NodeIdx, slot: usize) {
        let old = self.nodes[n].ins.remove(slot);
        self.remove_one_out(old, n);
    }

    fn remove_one_out(&mut self, def: NodeIdx, user: NodeIdx) {
        let outs = &mut self.nodes[def].outs;
        let pos = outs
            .iter()
            .position(|&u| u == user)
            .expect("edge lists out of sync");
        outs.swap_remove(pos);
    }

    /// Is `n` a sink that anchors liveness?
    pub(crate) fn is_root(&self, n: NodeIdx) -> bool {
        match self.nodes[n].op {
            Op::Return => true,
            #[cfg(test)]
            Op::BlackBox => true,
            _ => false,
        }
    }

    /// Redirect every user of `old` to `new`, then kill `old`.
    ///
    /// # Panics
    ///
    /// If `old == new`, or `old` is a root.
    pub(crate) fn subsume(&mut self, old: NodeIdx, new: NodeIdx) {
        assert_ne!(old, new);
        debug_assert!(!self.is_root(old));
        let outs = std::mem::take(&mut self.nodes[old].outs);
        for u in outs {
            if u == old {
                // A self edge dies with the node.
                continue;
            }
            let pos = self.nodes[u]
                .ins
                .iter()
                .position(|&d| d == old)
                .expect("edge lists out of sync");
            self.nodes[u].ins[pos] = new;
            self.nodes[new].outs.push(u);
        }
        self.kill(old);
    }

    /// Kill `n`, which must have no uses left, and any of its inputs this
    /// makes dead in turn.
    pub(crate) fn kill(&mut self, n: NodeIdx) {
        debug_assert!(self.nodes[n].outs.iter().all(|&u| u == n));
        let mut stack = vec![n];
        while let Some(n) = stack.pop() {
            if matches!(self.nodes[n].op, Op::Dead) {
                continue;
            }
            if !self.nodes[n].outs.is_empty() || self.is_root(n) {
                continue;
            }
            let ins = std::mem::take(&mut self.nodes[n].ins);
            self.nodes[n].op = Op::Dead;
            self.nodes[n].ty = Type::Top;
            for i in ins {
                if i == n {
                    continue;
                }
                self.remove_one_out(i, n);
                if self.nodes[i].outs.is_empty() && !self.is_root(i) {
                    stack.push(i);
                }
            }
        }
    }

    /// Mark everything reachable from the graph's roots and tombstone the
    /// rest, leaving the graph free of dead nodes.
    pub fn sweep_dead(&mut self) {
        let mut live: IndexVec<NodeIdx, bool> = IndexVec::from_vec(vec![false; self.nodes.len()]);
        let mut stack = self
            .nodes
            .iter_enumerated()
            .filter(|(i, n)| !matches!(n.op, Op::Dead) && self.is_root(*i))
            .map(|(i, _)| i)
            .collect::<Vec<_>>();
        while let Some(n) = stack.pop() {
            if live[n] {
                continue;
            }
            live[n] = true;
            stack.extend(self.nodes[n].ins.iter().copied());
        }
        for i in (0..self.nodes.len()).map(NodeIdx::from_usize) {
            if live[i] {
                self.nodes[i].outs.retain(|&mut u| live[u]);
            } else if !matches!(self.nodes[i].op, Op::Dead) {
                self.nodes[i].op = Op::Dead;
                self.nodes[i].ty = Type::Top;
                self.nodes[i].ins.clear();
                self.nodes[i].outs.clear();
            }
        }
    }

    /// Find a user of `n` with op `op` (e.g. an `If`'s `IfTrue` projection).
    pub fn out_with_op(&self, n: NodeIdx, op: Op) -> Option<NodeIdx> {
        self.nodes[n].outs.iter().copied().find(|&u| self.nodes[u].op == op)
    }

    /// A deterministic node ordering: depth-first from the graph's sinks,
    /// inputs before users. Two structurally identical graphs produce the
    /// same ordering regardless of arena layout.
    pub fn canonical_order(&self) -> Vec<NodeIdx> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut state: IndexVec<NodeIdx, u8> = IndexVec::from_vec(vec![0; self.nodes.len()]);
        let roots = self
            .nodes
            .iter_enumerated()
            .filter(|(i, n)| !matches!(n.op, Op::Dead) && self.is_root(*i))
            .map(|(i, _)| i)
            .collect::<Vec<_>>();
        let dfs = |start: NodeIdx, order: &mut Vec<NodeIdx>, state: &mut IndexVec<NodeIdx, u8>| {
            let mut stack = vec![(start, false)];
            while let Some((n, expanded)) = stack.pop() {
                if expanded {
                    if state[n] != 2 {
                        state[n] = 2;
                        order.push(n);
                    }
                    continue;
                }
                if state[n] != 0 {
                    continue;
                }
                state[n] = 1;
                stack.push((n, true));
                for &i in self.nodes[n].ins.iter().rev() {
                    if state[i] == 0 {
                        stack.push((i, false));
                    }
                }
            }
        };
        for r in roots {
            dfs(r, &mut order, &mut state);
        }
        // Anything unreachable from a sink (semantically dead, but not yet
        // swept) goes last, in arena order.
        for i in (0..self.nodes.len()).map(NodeIdx::from_usize) {
            if state[i] == 0 && !matches!(self.nodes[i].op, Op::Dead) {
                dfs(i, &mut order, &mut state);
            }
        }
        order
    }

    #[cfg(any(debug_assertions, test))]
    pub fn assert_well_formed(&self) {
        well_formed::assert_well_formed(self);
    }

    fn fmt_node(&self, n: NodeIdx, num: &HashMap<NodeIdx, usize>) -> String {
        let r = |i: usize| format!("%{}", num[&self.nodes[n].ins[i]]);
        let args = |from: usize| {
            self.nodes[n]
                .ins
                .iter()
                .skip(from)
                .map(|i| format!("%{}", num[i]))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let bind = |rhs: String| format!("%{}: {} = {}", num[&n], self.nodes[n].ty, rhs);
        match self.nodes[n].op {
            Op::Con => match self.nodes[n].ty {
                Type::Int(t) => bind(format!("{}", t.lo)),
                Type::Float(t) => {
                    let s = if t.bitw == 32 {
                        let v = t.as_f32().unwrap();
                        if v.is_nan() {
                            "nan".to_owned()
                        } else if v == f32::INFINITY {
                            "inf".to_owned()
                        } else if v == f32::NEG_INFINITY {
                            "-inf".to_owned()
                        } else {
                            format!("{v}")
                        }
                    } else {
                        fmt_float(t.as_f64().unwrap())
                    };
                    bind(s)
                }
                ty => bind(format!("con {ty}")),
            },
            Op::Param(i) => bind(format!("param {i}")),
            Op::Add => bind(format!("add {}, {}", r(0), r(1))),
            Op::Sub => bind(format!("sub {}, {}", r(0), r(1))),
            Op::Mul => bind(format!("mul {}, {}", r(0), r(1))),
            Op::Div => bind(format!("div {}, {}", r(0), r(1))),
            Op::Rem => bind(format!("rem {}, {}", r(0), r(1))),
            Op::UDiv => bind(format!("udiv {}, {}", r(0), r(1))),
            Op::URem => bind(format!("urem {}, {}", r(0), r(1))),
            Op::And => bind(format!("and {}, {}", r(0), r(1))),
            Op::Or => bind(format!("or {}, {}", r(0), r(1))),
            Op::Xor => bind(format!("xor {}, {}", r(0), r(1))),
            Op::Shl => bind(format!("shl {}, {}", r(0), r(1))),
            Op::AShr => bind(format!("ashr {}, {}", r(0), r(1))),
            Op::LShr => bind(format!("lshr {}, {}", r(0), r(1))),
            Op::RotL => bind(format!("rotl {}, {}", r(0), r(1))),
            Op::RotR => bind(format!("rotr {}, {}", r(0), r(1))),
            Op::Min => bind(format!("min {}, {}", r(0), r(1))),
            Op::Max => bind(format!("max {}, {}", r(0), r(1))),
            Op::Abs => bind(format!("abs {}", r(0))),
            Op::ReverseBytes => bind(format!("bswap {}", r(0))),
            Op::I2L => bind(format!("i2l {}", r(0))),
            Op::L2I => bind(format!("l2i {}", r(0))),
            Op::I2F => bind(format!("i2f {}", r(0))),
            Op::F2I => bind(format!("f2i {}", r(0))),
            Op::F2IBits => bind(format!("f2ibits {}", r(0))),
            Op::I2FBits => bind(format!("i2fbits {}", r(0))),
            Op::D2LBits => bind(format!("d2lbits {}", r(0))),
            Op::L2DBits => bind(format!("l2dbits {}", r(0))),
            Op::FAdd => bind(format!("fadd {}, {}", r(0), r(1))),
            Op::FSub => bind(format!("fsub {}, {}", r(0), r(1))),
            Op::FMul => bind(format!("fmul {}, {}", r(0), r(1))),
            Op::FDiv => bind(format!("fdiv {}, {}", r(0), r(1))),
            Op::FRem => bind(format!("frem {}, {}", r(0), r(1))),
            Op::FNeg => bind(format!("fneg {}", r(0))),
            Op::Cmp(p) => bind(format!("{} {}, {}", p.name(), r(0), r(1))),
            Op::FCmp(p) => bind(format!("f{} {}, {}", fcmp_name(p), r(0), r(1))),
            Op::CMove => bind(format!("cmove {}, {}, {}", r(0), r(1), r(2))),
            Op::Start => bind("start".to_owned()),
            Op::Return => {
                if self.nodes[n].ins.is_empty() {
                    "ret".to_owned()
                } else {
                    format!("ret {}", args(0))
                }
            }
            Op::If => bind(format!("if {}, {}", r(0), r(1))),
            Op::RangeCheck => bind(format!("rangecheck {}, {}", r(0), r(1))),
            Op::IfTrue => bind(format!("iftrue {}", r(0))),
            Op::IfFalse => bind(format!("iffalse {}", r(0))),
            Op::Region => bind(format!("region {}", args(0))),
            Op::Loop => bind(format!("loop {}", args(0))),
            Op::OuterStripMinedLoop => bind(format!("outerloop {}", args(0))),
            Op::Safepoint => bind(format!("safepoint {}", r(0))),
            Op::ZeroTrap => bind(format!("zerotrap {}, {}", r(0), r(1))),
            Op::Phi => bind(format!("phi {}", args(0))),
            Op::InitMem => bind("initmem".to_owned()),
            Op::Load { off } => bind(format!("load {}, {}, off={}", r(0), r(1), off)),
            Op::Store { off, volatile } => {
                let v = if volatile { ", volatile" } else { "" };
                bind(format!("store {}, {}, {}, off={}{}", r(0), r(1), r(2), off, v))
            }
            Op::Alloc => bind(format!("alloc {}", r(0))),
            Op::MemBar(k) => bind(format!("membar.{} {}, {}", k.name(), r(0), r(1))),
            Op::Call => bind(format!("call {}", args(0))),
            Op::VecLoad { off, lanes } => {
                bind(format!("vecload {}, {}, off={}, lanes={}", r(0), r(1), off, lanes))
            }
            Op::VecStore { off, lanes } => bind(format!(
                "vecstore {}, {}, {}, off={}, lanes={}",
                r(0),
                r(1),
                r(2),
                off,
                lanes
            )),
            Op::VecBin { op, .. } => bind(format!(
                "vec.{} {}, {}",
                op.to_string().to_lowercase(),
                r(0),
                r(1)
            )),
            Op::VecUn { op, .. } => bind(format!(
                "vecun.{} {}",
                op.to_string().to_lowercase(),
                r(0)
            )),
            #[cfg(test)]
            Op::BlackBox => format!("blackbox {}", r(0)),
            Op::Dead => unreachable!(),
        }
    }
}

fn fcmp_name(p: Pred) -> &'static str {
    match p {
        Pred::Eq => "eq",
        Pred::Ne => "ne",
        Pred::Slt => "lt",
        Pred::Sle => "le",
        Pred::Sgt => "gt",
        Pred::Sge => "ge",
        _ => unreachable!("unsigned float comparison"),
    }
}

fn fmt_float(v: f64) -> String {
    if v.is_nan() {
        "nan".to_owned()
    } else if v == f64::INFINITY {
        "inf".to_owned()
    } else if v == f64::NEG_INFINITY {
        "-inf".to_owned()
    } else {
        format!("{v}")
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let order = self.canonical_order();
        let mut num = HashMap::with_capacity(order.len());
        for (i, &n) in order.iter().enumerate() {
            num.insert(n, i);
        }
        for &n in &order {
            writeln!(f, "{}", self.fmt_node(n, &num))?;
        }
        Ok(())
    }
}
