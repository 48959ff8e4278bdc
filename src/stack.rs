//! Expression stack machine.
//!
//! The operand stack of one decode call, and the arithmetic used by the arithmetic
//! opcodes. All additive arithmetic funnels through [`combine`], which keeps linear
//! parts of an expression in one flat [`Sum`] node:
//!
//! - literal operands are folded into the sum's constant,
//! - a `Sum` operand with a coefficient other than one is scaled in place,
//! - two `Sum`s are merged, a `Sum` and anything else become one `Sum` with an extra
//!   term, and only two non-linear operands start a fresh `Sum`.
//!
//! In-place updates go through `Arc::make_mut`, so a `Sum` that another parent already
//! references is copied before it is touched.

use std::sync::Arc;

use log::trace;

use crate::{
    errors::DecodeError,
    expr::{Expr, NodeRef, Sum},
    instr::OpCode,
};

/// LIFO stack of nodes owned by one decode call.
#[derive(Debug)]
pub(crate) struct OperandStack {
    nodes: Vec<NodeRef>,
    position: usize,
    opcode: OpCode,
    max_depth: usize,
}

impl OperandStack {
    pub(crate) fn new() -> Self {
        Self {
            nodes: Vec::with_capacity(20),
            position: 0,
            opcode: OpCode::NoOp,
            max_depth: 0,
        }
    }

    /// Records the instruction being executed, for error reports.
    pub(crate) fn at(&mut self, position: usize, opcode: OpCode) {
        self.position = position;
        self.opcode = opcode;
    }

    pub(crate) fn position(&self) -> usize {
        self.position
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub(crate) fn push(&mut self, node: NodeRef) {
        trace!("push {node}");
        self.nodes.push(node);
        self.max_depth = self.max_depth.max(self.nodes.len());
    }

    pub(crate) fn pop(&mut self) -> Result<NodeRef, DecodeError> {
        self.nodes.pop().ok_or(self.underflow())
    }

    /// Pops the two topmost nodes, returned as `(below, top)`, i.e. in source order.
    pub(crate) fn pop2(&mut self) -> Result<(NodeRef, NodeRef), DecodeError> {
        if self.nodes.len() < 2 {
            return Err(self.underflow());
        }
        let top = self.pop()?;
        let below = self.pop()?;
        Ok((below, top))
    }

    /// Pops the `n` topmost nodes, returned in source order (deepest first).
    pub(crate) fn pop_n(&mut self, n: usize) -> Result<Vec<NodeRef>, DecodeError> {
        if self.nodes.len() < n {
            return Err(self.underflow());
        }
        Ok(self.nodes.split_off(self.nodes.len() - n))
    }

    /// Consumes the stack, which must hold exactly the root node.
    pub(crate) fn into_root(mut self) -> Result<NodeRef, DecodeError> {
        match self.nodes.len() {
            1 => self.pop(),
            n => Err(DecodeError::TerminalStackShape(n)),
        }
    }

    fn underflow(&self) -> DecodeError {
        DecodeError::StackUnderflow {
            position: self.position,
            opcode: self.opcode,
        }
    }
}

/// Applies `f` to the `Sum` behind `node`, copying it first if it is shared.
fn with_sum(node: &mut NodeRef, f: impl FnOnce(&mut Sum)) {
    if let Expr::Sum(sum) = Arc::make_mut(node) {
        f(sum);
    }
}

/// Builds `c1·t1 + c2·t2 + constant`, where absent terms contribute nothing.
pub(crate) fn combine(
    c1: f64,
    t1: Option<NodeRef>,
    c2: f64,
    t2: Option<NodeRef>,
    mut constant: f64,
) -> NodeRef {
    let mut parts: Vec<(f64, NodeRef)> = Vec::with_capacity(2);
    for (coef, term) in [(c1, t1), (c2, t2)] {
        let Some(term) = term else { continue };
        match term.as_const() {
            Some(value) => constant += coef * value,
            None => parts.push((coef, term)),
        }
    }

    let mut parts = parts.into_iter();
    let Some((ca, a)) = parts.next() else {
        return Expr::constant(constant);
    };

    let Some((cb, b)) = parts.next() else {
        if ca == 1.0 && constant == 0.0 {
            return a;
        }
        if a.is_sum() {
            let mut acc = a;
            with_sum(&mut acc, |sum| {
                sum.scale(ca);
                sum.add_constant(constant);
            });
            return acc;
        }
        return Expr::sum(vec![(ca, a)], constant);
    };

    // the accumulator is whichever operand already is a sum
    let (mut acc, c_acc, other, c_other) = if a.is_sum() {
        (a, ca, b, cb)
    } else if b.is_sum() {
        (b, cb, a, ca)
    } else {
        return Expr::sum(vec![(ca, a), (cb, b)], constant);
    };

    with_sum(&mut acc, |sum| {
        if c_acc != 1.0 {
            sum.scale(c_acc);
        }
        match &*other {
            Expr::Sum(inner) => sum.merge(inner, c_other),
            _ => sum.append_term(c_other, Arc::clone(&other)),
        }
        sum.add_constant(constant);
    });
    acc
}

/// `factor·node`, scaling sums in place.
pub(crate) fn scale(node: NodeRef, factor: f64) -> NodeRef {
    combine(factor, Some(node), 0.0, None, 0.0)
}

pub(crate) fn negate(node: NodeRef) -> NodeRef {
    scale(node, -1.0)
}

/// `a·b`; literal factors fold or scale, anything else becomes a flat product.
pub(crate) fn multiply(a: NodeRef, b: NodeRef) -> NodeRef {
    match (a.as_const(), b.as_const()) {
        (Some(x), Some(y)) => Expr::constant(x * y),
        (Some(c), None) => scale(b, c),
        (None, Some(c)) => scale(a, c),
        (None, None) => {
            let mut children = Vec::with_capacity(2);
            for factor in [a, b] {
                if let Expr::Product(inner) = &*factor {
                    children.extend(inner.iter().cloned());
                } else {
                    children.push(factor);
                }
            }
            Expr::product(children)
        }
    }
}

/// `a / b`, rewritten as `a·(1/b)` for a literal `b` and as `a·b^-1` otherwise.
pub(crate) fn divide(a: NodeRef, b: NodeRef, position: usize) -> Result<NodeRef, DecodeError> {
    match b.as_const() {
        Some(d) if d == 0.0 => Err(DecodeError::DivisionByZero { position }),
        Some(d) => Ok(match a.as_const() {
            Some(n) => Expr::constant(n / d),
            None => scale(a, 1.0 / d),
        }),
        None => Ok(multiply(a, Expr::pow(b, -1.0))),
    }
}
