//! Expression module for representing decoded nonlinear expressions.
//!
//! This module defines the node model the decoder builds and the JIT consumes:
//!
//! - `Expr`: An enum representing the different kinds of expression nodes
//! - `NodeRef`: A shared, reference-counted handle to a node
//! - `Sum`: The linear node `c0 + Σ ci·ti`, the only node that is grown in place
//! - `VarRef`: A solver variable handle plus its integrality flag
//!
//! Nodes are created bottom-up. Sub-expressions may be shared by several parents
//! (e.g. both halves of a min/max rewrite reference the same operands), which is why
//! children are held through `Arc`. A `Sum` that is still uniquely owned is extended
//! through `Arc::make_mut`, so repeated additions keep one flat linear node instead of
//! nesting; once a `Sum` is shared, `make_mut` copies it first and the other parents
//! keep seeing the old value.
//!
//! # Expression Tree Structure
//! - Leaf nodes: Constants and Variables
//! - Linear node: Sum with per-term coefficients and a constant
//! - Product of any number of factors
//! - Power with a literal exponent, optionally signed (`sign(x)·|x|^c`)
//! - Unary functions: exp, ln, sin, cos, abs, entropy
//! - Binary functions: min, max
//!
//! Trees can be evaluated directly with [`Expr::eval`] or flattened into a linear
//! stack program ([`Expr::flatten`]) that the JIT compiles.

use std::fmt;
use std::sync::Arc;

use itertools::Itertools;

/// Solver-side variable handle. Trees index evaluation inputs by this handle.
pub type VarHandle = usize;

/// Shared ownership handle of an expression node.
pub type NodeRef = Arc<Expr>;

/// Represents a reference to a solver variable in an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarRef {
    pub handle: VarHandle,
    /// Whether the variable is restricted to {0, 1}
    pub binary: bool,
}

impl VarRef {
    pub fn continuous(handle: VarHandle) -> Self {
        Self {
            handle,
            binary: false,
        }
    }

    pub fn binary(handle: VarHandle) -> Self {
        Self {
            handle,
            binary: true,
        }
    }
}

/// Named univariate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Exp,
    Log,
    Sin,
    Cos,
    Abs,
    /// `-x·ln(x)`, continued by 0 at 0
    Entropy,
}

impl UnaryOp {
    pub fn apply(self, x: f64) -> f64 {
        match self {
            UnaryOp::Exp => x.exp(),
            UnaryOp::Log => x.ln(),
            UnaryOp::Sin => x.sin(),
            UnaryOp::Cos => x.cos(),
            UnaryOp::Abs => x.abs(),
            UnaryOp::Entropy => {
                if x == 0.0 {
                    0.0
                } else {
                    -x * x.ln()
                }
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Exp => "exp",
            UnaryOp::Log => "ln",
            UnaryOp::Sin => "sin",
            UnaryOp::Cos => "cos",
            UnaryOp::Abs => "abs",
            UnaryOp::Entropy => "entropy",
        }
    }
}

/// Named bivariate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Min,
    Max,
}

impl BinaryOp {
    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Min => a.min(b),
            BinaryOp::Max => a.max(b),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Min => "min",
            BinaryOp::Max => "max",
        }
    }
}

/// Linear node `constant + Σ coef·term`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sum {
    pub terms: Vec<(f64, NodeRef)>,
    pub constant: f64,
}

impl Sum {
    pub fn new(terms: Vec<(f64, NodeRef)>, constant: f64) -> Self {
        Self { terms, constant }
    }

    pub fn append_term(&mut self, coef: f64, term: NodeRef) {
        self.terms.push((coef, term));
    }

    pub fn add_constant(&mut self, value: f64) {
        self.constant += value;
    }

    /// Multiplies every coefficient and the constant by `factor`.
    pub fn scale(&mut self, factor: f64) {
        for (coef, _) in &mut self.terms {
            *coef *= factor;
        }
        self.constant *= factor;
    }

    /// Moves the terms and constant of `other`, scaled by `factor`, into `self`.
    pub fn merge(&mut self, other: &Sum, factor: f64) {
        self.terms.extend(
            other
                .terms
                .iter()
                .map(|(coef, term)| (coef * factor, Arc::clone(term))),
        );
        self.constant += factor * other.constant;
    }
}

/// An expression tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A constant floating point value
    Const(f64),
    /// A reference to a solver variable
    Var(VarRef),
    /// Linear combination of children plus a constant
    Sum(Sum),
    /// Product of all children
    Product(Vec<NodeRef>),
    /// `base^exponent`, or `sign(base)·|base|^exponent` when `signed`
    Pow {
        base: NodeRef,
        exponent: f64,
        signed: bool,
    },
    /// Univariate function application
    Unary(UnaryOp, NodeRef),
    /// Bivariate function application
    Binary(BinaryOp, NodeRef, NodeRef),
}

/// Linear operation of a flattened expression.
#[derive(Debug, Clone, PartialEq)]
pub enum LinearOp {
    /// Load constant value
    LoadConst(f64),
    /// Load variable by handle
    LoadVar(VarHandle),
    /// Add the two topmost values
    Add,
    /// Multiply the two topmost values
    Mul,
    /// Negate stack top
    Neg,
    /// Integer power of stack top
    PowInt(i32),
    /// Real power of stack top
    PowFloat(f64),
    /// Signed real power of stack top
    SignPow(f64),
    /// Unary function of stack top
    Unary(UnaryOp),
    /// Binary function of the two topmost values
    Binary(BinaryOp),
    /// `acc + a·b` with stack `[acc, a, b]`
    Fma,
}

/// Flattened expression representation for code generation.
#[derive(Debug, Clone, PartialEq)]
pub struct FlattenedExpr {
    /// Linear sequence of operations
    pub ops: Vec<LinearOp>,
    /// Maximum variable handle accessed
    pub max_var_index: Option<VarHandle>,
    /// Pre-computed result if the expression is a literal
    pub constant_result: Option<f64>,
}

/// Integer exponents up to this magnitude are expanded into multiplications.
const MAX_INLINE_POWER: f64 = 64.0;

impl Expr {
    pub fn var(var: VarRef) -> NodeRef {
        Arc::new(Expr::Var(var))
    }

    pub fn constant(value: f64) -> NodeRef {
        Arc::new(Expr::Const(value))
    }

    pub fn unary(op: UnaryOp, child: NodeRef) -> NodeRef {
        Arc::new(Expr::Unary(op, child))
    }

    pub fn binary(op: BinaryOp, a: NodeRef, b: NodeRef) -> NodeRef {
        Arc::new(Expr::Binary(op, a, b))
    }

    pub fn pow(base: NodeRef, exponent: f64) -> NodeRef {
        Arc::new(Expr::Pow {
            base,
            exponent,
            signed: false,
        })
    }

    pub fn sign_pow(base: NodeRef, exponent: f64) -> NodeRef {
        Arc::new(Expr::Pow {
            base,
            exponent,
            signed: true,
        })
    }

    pub fn sum(terms: Vec<(f64, NodeRef)>, constant: f64) -> NodeRef {
        Arc::new(Expr::Sum(Sum::new(terms, constant)))
    }

    pub fn product(children: Vec<NodeRef>) -> NodeRef {
        Arc::new(Expr::Product(children))
    }

    /// Returns the literal value if this node is a constant.
    pub fn as_const(&self) -> Option<f64> {
        match self {
            Expr::Const(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the variable if this node is a bare binary variable.
    pub fn as_binary_var(&self) -> Option<VarRef> {
        match self {
            Expr::Var(v) if v.binary => Some(*v),
            _ => None,
        }
    }

    /// Returns the binary variable behind this node and whether it is complemented:
    /// a bare binary `x` gives `(x, false)`, the linear node `1 - x` gives `(x, true)`.
    pub fn as_binary_literal(&self) -> Option<(VarRef, bool)> {
        match self {
            Expr::Var(v) if v.binary => Some((*v, false)),
            Expr::Sum(sum) if sum.constant == 1.0 => match sum.terms.as_slice() {
                [(coef, term)] if *coef == -1.0 => term.as_binary_var().map(|v| (v, true)),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn is_sum(&self) -> bool {
        matches!(self, Expr::Sum(_))
    }

    /// Returns the number of inputs needed to evaluate the expression (max handle + 1).
    pub fn n_vars(&self) -> usize {
        self.max_var_handle().map_or(0, |h| h + 1)
    }

    fn max_var_handle(&self) -> Option<VarHandle> {
        match self {
            Expr::Const(_) => None,
            Expr::Var(v) => Some(v.handle),
            Expr::Sum(sum) => sum
                .terms
                .iter()
                .filter_map(|(_, t)| t.max_var_handle())
                .max(),
            Expr::Product(children) => children.iter().filter_map(|c| c.max_var_handle()).max(),
            Expr::Pow { base, .. } => base.max_var_handle(),
            Expr::Unary(_, child) => child.max_var_handle(),
            Expr::Binary(_, a, b) => a.max_var_handle().max(b.max_var_handle()),
        }
    }

    /// Evaluates the tree at `values`, indexed by variable handle.
    ///
    /// # Panics
    /// Panics if a variable handle is out of bounds for `values`.
    pub fn eval(&self, values: &[f64]) -> f64 {
        match self {
            Expr::Const(v) => *v,
            Expr::Var(v) => values[v.handle],
            Expr::Sum(sum) => sum
                .terms
                .iter()
                .fold(sum.constant, |acc, (coef, term)| {
                    acc + coef * term.eval(values)
                }),
            Expr::Product(children) => children.iter().map(|c| c.eval(values)).product(),
            Expr::Pow {
                base,
                exponent,
                signed,
            } => {
                let b = base.eval(values);
                if *signed {
                    b.abs().powf(*exponent).copysign(b)
                } else {
                    b.powf(*exponent)
                }
            }
            Expr::Unary(op, child) => op.apply(child.eval(values)),
            Expr::Binary(op, a, b) => op.apply(a.eval(values), b.eval(values)),
        }
    }

    /// Flattens the tree into a linear sequence of stack operations.
    ///
    /// Shared sub-expressions are emitted once per parent.
    pub fn flatten(&self) -> FlattenedExpr {
        if let Some(constant) = self.as_const() {
            return FlattenedExpr {
                ops: vec![LinearOp::LoadConst(constant)],
                max_var_index: None,
                constant_result: Some(constant),
            };
        }

        let mut ops = Vec::new();
        let mut max_var_index = None;
        self.flatten_recursive(&mut ops, &mut max_var_index);

        FlattenedExpr {
            ops,
            max_var_index,
            constant_result: None,
        }
    }

    fn flatten_recursive(&self, ops: &mut Vec<LinearOp>, max_var_index: &mut Option<VarHandle>) {
        match self {
            Expr::Const(val) => ops.push(LinearOp::LoadConst(*val)),

            Expr::Var(var) => {
                let index = var.handle;
                *max_var_index = Some(max_var_index.map_or(index, |m| m.max(index)));
                ops.push(LinearOp::LoadVar(index));
            }

            Expr::Sum(sum) => {
                for (i, (coef, term)) in sum.terms.iter().enumerate() {
                    term.flatten_recursive(ops, max_var_index);
                    if *coef == -1.0 {
                        ops.push(LinearOp::Neg);
                    } else if *coef != 1.0 {
                        ops.push(LinearOp::LoadConst(*coef));
                        ops.push(LinearOp::Mul);
                    }
                    if i > 0 {
                        ops.push(LinearOp::Add);
                    }
                }
                if sum.terms.is_empty() {
                    ops.push(LinearOp::LoadConst(sum.constant));
                } else if sum.constant != 0.0 {
                    ops.push(LinearOp::LoadConst(sum.constant));
                    ops.push(LinearOp::Add);
                }
            }

            Expr::Product(children) => {
                for (i, child) in children.iter().enumerate() {
                    child.flatten_recursive(ops, max_var_index);
                    if i > 0 {
                        ops.push(LinearOp::Mul);
                    }
                }
                if children.is_empty() {
                    ops.push(LinearOp::LoadConst(1.0));
                }
            }

            Expr::Pow {
                base,
                exponent,
                signed,
            } => {
                base.flatten_recursive(ops, max_var_index);
                if *signed {
                    ops.push(LinearOp::SignPow(*exponent));
                } else if exponent.fract() == 0.0 && exponent.abs() <= MAX_INLINE_POWER {
                    ops.push(LinearOp::PowInt(*exponent as i32));
                } else {
                    ops.push(LinearOp::PowFloat(*exponent));
                }
            }

            Expr::Unary(op, child) => {
                child.flatten_recursive(ops, max_var_index);
                ops.push(LinearOp::Unary(*op));
            }

            Expr::Binary(op, a, b) => {
                a.flatten_recursive(ops, max_var_index);
                b.flatten_recursive(ops, max_var_index);
                ops.push(LinearOp::Binary(*op));
            }
        }
    }
}

/// Implements string formatting for expressions in infix notation.
///
/// Variables print as `x<handle>`, coefficients of 1 are omitted, absolute values use
/// `|x|` and signed powers print as `signpow(x, c)`.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(val) => write!(f, "{val}"),
            Expr::Var(var) => write!(f, "x{}", var.handle),
            Expr::Sum(sum) => {
                let terms = sum.terms.iter().map(|(coef, term)| {
                    if *coef == 1.0 {
                        format!("{term}")
                    } else if *coef == -1.0 {
                        format!("-{term}")
                    } else {
                        format!("{coef}*{term}")
                    }
                });
                let mut parts: Vec<String> = terms.collect();
                if sum.constant != 0.0 || parts.is_empty() {
                    parts.push(format!("{}", sum.constant));
                }
                write!(f, "({})", parts.iter().join(" + "))
            }
            Expr::Product(children) => write!(f, "({})", children.iter().join(" * ")),
            Expr::Pow {
                base,
                exponent,
                signed: false,
            } => write!(f, "({base}^{exponent})"),
            Expr::Pow {
                base,
                exponent,
                signed: true,
            } => write!(f, "signpow({base}, {exponent})"),
            Expr::Unary(UnaryOp::Abs, child) => write!(f, "|{child}|"),
            Expr::Unary(op, child) => write!(f, "{}({child})", op.name()),
            Expr::Binary(op, a, b) => write!(f, "{}({a}, {b})", op.name()),
        }
    }
}
