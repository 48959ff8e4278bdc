//! Function dispatch table.
//!
//! Maps a function call of the instruction stream to the node it builds. The decoder
//! resolves the argument count and the function code; this module pops the arguments,
//! picks the construction rule and pushes the result.
//!
//! Functions without a matching node kind are expressed through the ones that exist:
//! `log10`/`log2` are scaled logarithms, `sqr`/`sqrt` are powers, `min`/`max` fall back to
//! an absolute-value identity and a power with a non-literal exponent goes through
//! `exp`. Boolean connectives fold on literal operands and otherwise become an auxiliary
//! binary variable defined in the owning model.

use std::f64::consts::{LN_10, LN_2, PI};

use log::{debug, trace};

use crate::{
    errors::DecodeError,
    expr::{BinaryOp, Expr, NodeRef, UnaryOp, VarRef},
    instr::FuncCode,
    model::{BoolOperand, LogicConstraint, LogicKind, ModelAdapter},
    options::DecodeOptions,
    stack::{combine, divide, multiply, scale, OperandStack},
};

/// Function table bound to one decode call.
pub(crate) struct FunctionTable<'a, M: ?Sized> {
    options: &'a DecodeOptions,
    model: &'a mut M,
    auxiliaries: usize,
}

impl<'a, M: ModelAdapter + ?Sized> FunctionTable<'a, M> {
    pub(crate) fn new(options: &'a DecodeOptions, model: &'a mut M) -> Self {
        Self {
            options,
            model,
            auxiliaries: 0,
        }
    }

    /// Number of auxiliary variables created so far.
    pub(crate) fn auxiliaries(&self) -> usize {
        self.auxiliaries
    }

    /// Executes function `code` with `nargs` arguments taken from the stack.
    pub(crate) fn call(
        &mut self,
        stack: &mut OperandStack,
        code: i32,
        nargs: usize,
    ) -> Result<(), DecodeError> {
        let func = FuncCode::from_code(code)
            .ok_or_else(|| DecodeError::UnsupportedFunction(code.to_string()))?;
        trace!("call {func} with {nargs} arguments");

        let result = match func {
            // pi takes no operands whichever call form carries it
            FuncCode::Pi => {
                expect_arity(func, nargs, &[0, 1])?;
                Expr::constant(PI)
            }

            FuncCode::Sqr => self.power(pop_unary(stack, func, nargs)?, 2.0),
            FuncCode::Sqrt => self.power(pop_unary(stack, func, nargs)?, 0.5),
            FuncCode::Exp => self.unary(UnaryOp::Exp, pop_unary(stack, func, nargs)?),
            FuncCode::Log => self.unary(UnaryOp::Log, pop_unary(stack, func, nargs)?),
            FuncCode::Log10 => {
                let log = self.unary(UnaryOp::Log, pop_unary(stack, func, nargs)?);
                scale(log, 1.0 / LN_10)
            }
            FuncCode::Log2 => {
                let log = self.unary(UnaryOp::Log, pop_unary(stack, func, nargs)?);
                scale(log, 1.0 / LN_2)
            }
            FuncCode::Sin => self.unary(UnaryOp::Sin, pop_unary(stack, func, nargs)?),
            FuncCode::Cos => self.unary(UnaryOp::Cos, pop_unary(stack, func, nargs)?),
            FuncCode::Abs => self.unary(UnaryOp::Abs, pop_unary(stack, func, nargs)?),
            FuncCode::Entropy => self.unary(UnaryOp::Entropy, pop_unary(stack, func, nargs)?),

            FuncCode::Div => {
                let (a, b) = pop_binary(stack, func, nargs)?;
                divide(a, b, stack.position())?
            }

            FuncCode::Min | FuncCode::Max => {
                if nargs < 2 {
                    return Err(DecodeError::ArgumentCount(format!(
                        "{func} needs at least 2 arguments, called with {nargs}"
                    )));
                }
                let op = if func == FuncCode::Min {
                    BinaryOp::Min
                } else {
                    BinaryOp::Max
                };
                let mut args = stack.pop_n(nargs)?.into_iter();
                let first = args.next().ok_or_else(|| {
                    DecodeError::ArgumentCount(format!("{func} called without arguments"))
                })?;
                args.fold(first, |acc, next| self.min_max(op, acc, next))
            }

            FuncCode::Power | FuncCode::RPower | FuncCode::CvPower | FuncCode::VcPower => {
                let (base, exponent) = pop_binary(stack, func, nargs)?;
                self.general_power(base, exponent)
            }

            FuncCode::SignPower => {
                let (base, exponent) = pop_binary(stack, func, nargs)?;
                let Some(c) = exponent.as_const() else {
                    return Err(DecodeError::InvalidOperandShape(format!(
                        "signpower exponent must be a literal, got {exponent}"
                    )));
                };
                match base.as_const() {
                    Some(b) if self.options.fold_functions => {
                        Expr::constant(b.abs().powf(c).copysign(b))
                    }
                    _ => Expr::sign_pow(base, c),
                }
            }

            FuncCode::Poly => self.polynomial(stack, nargs)?,

            FuncCode::BoolNot => bool_not(pop_unary(stack, func, nargs)?)?,
            FuncCode::BoolAnd => self.connective(stack, func, nargs, LogicKind::And)?,
            FuncCode::BoolOr => self.connective(stack, func, nargs, LogicKind::Or)?,
            FuncCode::BoolXor => self.connective(stack, func, nargs, LogicKind::Xor)?,
            FuncCode::BoolImp => self.connective(stack, func, nargs, LogicKind::Implies)?,
            FuncCode::BoolEqv => self.connective(stack, func, nargs, LogicKind::Equiv)?,

            other => return Err(DecodeError::UnsupportedFunction(other.name().to_string())),
        };

        stack.push(result);
        Ok(())
    }

    fn unary(&self, op: UnaryOp, x: NodeRef) -> NodeRef {
        if self.options.fold_functions {
            if let Some(v) = x.as_const() {
                let folded = op.apply(v);
                if folded.is_finite() {
                    debug!("folded {}({v}) = {folded}", op.name());
                    return Expr::constant(folded);
                }
            }
        }
        Expr::unary(op, x)
    }

    /// `base^exponent` for a literal exponent.
    fn power(&self, base: NodeRef, exponent: f64) -> NodeRef {
        if exponent == 0.0 {
            return Expr::constant(1.0);
        }
        if exponent == 1.0 {
            return base;
        }
        if self.options.fold_functions {
            if let Some(b) = base.as_const() {
                let folded = b.powf(exponent);
                if folded.is_finite() {
                    debug!("folded {b}^{exponent} = {folded}");
                    return Expr::constant(folded);
                }
            }
        }
        Expr::pow(base, exponent)
    }

    /// Picks the cheapest rewrite of `base^exponent` for the operand shapes at hand.
    fn general_power(&self, base: NodeRef, exponent: NodeRef) -> NodeRef {
        if let Some(e) = exponent.as_const() {
            return self.power(base, e);
        }
        match base.as_const() {
            Some(b) if b == 1.0 => Expr::constant(1.0),
            Some(b) if b > 0.0 => {
                debug!("rewrite {b}^{exponent} as exp({}*{exponent})", b.ln());
                self.unary(UnaryOp::Exp, scale(exponent, b.ln()))
            }
            _ => {
                debug!("rewrite {base}^{exponent} as exp(ln({base})*{exponent})");
                let log = self.unary(UnaryOp::Log, base);
                self.unary(UnaryOp::Exp, multiply(log, exponent))
            }
        }
    }

    fn min_max(&self, op: BinaryOp, a: NodeRef, b: NodeRef) -> NodeRef {
        if let (Some(x), Some(y)) = (a.as_const(), b.as_const()) {
            return Expr::constant(op.apply(x, y));
        }
        if self.options.native_min_max {
            return Expr::binary(op, a, b);
        }

        // min(a, b) = 0.5(a + b) - 0.5|a - b|, max with a plus
        let diff = combine(1.0, Some(a.clone()), -1.0, Some(b.clone()), 0.0);
        let abs = self.unary(UnaryOp::Abs, diff);
        let mean = combine(0.5, Some(a), 0.5, Some(b), 0.0);
        let sign = match op {
            BinaryOp::Min => -0.5,
            BinaryOp::Max => 0.5,
        };
        debug!("rewrite {} through absolute value", op.name());
        combine(1.0, Some(mean), sign, Some(abs), 0.0)
    }

    /// Univariate polynomial. The stack holds the point followed by the coefficients in
    /// ascending degree; `nargs` counts both.
    fn polynomial(&self, stack: &mut OperandStack, nargs: usize) -> Result<NodeRef, DecodeError> {
        if nargs == 0 {
            return Err(DecodeError::ArgumentCount(
                "poly needs at least the evaluation point".to_string(),
            ));
        }
        let mut args = stack.pop_n(nargs)?.into_iter();
        let point = args.next().ok_or_else(|| {
            DecodeError::ArgumentCount("poly called without arguments".to_string())
        })?;
        let coefs = args
            .map(|c| {
                c.as_const().ok_or_else(|| {
                    DecodeError::InvalidOperandShape(format!(
                        "poly coefficients must be literals, got {c}"
                    ))
                })
            })
            .collect::<Result<Vec<f64>, _>>()?;

        let Some((&c0, higher)) = coefs.split_first() else {
            return Ok(Expr::constant(0.0));
        };
        let mut acc = Expr::constant(c0);
        for (k, &ck) in higher.iter().enumerate() {
            if ck == 0.0 {
                continue;
            }
            let monomial = self.power(point.clone(), (k + 1) as f64);
            acc = combine(1.0, Some(acc), ck, Some(monomial), 0.0);
        }
        Ok(acc)
    }

    fn connective(
        &mut self,
        stack: &mut OperandStack,
        func: FuncCode,
        nargs: usize,
        kind: LogicKind,
    ) -> Result<NodeRef, DecodeError> {
        let (a, b) = pop_binary(stack, func, nargs)?;
        let truth = |v: f64| v != 0.0;

        if let (Some(x), Some(y)) = (a.as_const(), b.as_const()) {
            let value = kind.apply(truth(x), truth(y));
            return Ok(Expr::constant(if value { 1.0 } else { 0.0 }));
        }

        // one literal operand
        let folded = match (kind, a.as_const(), b.as_const()) {
            (LogicKind::And, Some(x), _) => Some(if truth(x) { Ok(b.clone()) } else { Ok(zero()) }),
            (LogicKind::And, _, Some(y)) => Some(if truth(y) { Ok(a.clone()) } else { Ok(zero()) }),
            (LogicKind::Or, Some(x), _) => Some(if truth(x) { Ok(one()) } else { Ok(b.clone()) }),
            (LogicKind::Or, _, Some(y)) => Some(if truth(y) { Ok(one()) } else { Ok(a.clone()) }),
            (LogicKind::Xor, Some(x), _) => Some(if truth(x) { bool_not(b.clone()) } else { Ok(b.clone()) }),
            (LogicKind::Xor, _, Some(y)) => Some(if truth(y) { bool_not(a.clone()) } else { Ok(a.clone()) }),
            (LogicKind::Equiv, Some(x), _) => Some(if truth(x) { Ok(b.clone()) } else { bool_not(b.clone()) }),
            (LogicKind::Equiv, _, Some(y)) => Some(if truth(y) { Ok(a.clone()) } else { bool_not(a.clone()) }),
            (LogicKind::Implies, Some(x), _) => Some(if truth(x) { Ok(b.clone()) } else { Ok(one()) }),
            (LogicKind::Implies, _, Some(y)) => Some(if truth(y) { Ok(one()) } else { bool_not(a.clone()) }),
            _ => None,
        };
        if let Some(result) = folded {
            debug!("folded {func}({a}, {b})");
            return result;
        }

        let (Some((va, neg_a)), Some((vb, neg_b))) = (a.as_binary_literal(), b.as_binary_literal())
        else {
            return Err(DecodeError::InvalidOperandShape(format!(
                "{func} requires binary variables, their negations or constants, got {a} and {b}"
            )));
        };
        let operands = [
            BoolOperand { var: va.handle, negated: neg_a },
            BoolOperand { var: vb.handle, negated: neg_b },
        ];

        let name = format!("{}{}", self.options.logic_prefix, self.auxiliaries);
        self.auxiliaries += 1;
        let handle = self.model.new_binary_variable(&name)?;
        self.model.add_defining_constraint(LogicConstraint {
            kind,
            name: format!("{name}def"),
            result: handle,
            operands,
        })?;
        debug!("auxiliary {name} = x{handle} defined as {kind:?}({a}, {b})");
        Ok(Expr::var(VarRef::binary(handle)))
    }
}

fn zero() -> NodeRef {
    Expr::constant(0.0)
}

fn one() -> NodeRef {
    Expr::constant(1.0)
}

/// Negation of a literal or a binary variable, the latter as `1 - x`. Negating `1 - x`
/// gives back `x`.
fn bool_not(x: NodeRef) -> Result<NodeRef, DecodeError> {
    if let Some(v) = x.as_const() {
        return Ok(Expr::constant(if v == 0.0 { 1.0 } else { 0.0 }));
    }
    match x.as_binary_literal() {
        Some((var, true)) => Ok(Expr::var(var)),
        Some((_, false)) => Ok(combine(-1.0, Some(x), 0.0, None, 1.0)),
        None => Err(DecodeError::InvalidOperandShape(format!(
            "bool_not requires a binary variable or constant, got {x}"
        ))),
    }
}

fn expect_arity(func: FuncCode, nargs: usize, allowed: &[usize]) -> Result<(), DecodeError> {
    if allowed.contains(&nargs) {
        Ok(())
    } else {
        Err(DecodeError::ArgumentCount(format!(
            "{func} takes {} arguments, called with {nargs}",
            allowed[allowed.len() - 1]
        )))
    }
}

fn pop_unary(stack: &mut OperandStack, func: FuncCode, nargs: usize) -> Result<NodeRef, DecodeError> {
    expect_arity(func, nargs, &[1])?;
    stack.pop()
}

fn pop_binary(
    stack: &mut OperandStack,
    func: FuncCode,
    nargs: usize,
) -> Result<(NodeRef, NodeRef), DecodeError> {
    expect_arity(func, nargs, &[2])?;
    stack.pop2()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{expr::Sum, model::RecordingModel};
    use approx::assert_relative_eq;

    fn x(handle: usize) -> NodeRef {
        Expr::var(VarRef::continuous(handle))
    }

    fn bx(handle: usize) -> NodeRef {
        Expr::var(VarRef::binary(handle))
    }

    fn c(value: f64) -> NodeRef {
        Expr::constant(value)
    }

    /// Calls `func` on `args` (pushed in order) and returns the single result.
    fn run_with(
        options: &DecodeOptions,
        model: &mut RecordingModel,
        func: FuncCode,
        args: Vec<NodeRef>,
    ) -> Result<NodeRef, DecodeError> {
        let nargs = args.len();
        let mut stack = OperandStack::new();
        for arg in args {
            stack.push(arg);
        }
        let mut table = FunctionTable::new(options, model);
        table.call(&mut stack, func as i32, nargs)?;
        stack.into_root()
    }

    fn run(func: FuncCode, args: Vec<NodeRef>) -> Result<NodeRef, DecodeError> {
        run_with(&DecodeOptions::default(), &mut RecordingModel::new(10), func, args)
    }

    #[test]
    fn test_unary_functions() {
        assert!(matches!(&*run(FuncCode::Exp, vec![x(0)]).unwrap(), Expr::Unary(UnaryOp::Exp, _)));
        assert_eq!(*run(FuncCode::Sqr, vec![x(0)]).unwrap(), *Expr::pow(x(0), 2.0));
        assert_eq!(*run(FuncCode::Sqrt, vec![x(0)]).unwrap(), *Expr::pow(x(0), 0.5));

        let log10 = run(FuncCode::Log10, vec![x(0)]).unwrap();
        assert_relative_eq!(log10.eval(&[1000.0]), 3.0, epsilon = 1e-12);
        let log2 = run(FuncCode::Log2, vec![x(0)]).unwrap();
        assert_relative_eq!(log2.eval(&[8.0]), 3.0, epsilon = 1e-12);

        let ent = run(FuncCode::Entropy, vec![x(0)]).unwrap();
        assert!(matches!(&*ent, Expr::Unary(UnaryOp::Entropy, _)));
    }

    #[test]
    fn test_unary_folding() {
        assert_eq!(*run(FuncCode::Exp, vec![c(0.0)]).unwrap(), Expr::Const(1.0));
        assert_relative_eq!(run(FuncCode::Log10, vec![c(100.0)]).unwrap().as_const().unwrap(), 2.0);
        // non-finite results are not folded
        assert!(matches!(&*run(FuncCode::Log, vec![c(0.0)]).unwrap(), Expr::Unary(UnaryOp::Log, _)));

        let opts = DecodeOptions::default().with_fold_functions(false);
        let e = run_with(&opts, &mut RecordingModel::new(0), FuncCode::Exp, vec![c(0.0)]).unwrap();
        assert!(matches!(&*e, Expr::Unary(UnaryOp::Exp, _)));
    }

    #[test]
    fn test_pi_takes_no_operands() {
        let mut stack = OperandStack::new();
        stack.push(x(0));
        let opts = DecodeOptions::default();
        let mut model = RecordingModel::new(0);
        let mut table = FunctionTable::new(&opts, &mut model);
        table.call(&mut stack, FuncCode::Pi as i32, 1).unwrap();
        assert_eq!(stack.len(), 2);
        assert!(table.call(&mut stack, FuncCode::Pi as i32, 2).is_err());
    }

    #[test]
    fn test_power_with_literal_exponent() {
        let e = run(FuncCode::Power, vec![x(0), c(3.0)]).unwrap();
        assert_eq!(*e, *Expr::pow(x(0), 3.0));
        let e = run(FuncCode::VcPower, vec![x(0), c(-1.5)]).unwrap();
        assert_eq!(*e, *Expr::pow(x(0), -1.5));
        assert_eq!(*run(FuncCode::RPower, vec![x(0), c(0.0)]).unwrap(), Expr::Const(1.0));
        assert_eq!(*run(FuncCode::Power, vec![x(0), c(1.0)]).unwrap(), *x(0));
    }

    #[test]
    fn test_power_literal_folding() {
        let e = run(FuncCode::Power, vec![c(2.0), c(0.5)]).unwrap();
        assert_eq!(*e, Expr::Const(2f64.sqrt()));

        let opts = DecodeOptions::default().with_fold_functions(false);
        let e = run_with(&opts, &mut RecordingModel::new(0), FuncCode::Power, vec![c(2.0), c(0.5)])
            .unwrap();
        assert_eq!(
            *e,
            Expr::Pow {
                base: c(2.0),
                exponent: 0.5,
                signed: false
            }
        );
    }

    #[test]
    fn test_power_with_variable_exponent() {
        // 2^x0 = exp(ln 2 * x0)
        let e = run(FuncCode::CvPower, vec![c(2.0), x(0)]).unwrap();
        let Expr::Unary(UnaryOp::Exp, arg) = &*e else {
            panic!("expected exp, got {e}");
        };
        assert!(matches!(&**arg, Expr::Sum(_)));
        assert_relative_eq!(e.eval(&[3.0]), 8.0, epsilon = 1e-12);

        // x0^x1 = exp(ln x0 * x1)
        let e = run(FuncCode::Power, vec![x(0), x(1)]).unwrap();
        let Expr::Unary(UnaryOp::Exp, arg) = &*e else {
            panic!("expected exp, got {e}");
        };
        assert!(matches!(&**arg, Expr::Product(children) if children.len() == 2));
        assert_relative_eq!(e.eval(&[3.0, 2.0]), 9.0, epsilon = 1e-12);

        assert_eq!(*run(FuncCode::Power, vec![c(1.0), x(0)]).unwrap(), Expr::Const(1.0));
    }

    #[test]
    fn test_signpower() {
        let e = run(FuncCode::SignPower, vec![x(0), c(2.0)]).unwrap();
        assert_eq!(*e, *Expr::sign_pow(x(0), 2.0));
        assert_eq!(*run(FuncCode::SignPower, vec![c(-3.0), c(2.0)]).unwrap(), Expr::Const(-9.0));
        assert!(matches!(
            run(FuncCode::SignPower, vec![x(0), x(1)]),
            Err(DecodeError::InvalidOperandShape(_))
        ));
    }

    #[test]
    fn test_min_max_rewrite() {
        let min = run(FuncCode::Min, vec![x(0), x(1)]).unwrap();
        let max = run(FuncCode::Max, vec![x(0), x(1)]).unwrap();
        for (a, b) in [(1.0, 2.0), (3.0, -1.0), (-2.0, -2.0)] {
            assert_relative_eq!(min.eval(&[a, b]), a.min(b));
            assert_relative_eq!(max.eval(&[a, b]), a.max(b));
        }
        let Expr::Sum(sum) = &*min else {
            panic!("expected a sum, got {min}");
        };
        assert!(sum
            .terms
            .iter()
            .any(|(coef, t)| *coef == -0.5 && matches!(&**t, Expr::Unary(UnaryOp::Abs, _))));
    }

    #[test]
    fn test_min_max_shared_sum_operand() {
        let s = Expr::sum(vec![(2.0, x(0))], 1.0);
        let e = run(FuncCode::Max, vec![s.clone(), x(1)]).unwrap();
        assert_relative_eq!(e.eval(&[1.0, 5.0]), 5.0);
        assert_relative_eq!(e.eval(&[4.0, 5.0]), 9.0);
        assert_eq!(*s, Expr::Sum(Sum::new(vec![(2.0, x(0))], 1.0)));
    }

    #[test]
    fn test_min_max_native_and_variadic() {
        let opts = DecodeOptions::default().with_native_min_max(true);
        let mut model = RecordingModel::new(0);
        let e = run_with(&opts, &mut model, FuncCode::Min, vec![x(0), x(1), x(2)]).unwrap();
        assert_eq!(e.to_string(), "min(min(x0, x1), x2)");

        let e = run(FuncCode::Max, vec![x(0), x(1), x(2)]).unwrap();
        assert_relative_eq!(e.eval(&[1.0, 7.0, 3.0]), 7.0);
        assert_eq!(*run(FuncCode::Min, vec![c(1.0), c(2.0)]).unwrap(), Expr::Const(1.0));
        assert!(matches!(
            run(FuncCode::Min, vec![x(0)]),
            Err(DecodeError::ArgumentCount(_))
        ));
    }

    #[test]
    fn test_polynomial() {
        // 1 + 2x - 3x^2
        let e = run(FuncCode::Poly, vec![x(0), c(1.0), c(2.0), c(-3.0)]).unwrap();
        assert_relative_eq!(e.eval(&[2.0]), 1.0 + 4.0 - 12.0);
        assert!(matches!(&*e, Expr::Sum(s) if s.terms.len() == 2 && s.constant == 1.0));

        assert_eq!(*run(FuncCode::Poly, vec![x(0), c(4.0)]).unwrap(), Expr::Const(4.0));
        assert_eq!(*run(FuncCode::Poly, vec![x(0)]).unwrap(), Expr::Const(0.0));
        assert_eq!(*run(FuncCode::Poly, vec![c(2.0), c(1.0), c(1.0)]).unwrap(), Expr::Const(3.0));
        assert!(matches!(
            run(FuncCode::Poly, vec![x(0), x(1)]),
            Err(DecodeError::InvalidOperandShape(_))
        ));
    }

    #[test]
    fn test_division_function() {
        let e = run(FuncCode::Div, vec![x(0), x(1)]).unwrap();
        assert_relative_eq!(e.eval(&[3.0, 2.0]), 1.5);
        assert!(matches!(
            run(FuncCode::Div, vec![x(0), c(0.0)]),
            Err(DecodeError::DivisionByZero { .. })
        ));
    }

    #[test]
    fn test_boolean_literal_folding() {
        for kind in [
            FuncCode::BoolAnd,
            FuncCode::BoolOr,
            FuncCode::BoolXor,
            FuncCode::BoolImp,
            FuncCode::BoolEqv,
        ] {
            for a in [0.0, 1.0] {
                for b in [0.0, 1.0] {
                    let expected = match kind {
                        FuncCode::BoolAnd => LogicKind::And,
                        FuncCode::BoolOr => LogicKind::Or,
                        FuncCode::BoolXor => LogicKind::Xor,
                        FuncCode::BoolImp => LogicKind::Implies,
                        _ => LogicKind::Equiv,
                    }
                    .apply(a != 0.0, b != 0.0);
                    let e = run(kind, vec![c(a), c(b)]).unwrap();
                    assert_eq!(e.as_const(), Some(if expected { 1.0 } else { 0.0 }), "{kind}");
                }
            }
        }
        assert_eq!(*run(FuncCode::BoolNot, vec![c(0.0)]).unwrap(), Expr::Const(1.0));
        assert_eq!(*run(FuncCode::BoolNot, vec![c(2.0)]).unwrap(), Expr::Const(0.0));
    }

    #[test]
    fn test_boolean_short_circuit_without_auxiliary() {
        let mut model = RecordingModel::new(10);
        let opts = DecodeOptions::default();

        // 0 AND y = 0 for any y, even a non-binary one
        let e = run_with(&opts, &mut model, FuncCode::BoolAnd, vec![c(0.0), x(3)]).unwrap();
        assert_eq!(*e, Expr::Const(0.0));
        let e = run_with(&opts, &mut model, FuncCode::BoolAnd, vec![bx(1), c(1.0)]).unwrap();
        assert_eq!(*e, *bx(1));
        let e = run_with(&opts, &mut model, FuncCode::BoolOr, vec![bx(1), c(1.0)]).unwrap();
        assert_eq!(*e, Expr::Const(1.0));
        let e = run_with(&opts, &mut model, FuncCode::BoolOr, vec![c(0.0), bx(2)]).unwrap();
        assert_eq!(*e, *bx(2));

        // 1 XOR y = NOT y = 1 - y
        let e = run_with(&opts, &mut model, FuncCode::BoolXor, vec![c(1.0), bx(2)]).unwrap();
        assert_eq!(e.eval(&[0.0, 0.0, 1.0]), 0.0);
        assert_eq!(e.eval(&[0.0, 0.0, 0.0]), 1.0);

        // a IMP 0 = NOT a
        let e = run_with(&opts, &mut model, FuncCode::BoolImp, vec![bx(0), c(0.0)]).unwrap();
        assert_eq!(e.eval(&[1.0]), 0.0);
        let e = run_with(&opts, &mut model, FuncCode::BoolImp, vec![c(0.0), bx(0)]).unwrap();
        assert_eq!(*e, Expr::Const(1.0));

        // 0 EQV y = NOT y
        let e = run_with(&opts, &mut model, FuncCode::BoolEqv, vec![c(0.0), bx(1)]).unwrap();
        assert_eq!(e.eval(&[0.0, 1.0]), 0.0);

        assert!(model.variables.is_empty());
        assert!(model.constraints.is_empty());
    }

    #[test]
    fn test_boolean_auxiliary_allocation() {
        let mut model = RecordingModel::new(10);
        let opts = DecodeOptions::default();
        let e = run_with(&opts, &mut model, FuncCode::BoolAnd, vec![bx(0), bx(1)]).unwrap();
        assert_eq!(*e, *bx(10));
        assert_eq!(model.variables, vec![(10, "_logic0".to_string())]);
        assert_eq!(model.constraints.len(), 1);
        let cons = &model.constraints[0];
        assert_eq!(cons.kind, LogicKind::And);
        assert_eq!(cons.name, "_logic0def");
        assert_eq!(cons.operands, [BoolOperand::positive(0), BoolOperand::positive(1)]);
    }

    #[test]
    fn test_negated_binary_operands() {
        let opts = DecodeOptions::default();
        let not_x0 = Expr::sum(vec![(-1.0, bx(0))], 1.0);

        // NOT(NOT x0) = x0
        let mut model = RecordingModel::new(10);
        let e = run_with(&opts, &mut model, FuncCode::BoolNot, vec![not_x0.clone()]).unwrap();
        assert_eq!(*e, *bx(0));

        // (NOT x0) AND x1 needs one auxiliary over a complemented operand
        let e = run_with(&opts, &mut model, FuncCode::BoolAnd, vec![not_x0, bx(1)]).unwrap();
        assert_eq!(*e, *bx(10));
        assert_eq!(
            model.constraints[0].operands,
            [BoolOperand::negated(0), BoolOperand::positive(1)]
        );
        for (a, b) in [(0.0, 0.0), (0.0, 1.0), (1.0, 0.0), (1.0, 1.0)] {
            let expected = if a == 0.0 && b == 1.0 { 1.0 } else { 0.0 };
            for r in [0.0, 1.0] {
                let mut point = vec![0.0; 11];
                point[0] = a;
                point[1] = b;
                point[10] = r;
                let feasible = model.linear_rows().iter().all(|row| row.is_satisfied(&point));
                assert_eq!(feasible, r == expected, "a={a} b={b} r={r}");
            }
        }
    }

    #[test]
    fn test_folded_negation_feeds_next_connective() {
        // (1 XOR x0) OR x1
        let opts = DecodeOptions::default();
        let mut model = RecordingModel::new(2);
        let mut stack = OperandStack::new();
        let mut table = FunctionTable::new(&opts, &mut model);
        stack.push(c(1.0));
        stack.push(bx(0));
        table.call(&mut stack, FuncCode::BoolXor as i32, 2).unwrap();
        assert_eq!(table.auxiliaries(), 0);
        stack.push(bx(1));
        table.call(&mut stack, FuncCode::BoolOr as i32, 2).unwrap();
        assert_eq!(table.auxiliaries(), 1);
        assert_eq!(*stack.into_root().unwrap(), *bx(2));

        let cons = &model.constraints[0];
        assert_eq!(cons.kind, LogicKind::Or);
        assert_eq!(cons.operands, [BoolOperand::negated(0), BoolOperand::positive(1)]);
    }

    #[test]
    fn test_auxiliary_names_count_per_table() {
        let mut model = RecordingModel::new(5);
        let opts = DecodeOptions::default().with_logic_prefix("b_");
        let mut stack = OperandStack::new();
        let mut table = FunctionTable::new(&opts, &mut model);
        for _ in 0..2 {
            stack.push(bx(0));
            stack.push(bx(1));
            table.call(&mut stack, FuncCode::BoolOr as i32, 2).unwrap();
        }
        assert_eq!(table.auxiliaries(), 2);
        assert_eq!(model.variables[1], (6, "b_1".to_string()));
        assert_eq!(model.constraints[1].name, "b_1def");
    }

    #[test]
    fn test_boolean_invalid_operands() {
        assert!(matches!(
            run(FuncCode::BoolAnd, vec![x(0), bx(1)]),
            Err(DecodeError::InvalidOperandShape(_))
        ));
        assert!(matches!(
            run(FuncCode::BoolNot, vec![x(0)]),
            Err(DecodeError::InvalidOperandShape(_))
        ));
        assert!(matches!(
            run(FuncCode::BoolXor, vec![c(1.0), x(0)]),
            Err(DecodeError::InvalidOperandShape(_))
        ));
    }

    #[test]
    fn test_model_refusal_propagates() {
        let mut model = RecordingModel::new(0).with_limit(0);
        let e = run_with(&DecodeOptions::default(), &mut model, FuncCode::BoolAnd, vec![bx(0), bx(1)]);
        assert!(matches!(e, Err(DecodeError::Model(_))));
    }

    #[test]
    fn test_unsupported_and_arity() {
        assert!(matches!(
            run(FuncCode::Ceil, vec![x(0)]),
            Err(DecodeError::UnsupportedFunction(name)) if name == "ceil"
        ));
        let mut stack = OperandStack::new();
        stack.push(x(0));
        let opts = DecodeOptions::default();
        let mut model = RecordingModel::new(0);
        let mut table = FunctionTable::new(&opts, &mut model);
        assert!(matches!(
            table.call(&mut stack, 500, 1),
            Err(DecodeError::UnsupportedFunction(code)) if code == "500"
        ));
        assert!(matches!(
            table.call(&mut stack, FuncCode::Exp as i32, 2),
            Err(DecodeError::ArgumentCount(_))
        ));
        assert!(matches!(
            table.call(&mut stack, FuncCode::Power as i32, 2),
            Err(DecodeError::StackUnderflow { .. })
        ));
    }
}
