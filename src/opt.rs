//! Peephole optimiser for the flattened stack program.
//!
//! Pass pipeline
//! -------------
//!  1. **fold_consts**   – evaluate operations whose operands are all literals.
//!  2. **drop_neutral**  – remove `·1` and `+0` pairs.
//!  3. **fuse_fma**      – turn a `Mul` immediately followed by `Add` into `Fma`.
//!
//! The pipeline is repeated until the program stops shrinking. The passes only touch
//! the op vector; they need no Cranelift types, so they are tested on plain data.

use crate::expr::{FlattenedExpr, LinearOp};

/// Run all optimisation passes until nothing changes.
pub fn optimize(flattened: FlattenedExpr) -> FlattenedExpr {
    let mut ops = flattened.ops;
    loop {
        let len_before = ops.len();
        ops = fold_consts(ops);
        ops = drop_neutral(ops);
        ops = fuse_fma(ops);
        if ops.len() == len_before {
            break;
        }
    }

    let constant_result = match ops.as_slice() {
        [LinearOp::LoadConst(c)] => Some(*c),
        _ => flattened.constant_result,
    };
    FlattenedExpr {
        ops,
        constant_result,
        ..flattened
    }
}

/// Number of operands an op pops.
fn arity(op: &LinearOp) -> usize {
    match op {
        LinearOp::LoadConst(_) | LinearOp::LoadVar(_) => 0,
        LinearOp::Neg
        | LinearOp::PowInt(_)
        | LinearOp::PowFloat(_)
        | LinearOp::SignPow(_)
        | LinearOp::Unary(_) => 1,
        LinearOp::Add | LinearOp::Mul | LinearOp::Binary(_) => 2,
        LinearOp::Fma => 3,
    }
}

/// Value of `op` applied to literal operands, in stack order.
fn evaluate(op: &LinearOp, args: &[f64]) -> Option<f64> {
    let value = match (op, args) {
        (LinearOp::Neg, [x]) => -x,
        (LinearOp::PowInt(n), [x]) => x.powi(*n),
        (LinearOp::PowFloat(e), [x]) => x.powf(*e),
        (LinearOp::SignPow(e), [x]) => x.abs().powf(*e).copysign(*x),
        (LinearOp::Unary(u), [x]) => u.apply(*x),
        (LinearOp::Add, [a, b]) => a + b,
        (LinearOp::Mul, [a, b]) => a * b,
        (LinearOp::Binary(b), [x, y]) => b.apply(*x, *y),
        (LinearOp::Fma, [acc, a, b]) => a.mul_add(*b, *acc),
        _ => return None,
    };
    value.is_finite().then_some(value)
}

// ────────────────────────────────────────────────────────────────────────────
//  Pass 1 – constant folding
// ────────────────────────────────────────────────────────────────────────────
fn fold_consts(ops: Vec<LinearOp>) -> Vec<LinearOp> {
    // `known` mirrors the runtime stack: Some for compile-time literals. A literal on
    // the stack always comes from exactly one trailing `LoadConst` in `out`.
    let mut out: Vec<LinearOp> = Vec::with_capacity(ops.len());
    let mut known: Vec<Option<f64>> = Vec::with_capacity(8);

    for op in ops {
        let n = arity(&op);
        if n == 0 {
            known.push(match op {
                LinearOp::LoadConst(c) => Some(c),
                _ => None,
            });
            out.push(op);
            continue;
        }

        let split = known.len().saturating_sub(n);
        let args: Option<Vec<f64>> = known[split..].iter().copied().collect();
        let folded = match args {
            Some(args) if args.len() == n => evaluate(&op, &args),
            _ => None,
        };
        known.truncate(split);
        match folded {
            Some(value) => {
                out.truncate(out.len() - n);
                out.push(LinearOp::LoadConst(value));
                known.push(Some(value));
            }
            None => {
                out.push(op);
                known.push(None);
            }
        }
    }
    out
}

// ────────────────────────────────────────────────────────────────────────────
//  Pass 2 – neutral elements
// ────────────────────────────────────────────────────────────────────────────
fn drop_neutral(ops: Vec<LinearOp>) -> Vec<LinearOp> {
    let mut out: Vec<LinearOp> = Vec::with_capacity(ops.len());
    let mut i = 0;
    while i < ops.len() {
        match (&ops[i], ops.get(i + 1)) {
            (LinearOp::LoadConst(c), Some(LinearOp::Mul)) if *c == 1.0 && !out.is_empty() => {
                i += 2;
            }
            (LinearOp::LoadConst(c), Some(LinearOp::Add)) if *c == 0.0 && !out.is_empty() => {
                i += 2;
            }
            (op, _) => {
                out.push(op.clone());
                i += 1;
            }
        }
    }
    out
}

// ────────────────────────────────────────────────────────────────────────────
//  Pass 3 – FMA fusion
// ────────────────────────────────────────────────────────────────────────────
fn fuse_fma(ops: Vec<LinearOp>) -> Vec<LinearOp> {
    let mut out = Vec::with_capacity(ops.len());
    let mut i = 0;
    while i < ops.len() {
        // [acc, a, b] Mul Add  ==  [acc, a, b] Fma
        if matches!((&ops[i], ops.get(i + 1)), (LinearOp::Mul, Some(LinearOp::Add))) {
            out.push(LinearOp::Fma);
            i += 2;
            continue;
        }
        out.push(ops[i].clone());
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::LinearOp::*;
    use crate::expr::{Expr, NodeRef, UnaryOp, VarRef};

    fn x(handle: usize) -> NodeRef {
        Expr::var(VarRef::continuous(handle))
    }

    /// Reference interpreter for flattened programs.
    fn run(point: &[f64], program: &[LinearOp]) -> f64 {
        let mut stack: Vec<f64> = Vec::new();
        for op in program {
            let value = match op {
                LoadConst(c) => *c,
                LoadVar(i) => point[*i],
                other => {
                    let args = stack.split_off(stack.len() - arity(other));
                    evaluate(other, &args).unwrap_or(f64::NAN)
                }
            };
            stack.push(value);
        }
        assert_eq!(stack.len(), 1);
        stack[0]
    }

    #[test]
    fn test_fold_consts() {
        let ops = vec![LoadConst(2.0), LoadConst(3.0), Mul, LoadVar(0), Add];
        assert_eq!(fold_consts(ops), vec![LoadConst(6.0), LoadVar(0), Add]);

        let ops = vec![LoadVar(0), LoadConst(0.0), Unary(UnaryOp::Exp), Mul];
        assert_eq!(fold_consts(ops), vec![LoadVar(0), LoadConst(1.0), Mul]);

        // non-finite results stay in the program
        let ops = vec![LoadConst(0.0), Unary(UnaryOp::Log)];
        assert_eq!(fold_consts(ops.clone()), ops);
    }

    #[test]
    fn test_drop_neutral() {
        let ops = vec![LoadVar(0), LoadConst(1.0), Mul, LoadConst(0.0), Add];
        assert_eq!(drop_neutral(ops), vec![LoadVar(0)]);
    }

    #[test]
    fn test_fuse_fma() {
        // x0 + 3*x1
        let ops = vec![LoadVar(0), LoadVar(1), LoadConst(3.0), Mul, Add];
        assert_eq!(fuse_fma(ops), vec![LoadVar(0), LoadVar(1), LoadConst(3.0), Fma]);
    }

    #[test]
    fn test_optimize_preserves_value() {
        let e = Expr::sum(
            vec![
                (3.0, x(0)),
                (-2.0, Expr::pow(x(1), 2.0)),
                (0.5, Expr::product(vec![x(0), x(1)])),
            ],
            1.0,
        );
        let flat = e.flatten();
        let optimized = optimize(flat.clone());
        assert!(optimized.ops.len() < flat.ops.len());
        assert!(optimized.ops.contains(&Fma));
        let point = [1.5, -2.0];
        let expected = e.eval(&point);
        assert!((run(&point, &flat.ops) - expected).abs() < 1e-12);
        assert!((run(&point, &optimized.ops) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_optimize_to_constant() {
        let flat = FlattenedExpr {
            ops: vec![LoadConst(2.0), PowInt(3), LoadConst(1.0), Add],
            max_var_index: None,
            constant_result: None,
        };
        let optimized = optimize(flat);
        assert_eq!(optimized.ops, vec![LoadConst(9.0)]);
        assert_eq!(optimized.constant_result, Some(9.0));
    }
}
