//! Model capability adapter.
//!
//! Boolean connectives over binary variables cannot be expressed as a plain expression
//! node; the decoder lowers them into a fresh binary variable plus a defining constraint
//! in the owning model. [`ModelAdapter`] is the only way the decoder reaches outside the
//! tree it builds.

use crate::{errors::ModelError, expr::VarHandle};

/// Logical relation between the auxiliary variable and its operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicKind {
    /// `result = a ∧ b`
    And,
    /// `result = a ∨ b`
    Or,
    /// `result = a ⊕ b`
    Xor,
    /// `result = (a ⇔ b)`
    Equiv,
    /// `result = (a ⇒ b)`
    Implies,
}

impl LogicKind {
    /// Truth table of the connective.
    pub fn apply(self, a: bool, b: bool) -> bool {
        match self {
            LogicKind::And => a && b,
            LogicKind::Or => a || b,
            LogicKind::Xor => a ^ b,
            LogicKind::Equiv => a == b,
            LogicKind::Implies => !a || b,
        }
    }
}

/// A binary variable as it enters a connective, either as is or complemented (`1 - x`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoolOperand {
    pub var: VarHandle,
    pub negated: bool,
}

impl BoolOperand {
    pub fn positive(var: VarHandle) -> Self {
        Self {
            var,
            negated: false,
        }
    }

    pub fn negated(var: VarHandle) -> Self {
        Self { var, negated: true }
    }
}

/// A constraint defining an auxiliary binary variable.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicConstraint {
    pub kind: LogicKind,
    pub name: String,
    pub result: VarHandle,
    /// The two operands `[a, b]`, in source order
    pub operands: [BoolOperand; 2],
}

/// Relation of a linear row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sense {
    LessEqual,
    GreaterEqual,
}

/// Linear inequality `Σ coef·x  sense  rhs`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearRow {
    pub coefs: Vec<(VarHandle, f64)>,
    pub sense: Sense,
    pub rhs: f64,
}

impl LinearRow {
    /// Checks the row at a point indexed by variable handle.
    pub fn is_satisfied(&self, values: &[f64]) -> bool {
        let lhs: f64 = self.coefs.iter().map(|&(j, c)| c * values[j]).sum();
        match self.sense {
            Sense::LessEqual => lhs <= self.rhs,
            Sense::GreaterEqual => lhs >= self.rhs,
        }
    }
}

impl LogicConstraint {
    /// Standard mixed-integer linear encoding of the constraint, valid when the result
    /// and both operands are binary. A negated operand `x` enters every row as `1 - x`.
    pub fn linearize(&self) -> Vec<LinearRow> {
        use Sense::{GreaterEqual as Ge, LessEqual as Le};

        // (coef of result, coef of a, coef of b, sense, rhs) over the operand literals
        let rows: &[(f64, f64, f64, Sense, f64)] = match self.kind {
            LogicKind::And => &[
                (1.0, -1.0, 0.0, Le, 0.0),
                (1.0, 0.0, -1.0, Le, 0.0),
                (1.0, -1.0, -1.0, Ge, -1.0),
            ],
            LogicKind::Or => &[
                (1.0, -1.0, 0.0, Ge, 0.0),
                (1.0, 0.0, -1.0, Ge, 0.0),
                (1.0, -1.0, -1.0, Le, 0.0),
            ],
            LogicKind::Xor => &[
                (1.0, -1.0, 1.0, Ge, 0.0),
                (1.0, 1.0, -1.0, Ge, 0.0),
                (1.0, -1.0, -1.0, Le, 0.0),
                (1.0, 1.0, 1.0, Le, 2.0),
            ],
            LogicKind::Equiv => &[
                (1.0, 1.0, 1.0, Ge, 1.0),
                (1.0, -1.0, -1.0, Ge, -1.0),
                (1.0, -1.0, 1.0, Le, 1.0),
                (1.0, 1.0, -1.0, Le, 1.0),
            ],
            LogicKind::Implies => &[
                (1.0, 0.0, -1.0, Ge, 0.0),
                (1.0, 1.0, 0.0, Ge, 1.0),
                (1.0, 1.0, -1.0, Le, 1.0),
            ],
        };

        rows.iter()
            .map(|&(cr, ca, cb, sense, rhs)| {
                let mut coefs = vec![(self.result, cr)];
                let mut rhs = rhs;
                for (operand, c) in self.operands.iter().zip([ca, cb]) {
                    if c == 0.0 {
                        continue;
                    }
                    if operand.negated {
                        // c*(1 - x) = c - c*x
                        coefs.push((operand.var, -c));
                        rhs -= c;
                    } else {
                        coefs.push((operand.var, c));
                    }
                }
                LinearRow { coefs, sense, rhs }
            })
            .collect()
    }
}

/// Callback surface into the owning model.
pub trait ModelAdapter {
    /// Creates a fresh binary variable and returns its solver handle.
    fn new_binary_variable(&mut self, name_hint: &str) -> Result<VarHandle, ModelError>;

    /// Registers a constraint defining an auxiliary variable.
    fn add_defining_constraint(&mut self, constraint: LogicConstraint) -> Result<(), ModelError>;
}

impl<M: ModelAdapter + ?Sized> ModelAdapter for &mut M {
    fn new_binary_variable(&mut self, name_hint: &str) -> Result<VarHandle, ModelError> {
        (**self).new_binary_variable(name_hint)
    }

    fn add_defining_constraint(&mut self, constraint: LogicConstraint) -> Result<(), ModelError> {
        (**self).add_defining_constraint(constraint)
    }
}

/// In-memory model that hands out consecutive handles and records what it was asked for.
#[derive(Debug, Clone, Default)]
pub struct RecordingModel {
    next_handle: VarHandle,
    limit: Option<usize>,
    pub variables: Vec<(VarHandle, String)>,
    pub constraints: Vec<LogicConstraint>,
}

impl RecordingModel {
    /// New model whose first auxiliary variable gets handle `first_handle`, typically
    /// the number of original model columns.
    pub fn new(first_handle: VarHandle) -> Self {
        Self {
            next_handle: first_handle,
            ..Default::default()
        }
    }

    /// Refuses to create more than `limit` auxiliary variables.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Handle the next auxiliary variable will get.
    pub fn next_handle(&self) -> VarHandle {
        self.next_handle
    }

    /// All defining constraints as linear rows.
    pub fn linear_rows(&self) -> Vec<LinearRow> {
        self.constraints.iter().flat_map(|c| c.linearize()).collect()
    }
}

impl ModelAdapter for RecordingModel {
    fn new_binary_variable(&mut self, name_hint: &str) -> Result<VarHandle, ModelError> {
        if self.limit.is_some_and(|limit| self.variables.len() >= limit) {
            return Err(ModelError(format!(
                "cannot create variable {name_hint}: limit of {} auxiliary variables reached",
                self.variables.len()
            )));
        }
        let handle = self.next_handle;
        self.next_handle += 1;
        self.variables.push((handle, name_hint.to_string()));
        Ok(handle)
    }

    fn add_defining_constraint(&mut self, constraint: LogicConstraint) -> Result<(), ModelError> {
        let known = |h: VarHandle| self.variables.iter().any(|(v, _)| *v == h);
        if !known(constraint.result) {
            return Err(ModelError(format!(
                "constraint {} defines unknown variable {}",
                constraint.name, constraint.result
            )));
        }
        self.constraints.push(constraint);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linearization_matches_truth_tables() {
        let kinds = [
            LogicKind::And,
            LogicKind::Or,
            LogicKind::Xor,
            LogicKind::Equiv,
            LogicKind::Implies,
        ];
        let polarities = [(false, false), (true, false), (false, true), (true, true)];
        for kind in kinds {
            for (neg_a, neg_b) in polarities {
                let cons = LogicConstraint {
                    kind,
                    name: "t".to_string(),
                    result: 2,
                    operands: [
                        BoolOperand { var: 0, negated: neg_a },
                        BoolOperand { var: 1, negated: neg_b },
                    ],
                };
                let rows = cons.linearize();
                for a in [false, true] {
                    for b in [false, true] {
                        for r in [false, true] {
                            let point = [a as u8 as f64, b as u8 as f64, r as u8 as f64];
                            let feasible = rows.iter().all(|row| row.is_satisfied(&point));
                            assert_eq!(
                                feasible,
                                r == kind.apply(a != neg_a, b != neg_b),
                                "{kind:?} a={a} (negated {neg_a}) b={b} (negated {neg_b}) r={r}"
                            );
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_negated_operand_substitution() {
        // r = (1 - x0) AND x1
        let cons = LogicConstraint {
            kind: LogicKind::And,
            name: "t".to_string(),
            result: 2,
            operands: [BoolOperand::negated(0), BoolOperand::positive(1)],
        };
        let rows = cons.linearize();
        // r <= 1 - x0  becomes  r + x0 <= 1
        assert_eq!(
            rows[0],
            LinearRow {
                coefs: vec![(2, 1.0), (0, 1.0)],
                sense: Sense::LessEqual,
                rhs: 1.0,
            }
        );
    }

    #[test]
    fn test_recording_model() {
        let mut model = RecordingModel::new(5);
        let h = model.new_binary_variable("_logic0").unwrap();
        assert_eq!(h, 5);
        assert_eq!(model.next_handle(), 6);
        model
            .add_defining_constraint(LogicConstraint {
                kind: LogicKind::And,
                name: "_logic0def".to_string(),
                result: h,
                operands: [BoolOperand::positive(0), BoolOperand::positive(1)],
            })
            .unwrap();
        assert_eq!(model.constraints.len(), 1);
        assert_eq!(model.linear_rows().len(), 3);

        let bad = LogicConstraint {
            kind: LogicKind::Or,
            name: "bad".to_string(),
            result: 42,
            operands: [BoolOperand::positive(0), BoolOperand::positive(1)],
        };
        assert!(model.add_defining_constraint(bad).is_err());
    }

    #[test]
    fn test_limit() {
        let mut model = RecordingModel::new(0).with_limit(1);
        assert!(model.new_binary_variable("a").is_ok());
        assert!(model.new_binary_variable("b").is_err());
    }
}
