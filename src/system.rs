//! Decoding and evaluation of a whole model's equations.
//!
//! This module decodes a sequence of instruction streams that share one constant pool,
//! one variable resolver and one model, and compiles all resulting trees into a single
//! function that writes one value per equation.
//!
//! # Features
//!
//! - Sequential decoding with a fresh operand stack per equation
//! - Per-equation auxiliary variable prefixes, so names never collide across equations
//! - One combined JIT function for all equations
//! - Parallel batch evaluation over many input points
//!
//! # Example
//!
//! ```
//! use nlcode_jit::prelude::*;
//!
//! let streams = vec![
//!     // x0 + x1
//!     vec![Instruction::push_var(0), Instruction::add_var(1)],
//!     // x0 * x1
//!     vec![Instruction::push_var(0), Instruction::mul_var(1)],
//! ];
//! let mut model = RecordingModel::new(2);
//! let system = EquationSystem::decode_all(
//!     &streams,
//!     &[],
//!     &ColumnMap::continuous(2),
//!     &mut model,
//!     &DecodeOptions::default(),
//! )
//! .unwrap();
//!
//! assert_eq!(system.eval(&[2.0, 3.0]).unwrap(), vec![5.0, 6.0]);
//! ```

use crate::builder::build_combined_function;
use crate::constants::VariableResolver;
use crate::decode::{DecodeStats, Decoder};
use crate::errors::EquationError;
use crate::expr::{Expr, NodeRef};
use crate::instr::Instruction;
use crate::model::ModelAdapter;
use crate::options::DecodeOptions;
use crate::types::CombinedJITFunction;
use log::debug;
use rayon::prelude::*;
use std::sync::Arc;

/// A set of decoded equations evaluated together.
#[derive(Clone)]
pub struct EquationSystem {
    /// Roots of the decoded trees, one per equation
    trees: Vec<NodeRef>,
    /// Decode counters per equation; empty when built from trees
    stats: Vec<DecodeStats>,
    /// Number of inputs needed by the widest equation
    n_vars: usize,
    /// The JIT-compiled function that evaluates all equations
    combined_fun: CombinedJITFunction,
}

impl std::fmt::Debug for EquationSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EquationSystem")
            .field("trees", &self.trees.iter().map(|t| t.to_string()).collect::<Vec<_>>())
            .field("n_vars", &self.n_vars)
            .finish()
    }
}

impl EquationSystem {
    /// Decodes every stream in order and compiles the results.
    ///
    /// Auxiliary variables created for equation `i` are named with the prefix
    /// `"{options.logic_prefix}e{i}_"`.
    ///
    /// # Errors
    /// Stops at the first stream that fails to decode. Auxiliaries already created in
    /// `model` by earlier equations stay there.
    pub fn decode_all<S, R, M>(
        streams: &[S],
        constants: &[f64],
        resolver: &R,
        model: &mut M,
        options: &DecodeOptions,
    ) -> Result<Self, EquationError>
    where
        S: AsRef<[Instruction]>,
        R: VariableResolver + ?Sized,
        M: ModelAdapter + ?Sized,
    {
        let mut trees = Vec::with_capacity(streams.len());
        let mut stats = Vec::with_capacity(streams.len());

        for (idx, stream) in streams.iter().enumerate() {
            let decoder = Decoder::with_options(
                options
                    .clone()
                    .with_logic_prefix(format!("{}e{}_", options.logic_prefix, idx)),
            );
            let (tree, eq_stats) =
                decoder.decode_with_stats(stream.as_ref(), constants, resolver, model)?;
            trees.push(tree);
            stats.push(eq_stats);
        }
        debug!(
            "decoded {} equations, {} auxiliaries",
            trees.len(),
            stats.iter().map(|s| s.auxiliaries).sum::<usize>()
        );

        let mut system = Self::from_trees(trees)?;
        system.stats = stats;
        Ok(system)
    }

    /// Compiles already decoded trees into one system.
    pub fn from_trees(trees: Vec<NodeRef>) -> Result<Self, EquationError> {
        let refs: Vec<&Expr> = trees.iter().map(|t| t.as_ref()).collect();
        let combined_fun = build_combined_function(&refs, trees.len())?;
        let n_vars = trees.iter().map(|t| t.n_vars()).max().unwrap_or(0);
        Ok(Self {
            trees,
            stats: Vec::new(),
            n_vars,
            combined_fun,
        })
    }

    /// Evaluates all equations into a pre-allocated buffer.
    ///
    /// # Errors
    /// Returns `EquationError::InvalidInputLength` if `inputs` is shorter than `n_vars()`
    /// and `EquationError::InvalidOutputLength` if `results` does not hold exactly one
    /// slot per equation.
    pub fn eval_into<'a>(
        &self,
        inputs: &[f64],
        results: &'a mut [f64],
    ) -> Result<&'a [f64], EquationError> {
        self.validate_input_length(inputs)?;
        if results.len() != self.trees.len() {
            return Err(EquationError::InvalidOutputLength {
                expected: self.trees.len(),
                got: results.len(),
            });
        }

        (self.combined_fun)(inputs, results);
        Ok(results)
    }

    /// Evaluates all equations. Allocates a new vector for results.
    pub fn eval(&self, inputs: &[f64]) -> Result<Vec<f64>, EquationError> {
        let mut results = vec![0.0; self.trees.len()];
        self.eval_into(inputs, &mut results)?;
        Ok(results)
    }

    /// Evaluates the system for many input points in parallel.
    ///
    /// Work is split into chunks sized by the number of available cores; results come
    /// back in input order.
    pub fn eval_parallel(&self, input_sets: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, EquationError> {
        input_sets
            .iter()
            .try_for_each(|inputs| self.validate_input_length(inputs))?;

        let num_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(8);

        let chunk_size = (input_sets.len() / (num_threads * 4)).max(1);
        let n_equations = self.trees.len();

        let fun = Arc::clone(&self.combined_fun);

        Ok(input_sets
            .par_chunks(chunk_size)
            .map(|chunk| {
                chunk
                    .iter()
                    .map(|inputs| {
                        let mut results = vec![0.0; n_equations];
                        (fun)(inputs, &mut results);
                        results
                    })
                    .collect::<Vec<_>>()
            })
            .flatten()
            .collect())
    }

    fn validate_input_length(&self, inputs: &[f64]) -> Result<(), EquationError> {
        if inputs.len() < self.n_vars {
            return Err(EquationError::InvalidInputLength {
                expected: self.n_vars,
                got: inputs.len(),
            });
        }
        Ok(())
    }

    pub fn num_equations(&self) -> usize {
        self.trees.len()
    }

    pub fn n_vars(&self) -> usize {
        self.n_vars
    }

    pub fn trees(&self) -> &[NodeRef] {
        &self.trees
    }

    /// Decode counters per equation, in stream order.
    pub fn stats(&self) -> &[DecodeStats] {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::ColumnMap;
    use crate::errors::DecodeError;
    use crate::instr::FuncCode;
    use crate::model::RecordingModel;

    fn streams() -> Vec<Vec<Instruction>> {
        vec![
            // 2*x0 + x1
            vec![
                Instruction::push_var(0),
                Instruction::mul_const(0),
                Instruction::add_var(1),
            ],
            // x1^2
            vec![
                Instruction::push_var(1),
                Instruction::push_const(0),
                Instruction::call2(FuncCode::Power),
            ],
        ]
    }

    #[test]
    fn test_decode_all_and_eval() {
        let mut model = RecordingModel::new(2);
        let system = EquationSystem::decode_all(
            &streams(),
            &[2.0],
            &ColumnMap::continuous(2),
            &mut model,
            &DecodeOptions::default(),
        )
        .unwrap();

        assert_eq!(system.num_equations(), 2);
        assert_eq!(system.n_vars(), 2);
        assert_eq!(system.stats().len(), 2);
        assert_eq!(system.eval(&[1.0, 3.0]).unwrap(), vec![5.0, 9.0]);

        let mut results = vec![0.0; 2];
        system.eval_into(&[0.5, -1.0], &mut results).unwrap();
        assert_eq!(results, vec![0.0, 1.0]);
    }

    #[test]
    fn test_length_checks() {
        let mut model = RecordingModel::new(2);
        let system = EquationSystem::decode_all(
            &streams(),
            &[2.0],
            &ColumnMap::continuous(2),
            &mut model,
            &DecodeOptions::default(),
        )
        .unwrap();

        assert!(matches!(
            system.eval(&[1.0]),
            Err(EquationError::InvalidInputLength { expected: 2, got: 1 })
        ));
        let mut results = vec![0.0; 3];
        assert!(matches!(
            system.eval_into(&[1.0, 2.0], &mut results),
            Err(EquationError::InvalidOutputLength { expected: 2, got: 3 })
        ));
    }

    #[test]
    fn test_eval_parallel_matches_eval() {
        let mut model = RecordingModel::new(2);
        let system = EquationSystem::decode_all(
            &streams(),
            &[2.0],
            &ColumnMap::continuous(2),
            &mut model,
            &DecodeOptions::default(),
        )
        .unwrap();

        let input_sets: Vec<Vec<f64>> = (0..100)
            .map(|i| vec![i as f64, (i as f64) * 0.5])
            .collect();
        let parallel = system.eval_parallel(&input_sets).unwrap();
        assert_eq!(parallel.len(), input_sets.len());
        for (inputs, results) in input_sets.iter().zip(&parallel) {
            assert_eq!(results, &system.eval(inputs).unwrap());
        }
    }

    #[test]
    fn test_auxiliary_prefix_per_equation() {
        // bool_and(x0, x1) in both equations; x0 and x1 are binary
        let stream = vec![
            Instruction::push_var(0),
            Instruction::push_var(1),
            Instruction::call2(FuncCode::BoolAnd),
        ];
        let mut model = RecordingModel::new(2);
        let system = EquationSystem::decode_all(
            &[stream.clone(), stream],
            &[],
            &ColumnMap::with_binaries(&[true, true]),
            &mut model,
            &DecodeOptions::default(),
        )
        .unwrap();

        let names: Vec<&str> = model.variables.iter().map(|(_, name)| name.as_str()).collect();
        assert_eq!(names, vec!["_logice0_0", "_logice1_0"]);
        assert_eq!(system.stats()[0].auxiliaries, 1);
        assert_eq!(system.eval(&[1.0, 1.0, 1.0, 0.0]).unwrap(), vec![1.0, 0.0]);
    }

    #[test]
    fn test_first_failure_stops() {
        let bad = vec![Instruction::push_var(0), Instruction::add()];
        let mut model = RecordingModel::new(1);
        let err = EquationSystem::decode_all(
            &[bad],
            &[],
            &ColumnMap::continuous(1),
            &mut model,
            &DecodeOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            EquationError::Decode(DecodeError::StackUnderflow { position: 1, .. })
        ));
    }

    #[test]
    fn test_from_trees() {
        let system = EquationSystem::from_trees(vec![Expr::constant(1.5)]).unwrap();
        assert_eq!(system.n_vars(), 0);
        assert_eq!(system.eval(&[]).unwrap(), vec![1.5]);
    }
}
