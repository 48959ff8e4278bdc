//! Decoding and evaluation of a single equation.
//!
//! This module provides the `Equation` type: the decoded tree of one instruction stream
//! together with a JIT-compiled function evaluating it. The tree is kept so callers can
//! hand it on to their own expression builders, print it, or interpret it directly.
//!
//! # Example
//!
//! ```
//! use nlcode_jit::prelude::*;
//!
//! // x0^2 - 4*x1
//! let instructions = [
//!     Instruction::push_var(0),
//!     Instruction::push_const(0),
//!     Instruction::call2(FuncCode::Power),
//!     Instruction::push_var(1),
//!     Instruction::push_const(1),
//!     Instruction::mul(),
//!     Instruction::sub(),
//! ];
//! let mut model = RecordingModel::new(2);
//! let eq = Equation::decode(&instructions, &[2.0, 4.0], &ColumnMap::continuous(2), &mut model).unwrap();
//! assert_eq!(eq.eval(&[3.0, 1.0]).unwrap(), 5.0);
//! ```
//!
//! # Variable Handling
//!
//! Input slices are indexed by the solver handles the resolver produced, so they must
//! hold at least `n_vars()` values (the largest handle referenced plus one).

use crate::builder::build_function;
use crate::constants::VariableResolver;
use crate::decode::{DecodeStats, Decoder};
use crate::errors::EquationError;
use crate::expr::NodeRef;
use crate::instr::Instruction;
use crate::model::ModelAdapter;
use crate::types::JITFunction;
use colored::Colorize;

/// One decoded equation.
///
/// Holds the shared root of the decoded tree, a compiled evaluation function, and the
/// decode counters when the equation came from an instruction stream.
#[derive(Clone)]
pub struct Equation {
    tree: NodeRef,
    fun: JITFunction,
    n_vars: usize,
    stats: Option<DecodeStats>,
}

impl std::fmt::Debug for Equation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{{\n")?;
        writeln!(f, "    {}: {}\n", "Tree".cyan(), self.tree)?;
        writeln!(f, "    {}: {}\n", "Inputs".cyan(), self.n_vars)?;
        writeln!(f, "    {}: {:?}\n", "Stats".cyan(), self.stats)?;
        writeln!(f, "}}")?;
        Ok(())
    }
}

impl std::fmt::Display for Equation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", "Equation".cyan(), self.tree)
    }
}

impl Equation {
    /// Decodes an instruction stream with default options and compiles the result.
    ///
    /// # Arguments
    /// * `instructions` - The postfix program of one equation
    /// * `constants` - The model's constant pool
    /// * `resolver` - Maps raw column indices to solver variables
    /// * `model` - Receives auxiliary variables for boolean connectives
    ///
    /// # Errors
    /// Returns `EquationError::Decode` if the stream cannot be decoded and
    /// `EquationError::BuildFunctionError` if JIT compilation fails.
    pub fn decode<R, M>(
        instructions: &[Instruction],
        constants: &[f64],
        resolver: &R,
        model: &mut M,
    ) -> Result<Self, EquationError>
    where
        R: VariableResolver + ?Sized,
        M: ModelAdapter + ?Sized,
    {
        Self::decode_with(&Decoder::default(), instructions, constants, resolver, model)
    }

    /// Same as [`Equation::decode`], with a configured decoder.
    pub fn decode_with<R, M>(
        decoder: &Decoder,
        instructions: &[Instruction],
        constants: &[f64],
        resolver: &R,
        model: &mut M,
    ) -> Result<Self, EquationError>
    where
        R: VariableResolver + ?Sized,
        M: ModelAdapter + ?Sized,
    {
        let (tree, stats) = decoder.decode_with_stats(instructions, constants, resolver, model)?;
        let mut equation = Self::from_tree(tree)?;
        equation.stats = Some(stats);
        Ok(equation)
    }

    /// Compiles an already decoded tree.
    pub fn from_tree(tree: NodeRef) -> Result<Self, EquationError> {
        let fun = build_function(&tree)?;
        let n_vars = tree.n_vars();
        Ok(Self {
            tree,
            fun,
            n_vars,
            stats: None,
        })
    }

    /// Evaluates the compiled function at `inputs`.
    ///
    /// # Errors
    /// Returns `EquationError::InvalidInputLength` if `inputs` is shorter than `n_vars()`.
    pub fn eval(&self, inputs: &[f64]) -> Result<f64, EquationError> {
        self.validate_input_length(inputs)?;
        Ok((self.fun)(inputs))
    }

    /// Evaluates the tree by walking it, without the compiled function.
    pub fn interpret(&self, inputs: &[f64]) -> Result<f64, EquationError> {
        self.validate_input_length(inputs)?;
        Ok(self.tree.eval(inputs))
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

    pub fn tree(&self) -> &NodeRef {
        &self.tree
    }

    /// Number of inputs `eval` needs.
    pub fn n_vars(&self) -> usize {
        self.n_vars
    }

    pub fn fun(&self) -> &JITFunction {
        &self.fun
    }

    /// Decode counters, if the equation was decoded from a stream.
    pub fn stats(&self) -> Option<DecodeStats> {
        self.stats
    }
}
