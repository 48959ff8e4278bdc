//! Decoder for postfix nonlinear instruction streams, with JIT-compiled evaluation.
//!
//! Algebraic modeling systems hand each nonlinear equation to a solver as a postfix
//! program of `(opcode, field)` instructions plus a model-wide constant pool. This crate
//! turns such a program into a shared expression tree, folding literals, flattening
//! linear parts into single sum nodes and lowering boolean connectives into auxiliary
//! binary variables, and compiles the tree with
//! [Cranelift](https://github.com/bytecodealliance/wasmtime/tree/main/cranelift) for
//! fast evaluation.
//!
//! # Features
//!
//! - Single-pass decoding with a typed error for every malformed stream
//! - Shared nodes through `Arc`, with in-place growth of uniquely owned sums
//! - Boolean connectives lowered through a [`ModelAdapter`](model::ModelAdapter)
//! - JIT compilation of single trees and whole systems
//!
//! # Example
//!
//! ```rust
//! use nlcode_jit::prelude::*;
//!
//! // 3*x0 + x1
//! let instructions = [
//!     Instruction::push_var(0),
//!     Instruction::push_const(0),
//!     Instruction::mul(),
//!     Instruction::push_var(1),
//!     Instruction::add(),
//! ];
//! let mut model = RecordingModel::new(2);
//! let eq = Equation::decode(&instructions, &[3.0], &ColumnMap::continuous(2), &mut model).unwrap();
//!
//! assert_eq!(eq.tree().to_string(), "(3*x0 + x1)");
//! assert_eq!(eq.eval(&[1.0, 2.0]).unwrap(), 5.0);
//! ```

pub use equation::Equation;
pub use system::EquationSystem;

pub mod prelude {
    pub use crate::builder::build_function;
    pub use crate::constants::{ColumnMap, VariableResolver};
    pub use crate::decode::{decode, DecodeStats, Decoder};
    pub use crate::equation::Equation;
    pub use crate::errors::{BuilderError, DecodeError, EquationError, ModelError};
    pub use crate::expr::{Expr, NodeRef, VarRef};
    pub use crate::instr::{FuncCode, Instruction, OpCode};
    pub use crate::model::{BoolOperand, LogicConstraint, LogicKind, ModelAdapter, RecordingModel};
    pub use crate::options::DecodeOptions;
    pub use crate::system::EquationSystem;
}

/// JIT compilation functionality using Cranelift
pub mod builder;
/// Constant pool and variable resolution
pub mod constants;
/// Instruction stream decoder
pub mod decode;
/// Single decoded equation
pub mod equation;
/// Error types for the various failure modes
pub mod errors;
/// Expression tree representation
pub mod expr;
/// Function table of the decoder
pub(crate) mod functions;
/// Opcodes, function codes and instructions
pub mod instr;
/// Model adapter for auxiliary variables and constraints
pub mod model;
/// Functions for linking external functions to compiled code
pub(crate) mod operators;
/// Peephole optimisation of flattened programs
pub mod opt;
/// Decoder configuration
pub mod options;
/// Operand stack and node combinators
pub(crate) mod stack;
/// System of equations
pub mod system;
/// Type aliases for compiled functions
pub mod types;
