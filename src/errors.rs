//! Error types for the nlcode-jit crate.
//!
//! This module defines the error types that can occur while decoding instruction streams
//! and compiling the resulting trees. The main error types are:
//!
//! - `DecodeError`: Errors while turning an instruction stream into an expression tree
//! - `ModelError`: Errors reported by the owning model when it is asked for new
//!   variables or constraints
//! - `BuilderError`: Errors during JIT compilation with Cranelift
//! - `EquationError`: High-level errors when working with decoded equations
//!
//! Every decode error is fatal to the equation being translated. Nodes built so far are
//! owned by the decode call and are dropped with it.

use cranelift_codegen::CodegenError;
use cranelift_module::ModuleError;
use thiserror::Error;

use crate::instr::OpCode;

/// Errors that can occur while decoding one instruction stream.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// An instruction needs more operands than the stack holds
    #[error("stack underflow at instruction {position} ({opcode})")]
    StackUnderflow { position: usize, opcode: OpCode },
    /// A function identifier outside the supported set
    #[error("unsupported function: {0}")]
    UnsupportedFunction(String),
    /// An opcode outside the supported set
    #[error("unsupported opcode: {0}")]
    UnsupportedOpcode(String),
    /// An operand whose shape the instruction cannot handle
    #[error("invalid operand: {0}")]
    InvalidOperandShape(String),
    /// A special value in the constant pool without a counterpart in the target system
    #[error("special value {0:e} in constant pool has no mapping")]
    UnmappedConstant(f64),
    /// The stream ended with a number of nodes other than one on the stack
    #[error("expected exactly one node on the stack at end of stream, found {0}")]
    TerminalStackShape(usize),
    /// Division by a literal zero
    #[error("division by literal zero at instruction {position}")]
    DivisionByZero { position: usize },
    /// Inconsistent argument count declaration for a function call
    #[error("argument count: {0}")]
    ArgumentCount(String),
    /// A field addresses a constant or variable that does not exist
    #[error("{kind} address {address} out of range")]
    AddressOutOfRange { kind: &'static str, address: i64 },
    /// The model refused to create an auxiliary variable or constraint
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Error reported by a model adapter.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("model error: {0}")]
pub struct ModelError(pub String);

/// Errors that can occur during JIT compilation of expressions.
///
/// This enum represents various failure modes in the process of converting decoded trees
/// into machine code using Cranelift as the JIT compiler backend.
#[derive(Error, Debug)]
pub enum BuilderError {
    /// Error when the target machine architecture is not supported
    #[error("host machine is not supported: {0}")]
    HostMachineNotSupported(String),
    /// Error during Cranelift code generation
    #[error("codegen error: {0}")]
    CodegenError(CodegenError),
    /// Error in the Cranelift JIT module
    #[error("module error: {0}")]
    ModuleError(ModuleError),
    /// Error when defining the JIT function
    #[error("function error: {0}")]
    FunctionError(String),
    /// Error when declaring the JIT function or one of its imports
    #[error("declaration error: {0}")]
    DeclarationError(String),
    /// Error when configuring code generation flags
    #[error("setting error: {0}")]
    SettingError(String),
}

/// High-level errors that can occur when working with decoded equations.
#[derive(Debug, Error)]
pub enum EquationError {
    /// Error when decoding the instruction stream
    #[error("Failed to decode instruction stream")]
    Decode(#[from] DecodeError),
    /// Error when JIT compiling the expression
    #[error("Failed to build JIT function")]
    BuildFunctionError(#[from] BuilderError),
    /// Error when the input length is smaller than the number of variables
    #[error("Invalid input length: expected at least {expected}, got {got}")]
    InvalidInputLength { expected: usize, got: usize },
    /// Error when the output length is not the same as the number of equations
    #[error("Invalid output length: expected {expected}, got {got}")]
    InvalidOutputLength { expected: usize, got: usize },
}
