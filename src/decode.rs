//! Instruction stream decoder.
//!
//! Walks one equation's instruction stream left to right, exactly once, feeding the
//! operand stack and the function table. Every decode call owns a fresh stack, a fresh
//! pending argument count and a fresh auxiliary counter; only the model adapter and the
//! caller's constants and resolver outlive it.
//!
//! The upstream field bias is removed here and nowhere else: data-addressing opcodes
//! index with `field - 1`, argument count declarations carry the count in `field`, and
//! call opcodes carry the function code in `field`.

use log::{debug, trace};

use crate::{
    constants::{ConstantPool, VariableResolver},
    errors::DecodeError,
    expr::{Expr, NodeRef},
    functions::FunctionTable,
    instr::{Instruction, OpCode},
    model::ModelAdapter,
    options::DecodeOptions,
    stack::{combine, divide, multiply, negate, scale, OperandStack},
};

/// Counters collected while decoding one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodeStats {
    /// Instructions read
    pub instructions: usize,
    /// Largest operand stack depth reached
    pub max_depth: usize,
    /// Auxiliary binary variables created in the model
    pub auxiliaries: usize,
}

/// Decodes one instruction stream with default options.
///
/// # Arguments
/// * `instructions` - The postfix program of one equation
/// * `constants` - The constant pool `PushI`-style opcodes index into
/// * `resolver` - Maps raw column indices to solver variables
/// * `model` - Receives auxiliary variables for boolean connectives
///
/// # Returns
/// The root of the decoded tree
///
/// # Example
/// ```
/// use nlcode_jit::prelude::*;
///
/// // 3*x0 + x1
/// let instructions = [
///     Instruction::push_var(0),
///     Instruction::push_const(0),
///     Instruction::mul(),
///     Instruction::push_var(1),
///     Instruction::add(),
/// ];
/// let mut model = RecordingModel::new(2);
/// let root = decode(&instructions, &[3.0], &ColumnMap::continuous(2), &mut model).unwrap();
/// assert_eq!(root.to_string(), "(3*x0 + x1)");
/// ```
pub fn decode<R, M>(
    instructions: &[Instruction],
    constants: &[f64],
    resolver: &R,
    model: &mut M,
) -> Result<NodeRef, DecodeError>
where
    R: VariableResolver + ?Sized,
    M: ModelAdapter + ?Sized,
{
    Decoder::default().decode(instructions, constants, resolver, model)
}

/// Configured decoder. Holds only options, so one instance can decode any number of
/// streams one after another.
#[derive(Debug, Clone, Default)]
pub struct Decoder {
    options: DecodeOptions,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: DecodeOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &DecodeOptions {
        &self.options
    }

    pub fn decode<R, M>(
        &self,
        instructions: &[Instruction],
        constants: &[f64],
        resolver: &R,
        model: &mut M,
    ) -> Result<NodeRef, DecodeError>
    where
        R: VariableResolver + ?Sized,
        M: ModelAdapter + ?Sized,
    {
        self.decode_with_stats(instructions, constants, resolver, model)
            .map(|(root, _)| root)
    }

    /// Decodes the parallel opcode/field arrays handed out by the model object.
    pub fn decode_raw<R, M>(
        &self,
        opcodes: &[i32],
        fields: &[i32],
        constants: &[f64],
        resolver: &R,
        model: &mut M,
    ) -> Result<NodeRef, DecodeError>
    where
        R: VariableResolver + ?Sized,
        M: ModelAdapter + ?Sized,
    {
        let instructions = Instruction::from_raw_arrays(opcodes, fields)?;
        self.decode(&instructions, constants, resolver, model)
    }

    pub fn decode_with_stats<R, M>(
        &self,
        instructions: &[Instruction],
        constants: &[f64],
        resolver: &R,
        model: &mut M,
    ) -> Result<(NodeRef, DecodeStats), DecodeError>
    where
        R: VariableResolver + ?Sized,
        M: ModelAdapter + ?Sized,
    {
        let pool = ConstantPool::new(constants);
        let special = &self.options.special_values;
        let mut stack = OperandStack::new();
        let mut functions = FunctionTable::new(&self.options, model);
        let mut pending_args: Option<usize> = None;

        let constant = |address: i64| pool.get(address, special);
        let variable = |address: i64| -> Result<NodeRef, DecodeError> {
            usize::try_from(address)
                .ok()
                .and_then(|idx| resolver.resolve(idx))
                .map(Expr::var)
                .ok_or(DecodeError::AddressOutOfRange {
                    kind: "variable",
                    address,
                })
        };

        for (position, instr) in instructions.iter().enumerate() {
            trace!("{position}: {instr}");
            stack.at(position, instr.opcode);
            let address = i64::from(instr.field) - 1;

            match instr.opcode {
                OpCode::NoOp | OpCode::Store | OpCode::Header => {}

                OpCode::PushV => stack.push(variable(address)?),
                OpCode::PushI => stack.push(Expr::constant(constant(address)?)),
                OpCode::PushZero => stack.push(Expr::constant(0.0)),

                OpCode::Add => {
                    let (a, b) = stack.pop2()?;
                    stack.push(combine(1.0, Some(a), 1.0, Some(b), 0.0));
                }
                OpCode::AddV => {
                    let term = stack.pop()?;
                    let var = variable(address)?;
                    stack.push(combine(1.0, Some(term), 1.0, Some(var), 0.0));
                }
                OpCode::AddI => {
                    let term = stack.pop()?;
                    let c = constant(address)?;
                    stack.push(combine(1.0, Some(term), 0.0, None, c));
                }

                OpCode::Sub => {
                    let (a, b) = stack.pop2()?;
                    stack.push(combine(1.0, Some(a), -1.0, Some(b), 0.0));
                }
                OpCode::SubV => {
                    let term = stack.pop()?;
                    let var = variable(address)?;
                    stack.push(combine(1.0, Some(term), -1.0, Some(var), 0.0));
                }
                OpCode::SubI => {
                    let term = stack.pop()?;
                    let c = constant(address)?;
                    stack.push(combine(1.0, Some(term), 0.0, None, -c));
                }

                OpCode::Mul => {
                    let (a, b) = stack.pop2()?;
                    stack.push(multiply(a, b));
                }
                OpCode::MulV => {
                    let term = stack.pop()?;
                    stack.push(multiply(term, variable(address)?));
                }
                OpCode::MulI => {
                    let term = stack.pop()?;
                    stack.push(scale(term, constant(address)?));
                }
                OpCode::MulIAdd => {
                    let (below, top) = stack.pop2()?;
                    let c = constant(address)?;
                    stack.push(combine(1.0, Some(below), c, Some(top), 0.0));
                }

                OpCode::Div => {
                    let (a, b) = stack.pop2()?;
                    stack.push(divide(a, b, position)?);
                }
                OpCode::DivV => {
                    let term = stack.pop()?;
                    stack.push(divide(term, variable(address)?, position)?);
                }
                OpCode::DivI => {
                    let term = stack.pop()?;
                    let c = Expr::constant(constant(address)?);
                    stack.push(divide(term, c, position)?);
                }

                OpCode::UMin => {
                    let term = stack.pop()?;
                    stack.push(negate(term));
                }
                OpCode::UMinV => stack.push(negate(variable(address)?)),

                OpCode::FuncArgN => {
                    if let Some(previous) = pending_args {
                        return Err(DecodeError::ArgumentCount(format!(
                            "count {} declared at instruction {position} while count {previous} is pending",
                            instr.field
                        )));
                    }
                    let nargs = usize::try_from(instr.field).map_err(|_| {
                        DecodeError::ArgumentCount(format!(
                            "negative count {} at instruction {position}",
                            instr.field
                        ))
                    })?;
                    pending_args = Some(nargs);
                }

                OpCode::CallArg1 | OpCode::CallArg2 | OpCode::CallArgN => {
                    let nargs = match (instr.opcode, pending_args.take()) {
                        (OpCode::CallArgN, Some(n)) => n,
                        (OpCode::CallArgN, None) => {
                            return Err(DecodeError::ArgumentCount(format!(
                                "{} at instruction {position} without a declared count",
                                instr.opcode
                            )));
                        }
                        (_, Some(n)) => {
                            return Err(DecodeError::ArgumentCount(format!(
                                "count {n} declared but {} at instruction {position} has a fixed count",
                                instr.opcode
                            )));
                        }
                        (OpCode::CallArg1, None) => 1,
                        (_, None) => 2,
                    };
                    functions.call(&mut stack, instr.field, nargs)?;
                }

                OpCode::End
                | OpCode::Chk
                | OpCode::AddO
                | OpCode::PushO
                | OpCode::Invoc
                | OpCode::StackIn => {
                    return Err(DecodeError::UnsupportedOpcode(instr.opcode.name().to_string()));
                }
            }
        }

        if let Some(n) = pending_args {
            return Err(DecodeError::ArgumentCount(format!(
                "count {n} declared but never consumed"
            )));
        }

        let stats = DecodeStats {
            instructions: instructions.len(),
            max_depth: stack.max_depth(),
            auxiliaries: functions.auxiliaries(),
        };
        let root = stack.into_root()?;
        debug!(
            "decoded {} instructions, max depth {}, {} auxiliaries",
            stats.instructions, stats.max_depth, stats.auxiliaries
        );
        Ok((root, stats))
    }
}
