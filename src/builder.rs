//! This module provides functionality for JIT compilation of decoded expression trees.
//! It uses Cranelift as the backend compiler to generate native machine code.
//!
//! The main entry points are:
//! - `build_function()` - Compiles a single tree into a JIT function
//! - `build_combined_function()` - Compiles multiple trees into a single JIT function
//!
//! Trees are flattened into a stack program first (see [`Expr::flatten`]), run through
//! the peephole optimiser, and the program is then translated op by op into Cranelift
//! IR. Compiled functions read their inputs from a pointer to `f64`s indexed by
//! variable handle.

use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    errors::{BuilderError, EquationError},
    expr::{BinaryOp, Expr, FlattenedExpr, LinearOp, UnaryOp, VarHandle},
    operators::{self, Imports, MathFn},
    opt,
    types::{CombinedJITFunction, JITFunction},
};
use cranelift::prelude::*;
use cranelift_codegen::{ir::immediates::Offset32, Context};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{Linkage, Module};
use isa::TargetIsa;
use log::debug;
use rayon::prelude::*;

type RawFunction = extern "C" fn(*const f64) -> f64;
type RawCombinedFunction = extern "C" fn(*const f64, *mut f64);

/// Builds a JIT-compiled function from an expression tree.
///
/// # Arguments
/// * `expr` - The tree to compile
///
/// # Returns
/// A thread-safe function that takes a slice of f64 values indexed by variable handle
/// and returns the value of the tree. The slice must hold at least `expr.n_vars()`
/// values; callers in this crate check that before calling.
///
/// # Errors
/// Returns an EquationError if compilation fails for any reason.
pub fn build_function(expr: &Expr) -> Result<JITFunction, EquationError> {
    let isa = create_isa()?;
    let (mut module, mut ctx) = create_module_and_context(isa)?;
    build_function_body(&mut ctx, expr, &mut module)?;
    let raw_fn = compile_and_finalize(&mut module, &mut ctx)?;

    Ok(Arc::new(move |input: &[f64]| raw_fn(input.as_ptr())))
}

/// Creates an Instruction Set Architecture (ISA) target for code generation.
///
/// # Errors
/// Returns a BuilderError if:
/// - The host machine architecture is not supported
/// - Code generation configuration fails
pub(crate) fn create_isa() -> Result<Arc<dyn TargetIsa>, BuilderError> {
    let mut flag_builder = settings::builder();

    let target_triple = target_lexicon::Triple::host();
    let is_x86 = matches!(
        target_triple.architecture,
        target_lexicon::Architecture::X86_64
    );

    let pic = if is_x86 { "true" } else { "false" };
    set_flag(&mut flag_builder, "use_colocated_libcalls", pic)?;
    set_flag(&mut flag_builder, "is_pic", pic)?;
    set_flag(&mut flag_builder, "opt_level", "speed")?;

    let isa_builder = cranelift_native::builder()
        .map_err(|msg| BuilderError::HostMachineNotSupported(msg.to_string()))?;

    isa_builder
        .finish(settings::Flags::new(flag_builder))
        .map_err(BuilderError::CodegenError)
}

fn set_flag(builder: &mut settings::Builder, name: &str, value: &str) -> Result<(), BuilderError> {
    builder
        .set(name, value)
        .map_err(|e| BuilderError::SettingError(format!("{name}={value}: {e}")))
}

/// Creates a new JIT module and a function context with the signature
/// `fn(*const f64) -> f64`. The math imports are registered on the module.
pub(crate) fn create_module_and_context(
    isa: Arc<dyn TargetIsa>,
) -> Result<(JITModule, Context), BuilderError> {
    let mut builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
    operators::register_symbols(&mut builder);

    let module = JITModule::new(builder);
    let mut ctx = module.make_context();

    let ptr_ty = module.target_config().pointer_type();
    let mut sig = module.make_signature();
    sig.params.push(AbiParam::new(ptr_ty));
    sig.returns.push(AbiParam::new(types::F64));
    ctx.func.signature = sig;

    Ok((module, ctx))
}

/// Builds the function body: one entry block taking the input pointer, the tree's
/// program, and a return of its value.
fn build_function_body(
    ctx: &mut Context,
    expr: &Expr,
    module: &mut dyn Module,
) -> Result<(), EquationError> {
    let mut builder_ctx = FunctionBuilderContext::new();
    let mut func_builder = FunctionBuilder::new(&mut ctx.func, &mut builder_ctx);

    let entry_block = func_builder.create_block();
    func_builder.append_block_params_for_function_params(entry_block);
    func_builder.switch_to_block(entry_block);
    let input_ptr = func_builder.block_params(entry_block)[0];

    let flattened = opt::optimize(expr.flatten());
    let mut imports = Imports::default();
    let result = codegen_flattened(&flattened, &mut func_builder, module, &mut imports, input_ptr)?;
    func_builder.ins().return_(&[result]);

    func_builder.seal_block(entry_block);
    func_builder.finalize();

    Ok(())
}

/// Compiles and finalizes the function, returning a callable function pointer.
fn compile_and_finalize(
    module: &mut JITModule,
    ctx: &mut Context,
) -> Result<RawFunction, BuilderError> {
    let func_id = module
        .declare_function("nlc_eval", Linkage::Local, &ctx.func.signature)
        .map_err(|msg| BuilderError::DeclarationError(msg.to_string()))?;

    module
        .define_function(func_id, ctx)
        .map_err(|msg| BuilderError::FunctionError(msg.to_string()))?;

    module.clear_context(ctx);
    module
        .finalize_definitions()
        .map_err(BuilderError::ModuleError)?;

    // SAFETY: the function was compiled with signature fn(*const f64) -> f64 in the
    // host calling convention, and JIT memory is never freed by the module
    let func = unsafe {
        std::mem::transmute::<*const u8, RawFunction>(module.get_finalized_function(func_id))
    };
    Ok(func)
}

/// Translates a flattened program into Cranelift IR and returns the value it leaves on
/// the stack. Variable loads are cached, so each input is read at most once.
pub(crate) fn codegen_flattened(
    flattened: &FlattenedExpr,
    builder: &mut FunctionBuilder,
    module: &mut dyn Module,
    imports: &mut Imports,
    input_ptr: Value,
) -> Result<Value, BuilderError> {
    if let Some(c) = flattened.constant_result {
        return Ok(builder.ins().f64const(c));
    }

    let mut value_stack: Vec<Value> = Vec::with_capacity(flattened.ops.len());
    let mut var_cache: HashMap<VarHandle, Value> = HashMap::new();

    for op in &flattened.ops {
        let value = match op {
            LinearOp::LoadConst(v) => builder.ins().f64const(*v),
            LinearOp::LoadVar(idx) => match var_cache.get(idx) {
                Some(value) => *value,
                None => {
                    let mem = MemFlags::new().with_aligned().with_readonly().with_notrap();
                    let offset = slot_offset(*idx)?;
                    let value = builder.ins().load(types::F64, mem, input_ptr, offset);
                    var_cache.insert(*idx, value);
                    value
                }
            },

            LinearOp::Add => {
                let (l, r) = pop2(&mut value_stack)?;
                builder.ins().fadd(l, r)
            }
            LinearOp::Mul => {
                let (l, r) = pop2(&mut value_stack)?;
                builder.ins().fmul(l, r)
            }
            LinearOp::Neg => {
                let v = pop(&mut value_stack)?;
                builder.ins().fneg(v)
            }
            LinearOp::Fma => {
                let (a, b) = pop2(&mut value_stack)?;
                let acc = pop(&mut value_stack)?;
                builder.ins().fma(a, b, acc)
            }

            LinearOp::PowInt(e) => {
                let base = pop(&mut value_stack)?;
                generate_optimized_power(builder, base, i64::from(*e))
            }
            LinearOp::PowFloat(e) => {
                let base = pop(&mut value_stack)?;
                real_power(builder, module, imports, base, *e)?
            }
            LinearOp::SignPow(e) => {
                let x = pop(&mut value_stack)?;
                let magnitude = builder.ins().fabs(x);
                let p = if e.fract() == 0.0 && e.abs() <= 64.0 {
                    generate_optimized_power(builder, magnitude, *e as i64)
                } else {
                    real_power(builder, module, imports, magnitude, *e)?
                };
                builder.ins().fcopysign(p, x)
            }

            LinearOp::Unary(unary) => {
                let x = pop(&mut value_stack)?;
                match unary {
                    UnaryOp::Abs => builder.ins().fabs(x),
                    UnaryOp::Exp => imports.call(builder, module, MathFn::Exp, &[x])?,
                    UnaryOp::Log => imports.call(builder, module, MathFn::Log, &[x])?,
                    UnaryOp::Sin => imports.call(builder, module, MathFn::Sin, &[x])?,
                    UnaryOp::Cos => imports.call(builder, module, MathFn::Cos, &[x])?,
                    UnaryOp::Entropy => {
                        // -x*ln(x), and 0 at x == 0
                        let ln = imports.call(builder, module, MathFn::Log, &[x])?;
                        let prod = builder.ins().fmul(x, ln);
                        let neg = builder.ins().fneg(prod);
                        let zero = builder.ins().f64const(0.0);
                        let is_zero = builder.ins().fcmp(FloatCC::Equal, x, zero);
                        builder.ins().select(is_zero, zero, neg)
                    }
                }
            }
            LinearOp::Binary(binary) => {
                let (l, r) = pop2(&mut value_stack)?;
                match binary {
                    BinaryOp::Min => builder.ins().fmin(l, r),
                    BinaryOp::Max => builder.ins().fmax(l, r),
                }
            }
        };
        value_stack.push(value);
    }

    match value_stack.as_slice() {
        [result] => Ok(*result),
        other => Err(BuilderError::FunctionError(format!(
            "program left {} values on the stack",
            other.len()
        ))),
    }
}

/// Byte offset of slot `index` in an `f64` array, if it fits a Cranelift immediate.
fn slot_offset(index: usize) -> Result<Offset32, BuilderError> {
    index
        .checked_mul(std::mem::size_of::<f64>())
        .and_then(|bytes| i32::try_from(bytes).ok())
        .map(Offset32::new)
        .ok_or_else(|| {
            BuilderError::FunctionError(format!("variable handle {index} is out of addressable range"))
        })
}

fn pop(stack: &mut Vec<Value>) -> Result<Value, BuilderError> {
    stack
        .pop()
        .ok_or_else(|| BuilderError::FunctionError("program stack underflow".to_string()))
}

fn pop2(stack: &mut Vec<Value>) -> Result<(Value, Value), BuilderError> {
    let r = pop(stack)?;
    let l = pop(stack)?;
    Ok((l, r))
}

/// `base^e` for a real exponent; square roots use the native instruction.
fn real_power(
    builder: &mut FunctionBuilder,
    module: &mut dyn Module,
    imports: &mut Imports,
    base: Value,
    e: f64,
) -> Result<Value, BuilderError> {
    if e == 0.5 {
        return Ok(builder.ins().sqrt(base));
    }
    let exponent = builder.ins().f64const(e);
    imports.call(builder, module, MathFn::Pow, &[base, exponent])
}

/// Generates optimized power operation with inlining for common exponents and binary exponentiation
fn generate_optimized_power(builder: &mut FunctionBuilder, base: Value, exp: i64) -> Value {
    match exp {
        0 => builder.ins().f64const(1.0),
        1 => base,
        2 => builder.ins().fmul(base, base),
        3 => {
            let square = builder.ins().fmul(base, base);
            builder.ins().fmul(square, base)
        }
        4 => {
            let square = builder.ins().fmul(base, base);
            builder.ins().fmul(square, square)
        }
        -1 => {
            let one = builder.ins().f64const(1.0);
            builder.ins().fdiv(one, base)
        }
        -2 => {
            let square = builder.ins().fmul(base, base);
            let one = builder.ins().f64const(1.0);
            builder.ins().fdiv(one, square)
        }
        _ => {
            let mut result = builder.ins().f64const(1.0);
            let mut current_base = base;
            let mut remaining = exp.abs();

            while remaining > 0 {
                if remaining & 1 == 1 {
                    result = builder.ins().fmul(result, current_base);
                }
                if remaining > 1 {
                    current_base = builder.ins().fmul(current_base, current_base);
                }
                remaining >>= 1;
            }

            if exp < 0 {
                let one = builder.ins().f64const(1.0);
                builder.ins().fdiv(one, result)
            } else {
                result
            }
        }
    }
}

/// Builds a JIT-compiled function that evaluates multiple trees together.
///
/// All trees are compiled into one function body that writes the value of tree `i` to
/// `results[i]`. Flattening and optimisation run in parallel; code generation is
/// sequential.
///
/// # Arguments
/// * `exprs` - Trees to compile together
/// * `results_len` - Length of the results array (must match number of trees)
///
/// # Errors
/// Returns an EquationError if compilation fails
///
/// # Panics
/// The returned function panics if the results slice length doesn't match results_len
pub fn build_combined_function(
    exprs: &[&Expr],
    results_len: usize,
) -> Result<CombinedJITFunction, EquationError> {
    let mut builder_context = FunctionBuilderContext::new();
    let mut codegen_context = Context::new();
    let isa = create_isa()?;
    let (mut module, _) = create_module_and_context(isa)?;

    // fn(input_ptr: *const f64, output_ptr: *mut f64)
    let ptr_ty = module.target_config().pointer_type();
    let mut sig = module.make_signature();
    sig.params.push(AbiParam::new(ptr_ty));
    sig.params.push(AbiParam::new(ptr_ty));

    let func_id = module
        .declare_function("nlc_eval_combined", Linkage::Export, &sig)
        .map_err(|msg| BuilderError::DeclarationError(msg.to_string()))?;

    codegen_context.func.signature = sig;
    let mut builder = FunctionBuilder::new(&mut codegen_context.func, &mut builder_context);

    let entry_block = builder.create_block();
    builder.append_block_params_for_function_params(entry_block);
    builder.switch_to_block(entry_block);
    builder.seal_block(entry_block);

    let input_ptr = builder.block_params(entry_block)[0];
    let output_ptr = builder.block_params(entry_block)[1];

    let programs: Vec<FlattenedExpr> = exprs
        .par_iter()
        .map(|expr| opt::optimize(expr.flatten()))
        .collect();
    debug!(
        "compiling {} trees, {} ops in total",
        programs.len(),
        programs.iter().map(|p| p.ops.len()).sum::<usize>()
    );

    let mut imports = Imports::default();
    for (i, program) in programs.iter().enumerate() {
        let result = codegen_flattened(program, &mut builder, &mut module, &mut imports, input_ptr)?;
        builder.ins().store(
            MemFlags::new(),
            result,
            output_ptr,
            slot_offset(i)?,
        );
    }

    builder.ins().return_(&[]);
    builder.finalize();

    module
        .define_function(func_id, &mut codegen_context)
        .map_err(|msg| BuilderError::FunctionError(msg.to_string()))?;
    module
        .finalize_definitions()
        .map_err(BuilderError::ModuleError)?;

    // SAFETY: compiled above with signature fn(*const f64, *mut f64)
    let raw_fn = unsafe {
        std::mem::transmute::<*const u8, RawCombinedFunction>(
            module.get_finalized_function(func_id),
        )
    };

    Ok(Arc::new(move |inputs: &[f64], results: &mut [f64]| {
        assert_eq!(
            results.len(),
            results_len,
            "Results buffer has incorrect length"
        );
        raw_fn(inputs.as_ptr(), results.as_mut_ptr());
    }))
}
