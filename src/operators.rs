//! External math functions callable from JIT-compiled code.
//!
//! Cranelift has native instructions for `abs`, `sqrt`, `min`, `max` and `copysign`, but
//! not for the transcendental functions. Those are linked as imports: every
//! [`MathFn`] is registered as a symbol on the `JITBuilder` and declared on first use in
//! each compiled function.

use std::collections::HashMap;

use cranelift::prelude::*;
use cranelift_codegen::ir::FuncRef;
use cranelift_jit::JITBuilder;
use cranelift_module::{FuncId, Linkage, Module};

use crate::errors::BuilderError;

/// A function imported into compiled code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum MathFn {
    Exp,
    Log,
    Sin,
    Cos,
    Pow,
}

extern "C" fn jit_exp(x: f64) -> f64 {
    x.exp()
}

extern "C" fn jit_log(x: f64) -> f64 {
    x.ln()
}

extern "C" fn jit_sin(x: f64) -> f64 {
    x.sin()
}

extern "C" fn jit_cos(x: f64) -> f64 {
    x.cos()
}

extern "C" fn jit_pow(x: f64, y: f64) -> f64 {
    x.powf(y)
}

impl MathFn {
    const ALL: [MathFn; 5] = [
        MathFn::Exp,
        MathFn::Log,
        MathFn::Sin,
        MathFn::Cos,
        MathFn::Pow,
    ];

    fn symbol(self) -> &'static str {
        match self {
            MathFn::Exp => "nlc_exp",
            MathFn::Log => "nlc_log",
            MathFn::Sin => "nlc_sin",
            MathFn::Cos => "nlc_cos",
            MathFn::Pow => "nlc_pow",
        }
    }

    fn arity(self) -> usize {
        match self {
            MathFn::Pow => 2,
            _ => 1,
        }
    }

    fn address(self) -> *const u8 {
        match self {
            MathFn::Exp => jit_exp as *const u8,
            MathFn::Log => jit_log as *const u8,
            MathFn::Sin => jit_sin as *const u8,
            MathFn::Cos => jit_cos as *const u8,
            MathFn::Pow => jit_pow as *const u8,
        }
    }
}

/// Makes every [`MathFn`] resolvable by the JIT linker.
pub(crate) fn register_symbols(builder: &mut JITBuilder) {
    for func in MathFn::ALL {
        builder.symbol(func.symbol(), func.address());
    }
}

/// Declares `func` as an import of `module`, with signature `(f64, ...) -> f64`.
pub(crate) fn link(module: &mut dyn Module, func: MathFn) -> Result<FuncId, BuilderError> {
    let mut sig = module.make_signature();
    for _ in 0..func.arity() {
        sig.params.push(AbiParam::new(types::F64));
    }
    sig.returns.push(AbiParam::new(types::F64));

    module
        .declare_function(func.symbol(), Linkage::Import, &sig)
        .map_err(|e| BuilderError::DeclarationError(e.to_string()))
}

/// Imports referenced by the function under construction, declared once each.
#[derive(Default)]
pub(crate) struct Imports {
    refs: HashMap<MathFn, FuncRef>,
}

impl Imports {
    /// Emits a call to `func` and returns its result.
    pub(crate) fn call(
        &mut self,
        builder: &mut FunctionBuilder,
        module: &mut dyn Module,
        func: MathFn,
        args: &[Value],
    ) -> Result<Value, BuilderError> {
        let func_ref = match self.refs.get(&func) {
            Some(func_ref) => *func_ref,
            None => {
                let id = link(module, func)?;
                let func_ref = module.declare_func_in_func(id, builder.func);
                self.refs.insert(func, func_ref);
                func_ref
            }
        };
        let call = builder.ins().call(func_ref, args);
        Ok(builder.inst_results(call)[0])
    }
}
