//! Constant pool and variable resolution.
//!
//! Both are owned by the caller: the pool is the model-wide array of literal values that
//! constant-referencing instructions index into, and the resolver maps the model's raw
//! column index to the solver's own variable handle.

use crate::{
    errors::DecodeError,
    expr::{VarHandle, VarRef},
    options::SpecialValues,
};

/// Read-only view of the caller's literal values.
#[derive(Debug, Clone, Copy)]
pub struct ConstantPool<'a> {
    values: &'a [f64],
}

impl<'a> ConstantPool<'a> {
    pub fn new(values: &'a [f64]) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the value at a 0-based address, with sentinels translated.
    pub fn get(&self, address: i64, special: &SpecialValues) -> Result<f64, DecodeError> {
        let raw = usize::try_from(address)
            .ok()
            .and_then(|idx| self.values.get(idx))
            .copied()
            .ok_or(DecodeError::AddressOutOfRange {
                kind: "constant",
                address,
            })?;
        special.map(raw).ok_or(DecodeError::UnmappedConstant(raw))
    }
}

impl<'a> From<&'a [f64]> for ConstantPool<'a> {
    fn from(values: &'a [f64]) -> Self {
        Self::new(values)
    }
}

impl<'a> From<&'a Vec<f64>> for ConstantPool<'a> {
    fn from(values: &'a Vec<f64>) -> Self {
        Self::new(values)
    }
}

/// Maps a raw (0-based) model column index to a solver variable.
pub trait VariableResolver {
    fn resolve(&self, raw_index: usize) -> Option<VarRef>;
}

impl<F> VariableResolver for F
where
    F: Fn(usize) -> Option<VarRef>,
{
    fn resolve(&self, raw_index: usize) -> Option<VarRef> {
        self(raw_index)
    }
}

/// Explicit column table: entry `j` is the solver variable of model column `j`.
#[derive(Debug, Clone, Default)]
pub struct ColumnMap {
    columns: Vec<VarRef>,
}

impl ColumnMap {
    /// Identity mapping over `n` continuous variables.
    pub fn continuous(n: usize) -> Self {
        Self {
            columns: (0..n).map(VarRef::continuous).collect(),
        }
    }

    /// Identity mapping where `binary[j]` flags column `j` as binary.
    pub fn with_binaries(binary: &[bool]) -> Self {
        Self {
            columns: binary
                .iter()
                .enumerate()
                .map(|(j, &b)| VarRef { handle: j, binary: b })
                .collect(),
        }
    }

    /// Mapping through a solver permutation: column `j` becomes handle `order[j]`.
    pub fn permuted(order: &[VarHandle]) -> Self {
        Self {
            columns: order.iter().map(|&h| VarRef::continuous(h)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl VariableResolver for ColumnMap {
    fn resolve(&self, raw_index: usize) -> Option<VarRef> {
        self.columns.get(raw_index).copied()
    }
}
