//! Decoder configuration.
//!
//! The decoder has no file-based configuration; callers hand it a [`DecodeOptions`]
//! value describing the target system: how it spells infinity and "not available",
//! whether it has native min/max nodes, and how auxiliary variables are named.

/// Special values the upstream system stores in the constant pool.
pub mod sentinel {
    pub const UNDEF: f64 = 1.0e300;
    pub const NA: f64 = 2.0e300;
    pub const PINF: f64 = 3.0e300;
    pub const MINF: f64 = 4.0e300;
    pub const EPS: f64 = 5.0e300;
    pub const ACR: f64 = 10.0e300;
}

/// Target-side representation of the upstream special values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpecialValues {
    /// Value used for `+inf`; `-infinity` is used for `-inf`
    pub infinity: f64,
    /// Value used for "not available"; `None` makes NA an unmapped constant
    pub not_available: Option<f64>,
}

impl Default for SpecialValues {
    fn default() -> Self {
        Self {
            infinity: f64::INFINITY,
            not_available: Some(f64::NAN),
        }
    }
}

impl SpecialValues {
    /// Translates a pool value. Ordinary numbers pass through; `None` means the value is
    /// a sentinel without a target counterpart.
    pub fn map(&self, value: f64) -> Option<f64> {
        if value == sentinel::PINF {
            Some(self.infinity)
        } else if value == sentinel::MINF {
            Some(-self.infinity)
        } else if value == sentinel::EPS {
            Some(0.0)
        } else if value == sentinel::NA {
            self.not_available
        } else if value == sentinel::UNDEF || value == sentinel::ACR {
            None
        } else {
            Some(value)
        }
    }
}

/// Options for one decoder instance.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeOptions {
    pub special_values: SpecialValues,
    /// Emit `Binary(Min|Max)` nodes instead of the absolute-value rewrite
    pub native_min_max: bool,
    /// Prefix for auxiliary variable names; a per-decode counter is appended
    pub logic_prefix: String,
    /// Fold unary functions applied to literals
    pub fold_functions: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            special_values: SpecialValues::default(),
            native_min_max: false,
            logic_prefix: "_logic".to_string(),
            fold_functions: true,
        }
    }
}

impl DecodeOptions {
    pub fn with_infinity(mut self, infinity: f64) -> Self {
        self.special_values.infinity = infinity;
        self
    }

    pub fn with_not_available(mut self, value: Option<f64>) -> Self {
        self.special_values.not_available = value;
        self
    }

    pub fn with_native_min_max(mut self, native: bool) -> Self {
        self.native_min_max = native;
        self
    }

    pub fn with_logic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.logic_prefix = prefix.into();
        self
    }

    pub fn with_fold_functions(mut self, fold: bool) -> Self {
        self.fold_functions = fold;
        self
    }
}
