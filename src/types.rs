use std::sync::Arc;

/// Type alias for a JIT-compiled function that evaluates a single decoded tree.
///
/// This represents a function that:
/// - Takes a slice of input values indexed by variable handle
/// - Returns the value of the tree at that point
/// - Is both Send and Sync for thread safety
pub type JITFunction = Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>;

/// Type alias for a JIT-compiled function that evaluates several trees at once.
///
/// The first slice holds the inputs, indexed by variable handle; the value of tree `i`
/// is written to `results[i]`.
pub type CombinedJITFunction = Arc<dyn Fn(&[f64], &mut [f64]) + Send + Sync>;
