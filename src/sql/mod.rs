//! SQL handling between model output and execution

pub mod extractor;
pub mod safety;

pub use extractor::extract;
pub use safety::{SafetyGate, SafetyVerdict};
