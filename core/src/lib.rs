//! # Frame Graph Core
//!
//! Basic utilities shared by the frame graph crates: generation-checked
//! handle pools and profiling macros.

pub mod pool;
pub mod profiling;

/// Core library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
