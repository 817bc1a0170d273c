//! Profiling support via Tracy.
//!
//! Re-exports the CPU profiling macros of [`framegraph_core::profiling`]. With
//! the `profiling` feature off every macro compiles to nothing.
//!
//! # Enabling Profiling
//!
//! ```toml
//! [dependencies]
//! framegraph = { version = "0.1", features = ["profiling"] }
//! ```
//!
//! ```ignore
//! use framegraph::profiling::{profile_function, profile_scope};
//!
//! fn build_frame() {
//!     profile_function!();
//!     {
//!         profile_scope!("culling");
//!     }
//! }
//! ```
//!
//! Spans need a running Tracy client. [`Device::new`](crate::device::Device::new)
//! calls [`start`], so profiled code reached through a device is covered.

pub use framegraph_core::profiling::*;

/// Start the Tracy client; does nothing without the `profiling` feature.
///
/// Safe to call more than once.
pub fn start() {
    #[cfg(feature = "profiling")]
    {
        let _client = tracy_client::Client::start();
        log::debug!("Tracy client running");
    }
}

/// Returns true if profiling support was compiled in.
pub fn is_enabled() -> bool {
    cfg!(feature = "profiling")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_is_idempotent() {
        start();
        start();
        assert_eq!(is_enabled(), cfg!(feature = "profiling"));
    }
}
