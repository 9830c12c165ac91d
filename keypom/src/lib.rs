//! Keypom linkdrop SDK for NEAR.
//!
//! Re-exports [`keypom_core`]. The `ffi` feature forwards to `keypom-core/ffi`, which exports the
//! logging bridge, [`Network`] and [`KeypomError`] through uniffi. Sessions and drop operations
//! are used from Rust.

pub use keypom_core::*;
