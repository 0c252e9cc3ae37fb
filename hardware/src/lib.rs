//! Hardware drivers for the alignment bench.
//!
//! Each driver is feature-gated for optional compilation.
//!
//! # Features
//!
//! - `gantry` - Serial G-code gantry controller (enabled by default)

#[cfg(feature = "gantry")]
pub mod gantry;
