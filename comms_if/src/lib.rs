//! # Communications interface crate.
//!
//! Provides all common communications interfaces for the software.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Remote control telecommand packet definition and codec
pub mod tc;

/// Network module
pub mod net;
