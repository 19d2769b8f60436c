//! Driver components.
//!
//! - `sdk`: binding boundary to the vendor library
//! - `connection`: library lifecycle and camera handles
//! - `features`: typed feature access
//! - `sequencer`, `overflow`, `ring`: the buffer engine
//! - `decoder`: raw buffer to pixels and metadata
//! - `acquisition`: the controller composing the above

pub mod acquisition;
pub mod connection;
pub mod decoder;
pub mod features;
#[cfg(feature = "mock")]
pub mod mock;
pub mod overflow;
pub mod ring;
pub mod sdk;
pub mod sequencer;
