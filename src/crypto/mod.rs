//! Chaos Image Pipeline - Cryptographic Core
//!
//! Key material and the logistic-map block scrambler the engine builds on.

pub mod key;
pub mod chaos;

pub use key::*;
pub use chaos::{ChaoticOrbit, Direction, scramble_plane, BLOCK_SIZE};
