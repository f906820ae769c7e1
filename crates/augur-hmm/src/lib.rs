//! # augur-hmm
//!
//! Discrete-emission hidden Markov models: numerically scaled Baum-Welch
//! training, multi-step observation forecasts, and the seeded random source
//! and scratch buffers the engine runs on.

pub mod hmm;
pub mod rng;
pub mod scratch;

pub use hmm::{Hmm, TrainReport};
pub use rng::DeterministicRng;
pub use scratch::ScratchPool;
