//! Derived analytics over the stored draw history.

pub mod markov;
pub mod stats;
