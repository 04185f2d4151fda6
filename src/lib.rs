//! Adaptive typing trainer: picks practice texts that exercise each user's
//! weak bigrams and learns from the keystrokes they send back.

pub mod config;
pub mod corpus;
pub mod engine;
pub mod error;
pub mod service;
pub mod session;
pub mod store;
