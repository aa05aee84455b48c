//! gptrelay - Streaming chat proxy
//!
//! Relays chat turns to either a credential-keyed API backend or a shared
//! session backend, streaming partial replies back to the caller. The
//! dispatch core tracks per-credential clients, the default backend mode and
//! a model cooldown for the session account.

pub mod admin;
pub mod audit;
pub mod backend;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod proxy;
pub mod testing;
pub mod turn;

pub use error::RelayError;
