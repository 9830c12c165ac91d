#![deny(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
//! Client SDK for Keypom linkdrops on NEAR.
//!
//! A [`Keypom`] session derives linkdrop keys, estimates the exact deposit a batch of keys
//! needs, and orchestrates the ordered transactions (drop creation, asset funding, claims,
//! deletion) against a host-provided ledger client.
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// The NEAR network a session is bound to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, Serialize, Deserialize,
)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// NEAR mainnet.
    Mainnet,
    /// NEAR testnet.
    Testnet,
}

mod error;
pub use error::*;

pub mod config;
pub use config::{FunderConfig, KeypomConfig};

pub mod defaults;
pub mod drops;
pub mod estimator;
pub mod keys;
pub mod ledger;
pub mod logger;
pub mod orchestrator;
pub mod primitives;
pub mod trial;

mod session;
pub use session::*;

// private modules
mod http_request;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!("keypom_core");
