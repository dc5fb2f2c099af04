//! Declarative network emulation agent.
//!
//! A [`NetworkModel`](model::NetworkModel) describes ports, bonds, bridges,
//! networks and simulated endpoints. The agent validates it ([`parse`]),
//! compiles it into a graph of configuration items ([`compile`]), observes
//! which physical interfaces exist ([`observe`]) and reconciles the host
//! towards the intended graph ([`reconcile`]) through one
//! [`Configurator`](configurators::Configurator) per item type.
//!
//! # Example
//!
//! ```ignore
//! use sdn::agent::Agent;
//!
//! let agent = Agent::netlink();
//! let model = serde_json::from_str(&std::fs::read_to_string("net-model.json")?)?;
//! let status = agent.apply_model(model).await?;
//! for err in status.config_errors {
//!     eprintln!("{}: {}", err.item_ref, err.err_msg);
//! }
//! ```

pub mod agent;
pub mod compile;
pub mod configurators;
pub mod depgraph;
pub mod error;
pub mod items;
pub mod model;
pub mod observe;
pub mod os;
pub mod parse;
pub mod process;
pub mod reconcile;
pub mod util;

pub use error::{Error, Result};
