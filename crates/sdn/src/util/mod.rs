//! Utility functions.

pub mod addr;
pub mod ifname;

pub use addr::{IpFamily, MacAddr};
pub use ifname::{NameRegistry, gen_if_name};
