//! Interface name generation and collision tracking.

use std::collections::BTreeMap;

use crate::{Error, Result};

/// Maximum interface name length (including null terminator).
pub const IFNAMSIZ: usize = 16;

/// Maximum usable interface name length.
pub const IF_NAME_MAX_LEN: usize = IFNAMSIZ - 1;

const HASH_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyzABCDEF";
const MAX_HASH_LEN: usize = 6;
const MIN_HASH_LEN: usize = 3;

/// Validate an interface name.
pub fn validate(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::compile("invalid interface name: empty name"));
    }

    if name.len() >= IFNAMSIZ {
        return Err(Error::compile(format!(
            "invalid interface name {}: too long (max {} chars)",
            name, IF_NAME_MAX_LEN
        )));
    }

    if name.contains('/') || name.contains('\0') || name.chars().any(|c| c.is_whitespace()) {
        return Err(Error::compile(format!(
            "invalid interface name {}: contains invalid characters",
            name
        )));
    }

    Ok(())
}

fn fnv1a32(data: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for b in data {
        hash ^= u32::from(*b);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Derive a kernel-length-limited interface name from a prefix and a
/// logical label.
///
/// `prefix + label` is used verbatim when it fits. Otherwise the label is
/// replaced with a short rendering of its FNV-1a hash, five bits per
/// character.
pub fn gen_if_name(prefix: &str, label: &str) -> Result<String> {
    let name = format!("{}{}", prefix, label);
    if name.len() <= IF_NAME_MAX_LEN {
        return Ok(name);
    }

    let hash_len = IF_NAME_MAX_LEN.saturating_sub(prefix.len()).min(MAX_HASH_LEN);
    if hash_len < MIN_HASH_LEN {
        return Err(Error::compile(format!(
            "interface name prefix {} is too long",
            prefix
        )));
    }

    let mut hash = fnv1a32(label.as_bytes());
    let mut suffix = vec![0u8; hash_len];
    for slot in suffix.iter_mut().rev() {
        *slot = HASH_ALPHABET[(hash & 0x1f) as usize];
        hash >>= 5;
    }

    let mut name = String::with_capacity(prefix.len() + hash_len);
    name.push_str(prefix);
    name.extend(suffix.into_iter().map(char::from));
    Ok(name)
}

/// Per-compile table of generated interface names.
///
/// Fails when two different logical labels map onto the same name.
#[derive(Debug, Default)]
pub struct NameRegistry {
    names: BTreeMap<String, String>,
}

impl NameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate (or return the already generated) name for `label`.
    pub fn if_name(&mut self, prefix: &str, label: &str) -> Result<String> {
        let name = gen_if_name(prefix, label)?;
        match self.names.get(&name) {
            Some(owner) if owner != label => Err(Error::compile(format!(
                "interface name collision: {} is generated for both {} and {}",
                name, owner, label
            ))),
            Some(_) => Ok(name),
            None => {
                self.names.insert(name.clone(), label.to_string());
                Ok(name)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
