//! Login identity management
//!
//! This module owns the set of login identities a crawl may use and the error
//! budget that decides when an identity is retired.

mod pool;

pub use pool::{Credential, CredentialPool, Session};

use crate::ConfigError;
use serde_json::Value;
use std::path::Path;

/// Reads raw login material from a JSON file
///
/// # Arguments
///
/// * `path` - Path to a JSON file holding a flat list or a list of lists
///
/// # Returns
///
/// * `Ok(Value)` - The parsed material, not yet partitioned into identities
/// * `Err(ConfigError)` - The file could not be read or is not valid JSON
pub fn load_credentials_file(path: &Path) -> Result<Value, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| {
        ConfigError::InvalidCredentials(format!("{}: {}", path.display(), e))
    })
}
