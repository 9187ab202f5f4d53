//! Credential pool implementation
//!
//! Tracks a per-identity error budget and hands identities out to execution
//! contexts. Identities are never removed, only marked unusable once their
//! error count reaches the configured maximum.

use crate::{ConfigError, TidemarkError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Mutex, MutexGuard};

/// One login identity with its usage counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    /// Position of the identity in the configured list
    pub index: usize,

    /// Opaque login material handed to the page driver (cookies, tokens, ...)
    pub payload: Value,

    /// Number of work items that finished while bound to this identity
    pub uses: u64,

    /// Current error count; never negative
    pub errors: u32,
}

/// The identity binding of one execution context
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    login_index: Option<usize>,
}

impl Session {
    /// Creates a session with no identity bound
    pub fn new() -> Self {
        Self::default()
    }

    /// The bound identity's index, if any
    pub fn login_index(&self) -> Option<usize> {
        self.login_index
    }
}

/// Pool of login identities shared by all execution contexts
#[derive(Debug)]
pub struct CredentialPool {
    identities: Mutex<Vec<Credential>>,
    max_error_count: u32,
}

impl CredentialPool {
    /// Builds a pool from configured login material
    ///
    /// A flat list (e.g. a list of cookie objects) is one identity; a list of
    /// lists is one identity per inner list. `null` or an empty list yields
    /// no identities.
    ///
    /// # Arguments
    ///
    /// * `credentials` - The raw login material
    /// * `max_error_count` - Errors at which an identity stops being usable
    /// * `required` - Whether the crawl cannot proceed without identities
    ///
    /// # Returns
    ///
    /// * `Ok(CredentialPool)` - The loaded pool
    /// * `Err(TidemarkError::Config)` - The material is neither shape
    /// * `Err(TidemarkError::NoCredentials)` - No identities but `required` is set
    pub fn load(
        credentials: &Value,
        max_error_count: u32,
        required: bool,
    ) -> Result<Self, TidemarkError> {
        let payloads = partition_identities(credentials)?;

        if payloads.is_empty() && required {
            return Err(TidemarkError::NoCredentials);
        }

        let identities = payloads
            .into_iter()
            .enumerate()
            .map(|(index, payload)| Credential {
                index,
                payload,
                uses: 0,
                errors: 0,
            })
            .collect();

        Ok(Self {
            identities: Mutex::new(identities),
            max_error_count,
        })
    }

    /// Creates a pool with no identities
    pub fn empty(max_error_count: u32) -> Self {
        Self {
            identities: Mutex::new(Vec::new()),
            max_error_count,
        }
    }

    /// Binds the first usable identity to the session
    ///
    /// # Returns
    ///
    /// * `Some(Credential)` - A copy of the bound identity
    /// * `None` - Every identity is exhausted
    pub fn acquire(&self, session: &mut Session) -> Option<Credential> {
        let identities = self.lock();
        let credential = identities
            .iter()
            .find(|c| c.errors < self.max_error_count)?
            .clone();

        session.login_index = Some(credential.index);
        tracing::debug!(
            "Bound login {} (errors: {}, uses: {})",
            credential.index,
            credential.errors,
            credential.uses
        );
        Some(credential)
    }

    /// Records a success for the session's identity
    ///
    /// Decrements the error count (never below zero) and increments uses.
    pub fn report_success(&self, session: &Session) {
        let Some(index) = session.login_index else {
            return;
        };

        let mut identities = self.lock();
        if let Some(credential) = identities.iter_mut().find(|c| c.index == index) {
            credential.errors = credential.errors.saturating_sub(1);
            credential.uses += 1;
        }
    }

    /// Records a credential-related failure for the session's identity
    pub fn report_failure(&self, session: &Session) {
        let Some(index) = session.login_index else {
            return;
        };

        let mut identities = self.lock();
        if let Some(credential) = identities.iter_mut().find(|c| c.index == index) {
            credential.errors += 1;
            credential.uses += 1;

            if credential.errors >= self.max_error_count {
                tracing::warn!(
                    "Login {} reached {} errors and is retired",
                    credential.index,
                    credential.errors
                );
            }
        }
    }

    /// Returns true if the session is unbound or its identity is under the error budget
    pub fn is_usable(&self, session: &Session) -> bool {
        let Some(index) = session.login_index else {
            return true;
        };

        self.lock()
            .iter()
            .find(|c| c.index == index)
            .map(|c| c.errors < self.max_error_count)
            .unwrap_or(true)
    }

    /// Number of configured identities, usable or not
    pub fn count(&self) -> usize {
        self.lock().len()
    }

    /// Number of identities still under the error budget
    pub fn usable_count(&self) -> usize {
        self.lock()
            .iter()
            .filter(|c| c.errors < self.max_error_count)
            .count()
    }

    pub fn max_error_count(&self) -> u32 {
        self.max_error_count
    }

    /// Copies every identity with its counters (for persistence)
    pub fn snapshot(&self) -> Vec<Credential> {
        self.lock().clone()
    }

    /// Restores counters from a previous snapshot
    ///
    /// Counters are matched by index; payloads keep their configured value so
    /// rotated login material is picked up on resume.
    pub fn restore(&self, snapshot: &[Credential]) {
        let mut identities = self.lock();
        for saved in snapshot {
            if let Some(credential) = identities.iter_mut().find(|c| c.index == saved.index) {
                credential.uses = saved.uses;
                credential.errors = saved.errors;
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Credential>> {
        self.identities
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Splits raw login material into one payload per identity
fn partition_identities(credentials: &Value) -> Result<Vec<Value>, ConfigError> {
    match credentials {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) if items.is_empty() => Ok(Vec::new()),
        Value::Array(items) if items[0].is_array() => {
            if let Some(pos) = items.iter().position(|item| !item.is_array()) {
                return Err(ConfigError::InvalidCredentials(format!(
                    "expected a list of lists, but entry {} is not a list",
                    pos
                )));
            }
            Ok(items.clone())
        }
        Value::Array(items) => {
            if items.iter().any(Value::is_array) {
                return Err(ConfigError::InvalidCredentials(
                    "mixed flat and nested credential lists".to_string(),
                ));
            }
            Ok(vec![Value::Array(items.clone())])
        }
        other => Err(ConfigError::InvalidCredentials(format!(
            "expected a list, got {}",
            json_kind(other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
