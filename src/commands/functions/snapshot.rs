//! FUNCTION DUMP / FUNCTION RESTORE
//!
//! The payload is base64 (standard alphabet) over JSON:
//!
//! ```text
//! {"version":1,"libraries":[{"name":"mylib","code":"..."}]}
//! ```
//!
//! Only library names and bodies are stored, in load order; function
//! definitions are rebuilt by re-running each body on restore, which also
//! rebuilds function ownership. A bare JSON array of library records is
//! accepted as well.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::loader;
use super::registry::Registry;
use crate::error::{FerriteError, Result};

/// Current payload version
pub const DUMP_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LibraryRecord {
    name: String,
    code: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    libraries: Vec<LibraryRecord>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Payload {
    Versioned(Snapshot),
    Bare(Vec<LibraryRecord>),
}

/// How RESTORE treats libraries that are already loaded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RestorePolicy {
    /// Discard everything, then load the payload
    #[default]
    Flush,
    /// Keep existing libraries; a name clash fails the restore
    Append,
    /// Keep existing libraries; clashing names are replaced
    Replace,
}

impl RestorePolicy {
    /// Parse a RESTORE policy argument (case-insensitive)
    pub fn parse(arg: &str) -> Option<Self> {
        match arg.to_ascii_uppercase().as_str() {
            "FLUSH" => Some(RestorePolicy::Flush),
            "APPEND" => Some(RestorePolicy::Append),
            "REPLACE" => Some(RestorePolicy::Replace),
            _ => None,
        }
    }
}

/// Serialize every loaded library, oldest first
pub fn dump(registry: &Registry) -> Result<String> {
    let snapshot = Snapshot {
        version: DUMP_VERSION,
        libraries: registry
            .in_load_order()
            .into_iter()
            .map(|library| LibraryRecord {
                name: library.name.clone(),
                code: library.code.clone(),
            })
            .collect(),
    };

    let json = serde_json::to_vec(&snapshot)
        .map_err(|e| FerriteError::Internal(format!("Failed to serialize functions: {}", e)))?;
    Ok(STANDARD.encode(json))
}

fn decode(payload: &[u8]) -> Result<Vec<LibraryRecord>> {
    let json = STANDARD
        .decode(payload)
        .map_err(|e| FerriteError::InvalidPayload(e.to_string()))?;

    match serde_json::from_slice::<Payload>(&json) {
        Ok(Payload::Versioned(snapshot)) if snapshot.version == DUMP_VERSION => {
            Ok(snapshot.libraries)
        }
        Ok(Payload::Versioned(snapshot)) => Err(FerriteError::InvalidPayload(format!(
            "unsupported version {}",
            snapshot.version
        ))),
        Ok(Payload::Bare(libraries)) => Ok(libraries),
        Err(e) => Err(FerriteError::InvalidPayload(e.to_string())),
    }
}

/// Rebuild `registry` from `payload`.
///
/// Libraries are loaded into a staging registry in payload order, which is
/// swapped in only when every record loaded. On error `registry` is
/// unchanged. Returns the number of libraries restored.
pub fn restore(registry: &mut Registry, payload: &[u8], policy: RestorePolicy) -> Result<usize> {
    let records = decode(payload)?;

    let mut staging = registry.empty_like();
    if policy != RestorePolicy::Flush {
        for library in registry.in_load_order() {
            staging.put(library.clone(), false)?;
        }
    }

    for record in &records {
        if policy == RestorePolicy::Append && staging.contains_library(&record.name) {
            return Err(FerriteError::DuplicateLibrary(record.name.clone()));
        }
        if record.name.is_empty() {
            return Err(FerriteError::InvalidPayload("library name was not given".to_string()));
        }
        let library = loader::compile_library(&record.name, &record.code)?;
        staging.put(library, true)?;
    }

    *registry = staging;
    tracing::info!(libraries = records.len(), ?policy, "Function libraries restored");
    Ok(records.len())
}
