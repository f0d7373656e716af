//! FUNCTION LOAD
//!
//! Parses the `#!lua name=<library>` header, runs the body once in a fresh
//! [`ScriptHost`] to collect its registrations, and commits the resulting
//! [`Library`] to the registry only when everything succeeded.

use super::host::ScriptHost;
use super::registry::{FunctionDef, Library, Registry};
use crate::error::{FerriteError, Result};

const HEADER_PREFIX: &str = "#!lua name=";

/// Split a load payload into its library name and body
pub fn parse_header(payload: &str) -> Result<(String, &str)> {
    let rest = payload.strip_prefix(HEADER_PREFIX).ok_or_else(|| {
        FerriteError::InvalidHeader("Library must start with #!lua name=<library_name>".to_string())
    })?;

    let (name, body) = match rest.split_once('\n') {
        Some((name, body)) => (name, body),
        None => (rest, ""),
    };

    let name = name.trim();
    if name.is_empty() {
        return Err(FerriteError::InvalidHeader("Library name was not given".to_string()));
    }

    Ok((name.to_string(), body))
}

/// Run `body` and build the library it describes, without touching any
/// registry
pub fn compile_library(name: &str, body: &str) -> Result<Library> {
    let host = ScriptHost::new()?;
    host.exec_library(name, body)?;

    let registrations = host.registrations();
    if registrations.is_empty() {
        return Err(FerriteError::EmptyLibrary);
    }

    let functions = registrations
        .into_iter()
        .map(|reg| {
            let def = FunctionDef {
                name: reg.name.clone(),
                description: reg.description,
                flags: reg.flags,
                library: name.to_string(),
            };
            (reg.name, def)
        })
        .collect();

    Ok(Library {
        name: name.to_string(),
        code: body.to_string(),
        functions,
    })
}

/// Load `payload` into `registry`; returns the library name.
///
/// A duplicate name without `replace` is refused before any script code runs.
pub fn load(registry: &mut Registry, payload: &str, replace: bool) -> Result<String> {
    let (name, body) = parse_header(payload)?;
    if !replace && registry.contains_library(&name) {
        return Err(FerriteError::DuplicateLibrary(name));
    }

    let library = compile_library(&name, body)?;
    registry.put(library, replace)?;
    Ok(name)
}
