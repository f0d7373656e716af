//! Library and function registry
//!
//! Two coupled maps: library name -> [`Library`], and function name -> the
//! name of the library that owns it. The registry is not synchronized on its
//! own; the executor keeps it behind the single-writer lock.
//!
//! Every put stamps the library with a load sequence number. A function name
//! is owned by the most recently loaded library that defines it, so replaying
//! libraries in load order rebuilds the same index.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::host::FunctionFlag;
use crate::error::{FerriteError, Result};

/// Engine name reported by LIST and STATS
pub const ENGINE: &str = "LUA";

/// Metadata of one registered function
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionDef {
    /// Function name
    pub name: String,
    /// Optional description given at registration
    pub description: Option<String>,
    /// Declared flags
    pub flags: BTreeSet<FunctionFlag>,
    /// Name of the owning library
    pub library: String,
}

impl FunctionDef {
    /// Whether the function may be called through FCALL_RO
    pub fn is_read_only(&self) -> bool {
        self.flags.contains(&FunctionFlag::NoWrites)
    }
}

/// A loaded library
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Library {
    /// Library name from the `#!lua name=` header
    pub name: String,
    /// Library body, everything after the header line
    pub code: String,
    /// Functions registered by the body
    pub functions: BTreeMap<String, FunctionDef>,
}

/// What a load does with function names owned by another library
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CollisionPolicy {
    /// Fail with "Function already exists"
    #[default]
    Reject,
    /// Point the name at the newly loaded library
    Override,
}

/// In-memory registry of libraries and their functions
#[derive(Debug, Default)]
pub struct Registry {
    libraries: BTreeMap<String, Library>,
    /// Function name -> owning library name
    functions: HashMap<String, String>,
    /// Library name -> load sequence number
    loaded_at: HashMap<String, u64>,
    next_sequence: u64,
    policy: CollisionPolicy,
}

impl Registry {
    /// Create an empty registry
    pub fn new(policy: CollisionPolicy) -> Self {
        Self {
            libraries: BTreeMap::new(),
            functions: HashMap::new(),
            loaded_at: HashMap::new(),
            next_sequence: 0,
            policy,
        }
    }

    /// An empty registry with the same collision policy
    pub fn empty_like(&self) -> Self {
        Self::new(self.policy)
    }

    /// Whether a library named `name` is loaded
    pub fn contains_library(&self, name: &str) -> bool {
        self.libraries.contains_key(name)
    }

    /// Look up a library by name
    pub fn library(&self, name: &str) -> Option<&Library> {
        self.libraries.get(name)
    }

    /// Insert `library`, or swap it in for an existing one when `replace`
    /// is set. Nothing changes on error.
    pub fn put(&mut self, library: Library, replace: bool) -> Result<()> {
        let exists = self.libraries.contains_key(&library.name);
        if exists && !replace {
            return Err(FerriteError::DuplicateLibrary(library.name));
        }

        if self.policy == CollisionPolicy::Reject {
            for function in library.functions.keys() {
                if let Some(owner) = self.functions.get(function) {
                    if owner != &library.name && self.libraries.contains_key(owner) {
                        return Err(FerriteError::FunctionExists(function.clone()));
                    }
                }
            }
        }

        for function in library.functions.keys() {
            if let Some(previous) = self.functions.get(function) {
                if previous != &library.name {
                    tracing::warn!(
                        function = %function,
                        previous = %previous,
                        library = %library.name,
                        "Function taken over by another library"
                    );
                }
            }
        }

        tracing::info!(
            library = %library.name,
            functions = library.functions.len(),
            replaced = exists,
            "Function library registered"
        );
        self.loaded_at.insert(library.name.clone(), self.next_sequence);
        self.next_sequence += 1;
        self.libraries.insert(library.name.clone(), library);
        self.reindex();
        Ok(())
    }

    /// Delete a library. Names it owned fall back to the most recently
    /// loaded remaining library that defines them.
    pub fn remove(&mut self, name: &str) -> Result<Library> {
        let library = self
            .libraries
            .remove(name)
            .ok_or_else(|| FerriteError::LibraryNotFound(name.to_string()))?;
        self.loaded_at.remove(name);
        self.reindex();

        tracing::info!(library = %name, "Function library deleted");
        Ok(library)
    }

    /// Drop every library; returns how many were loaded
    pub fn clear(&mut self) -> usize {
        let count = self.libraries.len();
        self.libraries.clear();
        self.functions.clear();
        self.loaded_at.clear();
        count
    }

    /// Resolve a function to its definition and owning library
    pub fn lookup_function(&self, name: &str) -> Result<(&FunctionDef, &Library)> {
        let not_found = || FerriteError::FunctionNotFound(name.to_string());

        let owner = self.functions.get(name).ok_or_else(not_found)?;
        let library = self.libraries.get(owner).ok_or_else(not_found)?;
        let function = library.functions.get(name).ok_or_else(not_found)?;
        Ok((function, library))
    }

    /// Libraries in name order, optionally restricted to one name
    pub fn list<'a>(&'a self, filter: Option<&'a str>) -> impl Iterator<Item = &'a Library> + 'a {
        self.libraries
            .values()
            .filter(move |library| filter.map_or(true, |name| library.name == name))
    }

    /// Libraries in the order they were loaded, oldest first
    pub fn in_load_order(&self) -> Vec<&Library> {
        let mut libraries: Vec<&Library> = self.libraries.values().collect();
        libraries.sort_by_key(|library| self.loaded_at.get(&library.name).copied());
        libraries
    }

    /// Number of loaded libraries
    pub fn len(&self) -> usize {
        self.libraries.len()
    }

    /// Whether no library is loaded
    pub fn is_empty(&self) -> bool {
        self.libraries.is_empty()
    }

    /// Number of callable function names
    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    fn reindex(&mut self) {
        let mut functions = HashMap::new();
        for library in self.in_load_order() {
            for function in library.functions.keys() {
                functions.insert(function.clone(), library.name.clone());
            }
        }
        self.functions = functions;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library(name: &str, functions: &[&str]) -> Library {
        Library {
            name: name.to_string(),
            code: "-- body".to_string(),
            functions: functions
                .iter()
                .map(|f| {
                    (
                        f.to_string(),
                        FunctionDef {
                            name: f.to_string(),
                            description: None,
                            flags: BTreeSet::new(),
                            library: name.to_string(),
                        },
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn test_put_and_lookup() {
        let mut registry = Registry::default();
        registry.put(library("lib", &["a", "b"]), false).unwrap();

        let (function, owner) = registry.lookup_function("a").unwrap();
        assert_eq!(function.name, "a");
        assert_eq!(owner.name, "lib");
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.function_count(), 2);
    }

    #[test]
    fn test_duplicate_library() {
        let mut registry = Registry::default();
        registry.put(library("lib", &["a"]), false).unwrap();
        assert_eq!(
            registry.put(library("lib", &["b"]), false).unwrap_err(),
            FerriteError::DuplicateLibrary("lib".to_string())
        );
        // Still the original function set
        assert!(registry.lookup_function("a").is_ok());
        assert!(registry.lookup_function("b").is_err());
    }

    #[test]
    fn test_replace_swaps_function_set() {
        let mut registry = Registry::default();
        registry.put(library("lib", &["a", "b"]), false).unwrap();
        registry.put(library("lib", &["c"]), true).unwrap();

        assert!(registry.lookup_function("a").is_err());
        assert!(registry.lookup_function("b").is_err());
        assert!(registry.lookup_function("c").is_ok());
        assert_eq!(registry.function_count(), 1);
    }

    #[test]
    fn test_collision_rejected() {
        let mut registry = Registry::new(CollisionPolicy::Reject);
        registry.put(library("lib1", &["shared"]), false).unwrap();
        assert_eq!(
            registry.put(library("lib2", &["shared"]), false).unwrap_err(),
            FerriteError::FunctionExists("shared".to_string())
        );
        assert!(!registry.contains_library("lib2"));
    }

    #[test]
    fn test_collision_override() {
        let mut registry = Registry::new(CollisionPolicy::Override);
        registry.put(library("lib1", &["shared", "one"]), false).unwrap();
        registry.put(library("lib2", &["shared"]), false).unwrap();
        assert_eq!(registry.lookup_function("shared").unwrap().1.name, "lib2");

        // lib1 no longer owns "shared", so deleting it leaves lib2's entry
        registry.remove("lib1").unwrap();
        assert_eq!(registry.lookup_function("shared").unwrap().1.name, "lib2");
        assert!(registry.lookup_function("one").is_err());
    }

    #[test]
    fn test_override_ownership_follows_load_order() {
        let mut registry = Registry::new(CollisionPolicy::Override);
        registry.put(library("zlib", &["f"]), false).unwrap();
        registry.put(library("alib", &["f"]), false).unwrap();
        assert_eq!(registry.lookup_function("f").unwrap().1.name, "alib");

        let order: Vec<_> = registry.in_load_order().iter().map(|l| l.name.clone()).collect();
        assert_eq!(order, vec!["zlib", "alib"]);

        // Replaying in load order rebuilds the same owner
        let mut replayed = registry.empty_like();
        for lib in registry.in_load_order() {
            replayed.put(lib.clone(), false).unwrap();
        }
        assert_eq!(replayed.lookup_function("f").unwrap().1.name, "alib");

        // Reloading zlib takes the name back
        registry.put(library("zlib", &["f"]), true).unwrap();
        assert_eq!(registry.lookup_function("f").unwrap().1.name, "zlib");

        // Deleting the owner hands the name back to the remaining definer
        registry.remove("zlib").unwrap();
        assert_eq!(registry.lookup_function("f").unwrap().1.name, "alib");
    }

    #[test]
    fn test_remove() {
        let mut registry = Registry::default();
        registry.put(library("lib", &["a"]), false).unwrap();
        registry.remove("lib").unwrap();
        assert!(registry.is_empty());
        assert_eq!(
            registry.lookup_function("a").unwrap_err(),
            FerriteError::FunctionNotFound("a".to_string())
        );
        assert_eq!(
            registry.remove("lib").unwrap_err(),
            FerriteError::LibraryNotFound("lib".to_string())
        );
    }

    #[test]
    fn test_list_filter_and_order() {
        let mut registry = Registry::default();
        registry.put(library("zeta", &["z"]), false).unwrap();
        registry.put(library("alpha", &["a"]), false).unwrap();

        let names: Vec<_> = registry.list(None).map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert_eq!(registry.list(Some("zeta")).count(), 1);
        assert_eq!(registry.list(Some("missing")).count(), 0);
    }

    #[test]
    fn test_clear() {
        let mut registry = Registry::default();
        registry.put(library("a", &["f"]), false).unwrap();
        registry.put(library("b", &["g"]), false).unwrap();
        assert_eq!(registry.clear(), 2);
        assert!(registry.is_empty());
        assert_eq!(registry.function_count(), 0);
    }
}
