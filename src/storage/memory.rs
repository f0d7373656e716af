//! In-memory storage implementation
//!
//! This module implements the in-memory storage engine using DashMap for
//! concurrent access.

use std::collections::{HashMap, HashSet, VecDeque};

use bytes::Bytes;
use dashmap::DashMap;

/// Value types stored in the database
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// String value
    String(Bytes),
    /// List value (doubly-ended queue for efficient push/pop at both ends)
    List(VecDeque<Bytes>),
    /// Hash value (field-value mapping)
    Hash(HashMap<Bytes, Bytes>),
    /// Set value (unordered collection of unique elements)
    Set(HashSet<Bytes>),
}

impl Value {
    /// Name reported by the TYPE command
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Hash(_) => "hash",
            Value::Set(_) => "set",
        }
    }
}

/// A single database (Redis supports 16 by default)
#[derive(Debug, Default)]
pub struct Database {
    data: DashMap<Bytes, Value>,
}

impl Database {
    /// Create a new empty database
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Get a value by key
    pub fn get(&self, key: &Bytes) -> Option<Value> {
        self.data.get(key).map(|entry| entry.value().clone())
    }

    /// Set a value
    pub fn set(&self, key: Bytes, value: Value) {
        self.data.insert(key, value);
    }

    /// Delete a key
    pub fn del(&self, key: &Bytes) -> bool {
        self.data.remove(key).is_some()
    }

    /// Check if a key exists
    #[inline]
    pub fn exists(&self, key: &Bytes) -> bool {
        self.data.contains_key(key)
    }

    /// Get the number of keys in the database
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the database is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get all keys in the database
    pub fn keys(&self) -> Vec<Bytes> {
        self.data.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Clear all keys in the database (FLUSHDB)
    pub fn clear(&self) {
        self.data.clear();
    }
}

/// The main store containing all databases
#[derive(Debug)]
pub struct Store {
    databases: Vec<Database>,
}

impl Store {
    /// Create a new store with the specified number of databases
    pub fn new(num_databases: u8) -> Self {
        let databases = (0..num_databases).map(|_| Database::new()).collect();
        Self { databases }
    }

    /// Get a reference to a database, if the index is in range
    pub fn database(&self, index: u8) -> Option<&Database> {
        self.databases.get(index as usize)
    }

    /// Number of databases
    pub fn num_databases(&self) -> usize {
        self.databases.len()
    }

    /// Get a value from a specific database
    pub fn get(&self, db: u8, key: &Bytes) -> Option<Value> {
        self.database(db)?.get(key)
    }

    /// Set a value in a specific database
    pub fn set(&self, db: u8, key: Bytes, value: Value) {
        if let Some(database) = self.database(db) {
            database.set(key, value);
        }
    }

    /// Delete keys from a specific database
    pub fn del(&self, db: u8, keys: &[Bytes]) -> i64 {
        match self.database(db) {
            Some(database) => keys.iter().filter(|k| database.del(k)).count() as i64,
            None => 0,
        }
    }

    /// Check if keys exist in a specific database
    pub fn exists(&self, db: u8, keys: &[Bytes]) -> i64 {
        match self.database(db) {
            Some(database) => keys.iter().filter(|k| database.exists(k)).count() as i64,
            None => 0,
        }
    }

    /// Get all keys in a database
    pub fn keys(&self, db: u8) -> Vec<Bytes> {
        self.database(db).map(Database::keys).unwrap_or_default()
    }

    /// Number of keys in a database
    pub fn key_count(&self, db: u8) -> u64 {
        self.database(db).map(|d| d.len() as u64).unwrap_or(0)
    }

    /// Flush a single database
    pub fn flush_db(&self, db: u8) {
        if let Some(database) = self.database(db) {
            database.clear();
        }
    }

    /// Flush all databases
    pub fn flush_all(&self) {
        for database in &self.databases {
            database.clear();
        }
    }
}
