//! Minimal in-memory keyspace
//!
//! The scripting subsystem treats the storage engine as an external
//! collaborator; this module provides the small byte-string keyspace the
//! default command table executes against. Multiple logical databases,
//! selected by index, as in Redis.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{CinnabarError, CommandError, Result};

/// In-memory key-value store with numbered databases
pub struct Store {
    dbs: Vec<RwLock<HashMap<Vec<u8>, Vec<u8>>>>,
}

impl Store {
    /// Create a store with `databases` logical databases
    pub fn new(databases: usize) -> Self {
        let mut dbs = Vec::with_capacity(databases);
        for _ in 0..databases {
            dbs.push(RwLock::new(HashMap::new()));
        }
        Store { dbs }
    }

    fn db(&self, index: usize) -> Result<&RwLock<HashMap<Vec<u8>, Vec<u8>>>> {
        self.dbs
            .get(index)
            .ok_or_else(|| CinnabarError::Internal(format!("invalid DB index {}", index)))
    }

    /// Get the value of a key, if present
    pub fn get(&self, db_index: usize, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let db = self.db(db_index)?.read().unwrap();
        Ok(db.get(key).cloned())
    }

    /// Set a key to a value unconditionally
    pub fn set(&self, db_index: usize, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        let mut db = self.db(db_index)?.write().unwrap();
        db.insert(key, value);
        Ok(())
    }

    /// Delete a key, returning whether it existed
    pub fn delete(&self, db_index: usize, key: &[u8]) -> Result<bool> {
        let mut db = self.db(db_index)?.write().unwrap();
        Ok(db.remove(key).is_some())
    }

    /// Check key existence
    pub fn exists(&self, db_index: usize, key: &[u8]) -> Result<bool> {
        let db = self.db(db_index)?.read().unwrap();
        Ok(db.contains_key(key))
    }

    /// Add `delta` to the integer stored at `key`, treating a missing key
    /// as 0. Fails if the current value is not a valid integer.
    pub fn incr_by(&self, db_index: usize, key: &[u8], delta: i64) -> Result<i64> {
        let mut db = self.db(db_index)?.write().unwrap();
        let current = match db.get(key) {
            Some(bytes) => std::str::from_utf8(bytes)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or(CinnabarError::Command(CommandError::NotInteger))?,
            None => 0,
        };
        let next = current
            .checked_add(delta)
            .ok_or(CinnabarError::Command(CommandError::NotInteger))?;
        db.insert(key.to_vec(), next.to_string().into_bytes());
        Ok(next)
    }
}
