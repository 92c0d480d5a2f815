use std::collections::{BTreeMap, HashMap};

use crate::core::CoreError;

/// One on-disk key/value object: name -> array of integers.
#[derive(Debug, Clone, Default)]
pub struct KvObject {
    entries: BTreeMap<String, Vec<u64>>,
}

/// The key/value objects of the meta object set. Integer-keyed helpers
/// store their keys as decimal strings.
#[derive(Debug, Default)]
pub struct KvStore {
    objects: HashMap<u64, KvObject>,
}

impl KvStore {
    /// Create an empty object under the given id.
    pub fn create(&mut self, object: u64) {
        self.objects.entry(object).or_default();
    }

    /// Destroy an object and everything in it.
    pub fn destroy(&mut self, object: u64) -> Result<(), CoreError> {
        self.objects
            .remove(&object)
            .map(|_| ())
            .ok_or(CoreError::ObjectNotFound { object })
    }

    pub fn exists(&self, object: u64) -> bool {
        self.objects.contains_key(&object)
    }

    fn get(&self, object: u64) -> Result<&KvObject, CoreError> {
        self.objects
            .get(&object)
            .ok_or(CoreError::ObjectNotFound { object })
    }

    fn get_mut(&mut self, object: u64) -> Result<&mut KvObject, CoreError> {
        self.objects
            .get_mut(&object)
            .ok_or(CoreError::ObjectNotFound { object })
    }

    pub fn lookup(&self, object: u64, name: &str) -> Option<Vec<u64>> {
        self.objects
            .get(&object)
            .and_then(|o| o.entries.get(name).cloned())
    }

    /// Create or overwrite an entry.
    pub fn update(&mut self, object: u64, name: &str, value: &[u64]) -> Result<(), CoreError> {
        self.get_mut(object)?
            .entries
            .insert(name.to_string(), value.to_vec());
        Ok(())
    }

    pub fn remove(&mut self, object: u64, name: &str) -> Result<(), CoreError> {
        self.get_mut(object)?
            .entries
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| CoreError::EntryNotFound {
                key: name.to_string(),
            })
    }

    pub fn count(&self, object: u64) -> Result<u64, CoreError> {
        Ok(self.get(object)?.entries.len() as u64)
    }

    /// The first entry in cursor order, decoded as an integer key and its
    /// first integer value. Drain loops re-fetch this after removing the
    /// entry they retrieved.
    pub fn first_int(&self, object: u64) -> Result<Option<(u64, u64)>, CoreError> {
        let obj = self.get(object)?;
        for (name, value) in obj.entries.iter() {
            if let Ok(key) = name.parse::<u64>() {
                return Ok(Some((key, value.first().copied().unwrap_or(0))));
            }
        }
        Ok(None)
    }

    /// Add an integer-keyed entry; the key must not already exist.
    pub fn add_int_key(&mut self, object: u64, key: u64, value: u64) -> Result<(), CoreError> {
        let obj = self.get_mut(object)?;
        let name = key.to_string();
        if obj.entries.contains_key(&name) {
            return Err(CoreError::EntryExists { key: name });
        }
        obj.entries.insert(name, vec![value]);
        Ok(())
    }

    pub fn lookup_int_key(&self, object: u64, key: u64) -> Result<u64, CoreError> {
        self.get(object)?
            .entries
            .get(&key.to_string())
            .map(|v| v.first().copied().unwrap_or(0))
            .ok_or_else(|| CoreError::EntryNotFound {
                key: key.to_string(),
            })
    }

    pub fn remove_int(&mut self, object: u64, key: u64) -> Result<(), CoreError> {
        self.remove(object, &key.to_string())
    }

    /// Bulk enqueue: add every key of `from` into `to`, all under `value`.
    pub fn join_key(&mut self, from: u64, to: u64, value: u64) -> Result<(), CoreError> {
        let keys: Vec<String> = self.get(from)?.entries.keys().cloned().collect();
        let dst = self.get_mut(to)?;
        for key in keys {
            if dst.entries.contains_key(&key) {
                return Err(CoreError::EntryExists { key });
            }
            dst.entries.insert(key, vec![value]);
        }
        Ok(())
    }
}
