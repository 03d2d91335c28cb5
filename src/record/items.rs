//! Session payload
//!
//! Ordered name → opaque value mapping plus the codec seam that turns it into
//! the `items` blob of a stored record.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Insertion-ordered mapping of item names to opaque values
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionItems {
    entries: Vec<(String, Bytes)>,
}

impl SessionItems {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Raw value of an item
    pub fn get(&self, name: &str) -> Option<&Bytes> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Insert or replace an item; a replaced item keeps its position
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Bytes>) -> Option<Bytes> {
        let name = name.into();
        let value = value.into();

        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((name, value));
                None
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Bytes> {
        let pos = self.entries.iter().position(|(key, _)| key == name)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Item names in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bytes)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Store a serializable value (bincode)
    pub fn set_value<T: Serialize>(&mut self, name: impl Into<String>, value: &T) -> Result<()> {
        let encoded = bincode::serialize(value)?;
        self.insert(name, encoded);
        Ok(())
    }

    /// Read back a value stored with [`SessionItems::set_value`]
    pub fn value<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match self.get(name) {
            Some(raw) => Ok(Some(bincode::deserialize(raw)?)),
            None => Ok(None),
        }
    }
}

impl<K, V> FromIterator<(K, V)> for SessionItems
where
    K: Into<String>,
    V: Into<Bytes>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut items = SessionItems::new();
        for (name, value) in iter {
            items.insert(name, value);
        }
        items
    }
}

/// Turns the session payload into the stored `items` blob and back
///
/// The engine never looks inside the blob.
pub trait ItemCodec: Send + Sync {
    fn encode(&self, items: &SessionItems) -> Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> Result<SessionItems>;
}

/// Default item codec: bincode over the ordered entry list
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeItemCodec;

impl ItemCodec for BincodeItemCodec {
    fn encode(&self, items: &SessionItems) -> Result<Vec<u8>> {
        Ok(bincode::serialize(items)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<SessionItems> {
        Ok(bincode::deserialize(bytes)?)
    }
}
