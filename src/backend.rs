//! Storage backend and bind handler interfaces
//!
//! The protocol layer reads through [`Backend`] and authenticates through
//! [`BindHandler`]; mutations never reach the backend directly, they are
//! committed through the replicated log first and arrive via the
//! `apply_*` methods. Every read carries the bound DN so a backend can
//! enforce its access rules.

use crate::command::{get_blob, get_string, put_blob, put_string, CommandError};
use crate::ldap::{ResultCode, SearchScope};
use bytes::{Buf, BufMut};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// A directory entry: a DN plus its attributes
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Entry {
    pub dn: String,
    pub attributes: Vec<EntryAttribute>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryAttribute {
    pub name: String,
    pub values: Vec<Vec<u8>>,
}

impl Entry {
    pub fn new(dn: impl Into<String>) -> Self {
        Entry {
            dn: dn.into(),
            attributes: Vec::new(),
        }
    }

    /// Attribute lookup; attribute names compare ASCII case-insensitively
    pub fn attribute(&self, name: &str) -> Option<&EntryAttribute> {
        self.attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }

    fn attribute_mut(&mut self, name: &str) -> Option<&mut EntryAttribute> {
        self.attributes
            .iter_mut()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }

    /// Replace (or create) an attribute; an empty value list removes it
    pub fn set_attribute(&mut self, name: &str, values: Vec<Vec<u8>>) {
        if values.is_empty() {
            self.remove_attribute(name);
            return;
        }
        match self.attribute_mut(name) {
            Some(attr) => attr.values = values,
            None => self.attributes.push(EntryAttribute {
                name: name.to_owned(),
                values,
            }),
        }
    }

    /// Add values to an attribute, creating it if needed
    pub fn add_values(&mut self, name: &str, values: Vec<Vec<u8>>) {
        match self.attribute_mut(name) {
            Some(attr) => attr.values.extend(values),
            None => self.attributes.push(EntryAttribute {
                name: name.to_owned(),
                values,
            }),
        }
    }

    /// Delete listed values; an empty list deletes the whole attribute
    pub fn delete_values(&mut self, name: &str, values: &[Vec<u8>]) {
        if values.is_empty() {
            self.remove_attribute(name);
            return;
        }
        if let Some(attr) = self.attribute_mut(name) {
            attr.values.retain(|v| !values.contains(v));
        }
        self.attributes.retain(|a| !a.values.is_empty());
    }

    pub fn remove_attribute(&mut self, name: &str) {
        self.attributes.retain(|a| !a.name.eq_ignore_ascii_case(name));
    }

    /// Serialized form carried as `EntryData` in a command record, using
    /// the same length-prefix conventions as the command layout
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_string(&mut buf, &self.dn);
        buf.put_u16_le(self.attributes.len() as u16);
        for attribute in &self.attributes {
            put_string(&mut buf, &attribute.name);
            buf.put_u16_le(attribute.values.len() as u16);
            for value in &attribute.values {
                put_blob(&mut buf, value);
            }
        }
        buf
    }

    pub fn from_bytes(mut buf: &[u8]) -> Result<Entry, CommandError> {
        let dn = get_string(&mut buf)?;
        if buf.remaining() < 2 {
            return Err(CommandError::Truncated);
        }
        let attr_count = buf.get_u16_le();
        let mut attributes = Vec::with_capacity(attr_count as usize);
        for _ in 0..attr_count {
            let name = get_string(&mut buf)?;
            if buf.remaining() < 2 {
                return Err(CommandError::Truncated);
            }
            let value_count = buf.get_u16_le();
            let mut values = Vec::with_capacity(value_count as usize);
            for _ in 0..value_count {
                values.push(get_blob(&mut buf)?);
            }
            attributes.push(EntryAttribute { name, values });
        }
        Ok(Entry { dn, attributes })
    }
}

/// Failures surfaced by a backend, mapped onto LDAP result codes
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("no such entry")]
    EntryNotFound,

    #[error("entry already exists")]
    EntryExists,

    #[error("entry has children")]
    HasChildren,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("insufficient access rights")]
    InsufficientAccess,

    #[error("backend failure: {0}")]
    Other(String),
}

impl BackendError {
    pub fn result_code(&self) -> ResultCode {
        match self {
            BackendError::EntryNotFound => ResultCode::NoSuchObject,
            BackendError::EntryExists => ResultCode::EntryAlreadyExists,
            BackendError::HasChildren => ResultCode::NotAllowedOnNonLeaf,
            BackendError::InvalidCredentials => ResultCode::InvalidCredentials,
            BackendError::InsufficientAccess => ResultCode::InsufficientAccessRights,
            BackendError::Other(_) => ResultCode::OperationsError,
        }
    }
}

/// The entry store consumed by the protocol layer
pub trait Backend: Send + Sync {
    fn get(&self, bound_dn: Option<&str>, dn: &str) -> Result<Entry, BackendError>;

    /// Candidate entries under `base_dn` for the given scope; filter
    /// evaluation and attribute selection happen in the protocol layer.
    /// The iterator owns its data so it can be driven without holding
    /// backend locks.
    fn search(
        &self,
        bound_dn: Option<&str>,
        base_dn: &str,
        scope: SearchScope,
    ) -> Result<Box<dyn Iterator<Item = Entry> + Send>, BackendError>;

    fn compare(
        &self,
        bound_dn: Option<&str>,
        dn: &str,
        attribute: &str,
        value: &[u8],
    ) -> Result<bool, BackendError>;

    /// Upsert, driven by a committed Put command
    fn apply_put(&self, database_id: u8, dn: &str, entry: Entry) -> Result<(), BackendError>;

    /// Removal, driven by a committed Delete command
    fn apply_delete(&self, database_id: u8, dn: &str) -> Result<(), BackendError>;
}

/// Outcome of a bind attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BindOutcome {
    Success,
    InvalidCredentials,
    UnsupportedMethod,
    SaslInProgress(Vec<u8>),
}

/// Authentication hook consumed by the protocol layer
///
/// Credentials are opaque bytes; implementations must not log them.
pub trait BindHandler: Send + Sync {
    fn bind(&self, name: &str, authentication: &crate::ldap::AuthenticationChoice<'_>)
        -> BindOutcome;
}

/// Case-fold a DN and strip blanks around its components
pub fn normalize_dn(dn: &str) -> String {
    dn.split(',')
        .map(|component| component.trim().to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join(",")
}

/// The parent of a DN, or None for a single-component DN
pub fn parent_dn(dn: &str) -> Option<&str> {
    dn.split_once(',').map(|(_, parent)| parent)
}

/// Tree-aware in-memory entry store
///
/// Keys are normalized DNs; the stored entry keeps the DN as written.
/// Used by the single-node server mode and the test suite. Schema and ACL
/// evaluation are out of scope here, so `bound_dn` is accepted but not
/// consulted.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<BTreeMap<String, Entry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend::default()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Entry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Entry>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Backend for MemoryBackend {
    fn get(&self, _bound_dn: Option<&str>, dn: &str) -> Result<Entry, BackendError> {
        self.read()
            .get(&normalize_dn(dn))
            .cloned()
            .ok_or(BackendError::EntryNotFound)
    }

    fn search(
        &self,
        _bound_dn: Option<&str>,
        base_dn: &str,
        scope: SearchScope,
    ) -> Result<Box<dyn Iterator<Item = Entry> + Send>, BackendError> {
        let entries = self.read();
        let base = normalize_dn(base_dn);
        if !base.is_empty() && !entries.contains_key(&base) {
            return Err(BackendError::EntryNotFound);
        }
        let suffix = format!(",{}", base);
        let matched: Vec<Entry> = entries
            .iter()
            .filter(|(key, _)| match scope {
                SearchScope::BaseObject => **key == base,
                SearchScope::SingleLevel => {
                    key.strip_suffix(&suffix).is_some_and(|rdn| !rdn.contains(','))
                }
                _ => base.is_empty() || **key == base || key.ends_with(&suffix),
            })
            .map(|(_, entry)| entry.clone())
            .collect();
        Ok(Box::new(matched.into_iter()))
    }

    fn compare(
        &self,
        bound_dn: Option<&str>,
        dn: &str,
        attribute: &str,
        value: &[u8],
    ) -> Result<bool, BackendError> {
        let entry = self.get(bound_dn, dn)?;
        Ok(entry
            .attribute(attribute)
            .is_some_and(|a| a.values.iter().any(|v| v == value)))
    }

    fn apply_put(&self, _database_id: u8, dn: &str, entry: Entry) -> Result<(), BackendError> {
        self.write().insert(normalize_dn(dn), entry);
        Ok(())
    }

    fn apply_delete(&self, _database_id: u8, dn: &str) -> Result<(), BackendError> {
        let mut entries = self.write();
        let key = normalize_dn(dn);
        if !entries.contains_key(&key) {
            return Err(BackendError::EntryNotFound);
        }
        let suffix = format!(",{}", key);
        if entries.keys().any(|k| k.ends_with(&suffix)) {
            return Err(BackendError::HasChildren);
        }
        entries.remove(&key);
        Ok(())
    }
}
