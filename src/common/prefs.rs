//! Namespaced key/value preferences.
//!
//! Hosts usually back this with their own persistent settings; the overlay
//! only needs the [`PreferenceStore`] surface. [`MemoryStore`] is the
//! in-process implementation used by default and in tests.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PrefValue {
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Str(String),
}

impl fmt::Display for PrefValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrefValue::Bool(v) => write!(f, "{v}"),
            PrefValue::Int(v) => write!(f, "{v}"),
            PrefValue::Long(v) => write!(f, "{v}"),
            PrefValue::Float(v) => write!(f, "{v}"),
            PrefValue::Str(v) => f.write_str(v),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("`{raw}` is not a valid {expected}")]
pub struct PrefParseError {
    pub raw: String,
    pub expected: &'static str,
}

impl PrefValue {
    pub fn kind(&self) -> &'static str {
        match self {
            PrefValue::Bool(_) => "bool",
            PrefValue::Int(_) => "int",
            PrefValue::Long(_) => "long",
            PrefValue::Float(_) => "float",
            PrefValue::Str(_) => "string",
        }
    }

    /// Parses user input as the same variant as `self`, so an edit never
    /// changes a stored value's type.
    pub fn parse_as(&self, raw: &str) -> Result<PrefValue, PrefParseError> {
        let trimmed = raw.trim();
        let parsed = match self {
            PrefValue::Bool(_) => trimmed.parse().ok().map(PrefValue::Bool),
            PrefValue::Int(_) => trimmed.parse().ok().map(PrefValue::Int),
            PrefValue::Long(_) => trimmed.parse().ok().map(PrefValue::Long),
            PrefValue::Float(_) => trimmed.parse().ok().map(PrefValue::Float),
            PrefValue::Str(_) => Some(PrefValue::Str(raw.to_owned())),
        };
        parsed.ok_or_else(|| PrefParseError { raw: raw.to_owned(), expected: self.kind() })
    }

    /// Type for a key that does not exist yet: bool, then long, then float,
    /// otherwise string.
    pub fn infer(raw: &str) -> PrefValue {
        let trimmed = raw.trim();
        if let Ok(v) = trimmed.parse::<bool>() {
            PrefValue::Bool(v)
        } else if let Ok(v) = trimmed.parse::<i64>() {
            PrefValue::Long(v)
        } else if let Ok(v) = trimmed.parse::<f32>() {
            PrefValue::Float(v)
        } else {
            PrefValue::Str(raw.to_owned())
        }
    }
}

/// A Rust type that maps onto one [`PrefValue`] variant.
pub trait PrefType: Sized {
    fn into_value(self) -> PrefValue;
    fn from_value(value: &PrefValue) -> Option<Self>;
}

macro_rules! pref_type {
    ($($ty:ty => $variant:ident),* $(,)?) => {$(
        impl PrefType for $ty {
            fn into_value(self) -> PrefValue { PrefValue::$variant(self) }

            fn from_value(value: &PrefValue) -> Option<Self> {
                match value {
                    PrefValue::$variant(v) => Some(v.clone()),
                    _ => None,
                }
            }
        }
    )*};
}

pref_type! {
    bool => Bool,
    i32 => Int,
    i64 => Long,
    f32 => Float,
    String => Str,
}

pub trait PreferenceStore: Send + Sync {
    fn read(&self, namespace: &str, key: &str) -> Option<PrefValue>;

    fn write(&self, namespace: &str, key: &str, value: PrefValue);

    /// Returns the stored value, storing `default` first if the key is absent.
    fn read_or_insert(&self, namespace: &str, key: &str, default: PrefValue) -> PrefValue {
        match self.read(namespace, key) {
            Some(value) => value,
            None => {
                self.write(namespace, key, default.clone());
                default
            }
        }
    }

    fn remove(&self, namespace: &str, key: &str) -> Option<PrefValue>;

    /// Entries of one namespace, sorted by key.
    fn entries(&self, namespace: &str) -> Vec<(String, PrefValue)>;

    /// Known namespaces, sorted.
    fn namespaces(&self) -> Vec<String>;

    fn clear(&self, namespace: &str);
}

/// Typed access on top of [`PreferenceStore`].
pub trait PreferenceStoreExt: PreferenceStore {
    /// Reads a typed value. An absent key is initialised with `default`; a
    /// value of the wrong type is left alone and `default` is returned.
    fn get<T: PrefType + Clone>(&self, namespace: &str, key: &str, default: T) -> T {
        let value = self.read_or_insert(namespace, key, default.clone().into_value());
        T::from_value(&value).unwrap_or_else(|| {
            warn!(namespace, key, ?value, "stored preference has an unexpected type");
            default
        })
    }

    fn put<T: PrefType>(&self, namespace: &str, key: &str, value: T) {
        self.write(namespace, key, value.into_value());
    }
}

impl<S: PreferenceStore + ?Sized> PreferenceStoreExt for S {}

/// Thread-safe in-memory store.
#[derive(Clone, Default, Debug)]
pub struct MemoryStore(Arc<DashMap<(String, String), PrefValue>>);

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.0.len() }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    fn key(namespace: &str, key: &str) -> (String, String) { (namespace.to_owned(), key.to_owned()) }
}

impl PreferenceStore for MemoryStore {
    fn read(&self, namespace: &str, key: &str) -> Option<PrefValue> {
        self.0.get(&Self::key(namespace, key)).map(|entry| entry.value().clone())
    }

    fn write(&self, namespace: &str, key: &str, value: PrefValue) {
        self.0.insert(Self::key(namespace, key), value);
    }

    fn read_or_insert(&self, namespace: &str, key: &str, default: PrefValue) -> PrefValue {
        match self.0.entry(Self::key(namespace, key)) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => entry.insert(default).value().clone(),
        }
    }

    fn remove(&self, namespace: &str, key: &str) -> Option<PrefValue> {
        self.0.remove(&Self::key(namespace, key)).map(|(_, value)| value)
    }

    fn entries(&self, namespace: &str) -> Vec<(String, PrefValue)> {
        let mut entries: Vec<_> = self
            .0
            .iter()
            .filter(|entry| entry.key().0 == namespace)
            .map(|entry| (entry.key().1.clone(), entry.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    fn namespaces(&self) -> Vec<String> {
        let mut namespaces: Vec<_> = self.0.iter().map(|entry| entry.key().0.clone()).collect();
        namespaces.sort();
        namespaces.dedup();
        namespaces
    }

    fn clear(&self, namespace: &str) { self.0.retain(|(ns, _), _| ns != namespace); }
}
