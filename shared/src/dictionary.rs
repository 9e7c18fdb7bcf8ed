/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::borrow::Borrow;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::xsd::BUILTIN_DATATYPES;

/// A datatype identifier.
///
/// Handles handed out by the same [`DatatypeInterner`] share one allocation, so
/// equality is decided by pointer before the string content is looked at.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Datatype(Arc<str>);

impl Datatype {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when both handles point at the same canonical instance.
    pub fn ptr_eq(this: &Datatype, other: &Datatype) -> bool {
        Arc::ptr_eq(&this.0, &other.0)
    }
}

impl PartialEq for Datatype {
    fn eq(&self, other: &Self) -> bool {
        Datatype::ptr_eq(self, other) || self.0 == other.0
    }
}

impl Eq for Datatype {}

impl PartialEq<str> for Datatype {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for Datatype {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

// Must agree with `str` hashing so lookups through `Borrow<str>` work.
impl Hash for Datatype {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

impl Borrow<str> for Datatype {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Deref for Datatype {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Datatype {
    fn from(value: &str) -> Self {
        Datatype(Arc::from(value))
    }
}

impl From<String> for Datatype {
    fn from(value: String) -> Self {
        Datatype(Arc::from(value))
    }
}

impl From<Datatype> for String {
    fn from(value: Datatype) -> Self {
        value.0.to_string()
    }
}

/// Cache mapping a datatype identifier to one canonical [`Datatype`] instance.
///
/// Entries are never evicted. The cache is guarded by a read/write lock, so one
/// interner can be shared between parsers running on different threads.
#[derive(Debug)]
pub struct DatatypeInterner {
    cache: RwLock<HashSet<Datatype>>,
}

static GLOBAL_INTERNER: Lazy<Arc<DatatypeInterner>> =
    Lazy::new(|| Arc::new(DatatypeInterner::new()));

impl DatatypeInterner {
    /// Creates an interner pre-populated with the built-in XSD identifiers.
    pub fn new() -> Self {
        let interner = DatatypeInterner::empty();
        {
            let mut cache = interner.cache.write();
            for datatype in BUILTIN_DATATYPES {
                cache.insert(Datatype::from(datatype));
            }
        }
        interner
    }

    pub fn empty() -> Self {
        DatatypeInterner {
            cache: RwLock::new(HashSet::new()),
        }
    }

    /// The process-wide interner used when a parser is not given its own.
    pub fn global() -> Arc<DatatypeInterner> {
        Arc::clone(&GLOBAL_INTERNER)
    }

    /// Returns the canonical instance for `value`, storing it first if unseen.
    /// `None` is passed through without touching the cache.
    pub fn intern(&self, value: Option<&str>) -> Option<Datatype> {
        let value = value?;
        if let Some(existing) = self.cache.read().get(value) {
            return Some(existing.clone());
        }

        let mut cache = self.cache.write();
        // Another writer may have stored it between the two locks
        if let Some(existing) = cache.get(value) {
            return Some(existing.clone());
        }
        let datatype = Datatype::from(value);
        cache.insert(datatype.clone());
        Some(datatype)
    }

    pub fn contains(&self, value: &str) -> bool {
        self.cache.read().contains(value)
    }

    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }
}

impl Default for DatatypeInterner {
    fn default() -> Self {
        DatatypeInterner::new()
    }
}

/// Interns through the process-wide interner.
pub fn intern(value: Option<&str>) -> Option<Datatype> {
    GLOBAL_INTERNER.intern(value)
}
