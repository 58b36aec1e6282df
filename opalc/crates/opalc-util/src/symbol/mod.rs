//! Symbol module - String interning for efficient identifier handling.
//!
//! A [`Symbol`] is a compact (4-byte) handle to an interned string. Field
//! names, path components, labels, and intrinsic names all flow through the
//! compiler as symbols, making comparison an integer compare and hashing
//! trivial.
//!
//! # Thread Safety
//!
//! The global interner is fully thread-safe (`Sync + Send`); functions lowered
//! in parallel may intern concurrently without blocking each other, thanks to
//! DashMap's sharded design.
//!
//! # Memory Model
//!
//! Interned strings are leaked to obtain the `'static` lifetime. The table is
//! never shrunk; total memory is bounded by the quantity of distinct strings
//! in the compiled crate.

use ahash::AHasher;
use dashmap::DashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::LazyLock;

/// Global string table instance, initialized on first use.
static STRING_TABLE: LazyLock<StringTable> = LazyLock::new(StringTable::new);

/// Symbol - An interned string identifier
///
/// # Example
///
/// ```
/// use opalc_util::symbol::Symbol;
///
/// let s1 = Symbol::intern("next");
/// let s2 = Symbol::intern("next");
/// let s3 = Symbol::intern("poll");
///
/// assert_eq!(s1, s2);
/// assert_ne!(s1, s3);
/// assert_eq!(s1.as_str(), "next");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol {
    index: u32,
}

impl Symbol {
    /// Intern a string, returning its symbol
    pub fn intern(string: &str) -> Self {
        STRING_TABLE.intern(string)
    }

    /// Get the string value associated with this symbol
    pub fn as_str(&self) -> &'static str {
        STRING_TABLE
            .get(*self)
            .expect("Symbol index not present in string table")
    }

    /// Get the raw index value
    pub fn as_u32(&self) -> u32 {
        self.index
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thread-safe string table
///
/// Uses DashMap keyed by string hash for the forward direction and a second
/// map for index-to-string retrieval. Hash collisions fall back to an append
/// under a fresh sentinel key derived from the colliding index.
struct StringTable {
    /// Maps string hash to (string, symbol index)
    map: DashMap<u64, (&'static str, u32)>,
    /// Maps symbol index back to the string
    strings: DashMap<u32, &'static str>,
    /// Counter for the next index (atomic for lock-free increment)
    next_index: AtomicU32,
}

impl StringTable {
    fn new() -> Self {
        Self {
            map: DashMap::new(),
            strings: DashMap::new(),
            next_index: AtomicU32::new(0),
        }
    }

    fn intern(&self, string: &str) -> Symbol {
        let hash = Self::hash_str(string);

        if let Some(entry) = self.map.get(&hash) {
            let (stored, index) = *entry;
            if stored == string {
                return Symbol { index };
            }
            // Hash collision: fall through and allocate a distinct entry keyed
            // by a rehash of (hash, string length).
            drop(entry);
            let alt = Self::hash_str_salted(string, hash);
            if let Some(entry) = self.map.get(&alt) {
                let (stored, index) = *entry;
                if stored == string {
                    return Symbol { index };
                }
            }
            let leaked: &'static str = Box::leak(string.to_owned().into_boxed_str());
            let index = self.next_index.fetch_add(1, Ordering::SeqCst);
            self.strings.insert(index, leaked);
            self.map.insert(alt, (leaked, index));
            return Symbol { index };
        }

        let leaked: &'static str = Box::leak(string.to_owned().into_boxed_str());
        let index = self.next_index.fetch_add(1, Ordering::SeqCst);
        self.strings.insert(index, leaked);
        // A concurrent interner may have raced us; keep whichever entry landed
        // first so both symbols compare equal via the map on later lookups.
        let entry = self.map.entry(hash).or_insert((leaked, index));
        let (stored, stored_index) = *entry;
        if stored == string && stored_index != index {
            return Symbol {
                index: stored_index,
            };
        }
        Symbol { index }
    }

    fn get(&self, symbol: Symbol) -> Option<&'static str> {
        self.strings.get(&symbol.index).map(|s| *s)
    }

    fn hash_str(string: &str) -> u64 {
        let mut hasher = AHasher::default();
        string.hash(&mut hasher);
        hasher.finish()
    }

    fn hash_str_salted(string: &str, salt: u64) -> u64 {
        let mut hasher = AHasher::default();
        salt.hash(&mut hasher);
        string.hash(&mut hasher);
        string.len().hash(&mut hasher);
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_same_string_same_symbol() {
        let a = Symbol::intern("deref");
        let b = Symbol::intern("deref");
        assert_eq!(a, b);
        assert_eq!(a.as_u32(), b.as_u32());
    }

    #[test]
    fn test_intern_distinct_strings() {
        let a = Symbol::intern("size_of");
        let b = Symbol::intern("align_of");
        assert_ne!(a, b);
    }

    #[test]
    fn test_as_str_roundtrip() {
        let s = Symbol::intern("exchange_malloc");
        assert_eq!(s.as_str(), "exchange_malloc");
    }

    #[test]
    fn test_display() {
        let s = Symbol::intern("Complete");
        assert_eq!(format!("{}", s), "Complete");
    }

    #[test]
    fn test_concurrent_interning() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| Symbol::intern("concurrent_probe")))
            .collect();
        let symbols: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for s in &symbols {
            assert_eq!(s.as_str(), "concurrent_probe");
        }
    }
}
