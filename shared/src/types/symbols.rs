//! Symbols, locations and the interning tables built while decoding
//!
//! Every table here is append-only and indexed by the dense ids assigned on
//! the wire. Lookups by id never fail: unknown ids resolve to an empty value,
//! the same way a missing definition is treated by the producer.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Id of an interned [`Symbol`] within one [`SymbolTable`]
pub type SymbolId = u32;

/// Wire id of a location definition, `-1` when absent
pub type LocationId = i32;

/// Wire id of a string definition, `-1` when absent
pub type StringId = i32;

/// Marker used on the wire for "no id"
pub const INVALID_ID: i32 = -1;

/// Id of the empty symbol, present in every [`SymbolTable`]
pub const EMPTY_SYMBOL: SymbolId = 0;

/// A function, identified by its name together with the binary it lives in.
///
/// Equality, ordering and hashing only look at the `(name, binary, path)`
/// triple; the remaining fields are informational.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Symbol {
    /// Symbol name as reported by the producer
    pub name: String,

    /// Name of the binary (e.g. `libc.so.6`)
    pub binary: String,

    /// Path of the binary on the recording host
    pub path: String,

    /// Path of the binary that was actually used for symbolication
    #[serde(default)]
    pub actual_path: String,

    /// Address of the symbol relative to the binary's load address
    #[serde(default)]
    pub rel_addr: u64,

    /// Size of the symbol in bytes
    #[serde(default)]
    pub size: u64,

    /// Whether the symbol lives in the kernel
    #[serde(default)]
    pub is_kernel: bool,
}

impl Symbol {
    /// Create a symbol from a name and binary
    pub fn new(name: impl Into<String>, binary: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            binary: binary.into(),
            ..Self::default()
        }
    }

    /// A symbol is valid when any part of its identity is known
    pub fn is_valid(&self) -> bool {
        !self.name.is_empty() || !self.binary.is_empty() || !self.path.is_empty()
    }

    fn key(&self) -> (&str, &str, &str) {
        (&self.name, &self.binary, &self.path)
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for Symbol {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Symbol {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = if self.name.is_empty() {
            "??"
        } else {
            &self.name
        };
        if self.binary.is_empty() {
            write!(f, "{}", name)
        } else {
            write!(f, "{} ({})", name, self.binary)
        }
    }
}

/// A resolved call site
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    /// Virtual address
    pub address: u64,

    /// Address relative to the containing binary
    pub rel_addr: u64,

    /// `file:line`, empty when no debug information is available
    pub file_line: String,
}

/// A location together with the location it was inlined into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLocation {
    /// Location of the inlining caller, [`INVALID_ID`] for real frames
    pub parent_location_id: LocationId,

    pub location: Location,
}

impl FrameLocation {
    /// Returned for ids that were never declared
    pub const EMPTY: FrameLocation = FrameLocation {
        parent_location_id: INVALID_ID,
        location: Location {
            address: 0,
            rel_addr: 0,
            file_line: String::new(),
        },
    };
}

impl Default for FrameLocation {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Strings declared by `StringDefinition` events
#[derive(Debug, Clone, Default)]
pub struct StringTable {
    strings: Vec<String>,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Append a string; `id` must be the next dense id.
    pub fn insert(&mut self, id: StringId, value: String) {
        assert_eq!(
            usize::try_from(id).ok(),
            Some(self.strings.len()),
            "string ids must be dense"
        );
        self.strings.push(value);
    }

    /// Resolve a string id, empty for [`INVALID_ID`] and unknown ids
    pub fn get(&self, id: StringId) -> &str {
        usize::try_from(id)
            .ok()
            .and_then(|index| self.strings.get(index))
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Interner mapping symbol content to a stable [`SymbolId`].
///
/// The empty symbol is always interned as [`EMPTY_SYMBOL`].
#[derive(Debug, Clone)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    ids: HashMap<Symbol, SymbolId>,
}

impl SymbolTable {
    pub fn new() -> Self {
        let mut table = Self {
            symbols: Vec::new(),
            ids: HashMap::new(),
        };
        table.intern(Symbol::default());
        table
    }

    /// Return the id of `symbol`, interning it on first sight
    pub fn intern(&mut self, symbol: Symbol) -> SymbolId {
        if let Some(&id) = self.ids.get(&symbol) {
            return id;
        }
        let id = self.symbols.len() as SymbolId;
        self.symbols.push(symbol.clone());
        self.ids.insert(symbol, id);
        id
    }

    /// Look up an already interned symbol
    pub fn find(&self, symbol: &Symbol) -> Option<SymbolId> {
        self.ids.get(symbol).copied()
    }

    pub fn get(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id as usize]
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        // the empty symbol does not count
        self.symbols.len() <= 1
    }

    pub fn iter(&self) -> impl Iterator<Item = (SymbolId, &Symbol)> {
        self.symbols
            .iter()
            .enumerate()
            .map(|(id, symbol)| (id as SymbolId, symbol))
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Locations declared by `LocationDefinition` events and the symbol each one
/// resolved to.
///
/// Declaring a location inserts the empty symbol at the same index; the
/// matching `SymbolDefinition` fills it in later.
#[derive(Debug, Clone, Default)]
pub struct LocationTable {
    locations: Vec<FrameLocation>,
    symbols: Vec<SymbolId>,
}

impl LocationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Append a location; `id` must be the next dense id.
    pub fn add_location(&mut self, id: LocationId, location: FrameLocation) {
        assert_eq!(
            usize::try_from(id).ok(),
            Some(self.locations.len()),
            "location ids must be dense"
        );
        self.locations.push(location);
        self.symbols.push(EMPTY_SYMBOL);
    }

    /// Replace the placeholder symbol of an already declared location
    pub fn set_symbol(&mut self, id: LocationId, symbol: SymbolId) {
        let index = usize::try_from(id).unwrap_or(usize::MAX);
        assert!(
            index < self.symbols.len(),
            "symbol for undeclared location {}",
            id
        );
        self.symbols[index] = symbol;
    }

    pub fn location(&self, id: LocationId) -> Option<&FrameLocation> {
        usize::try_from(id)
            .ok()
            .and_then(|index| self.locations.get(index))
    }

    /// Symbol of a location, [`EMPTY_SYMBOL`] for unknown ids
    pub fn symbol(&self, id: LocationId) -> SymbolId {
        usize::try_from(id)
            .ok()
            .and_then(|index| self.symbols.get(index))
            .copied()
            .unwrap_or(EMPTY_SYMBOL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_symbol_equality_ignores_address() {
        let mut a = Symbol::new("main", "app");
        a.rel_addr = 0x10;
        let mut b = Symbol::new("main", "app");
        b.rel_addr = 0x20;
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
        assert_ne!(Symbol::new("main", "app"), Symbol::new("main", "lib"));
    }

    #[test]
    fn test_symbol_validity() {
        assert!(!Symbol::default().is_valid());
        assert!(Symbol::new("", "libc.so").is_valid());
        assert!(Symbol::new("foo", "").is_valid());
    }

    #[test]
    fn test_symbol_ordering() {
        let mut symbols = vec![
            Symbol::new("b", "x"),
            Symbol::new("a", "y"),
            Symbol::new("a", "x"),
        ];
        symbols.sort();
        assert_eq!(symbols[0], Symbol::new("a", "x"));
        assert_eq!(symbols[2], Symbol::new("b", "x"));
    }

    #[test]
    fn test_symbol_table_interning() {
        let mut table = SymbolTable::new();
        assert!(table.is_empty());
        assert_eq!(table.find(&Symbol::default()), Some(EMPTY_SYMBOL));

        let main = table.intern(Symbol::new("main", "app"));
        let again = table.intern(Symbol::new("main", "app"));
        let other = table.intern(Symbol::new("foo", "app"));
        assert_eq!(main, again);
        assert_ne!(main, other);
        assert_eq!(table.get(other).name, "foo");
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_string_table_lookup() {
        let mut strings = StringTable::new();
        strings.insert(0, "main.c".to_string());
        strings.insert(1, "app".to_string());
        assert_eq!(strings.get(1), "app");
        assert_eq!(strings.get(INVALID_ID), "");
        assert_eq!(strings.get(7), "");
    }

    #[test]
    #[should_panic(expected = "dense")]
    fn test_string_table_rejects_gap() {
        let mut strings = StringTable::new();
        strings.insert(1, "gap".to_string());
    }

    #[test]
    fn test_location_placeholder_symbol() {
        let mut symbols = SymbolTable::new();
        let mut locations = LocationTable::new();
        locations.add_location(0, FrameLocation::default());
        assert_eq!(locations.symbol(0), EMPTY_SYMBOL);

        let id = symbols.intern(Symbol::new("main", "app"));
        locations.set_symbol(0, id);
        assert_eq!(locations.symbol(0), id);
        assert_eq!(locations.symbol(INVALID_ID), EMPTY_SYMBOL);
        assert!(locations.location(3).is_none());
    }
}
