//! Runtime values
//!
//! Values are small: integers, booleans, tagged values of user-declared
//! types, and references into the heap for map values. The map payload
//! itself ([`MapRepr`]) only ever lives behind a reference — either an
//! explicit partial mapping (`Source`) or a base reference plus overrides
//! (`Derived`). Flattening a derived chain yields the ultimate source and
//! the merged key→value view.

use boogie_core::Id;
use im::OrdMap;
use num_bigint::BigInt;
use std::fmt;

/// Handle into the heap
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ref(pub usize);

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ref({})", self.0)
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "map#{}", self.0)
    }
}

/// Reserved type name of under-construction sentinels (cycle detection
/// during definition evaluation)
const UNDER_CONSTRUCTION: &str = "*under-construction*";

/// Reserved type name of the values installed to distinguish two map
/// sources forced apart during equality resolution
const SOURCE_WITNESS: &str = "*source*";

/// A value of a user-declared type: the type's name plus an integer tag.
/// Two custom values are equal iff both components are identical.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CustomValue {
    pub type_name: Id,
    pub tag: BigInt,
}

/// A runtime value
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    /// Unbounded integer
    Int(BigInt),
    /// Boolean
    Bool(bool),
    /// Value of a user-declared type
    Custom(CustomValue),
    /// Map value, by reference
    Reference(Ref),
}

impl Value {
    pub fn int(i: impl Into<BigInt>) -> Value {
        Value::Int(i.into())
    }

    pub fn custom(type_name: impl Into<Id>, tag: impl Into<BigInt>) -> Value {
        Value::Custom(CustomValue {
            type_name: type_name.into(),
            tag: tag.into(),
        })
    }

    /// The sentinel stored while an entity's definition is being evaluated
    pub fn under_construction(code: u64) -> Value {
        Value::custom(UNDER_CONSTRUCTION, code)
    }

    /// The sentinel's code, when `self` is one
    pub fn construction_code(&self) -> Option<u64> {
        match self {
            Value::Custom(c) if c.type_name == UNDER_CONSTRUCTION => {
                // codes are allocated from a u64 counter
                u64::try_from(&c.tag).ok()
            }
            _ => None,
        }
    }

    /// A value that identifies `r` and compares unequal to every other
    /// reference's witness; used to force two map sources apart
    pub fn source_witness(r: Ref) -> Value {
        Value::custom(SOURCE_WITNESS, r.0 as u64)
    }

    /// Short name of the value's kind, for diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Bool(_) => "bool",
            Value::Custom(_) => "custom",
            Value::Reference(_) => "map",
        }
    }

    pub fn as_int(&self) -> Option<&BigInt> {
        match self {
            Value::Int(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_ref(&self) -> Option<Ref> {
        match self {
            Value::Reference(r) => Some(*r),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{}", i),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Custom(c) => write!(f, "{}!{}", c.type_name, c.tag),
            Value::Reference(r) => write!(f, "{}", r),
        }
    }
}

/// Known key→value pairs of a map
pub type MapCache = OrdMap<Vec<Value>, Value>;

/// Heap payload of a map value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapRepr {
    /// An explicit partial mapping
    Source(MapCache),
    /// A base reference with overriding entries
    Derived { base: Ref, overrides: MapCache },
}

impl MapRepr {
    pub fn empty_source() -> MapRepr {
        MapRepr::Source(MapCache::default())
    }

    /// The locally stored entries, source or override
    pub fn cache(&self) -> &MapCache {
        match self {
            MapRepr::Source(cache) => cache,
            MapRepr::Derived { overrides, .. } => overrides,
        }
    }

    pub fn cache_mut(&mut self) -> &mut MapCache {
        match self {
            MapRepr::Source(cache) => cache,
            MapRepr::Derived { overrides, .. } => overrides,
        }
    }

    pub fn base(&self) -> Option<Ref> {
        match self {
            MapRepr::Source(_) => None,
            MapRepr::Derived { base, .. } => Some(*base),
        }
    }
}

/// Render a key tuple for summaries: `0` or `(0, 1)`
pub fn format_key(key: &[Value]) -> String {
    if key.len() == 1 {
        key[0].to_string()
    } else {
        let parts: Vec<String> = key.iter().map(|v| v.to_string()).collect();
        format!("({})", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_equality_is_componentwise() {
        assert_eq!(Value::custom("Color", 1), Value::custom("Color", 1));
        assert_ne!(Value::custom("Color", 1), Value::custom("Color", 2));
        assert_ne!(Value::custom("Color", 1), Value::custom("Shape", 1));
    }

    #[test]
    fn sentinel_round_trip() {
        let v = Value::under_construction(42);
        assert_eq!(v.construction_code(), Some(42));
        assert_eq!(Value::int(42).construction_code(), None);
        assert_eq!(Value::custom("T", 42).construction_code(), None);
    }

    #[test]
    fn source_witnesses_differ_per_reference() {
        assert_ne!(Value::source_witness(Ref(0)), Value::source_witness(Ref(1)));
        assert_eq!(Value::source_witness(Ref(3)), Value::source_witness(Ref(3)));
    }

    #[test]
    fn display_forms() {
        assert_eq!(Value::int(-7).to_string(), "-7");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::custom("Color", 2).to_string(), "Color!2");
        assert_eq!(Value::Reference(Ref(5)).to_string(), "map#5");
        assert_eq!(format_key(&[Value::int(1), Value::int(2)]), "(1, 2)");
        assert_eq!(format_key(&[Value::int(1)]), "1");
    }
}
