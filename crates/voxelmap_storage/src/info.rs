use fnv::FnvHashMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A typed metadata value. The discriminants are the serialised type ids.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub enum InfoValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f32),
    Double(f64),
    Str(String),
}

impl InfoValue {
    pub fn type_id(&self) -> u8 {
        match self {
            Self::Bool(_) => 0,
            Self::Int(_) => 1,
            Self::UInt(_) => 2,
            Self::Float(_) => 3,
            Self::Double(_) => 4,
            Self::Str(_) => 5,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(f64::from(*v)),
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for InfoValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for InfoValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for InfoValue {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<f32> for InfoValue {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<f64> for InfoValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for InfoValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

/// An ordered bag of named, typed metadata values.
///
/// Entries keep their insertion order so serialisation is deterministic; setting an existing name
/// replaces its value in place.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct MapInfo {
    entries: Vec<(String, InfoValue)>,
    index: FnvHashMap<String, usize>,
}

impl MapInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<InfoValue>) {
        let name = name.into();
        let value = value.into();
        match self.index.get(&name) {
            Some(&slot) => self.entries[slot].1 = value,
            None => {
                self.index.insert(name.clone(), self.entries.len());
                self.entries.push((name, value));
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&InfoValue> {
        self.index.get(name).map(|&slot| &self.entries[slot].1)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &InfoValue)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insertion_order_is_stable() {
        let mut info = MapInfo::new();
        info.set("b", 1i64);
        info.set("a", 2i64);
        info.set("c", 3i64);
        info.set("a", 4i64); // replace must not reorder

        let names: Vec<_> = info.iter().map(|(name, _)| name.to_owned()).collect();
        assert_eq!(names, ["b", "a", "c"]);
        assert_eq!(info.get("a"), Some(&InfoValue::Int(4)));
    }

    #[test]
    fn typed_accessors() {
        let mut info = MapInfo::new();
        info.set("heightmap", true);
        info.set("heightmap-clearance", 0.5f64);
        info.set("name", "ground");

        assert_eq!(info.get("heightmap").and_then(InfoValue::as_bool), Some(true));
        assert_eq!(
            info.get("heightmap-clearance").and_then(InfoValue::as_double),
            Some(0.5)
        );
        assert_eq!(info.get("name").and_then(InfoValue::as_str), Some("ground"));
        assert_eq!(info.get("missing"), None);
    }
}
