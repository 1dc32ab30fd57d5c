//! RFC 7047 value notation
//!
//! OVSDB encodes non-scalar values as tagged two-element JSON arrays:
//! `["uuid", "..."]`, `["named-uuid", "..."]`, `["set", [..]]` and
//! `["map", [[k, v], ..]]`. A set with exactly one element may arrive as the
//! bare atom. Everything here is a value object with structural equality;
//! rows are replaced wholesale, never patched.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{Error, Result};

/// A scalar database value.
///
/// `NamedUuid` is a client-chosen placeholder for a row inserted earlier in
/// the same transaction; it never appears in server-produced data.
#[derive(Debug, Clone, PartialEq)]
pub enum Atom {
    Integer(i64),
    Real(f64),
    Boolean(bool),
    String(String),
    Uuid(Uuid),
    NamedUuid(String),
}

impl Atom {
    /// Parse an atom from its wire representation.
    pub fn from_json(json: &Value) -> Result<Atom> {
        match json {
            Value::Bool(b) => Ok(Atom::Boolean(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Atom::Integer(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Atom::Real(f))
                } else {
                    Err(Error::protocol(format!("unrepresentable number: {n}")))
                }
            }
            Value::String(s) => Ok(Atom::String(s.clone())),
            Value::Array(pair) => match (pair.first().and_then(Value::as_str), pair.get(1)) {
                (Some("uuid"), Some(Value::String(s))) => {
                    let uuid = Uuid::parse_str(s)
                        .map_err(|e| Error::protocol(format!("bad uuid '{s}': {e}")))?;
                    Ok(Atom::Uuid(uuid))
                }
                (Some("named-uuid"), Some(Value::String(s))) => Ok(Atom::NamedUuid(s.clone())),
                _ => Err(Error::protocol(format!("not an atom: {json}"))),
            },
            _ => Err(Error::protocol(format!("not an atom: {json}"))),
        }
    }

    /// Wire representation of this atom.
    pub fn to_json(&self) -> Value {
        match self {
            Atom::Integer(i) => json!(i),
            Atom::Real(r) => json!(r),
            Atom::Boolean(b) => json!(b),
            Atom::String(s) => json!(s),
            Atom::Uuid(u) => json!(["uuid", u.to_string()]),
            Atom::NamedUuid(n) => json!(["named-uuid", n]),
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Atom::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Atom::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Atom::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Atom::Uuid(u) => Some(*u),
            _ => None,
        }
    }
}

// Reals hash by bit pattern so equal atoms hash equally.
impl Hash for Atom {
    fn hash<H: Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            Atom::Integer(i) => i.hash(state),
            Atom::Real(r) => r.to_bits().hash(state),
            Atom::Boolean(b) => b.hash(state),
            Atom::String(s) => s.hash(state),
            Atom::Uuid(u) => u.hash(state),
            Atom::NamedUuid(n) => n.hash(state),
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Integer(i) => write!(f, "{i}"),
            Atom::Real(r) => write!(f, "{r}"),
            Atom::Boolean(b) => write!(f, "{b}"),
            Atom::String(s) => write!(f, "{s}"),
            Atom::Uuid(u) => write!(f, "{u}"),
            Atom::NamedUuid(n) => write!(f, "@{n}"),
        }
    }
}

impl From<i64> for Atom {
    fn from(value: i64) -> Self {
        Atom::Integer(value)
    }
}

impl From<f64> for Atom {
    fn from(value: f64) -> Self {
        Atom::Real(value)
    }
}

impl From<bool> for Atom {
    fn from(value: bool) -> Self {
        Atom::Boolean(value)
    }
}

impl From<&str> for Atom {
    fn from(value: &str) -> Self {
        Atom::String(value.to_string())
    }
}

impl From<String> for Atom {
    fn from(value: String) -> Self {
        Atom::String(value)
    }
}

impl From<Uuid> for Atom {
    fn from(value: Uuid) -> Self {
        Atom::Uuid(value)
    }
}

/// A column value: a scalar, a set of scalars, or a map of scalars.
#[derive(Debug, Clone, PartialEq, Hash)]
pub enum OvsValue {
    Atom(Atom),
    Set(Vec<Atom>),
    Map(Vec<(Atom, Atom)>),
}

impl OvsValue {
    /// Parse any wire value. A bare scalar parses as an atom; whether that
    /// atom stands for a singleton set is decided by the column schema, not
    /// here.
    pub fn from_json(json: &Value) -> Result<OvsValue> {
        if let Value::Array(pair) = json {
            match pair.first().and_then(Value::as_str) {
                Some("set") => {
                    let elems = pair
                        .get(1)
                        .and_then(Value::as_array)
                        .ok_or_else(|| Error::protocol(format!("bad set: {json}")))?;
                    let atoms = elems.iter().map(Atom::from_json).collect::<Result<_>>()?;
                    return Ok(OvsValue::Set(atoms));
                }
                Some("map") => {
                    let entries = pair
                        .get(1)
                        .and_then(Value::as_array)
                        .ok_or_else(|| Error::protocol(format!("bad map: {json}")))?;
                    let mut pairs = Vec::with_capacity(entries.len());
                    for entry in entries {
                        let kv = entry
                            .as_array()
                            .filter(|kv| kv.len() == 2)
                            .ok_or_else(|| Error::protocol(format!("bad map entry: {entry}")))?;
                        pairs.push((Atom::from_json(&kv[0])?, Atom::from_json(&kv[1])?));
                    }
                    return Ok(OvsValue::Map(pairs));
                }
                _ => {}
            }
        }
        Atom::from_json(json).map(OvsValue::Atom)
    }

    /// Wire representation of this value.
    pub fn to_json(&self) -> Value {
        match self {
            OvsValue::Atom(atom) => atom.to_json(),
            OvsValue::Set(atoms) => {
                json!(["set", atoms.iter().map(Atom::to_json).collect::<Vec<_>>()])
            }
            OvsValue::Map(pairs) => {
                let entries: Vec<Value> = pairs
                    .iter()
                    .map(|(k, v)| json!([k.to_json(), v.to_json()]))
                    .collect();
                json!(["map", entries])
            }
        }
    }

    /// Build a set value.
    pub fn set<I, A>(atoms: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Atom>,
    {
        OvsValue::Set(atoms.into_iter().map(Into::into).collect())
    }

    /// Build a map value.
    pub fn map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Atom>,
        V: Into<Atom>,
    {
        OvsValue::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn uuid(uuid: Uuid) -> Self {
        OvsValue::Atom(Atom::Uuid(uuid))
    }

    pub fn named_uuid(name: impl Into<String>) -> Self {
        OvsValue::Atom(Atom::NamedUuid(name.into()))
    }

    pub fn as_atom(&self) -> Option<&Atom> {
        match self {
            OvsValue::Atom(atom) => Some(atom),
            _ => None,
        }
    }

    /// View this value as a set, normalizing the singleton-atom encoding.
    /// Returns `None` for maps.
    pub fn to_set(&self) -> Option<Vec<Atom>> {
        match self {
            OvsValue::Atom(atom) => Some(vec![atom.clone()]),
            OvsValue::Set(atoms) => Some(atoms.clone()),
            OvsValue::Map(_) => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(Atom, Atom)]> {
        match self {
            OvsValue::Map(pairs) => Some(pairs),
            _ => None,
        }
    }

    /// Number of scalar elements this value carries, per the cardinality
    /// rules of RFC 7047 (an atom counts as one).
    pub fn cardinality(&self) -> usize {
        match self {
            OvsValue::Atom(_) => 1,
            OvsValue::Set(atoms) => atoms.len(),
            OvsValue::Map(pairs) => pairs.len(),
        }
    }
}

impl From<Atom> for OvsValue {
    fn from(value: Atom) -> Self {
        OvsValue::Atom(value)
    }
}

impl From<i64> for OvsValue {
    fn from(value: i64) -> Self {
        OvsValue::Atom(Atom::Integer(value))
    }
}

impl From<f64> for OvsValue {
    fn from(value: f64) -> Self {
        OvsValue::Atom(Atom::Real(value))
    }
}

impl From<bool> for OvsValue {
    fn from(value: bool) -> Self {
        OvsValue::Atom(Atom::Boolean(value))
    }
}

impl From<&str> for OvsValue {
    fn from(value: &str) -> Self {
        OvsValue::Atom(Atom::String(value.to_string()))
    }
}

impl From<String> for OvsValue {
    fn from(value: String) -> Self {
        OvsValue::Atom(Atom::String(value))
    }
}

impl From<Uuid> for OvsValue {
    fn from(value: Uuid) -> Self {
        OvsValue::Atom(Atom::Uuid(value))
    }
}

impl fmt::Display for OvsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl Serialize for OvsValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for OvsValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let json = Value::deserialize(deserializer)?;
        OvsValue::from_json(&json).map_err(serde::de::Error::custom)
    }
}

/// A database row: column name to value, plus the implicit `_uuid` identity
/// when the server included it.
#[derive(Debug, Clone, Default, PartialEq, Hash)]
pub struct Row {
    columns: BTreeMap<String, OvsValue>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a row object; every field becomes a column.
    pub fn from_json(json: &Value) -> Result<Row> {
        let obj = json
            .as_object()
            .ok_or_else(|| Error::protocol(format!("row is not an object: {json}")))?;
        let mut columns = BTreeMap::new();
        for (name, value) in obj {
            columns.insert(name.clone(), OvsValue::from_json(value)?);
        }
        Ok(Row { columns })
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.columns
                .iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect(),
        )
    }

    pub fn get(&self, column: &str) -> Option<&OvsValue> {
        self.columns.get(column)
    }

    /// Insert or replace a column value.
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<OvsValue>) -> &mut Self {
        self.columns.insert(column.into(), value.into());
        self
    }

    pub fn remove(&mut self, column: &str) -> Option<OvsValue> {
        self.columns.remove(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&String, &OvsValue)> {
        self.columns.iter()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &String> {
        self.columns.keys()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// The row identity from the `_uuid` pseudo-column, when present.
    pub fn uuid(&self) -> Option<Uuid> {
        self.get("_uuid")?.as_atom()?.as_uuid()
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Row {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let json = Value::deserialize(deserializer)?;
        Row::from_json(&json).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atom_wire_shapes() {
        let uuid = Uuid::parse_str("36bef046-7da7-43a5-905a-c17899216fcb").unwrap();
        assert_eq!(
            Atom::Uuid(uuid).to_json(),
            json!(["uuid", "36bef046-7da7-43a5-905a-c17899216fcb"])
        );
        assert_eq!(
            Atom::NamedUuid("row_br0".into()).to_json(),
            json!(["named-uuid", "row_br0"])
        );
        assert_eq!(Atom::from_json(&json!(42)).unwrap(), Atom::Integer(42));
        assert_eq!(Atom::from_json(&json!(1.5)).unwrap(), Atom::Real(1.5));
    }

    #[test]
    fn test_set_and_map_wire_shapes() {
        let set = OvsValue::set([34i64, 42]);
        assert_eq!(set.to_json(), json!(["set", [34, 42]]));

        let map = OvsValue::map([("stp-priority", "16384")]);
        assert_eq!(map.to_json(), json!(["map", [["stp-priority", "16384"]]]));

        let parsed = OvsValue::from_json(&json!(["map", [["a", 1], ["b", 2]]])).unwrap();
        assert_eq!(parsed.as_map().unwrap().len(), 2);
    }

    #[test]
    fn test_singleton_set_normalization() {
        // Servers collapse single-element sets to the bare atom.
        let value = OvsValue::from_json(&json!(34)).unwrap();
        assert_eq!(value.to_set().unwrap(), vec![Atom::Integer(34)]);

        let explicit = OvsValue::from_json(&json!(["set", [34]])).unwrap();
        assert_eq!(explicit.to_set().unwrap(), vec![Atom::Integer(34)]);
    }

    #[test]
    fn test_row_identity_from_uuid_column() {
        let row = Row::from_json(&json!({
            "name": "br0",
            "_uuid": ["uuid", "36bef046-7da7-43a5-905a-c17899216fcb"]
        }))
        .unwrap();
        assert_eq!(
            row.uuid().unwrap().to_string(),
            "36bef046-7da7-43a5-905a-c17899216fcb"
        );
        assert_eq!(row.get("name").unwrap().as_atom().unwrap().as_str(), Some("br0"));
    }

    #[test]
    fn test_rejects_malformed_values() {
        assert!(OvsValue::from_json(&json!(["set", 7])).is_err());
        assert!(OvsValue::from_json(&json!(["map", [["k"]]])).is_err());
        assert!(Atom::from_json(&json!(["uuid", "not-a-uuid"])).is_err());
        assert!(Atom::from_json(&json!({"x": 1})).is_err());
    }
}
