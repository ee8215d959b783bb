//! Dynamic document value type.

/// A dynamic document value.
///
/// This is the in-memory tree every wire format parses into and serializes
/// from. Object members are kept sorted by name, so logically equal
/// documents compare equal regardless of member insertion order.
///
/// Integer handling follows one rule across all codecs: non-negative
/// integers decode to [`Value::Int`] unless they exceed `i64::MAX`, in which
/// case they become [`Value::Uint`]. Encoders are free to pick the shortest
/// wire form for either.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Unsigned integer above `i64::MAX`.
    Uint(u64),
    /// Double-precision float.
    Float(f64),
    /// Text string (UTF-8).
    Str(String),
    /// Byte string.
    Bin(Vec<u8>),
    /// Array of values.
    Array(Vec<Value>),
    /// Object with members sorted by name.
    Object(Vec<(String, Value)>),
}

impl Value {
    /// Creates an object value with sorted, deduplicated members.
    ///
    /// On duplicate names the last entry wins.
    #[must_use]
    pub fn object(pairs: Vec<(String, Value)>) -> Self {
        let mut members: Vec<(String, Value)> = Vec::with_capacity(pairs.len());
        for (name, value) in pairs {
            match members.binary_search_by(|(n, _)| n.as_str().cmp(name.as_str())) {
                Ok(idx) => members[idx].1 = value,
                Err(idx) => members.insert(idx, (name, value)),
            }
        }
        Value::Object(members)
    }

    /// Normalizes an integer into `Int` when it fits, `Uint` otherwise.
    #[must_use]
    pub fn from_unsigned(n: u64) -> Self {
        match i64::try_from(n) {
            Ok(signed) => Value::Int(signed),
            Err(_) => Value::Uint(n),
        }
    }

    /// Returns a short name of this value's kind, for error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Uint(_) => "uint",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bin(_) => "binary",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    /// Check if this value is null.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get this value as a boolean, if it is one.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as a signed integer, if it is one.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a string slice, if it is a text string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as bytes, if it is a byte string.
    #[must_use]
    pub fn as_bin(&self) -> Option<&[u8]> {
        match self {
            Value::Bin(b) => Some(b),
            _ => None,
        }
    }

    /// Get this value as an array, if it is one.
    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get this value's members, if it is an object.
    #[must_use]
    pub fn as_object(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Object(m) => Some(m),
            _ => None,
        }
    }

    /// Looks up a top-level member by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Object(members) => members
                .binary_search_by(|(n, _)| n.as_str().cmp(name))
                .ok()
                .map(|idx| &members[idx].1),
            _ => None,
        }
    }

    /// Looks up a top-level member by name, mutably.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        match self {
            Value::Object(members) => members
                .binary_search_by(|(n, _)| n.as_str().cmp(name))
                .ok()
                .map(|idx| &mut members[idx].1),
            _ => None,
        }
    }

    /// Inserts or replaces a member, keeping the order invariant.
    ///
    /// Returns the previous value, if any. Does nothing and returns `None`
    /// when `self` is not an object.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        let name = name.into();
        match self {
            Value::Object(members) => {
                match members.binary_search_by(|(n, _)| n.as_str().cmp(name.as_str())) {
                    Ok(idx) => Some(std::mem::replace(&mut members[idx].1, value)),
                    Err(idx) => {
                        members.insert(idx, (name, value));
                        None
                    }
                }
            }
            _ => None,
        }
    }

    /// Removes a member by name, returning it if present.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        match self {
            Value::Object(members) => members
                .binary_search_by(|(n, _)| n.as_str().cmp(name))
                .ok()
                .map(|idx| members.remove(idx).1),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(i64::from(n))
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::from_unsigned(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bin(b)
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_members_are_sorted() {
        let doc = Value::object(vec![
            ("z".to_string(), Value::Int(1)),
            ("a".to_string(), Value::Int(2)),
            ("m".to_string(), Value::Int(3)),
        ]);

        let Value::Object(members) = &doc else {
            panic!("expected object")
        };
        assert_eq!(members[0].0, "a");
        assert_eq!(members[1].0, "m");
        assert_eq!(members[2].0, "z");
    }

    #[test]
    fn object_duplicate_last_wins() {
        let doc = Value::object(vec![
            ("a".to_string(), Value::Int(1)),
            ("a".to_string(), Value::Int(2)),
        ]);
        assert_eq!(doc.get("a"), Some(&Value::Int(2)));
        assert_eq!(doc.as_object().unwrap().len(), 1);
    }

    #[test]
    fn equal_regardless_of_insertion_order() {
        let left = Value::object(vec![
            ("a".to_string(), Value::Int(1)),
            ("b".to_string(), Value::Int(2)),
        ]);
        let right = Value::object(vec![
            ("b".to_string(), Value::Int(2)),
            ("a".to_string(), Value::Int(1)),
        ]);
        assert_eq!(left, right);
    }

    #[test]
    fn from_unsigned_prefers_signed() {
        assert_eq!(Value::from_unsigned(42), Value::Int(42));
        assert_eq!(
            Value::from_unsigned(u64::MAX),
            Value::Uint(u64::MAX)
        );
        assert_eq!(
            Value::from_unsigned(i64::MAX as u64 + 1),
            Value::Uint(i64::MAX as u64 + 1)
        );
    }

    #[test]
    fn insert_and_remove_keep_order() {
        let mut doc = Value::object(vec![("b".to_string(), Value::Int(2))]);
        doc.insert("a", Value::Int(1));
        doc.insert("c", Value::Int(3));
        doc.insert("b", Value::Int(9));

        let names: Vec<&str> = doc
            .as_object()
            .unwrap()
            .iter()
            .map(|(n, _)| n.as_str())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(doc.get("b"), Some(&Value::Int(9)));

        assert_eq!(doc.remove("b"), Some(Value::Int(9)));
        assert_eq!(doc.get("b"), None);
    }

    #[test]
    fn accessors() {
        assert!(Value::Null.is_null());
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Int(7).as_int(), Some(7));
        assert_eq!(Value::Str("x".into()).as_str(), Some("x"));
        assert_eq!(Value::Bin(vec![1]).as_bin(), Some(&[1u8][..]));
        assert_eq!(Value::Int(7).as_str(), None);
        assert_eq!(Value::from("hi"), Value::Str("hi".to_string()));
    }
}
