//! JSON Pointer (RFC 6901) traversal, plus flatten/unflatten.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;

/// Parses a JSON Pointer into unescaped reference tokens.
///
/// The empty pointer addresses the whole document and yields no tokens.
///
/// # Errors
///
/// Returns [`CodecError::InvalidPointer`] when the pointer is non-empty and
/// does not start with `/`, or contains a dangling `~` escape.
pub fn parse_pointer(pointer: &str) -> CodecResult<Vec<String>> {
    if pointer.is_empty() {
        return Ok(Vec::new());
    }
    if !pointer.starts_with('/') {
        return Err(CodecError::invalid_pointer(pointer));
    }
    pointer
        .split('/')
        .skip(1)
        .map(|token| unescape_token(token).ok_or_else(|| CodecError::invalid_pointer(pointer)))
        .collect()
}

fn unescape_token(token: &str) -> Option<String> {
    if !token.contains('~') {
        return Some(token.to_string());
    }
    let mut out = String::with_capacity(token.len());
    let mut chars = token.chars();
    while let Some(c) = chars.next() {
        if c != '~' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('0') => out.push('~'),
            Some('1') => out.push('/'),
            _ => return None,
        }
    }
    Some(out)
}

/// Escapes one reference token for embedding in a pointer string.
#[must_use]
pub fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn array_index(token: &str, len: usize) -> Option<usize> {
    // RFC 6901 forbids leading zeros and signs.
    if token == "0" {
        return Some(0);
    }
    if token.is_empty() || token.starts_with('0') || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse::<usize>().ok().filter(|&idx| idx < len)
}

/// Resolves reference tokens against a value.
#[must_use]
pub fn resolve<'a>(mut value: &'a Value, tokens: &[String]) -> Option<&'a Value> {
    for token in tokens {
        value = match value {
            Value::Object(_) => value.get(token)?,
            Value::Array(items) => items.get(array_index(token, items.len())?)?,
            _ => return None,
        };
    }
    Some(value)
}

/// Resolves reference tokens against a value, mutably.
pub fn resolve_mut<'a>(mut value: &'a mut Value, tokens: &[String]) -> Option<&'a mut Value> {
    for token in tokens {
        value = match value {
            Value::Object(_) => value.get_mut(token)?,
            Value::Array(items) => {
                let idx = array_index(token, items.len())?;
                items.get_mut(idx)?
            }
            _ => return None,
        };
    }
    Some(value)
}

fn is_index_token(token: &str) -> bool {
    token == "-"
        || token == "0"
        || (!token.is_empty()
            && !token.starts_with('0')
            && token.bytes().all(|b| b.is_ascii_digit()))
}

fn empty_container_for(token: &str) -> Value {
    if is_index_token(token) {
        Value::Array(Vec::new())
    } else {
        Value::Object(Vec::new())
    }
}

/// Sets the addressed location to `new_value`, creating missing
/// intermediates along the way: arrays where the indexing token is numeric
/// or `-`, objects otherwise.
///
/// Existing arrays accept valid indices and appends at `len` or `-`. An
/// intermediate location holding a scalar is a conflict.
///
/// # Errors
///
/// Returns [`CodecError::InvalidPointer`] when an existing intermediate is
/// a scalar or an array index is out of range.
pub fn set_creating(doc: &mut Value, tokens: &[String], new_value: Value) -> CodecResult<()> {
    let Some((last, parents)) = tokens.split_last() else {
        *doc = new_value;
        return Ok(());
    };

    let mut cursor = doc;
    for token in parents {
        // Missing slots are staged as null and grow into the container the
        // next token asks for.
        if cursor.is_null() {
            *cursor = empty_container_for(token);
        }
        cursor = match cursor {
            Value::Object(_) => {
                if cursor.get(token).is_none() {
                    cursor.insert(token.clone(), Value::Null);
                }
                cursor
                    .get_mut(token)
                    .ok_or_else(|| CodecError::invalid_pointer(token))?
            }
            Value::Array(items) => {
                let idx = if token == "-" {
                    items.push(Value::Null);
                    items.len() - 1
                } else if let Some(idx) = array_index(token, items.len()) {
                    idx
                } else if array_index(token, items.len() + 1) == Some(items.len()) {
                    items.push(Value::Null);
                    items.len() - 1
                } else {
                    return Err(CodecError::invalid_pointer(token));
                };
                &mut items[idx]
            }
            _ => return Err(CodecError::invalid_pointer(token)),
        };
    }

    if cursor.is_null() {
        *cursor = empty_container_for(last);
    }
    match cursor {
        Value::Object(_) => {
            cursor.insert(last.clone(), new_value);
            Ok(())
        }
        Value::Array(items) => {
            if last == "-" || array_index(last, items.len() + 1) == Some(items.len()) {
                items.push(new_value);
                Ok(())
            } else if let Some(idx) = array_index(last, items.len()) {
                items[idx] = new_value;
                Ok(())
            } else {
                Err(CodecError::invalid_pointer(last))
            }
        }
        _ => Err(CodecError::invalid_pointer(last)),
    }
}

/// Selects a field of a document.
///
/// A slash-prefixed field is a JSON Pointer; anything else is a plain
/// top-level member name. Returns `None` if the field does not resolve.
pub fn find_field<'a>(doc: &'a Value, field: &str) -> CodecResult<Option<&'a Value>> {
    if field.starts_with('/') {
        let tokens = parse_pointer(field)?;
        Ok(resolve(doc, &tokens))
    } else {
        Ok(doc.get(field))
    }
}

/// Flattens a document into `(pointer, leaf)` pairs.
///
/// Leaves are scalars and empty containers. A scalar root flattens to the
/// empty pointer.
#[must_use]
pub fn flatten(value: &Value) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    flatten_into(value, String::new(), &mut out);
    out
}

fn flatten_into(value: &Value, path: String, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(members) if !members.is_empty() => {
            for (name, member) in members {
                flatten_into(member, format!("{path}/{}", escape_token(name)), out);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (idx, item) in items.iter().enumerate() {
                flatten_into(item, format!("{path}/{idx}"), out);
            }
        }
        leaf => out.push((path, leaf.clone())),
    }
}

/// Rebuilds a document from `(pointer, leaf)` pairs.
///
/// Intermediate containers become arrays when the next token is numeric or
/// `-`, objects otherwise.
///
/// # Errors
///
/// Returns an error when pairs conflict (a leaf under a scalar).
pub fn unflatten(pairs: &[(String, Value)]) -> CodecResult<Value> {
    if let [(path, value)] = pairs {
        if path.is_empty() {
            return Ok(value.clone());
        }
    }
    let mut doc = Value::Object(Vec::new());
    for (path, value) in pairs {
        let tokens = parse_pointer(path)?;
        set_creating(&mut doc, &tokens, value.clone())?;
    }
    Ok(doc)
}
