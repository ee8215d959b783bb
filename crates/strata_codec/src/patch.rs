//! JSON-Patch (RFC 6902) and JSON-Merge-Patch (RFC 7396).

use crate::error::{CodecError, CodecResult};
use crate::pointer::{parse_pointer, resolve, resolve_mut};
use crate::value::Value;

/// Applies an RFC 6902 operation list to a document.
///
/// The patch must be an array of operation objects. Operations apply in
/// order; the first failing operation aborts with an error and the document
/// must be considered spoiled (callers work on a copy).
pub fn apply_patch(doc: &mut Value, patch: &Value) -> CodecResult<()> {
    let Value::Array(operations) = patch else {
        return Err(CodecError::patch_failed(format!(
            "patch must be an array, got {}",
            patch.kind()
        )));
    };

    for operation in operations {
        let op = required_str(operation, "op")?;
        let path = parse_pointer(required_str(operation, "path")?)?;
        match op {
            "add" => {
                let value = required_value(operation)?.clone();
                add(doc, &path, value)?;
            }
            "remove" => {
                remove(doc, &path)?;
            }
            "replace" => {
                let value = required_value(operation)?.clone();
                let target = resolve_mut(doc, &path)
                    .ok_or_else(|| CodecError::patch_failed("replace target does not exist"))?;
                *target = value;
            }
            "move" => {
                let from = parse_pointer(required_str(operation, "from")?)?;
                if path.len() > from.len() && path[..from.len()] == from[..] {
                    return Err(CodecError::patch_failed(
                        "cannot move a location into its own child",
                    ));
                }
                let value = remove(doc, &from)?;
                add(doc, &path, value)?;
            }
            "copy" => {
                let from = parse_pointer(required_str(operation, "from")?)?;
                let value = resolve(doc, &from)
                    .ok_or_else(|| CodecError::patch_failed("copy source does not exist"))?
                    .clone();
                add(doc, &path, value)?;
            }
            "test" => {
                let expected = required_value(operation)?;
                let actual = resolve(doc, &path)
                    .ok_or_else(|| CodecError::patch_failed("test target does not exist"))?;
                if actual != expected {
                    return Err(CodecError::patch_failed("test failed"));
                }
            }
            other => {
                return Err(CodecError::patch_failed(format!(
                    "unknown operation {other:?}"
                )));
            }
        }
    }
    Ok(())
}

fn required_str<'a>(operation: &'a Value, member: &str) -> CodecResult<&'a str> {
    operation
        .get(member)
        .and_then(Value::as_str)
        .ok_or_else(|| CodecError::patch_failed(format!("operation needs a {member:?} string")))
}

fn required_value(operation: &Value) -> CodecResult<&Value> {
    operation
        .get("value")
        .ok_or_else(|| CodecError::patch_failed("operation needs a \"value\""))
}

fn array_insert_index(token: &str, len: usize) -> Option<usize> {
    if token == "-" {
        return Some(len);
    }
    if token == "0" {
        return Some(0).filter(|&idx| idx <= len);
    }
    if token.is_empty() || token.starts_with('0') || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse::<usize>().ok().filter(|&idx| idx <= len)
}

/// RFC 6902 `add`: the parent must already exist.
fn add(doc: &mut Value, tokens: &[String], value: Value) -> CodecResult<()> {
    let Some((last, parents)) = tokens.split_last() else {
        *doc = value;
        return Ok(());
    };
    let parent = resolve_mut(doc, parents)
        .ok_or_else(|| CodecError::patch_failed("add parent does not exist"))?;
    match parent {
        Value::Object(_) => {
            parent.insert(last.clone(), value);
            Ok(())
        }
        Value::Array(items) => {
            let idx = array_insert_index(last, items.len())
                .ok_or_else(|| CodecError::patch_failed("bad array index in add"))?;
            items.insert(idx, value);
            Ok(())
        }
        other => Err(CodecError::patch_failed(format!(
            "cannot add into {}",
            other.kind()
        ))),
    }
}

/// RFC 6902 `remove`: the target must exist. Returns the removed value.
fn remove(doc: &mut Value, tokens: &[String]) -> CodecResult<Value> {
    let Some((last, parents)) = tokens.split_last() else {
        return Err(CodecError::patch_failed("cannot remove the whole document"));
    };
    let parent = resolve_mut(doc, parents)
        .ok_or_else(|| CodecError::patch_failed("remove parent does not exist"))?;
    match parent {
        Value::Object(_) => parent
            .remove(last)
            .ok_or_else(|| CodecError::patch_failed("remove target does not exist")),
        Value::Array(items) => {
            let idx = array_insert_index(last, items.len())
                .filter(|&idx| idx < items.len() && last != "-")
                .ok_or_else(|| CodecError::patch_failed("remove target does not exist"))?;
            Ok(items.remove(idx))
        }
        other => Err(CodecError::patch_failed(format!(
            "cannot remove from {}",
            other.kind()
        ))),
    }
}

/// Applies an RFC 7396 merge patch to a document.
///
/// Object patches merge member-wise, nulls delete members; any other patch
/// replaces the document wholesale.
pub fn apply_merge_patch(doc: &mut Value, patch: &Value) {
    if let Value::Object(members) = patch {
        if !matches!(doc, Value::Object(_)) {
            *doc = Value::Object(Vec::new());
        }
        for (name, patch_member) in members {
            if patch_member.is_null() {
                doc.remove(name);
            } else if let Some(existing) = doc.get_mut(name) {
                apply_merge_patch(existing, patch_member);
            } else {
                let mut fresh = Value::Null;
                apply_merge_patch(&mut fresh, patch_member);
                doc.insert(name.clone(), fresh);
            }
        }
    } else {
        *doc = patch.clone();
    }
}
