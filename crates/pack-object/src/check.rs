//! Structural validation of reconstructed objects.
//!
//! The pack indexer admits objects into the store sight unseen unless a
//! checker is configured; this module provides the checks. They are
//! structural only: headers present and well-formed, tree entries sane and
//! sorted. Semantic reachability is someone else's problem.

use std::cmp::Ordering;

use pack_hash::OID_RAW_LEN;

use crate::{ObjectError, ObjectType};

/// Validates that a payload is structurally well-formed for its type.
#[derive(Debug, Default, Clone, Copy)]
pub struct ObjectChecker;

impl ObjectChecker {
    pub fn new() -> Self {
        Self
    }

    /// Check `data` as an object of type `kind`.
    pub fn check(&self, kind: ObjectType, data: &[u8]) -> Result<(), ObjectError> {
        match kind {
            ObjectType::Blob => Ok(()),
            ObjectType::Tree => check_tree(data),
            ObjectType::Commit => check_commit(data),
            ObjectType::Tag => check_tag(data),
        }
    }
}

fn tree_err(offset: usize, reason: &str) -> ObjectError {
    ObjectError::InvalidTreeEntry {
        offset,
        reason: reason.to_string(),
    }
}

fn check_tree(data: &[u8]) -> Result<(), ObjectError> {
    let mut pos = 0;
    let mut prev: Option<(&[u8], bool)> = None;

    while pos < data.len() {
        let entry_start = pos;

        let sp = data[pos..]
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| tree_err(entry_start, "truncated mode"))?;
        let mode_raw = &data[pos..pos + sp];
        let mode =
            parse_octal(mode_raw).ok_or_else(|| tree_err(entry_start, "invalid mode"))?;
        if mode == 0 {
            return Err(tree_err(entry_start, "zero mode"));
        }
        if mode_raw[0] == b'0' {
            return Err(tree_err(entry_start, "zero-padded mode"));
        }
        pos += sp + 1;

        let nul = data[pos..]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| tree_err(entry_start, "truncated name"))?;
        let name = &data[pos..pos + nul];
        if name.is_empty() {
            return Err(tree_err(entry_start, "empty name"));
        }
        if name == b"." || name == b".." {
            return Err(tree_err(entry_start, "reserved name"));
        }
        if name.contains(&b'/') {
            return Err(tree_err(entry_start, "name contains '/'"));
        }
        pos += nul + 1;

        if pos + OID_RAW_LEN > data.len() {
            return Err(tree_err(entry_start, "truncated object id"));
        }
        let oid = &data[pos..pos + OID_RAW_LEN];
        if oid.iter().all(|&b| b == 0) {
            return Err(tree_err(entry_start, "null object id"));
        }
        pos += OID_RAW_LEN;

        let is_dir = mode == 0o40000;
        if let Some((prev_name, prev_dir)) = prev {
            if base_name_compare(prev_name, prev_dir, name, is_dir) != Ordering::Less {
                return Err(tree_err(entry_start, "incorrectly sorted"));
            }
        }
        prev = Some((name, is_dir));
    }
    Ok(())
}

/// Parse an octal ASCII mode string.
fn parse_octal(s: &[u8]) -> Option<u32> {
    if s.is_empty() || !s.iter().all(|b| (b'0'..=b'7').contains(b)) {
        return None;
    }
    let text = std::str::from_utf8(s).ok()?;
    u32::from_str_radix(text, 8).ok()
}

/// Tree entry name comparison: directories sort as if they carried a
/// trailing '/', so "foo" (dir) sorts after "foo-bar" but before "foo.c".
fn base_name_compare(name1: &[u8], is_dir1: bool, name2: &[u8], is_dir2: bool) -> Ordering {
    let min_len = name1.len().min(name2.len());
    let cmp = name1[..min_len].cmp(&name2[..min_len]);
    if cmp != Ordering::Equal {
        return cmp;
    }
    let c1 = if name1.len() > min_len {
        name1[min_len]
    } else if is_dir1 {
        b'/'
    } else {
        0
    };
    let c2 = if name2.len() > min_len {
        name2[min_len]
    } else if is_dir2 {
        b'/'
    } else {
        0
    };
    c1.cmp(&c2)
}

/// Consume a `"<key><40 hex>\n"` header line, returning the position after
/// the newline.
fn id_line(data: &[u8], pos: usize, key: &[u8]) -> Result<usize, String> {
    let rest = &data[pos.min(data.len())..];
    if !rest.starts_with(key) {
        return Err(format!("missing '{}' header", String::from_utf8_lossy(key)));
    }
    let value = &rest[key.len()..];
    if value.len() < 41 || value[40] != b'\n' {
        return Err(format!(
            "malformed '{}' header",
            String::from_utf8_lossy(key)
        ));
    }
    if !value[..40]
        .iter()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(b))
    {
        return Err(format!(
            "bad object id in '{}' header",
            String::from_utf8_lossy(key)
        ));
    }
    Ok(pos + key.len() + 41)
}

/// Consume a `"<key><ident>\n"` header line where `<ident>` is
/// `name <email> epoch zone`.
fn person_line(data: &[u8], pos: usize, key: &[u8]) -> Result<usize, String> {
    let rest = &data[pos.min(data.len())..];
    if !rest.starts_with(key) {
        return Err(format!("missing '{}' header", String::from_utf8_lossy(key)));
    }
    let line_end = rest
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| format!("unterminated '{}' header", String::from_utf8_lossy(key)))?;
    let ident = &rest[key.len()..line_end];
    if !valid_person_ident(ident) {
        return Err(format!(
            "malformed ident in '{}' header",
            String::from_utf8_lossy(key)
        ));
    }
    Ok(pos + line_end + 1)
}

fn valid_person_ident(ident: &[u8]) -> bool {
    let Some(lt) = ident.iter().position(|&b| b == b'<') else {
        return false;
    };
    let Some(gt_rel) = ident[lt..].iter().position(|&b| b == b'>') else {
        return false;
    };
    let gt = lt + gt_rel;
    // "> epoch zone"
    let tail = &ident[gt + 1..];
    if tail.first() != Some(&b' ') {
        return false;
    }
    let tail = &tail[1..];
    let Some(sp) = tail.iter().position(|&b| b == b' ') else {
        return false;
    };
    let (epoch, zone) = (&tail[..sp], &tail[sp + 1..]);
    if epoch.is_empty() || !epoch.iter().all(u8::is_ascii_digit) {
        return false;
    }
    zone.len() == 5
        && (zone[0] == b'+' || zone[0] == b'-')
        && zone[1..].iter().all(u8::is_ascii_digit)
}

fn check_commit(data: &[u8]) -> Result<(), ObjectError> {
    let mut pos = id_line(data, 0, b"tree ").map_err(ObjectError::InvalidCommit)?;
    while data[pos..].starts_with(b"parent ") {
        pos = id_line(data, pos, b"parent ").map_err(ObjectError::InvalidCommit)?;
    }
    pos = person_line(data, pos, b"author ").map_err(ObjectError::InvalidCommit)?;
    person_line(data, pos, b"committer ").map_err(ObjectError::InvalidCommit)?;
    Ok(())
}

fn check_tag(data: &[u8]) -> Result<(), ObjectError> {
    let mut pos = id_line(data, 0, b"object ").map_err(ObjectError::InvalidTag)?;

    let rest = &data[pos..];
    if !rest.starts_with(b"type ") {
        return Err(ObjectError::InvalidTag("missing 'type' header".into()));
    }
    let line_end = rest
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| ObjectError::InvalidTag("unterminated 'type' header".into()))?;
    ObjectType::from_bytes(&rest[5..line_end])
        .map_err(|_| ObjectError::InvalidTag("bad object type".into()))?;
    pos += line_end + 1;

    let rest = &data[pos..];
    if !rest.starts_with(b"tag ") {
        return Err(ObjectError::InvalidTag("missing 'tag' header".into()));
    }
    let line_end = rest
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| ObjectError::InvalidTag("unterminated 'tag' header".into()))?;
    pos += line_end + 1;

    // tagger is optional in ancient tags
    if data[pos..].starts_with(b"tagger ") {
        person_line(data, pos, b"tagger ").map_err(ObjectError::InvalidTag)?;
    }
    Ok(())
}
