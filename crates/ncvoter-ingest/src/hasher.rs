//! Content hashing of snapshot rows
//!
//! A row is serialized as a bencoded dictionary (keys sorted, lengths in
//! bytes) with volatile fields left out, then hashed with MD5. The hash is
//! a change detector: a row whose hash is already in an entity's change log
//! is a pure repeat.

use ncvoter_common::checksum::compute_md5;
use ncvoter_common::RawRow;

fn push_bstring(out: &mut String, value: &str) {
    out.push_str(&value.len().to_string());
    out.push(':');
    out.push_str(value);
}

/// Canonical bencoding of a row, skipping `exclude`d fields
pub fn canonical_form(row: &RawRow, exclude: &[&str]) -> String {
    let mut out = String::from("d");
    // BTreeMap iteration is already key-sorted
    for (key, value) in row.iter().filter(|(k, _)| !exclude.contains(&k.as_str())) {
        push_bstring(&mut out, key);
        push_bstring(&mut out, value);
    }
    out.push('e');
    out
}

/// MD5 hex digest of the canonical form
pub fn content_hash(row: &RawRow, exclude: &[&str]) -> String {
    compute_md5(canonical_form(row, exclude).as_bytes())
}
