//! Stable content fingerprints
//!
//! Used where a record has no natural key and a deterministic stand-in is
//! needed: the same inputs always produce the same digest, across processes
//! and releases.

use sha2::{Digest, Sha256};

/// Separator between fields; cannot appear in normalized text input.
const FIELD_SEPARATOR: u8 = 0x1f;

/// SHA-256 over the given fields, hex encoded.
///
/// Absent fields still occupy a slot so that `[None, Some("a")]` and
/// `[Some("a"), None]` hash differently.
pub fn fingerprint<'a, I>(fields: I) -> String
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let mut hasher = Sha256::new();
    for (idx, field) in fields.into_iter().enumerate() {
        if idx > 0 {
            hasher.update([FIELD_SEPARATOR]);
        }
        if let Some(value) = field {
            hasher.update(value.as_bytes());
        }
    }
    hex::encode(hasher.finalize())
}

/// First `len` hex characters of [`fingerprint`].
pub fn short_fingerprint<'a, I>(fields: I, len: usize) -> String
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let mut digest = fingerprint(fields);
    digest.truncate(len);
    digest
}
