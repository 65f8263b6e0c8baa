//! Identifier codec.
//!
//! Caller-supplied names (domains, table names, attribute names) are turned
//! into identifiers the wide-column store accepts. Column and table names are
//! always quoted; keyspace names are additionally restricted to
//! `[a-zA-Z0-9_]` and at most [`MAX_KEYSPACE_LEN`] characters, so they are
//! derived through [`derive_namespace`].

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use sha2::{Digest, Sha256};

pub const MAX_KEYSPACE_LEN: usize = 48;
/// Lower bound for the domain part, so long table names cannot squeeze it out.
const MIN_DOMAIN_BUDGET: usize = 26;
const TABLE_SEPARATOR: &str = "_T_";

/// Quotes a name for embedding as an identifier in statement text.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn is_plain_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Derives the keyspace holding all physical tables of `table` in `domain`.
///
/// Pure and deterministic. The result never exceeds [`MAX_KEYSPACE_LEN`]
/// characters and only contains `[a-zA-Z0-9_]`.
pub fn derive_namespace(domain: &str, table: &str) -> String {
    let table_len = table.chars().count();
    let domain_budget = MIN_DOMAIN_BUDGET.max(
        MAX_KEYSPACE_LEN
            .saturating_sub(table_len)
            .saturating_sub(TABLE_SEPARATOR.len()),
    );
    let prefix = make_valid_key(domain, domain_budget);
    let table_budget = MAX_KEYSPACE_LEN
        .saturating_sub(prefix.len())
        .saturating_sub(TABLE_SEPARATOR.len());
    let suffix = make_valid_key(table, table_budget);
    format!("{prefix}{TABLE_SEPARATOR}{suffix}")
}

/// Bounds `key` to `budget` characters of `[a-zA-Z0-9_]`.
///
/// Literal underscores are doubled and dots become single underscores. Keys
/// that still contain other characters, or that are too long, keep a literal
/// prefix followed by a hash of the untransformed key.
pub fn make_valid_key(key: &str, budget: usize) -> String {
    let escaped = key.replace('_', "__").replace('.', "_");
    if !is_plain_identifier(&escaped) {
        let mut prefix = valid_prefix(&escaped);
        prefix.truncate(budget * 2 / 3);
        let hash_len = budget - prefix.len();
        let mut out = prefix;
        out.push_str(truncated(&hash_key(key), hash_len));
        out
    } else if escaped.len() > budget {
        let mut out = escaped[..budget * 2 / 3].to_string();
        out.push_str(truncated(&hash_key(key), budget / 3));
        out
    } else {
        escaped
    }
}

/// SHA-256 of `key`, base64 encoded with `+` and `/` mapped to `_`.
pub fn hash_key(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    STANDARD_NO_PAD
        .encode(digest)
        .replace(['+', '/'], "_")
}

fn valid_prefix(key: &str) -> String {
    key.chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

fn truncated(s: &str, len: usize) -> &str {
    &s[..len.min(s.len())]
}
