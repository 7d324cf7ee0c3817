//! Cache key derivation.
//!
//! Layout, with every segment separated by `:`:
//!
//! ```text
//! {prefix}:{instance}:{table}:p:{primary_key}
//! {prefix}:{instance}:{table}:s:{fingerprint}
//! ```
//!
//! The instance and table segments are escaped so that neither can contain
//! the separator, which keeps each table's prefixes disjoint from every other
//! table's keys.
//! The fingerprint is a SHA-256 over the length-framed query text and the
//! canonical JSON of each bound argument.

use std::borrow::Cow;

use serde_json::Value;
use sha2::{Digest, Sha256};

pub const DEFAULT_KEY_PREFIX: &str = "sqlcache";

const SEPARATOR: char = ':';
const PRIMARY_TAG: &str = "p";
const SEARCH_TAG: &str = "s";

/// Derives namespaced primary and search keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCodec {
    prefix: String,
}

impl KeyCodec {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Prefix shared by every primary-key entry of `table`.
    pub fn primary_prefix(&self, instance_id: &str, table: &str) -> String {
        self.table_prefix(instance_id, table, PRIMARY_TAG)
    }

    /// Prefix shared by every search entry of `table`.
    pub fn search_prefix(&self, instance_id: &str, table: &str) -> String {
        self.table_prefix(instance_id, table, SEARCH_TAG)
    }

    pub fn primary_key(&self, instance_id: &str, table: &str, primary_key: &str) -> String {
        let mut key = self.primary_prefix(instance_id, table);
        key.push_str(primary_key);
        key
    }

    pub fn search_key(&self, instance_id: &str, table: &str, sql: &str, args: &[Value]) -> String {
        let mut key = self.search_prefix(instance_id, table);
        key.push_str(&fingerprint(sql, args));
        key
    }

    fn table_prefix(&self, instance_id: &str, table: &str, tag: &str) -> String {
        let instance_id = escape_segment(instance_id);
        let table = escape_segment(table);
        let mut key = String::with_capacity(
            self.prefix.len() + instance_id.len() + table.len() + tag.len() + 4,
        );
        key.push_str(&self.prefix);
        key.push(SEPARATOR);
        key.push_str(&instance_id);
        key.push(SEPARATOR);
        key.push_str(&table);
        key.push(SEPARATOR);
        key.push_str(tag);
        key.push(SEPARATOR);
        key
    }
}

impl Default for KeyCodec {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX)
    }
}

/// Stable content fingerprint of a query shape and its bound values.
pub fn fingerprint(sql: &str, args: &[Value]) -> String {
    let mut hasher = Sha256::new();
    frame(&mut hasher, sql.as_bytes());
    hasher.update((args.len() as u64).to_be_bytes());
    for arg in args {
        // Display on Value is its compact JSON rendering.
        frame(&mut hasher, arg.to_string().as_bytes());
    }
    hex::encode(hasher.finalize())
}

fn frame(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

fn escape_segment(segment: &str) -> Cow<'_, str> {
    if !segment.contains([SEPARATOR, '%']) {
        return Cow::Borrowed(segment);
    }

    let mut escaped = String::with_capacity(segment.len() + 8);
    for ch in segment.chars() {
        match ch {
            '%' => escaped.push_str("%25"),
            SEPARATOR => escaped.push_str("%3A"),
            other => escaped.push(other),
        }
    }
    Cow::Owned(escaped)
}
