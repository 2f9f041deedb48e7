use serde_json::Value;

use super::record::RecordId;

/// Key prefixes inside a collection's column family
pub const DOC_PREFIX: &str = "doc:";
pub const ORD_PREFIX: &str = "ord:";
pub const IDX_PREFIX: &str = "idx:";
pub const SEQ_KEY: &str = "_stats:seq"; // Last auto-increment id handed out
pub const ORD_SEQ_KEY: &str = "_stats:ord"; // Last insertion position

/// Field every record carries its primary key in
pub const KEY_FIELD: &str = "id";

pub const PROFILE: &str = "profile";
pub const OBSERVATIONS: &str = "observations";
pub const REMINDERS: &str = "reminders";
pub const COMMUNITY_POSTS: &str = "communityPosts";
pub const FACILITY_CACHE: &str = "facilityCache";
pub const PREFERENCES: &str = "preferences";

/// How a collection assigns primary keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPolicy {
    /// The record supplies its own `id`
    Explicit,
    /// The store hands out increasing integer ids
    AutoIncrement,
}

/// A non-unique secondary index over one field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub field: String,
}

/// Declaration of a collection: its name, key policy and indexes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSpec {
    pub name: String,
    pub key_policy: KeyPolicy,
    pub indexes: Vec<IndexSpec>,
}

impl CollectionSpec {
    pub fn explicit(name: &str) -> Self {
        Self {
            name: name.to_string(),
            key_policy: KeyPolicy::Explicit,
            indexes: Vec::new(),
        }
    }

    pub fn auto_increment(name: &str) -> Self {
        Self {
            name: name.to_string(),
            key_policy: KeyPolicy::AutoIncrement,
            indexes: Vec::new(),
        }
    }

    /// Add an index named after the field it covers
    pub fn with_index(mut self, field: &str) -> Self {
        self.indexes.push(IndexSpec {
            name: field.to_string(),
            field: field.to_string(),
        });
        self
    }

    pub fn index(&self, name: &str) -> Option<&IndexSpec> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// Coerce an id to the shape this collection stores.
    /// Returns `None` when the id can never match a record here.
    pub fn normalize_id(&self, id: &RecordId) -> Option<RecordId> {
        match self.key_policy {
            KeyPolicy::AutoIncrement => id.as_seq().map(RecordId::Seq),
            KeyPolicy::Explicit => Some(RecordId::Key(id.to_string())),
        }
    }

    /// The collections every store starts with
    pub fn defaults() -> Vec<CollectionSpec> {
        vec![
            CollectionSpec::explicit(PROFILE),
            CollectionSpec::auto_increment(OBSERVATIONS)
                .with_index("date")
                .with_index("type"),
            CollectionSpec::auto_increment(REMINDERS).with_index("time"),
            CollectionSpec::auto_increment(COMMUNITY_POSTS)
                .with_index("date")
                .with_index("location"),
            CollectionSpec::explicit(FACILITY_CACHE),
            CollectionSpec::explicit(PREFERENCES),
        ]
    }
}

/// Generate a document key: "doc:<id>"
pub fn doc_key(id: &RecordId) -> Vec<u8> {
    format!("{}{}", DOC_PREFIX, id.storage_key()).into_bytes()
}

/// Generate an insertion-order key: "ord:<position>"
pub fn ord_key(ord: u64) -> Vec<u8> {
    format!("{}{:020}", ORD_PREFIX, ord).into_bytes()
}

/// Prefix shared by all entries of one index value: "idx:<name>:<json value>:"
pub fn idx_value_prefix(index_name: &str, value: &Value) -> Vec<u8> {
    let value_str = serde_json::to_string(value).unwrap_or_default();
    format!("{}{}:{}:", IDX_PREFIX, index_name, value_str).into_bytes()
}

/// Generate an index entry key: "idx:<name>:<json value>:<position>".
/// The trailing position keeps matches in insertion order.
pub fn idx_entry_key(index_name: &str, value: &Value, ord: u64) -> Vec<u8> {
    let mut key = idx_value_prefix(index_name, value);
    key.extend_from_slice(format!("{:020}", ord).as_bytes());
    key
}
