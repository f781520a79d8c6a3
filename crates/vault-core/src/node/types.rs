//! Node and tag value types

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::SecretString;
use crate::error::{Result, VaultError};

/// Storage-assigned node identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub i64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<i64>()
            .map(NodeId)
            .map_err(|_| VaultError::InvalidInput(format!("not a node id: {:?}", s)))
    }
}

/// A label attached to nodes, identified by its text
///
/// Tags are single words: surrounding whitespace is trimmed and inner
/// whitespace is rejected.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Tag(String);

impl Tag {
    pub fn new(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(VaultError::InvalidInput("tag must not be empty".to_string()));
        }
        if text.chars().any(char::is_whitespace) {
            return Err(VaultError::InvalidInput(format!(
                "tag must be a single word: {:?}",
                text
            )));
        }
        Ok(Self(text.to_string()))
    }

    /// Parse several tags at once
    pub fn parse_many<I, S>(texts: I) -> Result<Vec<Tag>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        texts.into_iter().map(|t| Tag::new(t.as_ref())).collect()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Tag {
    type Error = VaultError;

    fn try_from(value: String) -> Result<Self> {
        Tag::new(&value)
    }
}

impl From<Tag> for String {
    fn from(tag: Tag) -> Self {
        tag.0
    }
}

/// Remove duplicate tags, keeping the first occurrence of each
pub fn dedup_tags(tags: impl IntoIterator<Item = Tag>) -> Vec<Tag> {
    let mut seen = BTreeSet::new();
    tags.into_iter()
        .filter(|tag| seen.insert(tag.clone()))
        .collect()
}

/// Whether `tags` carries every tag in `filter`
pub fn has_all_tags(tags: &[Tag], filter: &[Tag]) -> bool {
    filter.iter().all(|wanted| tags.contains(wanted))
}

/// A secret record with its password in plaintext
///
/// Only exists in memory while a session is authenticated.
#[derive(Clone)]
pub struct Node {
    id: Option<NodeId>,
    pub username: String,
    pub password: SecretString,
    pub url: String,
    pub notes: String,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    tags: Vec<Tag>,
}

impl Node {
    /// Create a new, not yet persisted node
    pub fn new(username: &str, password: &str, url: &str) -> Self {
        Self {
            id: None,
            username: username.to_string(),
            password: SecretString::from(password),
            url: url.to_string(),
            notes: String::new(),
            created_at: None,
            modified_at: None,
            tags: Vec::new(),
        }
    }

    pub fn with_notes(mut self, notes: &str) -> Self {
        self.notes = notes.to_string();
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = Tag>) -> Self {
        self.set_tags(tags);
        self
    }

    pub(crate) fn with_id(mut self, id: NodeId) -> Self {
        self.id = Some(id);
        self
    }

    /// Identifier assigned by storage, `None` while pending
    pub fn id(&self) -> Option<NodeId> {
        self.id
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    pub fn set_tags(&mut self, tags: impl IntoIterator<Item = Tag>) {
        self.tags = dedup_tags(tags);
    }

    pub fn add_tag(&mut self, tag: Tag) {
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }

    pub fn remove_tag(&mut self, tag: &Tag) {
        self.tags.retain(|t| t != tag);
    }
}

/// Persisted nodes compare by id. Pending nodes never compare equal.
impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        match (self.id, other.id) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("url", &self.url)
            .field("tags", &self.tags)
            .field("created_at", &self.created_at)
            .field("modified_at", &self.modified_at)
            .finish()
    }
}

/// A node as it is persisted
///
/// `password` is always a cipher blob. `username`, `url` and `notes` are
/// blobs or plaintext depending on the vault's field policy. Drivers store
/// these strings verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<NodeId>,
    pub username: String,
    pub password: String,
    pub url: String,
    pub notes: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
}

impl NodeRecord {
    pub fn id(&self) -> Option<NodeId> {
        self.id
    }

    pub fn has_all_tags(&self, filter: &[Tag]) -> bool {
        has_all_tags(&self.tags, filter)
    }

    /// Same stored payload and tag set, ignoring id and timestamps
    pub fn same_content(&self, other: &NodeRecord) -> bool {
        let tags: BTreeSet<&Tag> = self.tags.iter().collect();
        let other_tags: BTreeSet<&Tag> = other.tags.iter().collect();

        self.username == other.username
            && self.password == other.password
            && self.url == other.url
            && self.notes == other.notes
            && tags == other_tags
    }
}
