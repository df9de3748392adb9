//! Invalidation tags and the tag ↔ key index.

use std::collections::{HashMap, HashSet};
use std::fmt;

/// Label attached to query cache entries for bulk invalidation.
///
/// Renders as `section:<id>` or `menus`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheTag {
    /// Content of one section; shared by every page embedding it.
    Section(String),
    /// Navigation menus used to patch header components.
    Menus,
}

impl CacheTag {
    pub fn section(id: impl Into<String>) -> Self {
        CacheTag::Section(id.into())
    }
}

impl fmt::Display for CacheTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheTag::Section(id) => write!(f, "section:{id}"),
            CacheTag::Menus => f.write_str("menus"),
        }
    }
}

/// Bidirectional tag → keys and key → tags mapping.
///
/// Not synchronized on its own; the owning cache keeps it under the same lock
/// as the entries so both views change together.
#[derive(Debug, Default)]
pub(crate) struct TagIndex {
    tag_to_keys: HashMap<CacheTag, HashSet<String>>,
    key_to_tags: HashMap<String, HashSet<CacheTag>>,
}

impl TagIndex {
    /// Associate `key` with `tags`, replacing any previous association.
    pub(crate) fn register(&mut self, key: &str, tags: HashSet<CacheTag>) {
        self.unregister(key);
        for tag in &tags {
            self.tag_to_keys
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
        self.key_to_tags.insert(key.to_string(), tags);
    }

    /// Forget `key`, pruning tags left without keys.
    pub(crate) fn unregister(&mut self, key: &str) {
        let Some(tags) = self.key_to_tags.remove(key) else {
            return;
        };
        for tag in tags {
            if let Some(keys) = self.tag_to_keys.get_mut(&tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tag_to_keys.remove(&tag);
                }
            }
        }
    }

    /// Remove `tag` and return every key that carried it.
    ///
    /// The returned keys are fully unregistered, including from their other
    /// tags, since their entries are about to be dropped.
    pub(crate) fn take_tag(&mut self, tag: &CacheTag) -> HashSet<String> {
        let keys = self.tag_to_keys.remove(tag).unwrap_or_default();
        for key in &keys {
            self.unregister(key);
        }
        keys
    }

    pub(crate) fn clear(&mut self) {
        self.tag_to_keys.clear();
        self.key_to_tags.clear();
    }

    pub(crate) fn tag_count(&self) -> usize {
        self.tag_to_keys.len()
    }

    pub(crate) fn key_count(&self) -> usize {
        self.key_to_tags.len()
    }
}
