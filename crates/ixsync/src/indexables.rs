//! 🗂️ Indexables: the registry of "things we know how to walk and index".
//!
//! 🎬 A post, a user, a term. Each shows up with a descriptor (who am I, am I global,
//! can you page me by id) and a content source (where my objects live). The registry
//! keeps them in registration order, because `sync_stack` order is registration order
//! and nobody wants users indexed before posts just because a HashMap felt like it.
//!
//! 🧠 Knowledge graph:
//! - `ContentSource` trait → concrete sources (`InMemorySource`, `FileSource`) →
//!   `ContentSourceBackend` enum. Same trait + enum dispatch shape as the engine and store.
//! - `Cursor` lives here because both the enumerator and the checkpoint speak it.
//! - Mapping documents are opaque JSON. We ship them, we do not understand them.

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::common::{ObjectPage, SourceObject};

pub mod file;
pub mod in_mem;

pub use file::{FileSource, FileSourceConfig};
pub use in_mem::InMemorySource;

/// 🪪 Static facts about an indexable. Registered once, never mutated mid-sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexableDescriptor {
    pub slug: String,
    /// 🌐 Global indexables get one index for the whole network (users, typically).
    #[serde(default)]
    pub is_global: bool,
    /// 📏 Whether objects can be paged by ascending id bounds instead of offsets.
    #[serde(default)]
    pub supports_range_pagination: bool,
}

impl IndexableDescriptor {
    pub fn new(slug: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            is_global: false,
            supports_range_pagination: false,
        }
    }

    pub fn global(mut self) -> Self {
        self.is_global = true;
        self
    }

    pub fn with_range_pagination(mut self) -> Self {
        self.supports_range_pagination = true;
        self
    }
}

/// 🧭 Where the enumerator is within one indexable.
///
/// `Offset` is the default. `IdRange` is monotonic: `lower_bound_id` only ever goes up,
/// so rows inserted or deleted behind it cannot shift what comes next. `Exhausted` is an id
/// walk that went past the largest id there can be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Cursor {
    Offset {
        offset: u64,
    },
    IdRange {
        lower_bound_id: u64,
        #[serde(default)]
        upper_bound_id: Option<u64>,
    },
    Exhausted,
}

impl Cursor {
    /// ✅ Does `id` sit inside the id window? Offsets have no window, so yes.
    pub fn admits(&self, id: u64) -> bool {
        match self {
            Cursor::Offset { .. } => true,
            Cursor::IdRange {
                lower_bound_id,
                upper_bound_id,
            } => id >= *lower_bound_id && upper_bound_id.is_none_or(|upper| id <= upper),
            Cursor::Exhausted => false,
        }
    }
}

/// 🔎 One request for a page of objects.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectQuery {
    pub per_page: usize,
    pub cursor: Cursor,
    /// 🎯 Only these ids. Empty means everybody.
    pub include: Vec<u64>,
    /// 🏷️ Only these sub-types. Empty means every sub-type.
    pub subtypes: Vec<String>,
    /// 🏘️ Only objects of this site (site-less objects always match).
    pub site_id: Option<u64>,
}

impl ObjectQuery {
    /// ✅ The filter half of the query, shared by every content source.
    pub fn matches(&self, object: &SourceObject) -> bool {
        if !self.include.is_empty() && !self.include.contains(&object.id) {
            return false;
        }
        if !self.subtypes.is_empty() {
            match object.subtype {
                Some(ref subtype) if self.subtypes.iter().any(|s| s == subtype) => {}
                _ => return false,
            }
        }
        if let (Some(wanted), Some(actual)) = (self.site_id, object.site_id) {
            if wanted != actual {
                return false;
            }
        }
        self.cursor.admits(object.id)
    }
}

/// 🚰 Something that can enumerate native objects in ascending id order.
///
/// # Contract 📜
/// - `query` returns at most `per_page` objects, ascending by id, honoring the cursor.
/// - `count` is the number of objects a fresh walk of `query` would visit.
#[async_trait]
pub trait ContentSource: std::fmt::Debug + Send + Sync {
    async fn query(&self, query: &ObjectQuery) -> Result<ObjectPage>;
    async fn count(&self, query: &ObjectQuery) -> Result<u64>;
}

/// 🎭 The many faces of a content source.
#[derive(Debug, Clone)]
pub enum ContentSourceBackend {
    InMemory(InMemorySource),
    File(FileSource),
}

#[async_trait]
impl ContentSource for ContentSourceBackend {
    async fn query(&self, query: &ObjectQuery) -> Result<ObjectPage> {
        match self {
            ContentSourceBackend::InMemory(source) => source.query(query).await,
            ContentSourceBackend::File(source) => source.query(query).await,
        }
    }

    async fn count(&self, query: &ObjectQuery) -> Result<u64> {
        match self {
            ContentSourceBackend::InMemory(source) => source.count(query).await,
            ContentSourceBackend::File(source) => source.count(query).await,
        }
    }
}

/// 📦 An indexable: descriptor + where its objects live + what its index looks like.
#[derive(Debug, Clone)]
pub struct Indexable {
    pub descriptor: IndexableDescriptor,
    pub source: ContentSourceBackend,
    pub mapping: Value,
}

impl Indexable {
    pub fn new(descriptor: IndexableDescriptor, source: ContentSourceBackend) -> Self {
        Self {
            descriptor,
            source,
            mapping: default_mapping(),
        }
    }

    pub fn with_mapping(mut self, mapping: Value) -> Self {
        self.mapping = mapping;
        self
    }

    pub fn slug(&self) -> &str {
        &self.descriptor.slug
    }

    /// 🏷️ `{prefix}-{slug}` for global indexables, `{prefix}-{slug}-{site}` otherwise.
    pub fn index_name(&self, prefix: &str, site_id: Option<u64>) -> String {
        match (self.descriptor.is_global, site_id) {
            (false, Some(site)) => format!("{prefix}-{}-{site}", self.descriptor.slug),
            _ => format!("{prefix}-{}", self.descriptor.slug),
        }
    }
}

/// 🗺️ Used when an indexable brings no mapping of its own: let the engine infer fields.
pub fn default_mapping() -> Value {
    json!({ "mappings": { "dynamic": true } })
}

/// 📚 Slug → indexable, in registration order.
#[derive(Debug, Clone, Default)]
pub struct IndexableRegistry {
    indexables: Vec<Indexable>,
}

impl IndexableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// ➕ Register an indexable. Duplicate slugs are a startup bug, so we bail.
    pub fn register(&mut self, indexable: Indexable) -> Result<()> {
        if self.get(indexable.slug()).is_some() {
            bail!(
                "💀 indexable '{}' is registered twice. One slug, one indexable, that's the deal",
                indexable.slug()
            );
        }
        self.indexables.push(indexable);
        Ok(())
    }

    pub fn get(&self, slug: &str) -> Option<&Indexable> {
        self.indexables.iter().find(|i| i.slug() == slug)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Indexable> {
        self.indexables.iter()
    }

    pub fn slugs(&self) -> Vec<String> {
        self.indexables.iter().map(|i| i.slug().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.indexables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_with(cursor: Cursor) -> ObjectQuery {
        ObjectQuery {
            per_page: 10,
            cursor,
            include: vec![],
            subtypes: vec![],
            site_id: None,
        }
    }

    #[test]
    fn the_one_where_the_id_window_is_inclusive_on_both_ends() {
        let cursor = Cursor::IdRange {
            lower_bound_id: 5,
            upper_bound_id: Some(9),
        };
        assert!(!cursor.admits(4));
        assert!(cursor.admits(5));
        assert!(cursor.admits(9));
        assert!(!cursor.admits(10));
        assert!(Cursor::Offset { offset: 100 }.admits(1));
    }

    #[test]
    fn the_one_where_filters_stack_up() {
        let mut query = query_with(Cursor::Offset { offset: 0 });
        query.subtypes = vec!["page".into()];
        query.site_id = Some(2);

        let page_on_site_two = SourceObject::new(1, json!({})).with_subtype("page").with_site(2);
        let post_on_site_two = SourceObject::new(2, json!({})).with_subtype("post").with_site(2);
        let page_on_site_three = SourceObject::new(3, json!({})).with_subtype("page").with_site(3);
        let siteless_page = SourceObject::new(4, json!({})).with_subtype("page");

        assert!(query.matches(&page_on_site_two));
        assert!(!query.matches(&post_on_site_two));
        assert!(!query.matches(&page_on_site_three));
        assert!(query.matches(&siteless_page));

        query.include = vec![4];
        assert!(!query.matches(&page_on_site_two));
        assert!(query.matches(&siteless_page));
    }

    #[test]
    fn the_one_where_global_indexables_skip_the_site_suffix() {
        let post = Indexable::new(
            IndexableDescriptor::new("post"),
            ContentSourceBackend::InMemory(InMemorySource::default()),
        );
        let user = Indexable::new(
            IndexableDescriptor::new("user").global(),
            ContentSourceBackend::InMemory(InMemorySource::default()),
        );
        assert_eq!(post.index_name("wp", Some(3)), "wp-post-3");
        assert_eq!(user.index_name("wp", Some(3)), "wp-user");
        assert_eq!(post.index_name("wp", None), "wp-post");
    }

    #[test]
    fn the_one_where_a_slug_cannot_be_registered_twice() {
        let mut registry = IndexableRegistry::new();
        let make = || {
            Indexable::new(
                IndexableDescriptor::new("post"),
                ContentSourceBackend::InMemory(InMemorySource::default()),
            )
        };
        registry.register(make()).expect("💀 first registration is fine");
        assert!(registry.register(make()).is_err());
        assert_eq!(registry.slugs(), vec!["post".to_string()]);
    }
}
