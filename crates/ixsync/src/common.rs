//! 📦 Common data structures: the load-bearing nouns of ixsync.
//!
//! 🎬 A `SourceObject` leaves the content system. It gets serialized into a `Document`.
//! The `Document` rides a bulk request into the index. The checkpoint remembers it happened.
//! Nobody claps. The cursor moves on. 🦆

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 🚰 One native object as the content source hands it to us.
///
/// `fields` is the raw object. `Value::Null` means the source listed the id but could not
/// produce the object (deleted between count and fetch, broken row, you name it). The
/// serializer turns that into a skip, not a crash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceObject {
    /// 🔢 Monotonic id. Id-range pagination leans on this being ascending and unique.
    pub id: u64,
    /// 🏷️ Sub-type inside the indexable (a post type, a taxonomy). Filtered by `post_type`.
    #[serde(default)]
    pub subtype: Option<String>,
    /// 🏘️ Owning site for multi-site content. `None` means "belongs to everyone".
    #[serde(default)]
    pub site_id: Option<u64>,
    /// 📄 The object itself.
    #[serde(default)]
    pub fields: Value,
}

impl SourceObject {
    /// 🏗️ A plain object with no sub-type and no site. Tests love these.
    pub fn new(id: u64, fields: Value) -> Self {
        Self {
            id,
            subtype: None,
            site_id: None,
            fields,
        }
    }

    /// 🏷️ Builder-ish sugar for the sub-type.
    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.subtype = Some(subtype.into());
        self
    }

    /// 🏘️ Builder-ish sugar for the owning site.
    pub fn with_site(mut self, site_id: u64) -> Self {
        self.site_id = Some(site_id);
        self
    }
}

/// 📄 A serialized document, ready for the bulk API.
///
/// `source_buf` is already JSON text. The bulk renderer writes it as-is, no re-serialization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub id: String,
    pub source_buf: String,
}

impl Document {
    /// 📊 Bytes on the wire for the body line. Handy for logs.
    pub fn len(&self) -> usize {
        self.source_buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source_buf.is_empty()
    }
}

/// 📦 One page of objects from a content source. Totals come from `ContentSource::count`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectPage {
    pub objects: Vec<SourceObject>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn the_one_where_a_source_object_learns_where_it_lives() {
        let obj = SourceObject::new(7, json!({"post_title": "hi"}))
            .with_subtype("page")
            .with_site(2);
        assert_eq!(obj.subtype.as_deref(), Some("page"));
        assert_eq!(obj.site_id, Some(2));
    }

    #[test]
    fn the_one_where_missing_fields_deserialize_to_null() {
        let obj: SourceObject = serde_json::from_str(r#"{"id":3}"#).expect("💀 bare id should parse");
        assert_eq!(obj.fields, Value::Null);
        assert!(obj.subtype.is_none());
    }
}
