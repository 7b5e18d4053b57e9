//! 🔄 Serializer: native object in, search document out.
//!
//! 🎬 COLD OPEN: a row leaves the content system wearing everything it owns, including the
//! `_edit_lock` meta nobody asked for. It goes through the stages. It comes out as a
//! document the index can actually use.
//!
//! 🧠 Knowledge graph:
//! - Extensibility is an explicit, ordered list of named stages registered at startup.
//!   No ambient hook dispatch. You can read the pipeline top to bottom.
//! - A failing object is a `SerializeError`, which the orchestrator counts as `skipped`.
//!   One bad row never sinks a batch.
//! - Output body is JSON text (`Document::source_buf`) so the bulk renderer can write it
//!   verbatim.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::common::{Document, SourceObject};
use crate::error::SerializeError;
use crate::indexables::IndexableDescriptor;

/// 🧭 What a stage gets to look at besides the body it is shaping.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    pub descriptor: &'a IndexableDescriptor,
    pub object: &'a SourceObject,
}

type StageFn = dyn Fn(&StageContext<'_>, &mut Map<String, Value>) -> Result<(), String> + Send + Sync;

/// 🏷️ One named transformation.
#[derive(Clone)]
pub struct SerializeStage {
    name: String,
    apply: Arc<StageFn>,
}

impl SerializeStage {
    pub fn new<F>(name: impl Into<String>, apply: F) -> Self
    where
        F: Fn(&StageContext<'_>, &mut Map<String, Value>) -> Result<(), String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            apply: Arc::new(apply),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

// -- 🎭 manual Debug because closures refuse to introduce themselves
impl fmt::Debug for SerializeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializeStage").field("name", &self.name).finish()
    }
}

/// 🔒 Drop every top-level field starting with `_`. Protected meta stays home.
pub fn strip_protected_fields() -> SerializeStage {
    SerializeStage::new("strip_protected_fields", |_, body| {
        body.retain(|key, _| !key.starts_with('_'));
        Ok(())
    })
}

/// 🏷️ Record which indexable (and sub-type) produced the document.
pub fn stamp_indexable() -> SerializeStage {
    SerializeStage::new("stamp_indexable", |ctx, body| {
        body.insert("indexable".to_string(), Value::String(ctx.descriptor.slug.clone()));
        if let Some(ref subtype) = ctx.object.subtype {
            body.insert("subtype".to_string(), Value::String(subtype.clone()));
        }
        Ok(())
    })
}

/// 📦 Serialized documents of one batch, plus whoever did not make it.
#[derive(Debug, Default)]
pub struct SerializedBatch {
    pub documents: Vec<Document>,
    pub skipped: Vec<SerializeError>,
}

/// 🔄 The pipeline. Stages run in registration order.
#[derive(Debug, Clone, Default)]
pub struct DocumentSerializer {
    stages: Vec<SerializeStage>,
}

impl DocumentSerializer {
    /// 🪶 No stages: the body is the object's fields, verbatim.
    pub fn new() -> Self {
        Self::default()
    }

    /// 🧰 The stock pipeline: strip protected fields, then stamp the indexable.
    pub fn with_default_stages() -> Self {
        Self::new()
            .with_stage(strip_protected_fields())
            .with_stage(stamp_indexable())
    }

    pub fn with_stage(mut self, stage: SerializeStage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(SerializeStage::name).collect()
    }

    /// 🔄 One object → one document, or a reason it could not be.
    pub fn serialize(
        &self,
        descriptor: &IndexableDescriptor,
        object: &SourceObject,
    ) -> Result<Document, SerializeError> {
        let Value::Object(ref fields) = object.fields else {
            return Err(SerializeError::MissingSource(object.id));
        };
        let mut body = fields.clone();

        let ctx = StageContext { descriptor, object };
        for stage in &self.stages {
            (stage.apply)(&ctx, &mut body).map_err(|reason| SerializeError::Stage {
                stage: stage.name.clone(),
                id: object.id,
                reason,
            })?;
        }

        // -- ✅ a Map of Values always encodes; the error arm is for the type system's peace of mind
        let source_buf = serde_json::to_string(&body).map_err(|e| SerializeError::Stage {
            stage: "encode".to_string(),
            id: object.id,
            reason: e.to_string(),
        })?;

        Ok(Document {
            id: object.id.to_string(),
            source_buf,
        })
    }

    /// 📦 Serialize a whole batch, splitting winners from skips.
    pub fn serialize_batch(
        &self,
        descriptor: &IndexableDescriptor,
        objects: &[SourceObject],
    ) -> SerializedBatch {
        let mut batch = SerializedBatch::default();
        for object in objects {
            match self.serialize(descriptor, object) {
                Ok(document) => batch.documents.push(document),
                Err(err) => batch.skipped.push(err),
            }
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn post() -> IndexableDescriptor {
        IndexableDescriptor::new("post")
    }

    #[test]
    fn the_one_where_protected_meta_stays_home() -> Result<(), SerializeError> {
        let serializer = DocumentSerializer::with_default_stages();
        let object = SourceObject::new(9, json!({"post_title": "hello", "_edit_lock": "123"}))
            .with_subtype("page");
        let document = serializer.serialize(&post(), &object)?;
        let body: Value = serde_json::from_str(&document.source_buf).expect("💀 body is JSON");

        assert_eq!(document.id, "9");
        assert_eq!(body["post_title"], "hello");
        assert!(body.get("_edit_lock").is_none());
        assert_eq!(body["indexable"], "post");
        assert_eq!(body["subtype"], "page");
        Ok(())
    }

    #[test]
    fn the_one_where_stages_run_in_the_order_they_were_registered() -> Result<(), SerializeError> {
        let serializer = DocumentSerializer::new()
            .with_stage(SerializeStage::new("first", |_, body| {
                body.insert("trail".into(), json!("first"));
                Ok(())
            }))
            .with_stage(SerializeStage::new("second", |_, body| {
                let trail = format!("{}>second", body["trail"].as_str().unwrap_or_default());
                body.insert("trail".into(), json!(trail));
                Ok(())
            }));
        assert_eq!(serializer.stage_names(), vec!["first", "second"]);

        let document = serializer.serialize(&post(), &SourceObject::new(1, json!({})))?;
        assert_eq!(document.source_buf, r#"{"trail":"first>second"}"#);
        Ok(())
    }

    #[test]
    fn the_one_where_bad_objects_are_skipped_not_fatal() {
        let serializer = DocumentSerializer::new().with_stage(SerializeStage::new(
            "no_drafts",
            |ctx, _| match ctx.object.subtype.as_deref() {
                Some("draft") => Err("drafts are not indexable".to_string()),
                _ => Ok(()),
            },
        ));
        let objects = vec![
            SourceObject::new(1, json!({"ok": true})),
            SourceObject::new(2, Value::Null),
            SourceObject::new(3, json!({"ok": true})).with_subtype("draft"),
            SourceObject::new(4, json!({"ok": true})),
        ];

        let batch = serializer.serialize_batch(&post(), &objects);
        let ids: Vec<&str> = batch.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "4"]);
        assert_eq!(batch.skipped.len(), 2);
        assert_eq!(batch.skipped[0], SerializeError::MissingSource(2));
        assert!(matches!(batch.skipped[1], SerializeError::Stage { ref stage, id: 3, .. } if stage == "no_drafts"));
    }
}
