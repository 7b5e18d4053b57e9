//! 📂 An NDJSON export on disk, read once and served like the in-memory source.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace};

use crate::common::{ObjectPage, SourceObject};
use crate::indexables::in_mem::InMemorySource;
use crate::indexables::{ContentSource, ObjectQuery};

// -- 📂 FileSourceConfig: an NDJSON export of the content system, one object per line.
// -- Config lives next to the source that uses it. No scavenger hunts at 2am.
#[derive(Debug, Deserialize, Clone)]
pub struct FileSourceConfig {
    pub file_name: String,
    /// 🔢 Field holding the numeric object id. Numbers or numeric strings both work.
    #[serde(default = "default_id_field")]
    pub id_field: String,
    /// 🏷️ Field holding the sub-type (post type, taxonomy...).
    #[serde(default = "default_subtype_field")]
    pub subtype_field: String,
    /// 🏘️ Field holding the owning site id, for multi-site exports.
    #[serde(default = "default_site_field")]
    pub site_field: String,
}

fn default_id_field() -> String {
    "id".to_string()
}

fn default_subtype_field() -> String {
    "post_type".to_string()
}

fn default_site_field() -> String {
    "site_id".to_string()
}

impl FileSourceConfig {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            id_field: default_id_field(),
            subtype_field: default_subtype_field(),
            site_field: default_site_field(),
        }
    }
}

/// 📂 FileSource: reads an NDJSON export once at open, then serves pages from memory.
///
/// Think of it as an in-memory source that did its homework first. The file is split on
/// newlines with `memchr` (SIMD, because we have standards), every line is parsed, and the
/// objects go into an id-sorted map. After that, paging is the in-memory story.
///
/// ⚠️ A line without a usable id is a broken export, not a skippable object. We bail with
/// the line number so you can go yell at whoever produced the file.
#[derive(Debug, Clone)]
pub struct FileSource {
    config: FileSourceConfig,
    inner: InMemorySource,
}

impl FileSource {
    /// 🚀 Open + parse the whole file.
    pub async fn open(config: FileSourceConfig) -> Result<Self> {
        let bytes = tokio::fs::read(&config.file_name).await.context(format!(
            "💀 The door to '{}' would not budge. We checked if it existed (it might not). \
             We checked permissions (they might be wrong). The file remains unopened.",
            config.file_name
        ))?;

        let objects = parse_ndjson(&bytes, &config)?;
        debug!(
            "📖 loaded {} objects from '{}' like a digital fishing trip, catch of the day",
            objects.len(),
            config.file_name
        );
        Ok(Self {
            inner: InMemorySource::from_objects(objects),
            config,
        })
    }

    pub fn config(&self) -> &FileSourceConfig {
        &self.config
    }
}

/// 🔪 Split on `\n`, parse each non-empty line into a `SourceObject`.
fn parse_ndjson(bytes: &[u8], config: &FileSourceConfig) -> Result<Vec<SourceObject>> {
    let mut objects = Vec::new();
    let mut line_start = 0usize;
    let mut line_number = 0usize;

    // -- 🧮 chain a virtual newline at EOF so the last line without '\n' still counts
    let newline_positions = memchr::memchr_iter(b'\n', bytes).chain(std::iter::once(bytes.len()));
    for line_end in newline_positions {
        line_number += 1;
        let raw_line = &bytes[line_start..line_end];
        line_start = line_end + 1;

        let line = std::str::from_utf8(raw_line)
            .context(format!("💀 line {line_number} is not valid UTF-8"))?
            .trim_end_matches('\r')
            .trim();
        if line.is_empty() {
            continue;
        }

        let fields: Value = serde_json::from_str(line)
            .context(format!("💀 line {line_number} is not valid JSON"))?;
        objects.push(object_from_fields(fields, config, line_number)?);
    }

    trace!("🔪 parsed {} lines", line_number);
    Ok(objects)
}

fn object_from_fields(fields: Value, config: &FileSourceConfig, line_number: usize) -> Result<SourceObject> {
    let id = match fields.get(&config.id_field) {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.parse::<u64>().ok(),
        _ => None,
    };
    let Some(id) = id else {
        bail!(
            "💀 line {line_number} has no usable '{}' field. Every object needs a positive integer id",
            config.id_field
        );
    };
    let subtype = fields
        .get(&config.subtype_field)
        .and_then(Value::as_str)
        .map(str::to_string);
    let site_id = fields.get(&config.site_field).and_then(Value::as_u64);

    Ok(SourceObject {
        id,
        subtype,
        site_id,
        fields,
    })
}

#[async_trait]
impl ContentSource for FileSource {
    async fn query(&self, query: &ObjectQuery) -> Result<ObjectPage> {
        self.inner.query(query).await
    }

    async fn count(&self, query: &ObjectQuery) -> Result<u64> {
        self.inner.count(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexables::Cursor;
    use std::io::Write;

    fn write_export(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("💀 temp file should exist");
        file.write_all(contents.as_bytes())
            .expect("💀 the filesystem said 'new phone who dis'");
        file
    }

    #[tokio::test]
    async fn the_one_where_an_export_becomes_sorted_objects() -> Result<()> {
        let file = write_export(concat!(
            "{\"id\":3,\"post_type\":\"page\",\"post_title\":\"c\"}\n",
            "\n",
            "{\"id\":\"1\",\"post_type\":\"post\",\"site_id\":2}\r\n",
            "{\"id\":2,\"post_type\":\"post\"}"
        ));
        let source =
            FileSource::open(FileSourceConfig::new(file.path().display().to_string())).await?;

        let page = source
            .query(&ObjectQuery {
                per_page: 10,
                cursor: Cursor::Offset { offset: 0 },
                include: vec![],
                subtypes: vec!["post".into()],
                site_id: None,
            })
            .await?;
        let ids: Vec<u64> = page.objects.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(page.objects[0].site_id, Some(2));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_line_without_an_id_is_called_out_by_number() {
        let file = write_export("{\"id\":1}\n{\"post_title\":\"who am i\"}\n");
        let err = FileSource::open(FileSourceConfig::new(file.path().display().to_string()))
            .await
            .expect_err("💀 a line without an id should be rejected");
        assert!(err.to_string().contains("line 2"));
    }

    #[tokio::test]
    async fn the_one_where_the_file_does_not_exist() {
        let result = FileSource::open(FileSourceConfig::new("/definitely/not/here.ndjson")).await;
        assert!(result.is_err());
    }
}
