//! 📡 Bulk wire format: documents in, NDJSON out, and the verdict back in.
//!
//! 🎬 COLD OPEN. INT. ELASTICSEARCH CLUSTER, BULK ENDPOINT, HIGH NOON
//!
//! Rule 1: Two lines per document. Action metadata, then document source. Always.
//! Rule 2: Newline-delimited. Not comma-separated. Not XML. NEWLINES.
//! Rule 3: The trailing newline on the whole body matters. It MATTERS.
//!
//! The response side is the part people forget. A 200 from `_bulk` does not mean every
//! document landed. It means the cluster read your letter. The per-item verdicts live in
//! `items`, one per action, in request order.

use serde_json::{Map, Value, json};

use crate::common::Document;
use crate::engine::{BulkIndexResult, FailedItem};
use crate::error::EngineError;

/// 🔄 Render one `index` action pair. No trailing newline; `render_bulk_body` adds those.
pub fn render_action(index: &str, document: &Document) -> String {
    let action = json!({ "index": { "_index": index, "_id": document.id } });
    // -- 🎯 Value's Display is compact JSON, and the source line is already JSON text
    format!("{action}\n{}", document.source_buf)
}

/// 📦 Full `_bulk` body, trailing newline included.
pub fn render_bulk_body(index: &str, documents: &[Document]) -> String {
    let mut body = String::with_capacity(documents.iter().map(|d| d.len() + 64).sum());
    for document in documents {
        body.push_str(&render_action(index, document));
        body.push('\n');
    }
    body
}

/// 🔍 Read the `_bulk` response and split the batch into winners and casualties.
///
/// Items without an `_id` (some proxies strip it) fall back to the document at the same
/// position. An item with an `error` object or a status >= 300 counts as failed. The verdict
/// count must match the documents sent, otherwise some of them would vanish from the totals.
pub fn parse_bulk_response(body: &str, documents: &[Document]) -> Result<BulkIndexResult, EngineError> {
    let response: Value = serde_json::from_str(body)
        .map_err(|e| EngineError::MalformedResponse(format!("bulk response is not JSON: {e}")))?;
    let items = response
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| EngineError::MalformedResponse("bulk response has no 'items' array".to_string()))?;
    if items.len() != documents.len() {
        return Err(EngineError::MalformedResponse(format!(
            "bulk response has {} item verdicts for {} documents",
            items.len(),
            documents.len()
        )));
    }

    let mut result = BulkIndexResult::default();
    for (position, item) in items.iter().enumerate() {
        // -- 🎭 the action key could be index, create or update. We only need what is inside.
        let Some(outcome) = item.as_object().and_then(|o| o.values().next()) else {
            return Err(EngineError::MalformedResponse(format!(
                "bulk item {position} is not an action object"
            )));
        };

        let id = outcome
            .get("_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| documents.get(position).map(|d| d.id.clone()))
            .unwrap_or_else(|| format!("#{position}"));

        let status = outcome.get("status").and_then(Value::as_u64).unwrap_or(0);
        match outcome.get("error") {
            Some(error) if !error.is_null() => result.failed.push(FailedItem {
                id,
                reason: describe_item_error(error),
            }),
            _ if status >= 300 => result.failed.push(FailedItem {
                id,
                reason: format!("status {status}"),
            }),
            _ => result.succeeded_ids.push(id),
        }
    }
    Ok(result)
}

fn describe_item_error(error: &Value) -> String {
    match error {
        Value::Object(fields) => {
            let kind = text_field(fields, "type");
            let reason = text_field(fields, "reason");
            match (kind, reason) {
                (Some(kind), Some(reason)) => format!("{kind}: {reason}"),
                (Some(only), None) | (None, Some(only)) => only.to_string(),
                (None, None) => error.to_string(),
            }
        }
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn text_field<'a>(fields: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    fields.get(key).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, source: &str) -> Document {
        Document {
            id: id.to_string(),
            source_buf: source.to_string(),
        }
    }

    #[test]
    fn the_one_where_every_document_gets_its_sacred_pair_of_lines() {
        let body = render_bulk_body("wp-post-1", &[doc("1", r#"{"a":1}"#), doc("2", r#"{"b":2}"#)]);
        let lines: Vec<&str> = body.split_terminator('\n').collect();
        assert_eq!(lines.len(), 4);
        let action: Value = serde_json::from_str(lines[0]).expect("💀 action line is JSON");
        assert_eq!(action["index"]["_index"], "wp-post-1");
        assert_eq!(action["index"]["_id"], "1");
        assert_eq!(lines[1], r#"{"a":1}"#);
        assert!(body.ends_with('\n'), "the trailing newline MATTERS");
    }

    #[test]
    fn the_one_where_a_200_still_hides_casualties() -> Result<(), EngineError> {
        let documents = [doc("1", "{}"), doc("2", "{}"), doc("3", "{}")];
        let body = r#"{
            "took": 3, "errors": true,
            "items": [
                {"index": {"_id": "1", "status": 201}},
                {"index": {"_id": "2", "status": 400, "error": {"type": "mapper_parsing_exception", "reason": "failed to parse [date]"}}},
                {"create": {"status": 429}}
            ]
        }"#;
        let result = parse_bulk_response(body, &documents)?;
        assert_eq!(result.succeeded_ids, vec!["1".to_string()]);
        assert_eq!(result.failed.len(), 2);
        assert_eq!(result.failed[0].id, "2");
        assert_eq!(result.failed[0].reason, "mapper_parsing_exception: failed to parse [date]");
        assert_eq!(result.failed[1].id, "3", "missing _id falls back to request position");
        Ok(())
    }

    #[test]
    fn the_one_where_the_response_forgot_its_items() {
        let err = parse_bulk_response(r#"{"errors":false}"#, &[]).expect_err("💀 no items, no verdict");
        assert!(matches!(err, EngineError::MalformedResponse(_)));
        assert!(parse_bulk_response("<html>502</html>", &[]).is_err());
    }

    #[test]
    fn the_one_where_the_verdicts_come_up_short() {
        let documents = [doc("1", "{}"), doc("2", "{}"), doc("3", "{}")];
        let body = r#"{"errors": false, "items": [{"index": {"_id": "1", "status": 201}}]}"#;
        let err = parse_bulk_response(body, &documents).expect_err("💀 two documents have no verdict");
        match err {
            EngineError::MalformedResponse(reason) => assert!(reason.contains("1 item verdicts for 3 documents")),
            other => panic!("💀 expected MalformedResponse, got {other:?}"),
        }
    }
}
