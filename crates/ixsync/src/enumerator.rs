//! 🚶 Enumerator: turns "where were we" into "here is the next page".
//!
//! The checkpoint remembers a cursor. This module turns that cursor (plus the run's
//! filters) into an `ObjectQuery`, asks the content source, and knows how to move the
//! cursor past what came back.
//!
//! 🧠 Two pagination strategies:
//! - `Offset`: skip N, take `per_page`. Default. Sensitive to rows vanishing behind you.
//! - `IdRange`: `id >= lower_bound_id`, ascending. Used when the indexable says it can.
//!   The lower bound only goes up, so deleted rows cannot shift the window.

use crate::checkpoint::SyncOptions;
use crate::common::SourceObject;
use crate::error::SyncError;
use crate::indexables::{ContentSource, Cursor, Indexable, IndexableDescriptor, ObjectQuery};

/// 🧭 Where a fresh walk of this indexable starts.
pub fn initial_cursor(descriptor: &IndexableDescriptor, options: &SyncOptions, start_offset: u64) -> Cursor {
    if descriptor.supports_range_pagination {
        Cursor::IdRange {
            lower_bound_id: options.lower_limit_object_id.unwrap_or(0),
            upper_bound_id: options.upper_limit_object_id,
        }
    } else {
        Cursor::Offset { offset: start_offset }
    }
}

/// 🔎 Build the query for one page.
pub fn build_query(cursor: Cursor, site_id: Option<u64>, options: &SyncOptions, per_page: usize) -> ObjectQuery {
    ObjectQuery {
        per_page,
        cursor,
        include: options.include.clone(),
        subtypes: options.post_type.clone(),
        site_id,
    }
}

/// 🔢 How many objects a walk starting at `cursor` would visit.
pub async fn count(
    indexable: &Indexable,
    site_id: Option<u64>,
    cursor: Cursor,
    options: &SyncOptions,
) -> Result<u64, SyncError> {
    if cursor == Cursor::Exhausted {
        return Ok(0);
    }
    let query = build_query(cursor, site_id, options, usize::MAX);
    indexable
        .source
        .count(&query)
        .await
        .map_err(|e| source_error(indexable, e))
}

/// 📄 Fetch the page at `cursor`. An empty page means the indexable is done.
pub async fn fetch_batch(
    indexable: &Indexable,
    site_id: Option<u64>,
    cursor: Cursor,
    options: &SyncOptions,
    per_page: usize,
) -> Result<Vec<SourceObject>, SyncError> {
    if cursor == Cursor::Exhausted {
        return Ok(Vec::new());
    }
    let query = build_query(cursor, site_id, options, per_page);
    let page = indexable
        .source
        .query(&query)
        .await
        .map_err(|e| source_error(indexable, e))?;
    Ok(page.objects)
}

/// ⏭️ Move the cursor past a fetched batch.
///
/// Offsets move by the number of objects fetched, regardless of how many were indexed.
/// Id ranges move to one past the largest id seen. Seeing `u64::MAX` ends the walk, since
/// there is no "one past" it.
pub fn advance(cursor: Cursor, batch: &[SourceObject]) -> Cursor {
    match cursor {
        Cursor::Offset { offset } => Cursor::Offset {
            offset: offset + batch.len() as u64,
        },
        Cursor::IdRange {
            lower_bound_id,
            upper_bound_id,
        } => {
            let Some(max_id) = batch.iter().map(|o| o.id).max() else {
                return cursor;
            };
            match max_id.checked_add(1) {
                Some(next) => Cursor::IdRange {
                    lower_bound_id: next.max(lower_bound_id),
                    upper_bound_id,
                },
                None => Cursor::Exhausted,
            }
        }
        Cursor::Exhausted => Cursor::Exhausted,
    }
}

fn source_error(indexable: &Indexable, err: anyhow::Error) -> SyncError {
    SyncError::Source {
        slug: indexable.slug().to_string(),
        // -- 🧵 alternate Display keeps the whole context chain on one line
        reason: format!("{err:#}"),
    }
}
