use std::time::Instant;

use rusqlite::{params_from_iter, Connection, OptionalExtension};

use crate::db::{CompositeKey, IndexName, KeyRange};

fn key_scan_sql(index: IndexName, condition: &str, reverse: bool) -> String {
    format!(
        "SELECT {} FROM feed_items WHERE {condition} ORDER BY {}",
        index.columns().join(", "),
        index.order_by(reverse)
    )
}

/// Walks `index` over `range` and records the key of every `page_size`-th
/// row, starting with the first one, until the range ends or `max_anchors`
/// keys are collected. Anchors sit at ordinals `0, S, 2S, …` counted from the
/// start of the walk, so consecutive anchors bound windows of `page_size`
/// rows (the last window may be shorter).
///
/// Only index columns are read, so the walk stays inside the covering index.
/// An inverted range, a zero page size or a zero cap yields no anchors.
pub fn scan_anchors(
    conn: &Connection,
    index: IndexName,
    range: &KeyRange,
    reverse: bool,
    page_size: usize,
    max_anchors: usize,
) -> rusqlite::Result<Vec<CompositeKey>> {
    if !range.is_valid() || page_size == 0 || max_anchors == 0 {
        return Ok(Vec::new());
    }
    let started = Instant::now();

    let (condition, params) = range.sql_condition(index);
    let mut stmt = conn.prepare_cached(&key_scan_sql(index, &condition, reverse))?;
    let mut rows = stmt.query(params_from_iter(params))?;

    let mut anchors = Vec::new();
    let mut position = 0usize;
    while let Some(row) = rows.next()? {
        if position % page_size == 0 {
            anchors.push(index.key_from_row(row)?);
            if anchors.len() >= max_anchors {
                break;
            }
        }
        position += 1;
    }

    tracing::debug!(
        "paging {:?} between {} and {} reverse={}: {} anchors in {:.2?}",
        index,
        range.lower,
        range.upper,
        reverse,
        anchors.len(),
        started.elapsed()
    );
    Ok(anchors)
}

/// The first key of `range` in walk order, i.e. its lowest key, or its
/// highest with `reverse`.
pub fn first_key(
    conn: &Connection,
    index: IndexName,
    range: &KeyRange,
    reverse: bool,
) -> rusqlite::Result<Option<CompositeKey>> {
    if !range.is_valid() {
        return Ok(None);
    }
    let (condition, params) = range.sql_condition(index);
    let sql = format!("{} LIMIT 1", key_scan_sql(index, &condition, reverse));
    conn.query_row(&sql, params_from_iter(params), |row| index.key_from_row(row))
        .optional()
}
