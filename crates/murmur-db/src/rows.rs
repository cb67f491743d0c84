//! Column decoding helpers. Ids are stored as hyphenated TEXT, timestamps
//! as INTEGER milliseconds since the Unix epoch.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

fn conversion_failure(idx: usize, ty: Type, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, msg.into())
}

pub(crate) fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| conversion_failure(idx, Type::Text, format!("bad uuid '{}': {}", raw, e)))
}

pub(crate) fn opt_uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| conversion_failure(idx, Type::Text, format!("bad uuid '{}': {}", raw, e))),
        None => Ok(None),
    }
}

pub(crate) fn time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| conversion_failure(idx, Type::Integer, format!("bad timestamp {}", ms)))
}

pub(crate) fn opt_time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(ms) => DateTime::from_timestamp_millis(ms)
            .map(Some)
            .ok_or_else(|| conversion_failure(idx, Type::Integer, format!("bad timestamp {}", ms))),
        None => Ok(None),
    }
}

pub(crate) fn parsed_at<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_failure(idx, Type::Text, e))
}

pub(crate) fn millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}
