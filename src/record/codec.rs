//! Record codec
//!
//! Converts a [`SessionRecord`] to/from the named binary fields of one
//! backend hash entry.
//!
//! ## Wire Format
//! ```text
//! ┌───────────┬──────────────────────────────────────────────┐
//! │ created   │ i64 µs since epoch (8, native endian)        │
//! │ locked    │ 0x00 / 0x01 (1)                              │
//! │ lockId    │ u32 (4) when locked, zero-length otherwise   │
//! │ lockDate  │ i64 µs (8) when locked, zero-length otherwise│
//! │ timeout   │ u32 minutes (4)                              │
//! │ flags     │ u32 (4)                                      │
//! │ items     │ opaque blob from the ItemCodec               │
//! └───────────┴──────────────────────────────────────────────┘
//! ```
//!
//! Integers use the host byte order. This is an internal format shared by
//! servers of one fleet, not an interchange format.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::error::Result;

use super::{ItemCodec, SessionFlags, SessionItems, SessionRecord};

/// Raw hash fields as stored in the backend
pub type Fields = HashMap<String, Vec<u8>>;

/// A complete record has exactly this many fields
pub const FIELD_COUNT: usize = 7;

const CREATED: &str = "created";
const LOCKED: &str = "locked";
const LOCK_ID: &str = "lockId";
const LOCK_DATE: &str = "lockDate";
const TIMEOUT: &str = "timeout";
const FLAGS: &str = "flags";
const ITEMS: &str = "items";

// =============================================================================
// Encoding
// =============================================================================

/// Encode a record into its seven named fields
pub fn encode(record: &SessionRecord, item_codec: &dyn ItemCodec) -> Result<Fields> {
    let mut fields = Fields::with_capacity(FIELD_COUNT);

    fields.insert(CREATED.to_string(), encode_timestamp(&record.created));
    fields.insert(LOCKED.to_string(), vec![record.locked as u8]);

    // Lock fields only carry data while the lock is held
    if record.locked {
        fields.insert(LOCK_ID.to_string(), record.lock_id.to_ne_bytes().to_vec());
        fields.insert(LOCK_DATE.to_string(), encode_timestamp(&record.lock_date));
    } else {
        fields.insert(LOCK_ID.to_string(), Vec::new());
        fields.insert(LOCK_DATE.to_string(), Vec::new());
    }

    fields.insert(
        TIMEOUT.to_string(),
        record.timeout_minutes.to_ne_bytes().to_vec(),
    );
    fields.insert(FLAGS.to_string(), (record.flags as u32).to_ne_bytes().to_vec());
    fields.insert(ITEMS.to_string(), item_codec.encode(&record.items)?);

    Ok(fields)
}

fn encode_timestamp(ts: &DateTime<Utc>) -> Vec<u8> {
    ts.timestamp_micros().to_ne_bytes().to_vec()
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode a record from its raw fields
///
/// Returns:
/// - `Ok(Some(record))`: all seven fields present and well formed
/// - `Ok(None)`: entry missing, incomplete or malformed (treated as absent)
/// - `Err(_)`: the item codec rejected the payload blob
pub fn decode(fields: &Fields, item_codec: &dyn ItemCodec) -> Result<Option<SessionRecord>> {
    if fields.len() != FIELD_COUNT {
        return Ok(None);
    }

    let Some(header) = decode_header(fields) else {
        return Ok(None);
    };

    let items = match fields.get(ITEMS) {
        Some(blob) if blob.is_empty() => SessionItems::new(),
        Some(blob) => item_codec.decode(blob)?,
        None => return Ok(None),
    };

    Ok(Some(SessionRecord { items, ..header }))
}

/// Everything except the payload; `None` on any malformed field
fn decode_header(fields: &Fields) -> Option<SessionRecord> {
    let created = decode_timestamp(fields.get(CREATED)?)?;
    let locked = match fields.get(LOCKED)?.as_slice() {
        [0] => false,
        [1] => true,
        _ => return None,
    };

    let lock_id = match fields.get(LOCK_ID)?.as_slice() {
        [] => SessionRecord::NO_LOCK_ID,
        raw => u32::from_ne_bytes(raw.try_into().ok()?),
    };
    let lock_date = match fields.get(LOCK_DATE)?.as_slice() {
        [] => SessionRecord::NO_LOCK_DATE,
        raw => decode_timestamp(raw)?,
    };

    let timeout_minutes = u32::from_ne_bytes(fields.get(TIMEOUT)?.as_slice().try_into().ok()?);
    let flags = SessionFlags::from_u32(u32::from_ne_bytes(
        fields.get(FLAGS)?.as_slice().try_into().ok()?,
    ))?;

    let mut record = SessionRecord {
        created,
        locked,
        lock_id,
        lock_date,
        timeout_minutes,
        items: SessionItems::new(),
        flags,
    };

    // Stale lock data on an unlocked record is meaningless
    if !record.locked {
        record.clear_lock();
    }

    Some(record)
}

fn decode_timestamp(raw: &[u8]) -> Option<DateTime<Utc>> {
    let micros = i64::from_ne_bytes(raw.try_into().ok()?);
    DateTime::<Utc>::from_timestamp_micros(micros)
}
