//! Record Codec Tests
//!
//! Tests verify:
//! - Encode/decode round trips for unlocked and locked records
//! - Absence detection (wrong field count, missing or malformed fields)
//! - Sentinel lock fields for unlocked records
//! - Session item ordering and typed accessors
//! - Pluggable item codecs

use chrono::{Duration as ChronoDuration, Utc};
use harbour_session::record::{
    decode, encode, timestamp_now, BincodeItemCodec, Fields, ItemCodec, SessionFlags,
    SessionItems, SessionRecord, FIELD_COUNT,
};
use harbour_session::{Result, SessionStoreError};

// =============================================================================
// Helper Functions
// =============================================================================

fn felix_items() -> SessionItems {
    let mut items = SessionItems::new();
    items.set_value("name", &"Felix".to_string()).unwrap();
    items.set_value("age", &1i32).unwrap();
    items
}

fn locked_record(lock_id: u32) -> SessionRecord {
    let mut record = SessionRecord::with_items(felix_items(), 80);
    record.locked = true;
    record.lock_id = lock_id;
    record.set_lock_date(timestamp_now() - ChronoDuration::minutes(5));
    record
}

fn encode_default(record: &SessionRecord) -> Fields {
    encode(record, &BincodeItemCodec).unwrap()
}

fn decode_default(fields: &Fields) -> Option<SessionRecord> {
    decode(fields, &BincodeItemCodec).unwrap()
}

// =============================================================================
// Round Trip Tests
// =============================================================================

#[test]
fn test_round_trip_unlocked_record() {
    let record = SessionRecord::with_items(felix_items(), 20);

    let decoded = decode_default(&encode_default(&record)).unwrap();

    assert_eq!(decoded, record);
}

#[test]
fn test_round_trip_locked_record() {
    let record = locked_record(999);

    let decoded = decode_default(&encode_default(&record)).unwrap();

    assert_eq!(decoded, record);
    assert!(decoded.locked);
    assert_eq!(decoded.lock_id, 999);
}

#[test]
fn test_round_trip_with_nanosecond_clock() {
    let mut record = SessionRecord::with_items(felix_items(), 20);
    record.set_created(Utc::now());
    record.locked = true;
    record.lock_id = 12;
    record.set_lock_date(Utc::now() + ChronoDuration::nanoseconds(999));

    let decoded = decode_default(&encode_default(&record)).unwrap();

    assert_eq!(decoded, record);
}

#[test]
fn test_timestamps_are_kept_at_microseconds() {
    let raw = Utc::now();
    let mut record = SessionRecord::new(20);

    record.set_created(raw);
    record.set_lock_date(raw);

    assert_eq!(record.created().timestamp_subsec_nanos() % 1_000, 0);
    assert_eq!(record.lock_date().timestamp_subsec_nanos() % 1_000, 0);
    assert_eq!(record.created().timestamp_micros(), raw.timestamp_micros());
}

#[test]
fn test_round_trip_every_flag() {
    for flags in [
        SessionFlags::None,
        SessionFlags::InitializeItem,
        SessionFlags::Abandoned,
    ] {
        let mut record = SessionRecord::new(5);
        record.flags = flags;

        let decoded = decode_default(&encode_default(&record)).unwrap();
        assert_eq!(decoded.flags, flags);
    }
}

#[test]
fn test_round_trip_empty_items() {
    let record = SessionRecord::uninitialized(555);

    let decoded = decode_default(&encode_default(&record)).unwrap();

    assert!(decoded.items.is_empty());
    assert_eq!(decoded.timeout_minutes, 555);
    assert_eq!(decoded.flags, SessionFlags::InitializeItem);
}

#[test]
fn test_encode_writes_seven_fields() {
    let fields = encode_default(&locked_record(1));

    assert_eq!(fields.len(), FIELD_COUNT);
    for name in ["created", "locked", "lockId", "lockDate", "timeout", "flags", "items"] {
        assert!(fields.contains_key(name), "missing field {}", name);
    }
}

#[test]
fn test_fixed_width_fields() {
    let fields = encode_default(&locked_record(3));

    assert_eq!(fields["created"].len(), 8);
    assert_eq!(fields["locked"], vec![1u8]);
    assert_eq!(fields["lockId"], 3u32.to_ne_bytes().to_vec());
    assert_eq!(fields["lockDate"].len(), 8);
    assert_eq!(fields["timeout"], 80u32.to_ne_bytes().to_vec());
    assert_eq!(fields["flags"], 0u32.to_ne_bytes().to_vec());
}

// =============================================================================
// Absence Detection Tests
// =============================================================================

#[test]
fn test_empty_mapping_is_absent() {
    assert!(decode_default(&Fields::new()).is_none());
}

#[test]
fn test_missing_field_is_absent() {
    let mut fields = encode_default(&SessionRecord::new(20));
    fields.remove("flags");

    assert_eq!(fields.len(), 6);
    assert!(decode_default(&fields).is_none());
}

#[test]
fn test_extra_field_is_absent() {
    let mut fields = encode_default(&SessionRecord::new(20));
    fields.insert("unexpected".to_string(), vec![1]);

    assert_eq!(fields.len(), 8);
    assert!(decode_default(&fields).is_none());
}

#[test]
fn test_renamed_field_is_absent() {
    let mut fields = encode_default(&SessionRecord::new(20));
    let flags = fields.remove("flags").unwrap();
    fields.insert("flagz".to_string(), flags);

    assert_eq!(fields.len(), FIELD_COUNT);
    assert!(decode_default(&fields).is_none());
}

#[test]
fn test_unknown_flag_value_is_absent() {
    let mut fields = encode_default(&SessionRecord::new(20));
    fields.insert("flags".to_string(), 42u32.to_ne_bytes().to_vec());

    assert!(decode_default(&fields).is_none());
}

#[test]
fn test_invalid_locked_byte_is_absent() {
    let mut fields = encode_default(&SessionRecord::new(20));
    fields.insert("locked".to_string(), vec![7]);

    assert!(decode_default(&fields).is_none());
}

#[test]
fn test_truncated_lock_id_is_absent() {
    let mut fields = encode_default(&locked_record(5));
    fields.insert("lockId".to_string(), vec![5, 0]);

    assert!(decode_default(&fields).is_none());
}

// =============================================================================
// Sentinel Tests
// =============================================================================

#[test]
fn test_unlocked_record_decodes_sentinels() {
    let fields = encode_default(&SessionRecord::new(20));

    let decoded = decode_default(&fields).unwrap();

    assert!(!decoded.locked);
    assert_eq!(decoded.lock_id, 0);
    assert_eq!(decoded.lock_date(), SessionRecord::NO_LOCK_DATE);
    assert!(decoded.lock_info().is_none());
}

#[test]
fn test_unlocked_record_ignores_leftover_lock_fields() {
    let mut fields = encode_default(&SessionRecord::new(20));
    fields.insert("lockId".to_string(), 77u32.to_ne_bytes().to_vec());
    fields.insert(
        "lockDate".to_string(),
        Utc::now().timestamp_micros().to_ne_bytes().to_vec(),
    );

    let decoded = decode_default(&fields).unwrap();

    assert_eq!(decoded.lock_id, 0);
    assert_eq!(decoded.lock_date(), SessionRecord::NO_LOCK_DATE);
}

#[test]
fn test_encode_drops_lock_data_of_unlocked_record() {
    let mut record = SessionRecord::new(20);
    record.lock_id = 12;
    record.set_lock_date(timestamp_now());

    let fields = encode_default(&record);

    assert!(fields["lockId"].is_empty());
    assert!(fields["lockDate"].is_empty());
}

// =============================================================================
// Item Tests
// =============================================================================

#[test]
fn test_items_typed_values() {
    let items = felix_items();

    assert_eq!(items.value::<String>("name").unwrap(), Some("Felix".to_string()));
    assert_eq!(items.value::<i32>("age").unwrap(), Some(1));
    assert_eq!(items.value::<i32>("missing").unwrap(), None);
}

#[test]
fn test_items_keep_insertion_order() {
    let mut items = SessionItems::new();
    items.insert("zeta", b"1".to_vec());
    items.insert("alpha", b"2".to_vec());
    items.insert("mid", b"3".to_vec());

    // Replacing keeps the original position
    let previous = items.insert("zeta", b"4".to_vec());

    assert_eq!(previous.as_deref(), Some(&b"1"[..]));
    assert_eq!(items.keys().collect::<Vec<_>>(), vec!["zeta", "alpha", "mid"]);
    assert_eq!(items.get("zeta").map(|v| &v[..]), Some(&b"4"[..]));
}

#[test]
fn test_items_remove() {
    let mut items = felix_items();

    assert!(items.remove("name").is_some());
    assert!(items.remove("name").is_none());
    assert_eq!(items.len(), 1);
}

#[test]
fn test_item_order_survives_round_trip() {
    let items: SessionItems = [("b", b"2".to_vec()), ("a", b"1".to_vec())]
        .into_iter()
        .collect();
    let record = SessionRecord::with_items(items, 10);

    let decoded = decode_default(&encode_default(&record)).unwrap();

    assert_eq!(decoded.items.keys().collect::<Vec<_>>(), vec!["b", "a"]);
}

// =============================================================================
// Item Codec Tests
// =============================================================================

/// Codec that refuses every payload
struct RejectingCodec;

impl ItemCodec for RejectingCodec {
    fn encode(&self, _items: &SessionItems) -> Result<Vec<u8>> {
        Ok(vec![0xde, 0xad])
    }

    fn decode(&self, _bytes: &[u8]) -> Result<SessionItems> {
        Err(SessionStoreError::Codec("unreadable payload".to_string()))
    }
}

#[test]
fn test_item_codec_error_is_propagated() {
    let fields = encode(&SessionRecord::with_items(felix_items(), 20), &RejectingCodec).unwrap();

    let result = decode(&fields, &RejectingCodec);

    assert!(matches!(result, Err(SessionStoreError::Codec(_))));
}

#[test]
fn test_empty_items_blob_skips_item_codec() {
    let mut fields = encode_default(&SessionRecord::new(20));
    fields.insert("items".to_string(), Vec::new());

    let decoded = decode(&fields, &RejectingCodec).unwrap().unwrap();

    assert!(decoded.items.is_empty());
}

#[test]
fn test_garbage_items_blob_is_codec_error() {
    let mut fields = encode_default(&SessionRecord::new(20));
    fields.insert("items".to_string(), vec![0xff; 3]);

    assert!(matches!(
        decode(&fields, &BincodeItemCodec),
        Err(SessionStoreError::Codec(_))
    ));
}
