//! Behavior-driven tests for the dataset cache
//!
//! These tests verify HOW cached entries are served, expired, migrated and
//! protected against concurrent writers.

use std::fs;
use std::sync::Arc;
use std::thread;

use ferroscreen_core::{CacheStore, DatasetKind, StockRecord};
use serde_json::{json, Value};
use time::{Duration as TimeDuration, OffsetDateTime};

fn records(codes: &[&str]) -> Vec<StockRecord> {
    codes
        .iter()
        .map(|code| StockRecord::from_value(json!({"stockCode": code, "pe_ttm": 12.5})).expect("object"))
        .collect()
}

fn metrics(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| (*name).to_owned()).collect()
}

fn store() -> (tempfile::TempDir, CacheStore) {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = CacheStore::new(temp.path().join("cache"));
    (temp, store)
}

// =============================================================================
// Cache: Hits and Misses
// =============================================================================

#[test]
fn when_cached_metrics_cover_the_request_the_entry_is_served() {
    // Given: An entry saved with three metrics
    let (_temp, store) = store();
    store
        .put(
            DatasetKind::Fundamental,
            "2030-03-15",
            &records(&["00700", "00005"]),
            &metrics(&["pe_ttm", "pb", "mc"]),
            3,
        )
        .expect("put");

    // When: A subset of the metrics is requested
    let hit = store.get(DatasetKind::Fundamental, "2030-03-15", &metrics(&["mc", "pe_ttm"]));

    // Then: The stored records come back unchanged
    assert_eq!(hit, Some(records(&["00700", "00005"])));
}

#[test]
fn when_request_needs_a_metric_the_entry_lacks_it_is_a_miss() {
    // Given: An entry saved with pe_ttm only
    let (_temp, store) = store();
    store
        .put(DatasetKind::Fundamental, "2030-03-15", &records(&["00700"]), &metrics(&["pe_ttm"]), 3)
        .expect("put");

    // When / Then: Asking for pe_ttm and dyr misses
    assert_eq!(
        store.get(DatasetKind::Fundamental, "2030-03-15", &metrics(&["pe_ttm", "dyr"])),
        None
    );
    // And a different date misses too
    assert_eq!(
        store.get(DatasetKind::Fundamental, "2030-03-16", &metrics(&["pe_ttm"])),
        None
    );
}

#[test]
fn when_entry_has_expired_it_is_a_miss() {
    // Given: An entry saved now with a three-day lifetime
    let (_temp, store) = store();
    let saved = OffsetDateTime::now_utc();
    store
        .put_at(
            DatasetKind::Fundamental,
            "2030-03-15",
            &records(&["00700"]),
            &metrics(&["pe_ttm"]),
            3,
            saved,
        )
        .expect("put");

    // When / Then: It is served two days later but not four days later
    let two_days = saved + TimeDuration::days(2);
    let four_days = saved + TimeDuration::days(4);
    assert!(store
        .get_at(DatasetKind::Fundamental, "2030-03-15", &metrics(&["pe_ttm"]), two_days)
        .is_some());
    assert!(store
        .get_at(DatasetKind::Fundamental, "2030-03-15", &metrics(&["pe_ttm"]), four_days)
        .is_none());
}

#[test]
fn when_lifetime_is_zero_days_the_entry_is_never_served() {
    let (_temp, store) = store();
    store
        .put(DatasetKind::Fundamental, "2030-03-15", &records(&["00700"]), &metrics(&["pe_ttm"]), 0)
        .expect("put");

    assert_eq!(
        store.get(DatasetKind::Fundamental, "2030-03-15", &metrics(&["pe_ttm"])),
        None
    );
}

#[test]
fn namespaces_do_not_share_entries() {
    // Given: A fundamental entry
    let (_temp, store) = store();
    store
        .put(DatasetKind::Fundamental, "2030-03-15", &records(&["00700"]), &metrics(&["pe_ttm"]), 3)
        .expect("put");

    // When / Then: The financial statement namespace has nothing for that date
    assert_eq!(
        store.get(DatasetKind::FinancialStatement, "2030-03-15", &metrics(&["pe_ttm"])),
        None
    );
    assert!(store.path_for(DatasetKind::Fundamental).exists());
    assert!(!store.path_for(DatasetKind::FinancialStatement).exists());
}

// =============================================================================
// Cache: Expiry Sweeps
// =============================================================================

#[test]
fn reading_sweeps_expired_entries_from_the_file() {
    // Given: One short-lived and one long-lived entry
    let (_temp, store) = store();
    let start = OffsetDateTime::now_utc();
    store
        .put_at(DatasetKind::Fundamental, "2030-01-01", &records(&["00700"]), &metrics(&["pe_ttm"]), 1, start)
        .expect("short-lived put");
    store
        .put_at(DatasetKind::Fundamental, "2030-01-03", &records(&["00005"]), &metrics(&["pe_ttm"]), 10, start)
        .expect("long-lived put");

    // When: A different date is looked up two days later
    let hit = store.get_at(
        DatasetKind::Fundamental,
        "2030-01-02",
        &metrics(&["pe_ttm"]),
        start + TimeDuration::days(2),
    );

    // Then: The lookup misses and the expired date is gone from disk
    assert_eq!(hit, None);
    let raw: Value = serde_json::from_str(
        &fs::read_to_string(store.path_for(DatasetKind::Fundamental)).expect("read"),
    )
    .expect("json");
    let dates: Vec<&String> = raw.as_object().expect("object").keys().collect();
    assert_eq!(dates, vec!["2030-01-03"]);
}

#[test]
fn writes_sweep_entries_that_have_expired() {
    // Given: An entry with a one-day lifetime
    let (_temp, store) = store();
    let start = OffsetDateTime::now_utc();
    store
        .put_at(DatasetKind::Fundamental, "2030-03-14", &records(&["00700"]), &metrics(&["pe_ttm"]), 1, start)
        .expect("first put");

    // When: Another date is written two days later
    store
        .put_at(
            DatasetKind::Fundamental,
            "2030-03-15",
            &records(&["00005"]),
            &metrics(&["pe_ttm"]),
            3,
            start + TimeDuration::days(2),
        )
        .expect("second put");

    // Then: Only the fresh entry remains on disk
    let entries = store.entries(DatasetKind::Fundamental);
    assert_eq!(entries.keys().collect::<Vec<_>>(), vec!["2030-03-15"]);
}

#[test]
fn prune_reports_how_many_entries_it_removed() {
    let (_temp, store) = store();
    let start = OffsetDateTime::now_utc();
    for (date, days) in [("2030-03-13", 1), ("2030-03-14", 1), ("2030-03-15", 10)] {
        store
            .put_at(DatasetKind::FinancialStatement, date, &records(&["00700"]), &metrics(&["q.ps.np.t"]), days, start)
            .expect("put");
    }

    let removed = store
        .prune_at(DatasetKind::FinancialStatement, start + TimeDuration::days(2))
        .expect("prune");

    assert_eq!(removed, 2);
    assert_eq!(store.entries(DatasetKind::FinancialStatement).len(), 1);
}

#[test]
fn stored_entry_records_expiry_metrics_and_save_time() {
    // Given: A saved entry
    let (_temp, store) = store();
    store
        .put(DatasetKind::Fundamental, "2030-03-15", &records(&["00700"]), &metrics(&["pe_ttm", "mc"]), 3)
        .expect("put");

    // When: The file is read back raw
    let raw: Value = serde_json::from_str(
        &fs::read_to_string(store.path_for(DatasetKind::Fundamental)).expect("read"),
    )
    .expect("json");

    // Then: The entry has the documented shape
    let entry = &raw["2030-03-15"];
    assert_eq!(entry["metricsList"], json!(["pe_ttm", "mc"]));
    assert!(entry["expireAt"].as_f64().expect("numeric expiry") > 0.0);
    assert_eq!(entry["savedAt"].as_str().expect("timestamp").len(), 19);
    assert_eq!(entry["data"][0]["stockCode"], json!("00700"));
}

// =============================================================================
// Cache: Migration and Damage
// =============================================================================

#[test]
fn legacy_entries_are_never_served_and_are_swept_by_the_next_read() {
    // Given: A cache file written by an older format without expiry or metrics
    let (_temp, store) = store();
    fs::create_dir_all(store.dir()).expect("dir");
    fs::write(
        store.path_for(DatasetKind::Fundamental),
        json!({
            "2030-03-10": {"data": [{"stockCode": "00700", "pe_ttm": 9}]},
            "2030-03-11": [{"stockCode": "00005"}],
        })
        .to_string(),
    )
    .expect("seed legacy file");

    // And: The migrated view keeps the records but with no coverage
    let entries = store.entries(DatasetKind::Fundamental);
    assert!(entries["2030-03-10"].metrics_list.is_empty());
    assert_eq!(entries["2030-03-11"].data.len(), 1);

    // When: The legacy date is requested
    let hit = store.get(DatasetKind::Fundamental, "2030-03-10", &metrics(&["pe_ttm"]));

    // Then: It is a miss and both legacy dates are removed from the file
    assert_eq!(hit, None);
    assert!(store.entries(DatasetKind::Fundamental).is_empty());
}

#[test]
fn corrupt_cache_file_reads_as_empty_and_is_replaced_on_write() {
    // Given: A truncated cache file
    let (_temp, store) = store();
    fs::create_dir_all(store.dir()).expect("dir");
    fs::write(store.path_for(DatasetKind::Fundamental), "{\"2030-03-15\": {\"data\": [").expect("seed");

    // When / Then: Reads miss and writes succeed
    assert_eq!(
        store.get(DatasetKind::Fundamental, "2030-03-15", &metrics(&["pe_ttm"])),
        None
    );
    store
        .put(DatasetKind::Fundamental, "2030-03-15", &records(&["00700"]), &metrics(&["pe_ttm"]), 3)
        .expect("put over corrupt file");
    assert!(store
        .get(DatasetKind::Fundamental, "2030-03-15", &metrics(&["pe_ttm"]))
        .is_some());
}

// =============================================================================
// Cache: Concurrent Writers
// =============================================================================

#[test]
fn concurrent_writers_to_one_namespace_lose_no_entries() {
    // Given: One store shared by eight threads
    let (_temp, store) = store();
    let store = Arc::new(store);

    // When: Each thread writes its own date
    let handles: Vec<_> = (0..8)
        .map(|day| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                store
                    .put(
                        DatasetKind::Fundamental,
                        &format!("2030-03-{:02}", day + 1),
                        &records(&["00700"]),
                        &metrics(&["pe_ttm"]),
                        3,
                    )
                    .expect("put");
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer thread");
    }

    // Then: Every date survived and no temporary file was left behind
    assert_eq!(store.entries(DatasetKind::Fundamental).len(), 8);
    let leftovers: Vec<_> = fs::read_dir(store.dir())
        .expect("list cache dir")
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
}
