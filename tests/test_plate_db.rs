mod common;

use common::*;
use platewatch::core::db::{NewPlateRecord, PlateRecordUpdate, PlateRepository};
use time::macros::datetime;
use time::Duration;

fn sighting(plate: &str, secs: i64) -> NewPlateRecord {
    NewPlateRecord {
        camera_location: Some("Main Entrance".into()),
        confidence_score: Some(0.8),
        recorded_at: Some(at_secs(1_700_000_000 + secs)),
        ..NewPlateRecord::new(plate)
    }
}

#[tokio::test]
async fn insert_and_get_record() {
    let (db, _dir) = create_test_db().await;

    let id = db
        .insert_plate_record(&NewPlateRecord {
            image_path: Some("frames/0001.png".into()),
            ..sighting("abc123", 0)
        })
        .await
        .unwrap();

    let record = db.get_record(id).await.unwrap().expect("record exists");
    assert_eq!(record.id, id);
    assert_eq!(record.plate_number, "ABC123");
    assert_eq!(record.timestamp, at_secs(1_700_000_000));
    assert_eq!(record.confidence_score, Some(0.8));
    assert_eq!(record.image_path.as_deref(), Some("frames/0001.png"));
    assert_eq!(record.camera_location.as_deref(), Some("Main Entrance"));

    assert!(db.get_record(id + 1).await.unwrap().is_none());
}

#[tokio::test]
async fn timestamps_are_stored_in_utc_whole_seconds() {
    let (db, _dir) = create_test_db().await;
    let local = datetime!(2025-03-01 14:30:15.750 +02:00);

    let id = db
        .insert_plate_record(&NewPlateRecord {
            recorded_at: Some(local),
            ..NewPlateRecord::new("XYZ789")
        })
        .await
        .unwrap();

    let record = db.get_record(id).await.unwrap().unwrap();
    assert_eq!(record.timestamp, datetime!(2025-03-01 12:30:15 UTC));
}

#[tokio::test]
async fn missing_time_uses_now() {
    let (db, _dir) = create_test_db().await;
    let before = time::OffsetDateTime::now_utc() - Duration::seconds(1);
    let id = db.insert_plate_record(&NewPlateRecord::new("NOW123")).await.unwrap();
    let record = db.get_record(id).await.unwrap().unwrap();
    assert!(record.timestamp >= before);
    assert!(record.camera_location.is_none());
}

#[tokio::test]
async fn recent_records_newest_first() {
    let (db, _dir) = create_test_db().await;
    for (i, plate) in ["AAA111", "BBB222", "CCC333", "DDD444"].iter().enumerate() {
        db.insert_plate_record(&sighting(plate, i as i64 * 10)).await.unwrap();
    }

    let recent = db.recent_records(3).await.unwrap();
    let plates: Vec<&str> = recent.iter().map(|r| r.plate_number.as_str()).collect();
    assert_eq!(plates, vec!["DDD444", "CCC333", "BBB222"]);
}

#[tokio::test]
async fn same_second_records_are_ordered_by_id() {
    let (db, _dir) = create_test_db().await;
    let first = db.insert_plate_record(&sighting("AAA111", 0)).await.unwrap();
    let second = db.insert_plate_record(&sighting("BBB222", 0)).await.unwrap();

    let recent = db.recent_records(10).await.unwrap();
    assert_eq!(recent[0].id, second);
    assert_eq!(recent[1].id, first);
}

#[tokio::test]
async fn search_is_case_insensitive_and_exact() {
    let (db, _dir) = create_test_db().await;
    db.insert_plate_record(&sighting("ABC123", 0)).await.unwrap();
    db.insert_plate_record(&sighting("ABC123", 60)).await.unwrap();
    db.insert_plate_record(&sighting("ABC1234", 30)).await.unwrap();

    let hits = db.search_plate("abc123").await.unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits[0].timestamp > hits[1].timestamp);
    assert!(db.search_plate("ZZZ999").await.unwrap().is_empty());
}

#[tokio::test]
async fn records_between_is_inclusive() {
    let (db, _dir) = create_test_db().await;
    for secs in [0, 10, 20, 30] {
        db.insert_plate_record(&sighting("ABC123", secs)).await.unwrap();
    }

    let start = at_secs(1_700_000_010);
    let end = at_secs(1_700_000_020);
    let found = db.records_between(start, end).await.unwrap();
    let times: Vec<_> = found.iter().map(|r| r.timestamp).collect();
    assert_eq!(times, vec![end, start]);
}

#[tokio::test]
async fn unique_plate_count_ignores_repeats() {
    let (db, _dir) = create_test_db().await;
    assert_eq!(db.unique_plate_count().await.unwrap(), 0);

    db.insert_plate_record(&sighting("ABC123", 0)).await.unwrap();
    db.insert_plate_record(&sighting("abc123", 40)).await.unwrap();
    db.insert_plate_record(&sighting("XYZ789", 80)).await.unwrap();
    assert_eq!(db.unique_plate_count().await.unwrap(), 2);
}

#[tokio::test]
async fn update_changes_only_given_fields() {
    let (db, _dir) = create_test_db().await;
    let id = db.insert_plate_record(&sighting("ABC128", 0)).await.unwrap();

    let updated = db
        .update_record(
            id,
            &PlateRecordUpdate {
                plate_number: Some("abc123".into()),
                ..PlateRecordUpdate::default()
            },
        )
        .await
        .unwrap();
    assert!(updated);

    let record = db.get_record(id).await.unwrap().unwrap();
    assert_eq!(record.plate_number, "ABC123");
    assert_eq!(record.confidence_score, Some(0.8));
    assert_eq!(record.camera_location.as_deref(), Some("Main Entrance"));

    let missing = db
        .update_record(id + 100, &PlateRecordUpdate::default())
        .await
        .unwrap();
    assert!(!missing);
}

#[tokio::test]
async fn delete_record_reports_whether_it_existed() {
    let (db, _dir) = create_test_db().await;
    let id = db.insert_plate_record(&sighting("ABC123", 0)).await.unwrap();

    assert!(db.delete_record(id).await.unwrap());
    assert!(!db.delete_record(id).await.unwrap());
    assert!(db.get_record(id).await.unwrap().is_none());
}

#[tokio::test]
async fn reopening_keeps_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("plates.db");

    let db = platewatch::core::db::PlateDb::open(&path).await.unwrap();
    db.insert_plate_record(&sighting("ABC123", 0)).await.unwrap();
    db.close().await;

    let db = platewatch::core::db::PlateDb::open(&path).await.unwrap();
    assert_eq!(db.search_plate("ABC123").await.unwrap().len(), 1);
}
