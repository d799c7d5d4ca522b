mod record;

use std::path::Path;

use anyhow::Context;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::FromRow;
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};

pub use record::{NewPlateRecord, PlateRecord, PlateRecordUpdate, PlateRepository};

const RECORD_COLUMNS: &str =
    "id, plate_number, timestamp, confidence_score, image_path, camera_location";

/// SQLite-backed store of plate sightings
#[derive(Debug, Clone)]
pub struct PlateDb {
    pool: SqlitePool,
}

#[derive(Debug, FromRow)]
struct PlateRow {
    id: i64,
    plate_number: String,
    timestamp: String,
    confidence_score: Option<f64>,
    image_path: Option<String>,
    camera_location: Option<String>,
}

impl TryFrom<PlateRow> for PlateRecord {
    type Error = anyhow::Error;

    fn try_from(row: PlateRow) -> Result<Self, Self::Error> {
        let timestamp = OffsetDateTime::parse(&row.timestamp, &Rfc3339)
            .with_context(|| format!("Invalid timestamp {:?} in record {}", row.timestamp, row.id))?;
        Ok(PlateRecord {
            id: row.id,
            plate_number: row.plate_number,
            timestamp,
            confidence_score: row.confidence_score,
            image_path: row.image_path,
            camera_location: row.camera_location,
        })
    }
}

/// Stored form of a timestamp: UTC, whole seconds, RFC 3339. Fixed width,
/// so text comparison in SQL follows time order.
fn to_db_timestamp(t: OffsetDateTime) -> anyhow::Result<String> {
    let t = t.to_offset(UtcOffset::UTC).replace_nanosecond(0)?;
    Ok(t.format(&Rfc3339)?)
}

fn into_records(rows: Vec<PlateRow>) -> anyhow::Result<Vec<PlateRecord>> {
    rows.into_iter().map(PlateRecord::try_from).collect()
}

impl PlateDb {
    /// Open (creating if missing) the database file and apply migrations
    pub async fn open<P: AsRef<Path>>(db_file: P) -> anyhow::Result<Self> {
        let db_file = db_file.as_ref();
        if let Some(parent) = db_file.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory {:?}", parent)
                })?;
            }
        }

        let connect_opts = SqliteConnectOptions::new()
            .filename(db_file)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_opts)
            .await
            .with_context(|| format!("Failed to open plate database {:?}", db_file))?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl PlateRepository for PlateDb {
    async fn insert_plate_record(&self, record: &NewPlateRecord) -> anyhow::Result<i64> {
        let timestamp = to_db_timestamp(record.recorded_at.unwrap_or_else(OffsetDateTime::now_utc))?;
        let id: i64 = sqlx::query_scalar(
            r#"INSERT INTO license_plates
                (plate_number, timestamp, confidence_score, image_path, camera_location)
            VALUES ($1, $2, $3, $4, $5) RETURNING id"#,
        )
        .bind(record.plate_number.to_uppercase())
        .bind(timestamp)
        .bind(record.confidence_score)
        .bind(record.image_path.as_deref())
        .bind(record.camera_location.as_deref())
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to insert plate {}", record.plate_number))?;
        Ok(id)
    }

    async fn get_record(&self, id: i64) -> anyhow::Result<Option<PlateRecord>> {
        let row: Option<PlateRow> = sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM license_plates WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(PlateRecord::try_from).transpose()
    }

    async fn recent_records(&self, limit: u32) -> anyhow::Result<Vec<PlateRecord>> {
        let rows: Vec<PlateRow> = sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM license_plates ORDER BY timestamp DESC, id DESC LIMIT $1"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        into_records(rows)
    }

    async fn search_plate(&self, plate_number: &str) -> anyhow::Result<Vec<PlateRecord>> {
        let rows: Vec<PlateRow> = sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM license_plates WHERE plate_number = $1 \
             ORDER BY timestamp DESC, id DESC"
        ))
        .bind(plate_number.to_uppercase())
        .fetch_all(&self.pool)
        .await?;
        into_records(rows)
    }

    async fn records_between(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> anyhow::Result<Vec<PlateRecord>> {
        let rows: Vec<PlateRow> = sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM license_plates WHERE timestamp >= $1 AND timestamp <= $2 \
             ORDER BY timestamp DESC, id DESC"
        ))
        .bind(to_db_timestamp(start)?)
        .bind(to_db_timestamp(end)?)
        .fetch_all(&self.pool)
        .await?;
        into_records(rows)
    }

    async fn unique_plate_count(&self) -> anyhow::Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT plate_number) FROM license_plates")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn update_record(&self, id: i64, update: &PlateRecordUpdate) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"UPDATE license_plates SET
                plate_number = COALESCE($1, plate_number),
                confidence_score = COALESCE($2, confidence_score),
                camera_location = COALESCE($3, camera_location)
            WHERE id = $4"#,
        )
        .bind(update.plate_number.as_ref().map(|p| p.to_uppercase()))
        .bind(update.confidence_score)
        .bind(update.camera_location.as_deref())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_record(&self, id: i64) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM license_plates WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
