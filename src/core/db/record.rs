use time::OffsetDateTime;

#[derive(Debug, Clone)]
pub struct PlateRecord {
    pub id: i64,
    pub plate_number: String,
    pub timestamp: OffsetDateTime,
    pub confidence_score: Option<f64>,
    pub image_path: Option<String>,
    pub camera_location: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewPlateRecord {
    pub plate_number: String,
    pub confidence_score: Option<f64>,
    pub image_path: Option<String>,
    pub camera_location: Option<String>,
    /// Time of the sighting; the store uses the current time when absent
    pub recorded_at: Option<OffsetDateTime>,
}

impl NewPlateRecord {
    pub fn new(plate_number: impl Into<String>) -> Self {
        Self {
            plate_number: plate_number.into(),
            confidence_score: None,
            image_path: None,
            camera_location: None,
            recorded_at: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlateRecordUpdate {
    pub plate_number: Option<String>,
    pub confidence_score: Option<f64>,
    pub camera_location: Option<String>,
}

pub trait PlateRepository {
    fn insert_plate_record(&self, record: &NewPlateRecord) -> impl Future<Output = anyhow::Result<i64>>;
    fn get_record(&self, id: i64) -> impl Future<Output = anyhow::Result<Option<PlateRecord>>>;
    fn recent_records(&self, limit: u32) -> impl Future<Output = anyhow::Result<Vec<PlateRecord>>>;
    fn search_plate(&self, plate_number: &str) -> impl Future<Output = anyhow::Result<Vec<PlateRecord>>>;
    fn records_between(&self, start: OffsetDateTime, end: OffsetDateTime) -> impl Future<Output = anyhow::Result<Vec<PlateRecord>>>;
    fn unique_plate_count(&self) -> impl Future<Output = anyhow::Result<u64>>;
    fn update_record(&self, id: i64, update: &PlateRecordUpdate) -> impl Future<Output = anyhow::Result<bool>>;
    fn delete_record(&self, id: i64) -> impl Future<Output = anyhow::Result<bool>>;
}
