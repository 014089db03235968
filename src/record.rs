use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// The award fields a template knows how to locate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    AwardId,
    Title,
    Recipient,
    Amount,
    DateAnnounced,
}

impl Field {
    pub fn name(&self) -> &'static str {
        match self {
            Field::AwardId => "award_id",
            Field::Title => "title",
            Field::Recipient => "recipient",
            Field::Amount => "amount",
            Field::DateAnnounced => "date_announced",
        }
    }
}

/// Untyped text fragments located by the extractor, one slot per field.
/// Consumed once by the normalizer.
#[derive(Debug, Clone, Default)]
pub struct RawFields {
    pub award_id: Option<String>,
    pub title: Option<String>,
    pub recipient: Option<String>,
    pub amount: Option<String>,
    pub date_announced: Option<String>,
}

impl RawFields {
    pub fn set(&mut self, field: Field, value: String) {
        let slot = self.slot(field);
        if slot.is_none() {
            *slot = Some(value);
        }
    }

    pub fn get(&self, field: Field) -> Option<&str> {
        match field {
            Field::AwardId => self.award_id.as_deref(),
            Field::Title => self.title.as_deref(),
            Field::Recipient => self.recipient.as_deref(),
            Field::Amount => self.amount.as_deref(),
            Field::DateAnnounced => self.date_announced.as_deref(),
        }
    }

    fn slot(&mut self, field: Field) -> &mut Option<String> {
        match field {
            Field::AwardId => &mut self.award_id,
            Field::Title => &mut self.title,
            Field::Recipient => &mut self.recipient,
            Field::Amount => &mut self.amount,
            Field::DateAnnounced => &mut self.date_announced,
        }
    }
}

/// A recoverable data-quality problem attached to a record. Never halts a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldWarning {
    pub field: String,
    pub message: String,
}

impl FieldWarning {
    pub fn new(field: Field, message: impl Into<String>) -> Self {
        FieldWarning {
            field: field.name().to_string(),
            message: message.into(),
        }
    }
}

/// Canonical unit of output. `award_id` is the source-scoped identity key;
/// every other field may be None to signal "absent or unparseable".
#[derive(Debug, Clone, PartialEq)]
pub struct AwardRecord {
    pub award_id: String,
    pub title: Option<String>,
    pub recipient: Option<String>,
    pub amount: Option<f64>,
    pub date_announced: Option<NaiveDate>,
    pub source: String,
    pub source_url: String,
    pub extracted_at: DateTime<Utc>,
}

/// Per-item extraction result. Data-shape problems come back as data, never
/// as a raised error.
#[derive(Debug, Clone)]
pub enum ExtractionOutcome {
    Success(AwardRecord),
    PartialFailure(AwardRecord, Vec<FieldWarning>),
    Failure(String),
}

impl ExtractionOutcome {
    pub fn record(&self) -> Option<&AwardRecord> {
        match self {
            ExtractionOutcome::Success(r) | ExtractionOutcome::PartialFailure(r, _) => Some(r),
            ExtractionOutcome::Failure(_) => None,
        }
    }
}
