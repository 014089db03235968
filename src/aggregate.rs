use std::collections::HashMap;

use tracing::debug;

use crate::record::{AwardRecord, ExtractionOutcome, FieldWarning};

/// A field where two non-null extractions of the same award disagreed.
/// Surfaced in the run summary, never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeConflict {
    pub award_id: String,
    pub field: String,
}

/// Append-only result table, keyed by `award_id` for duplicate lookup.
/// The identity-uniqueness invariant holds after every `add` call.
#[derive(Default)]
pub struct AggregateTable {
    rows: Vec<AwardRecord>,
    index: HashMap<String, usize>,
    warnings: HashMap<String, Vec<FieldWarning>>,
    pub merge_conflicts: Vec<MergeConflict>,
    pub ok: usize,
    pub partial: usize,
    pub failed: usize,
}

impl AggregateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one extraction outcome into the table. `Failure` items are
    /// dropped and tallied; duplicates are merged field-by-field, preferring
    /// non-null values and, on conflict, the more recently fetched page.
    pub fn add(&mut self, outcome: ExtractionOutcome) {
        let (record, warnings) = match outcome {
            ExtractionOutcome::Success(record) => {
                self.ok += 1;
                (record, Vec::new())
            }
            ExtractionOutcome::PartialFailure(record, warnings) => {
                self.partial += 1;
                (record, warnings)
            }
            ExtractionOutcome::Failure(reason) => {
                debug!(%reason, "dropping failed item");
                self.failed += 1;
                return;
            }
        };

        if !warnings.is_empty() {
            self.warnings
                .entry(record.award_id.clone())
                .or_default()
                .extend(warnings);
        }

        match self.index.get(&record.award_id) {
            Some(&at) => {
                let conflicts = merge(&mut self.rows[at], record);
                self.merge_conflicts.extend(conflicts);
            }
            None => {
                self.index.insert(record.award_id.clone(), self.rows.len());
                self.rows.push(record);
            }
        }
    }

    pub fn rows(&self) -> &[AwardRecord] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn warnings_for(&self, award_id: &str) -> &[FieldWarning] {
        self.warnings
            .get(award_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Per-field merge of a duplicate into its existing row. Non-null beats null;
/// when both sides are non-null and differ, the newer fetch wins and the
/// field is reported as a conflict. A null never overwrites a value.
fn merge(existing: &mut AwardRecord, incoming: AwardRecord) -> Vec<MergeConflict> {
    let mut conflicts = Vec::new();
    let incoming_newer = incoming.extracted_at > existing.extracted_at;

    macro_rules! merge_field {
        ($field:ident, $name:literal) => {
            match (&existing.$field, incoming.$field) {
                (None, Some(value)) => existing.$field = Some(value),
                (Some(old), Some(new)) if *old != new => {
                    if incoming_newer {
                        existing.$field = Some(new);
                    }
                    conflicts.push(MergeConflict {
                        award_id: existing.award_id.clone(),
                        field: $name.to_string(),
                    });
                }
                _ => {}
            }
        };
    }

    merge_field!(title, "title");
    merge_field!(recipient, "recipient");
    merge_field!(amount, "amount");
    merge_field!(date_announced, "date_announced");

    if incoming_newer {
        existing.source_url = incoming.source_url;
        existing.extracted_at = incoming.extracted_at;
    }

    conflicts
}
