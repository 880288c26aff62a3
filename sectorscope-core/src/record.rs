//! Snapshot records and batches

use crate::{new_batch_id, BatchId, Timestamp, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Name of a valuation metric carried by a snapshot record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValuationField(String);

impl ValuationField {
    /// Price / earnings.
    pub const PER: &'static str = "PER";
    /// Price / book value.
    pub const PBR: &'static str = "PBR";
    /// Price / sales.
    pub const PSR: &'static str = "PSR";
    /// Return on equity.
    pub const ROE: &'static str = "ROE";
    /// Enterprise value / EBITDA.
    pub const EV_EBITDA: &'static str = "EV_EBITDA";
    /// Dividend yield.
    pub const DIV_YIELD: &'static str = "DIV_YIELD";

    /// The documented well-known keys. Other keys are accepted as-is.
    pub const WELL_KNOWN: [&'static str; 6] = [
        Self::PER,
        Self::PBR,
        Self::PSR,
        Self::ROE,
        Self::EV_EBITDA,
        Self::DIV_YIELD,
    ];

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_well_known(&self) -> bool {
        Self::WELL_KNOWN.contains(&self.0.as_str())
    }
}

impl fmt::Display for ValuationField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ValuationField {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One instrument as observed by one collection run.
///
/// A key that is absent, maps to `None`, or holds a non-finite number is
/// treated as missing for that field only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub instrument_id: String,
    /// Raw label as reported by the provider (not normalized).
    pub sector_label: String,
    #[serde(default)]
    pub valuation_fields: BTreeMap<ValuationField, Option<f64>>,
    pub collected_at: Timestamp,
}

impl SnapshotRecord {
    pub fn new(
        instrument_id: impl Into<String>,
        sector_label: impl Into<String>,
        collected_at: Timestamp,
    ) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            sector_label: sector_label.into(),
            valuation_fields: BTreeMap::new(),
            collected_at,
        }
    }

    /// Builder-style field setter, mostly for fixtures.
    pub fn with_field(mut self, field: impl Into<ValuationField>, value: Option<f64>) -> Self {
        self.valuation_fields.insert(field.into(), value);
        self
    }

    /// Present (finite) value of a field, if any.
    pub fn field(&self, field: &ValuationField) -> Option<f64> {
        self.valuation_fields
            .get(field)
            .copied()
            .flatten()
            .filter(|v| v.is_finite())
    }
}

/// One complete collection run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotBatch {
    pub batch_id: BatchId,
    pub collected_at: Timestamp,
    pub records: Vec<SnapshotRecord>,
}

impl SnapshotBatch {
    /// Build a batch, enforcing unique non-empty instrument ids.
    pub fn new(collected_at: Timestamp, records: Vec<SnapshotRecord>) -> Result<Self, ValidationError> {
        let mut seen = BTreeSet::new();
        for record in &records {
            if record.instrument_id.trim().is_empty() {
                return Err(ValidationError::EmptyInstrumentId);
            }
            if !seen.insert(record.instrument_id.as_str()) {
                return Err(ValidationError::DuplicateInstrument {
                    instrument_id: record.instrument_id.clone(),
                });
            }
        }
        Ok(Self {
            batch_id: new_batch_id(),
            collected_at,
            records,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_missing_and_non_finite_fields_are_absent() {
        let record = SnapshotRecord::new("005930", "전기전자", Utc::now())
            .with_field(ValuationField::PER, Some(12.5))
            .with_field(ValuationField::PBR, None)
            .with_field(ValuationField::ROE, Some(f64::NAN));

        assert_eq!(record.field(&ValuationField::from(ValuationField::PER)), Some(12.5));
        assert_eq!(record.field(&ValuationField::from(ValuationField::PBR)), None);
        assert_eq!(record.field(&ValuationField::from(ValuationField::ROE)), None);
        assert_eq!(record.field(&ValuationField::from(ValuationField::PSR)), None);
    }

    #[test]
    fn test_batch_rejects_duplicate_instrument() {
        let now = Utc::now();
        let records = vec![
            SnapshotRecord::new("005930", "전기전자", now),
            SnapshotRecord::new("005930", "전기전자", now),
        ];
        let err = SnapshotBatch::new(now, records).unwrap_err();
        assert_eq!(
            err,
            ValidationError::DuplicateInstrument {
                instrument_id: "005930".to_string()
            }
        );
    }

    #[test]
    fn test_batch_rejects_blank_instrument() {
        let now = Utc::now();
        let err = SnapshotBatch::new(now, vec![SnapshotRecord::new(" ", "x", now)]).unwrap_err();
        assert_eq!(err, ValidationError::EmptyInstrumentId);
    }

    #[test]
    fn test_record_json_shape() {
        let json = r#"{
            "instrument_id": "000660",
            "sector_label": " 전기전자 ",
            "valuation_fields": {"PER": 8.1, "PBR": null},
            "collected_at": "2026-10-17T06:30:00Z"
        }"#;
        let record: SnapshotRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.instrument_id, "000660");
        assert_eq!(record.field(&"PER".into()), Some(8.1));
        assert_eq!(record.field(&"PBR".into()), None);
        assert!(ValuationField::from("PER").is_well_known());
        assert!(!ValuationField::from("CUSTOM").is_well_known());
    }
}
