//! SECTORSCOPE Aggregate - Sector Statistics
//!
//! Groups snapshot records by normalized sector and computes, per valuation
//! field, percentile breakpoints over the records that carry a value for it.
//! Output is a pure function of the input set: record order does not matter.

pub mod percentile;

use sectorscope_core::{
    AggregationConfig, ConfigError, FieldPercentiles, InsufficientDataError, NormalizedSector,
    SectorNormalizer, SectorStatistics, SnapshotBatch, SnapshotRecord, StatisticsTable, Timestamp,
    ValidationError, ValuationField,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub use percentile::{breakpoints, interpolate_sorted};

// ============================================================================
// RESULTS
// ============================================================================

/// A record left out of aggregation because its label could not be normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedRecord {
    pub instrument_id: String,
    pub sector_label: String,
    pub reason: String,
}

/// Per-sector statistics plus the records that were skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct SectorAggregation {
    pub sectors: BTreeMap<NormalizedSector, SectorStatistics>,
    pub skipped: Vec<SkippedRecord>,
}

/// Aggregation of a whole batch, ready to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchAggregation {
    pub table: StatisticsTable,
    pub skipped: Vec<SkippedRecord>,
}

// ============================================================================
// AGGREGATOR
// ============================================================================

/// Computes [`SectorStatistics`] for every sector present in a set of records.
#[derive(Debug, Clone)]
pub struct SectorStatisticsAggregator {
    normalizer: Arc<SectorNormalizer>,
    percentile_points: Vec<f64>,
}

impl SectorStatisticsAggregator {
    /// Build from config, validating the percentile points and synonym table.
    pub fn new(config: &AggregationConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            normalizer: Arc::new(config.normalizer()?),
            percentile_points: config.percentile_points.clone(),
        })
    }

    /// Share an existing normalizer, so reads and writes agree on labels.
    pub fn with_normalizer(normalizer: Arc<SectorNormalizer>, percentile_points: Vec<f64>) -> Self {
        Self {
            normalizer,
            percentile_points,
        }
    }

    pub fn normalizer(&self) -> &Arc<SectorNormalizer> {
        &self.normalizer
    }

    pub fn percentile_points(&self) -> &[f64] {
        &self.percentile_points
    }

    /// Aggregate records into per-sector statistics.
    ///
    /// Fails only when there is nothing to aggregate: an empty input, or an
    /// input in which every label normalizes to empty.
    pub fn aggregate(
        &self,
        records: &[SnapshotRecord],
        computed_at: Timestamp,
    ) -> Result<SectorAggregation, InsufficientDataError> {
        if records.is_empty() {
            return Err(InsufficientDataError);
        }

        let mut groups: BTreeMap<NormalizedSector, Vec<&SnapshotRecord>> = BTreeMap::new();
        let mut skipped = Vec::new();

        for record in records {
            match self.normalizer.normalize(&record.sector_label) {
                Ok(sector) => groups.entry(sector).or_default().push(record),
                Err(e) => skipped.push(skip(record, &e)),
            }
        }

        if groups.is_empty() {
            return Err(InsufficientDataError);
        }

        let sectors: BTreeMap<_, _> = groups
            .into_iter()
            .map(|(sector, members)| {
                let stats = self.sector_statistics(sector.clone(), &members, computed_at);
                (sector, stats)
            })
            .collect();

        skipped.sort_by(|a: &SkippedRecord, b| a.instrument_id.cmp(&b.instrument_id));
        if !skipped.is_empty() {
            tracing::warn!(
                skipped = skipped.len(),
                sectors = sectors.len(),
                "records with unusable sector labels left out of aggregation"
            );
        }
        Ok(SectorAggregation { sectors, skipped })
    }

    /// Aggregate a full batch into a table tagged with the batch id.
    pub fn aggregate_batch(
        &self,
        batch: &SnapshotBatch,
        computed_at: Timestamp,
    ) -> Result<BatchAggregation, InsufficientDataError> {
        let SectorAggregation { sectors, skipped } = self.aggregate(&batch.records, computed_at)?;
        Ok(BatchAggregation {
            table: StatisticsTable {
                batch_id: batch.batch_id,
                computed_at,
                sectors,
            },
            skipped,
        })
    }

    fn sector_statistics(
        &self,
        sector: NormalizedSector,
        members: &[&SnapshotRecord],
        computed_at: Timestamp,
    ) -> SectorStatistics {
        let mut columns: BTreeMap<ValuationField, Vec<f64>> = BTreeMap::new();
        for record in members {
            for field in record.valuation_fields.keys() {
                if let Some(value) = record.field(field) {
                    columns.entry(field.clone()).or_default().push(value);
                }
            }
        }

        let percentiles = columns
            .into_iter()
            .map(|(field, mut values)| {
                let present_count = values.len();
                let breakpoints = breakpoints(&mut values, &self.percentile_points);
                (
                    field,
                    FieldPercentiles {
                        present_count,
                        breakpoints,
                    },
                )
            })
            .collect();

        SectorStatistics {
            sector,
            sample_size: members.len(),
            percentiles,
            computed_at,
        }
    }
}

fn skip(record: &SnapshotRecord, error: &ValidationError) -> SkippedRecord {
    SkippedRecord {
        instrument_id: record.instrument_id.clone(),
        sector_label: record.sector_label.clone(),
        reason: error.to_string(),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn at() -> Timestamp {
        Utc.with_ymd_and_hms(2026, 10, 17, 9, 0, 0).unwrap()
    }

    fn aggregator() -> SectorStatisticsAggregator {
        SectorStatisticsAggregator::new(&AggregationConfig::default()).unwrap()
    }

    fn record(id: &str, label: &str, per: Option<f64>) -> SnapshotRecord {
        SnapshotRecord::new(id, label, at()).with_field(ValuationField::PER, per)
    }

    fn sector(label: &str) -> NormalizedSector {
        aggregator().normalizer().normalize(label).unwrap()
    }

    #[test]
    fn test_empty_input_is_insufficient() {
        assert_eq!(aggregator().aggregate(&[], at()), Err(InsufficientDataError));
    }

    #[test]
    fn test_all_blank_labels_is_insufficient() {
        let records = vec![record("A", "   ", Some(1.0)), record("B", "\u{3000}", Some(2.0))];
        assert_eq!(aggregator().aggregate(&records, at()), Err(InsufficientDataError));
    }

    #[test]
    fn test_blank_label_skipped_and_reported() {
        let records = vec![record("A", "금융", Some(5.0)), record("B", "", Some(9.0))];
        let out = aggregator().aggregate(&records, at()).unwrap();
        assert_eq!(out.sectors.len(), 1);
        assert_eq!(out.skipped.len(), 1);
        assert_eq!(out.skipped[0].instrument_id, "B");
    }

    #[test]
    fn test_labels_with_same_canonical_form_aggregate_together() {
        let records = vec![
            record("A", "전기전자", Some(10.0)),
            record("B", "  전기·전자 ", Some(12.0)),
            record("C", "전기 전자", Some(14.0)),
        ];
        let out = aggregator().aggregate(&records, at()).unwrap();
        assert_eq!(out.sectors.len(), 1);
        let stats = &out.sectors[&sector("전기전자")];
        assert_eq!(stats.sample_size, 3);
        assert_eq!(stats.field(ValuationField::PER).unwrap().median(), Some(12.0));
    }

    #[test]
    fn test_missing_field_excluded_but_record_still_counted() {
        let records = vec![
            SnapshotRecord::new("A", "화학", at())
                .with_field(ValuationField::PER, Some(8.0))
                .with_field(ValuationField::PBR, Some(1.0)),
            SnapshotRecord::new("B", "화학", at())
                .with_field(ValuationField::PER, None)
                .with_field(ValuationField::PBR, Some(3.0)),
            SnapshotRecord::new("C", "화학", at())
                .with_field(ValuationField::PER, Some(f64::NAN))
                .with_field(ValuationField::PBR, Some(2.0)),
        ];
        let out = aggregator().aggregate(&records, at()).unwrap();
        let stats = &out.sectors[&sector("화학")];
        assert_eq!(stats.sample_size, 3);

        let per = stats.field(ValuationField::PER).unwrap();
        assert_eq!(per.present_count, 1);
        assert!(per.values().all(|v| v == 8.0));

        let pbr = stats.field(ValuationField::PBR).unwrap();
        assert_eq!(pbr.present_count, 3);
        assert_eq!(pbr.median(), Some(2.0));
    }

    #[test]
    fn test_field_with_no_values_is_omitted_not_zeroed() {
        let records = vec![record("A", "은행", None), record("B", "은행", None)];
        let out = aggregator().aggregate(&records, at()).unwrap();
        let stats = &out.sectors[&sector("은행")];
        assert_eq!(stats.sample_size, 2);
        assert!(stats.field(ValuationField::PER).is_none());
        assert!(stats.is_available());
    }

    #[test]
    fn test_small_sector_keeps_true_sample_size() {
        let records = vec![record("A", "통신업", Some(6.5))];
        let out = aggregator().aggregate(&records, at()).unwrap();
        let stats = &out.sectors[&sector("통신업")];
        assert_eq!(stats.sample_size, 1);
        let per = stats.field(ValuationField::PER).unwrap();
        assert_eq!(per.breakpoints.len(), 5);
        assert!(per.values().all(|v| v == 6.5));
    }

    #[test]
    fn test_electronics_171_records_strictly_increasing_per() {
        let records: Vec<_> = (0..171)
            .map(|i| record(&format!("{:06}", i), "전기전자", Some(5.0 + i as f64 * 0.25)))
            .collect();
        let batch = SnapshotBatch::new(at(), records).unwrap();
        let out = aggregator().aggregate_batch(&batch, at()).unwrap();

        assert_eq!(out.table.batch_id, batch.batch_id);
        let stats = out.table.get(&sector("전기전자")).unwrap();
        assert_eq!(stats.sample_size, 171);

        let per = stats.field(ValuationField::PER).unwrap();
        assert_eq!(per.present_count, 171);
        let values: Vec<f64> = per.values().collect();
        assert_eq!(values.len(), 5);
        for pair in values.windows(2) {
            assert!(pair[0] < pair[1], "breakpoints not strictly increasing: {:?}", values);
        }
        // h = 170 * 0.5 = 85 -> 5.0 + 85 * 0.25
        assert_eq!(per.median(), Some(26.25));
    }

    #[test]
    fn test_custom_percentile_points() {
        let config = AggregationConfig::default().with_percentile_points(vec![0.0, 1.0]);
        let agg = SectorStatisticsAggregator::new(&config).unwrap();
        let records = vec![record("A", "건설", Some(3.0)), record("B", "건설", Some(1.0))];
        let out = agg.aggregate(&records, at()).unwrap();
        let per = out.sectors[&sector("건설")].field(ValuationField::PER).unwrap().clone();
        assert_eq!(per.values().collect::<Vec<_>>(), vec![1.0, 3.0]);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = AggregationConfig::default().with_percentile_points(vec![0.9, 0.1]);
        assert!(SectorStatisticsAggregator::new(&config).is_err());
    }

    // ========================================================================
    // PROPERTY TESTS
    // ========================================================================

    fn arb_records() -> impl Strategy<Value = Vec<SnapshotRecord>> {
        let labels = prop::sample::select(vec!["전기전자", "전기·전자", "금융", " 금융 ", "화학"]);
        proptest::collection::vec(
            (labels, proptest::option::of(-50.0f64..500.0), proptest::option::of(0.0f64..20.0)),
            1..60,
        )
        .prop_map(|rows| {
            rows.into_iter()
                .enumerate()
                .map(|(i, (label, per, pbr))| {
                    SnapshotRecord::new(format!("I{:04}", i), label, at())
                        .with_field(ValuationField::PER, per)
                        .with_field(ValuationField::PBR, pbr)
                })
                .collect()
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Same records in any order produce identical statistics.
        #[test]
        fn prop_aggregation_is_order_independent(
            records in arb_records(),
            seed in any::<u64>(),
        ) {
            let agg = aggregator();
            let mut shuffled = records.clone();
            let len = shuffled.len();
            // Deterministic rotate plus reverse is enough to permute.
            shuffled.rotate_left((seed as usize) % len);
            shuffled.reverse();

            let a = agg.aggregate(&records, at()).unwrap();
            let b = agg.aggregate(&shuffled, at()).unwrap();
            prop_assert_eq!(a, b);
        }

        /// Sample sizes add up to the input size and present counts never exceed them.
        #[test]
        fn prop_sample_sizes_account_for_every_record(records in arb_records()) {
            let out = aggregator().aggregate(&records, at()).unwrap();
            let total: usize = out.sectors.values().map(|s| s.sample_size).sum();
            prop_assert_eq!(total + out.skipped.len(), records.len());
            for stats in out.sectors.values() {
                prop_assert!(stats.sample_size > 0);
                for fp in stats.percentiles.values() {
                    prop_assert!(fp.present_count > 0);
                    prop_assert!(fp.present_count <= stats.sample_size);
                }
            }
        }
    }
}
