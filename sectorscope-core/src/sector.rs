//! Sector label canonicalization.
//!
//! Raw sector labels arrive from the data provider with inconsistent casing,
//! spacing and width (full-width forms are common in Korean market data).
//! Every label passes through the same [`SectorNormalizer`] at write time
//! (aggregation) and at read time (lookup). Otherwise the statistics for a
//! single sector silently fragment across several keys.

use crate::{ConfigError, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use unicode_normalization::UnicodeNormalization;

/// A canonicalized sector label.
///
/// Only [`SectorNormalizer::normalize`] produces these, so two values compare
/// equal exactly when their raw labels canonicalize to the same form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedSector(String);

impl NormalizedSector {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for NormalizedSector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NormalizedSector {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Width/case/whitespace folding applied before synonym lookup.
///
/// NFKC folds full-width forms (`ＩＴ` -> `IT`, U+3000 -> space), whitespace
/// runs collapse to a single ASCII space, then the label is lowercased.
pub fn canonical_form(raw: &str) -> String {
    let folded: String = raw.nfkc().collect();
    let collapsed = folded.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.to_lowercase().nfkc().collect()
}

/// Default synonym table for KRX-style sector names.
pub const DEFAULT_SECTOR_SYNONYMS: &[(&str, &str)] = &[
    ("전기·전자", "전기전자"),
    ("전기 전자", "전기전자"),
    ("전기/전자", "전기전자"),
    ("전기전자업", "전기전자"),
    ("it 서비스", "it서비스"),
    ("운수·창고", "운수창고"),
    ("운수 창고", "운수창고"),
    ("의료·정밀", "의료정밀"),
    ("섬유·의복", "섬유의복"),
];

/// Deterministic sector label canonicalizer with synonym collapse.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SectorNormalizer {
    /// canonical alias -> canonical target; targets are never keys.
    synonyms: BTreeMap<String, String>,
}

impl SectorNormalizer {
    /// Normalizer without any synonyms.
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalizer preloaded with [`DEFAULT_SECTOR_SYNONYMS`].
    pub fn with_default_synonyms() -> Self {
        // The built-in table is chain-free, so resolution cannot fail.
        Self::with_synonyms(DEFAULT_SECTOR_SYNONYMS.iter().copied()).unwrap_or_default()
    }

    /// Build a normalizer from `(alias, canonical)` pairs.
    ///
    /// Both sides are canonicalized and chains (`a -> b`, `b -> c`) are
    /// resolved up front so every alias maps straight to a terminal label.
    /// Cycles are rejected.
    pub fn with_synonyms<I, A, B>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (A, B)>,
        A: AsRef<str>,
        B: AsRef<str>,
    {
        let mut raw_map = BTreeMap::new();
        for (alias, target) in pairs {
            let alias = canonical_form(alias.as_ref());
            let target = canonical_form(target.as_ref());
            if alias.is_empty() || target.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "sector_synonyms".to_string(),
                    value: format!("{:?}={:?}", alias, target),
                    reason: "alias and target must be non-empty".to_string(),
                });
            }
            if alias != target {
                raw_map.insert(alias, target);
            }
        }

        let mut synonyms = BTreeMap::new();
        for alias in raw_map.keys() {
            let mut seen = BTreeSet::new();
            let mut current = alias.clone();
            while let Some(next) = raw_map.get(&current) {
                if !seen.insert(current.clone()) {
                    return Err(ConfigError::InvalidValue {
                        field: "sector_synonyms".to_string(),
                        value: alias.clone(),
                        reason: "synonym chain forms a cycle".to_string(),
                    });
                }
                current = next.clone();
            }
            synonyms.insert(alias.clone(), current);
        }

        Ok(Self { synonyms })
    }

    /// Parse `alias=canonical;alias=canonical` as used by the
    /// `SECTORSCOPE_SECTOR_SYNONYMS` environment variable.
    pub fn parse_synonym_spec(spec: &str) -> Result<Vec<(String, String)>, ConfigError> {
        spec.split(';')
            .map(str::trim)
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                pair.split_once('=')
                    .map(|(a, b)| (a.trim().to_string(), b.trim().to_string()))
                    .ok_or_else(|| ConfigError::InvalidValue {
                        field: "SECTORSCOPE_SECTOR_SYNONYMS".to_string(),
                        value: pair.to_string(),
                        reason: "expected alias=canonical".to_string(),
                    })
            })
            .collect()
    }

    /// Canonicalize a raw label.
    pub fn normalize(&self, raw: &str) -> Result<NormalizedSector, ValidationError> {
        let canonical = canonical_form(raw);
        if canonical.is_empty() {
            return Err(ValidationError::EmptySectorLabel {
                raw: raw.to_string(),
            });
        }
        let resolved = match self.synonyms.get(&canonical) {
            Some(target) => target.clone(),
            None => canonical,
        };
        Ok(NormalizedSector(resolved))
    }

    /// Number of registered aliases.
    pub fn synonym_count(&self) -> usize {
        self.synonyms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_whitespace_and_width_variants_collapse() {
        let normalizer = SectorNormalizer::new();
        let plain = normalizer.normalize("전기전자").unwrap();
        let padded = normalizer.normalize(" 전기전자 ").unwrap();
        let ideographic = normalizer.normalize("\u{3000}전기전자\u{3000}").unwrap();
        assert_eq!(plain, padded);
        assert_eq!(plain, ideographic);
        assert_eq!(plain.as_str(), "전기전자");
    }

    #[test]
    fn test_full_width_latin_folds() {
        let normalizer = SectorNormalizer::new();
        let full_width = normalizer.normalize("ＩＴ　Ｓｅｒｖｉｃｅｓ").unwrap();
        let ascii = normalizer.normalize("it   services").unwrap();
        assert_eq!(full_width, ascii);
        assert_eq!(ascii.as_str(), "it services");
    }

    #[test]
    fn test_empty_label_rejected() {
        let normalizer = SectorNormalizer::new();
        assert!(matches!(
            normalizer.normalize("   "),
            Err(ValidationError::EmptySectorLabel { .. })
        ));
    }

    #[test]
    fn test_default_synonyms_collapse() {
        let normalizer = SectorNormalizer::with_default_synonyms();
        let a = normalizer.normalize("전기·전자").unwrap();
        let b = normalizer.normalize("전기 전자").unwrap();
        let c = normalizer.normalize("전기전자").unwrap();
        assert_eq!(a, c);
        assert_eq!(b, c);
    }

    #[test]
    fn test_synonym_chains_resolve_to_terminal() {
        let normalizer =
            SectorNormalizer::with_synonyms([("a", "b"), ("b", "c"), ("C", "d")]).unwrap();
        assert_eq!(normalizer.normalize("A").unwrap().as_str(), "d");
        assert_eq!(normalizer.normalize("b").unwrap().as_str(), "d");
        assert_eq!(normalizer.normalize("d").unwrap().as_str(), "d");
    }

    #[test]
    fn test_synonym_cycle_rejected() {
        let result = SectorNormalizer::with_synonyms([("a", "b"), ("b", "a")]);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_parse_synonym_spec() {
        let pairs = SectorNormalizer::parse_synonym_spec("반도체=전기전자; 은행 = 금융 ;").unwrap();
        assert_eq!(
            pairs,
            vec![
                ("반도체".to_string(), "전기전자".to_string()),
                ("은행".to_string(), "금융".to_string())
            ]
        );
        assert!(SectorNormalizer::parse_synonym_spec("broken").is_err());
    }

    fn arb_label() -> impl Strategy<Value = String> {
        proptest::collection::vec(
            prop_oneof![
                Just(' '),
                Just('\u{3000}'),
                Just('\t'),
                proptest::char::range('a', 'z'),
                proptest::char::range('A', 'Z'),
                proptest::char::range('\u{FF21}', '\u{FF3A}'),
                proptest::char::range('\u{AC00}', '\u{AC40}'),
                Just('·'),
            ],
            0..24,
        )
        .prop_map(|chars| chars.into_iter().collect())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Normalizing an already-normalized label is a no-op.
        #[test]
        fn prop_normalization_idempotent(raw in arb_label()) {
            let normalizer = SectorNormalizer::with_default_synonyms();
            if let Ok(once) = normalizer.normalize(&raw) {
                let twice = normalizer.normalize(once.as_str()).unwrap();
                prop_assert_eq!(once, twice);
            }
        }

        /// Surrounding whitespace and case never change the result.
        #[test]
        fn prop_case_and_padding_insensitive(raw in arb_label(), pad in 0usize..4) {
            let normalizer = SectorNormalizer::new();
            let padded = format!("{}{}{}", " ".repeat(pad), raw.to_uppercase(), "\u{3000}".repeat(pad));
            prop_assert_eq!(normalizer.normalize(&raw).ok(), normalizer.normalize(&padded).ok());
        }
    }
}
