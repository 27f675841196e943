//! One-hot encoding of the site region over a closed vocabulary.
//!
//! The output always carries one indicator column per vocabulary entry,
//! whichever regions appear in a batch.

use serde::{Deserialize, Serialize};

pub const REGION_PREFIX: &str = "region_";

pub fn region_column(category: &str) -> String {
    format!("{REGION_PREFIX}{category}")
}

pub fn is_region_column(name: &str) -> bool {
    name.starts_with(REGION_PREFIX)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionVocabulary {
    categories: Vec<String>,
}

impl RegionVocabulary {
    /// Duplicates are dropped; first occurrence wins the position.
    pub fn new<I, S>(categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for category in categories.into_iter().map(Into::into) {
            if !unique.contains(&category) {
                unique.push(category);
            }
        }
        Self { categories: unique }
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn contains(&self, region: &str) -> bool {
        self.categories.iter().any(|c| c == region)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.categories.iter().map(|c| region_column(c)).collect()
    }

    /// Indicator values in vocabulary order. Unknown or missing regions encode as all zeros.
    pub fn encode(&self, region: Option<&str>) -> Vec<f64> {
        self.categories
            .iter()
            .map(|c| if Some(c.as_str()) == region { 1.0 } else { 0.0 })
            .collect()
    }
}

impl Default for RegionVocabulary {
    fn default() -> Self {
        Self::new(["East", "North", "South", "West"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_column_names() {
        let vocab = RegionVocabulary::default();
        assert_eq!(
            vocab.column_names(),
            vec!["region_East", "region_North", "region_South", "region_West"]
        );
        assert!(is_region_column("region_North"));
        assert!(!is_region_column("month"));
    }

    #[test]
    fn test_encode_known_and_unknown() {
        let vocab = RegionVocabulary::default();
        assert_eq!(vocab.encode(Some("South")), vec![0.0, 0.0, 1.0, 0.0]);
        assert_eq!(vocab.encode(Some("Central")), vec![0.0; 4]);
        assert_eq!(vocab.encode(None), vec![0.0; 4]);
    }

    #[test]
    fn test_duplicates_are_dropped() {
        let vocab = RegionVocabulary::new(["West", "East", "West"]);
        assert_eq!(vocab.categories(), &["West".to_string(), "East".to_string()]);
    }

    proptest! {
        #[test]
        fn prop_every_row_has_full_schema_and_one_hot(
            picks in prop::collection::vec(0usize..4, 0..50),
        ) {
            let vocab = RegionVocabulary::default();
            let categories = vocab.categories().to_vec();
            for pick in picks {
                let encoded = vocab.encode(Some(categories[pick].as_str()));
                prop_assert_eq!(encoded.len(), vocab.len());
                prop_assert!(encoded.iter().all(|v| *v == 0.0 || *v == 1.0));
                prop_assert_eq!(encoded.iter().sum::<f64>(), 1.0);
                prop_assert_eq!(encoded[pick], 1.0);
            }
        }
    }
}
