use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Target reduction ratio per model part (mesh layer), each in `[0, 1]`.
///
/// Reconfiguring a session replaces the whole mapping; parts are never merged
/// with a previous configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration(BTreeMap<String, f64>);

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Configuration::set`].
    pub fn with(mut self, part: impl Into<String>, ratio: f64) -> Self {
        self.set(part, ratio);
        self
    }

    pub fn set(&mut self, part: impl Into<String>, ratio: f64) {
        self.0.insert(part.into(), ratio);
    }

    pub fn get(&self, part: &str) -> Option<f64> {
        self.0.get(part).copied()
    }

    pub fn parts(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Mean ratio across all parts, or `None` for an empty configuration.
    pub fn mean_ratio(&self) -> Option<f64> {
        if self.0.is_empty() {
            return None;
        }
        Some(self.0.values().sum::<f64>() / self.0.len() as f64)
    }

    /// Reject configurations the service would certainly refuse.
    pub fn validate(&self) -> Result<()> {
        if self.0.is_empty() {
            return Err(Error::Validation(
                "configuration must name at least one part".to_string(),
            ));
        }
        for (part, ratio) in &self.0 {
            if part.trim().is_empty() {
                return Err(Error::Validation("part name must not be empty".to_string()));
            }
            if !ratio.is_finite() || !(0.0..=1.0).contains(ratio) {
                return Err(Error::Validation(format!(
                    "reduction ratio for part '{}' must be within [0, 1], got {}",
                    part, ratio
                )));
            }
        }
        Ok(())
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for Configuration {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ratios_at_both_bounds() {
        let config = Configuration::new().with("body", 0.0).with("lid", 1.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_empty_configuration() {
        let err = Configuration::new().validate().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn rejects_out_of_range_and_non_finite_ratios() {
        for ratio in [-0.1, 1.5, f64::NAN, f64::INFINITY] {
            let err = Configuration::new().with("body", ratio).validate().unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "ratio {ratio} accepted");
        }
    }

    #[test]
    fn rejects_blank_part_names() {
        let err = Configuration::new().with("  ", 0.5).validate().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn setting_a_part_twice_overwrites() {
        let config = Configuration::new().with("body", 0.2).with("body", 0.7);
        assert_eq!(config.len(), 1);
        assert_eq!(config.get("body"), Some(0.7));
    }

    #[test]
    fn mean_ratio_averages_parts() {
        let config: Configuration = [("a", 0.2), ("b", 0.6)].into_iter().collect();
        let mean = config.mean_ratio().unwrap();
        assert!((mean - 0.4).abs() < 1e-12);
        assert_eq!(Configuration::new().mean_ratio(), None);
    }

    #[test]
    fn serializes_as_a_plain_mapping() {
        let config = Configuration::new().with("body", 0.5);
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json, serde_json::json!({ "body": 0.5 }));
    }
}
