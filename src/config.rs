//! ### Config
//! Analysis parameters, read from an optional TOML file and overridden
//! from the command line.

use crate::compute::Filters;
use crate::convert::DEFAULT_SENTINEL;
use anyhow::{bail, Context};
use serde::Deserialize;
use std::path::Path;

/// Daegu's districts and counties followed by Gyeongsan.
pub const DEFAULT_TARGET_DISTRICTS: [&str; 10] = [
    "중구", "동구", "서구", "남구", "북구", "수성구", "달서구", "달성군", "군위군", "경산시",
];

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub header_sentinel: String,
    pub base_year: Option<i32>,
    pub compare_year: Option<i32>,
    pub filters: Filters,
    /// Districts always reported by the decrease pivot, in display order.
    pub target_districts: Vec<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            header_sentinel: DEFAULT_SENTINEL.to_string(),
            base_year: None,
            compare_year: None,
            filters: Filters::default(),
            target_districts: DEFAULT_TARGET_DISTRICTS.iter().map(|d| d.to_string()).collect(),
        }
    }
}

impl AnalysisConfig {
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    /// Base and compare years, defaulting to the first and last year of
    /// `years` (ascending) when unset.
    pub fn resolve_years(&self, years: &[i32]) -> anyhow::Result<(i32, i32)> {
        let (Some(&first), Some(&last)) = (years.first(), years.last()) else {
            bail!("survey contains no records");
        };
        Ok((self.base_year.unwrap_or(first), self.compare_year.unwrap_or(last)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bundled_config() {
        let config = AnalysisConfig::from_toml_str(include_str!("../config/daegu_gyeongsan.toml")).unwrap();
        assert_eq!(config.header_sentinel, "년월");
        assert_eq!(config.base_year, Some(2015));
        assert_eq!(config.compare_year, Some(2024));
        assert_eq!(config.target_districts, AnalysisConfig::default().target_districts);
        assert_eq!(config.filters.product_types, ["취사용"]);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let config = AnalysisConfig::from_toml_str("compare_year = 2020").unwrap();
        assert_eq!(config.compare_year, Some(2020));
        assert_eq!(config.header_sentinel, DEFAULT_SENTINEL);
        assert_eq!(config.target_districts.len(), 10);
        assert!(config.filters.usage_types.is_empty());
    }

    #[test]
    fn resolves_years_from_data() {
        let config = AnalysisConfig {
            compare_year: Some(2020),
            ..Default::default()
        };
        assert_eq!(config.resolve_years(&[2015, 2018, 2024]).unwrap(), (2015, 2020));
        assert!(config.resolve_years(&[]).is_err());
    }
}
