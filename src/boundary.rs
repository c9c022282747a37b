//! ### Boundary
//! Administrative boundary features and the best-effort join between
//! survey district names and feature properties. The two sources share
//! no identifier, so names are matched exactly where possible and by
//! substring otherwise.

use crate::compute::DistrictDecrease;
use crate::error::BoundaryError;
use geojson::{Feature, FeatureCollection, GeoJson, JsonObject, Value};
use log::{debug, info, warn};
use serde::Serialize;
use std::path::Path;

#[derive(Clone, Debug)]
pub struct BoundaryFeature {
    /// String-valued properties in declaration order.
    pub names: Vec<(String, String)>,
    pub feature: Feature,
}

impl BoundaryFeature {
    pub fn from_feature(feature: Feature) -> Self {
        let names = feature
            .properties
            .iter()
            .flatten()
            .filter_map(|(key, value)| value.as_str().map(|value| (key.clone(), value.to_string())))
            .collect();
        Self { names, feature }
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.names
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    /// Exterior rings as (lon, lat) points. Holes are not returned.
    pub fn exterior_rings(&self) -> Vec<Vec<(f64, f64)>> {
        let Some(geometry) = &self.feature.geometry else {
            return Vec::new();
        };
        let ring_points = |ring: &Vec<Vec<f64>>| -> Vec<(f64, f64)> {
            ring.iter()
                .filter_map(|pos| Some((*pos.first()?, *pos.get(1)?)))
                .collect()
        };
        match &geometry.value {
            Value::Polygon(polygon) => polygon.first().map(ring_points).into_iter().collect(),
            Value::MultiPolygon(polygons) => polygons
                .iter()
                .filter_map(|polygon| polygon.first().map(ring_points))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Read-only boundary geometry shared by every query of a session.
#[derive(Clone, Debug, Default)]
pub struct BoundarySet {
    pub features: Vec<BoundaryFeature>,
}

impl BoundarySet {
    pub fn from_geojson_str(text: &str) -> Result<Self, BoundaryError> {
        let GeoJson::FeatureCollection(collection) = text.parse::<GeoJson>()? else {
            return Err(BoundaryError::NotFeatureCollection);
        };
        let features: Vec<BoundaryFeature> = collection
            .features
            .into_iter()
            .map(BoundaryFeature::from_feature)
            .collect();
        info!("loaded {} boundary features", features.len());
        Ok(Self { features })
    }

    pub fn from_path(path: &Path) -> Result<Self, BoundaryError> {
        Self::from_geojson_str(&std::fs::read_to_string(path)?)
    }

    /// Every string property key, in the order first declared.
    pub fn property_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::new();
        for (key, _) in self.features.iter().flat_map(|f| &f.names) {
            if !keys.contains(&key.as_str()) {
                keys.push(key);
            }
        }
        keys
    }

    /// Values of `key` in feature order, skipping features without it.
    pub fn values(&self, key: &str) -> Vec<&str> {
        self.features.iter().filter_map(|f| f.value(key)).collect()
    }

    /// (min, max) corners over all exterior rings.
    pub fn bounds(&self) -> Option<((f64, f64), (f64, f64))> {
        self.features
            .iter()
            .flat_map(BoundaryFeature::exterior_rings)
            .flatten()
            .fold(None, |acc, (x, y)| match acc {
                None => Some(((x, y), (x, y))),
                Some(((min_x, min_y), (max_x, max_y))) => {
                    Some(((min_x.min(x), min_y.min(y)), (max_x.max(x), max_y.max(y))))
                }
            })
    }
}

/// The property key under which the most districts appear as a substring
/// of some feature value. Ties go to the key declared first.
pub fn select_name_property(boundaries: &BoundarySet, districts: &[String]) -> Option<String> {
    let mut best: Option<(&str, usize)> = None;
    for key in boundaries.property_keys() {
        let values = boundaries.values(key);
        let hits = districts
            .iter()
            .map(|district| district.trim())
            .filter(|district| !district.is_empty())
            .filter(|district| values.iter().any(|value| value.contains(district)))
            .count();
        debug!("property {key:?} covers {hits} districts");
        if best.map_or(true, |(_, most)| hits > most) {
            best = Some((key, hits));
        }
    }
    best.map(|(key, hits)| {
        info!("joining districts on property {key:?} ({hits}/{} matched)", districts.len());
        key.to_string()
    })
}

/// Finds the feature value a district should join on: an exact match,
/// then a match after trimming, then the first value that contains or is
/// contained in the district name.
pub fn resolve_join_key(candidates: &[&str], target: &str) -> Option<String> {
    if let Some(exact) = candidates.iter().find(|value| **value == target) {
        return Some(exact.to_string());
    }
    let target = target.trim();
    if target.is_empty() {
        return None;
    }
    candidates
        .iter()
        .find(|value| value.trim() == target)
        .or_else(|| {
            candidates.iter().find(|value| {
                let value = value.trim();
                !value.is_empty() && (value.contains(target) || target.contains(value))
            })
        })
        .map(|value| value.to_string())
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DistrictJoin {
    pub district: String,
    pub geo_key: String,
    pub matched: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GeoJoin {
    pub property: Option<String>,
    pub districts: Vec<DistrictJoin>,
}

impl GeoJoin {
    pub fn geo_key(&self, district: &str) -> Option<&str> {
        self.districts
            .iter()
            .find(|join| join.district == district)
            .map(|join| join.geo_key.as_str())
    }

    /// The matched district a feature stands for, if any.
    pub fn district_for(&self, feature: &BoundaryFeature) -> Option<&str> {
        let value = feature.value(self.property.as_deref()?)?;
        self.districts
            .iter()
            .find(|join| join.matched && join.geo_key == value)
            .map(|join| join.district.as_str())
    }
}

/// Resolves a geo key for every district. Unmatched districts keep their
/// own name as the key.
pub fn join_districts(boundaries: &BoundarySet, districts: &[String]) -> GeoJoin {
    let property = select_name_property(boundaries, districts);
    let candidates = property
        .as_deref()
        .map(|key| boundaries.values(key))
        .unwrap_or_default();

    let districts = districts
        .iter()
        .map(|district| match resolve_join_key(&candidates, district) {
            Some(geo_key) => DistrictJoin {
                district: district.clone(),
                geo_key,
                matched: true,
            },
            None => {
                warn!("no boundary feature matches district {district:?}");
                DistrictJoin {
                    district: district.clone(),
                    geo_key: district.clone(),
                    matched: false,
                }
            }
        })
        .collect();

    GeoJoin { property, districts }
}

pub fn attach_geo_keys(rows: &mut [DistrictDecrease], join: &GeoJoin) {
    for row in rows {
        if let Some(geo_key) = join.geo_key(&row.district) {
            row.geo_key = geo_key.to_string();
        }
    }
}

/// Copies the boundary features with each matched district's pivot
/// values merged into its properties.
pub fn annotate(boundaries: &BoundarySet, join: &GeoJoin, rows: &[DistrictDecrease]) -> FeatureCollection {
    let features = boundaries
        .features
        .iter()
        .map(|boundary| {
            let mut feature = boundary.feature.clone();
            let row = join
                .district_for(boundary)
                .and_then(|district| rows.iter().find(|row| row.district == district));
            if let Some(row) = row {
                let properties = feature.properties.get_or_insert_with(JsonObject::new);
                properties.insert("district".into(), row.district.clone().into());
                properties.insert("base_value".into(), row.base_value.into());
                properties.insert("compare_value".into(), row.compare_value.into());
                properties.insert("decrease_amount".into(), row.decrease_amount.into());
                properties.insert("decrease_rate".into(), row.decrease_rate.into());
            }
            feature
        })
        .collect();

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

pub fn write_annotated(output: &Path, collection: FeatureCollection) -> anyhow::Result<()> {
    std::fs::write(output, GeoJson::FeatureCollection(collection).to_string())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_KEYS: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "properties": {"code": "27110", "SIG_KOR_NM": "중구 "},
             "geometry": {"type": "Polygon", "coordinates": [[[128.5, 35.8], [128.6, 35.8], [128.6, 35.9], [128.5, 35.8]]]}},
            {"type": "Feature", "properties": {"code": "27140", "SIG_KOR_NM": "동구"},
             "geometry": {"type": "MultiPolygon", "coordinates": [[[[128.6, 35.8], [128.7, 35.8], [128.7, 36.0], [128.6, 35.8]]]]}}
        ]
    }"#;

    fn districts(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn picks_property_covering_most_districts() {
        let boundaries = BoundarySet::from_geojson_str(TWO_KEYS).unwrap();
        assert_eq!(boundaries.property_keys(), ["code", "SIG_KOR_NM"]);
        assert_eq!(
            select_name_property(&boundaries, &districts(&["중구", "동구"])).as_deref(),
            Some("SIG_KOR_NM")
        );
    }

    #[test]
    fn ties_go_to_first_declared_key() {
        let boundaries = BoundarySet::from_geojson_str(TWO_KEYS).unwrap();
        assert_eq!(
            select_name_property(&boundaries, &districts(&["수성구"])).as_deref(),
            Some("code")
        );
    }

    #[test]
    fn trailing_space_resolves_by_containment() {
        let boundaries = BoundarySet::from_geojson_str(TWO_KEYS).unwrap();
        let join = join_districts(&boundaries, &districts(&["중구", "동구"]));
        assert_eq!(join.geo_key("중구"), Some("중구 "));
        assert_eq!(join.geo_key("동구"), Some("동구"));
        assert!(join.districts.iter().all(|d| d.matched));
    }

    #[test]
    fn exact_match_beats_substring() {
        let candidates = ["달서구", "서구"];
        assert_eq!(resolve_join_key(&candidates, "서구").as_deref(), Some("서구"));
        assert_eq!(resolve_join_key(&["달서구", "서구 "], "서구").as_deref(), Some("서구 "));
    }

    #[test]
    fn contained_value_matches() {
        assert_eq!(resolve_join_key(&["경산"], "경산시").as_deref(), Some("경산"));
        assert_eq!(resolve_join_key(&["대구광역시 수성구"], "수성구").as_deref(), Some("대구광역시 수성구"));
        assert_eq!(resolve_join_key(&["", "북구"], "남구"), None);
    }

    #[test]
    fn unmatched_district_falls_back_to_name() {
        let boundaries = BoundarySet::from_geojson_str(TWO_KEYS).unwrap();
        let join = join_districts(&boundaries, &districts(&["중구", "달성군"]));
        let missing = &join.districts[1];
        assert_eq!(missing.geo_key, "달성군");
        assert!(!missing.matched);
    }

    #[test]
    fn join_is_deterministic() {
        let boundaries = BoundarySet::from_geojson_str(TWO_KEYS).unwrap();
        let names = districts(&["동구", "중구", "서구"]);
        assert_eq!(join_districts(&boundaries, &names), join_districts(&boundaries, &names));
    }

    #[test]
    fn annotates_matched_features() {
        let boundaries = BoundarySet::from_geojson_str(TWO_KEYS).unwrap();
        let join = join_districts(&boundaries, &districts(&["중구"]));
        let rows = vec![DistrictDecrease {
            district: "중구".to_string(),
            geo_key: "중구 ".to_string(),
            base_year: 2015,
            compare_year: 2024,
            base_value: 1000,
            compare_value: 400,
            decrease_amount: 600,
            decrease_rate: Some(60.),
        }];
        let collection = annotate(&boundaries, &join, &rows);
        let first = collection.features[0].properties.as_ref().unwrap();
        assert_eq!(first["decrease_amount"], 600);
        assert!(!collection.features[1].properties.as_ref().unwrap().contains_key("decrease_amount"));
    }

    #[test]
    fn rings_and_bounds() {
        let boundaries = BoundarySet::from_geojson_str(TWO_KEYS).unwrap();
        assert_eq!(boundaries.features[0].exterior_rings()[0].len(), 4);
        assert_eq!(boundaries.features[1].exterior_rings().len(), 1);
        assert_eq!(boundaries.bounds(), Some(((128.5, 35.8), (128.7, 36.0))));
    }

    #[test]
    fn rejects_bare_geometry() {
        let err = BoundarySet::from_geojson_str(r#"{"type": "Point", "coordinates": [1.0, 2.0]}"#).unwrap_err();
        assert!(matches!(err, BoundaryError::NotFeatureCollection));
    }
}
