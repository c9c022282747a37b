//! ### Convert
//! Turns raw survey spreadsheets (whose header row position and column
//! names drift between releases) into canonical records, and writes
//! derived tables back out as csv.

use crate::error::{FormatError, IngestError, SchemaError};
use crate::model::{CanonicalRecord, ConsumptionUnit, Period, SchemaVersion, Survey};
use anyhow::Context;
use calamine::{open_workbook_auto, Data, Reader};
use log::{debug, info, warn};
use serde::Serialize;
use std::{collections::HashMap, io, path::Path};

/// Header sentinel used by every known survey release.
pub const DEFAULT_SENTINEL: &str = "년월";

/// A sheet as rows of stringified cells, before any header detection.
#[derive(Clone, Debug, Default)]
pub struct RawSheet {
    pub rows: Vec<Vec<String>>,
}

impl RawSheet {
    pub fn from_rows(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    /// Reads a headerless csv. Rows may differ in length.
    pub fn from_csv_reader(reader: impl io::Read) -> Result<Self, IngestError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);
        let rows = reader
            .records()
            .map(|line| line.map(|line| line.iter().map(str::to_string).collect::<Vec<_>>()))
            .collect::<Result<_, _>>()?;
        Ok(Self { rows })
    }

    /// Loads the first worksheet of a workbook, or a csv file.
    pub fn from_path(path: &Path) -> Result<Self, IngestError> {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "csv" => {
                let file = std::fs::File::open(path).map_err(csv::Error::from)?;
                Self::from_csv_reader(file)
            }
            "xlsx" | "xlsm" | "xls" | "xlsb" | "ods" => {
                let mut workbook = open_workbook_auto(path)?;
                let sheet_name = workbook
                    .sheet_names()
                    .first()
                    .cloned()
                    .ok_or(IngestError::EmptyWorkbook)?;
                debug!("reading sheet {sheet_name:?} of {}", path.display());
                let range = workbook.worksheet_range(&sheet_name)?;
                let rows = range
                    .rows()
                    .map(|row| row.iter().map(cell_to_string).collect())
                    .collect();
                Ok(Self { rows })
            }
            _ => Err(IngestError::UnsupportedFile(path.display().to_string())),
        }
    }
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        // Display drops the fraction of integral floats: 201501.0 -> "201501"
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        other => other.to_string(),
    }
}

/// Index of the first row holding `expected_key` in any cell.
pub fn locate_header(rows: &[Vec<String>], expected_key: &str) -> Result<usize, SchemaError> {
    let expected_key = expected_key.trim();
    rows.iter()
        .position(|row| row.iter().any(|cell| cell.trim() == expected_key))
        .ok_or_else(|| SchemaError::HeaderNotFound {
            sentinel: expected_key.to_string(),
            rows: rows.len(),
        })
}

/// Parses a `YYYYMM` code. A trailing `.0` left behind by float
/// stringification is ignored, and a single-digit month is accepted.
pub fn parse_period(code: &str) -> Result<Period, FormatError> {
    let trimmed = code.trim();
    let trimmed = trimmed.strip_suffix(".0").unwrap_or(trimmed);

    let year = trimmed
        .get(..4)
        .filter(|year| year.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|year| year.parse::<i32>().ok())
        .ok_or_else(|| FormatError::Year {
            code: code.to_string(),
        })?;

    let month = trimmed
        .get(4..trimmed.len().min(6))
        .filter(|month| !month.is_empty() && month.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|month| month.parse::<u32>().ok())
        .filter(|month| (1..=12).contains(month))
        .ok_or_else(|| FormatError::Month {
            code: code.to_string(),
        })?;

    Ok(Period { year, month })
}

fn coerce_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
    cleaned.parse::<f64>().ok().filter(|num| num.is_finite())
}

/// Lenient count parse: thousands separators are stripped and anything
/// unparsable or negative becomes zero.
pub fn coerce_count(raw: &str) -> u64 {
    coerce_number(raw)
        .filter(|num| *num >= 0.)
        .map(|num| num.round() as u64)
        .unwrap_or(0)
}

/// Picks the column named exactly `exact`, else the first column whose
/// name contains every substring of a candidate tuple, trying tuples in
/// order. Matching ignores ASCII case.
pub fn resolve_column(headers: &[String], exact: &str, candidates: &[&[&str]]) -> Option<usize> {
    if let Some(idx) = headers.iter().position(|h| h.trim() == exact) {
        return Some(idx);
    }
    let lowered: Vec<String> = headers.iter().map(|h| h.to_lowercase()).collect();
    candidates.iter().find_map(|parts| {
        lowered.iter().position(|header| {
            !parts.is_empty()
                && parts
                    .iter()
                    .all(|part| header.contains(part.to_lowercase().as_str()))
        })
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    Period,
    UsageType,
    ProductType,
    District,
    ConnectedMeters,
    TotalMeters,
    ApplianceCount,
    Consumption,
}

impl Field {
    pub fn name(&self) -> &'static str {
        match self {
            Field::Period => "period",
            Field::UsageType => "usage_type",
            Field::ProductType => "product_type",
            Field::District => "district",
            Field::ConnectedMeters => "connected_meter_count",
            Field::TotalMeters => "total_meter_count",
            Field::ApplianceCount => "appliance_count",
            Field::Consumption => "consumption",
        }
    }
}

pub struct ColumnRule {
    pub field: Field,
    pub exact: &'static str,
    pub patterns: &'static [&'static [&'static str]],
}

impl ColumnRule {
    fn describe(&self) -> String {
        let mut tried = vec![format!("{:?}", self.exact)];
        tried.extend(self.patterns.iter().map(|parts| parts.join("+")));
        tried.join(", ")
    }
}

/// Resolution order matters: meter columns come before the gas-range
/// count because their names also mention the gas range.
pub const COLUMN_RULES: &[ColumnRule] = &[
    ColumnRule {
        field: Field::Period,
        exact: "년월",
        patterns: &[&["년월"], &["기준", "월"], &["yyyymm"]],
    },
    ColumnRule {
        field: Field::UsageType,
        exact: "용도",
        patterns: &[&["용도"]],
    },
    ColumnRule {
        field: Field::ProductType,
        exact: "상품",
        patterns: &[&["상품"], &["제품"]],
    },
    ColumnRule {
        field: Field::District,
        exact: "시군구",
        patterns: &[&["시군구"], &["구군"], &["행정구"]],
    },
    ColumnRule {
        field: Field::ConnectedMeters,
        exact: "가스레인지 연결 계량기 수",
        patterns: &[&["연결", "계량기"], &["레인지", "계량기"]],
    },
    ColumnRule {
        field: Field::TotalMeters,
        exact: "전체 청구 계량기 수",
        patterns: &[&["전체", "계량기"], &["총", "계량기"], &["청구", "계량기"]],
    },
    ColumnRule {
        field: Field::ApplianceCount,
        exact: "가스레인지 수",
        patterns: &[&["가스레인지"], &["레인지", "수"]],
    },
    ColumnRule {
        field: Field::Consumption,
        exact: "사용량",
        patterns: &[&["사용량"], &["소비량"]],
    },
];

/// Column positions of one sheet, resolved once at load time.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnMap {
    pub period: usize,
    pub usage_type: usize,
    pub product_type: usize,
    pub district: usize,
    pub appliance_count: usize,
    pub connected_meters: Option<usize>,
    pub total_meters: Option<usize>,
    pub consumption: Option<usize>,
    pub consumption_header: Option<String>,
}

impl ColumnMap {
    pub fn resolve(headers: &[String]) -> Result<Self, SchemaError> {
        let mut offered: Vec<String> = headers.iter().map(|h| h.trim().to_string()).collect();
        let mut found = HashMap::new();

        for rule in COLUMN_RULES {
            match resolve_column(&offered, rule.exact, rule.patterns) {
                Some(idx) => {
                    info!("column `{}` -> {:?}", rule.field.name(), offered[idx]);
                    found.insert(rule.field, idx);
                    // Blank the claimed header so later rules cannot match it.
                    offered[idx].clear();
                }
                None => debug!("no column for `{}`", rule.field.name()),
            }
        }

        let required = |field: Field| {
            found
                .get(&field)
                .copied()
                .ok_or_else(|| SchemaError::MissingColumn {
                    field: field.name(),
                    tried: COLUMN_RULES
                        .iter()
                        .filter(|rule| rule.field == field)
                        .map(ColumnRule::describe)
                        .collect(),
                })
        };

        let consumption = found.get(&Field::Consumption).copied();
        Ok(Self {
            period: required(Field::Period)?,
            usage_type: required(Field::UsageType)?,
            product_type: required(Field::ProductType)?,
            district: required(Field::District)?,
            appliance_count: required(Field::ApplianceCount)?,
            connected_meters: found.get(&Field::ConnectedMeters).copied(),
            total_meters: found.get(&Field::TotalMeters).copied(),
            consumption,
            consumption_header: consumption.map(|idx| headers[idx].trim().to_string()),
        })
    }

    pub fn schema_version(&self) -> SchemaVersion {
        if self.connected_meters.is_some() {
            SchemaVersion::Connected
        } else if self.total_meters.is_some() || self.consumption.is_some() {
            SchemaVersion::Metered
        } else {
            SchemaVersion::CountOnly
        }
    }
}

/// Normalizes a raw sheet. Header and period failures abort the whole
/// sheet; malformed count cells become zero.
pub fn normalize(sheet: &RawSheet, sentinel: &str) -> Result<Survey, IngestError> {
    let header_idx = locate_header(&sheet.rows, sentinel)?;
    let columns = ColumnMap::resolve(&sheet.rows[header_idx])?;
    let version = columns.schema_version();
    let unit = columns
        .consumption_header
        .as_deref()
        .map(ConsumptionUnit::from_header)
        .unwrap_or(ConsumptionUnit::Unspecified);

    let mut records = Vec::new();
    let mut coerced = 0usize;

    for (idx, row) in sheet.rows.iter().enumerate().skip(header_idx + 1) {
        if row.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        let cell = |col: usize| row.get(col).map(|c| c.trim()).unwrap_or_default();
        let optional = |col: Option<usize>| col.map(cell).filter(|c| !c.is_empty());

        let period = parse_period(cell(columns.period)).map_err(|source| IngestError::Format {
            row: idx + 1,
            source,
        })?;

        let mut count = |raw: &str| {
            if !raw.is_empty() && coerce_number(raw).is_none() {
                coerced += 1;
            }
            coerce_count(raw)
        };
        let appliance_count = count(cell(columns.appliance_count));
        let total_meter_count = optional(columns.total_meters).map(&mut count);
        let connected_meter_count = optional(columns.connected_meters).map(&mut count);
        let consumption = optional(columns.consumption).map(|raw| {
            coerce_number(raw).filter(|num| *num >= 0.).unwrap_or_else(|| {
                coerced += 1;
                0.
            })
        });

        records.push(CanonicalRecord {
            period,
            usage_type: cell(columns.usage_type).to_string(),
            product_type: cell(columns.product_type).to_string(),
            district: cell(columns.district).to_string(),
            appliance_count,
            total_meter_count,
            connected_meter_count,
            consumption,
        });
    }

    if coerced > 0 {
        warn!("{coerced} malformed numeric cells were read as zero");
    }
    info!(
        "normalized {} records ({version:?}, consumption unit {unit:?})",
        records.len()
    );

    Ok(Survey {
        version,
        unit,
        records,
    })
}

/// Reads and normalizes a survey file.
pub fn load_survey(path: &Path, sentinel: &str) -> anyhow::Result<Survey> {
    let sheet = RawSheet::from_path(path)
        .with_context(|| format!("failed to read survey {}", path.display()))?;
    normalize(&sheet, sentinel).with_context(|| format!("failed to ingest {}", path.display()))
}

/// Writes any serializable table to csv, one row per element.
pub fn write_csv<T: Serialize>(output: &Path, rows: &[T]) -> anyhow::Result<()> {
    let mut out_csv = csv::Writer::from_path(output)
        .with_context(|| format!("failed to create {}", output.display()))?;
    for row in rows {
        out_csv.serialize(row)?;
    }
    out_csv.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet(csv_text: &str) -> RawSheet {
        RawSheet::from_csv_reader(csv_text.as_bytes()).unwrap()
    }

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn spreadsheet_cells_stringify_like_csv() {
        assert_eq!(cell_to_string(&Data::Float(201501.0)), "201501");
        assert_eq!(cell_to_string(&Data::Float(12.5)), "12.5");
        assert_eq!(cell_to_string(&Data::Int(42)), "42");
        assert_eq!(cell_to_string(&Data::Empty), "");
        assert_eq!(cell_to_string(&Data::String("중구".to_string())), "중구");
    }

    #[test]
    fn parses_period_codes() {
        assert_eq!(parse_period("201501").unwrap(), Period { year: 2015, month: 1 });
        assert_eq!(parse_period("202412").unwrap(), Period { year: 2024, month: 12 });
        assert_eq!(parse_period(" 201907 ").unwrap(), Period { year: 2019, month: 7 });
    }

    #[test]
    fn strips_float_artifact() {
        assert_eq!(parse_period("201501.0").unwrap(), parse_period("201501").unwrap());
    }

    #[test]
    fn pads_single_digit_month() {
        assert_eq!(parse_period("20153").unwrap(), Period { year: 2015, month: 3 });
    }

    #[test]
    fn rejects_non_numeric_year() {
        assert!(matches!(parse_period("합계"), Err(FormatError::Year { .. })));
        assert!(matches!(parse_period("20a501"), Err(FormatError::Year { .. })));
        assert!(matches!(parse_period("201"), Err(FormatError::Year { .. })));
    }

    #[test]
    fn rejects_bad_month() {
        assert!(matches!(parse_period("2015"), Err(FormatError::Month { .. })));
        assert!(matches!(parse_period("201513"), Err(FormatError::Month { .. })));
        assert!(matches!(parse_period("201500"), Err(FormatError::Month { .. })));
    }

    #[test]
    fn coerces_counts() {
        assert_eq!(coerce_count("1,234"), 1234);
        assert_eq!(coerce_count("1234"), 1234);
        assert_eq!(coerce_count(&coerce_count("987").to_string()), 987);
        assert_eq!(coerce_count("12.0"), 12);
        assert_eq!(coerce_count("n/a"), 0);
        assert_eq!(coerce_count(""), 0);
        assert_eq!(coerce_count("-5"), 0);
    }

    #[test]
    fn locates_header_after_title_rows() {
        let rows = sheet("가스레인지 현황,,\n,,\n 년월 ,용도,시군구\n201501,단독,중구\n").rows;
        assert_eq!(locate_header(&rows, "년월").unwrap(), 2);
    }

    #[test]
    fn missing_header_is_fatal() {
        let rows = sheet("a,b\n1,2\n").rows;
        let err = locate_header(&rows, "년월").unwrap_err();
        assert!(matches!(err, SchemaError::HeaderNotFound { rows: 2, .. }));
    }

    #[test]
    fn resolves_exact_then_patterns() {
        let cols = headers(&["년월", "Total Billed Count", "billed"]);
        assert_eq!(resolve_column(&cols, "년월", &[]), Some(0));
        assert_eq!(
            resolve_column(&cols, "total_count", &[&["total", "billed", "count"]]),
            Some(1)
        );
        assert_eq!(resolve_column(&cols, "x", &[&["missing"]]), None);
    }

    #[test]
    fn meter_columns_are_not_claimed_by_appliance_count() {
        let cols = headers(&[
            "년월",
            "용도",
            "상품",
            "시군구",
            "가스레인지수",
            "가스레인지 연결 계량기수",
            "전체 계량기수",
            "사용량(MJ)",
        ]);
        let map = ColumnMap::resolve(&cols).unwrap();
        assert_eq!(map.appliance_count, 4);
        assert_eq!(map.connected_meters, Some(5));
        assert_eq!(map.total_meters, Some(6));
        assert_eq!(map.consumption, Some(7));
        assert_eq!(map.schema_version(), SchemaVersion::Connected);
    }

    #[test]
    fn missing_required_column_names_field() {
        let cols = headers(&["년월", "용도", "상품", "가스레인지 수"]);
        let err = ColumnMap::resolve(&cols).unwrap_err();
        assert!(matches!(err, SchemaError::MissingColumn { field: "district", .. }));
    }

    #[test]
    fn normalizes_count_only_sheet() {
        let raw = sheet(
            "월별 가스레인지,,,,\n\
             년월,용도,상품,시군구,가스레인지 수\n\
             201501.0,단독주택,취사용,중구,\"1,000\"\n\
             ,,,,\n\
             201502,공동주택,취사용,동구,???\n",
        );
        let survey = normalize(&raw, DEFAULT_SENTINEL).unwrap();
        assert_eq!(survey.version, SchemaVersion::CountOnly);
        assert_eq!(survey.records.len(), 2);
        assert_eq!(survey.records[0].appliance_count, 1000);
        assert_eq!(survey.records[0].period, Period { year: 2015, month: 1 });
        assert_eq!(survey.records[1].appliance_count, 0);
        assert_eq!(survey.records[1].total_meter_count, None);
        assert_eq!(survey.records[1].consumption, None);
    }

    #[test]
    fn empty_optional_cells_stay_undefined() {
        let raw = sheet(
            "년월,용도,상품,시군구,가스레인지 수,전체 계량기 수,사용량(㎥)\n\
             201501,단독주택,취사용,중구,10,,\n\
             201501,단독주택,취사용,동구,10,20,oops\n",
        );
        let survey = normalize(&raw, DEFAULT_SENTINEL).unwrap();
        assert_eq!(survey.version, SchemaVersion::Metered);
        assert_eq!(survey.unit, ConsumptionUnit::CubicMeter);
        assert_eq!(survey.records[0].total_meter_count, None);
        assert_eq!(survey.records[0].consumption, None);
        assert_eq!(survey.records[1].total_meter_count, Some(20));
        assert_eq!(survey.records[1].consumption, Some(0.));
    }

    #[test]
    fn bad_period_aborts_sheet() {
        let raw = sheet(
            "년월,용도,상품,시군구,가스레인지 수\n\
             201501,단독주택,취사용,중구,1\n\
             합계,,,,1\n",
        );
        let err = normalize(&raw, DEFAULT_SENTINEL).unwrap_err();
        assert!(matches!(err, IngestError::Format { row: 3, .. }));
    }
}
