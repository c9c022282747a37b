//! ### Model
//! Canonical records produced by the `convert` module and consumed by
//! `compute` and `boundary`.

use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;

/// A calendar month taken from a `YYYYMM` billing code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(into = "String")]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn first_day(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}{:02}", self.year, self.month)
    }
}

impl From<Period> for String {
    fn from(period: Period) -> Self {
        period.to_string()
    }
}

/// One row per (period, usage type, product type, district).
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CanonicalRecord {
    pub period: Period,
    pub usage_type: String,
    pub product_type: String,
    pub district: String,
    pub appliance_count: u64,
    pub total_meter_count: Option<u64>,
    pub connected_meter_count: Option<u64>,
    pub consumption: Option<f64>,
}

impl CanonicalRecord {
    pub fn year(&self) -> i32 {
        self.period.year
    }
}

/// Which generation of the survey layout a sheet follows, judged by
/// the optional columns it carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SchemaVersion {
    /// Gas-range counts only.
    CountOnly,
    /// Adds total billed meters and/or consumption.
    Metered,
    /// Adds a direct connected-to-gas-range meter count.
    Connected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ConsumptionUnit {
    CubicMeter,
    Megajoule,
    Unspecified,
}

impl ConsumptionUnit {
    /// Reads the unit hint out of a consumption column header.
    pub fn from_header(header: &str) -> Self {
        let lower = header.to_lowercase();
        if lower.contains("mj") {
            ConsumptionUnit::Megajoule
        } else if lower.contains("m3") || lower.contains('㎥') || lower.contains("m³") {
            ConsumptionUnit::CubicMeter
        } else {
            ConsumptionUnit::Unspecified
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConsumptionUnit::CubicMeter => "m³",
            ConsumptionUnit::Megajoule => "MJ",
            ConsumptionUnit::Unspecified => "",
        }
    }
}

/// Normalized contents of one survey file. Never mutated after ingestion.
#[derive(Clone, Debug)]
pub struct Survey {
    pub version: SchemaVersion,
    pub unit: ConsumptionUnit,
    pub records: Vec<CanonicalRecord>,
}

impl Survey {
    /// Distinct years in ascending order.
    pub fn years(&self) -> Vec<i32> {
        let mut years: Vec<i32> = self.records.iter().map(CanonicalRecord::year).collect();
        years.sort_unstable();
        years.dedup();
        years
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_displays_as_code() {
        let period = Period { year: 2015, month: 3 };
        assert_eq!(period.to_string(), "201503");
        assert_eq!(period.first_day(), NaiveDate::from_ymd_opt(2015, 3, 1));
    }

    #[test]
    fn records_serialize_period_as_code() {
        let record = CanonicalRecord {
            period: Period { year: 2024, month: 1 },
            usage_type: "단독주택".to_string(),
            product_type: "취사용".to_string(),
            district: "중구".to_string(),
            appliance_count: 400,
            total_meter_count: None,
            connected_meter_count: Some(380),
            consumption: None,
        };
        let mut writer = csv::Writer::from_writer(vec![]);
        writer.serialize(&record).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert_eq!(text.lines().nth(1), Some("202401,단독주택,취사용,중구,400,,380,"));
    }

    #[test]
    fn periods_order_chronologically() {
        let dec = Period { year: 2015, month: 12 };
        let jan = Period { year: 2016, month: 1 };
        assert!(dec < jan);
    }

    #[test]
    fn unit_from_header() {
        assert_eq!(ConsumptionUnit::from_header("사용량(MJ)"), ConsumptionUnit::Megajoule);
        assert_eq!(ConsumptionUnit::from_header("사용량(㎥)"), ConsumptionUnit::CubicMeter);
        assert_eq!(ConsumptionUnit::from_header("사용량"), ConsumptionUnit::Unspecified);
    }
}
