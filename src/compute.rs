//! ### Compute
//! Aggregations over canonical survey records: yearly trend summary,
//! district decrease pivot and the induction adoption / usage decline
//! estimate. Everything is recomputed from the records on each call.

use crate::model::{CanonicalRecord, Period};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Active selections. An empty list leaves that dimension unrestricted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Filters {
    pub usage_types: Vec<String>,
    pub product_types: Vec<String>,
    pub districts: Vec<String>,
}

impl Filters {
    pub fn matches(&self, record: &CanonicalRecord) -> bool {
        allows(&self.usage_types, &record.usage_type)
            && allows(&self.product_types, &record.product_type)
            && allows(&self.districts, &record.district)
    }

    /// The same selection with the district filter dropped.
    pub fn without_districts(&self) -> Self {
        Self {
            districts: Vec::new(),
            ..self.clone()
        }
    }
}

fn allows(selected: &[String], value: &str) -> bool {
    selected.is_empty() || selected.iter().any(|s| s.trim() == value.trim())
}

fn round1(value: f64) -> f64 {
    (value * 10.).round() / 10.
}

/// `delta / base * 100` to one decimal, undefined for a zero base.
fn percent(delta: f64, base: f64) -> Option<f64> {
    (base != 0.).then(|| round1(delta / base * 100.))
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct YearSummary {
    pub year: i32,
    pub annual_total: u64,
    pub months: usize,
    pub monthly_average: f64,
    pub prior_year_delta: Option<f64>,
    pub prior_year_rate: Option<f64>,
    pub baseline_delta: Option<f64>,
    pub baseline_rate: Option<f64>,
}

/// Advisory figures for presentation only.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PeakDecline {
    pub peak_year: i32,
    pub peak_total: u64,
    pub last_year: i32,
    pub last_total: u64,
    pub decline_rate: Option<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PeriodSummary {
    pub base_year: i32,
    pub years: Vec<YearSummary>,
    pub peak: Option<PeakDecline>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DistrictDecrease {
    pub district: String,
    pub geo_key: String,
    pub base_year: i32,
    pub compare_year: i32,
    pub base_value: u64,
    pub compare_value: u64,
    pub decrease_amount: i64,
    pub decrease_rate: Option<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum EstimateLevel {
    Year,
    YearDistrict,
    YearDistrictUsage,
}

/// Which figure stood in for "units that still have a gas range".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Denominator {
    ConnectedMeters,
    ApplianceCount,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EstimateRow {
    pub year: i32,
    pub district: Option<String>,
    pub usage_type: Option<String>,
    pub appliance_count: u64,
    pub total_meter_count: Option<u64>,
    pub denominator: u64,
    pub denominator_source: Denominator,
    pub estimated_non_gas_units: Option<u64>,
    pub consumption: Option<f64>,
    pub gas_unit_average_consumption: Option<f64>,
    pub hypothetical_all_gas_consumption: Option<f64>,
    pub estimated_consumption_decline: Option<f64>,
    pub decline_rate: Option<f64>,
}

#[derive(Default)]
struct Tally {
    appliance: u64,
    total: Option<u64>,
    connected: Option<u64>,
    consumption: Option<f64>,
}

impl Tally {
    fn add(&mut self, record: &CanonicalRecord) {
        self.appliance += record.appliance_count;
        if let Some(total) = record.total_meter_count {
            *self.total.get_or_insert(0) += total;
        }
        if let Some(connected) = record.connected_meter_count {
            *self.connected.get_or_insert(0) += connected;
        }
        if let Some(consumption) = record.consumption {
            *self.consumption.get_or_insert(0.) += consumption;
        }
    }
}

impl EstimateRow {
    fn from_tally(
        year: i32,
        district: Option<String>,
        usage_type: Option<String>,
        tally: &Tally,
    ) -> Self {
        // Newer sheets report connected meters directly; older ones only
        // have the gas-range count, which stands in for it.
        let (denominator, denominator_source) = match tally.connected {
            Some(connected) => (connected, Denominator::ConnectedMeters),
            None => (tally.appliance, Denominator::ApplianceCount),
        };

        let estimated_non_gas_units = tally.total.map(|total| total.saturating_sub(denominator));
        let gas_unit_average_consumption = match (tally.consumption, tally.total, estimated_non_gas_units) {
            (Some(consumption), Some(total), Some(non_gas)) if total > non_gas => {
                Some(consumption / (total - non_gas) as f64)
            }
            _ => None,
        };
        let hypothetical_all_gas_consumption = gas_unit_average_consumption
            .zip(tally.total)
            .map(|(avg, total)| avg * total as f64);
        let estimated_consumption_decline = hypothetical_all_gas_consumption
            .zip(tally.consumption)
            .map(|(hypothetical, measured)| (hypothetical - measured).max(0.));
        let decline_rate = estimated_consumption_decline
            .zip(tally.consumption)
            .and_then(|(decline, measured)| (measured > 0.).then(|| decline / measured * 100.));

        Self {
            year,
            district,
            usage_type,
            appliance_count: tally.appliance,
            total_meter_count: tally.total,
            denominator,
            denominator_source,
            estimated_non_gas_units,
            consumption: tally.consumption,
            gas_unit_average_consumption,
            hypothetical_all_gas_consumption,
            estimated_consumption_decline,
            decline_rate,
        }
    }
}

pub struct Compute<'a> {
    records: &'a [CanonicalRecord],
}

impl<'a> Compute<'a> {
    pub fn new(records: &'a [CanonicalRecord]) -> Self {
        Self { records }
    }

    fn filtered<'f>(&self, filters: &'f Filters) -> impl Iterator<Item = &'a CanonicalRecord> + 'f
    where
        'a: 'f,
    {
        self.records.iter().filter(move |record| filters.matches(record))
    }

    /// Gas-range totals per period, in period order.
    pub fn monthly_totals(&self, filters: &Filters) -> Vec<(Period, u64)> {
        let mut totals = BTreeMap::new();
        for record in self.filtered(filters) {
            *totals.entry(record.period).or_insert(0) += record.appliance_count;
        }
        totals.into_iter().collect()
    }

    pub fn period_summary(&self, filters: &Filters, base_year: i32) -> PeriodSummary {
        let mut by_year: BTreeMap<i32, (u64, usize)> = BTreeMap::new();
        for (period, total) in self.monthly_totals(filters) {
            let entry = by_year.entry(period.year).or_default();
            entry.0 += total;
            entry.1 += 1;
        }
        let averages: HashMap<i32, f64> = by_year
            .iter()
            .map(|(&year, &(total, months))| (year, total as f64 / months as f64))
            .collect();
        let baseline = averages.get(&base_year).copied();

        let years: Vec<YearSummary> = by_year
            .iter()
            .map(|(&year, &(annual_total, months))| {
                let monthly_average = annual_total as f64 / months as f64;
                let prior = averages.get(&(year - 1)).copied();
                YearSummary {
                    year,
                    annual_total,
                    months,
                    monthly_average,
                    prior_year_delta: prior.map(|prior| monthly_average - prior),
                    prior_year_rate: prior.and_then(|prior| percent(monthly_average - prior, prior)),
                    baseline_delta: baseline.map(|base| monthly_average - base),
                    baseline_rate: baseline.and_then(|base| percent(monthly_average - base, base)),
                }
            })
            .collect();

        let peak = years
            .iter()
            .reduce(|best, year| if year.annual_total > best.annual_total { year } else { best })
            .zip(years.last())
            .map(|(peak, last)| PeakDecline {
                peak_year: peak.year,
                peak_total: peak.annual_total,
                last_year: last.year,
                last_total: last.annual_total,
                decline_rate: (peak.annual_total > 0)
                    .then(|| round1((last.annual_total as f64 / peak.annual_total as f64 - 1.) * 100.)),
            });

        PeriodSummary {
            base_year,
            years,
            peak,
        }
    }

    /// One row per target district, in target order. The district filter
    /// is ignored here; missing district/year pairs count as zero.
    pub fn district_pivot(
        &self,
        filters: &Filters,
        targets: &[String],
        base_year: i32,
        compare_year: i32,
    ) -> Vec<DistrictDecrease> {
        let scope = filters.without_districts();
        let mut sums: HashMap<(&str, i32), u64> = HashMap::new();
        for record in self.filtered(&scope) {
            *sums.entry((record.district.trim(), record.year())).or_insert(0) += record.appliance_count;
        }

        targets
            .iter()
            .map(|district| {
                let key = district.trim();
                let base_value = sums.get(&(key, base_year)).copied().unwrap_or(0);
                let compare_value = sums.get(&(key, compare_year)).copied().unwrap_or(0);
                let decrease_amount = base_value as i64 - compare_value as i64;
                DistrictDecrease {
                    district: district.clone(),
                    geo_key: district.clone(),
                    base_year,
                    compare_year,
                    base_value,
                    compare_value,
                    decrease_amount,
                    decrease_rate: percent(decrease_amount as f64, base_value as f64),
                }
            })
            .collect()
    }

    /// Adoption and usage-decline estimate, grouped at `level`.
    pub fn estimate(&self, filters: &Filters, level: EstimateLevel) -> Vec<EstimateRow> {
        let mut groups: BTreeMap<(i32, Option<&str>, Option<&str>), Tally> = BTreeMap::new();
        for record in self.filtered(filters) {
            let district = record.district.trim();
            let usage = record.usage_type.trim();
            let key = match level {
                EstimateLevel::Year => (record.year(), None, None),
                EstimateLevel::YearDistrict => (record.year(), Some(district), None),
                EstimateLevel::YearDistrictUsage => (record.year(), Some(district), Some(usage)),
            };
            groups.entry(key).or_default().add(record);
        }

        groups
            .iter()
            .map(|(&(year, district, usage), tally)| {
                EstimateRow::from_tally(
                    year,
                    district.map(str::to_string),
                    usage.map(str::to_string),
                    tally,
                )
            })
            .collect()
    }
}
