use clap::Parser;
use gas_range_analysis::{
    boundary::{self, BoundarySet, GeoJoin},
    cache::DataCache,
    compute::{Compute, DistrictDecrease, EstimateLevel},
    config::AnalysisConfig,
    convert,
    graph::Graphing,
    model::Survey,
};
use log::{info, warn};
use std::{
    path::{Path, PathBuf},
    rc::Rc,
};

#[derive(clap::Args, Debug)]
struct AnalysisArgs {
    /// TOML file with the header sentinel, years, filters and target districts
    #[clap(long)]
    config: Option<PathBuf>,

    /// Year the decrease is measured from. Defaults to the first year surveyed.
    #[clap(long)]
    base_year: Option<i32>,

    /// Year the decrease is measured to. Defaults to the last year surveyed.
    #[clap(long)]
    compare_year: Option<i32>,

    /// Only count these usage types (repeatable)
    #[clap(long = "usage")]
    usage_types: Vec<String>,

    /// Only count these product types (repeatable)
    #[clap(long = "product")]
    product_types: Vec<String>,

    /// Only count these districts (repeatable). The pivot and map always
    /// report every target district.
    #[clap(long = "district")]
    districts: Vec<String>,
}

impl AnalysisArgs {
    fn config(&self) -> anyhow::Result<AnalysisConfig> {
        let mut config = match &self.config {
            Some(path) => AnalysisConfig::load(path)?,
            None => AnalysisConfig::default(),
        };
        if self.base_year.is_some() {
            config.base_year = self.base_year;
        }
        if self.compare_year.is_some() {
            config.compare_year = self.compare_year;
        }
        if !self.usage_types.is_empty() {
            config.filters.usage_types = self.usage_types.clone();
        }
        if !self.product_types.is_empty() {
            config.filters.product_types = self.product_types.clone();
        }
        if !self.districts.is_empty() {
            config.filters.districts = self.districts.clone();
        }
        Ok(config)
    }
}

#[derive(clap::Parser, Debug)]
enum Args {
    /// Normalizes a raw survey spreadsheet (xlsx/xls/ods/csv) into a
    /// canonical csv with one row per period, usage, product and district.
    // cargo run parse-survey data/gas_range.xlsx results/records.csv
    ParseSurvey {
        /// Survey spreadsheet (xlsx, xls, xlsb, ods or csv)
        survey: PathBuf,
        /// Where the output csv will be written
        csv_out: PathBuf,
        #[clap(flatten)]
        analysis: AnalysisArgs,
    },

    /// Writes the yearly summary: annual totals, monthly averages and
    /// change against the prior year and the base year.
    // cargo run write-summary data/gas_range.xlsx results/summary.csv --base-year 2015
    WriteSummary {
        /// Survey spreadsheet (xlsx, xls, xlsb, ods or csv)
        survey: PathBuf,
        /// Where the output csv will be written
        csv_out: PathBuf,
        #[clap(flatten)]
        analysis: AnalysisArgs,
    },

    /// Writes the base-vs-compare decrease for every target district. With
    /// --boundaries the geo_key column is resolved against the GeoJSON.
    // cargo run write-pivot data/gas_range.xlsx results/pivot.csv --boundaries data/daegu_gyeongsan_sgg.geojson
    WritePivot {
        /// Survey spreadsheet (xlsx, xls, xlsb, ods or csv)
        survey: PathBuf,
        /// Where the output csv will be written
        csv_out: PathBuf,
        /// District boundary GeoJSON used to resolve the geo_key column
        #[clap(long)]
        boundaries: Option<PathBuf>,
        #[clap(flatten)]
        analysis: AnalysisArgs,
    },

    /// Writes the induction adoption / usage decline estimate.
    // cargo run write-estimates data/gas_usage.xlsx results/estimates.csv --level year-district
    WriteEstimates {
        /// Survey spreadsheet (xlsx, xls, xlsb, ods or csv)
        survey: PathBuf,
        /// Where the output csv will be written
        csv_out: PathBuf,
        /// Grouping of the estimate rows
        #[clap(long, value_enum, default_value = "year")]
        level: EstimateLevel,
        #[clap(flatten)]
        analysis: AnalysisArgs,
    },

    /// Writes the boundary GeoJSON with pivot values merged into each
    /// matched feature's properties.
    // cargo run write-map data/gas_range.xlsx data/daegu_gyeongsan_sgg.geojson results/map.geojson
    WriteMap {
        /// Survey spreadsheet (xlsx, xls, xlsb, ods or csv)
        survey: PathBuf,
        /// District boundary GeoJSON FeatureCollection
        boundaries: PathBuf,
        /// Where the annotated GeoJSON will be written
        geojson_out: PathBuf,
        #[clap(flatten)]
        analysis: AnalysisArgs,
    },

    /// Writes every table and chart into a directory.
    // cargo run report data/gas_usage.xlsx results/ --boundaries data/daegu_gyeongsan_sgg.geojson
    Report {
        /// Survey spreadsheet (xlsx, xls, xlsb, ods or csv)
        survey: PathBuf,
        /// Directory the tables and charts are written into
        out_dir: PathBuf,
        /// District boundary GeoJSON used to resolve the geo_key column
        #[clap(long)]
        boundaries: Option<PathBuf>,
        #[clap(flatten)]
        analysis: AnalysisArgs,
    },

    /// Line chart of monthly gas-range totals.
    // cargo run graph-trend data/gas_range.xlsx results/trend.png
    GraphTrend {
        /// Survey spreadsheet (xlsx, xls, xlsb, ods or csv)
        survey: PathBuf,
        /// Where the output PNG file will be written
        output_png: PathBuf,
        #[clap(flatten)]
        analysis: AnalysisArgs,
    },

    /// Bar chart of the district decrease pivot.
    // cargo run graph-pivot data/gas_range.xlsx results/pivot.png
    GraphPivot {
        /// Survey spreadsheet (xlsx, xls, xlsb, ods or csv)
        survey: PathBuf,
        /// Where the output PNG file will be written
        output_png: PathBuf,
        #[clap(flatten)]
        analysis: AnalysisArgs,
    },

    /// Bar chart of the yearly estimated consumption decline.
    // cargo run graph-estimates data/gas_usage.xlsx results/estimates.png
    GraphEstimates {
        /// Survey spreadsheet (xlsx, xls, xlsb, ods or csv)
        survey: PathBuf,
        /// Where the output PNG file will be written
        output_png: PathBuf,
        #[clap(flatten)]
        analysis: AnalysisArgs,
    },

    /// Choropleth of the district decrease over the boundary polygons.
    // cargo run graph-map data/gas_range.xlsx data/daegu_gyeongsan_sgg.geojson results/map.png
    GraphMap {
        /// Survey spreadsheet (xlsx, xls, xlsb, ods or csv)
        survey: PathBuf,
        /// District boundary GeoJSON FeatureCollection
        boundaries: PathBuf,
        /// Where the output PNG file will be written
        output_png: PathBuf,
        #[clap(flatten)]
        analysis: AnalysisArgs,
    },
}

/// A loaded survey with its resolved parameters.
struct Analysis {
    survey: Rc<Survey>,
    config: AnalysisConfig,
    base_year: i32,
    compare_year: i32,
}

impl Analysis {
    fn load(cache: &mut DataCache, survey: &Path, args: &AnalysisArgs) -> anyhow::Result<Self> {
        let config = args.config()?;
        let survey = cache.survey(survey, &config.header_sentinel)?;
        let (base_year, compare_year) = config.resolve_years(&survey.years())?;
        info!("base year {base_year}, compare year {compare_year}");
        Ok(Self {
            survey,
            config,
            base_year,
            compare_year,
        })
    }

    fn compute(&self) -> Compute<'_> {
        Compute::new(&self.survey.records)
    }

    fn pivot(&self) -> Vec<DistrictDecrease> {
        self.compute().district_pivot(
            &self.config.filters,
            &self.config.target_districts,
            self.base_year,
            self.compare_year,
        )
    }

    /// Pivot with geo keys resolved against `boundaries`.
    fn joined_pivot(&self, boundaries: &BoundarySet) -> (Vec<DistrictDecrease>, GeoJoin) {
        let mut rows = self.pivot();
        let join = boundary::join_districts(boundaries, &self.config.target_districts);
        boundary::attach_geo_keys(&mut rows, &join);
        (rows, join)
    }

    fn pivot_title(&self) -> String {
        format!(
            "{} → {} gas range decrease by district",
            self.base_year, self.compare_year
        )
    }

    fn write_summary(&self, csv_out: &Path) -> anyhow::Result<()> {
        let summary = self
            .compute()
            .period_summary(&self.config.filters, self.base_year);
        if let Some(peak) = &summary.peak {
            info!(
                "peak {} ({}), {} is {:?}% from peak",
                peak.peak_year, peak.peak_total, peak.last_year, peak.decline_rate
            );
        }
        convert::write_csv(csv_out, &summary.years)
    }
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();

    let mut cache = DataCache::new();
    match Args::parse() {
        Args::ParseSurvey {
            survey,
            csv_out,
            analysis,
        } => {
            let analysis = Analysis::load(&mut cache, &survey, &analysis)?;
            convert::write_csv(&csv_out, &analysis.survey.records)?;
        }
        Args::WriteSummary {
            survey,
            csv_out,
            analysis,
        } => {
            Analysis::load(&mut cache, &survey, &analysis)?.write_summary(&csv_out)?;
        }
        Args::WritePivot {
            survey,
            csv_out,
            boundaries,
            analysis,
        } => {
            let analysis = Analysis::load(&mut cache, &survey, &analysis)?;
            let rows = pivot_rows(&mut cache, &analysis, boundaries.as_deref())?;
            convert::write_csv(&csv_out, &rows)?;
        }
        Args::WriteEstimates {
            survey,
            csv_out,
            level,
            analysis,
        } => {
            let analysis = Analysis::load(&mut cache, &survey, &analysis)?;
            let rows = analysis.compute().estimate(&analysis.config.filters, level);
            convert::write_csv(&csv_out, &rows)?;
        }
        Args::WriteMap {
            survey,
            boundaries,
            geojson_out,
            analysis,
        } => {
            let analysis = Analysis::load(&mut cache, &survey, &analysis)?;
            let boundaries = cache.boundaries(&boundaries)?;
            let (rows, join) = analysis.joined_pivot(&boundaries);
            boundary::write_annotated(&geojson_out, boundary::annotate(&boundaries, &join, &rows))?;
        }
        Args::Report {
            survey,
            out_dir,
            boundaries,
            analysis,
        } => {
            let analysis = Analysis::load(&mut cache, &survey, &analysis)?;
            write_report(&mut cache, &analysis, &out_dir, boundaries.as_deref())?;
        }
        Args::GraphTrend {
            survey,
            output_png,
            analysis,
        } => {
            let analysis = Analysis::load(&mut cache, &survey, &analysis)?;
            let totals = analysis.compute().monthly_totals(&analysis.config.filters);
            Graphing::new(&output_png).monthly_trend(&totals, "Monthly gas ranges")?;
        }
        Args::GraphPivot {
            survey,
            output_png,
            analysis,
        } => {
            let analysis = Analysis::load(&mut cache, &survey, &analysis)?;
            Graphing::new(&output_png).district_decrease(&analysis.pivot(), &analysis.pivot_title())?;
        }
        Args::GraphEstimates {
            survey,
            output_png,
            analysis,
        } => {
            let analysis = Analysis::load(&mut cache, &survey, &analysis)?;
            let rows = analysis
                .compute()
                .estimate(&analysis.config.filters, EstimateLevel::Year);
            Graphing::new(&output_png).estimated_decline(&rows, analysis.survey.unit.label())?;
        }
        Args::GraphMap {
            survey,
            boundaries,
            output_png,
            analysis,
        } => {
            let analysis = Analysis::load(&mut cache, &survey, &analysis)?;
            let boundaries = cache.boundaries(&boundaries)?;
            let (rows, join) = analysis.joined_pivot(&boundaries);
            Graphing::new(&output_png).choropleth(&boundaries, &join, &rows, &analysis.pivot_title())?;
        }
    }
    Ok(())
}

/// The district pivot, with geo keys when a boundary file is given.
fn pivot_rows(
    cache: &mut DataCache,
    analysis: &Analysis,
    boundaries: Option<&Path>,
) -> anyhow::Result<Vec<DistrictDecrease>> {
    Ok(match boundaries {
        Some(path) => {
            let boundaries = cache.boundaries(path)?;
            analysis.joined_pivot(&boundaries).0
        }
        None => analysis.pivot(),
    })
}

fn write_report(
    cache: &mut DataCache,
    analysis: &Analysis,
    out_dir: &Path,
    boundaries: Option<&Path>,
) -> anyhow::Result<()> {
    std::fs::create_dir_all(out_dir)?;
    let filters = &analysis.config.filters;
    let compute = analysis.compute();

    analysis.write_summary(&out_dir.join("summary.csv"))?;
    for (level, name) in [
        (EstimateLevel::Year, "estimates_year.csv"),
        (EstimateLevel::YearDistrict, "estimates_district.csv"),
        (EstimateLevel::YearDistrictUsage, "estimates_district_usage.csv"),
    ] {
        convert::write_csv(&out_dir.join(name), &compute.estimate(filters, level))?;
    }

    let totals = compute.monthly_totals(filters);
    Graphing::new(&out_dir.join("trend.png")).monthly_trend(&totals, "Monthly gas ranges")?;

    let rows = match boundaries {
        Some(path) => {
            let boundaries = cache.boundaries(path)?;
            let (rows, join) = analysis.joined_pivot(&boundaries);
            boundary::write_annotated(
                &out_dir.join("map.geojson"),
                boundary::annotate(&boundaries, &join, &rows),
            )?;
            Graphing::new(&out_dir.join("map.png")).choropleth(
                &boundaries,
                &join,
                &rows,
                &analysis.pivot_title(),
            )?;
            rows
        }
        None => analysis.pivot(),
    };
    convert::write_csv(&out_dir.join("pivot.csv"), &rows)?;
    Graphing::new(&out_dir.join("pivot.png")).district_decrease(&rows, &analysis.pivot_title())?;

    let yearly = compute.estimate(filters, EstimateLevel::Year);
    if let Err(e) = Graphing::new(&out_dir.join("estimates.png"))
        .estimated_decline(&yearly, analysis.survey.unit.label())
    {
        warn!("skipping estimate chart: {e}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SURVEY: &str = "년월,용도,상품,시군구,가스레인지 수\n\
                          201501,단독주택,취사용,중구,1000\n\
                          202401,단독주택,취사용,중구,400\n";

    const BOUNDARIES: &str = r#"{"type": "FeatureCollection", "features": [
        {"type": "Feature", "properties": {"name": "중구 "},
         "geometry": {"type": "Polygon", "coordinates": [[[128.5, 35.8], [128.6, 35.8], [128.6, 35.9], [128.5, 35.8]]]}}
    ]}"#;

    fn scratch(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("gas_range_main_{}_{name}", std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn no_flags() -> AnalysisArgs {
        AnalysisArgs {
            config: None,
            base_year: None,
            compare_year: None,
            usage_types: Vec::new(),
            product_types: Vec::new(),
            districts: Vec::new(),
        }
    }

    #[test]
    fn pivot_rows_attach_geo_keys_from_boundary_file() {
        let survey = scratch("survey.csv", SURVEY);
        let boundaries = scratch("boundaries.geojson", BOUNDARIES);
        let mut cache = DataCache::new();
        let analysis = Analysis::load(&mut cache, &survey, &no_flags()).unwrap();

        let rows = pivot_rows(&mut cache, &analysis, Some(&boundaries)).unwrap();
        assert_eq!(rows[0].district, "중구");
        assert_eq!(rows[0].geo_key, "중구 ");
        assert_eq!(rows[0].decrease_amount, 600);

        let plain = pivot_rows(&mut cache, &analysis, None).unwrap();
        assert_eq!(plain[0].geo_key, "중구");
    }

    #[test]
    fn every_argument_has_help() {
        use clap::CommandFactory;

        let command = Args::command();
        command.clone().debug_assert();
        for sub in command.get_subcommands() {
            for arg in sub.get_arguments() {
                assert!(arg.get_help().is_some(), "{} {} has no help", sub.get_name(), arg.get_id());
            }
        }
    }

    #[test]
    fn flags_override_config() {
        let args = AnalysisArgs {
            base_year: Some(2018),
            usage_types: vec!["공동주택".to_string()],
            ..no_flags()
        };
        let config = args.config().unwrap();
        assert_eq!(config.base_year, Some(2018));
        assert_eq!(config.filters.usage_types, ["공동주택"]);
    }
}
