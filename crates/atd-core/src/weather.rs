use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use polars::prelude::*;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::columns::{RAIN, RESTAURANT_OFFERED_TS, TEMP_MEAN, TERRITORY};
use crate::timestamps::column_datetimes;

#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("polars operation failed: {0}")]
    Polars(#[from] PolarsError),
    #[error("weather source {path} could not be loaded: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("{table} weather table repeats territory {territory:?} / {year_month}")]
    DuplicateKey {
        table: &'static str,
        territory: String,
        year_month: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct RainRow {
    pub territory: String,
    pub year_month: String,
    pub rain: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemperatureRow {
    pub territory: String,
    pub year_month: String,
    pub temp_mean: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WeatherAggregate {
    pub rain: Option<f64>,
    pub temp_mean: Option<f64>,
}

type WeatherKey = (String, String);

/// Monthly per-territory weather keyed by `(territory, "YYYY-MM")`.
#[derive(Debug, Clone, Default)]
pub struct WeatherTables {
    aggregates: HashMap<WeatherKey, WeatherAggregate>,
}

impl WeatherTables {
    /// Merges the rain and temperature tables. Each table may hold at most one
    /// row per key.
    pub fn from_rows(
        rain: Vec<RainRow>,
        temperature: Vec<TemperatureRow>,
    ) -> Result<Self, WeatherError> {
        let mut aggregates: HashMap<WeatherKey, WeatherAggregate> = HashMap::new();

        let mut seen: HashSet<WeatherKey> = HashSet::with_capacity(rain.len());
        for row in rain {
            let key = (row.territory, row.year_month);
            if !seen.insert(key.clone()) {
                return Err(duplicate("rain", key));
            }
            aggregates.entry(key).or_default().rain = row.rain;
        }

        let mut seen: HashSet<WeatherKey> = HashSet::with_capacity(temperature.len());
        for row in temperature {
            let key = (row.territory, row.year_month);
            if !seen.insert(key.clone()) {
                return Err(duplicate("temperature", key));
            }
            aggregates.entry(key).or_default().temp_mean = row.temp_mean;
        }

        Ok(Self { aggregates })
    }

    pub fn get(&self, territory: &str, year_month: &str) -> Option<&WeatherAggregate> {
        self.aggregates
            .get(&(territory.to_string(), year_month.to_string()))
    }

    pub fn len(&self) -> usize {
        self.aggregates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aggregates.is_empty()
    }
}

fn duplicate(table: &'static str, (territory, year_month): WeatherKey) -> WeatherError {
    WeatherError::DuplicateKey {
        table,
        territory,
        year_month,
    }
}

/// Loads the rain and temperature aggregates from delimited files with headers
/// `territory,year_month,rain` and `territory,year_month,temp_mean`.
pub fn load_weather(
    rain_path: impl AsRef<Path>,
    temp_path: impl AsRef<Path>,
) -> Result<WeatherTables, WeatherError> {
    let rain: Vec<RainRow> = read_rows(rain_path.as_ref())?;
    let temperature: Vec<TemperatureRow> = read_rows(temp_path.as_ref())?;
    let tables = WeatherTables::from_rows(rain, temperature)?;
    info!(keys = tables.len(), "loaded weather aggregates");
    Ok(tables)
}

fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, WeatherError> {
    let unreadable = |source| WeatherError::Unreadable {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(unreadable)?;
    let rows = reader
        .deserialize()
        .collect::<Result<Vec<T>, csv::Error>>()
        .map_err(unreadable)?;
    debug!(path = %path.display(), rows = rows.len(), "read weather source");
    Ok(rows)
}

/// Join key for a timestamp: its calendar year and month as `YYYY-MM`.
pub fn year_month(timestamp: NaiveDateTime) -> String {
    timestamp.format("%Y-%m").to_string()
}

#[derive(Debug, Clone)]
pub struct WeatherEnrichment {
    pub dataframe: DataFrame,
    pub matched_rows: usize,
}

/// Left-joins `rain` and `temp_mean` on `(territory, year-month of the offered
/// timestamp)`. Rows without a match keep null weather; the row count never
/// changes and the join key is not added to the output.
pub fn enrich_with_weather(
    observations: &DataFrame,
    weather: &WeatherTables,
) -> PolarsResult<WeatherEnrichment> {
    let len = observations.height();
    let territories = observations.column(TERRITORY)?.cast(&DataType::String)?;
    let territories = territories.str()?;
    let offered = column_datetimes(observations, RESTAURANT_OFFERED_TS)?;

    let mut rain = Vec::with_capacity(len);
    let mut temp_mean = Vec::with_capacity(len);
    let mut matched_rows = 0usize;

    for (idx, offered_ts) in offered.iter().enumerate() {
        let aggregate = match (territories.get(idx), offered_ts) {
            (Some(territory), Some(ts)) => weather.get(territory, &year_month(*ts)),
            _ => None,
        };
        match aggregate {
            Some(found) => {
                matched_rows += 1;
                rain.push(found.rain);
                temp_mean.push(found.temp_mean);
            }
            None => {
                rain.push(None);
                temp_mean.push(None);
            }
        }
    }

    let mut output = observations.clone();
    output.with_column(Series::new(RAIN.into(), rain))?;
    output.with_column(Series::new(TEMP_MEAN.into(), temp_mean))?;

    if matched_rows < len {
        warn!(
            unmatched = len - matched_rows,
            rows = len,
            "rows without a weather aggregate keep null rain/temp_mean"
        );
    }
    info!(rows = len, matched = matched_rows, "joined weather aggregates");

    Ok(WeatherEnrichment {
        dataframe: output,
        matched_rows,
    })
}
