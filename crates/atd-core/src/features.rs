use std::collections::{BTreeSet, HashMap};

use chrono::{Datelike, NaiveDateTime, Timelike};
use polars::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::columns::*;
use crate::config::PipelineConfig;
use crate::timestamps::column_datetimes;

const MICROS_PER_SECOND: f64 = 1_000_000.0;
const SECONDS_PER_MINUTE: f64 = 60.0;
/// Added to denominators that may be zero. Small denominators still produce
/// large ratios; only exact zero is avoided.
const DENOMINATOR_OFFSET: f64 = 0.01;
const LONG_DELIVERY_KM: f64 = 10.0;
const SHORT_TRIP_KM: f64 = 1.0;
const SHORT_TRIP_SLOW_ATD_MINUTES: f64 = 40.0;
const HIGH_TRAFFIC_KM: f64 = 3.0;
const HIGH_TRAFFIC_ATD_MINUTES: f64 = 45.0;
const SLOW_SPEED_KMH: f64 = 10.0;
const UNKNOWN_CATEGORY_CODE: i32 = -1;

/// Sorted distinct labels of one categorical column; a label's code is its
/// position in `labels`.
///
/// String columns sort lexically. Numeric columns sort by value, so `9` comes
/// before `10`; their labels are the values rendered as strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryEncoding {
    pub column: String,
    pub labels: Vec<String>,
}

impl CategoryEncoding {
    pub fn from_labels<'a>(column: &str, labels: impl IntoIterator<Item = &'a str>) -> Self {
        let distinct: BTreeSet<&str> = labels.into_iter().collect();
        Self {
            column: column.to_string(),
            labels: distinct.into_iter().map(str::to_string).collect(),
        }
    }

    /// Builds the dictionary of a numeric column from `(value, label)` pairs,
    /// ordered by value.
    pub fn from_numeric_labels<'a>(
        column: &str,
        values: impl IntoIterator<Item = (f64, &'a str)>,
    ) -> Self {
        let mut distinct: Vec<(f64, &str)> = values.into_iter().collect();
        distinct.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(b.1)));
        distinct.dedup_by(|a, b| a.1 == b.1);
        Self {
            column: column.to_string(),
            labels: distinct.into_iter().map(|(_, label)| label.to_string()).collect(),
        }
    }

    pub fn code(&self, label: &str) -> Option<i32> {
        self.labels
            .iter()
            .position(|candidate| candidate == label)
            .map(|idx| idx as i32)
    }

    pub fn encoded_column(&self) -> String {
        format!("{}_encoded", self.column)
    }
}

#[derive(Debug, Clone)]
pub struct FeatureResult {
    pub dataframe: DataFrame,
    pub encodings: Vec<CategoryEncoding>,
}

/// Adds every derived feature column to a batch whose timestamps have already
/// been normalized. Distances and `ATD` are coerced to `f64` in place.
///
/// Flags are `0`/`1` integers and are `0` whenever an operand is null. Ratios
/// that come out non-finite are null.
pub fn derive_features(
    observations: &DataFrame,
    config: &PipelineConfig,
) -> PolarsResult<FeatureResult> {
    let len = observations.height();

    let requested = column_datetimes(observations, EATER_REQUEST_TS)?;
    let offered = column_datetimes(observations, RESTAURANT_OFFERED_TS)?;
    let final_state = column_datetimes(observations, ORDER_FINAL_STATE_TS)?;

    let pickup = coerce_numeric(observations.column(PICKUP_DISTANCE)?.as_materialized_series())?;
    let dropoff = coerce_numeric(observations.column(DROPOFF_DISTANCE)?.as_materialized_series())?;
    let atd = coerce_numeric(observations.column(ATD)?.as_materialized_series())?;
    let pickup_values = pickup.f64()?;
    let dropoff_values = dropoff.f64()?;
    let atd_values = atd.f64()?;

    let courier_flow = observations.column(COURIER_FLOW)?.cast(&DataType::String)?;
    let courier_flow = courier_flow.str()?;

    let mut order_hour = Vec::with_capacity(len);
    let mut order_dayofweek = Vec::with_capacity(len);
    let mut order_weekend = Vec::with_capacity(len);
    let mut order_time_of_day: Vec<Option<&'static str>> = Vec::with_capacity(len);
    let mut delivery_duration = Vec::with_capacity(len);
    let mut preparation_minutes = Vec::with_capacity(len);
    let mut dispatch_delay = Vec::with_capacity(len);
    let mut delivery_hour = Vec::with_capacity(len);
    let mut total_distance = Vec::with_capacity(len);
    let mut distance_ratio = Vec::with_capacity(len);
    let mut long_delivery = Vec::with_capacity(len);
    let mut complexity = Vec::with_capacity(len);
    let mut peak_hour = Vec::with_capacity(len);
    let mut speed = Vec::with_capacity(len);
    let mut short_trip_long_time = Vec::with_capacity(len);
    let mut relative_prep = Vec::with_capacity(len);
    let mut high_traffic = Vec::with_capacity(len);
    let mut below_speed = Vec::with_capacity(len);

    for idx in 0..len {
        let request_ts = requested[idx];
        let offered_ts = offered[idx];
        let final_ts = final_state[idx];
        let pickup_km = pickup_values.get(idx);
        let dropoff_km = dropoff_values.get(idx);
        let atd_minutes = atd_values.get(idx);

        let hour = request_ts.map(|ts| ts.hour());
        let dayofweek = request_ts.map(|ts| ts.weekday().num_days_from_monday());
        order_hour.push(hour.map(|h| h as i32));
        order_dayofweek.push(dayofweek.map(|d| d as i32));
        order_weekend.push(flag(dayofweek.is_some_and(|d| d >= 5)));
        order_time_of_day.push(hour.map(time_of_day));

        delivery_duration.push(elapsed_seconds(offered_ts, final_ts));
        let prep = elapsed_seconds(request_ts, offered_ts).map(|s| s / SECONDS_PER_MINUTE);
        preparation_minutes.push(prep);
        let delay = elapsed_seconds(offered_ts, offered_ts).map(|s| s / SECONDS_PER_MINUTE);
        dispatch_delay.push(delay);
        delivery_hour.push(final_ts.map(|ts| ts.hour() as i32));

        let total = match (pickup_km, dropoff_km) {
            (Some(p), Some(d)) => Some(p + d),
            _ => None,
        };
        total_distance.push(total);
        distance_ratio.push(offset_ratio(pickup_km, dropoff_km));
        long_delivery.push(long_delivery_flag(dropoff_km));

        complexity.push(config.courier_flow.score(courier_flow.get(idx)));
        peak_hour.push(flag(hour.is_some_and(|h| config.peak_hours.is_peak(h))));

        let speed_kmh = estimated_speed_kmh(dropoff_km, atd_minutes);
        speed.push(speed_kmh);
        short_trip_long_time.push(flag(
            dropoff_km.is_some_and(|d| d < SHORT_TRIP_KM)
                && atd_minutes.is_some_and(|a| a > SHORT_TRIP_SLOW_ATD_MINUTES),
        ));
        relative_prep.push(offset_ratio(prep, atd_minutes));

        high_traffic.push(flag(
            total.is_some_and(|t| t < HIGH_TRAFFIC_KM)
                && atd_minutes.is_some_and(|a| a > HIGH_TRAFFIC_ATD_MINUTES),
        ));
        below_speed.push(flag(speed_kmh.is_some_and(|s| s < SLOW_SPEED_KMH)));
    }

    if len > 0 {
        warn!(
            column = DISPATCH_DELAY_MINUTES,
            "dispatch delay subtracts the offered timestamp from itself and is always zero"
        );
    }

    let mut output = observations.clone();
    output.with_column(pickup.clone())?;
    output.with_column(dropoff.clone())?;
    output.with_column(atd.clone())?;

    let mut derived = vec![
        Series::new(ORDER_HOUR.into(), order_hour),
        Series::new(ORDER_DAYOFWEEK.into(), order_dayofweek),
        Series::new(ORDER_WEEKEND.into(), order_weekend),
        Series::new(ORDER_TIME_OF_DAY.into(), order_time_of_day),
        Series::new(DELIVERY_DURATION_SECONDS.into(), delivery_duration),
        Series::new(PREPARATION_TIME_MINUTES.into(), preparation_minutes),
        Series::new(DISPATCH_DELAY_MINUTES.into(), dispatch_delay),
        Series::new(DELIVERY_HOUR.into(), delivery_hour),
        Series::new(TOTAL_DISTANCE_KM.into(), total_distance),
        Series::new(DISTANCE_RATIO.into(), distance_ratio),
        Series::new(LONG_DELIVERY_FLAG.into(), long_delivery),
    ];

    let mut encodings = Vec::with_capacity(CATEGORICAL_COLUMNS.len());
    for name in CATEGORICAL_COLUMNS {
        let (encoding, codes) = encode_category(observations, name)?;
        derived.push(codes);
        encodings.push(encoding);
    }

    derived.extend([
        Series::new(COURIER_FLOW_COMPLEXITY_SCORE.into(), complexity),
        Series::new(IS_PEAK_HOUR.into(), peak_hour),
        Series::new(ESTIMATED_SPEED_KMH.into(), speed),
        Series::new(IS_SHORT_TRIP_LONG_TIME.into(), short_trip_long_time),
        Series::new(RELATIVE_PREP_TIME.into(), relative_prep),
    ]);

    if config.extended_features {
        derived.extend([
            Series::new(IS_HIGH_TRAFFIC_SUSPECTED.into(), high_traffic),
            Series::new(SPEED_BELOW_THRESHOLD.into(), below_speed),
        ]);
    }

    for series in derived {
        output.with_column(series)?;
    }

    info!(
        rows = len,
        columns = output.width(),
        extended = config.extended_features,
        "derived delivery features"
    );

    Ok(FeatureResult {
        dataframe: output,
        encodings,
    })
}

/// Buckets an hour with the half-open edges `(-1,5] (5,11] (11,17] (17,21] (21,24]`.
pub fn time_of_day(hour: u32) -> &'static str {
    match hour {
        0..=5 => "night",
        6..=11 => "morning",
        12..=17 => "afternoon",
        18..=21 => "evening",
        _ => "night",
    }
}

pub fn long_delivery_flag(dropoff_km: Option<f64>) -> i32 {
    flag(dropoff_km.is_some_and(|d| d > LONG_DELIVERY_KM))
}

/// `dropoff / (ATD / 60)`; null when either side is null or the result is not
/// finite (e.g. `ATD == 0`).
pub fn estimated_speed_kmh(dropoff_km: Option<f64>, atd_minutes: Option<f64>) -> Option<f64> {
    match (dropoff_km, atd_minutes) {
        (Some(distance), Some(minutes)) => finite(distance / (minutes / SECONDS_PER_MINUTE)),
        _ => None,
    }
}

fn offset_ratio(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    match (numerator, denominator) {
        (Some(n), Some(d)) => finite(n / (d + DENOMINATOR_OFFSET)),
        _ => None,
    }
}

fn elapsed_seconds(from: Option<NaiveDateTime>, to: Option<NaiveDateTime>) -> Option<f64> {
    match (from, to) {
        (Some(start), Some(end)) => {
            let delta = end - start;
            delta
                .num_microseconds()
                .map(|micros| micros as f64 / MICROS_PER_SECOND)
        }
        _ => None,
    }
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

fn flag(condition: bool) -> i32 {
    i32::from(condition)
}

/// Coerces a column to `f64`. Strings that do not parse as numbers, and NaN,
/// become null.
pub fn coerce_numeric(series: &Series) -> PolarsResult<Series> {
    let values: Vec<Option<f64>> = match series.dtype() {
        DataType::String => series
            .str()?
            .into_iter()
            .map(|value| value.and_then(parse_number))
            .collect(),
        _ => {
            let cast = series.cast(&DataType::Float64)?;
            let floats = cast.f64()?;
            floats
                .into_iter()
                .map(|value| value.filter(|v| !v.is_nan()))
                .collect()
        }
    };
    Ok(Series::new(series.name().clone(), values))
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| !v.is_nan())
}

fn encode_category(
    observations: &DataFrame,
    name: &str,
) -> PolarsResult<(CategoryEncoding, Series)> {
    let column = observations.column(name)?;
    let labels = column.cast(&DataType::String)?;
    let labels = labels.str()?;

    let encoding = if is_numeric(column.dtype()) {
        let values = column.cast(&DataType::Float64)?;
        let values = values.f64()?;
        CategoryEncoding::from_numeric_labels(
            name,
            values
                .into_iter()
                .zip(labels.into_iter())
                .filter_map(|(value, label)| Some((value?, label?))),
        )
    } else {
        CategoryEncoding::from_labels(name, labels.into_iter().flatten())
    };

    let index: HashMap<&str, i32> = encoding
        .labels
        .iter()
        .enumerate()
        .map(|(code, label)| (label.as_str(), code as i32))
        .collect();
    let codes: Vec<i32> = labels
        .into_iter()
        .map(|label| {
            label
                .and_then(|label| index.get(label).copied())
                .unwrap_or(UNKNOWN_CATEGORY_CODE)
        })
        .collect();
    let series = Series::new(encoding.encoded_column().into(), codes);
    Ok((encoding, series))
}

fn is_numeric(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}
