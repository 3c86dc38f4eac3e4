//! Batch KPIs over an enriched table: the numbers behind the delivery
//! performance dashboard, without any rendering.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Days, NaiveDate, NaiveDateTime, TimeDelta};
use polars::prelude::*;
use serde::Serialize;

use crate::columns::{
    ATD, CATEGORICAL_COLUMNS, DRIVER_UUID, EATER_REQUEST_TS, IS_PEAK_HOUR, LONG_DELIVERY_FLAG,
    ORDER_DAYOFWEEK, ORDER_HOUR, ORDER_TIME_OF_DAY, ORDER_WEEKEND, TOTAL_DISTANCE_KM,
};
use crate::timestamps::column_datetimes;

pub const DAY_NAMES: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Upper quantile used to cap the ATD distribution.
const ATD_CAP_QUANTILE: f64 = 0.99;

const PERIOD_KEY: &str = "report_period";
const LABEL_KEY: &str = "report_label";
const MEAN_ATD: &str = "mean_atd";
const ORDERS: &str = "orders";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Kpis {
    pub total_orders: usize,
    pub average_atd: Option<f64>,
    /// Distinct non-null `driver_uuid` values; `None` when the column is absent.
    pub unique_couriers: Option<usize>,
    /// Share of orders with `long_delivery_flag = 1`, in percent.
    pub long_delivery_pct: Option<f64>,
    pub average_total_distance_km: Option<f64>,
}

/// Bucket width of the ATD trends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendPeriod {
    /// Calendar weeks starting on Monday.
    #[default]
    Weekly,
    Daily,
}

impl TrendPeriod {
    /// First day of the period containing `timestamp`.
    pub fn start(self, timestamp: NaiveDateTime) -> Option<NaiveDate> {
        let date = timestamp.date();
        match self {
            Self::Daily => Some(date),
            Self::Weekly => {
                let offset = u64::from(date.weekday().num_days_from_monday());
                date.checked_sub_days(Days::new(offset))
            }
        }
    }
}

impl FromStr for TrendPeriod {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "weekly" => Ok(Self::Weekly),
            "daily" => Ok(Self::Daily),
            other => Err(format!("unknown period {other:?}; expected weekly or daily")),
        }
    }
}

impl fmt::Display for TrendPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Weekly => f.write_str("weekly"),
            Self::Daily => f.write_str("daily"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodMean {
    pub period: NaiveDate,
    pub mean_atd: f64,
    pub orders: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryPeriodMean {
    pub label: String,
    pub period: NaiveDate,
    pub mean_atd: f64,
    pub orders: usize,
}

/// ATD over time, split by the labels of one categorical column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryTrend {
    pub column: String,
    pub points: Vec<CategoryPeriodMean>,
}

/// Range of the ATD histogram: from the minimum up to the 99th percentile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AtdDistribution {
    pub min: f64,
    pub p99: f64,
    pub orders_within_cap: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupMean<K> {
    pub key: K,
    pub mean_atd: f64,
    pub orders: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub kpis: Kpis,
    pub period: TrendPeriod,
    pub time_trend: Vec<PeriodMean>,
    /// One entry per categorical column present in the batch.
    pub category_trends: Vec<CategoryTrend>,
    pub atd_distribution: Option<AtdDistribution>,
    pub by_order_hour: Vec<GroupMean<i32>>,
    pub by_dayofweek: Vec<GroupMean<i32>>,
    pub by_time_of_day: Vec<GroupMean<String>>,
    pub by_peak_hour: Vec<GroupMean<i32>>,
    pub by_weekend: Vec<GroupMean<i32>>,
}

/// Keeps orders whose request date falls within `[from, to]`, both inclusive
/// whole days. Rows with a null request timestamp are dropped when any bound is
/// given.
pub fn filter_by_request_date(
    enriched: &DataFrame,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> PolarsResult<DataFrame> {
    if from.is_none() && to.is_none() {
        return Ok(enriched.clone());
    }

    let start = from.and_then(|date| date.and_hms_opt(0, 0, 0));
    let end = to
        .and_then(|date| date.checked_add_days(Days::new(1)))
        .and_then(|date| date.and_hms_opt(0, 0, 0));

    let mask: BooleanChunked = column_datetimes(enriched, EATER_REQUEST_TS)?
        .into_iter()
        .map(|ts| {
            Some(ts.is_some_and(|ts| {
                start.is_none_or(|start| ts >= start) && end.is_none_or(|end| ts < end)
            }))
        })
        .collect();
    enriched.filter(&mask)
}

pub fn build_report(enriched: &DataFrame, period: TrendPeriod) -> PolarsResult<BatchReport> {
    let atd = enriched.column(ATD)?.cast(&DataType::Float64)?;
    let atd = atd.f64()?;
    let total_distance = enriched
        .column(TOTAL_DISTANCE_KM)?
        .cast(&DataType::Float64)?;
    let long_delivery = enriched
        .column(LONG_DELIVERY_FLAG)?
        .cast(&DataType::Int32)?;

    let total_orders = enriched.height();
    let long_orders: i64 = long_delivery
        .i32()?
        .into_iter()
        .flatten()
        .map(i64::from)
        .sum();
    let long_delivery_pct =
        (total_orders > 0).then(|| long_orders as f64 / total_orders as f64 * 100.0);

    let unique_couriers = match enriched.column(DRIVER_UUID) {
        Ok(column) => Some(column.as_materialized_series().drop_nulls().n_unique()?),
        Err(_) => None,
    };

    let kpis = Kpis {
        total_orders,
        average_atd: mean(atd.into_iter()),
        unique_couriers,
        long_delivery_pct,
        average_total_distance_km: mean(total_distance.f64()?.into_iter()),
    };

    let periods = with_period_key(enriched, period)?;
    let mut category_trends = Vec::new();
    for name in CATEGORICAL_COLUMNS {
        if enriched.column(name).is_ok() {
            category_trends.push(category_trend(&periods, name)?);
        }
    }

    Ok(BatchReport {
        kpis,
        period,
        time_trend: time_trend(&periods)?,
        category_trends,
        atd_distribution: atd_distribution(atd)?,
        by_order_hour: int_group_means(enriched, ORDER_HOUR, atd)?,
        by_dayofweek: int_group_means(enriched, ORDER_DAYOFWEEK, atd)?,
        by_time_of_day: label_group_means(enriched, ORDER_TIME_OF_DAY, atd)?,
        by_peak_hour: int_group_means(enriched, IS_PEAK_HOUR, atd)?,
        by_weekend: int_group_means(enriched, ORDER_WEEKEND, atd)?,
    })
}

/// Adds the period start of every request timestamp as days since the epoch.
fn with_period_key(enriched: &DataFrame, period: TrendPeriod) -> PolarsResult<DataFrame> {
    let keys: Vec<Option<i32>> = column_datetimes(enriched, EATER_REQUEST_TS)?
        .into_iter()
        .map(|ts| ts.and_then(|ts| period.start(ts)).map(days_since_epoch))
        .collect();
    let mut frame = enriched.clone();
    frame.with_column(Series::new(PERIOD_KEY.into(), keys))?;
    frame.with_column(enriched.column(ATD)?.cast(&DataType::Float64)?)?;
    Ok(frame)
}

fn atd_aggregates() -> [Expr; 2] {
    [
        col(ATD).mean().alias(MEAN_ATD),
        col(ATD).count().alias(ORDERS),
    ]
}

fn time_trend(periods: &DataFrame) -> PolarsResult<Vec<PeriodMean>> {
    let grouped = periods
        .clone()
        .lazy()
        .filter(col(PERIOD_KEY).is_not_null())
        .group_by([col(PERIOD_KEY)])
        .agg(atd_aggregates())
        .sort([PERIOD_KEY], SortMultipleOptions::default())
        .collect()?;

    let keys = grouped.column(PERIOD_KEY)?.i32()?;
    let means = grouped.column(MEAN_ATD)?.f64()?;
    let orders = grouped.column(ORDERS)?.cast(&DataType::UInt64)?;
    let orders = orders.u64()?;

    Ok((0..grouped.height())
        .filter_map(|idx| {
            Some(PeriodMean {
                period: date_from_days(keys.get(idx)?)?,
                mean_atd: means.get(idx)?,
                orders: orders.get(idx)? as usize,
            })
        })
        .collect())
}

fn category_trend(periods: &DataFrame, name: &str) -> PolarsResult<CategoryTrend> {
    let grouped = periods
        .clone()
        .lazy()
        .filter(col(PERIOD_KEY).is_not_null().and(col(name).is_not_null()))
        .group_by([col(name).cast(DataType::String).alias(LABEL_KEY), col(PERIOD_KEY)])
        .agg(atd_aggregates())
        .sort([LABEL_KEY, PERIOD_KEY], SortMultipleOptions::default())
        .collect()?;

    let labels = grouped.column(LABEL_KEY)?.str()?;
    let keys = grouped.column(PERIOD_KEY)?.i32()?;
    let means = grouped.column(MEAN_ATD)?.f64()?;
    let orders = grouped.column(ORDERS)?.cast(&DataType::UInt64)?;
    let orders = orders.u64()?;

    let points = (0..grouped.height())
        .filter_map(|idx| {
            Some(CategoryPeriodMean {
                label: labels.get(idx)?.to_string(),
                period: date_from_days(keys.get(idx)?)?,
                mean_atd: means.get(idx)?,
                orders: orders.get(idx)? as usize,
            })
        })
        .collect();

    Ok(CategoryTrend {
        column: name.to_string(),
        points,
    })
}

fn atd_distribution(atd: &Float64Chunked) -> PolarsResult<Option<AtdDistribution>> {
    let Some(min) = atd.min() else {
        return Ok(None);
    };
    let Some(p99) = atd.quantile(ATD_CAP_QUANTILE, QuantileMethod::Linear)? else {
        return Ok(None);
    };
    let orders_within_cap = atd
        .into_iter()
        .flatten()
        .filter(|value| (min..=p99).contains(value))
        .count();
    Ok(Some(AtdDistribution {
        min,
        p99,
        orders_within_cap,
    }))
}

fn days_since_epoch(date: NaiveDate) -> i32 {
    (date - NaiveDate::default()).num_days() as i32
}

fn date_from_days(days: i32) -> Option<NaiveDate> {
    NaiveDate::default().checked_add_signed(TimeDelta::days(i64::from(days)))
}

fn mean(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    let (sum, count) = values
        .flatten()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

fn int_group_means(
    enriched: &DataFrame,
    key_column: &str,
    atd: &Float64Chunked,
) -> PolarsResult<Vec<GroupMean<i32>>> {
    let keys = enriched.column(key_column)?.cast(&DataType::Int32)?;
    let keys = keys.i32()?;
    Ok(group_means(keys.into_iter().zip(atd.into_iter())))
}

fn label_group_means(
    enriched: &DataFrame,
    key_column: &str,
    atd: &Float64Chunked,
) -> PolarsResult<Vec<GroupMean<String>>> {
    let keys = enriched.column(key_column)?.cast(&DataType::String)?;
    let keys = keys.str()?;
    Ok(group_means(
        keys.into_iter()
            .map(|key| key.map(str::to_string))
            .zip(atd.into_iter()),
    ))
}

/// Mean ATD per key in key order; rows with a null key or null ATD are skipped.
fn group_means<K: Ord>(rows: impl Iterator<Item = (Option<K>, Option<f64>)>) -> Vec<GroupMean<K>> {
    let mut groups: BTreeMap<K, (f64, usize)> = BTreeMap::new();
    for (key, value) in rows {
        if let (Some(key), Some(value)) = (key, value) {
            let entry = groups.entry(key).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }
    }
    groups
        .into_iter()
        .map(|(key, (sum, orders))| GroupMean {
            key,
            mean_atd: sum / orders as f64,
            orders,
        })
        .collect()
}
