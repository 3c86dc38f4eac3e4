use chrono::{NaiveDate, NaiveDateTime};
use polars::prelude::*;

use atd_core::table_io::canonicalize_timestamp_columns;
use atd_core::timestamps::{canonical_dtype, normalize_timestamps, TimestampError};

fn naive(raw: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").unwrap()
}

fn micros(raw: &str) -> i64 {
    naive(raw).and_utc().timestamp_micros()
}

fn days_since_epoch(year: i32, month: u32, day: u32) -> i32 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
    (NaiveDate::from_ymd_opt(year, month, day).unwrap() - epoch).num_days() as i32
}

fn physical(df: &DataFrame, name: &str) -> Vec<Option<i64>> {
    df.column(name)
        .unwrap()
        .cast(&DataType::Int64)
        .unwrap()
        .i64()
        .unwrap()
        .into_iter()
        .collect()
}

#[test]
fn string_columns_become_naive_datetimes() -> PolarsResult<()> {
    let df = df!(
        "eater_request_timestamp" => &[
            Some("2024-01-15 12:10:00"),
            Some("2024-01-15T13:00:00"),
            None,
        ],
        "restaurant_offered_timestamp" => &[
            Some("2024-01-15 12:25:00"),
            Some(""),
            Some("2024-01-15"),
        ],
        "order_final_state_timestamp" => &[Some("2024-01-15 12:55:00.500"), None, None],
        "ATD" => &[45.0, 30.0, 10.0],
    )?;

    let normalized = normalize_timestamps(&df).unwrap();

    for name in [
        "eater_request_timestamp",
        "restaurant_offered_timestamp",
        "order_final_state_timestamp",
    ] {
        assert_eq!(normalized.column(name)?.dtype(), &canonical_dtype());
    }

    assert_eq!(
        physical(&normalized, "eater_request_timestamp"),
        vec![
            Some(micros("2024-01-15 12:10:00")),
            Some(micros("2024-01-15 13:00:00")),
            None
        ]
    );
    // Empty strings are treated as missing, bare dates as midnight.
    assert_eq!(
        physical(&normalized, "restaurant_offered_timestamp"),
        vec![
            Some(micros("2024-01-15 12:25:00")),
            None,
            Some(micros("2024-01-15 00:00:00"))
        ]
    );
    assert_eq!(
        physical(&normalized, "order_final_state_timestamp")[0],
        Some(micros("2024-01-15 12:55:00") + 500_000)
    );
    assert_eq!(normalized.column("ATD")?.f64()?.get(1), Some(30.0));

    Ok(())
}

#[test]
fn unparsable_value_fails_the_batch_with_location() -> PolarsResult<()> {
    let df = df!(
        "eater_request_timestamp" => &["2024-01-15 12:10:00", "2024-01-15 12:20:00"],
        "restaurant_offered_timestamp" => &["2024-01-15 12:25:00", "not a time"],
        "order_final_state_timestamp" => &["2024-01-15 12:55:00", "2024-01-15 12:59:00"],
    )?;

    let err = normalize_timestamps(&df).unwrap_err();
    match err {
        TimestampError::Parse { column, row, value } => {
            assert_eq!(column, "restaurant_offered_timestamp");
            assert_eq!(row, 1);
            assert_eq!(value, "not a time");
        }
        other => panic!("unexpected error: {other}"),
    }

    Ok(())
}

#[test]
fn out_of_order_timestamps_are_not_rejected() -> PolarsResult<()> {
    let df = df!(
        "eater_request_timestamp" => &["2024-01-15 13:00:00"],
        "restaurant_offered_timestamp" => &["2024-01-15 12:00:00"],
        "order_final_state_timestamp" => &["2024-01-15 11:00:00"],
    )?;

    let normalized = normalize_timestamps(&df).unwrap();
    assert_eq!(normalized.height(), 1);
    assert_eq!(
        physical(&normalized, "order_final_state_timestamp"),
        vec![Some(micros("2024-01-15 11:00:00"))]
    );

    Ok(())
}

#[test]
fn datetime_columns_are_cast_to_microseconds() -> PolarsResult<()> {
    let millis = naive("2024-06-01 09:30:00").and_utc().timestamp_millis();
    let as_datetime = |name: &str| -> PolarsResult<Series> {
        Series::new(name.into(), &[millis]).cast(&DataType::Datetime(TimeUnit::Milliseconds, None))
    };

    let df = DataFrame::new(vec![
        as_datetime("eater_request_timestamp")?.into(),
        as_datetime("restaurant_offered_timestamp")?.into(),
        Series::new("order_final_state_timestamp".into(), &[days_since_epoch(2024, 6, 1)])
            .cast(&DataType::Date)?
            .into(),
    ])?;

    let normalized = normalize_timestamps(&df).unwrap();
    assert_eq!(
        physical(&normalized, "eater_request_timestamp"),
        vec![Some(micros("2024-06-01 09:30:00"))]
    );
    assert_eq!(
        physical(&normalized, "order_final_state_timestamp"),
        vec![Some(micros("2024-06-01 00:00:00"))]
    );

    Ok(())
}

#[test]
fn zoned_datetimes_keep_zone_wall_clock() -> PolarsResult<()> {
    let utc_micros = micros("2024-07-01 19:00:00");
    let zoned = |name: &str| -> PolarsResult<Series> {
        Series::new(name.into(), &[utc_micros]).cast(&DataType::Datetime(
            TimeUnit::Microseconds,
            Some(TimeZone::UTC),
        ))
    };
    let df = DataFrame::new(vec![
        zoned("eater_request_timestamp")?.into(),
        zoned("restaurant_offered_timestamp")?.into(),
        zoned("order_final_state_timestamp")?.into(),
    ])?;

    let normalized = normalize_timestamps(&df).unwrap();
    assert_eq!(
        normalized.column("eater_request_timestamp")?.dtype(),
        &canonical_dtype()
    );
    assert_eq!(
        physical(&normalized, "restaurant_offered_timestamp"),
        vec![Some(utc_micros)]
    );

    Ok(())
}

#[test]
fn numeric_timestamp_column_is_rejected() -> PolarsResult<()> {
    let df = df!(
        "eater_request_timestamp" => &[1_i64],
        "restaurant_offered_timestamp" => &["2024-01-15 12:25:00"],
        "order_final_state_timestamp" => &["2024-01-15 12:55:00"],
    )?;

    let err = normalize_timestamps(&df).unwrap_err();
    assert!(matches!(
        err,
        TimestampError::UnsupportedType { ref column, .. } if column == "eater_request_timestamp"
    ));

    Ok(())
}

#[test]
fn local_suffixed_exports_are_renamed() -> PolarsResult<()> {
    let mut df = df!(
        "eater_request_timestamp_local" => &["2024-01-15 12:10:00"],
        "restaurant_offered_timestamp_local" => &["2024-01-15 12:25:00"],
        "order_final_state_timestamp" => &["2024-01-15 12:55:00"],
        "order_final_state_timestamp_local" => &["1999-01-01 00:00:00"],
    )?;

    canonicalize_timestamp_columns(&mut df)?;

    assert!(df.column("eater_request_timestamp").is_ok());
    assert!(df.column("restaurant_offered_timestamp").is_ok());
    assert!(df.column("eater_request_timestamp_local").is_err());
    // The canonical column wins when both are present.
    assert_eq!(
        df.column("order_final_state_timestamp")?.str()?.get(0),
        Some("2024-01-15 12:55:00")
    );
    assert!(df.column("order_final_state_timestamp_local").is_ok());

    Ok(())
}
