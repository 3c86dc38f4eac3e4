use polars::prelude::*;

use atd_core::config::{HourWindow, PipelineConfig};
use atd_core::features::derive_features;
use atd_core::timestamps::normalize_timestamps;

fn deliveries() -> PolarsResult<DataFrame> {
    df!(
        "territory" => &["Vancouver", "Burnaby", "Vancouver", "Surrey"],
        "courier_flow" => &[Some("Motorbike"), Some("Bicycle"), Some("Scooter"), None],
        "geo_archetype" => &["Urban", "Suburban", "Urban", "Rural"],
        "merchant_surface" => &["App", "Web", "App", "App"],
        // Mon 12:10, Sat 19:00, Sun 23:30, Wed 05:00
        "eater_request_timestamp" => &[
            "2024-01-15 12:10:00",
            "2024-01-20 19:00:00",
            "2024-01-21 23:30:00",
            "2024-01-24 05:00:00",
        ],
        "restaurant_offered_timestamp" => &[
            "2024-01-15 12:25:00",
            "2024-01-20 19:10:00",
            "2024-01-21 23:45:00",
            "2024-01-24 05:06:00",
        ],
        "order_final_state_timestamp" => &[
            "2024-01-15 12:55:00",
            "2024-01-20 19:40:00",
            "2024-01-22 00:30:00",
            "2024-01-24 05:30:00",
        ],
        "pickup_distance" => &[Some("1.2"), Some("0.8"), Some("far"), Some("2")],
        "dropoff_distance" => &[Some("5"), Some("0.5"), Some("12.5"), None],
        "ATD" => &[30.0, 42.0, 0.0, 20.0],
    )
}

fn derived(config: &PipelineConfig) -> PolarsResult<DataFrame> {
    let normalized = normalize_timestamps(&deliveries()?).expect("timestamps parse");
    Ok(derive_features(&normalized, config)?.dataframe)
}

fn ints(df: &DataFrame, name: &str) -> Vec<Option<i32>> {
    df.column(name).unwrap().i32().unwrap().into_iter().collect()
}

fn floats(df: &DataFrame, name: &str) -> Vec<Option<f64>> {
    df.column(name).unwrap().f64().unwrap().into_iter().collect()
}

fn assert_close(actual: Option<f64>, expected: f64) {
    let actual = actual.expect("value present");
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn temporal_features_follow_request_timestamp() -> PolarsResult<()> {
    let df = derived(&PipelineConfig::default())?;

    assert_eq!(
        ints(&df, "order_hour"),
        vec![Some(12), Some(19), Some(23), Some(5)]
    );
    assert_eq!(
        ints(&df, "order_dayofweek"),
        vec![Some(0), Some(5), Some(6), Some(2)]
    );
    assert_eq!(
        ints(&df, "order_weekend"),
        vec![Some(0), Some(1), Some(1), Some(0)]
    );
    let buckets: Vec<Option<&str>> = df.column("order_time_of_day")?.str()?.into_iter().collect();
    assert_eq!(
        buckets,
        vec![
            Some("afternoon"),
            Some("evening"),
            Some("night"),
            Some("night")
        ]
    );
    assert_eq!(
        ints(&df, "delivery_hour"),
        vec![Some(12), Some(19), Some(0), Some(5)]
    );

    Ok(())
}

#[test]
fn durations_use_seconds_and_minutes() -> PolarsResult<()> {
    let df = derived(&PipelineConfig::default())?;

    assert_eq!(
        floats(&df, "delivery_duration_seconds"),
        vec![Some(1800.0), Some(1800.0), Some(2700.0), Some(1440.0)]
    );
    assert_eq!(
        floats(&df, "preparation_time_minutes"),
        vec![Some(15.0), Some(10.0), Some(15.0), Some(6.0)]
    );
    assert_eq!(
        floats(&df, "dispatch_delay_minutes"),
        vec![Some(0.0); 4]
    );

    Ok(())
}

#[test]
fn distances_are_coerced_and_combined() -> PolarsResult<()> {
    let df = derived(&PipelineConfig::default())?;

    assert_eq!(df.column("pickup_distance")?.dtype(), &DataType::Float64);
    assert_eq!(
        floats(&df, "pickup_distance"),
        vec![Some(1.2), Some(0.8), None, Some(2.0)]
    );

    let total = floats(&df, "total_distance_km");
    assert_close(total[0], 6.2);
    assert_close(total[1], 1.3);
    assert_eq!(total[2], None);
    assert_eq!(total[3], None);

    let ratio = floats(&df, "distance_ratio");
    assert_close(ratio[0], 1.2 / 5.01);
    assert_close(ratio[1], 0.8 / 0.51);
    assert_eq!(ratio[2], None);

    assert_eq!(
        ints(&df, "long_delivery_flag"),
        vec![Some(0), Some(0), Some(1), Some(0)]
    );

    Ok(())
}

#[test]
fn categorical_codes_are_sorted_lexically() -> PolarsResult<()> {
    let normalized = normalize_timestamps(&deliveries()?).unwrap();
    let result = derive_features(&normalized, &PipelineConfig::default())?;

    // Bicycle < Motorbike < Scooter; null label gets -1.
    assert_eq!(
        ints(&result.dataframe, "courier_flow_encoded"),
        vec![Some(1), Some(0), Some(2), Some(-1)]
    );
    assert_eq!(
        ints(&result.dataframe, "territory_encoded"),
        vec![Some(2), Some(0), Some(2), Some(1)]
    );
    assert_eq!(
        ints(&result.dataframe, "geo_archetype_encoded"),
        vec![Some(2), Some(1), Some(2), Some(0)]
    );

    let territory = result
        .encodings
        .iter()
        .find(|encoding| encoding.column == "territory")
        .unwrap();
    assert_eq!(territory.labels, vec!["Burnaby", "Surrey", "Vancouver"]);

    Ok(())
}

#[test]
fn codes_do_not_depend_on_row_order() -> PolarsResult<()> {
    let normalized = normalize_timestamps(&deliveries()?).unwrap();
    let forward = derive_features(&normalized, &PipelineConfig::default())?;
    let reversed = derive_features(&normalized.reverse(), &PipelineConfig::default())?;

    assert_eq!(forward.encodings, reversed.encodings);
    let mut backward = ints(&reversed.dataframe, "courier_flow_encoded");
    backward.reverse();
    assert_eq!(ints(&forward.dataframe, "courier_flow_encoded"), backward);

    Ok(())
}

#[test]
fn operational_scores_and_flags() -> PolarsResult<()> {
    let df = derived(&PipelineConfig::default())?;

    // Scooter and null fall back to the default score.
    assert_eq!(
        ints(&df, "courier_flow_complexity_score"),
        vec![Some(1), Some(2), Some(4), Some(4)]
    );
    assert_eq!(
        ints(&df, "is_peak_hour"),
        vec![Some(1), Some(1), Some(0), Some(0)]
    );

    let speed = floats(&df, "estimated_speed_kmh");
    assert_close(speed[0], 10.0);
    assert_eq!(speed[2], None, "ATD of zero must not produce infinity");
    assert_eq!(speed[3], None);

    assert_eq!(
        ints(&df, "is_short_trip_long_time"),
        vec![Some(0), Some(1), Some(0), Some(0)]
    );

    let relative = floats(&df, "relative_prep_time");
    assert_close(relative[0], 15.0 / 30.01);
    assert_close(relative[2], 15.0 / 0.01);

    assert_eq!(
        ints(&df, "is_high_traffic_suspected"),
        vec![Some(0), Some(0), Some(0), Some(0)]
    );
    assert_eq!(
        ints(&df, "speed_below_threshold"),
        vec![Some(0), Some(1), Some(0), Some(0)]
    );

    Ok(())
}

#[test]
fn configured_peak_windows_and_basic_variant() -> PolarsResult<()> {
    let config = PipelineConfig {
        extended_features: false,
        peak_hours: atd_core::config::PeakHoursConfig {
            windows: vec![HourWindow { start: 22, end: 23 }],
        },
        ..PipelineConfig::default()
    };
    let df = derived(&config)?;

    assert_eq!(
        ints(&df, "is_peak_hour"),
        vec![Some(0), Some(0), Some(1), Some(0)]
    );
    assert!(df.column("is_high_traffic_suspected").is_err());
    assert!(df.column("speed_below_threshold").is_err());

    Ok(())
}

#[test]
fn high_traffic_flag_needs_short_total_and_slow_delivery() -> PolarsResult<()> {
    let df = df!(
        "territory" => &["A", "A"],
        "courier_flow" => &["Foot", "Foot"],
        "geo_archetype" => &["Urban", "Urban"],
        "merchant_surface" => &["App", "App"],
        "eater_request_timestamp" => &["2024-01-15 12:00:00", "2024-01-15 12:00:00"],
        "restaurant_offered_timestamp" => &["2024-01-15 12:10:00", "2024-01-15 12:10:00"],
        "order_final_state_timestamp" => &["2024-01-15 13:00:00", "2024-01-15 13:00:00"],
        "pickup_distance" => &[1.0, 1.0],
        "dropoff_distance" => &[1.5, 2.5],
        "ATD" => &[50_i64, 50],
    )?;
    let normalized = normalize_timestamps(&df).unwrap();
    let result = derive_features(&normalized, &PipelineConfig::default())?.dataframe;

    assert_eq!(result.column("ATD")?.dtype(), &DataType::Float64);
    assert_eq!(
        ints(&result, "is_high_traffic_suspected"),
        vec![Some(1), Some(0)]
    );

    Ok(())
}

#[test]
fn integer_categories_are_coded_by_value() -> PolarsResult<()> {
    let mut df = deliveries()?;
    df.with_column(Series::new("territory".into(), &[Some(10_i64), Some(9), Some(10), None]))?;
    let normalized = normalize_timestamps(&df).unwrap();
    let result = derive_features(&normalized, &PipelineConfig::default())?;

    assert_eq!(
        ints(&result.dataframe, "territory_encoded"),
        vec![Some(1), Some(0), Some(1), Some(-1)]
    );
    let territory = result
        .encodings
        .iter()
        .find(|encoding| encoding.column == "territory")
        .unwrap();
    assert_eq!(territory.labels, vec!["9", "10"]);

    Ok(())
}
