//! Column names shared by the pipeline stages.

pub const TERRITORY: &str = "territory";
pub const COURIER_FLOW: &str = "courier_flow";
pub const GEO_ARCHETYPE: &str = "geo_archetype";
pub const MERCHANT_SURFACE: &str = "merchant_surface";

pub const EATER_REQUEST_TS: &str = "eater_request_timestamp";
pub const RESTAURANT_OFFERED_TS: &str = "restaurant_offered_timestamp";
pub const ORDER_FINAL_STATE_TS: &str = "order_final_state_timestamp";

pub const PICKUP_DISTANCE: &str = "pickup_distance";
pub const DROPOFF_DISTANCE: &str = "dropoff_distance";
pub const ATD: &str = "ATD";
pub const DRIVER_UUID: &str = "driver_uuid";

pub const ORDER_HOUR: &str = "order_hour";
pub const ORDER_DAYOFWEEK: &str = "order_dayofweek";
pub const ORDER_WEEKEND: &str = "order_weekend";
pub const ORDER_TIME_OF_DAY: &str = "order_time_of_day";
pub const DELIVERY_DURATION_SECONDS: &str = "delivery_duration_seconds";
pub const PREPARATION_TIME_MINUTES: &str = "preparation_time_minutes";
pub const DISPATCH_DELAY_MINUTES: &str = "dispatch_delay_minutes";
pub const DELIVERY_HOUR: &str = "delivery_hour";
pub const TOTAL_DISTANCE_KM: &str = "total_distance_km";
pub const DISTANCE_RATIO: &str = "distance_ratio";
pub const LONG_DELIVERY_FLAG: &str = "long_delivery_flag";
pub const COURIER_FLOW_COMPLEXITY_SCORE: &str = "courier_flow_complexity_score";
pub const IS_PEAK_HOUR: &str = "is_peak_hour";
pub const ESTIMATED_SPEED_KMH: &str = "estimated_speed_kmh";
pub const IS_SHORT_TRIP_LONG_TIME: &str = "is_short_trip_long_time";
pub const RELATIVE_PREP_TIME: &str = "relative_prep_time";
pub const IS_HIGH_TRAFFIC_SUSPECTED: &str = "is_high_traffic_suspected";
pub const SPEED_BELOW_THRESHOLD: &str = "speed_below_threshold";

pub const RAIN: &str = "rain";
pub const TEMP_MEAN: &str = "temp_mean";

/// Lifecycle timestamps in request → offer → final-state order.
pub const TIMESTAMP_COLUMNS: [&str; 3] =
    [EATER_REQUEST_TS, RESTAURANT_OFFERED_TS, ORDER_FINAL_STATE_TS];

/// Categorical labels that receive an `<name>_encoded` integer column.
pub const CATEGORICAL_COLUMNS: [&str; 4] =
    [COURIER_FLOW, GEO_ARCHETYPE, MERCHANT_SURFACE, TERRITORY];

/// Suffix used by raw exports for the lifecycle timestamp columns.
pub const LOCAL_SUFFIX: &str = "_local";
