use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec,
    HistogramVec, IntCounter, IntCounterVec,
};

lazy_static! {
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec =
        register_int_counter_vec!(
            "http_requests_total",
            "Number of HTTP requests received",
            &["method", "path"]
        )
        .expect("register http_requests_total");
    pub static ref HTTP_REQUESTS_DURATION_SECONDS: HistogramVec =
        register_histogram_vec!(
            "http_requests_duration_seconds",
            "HTTP request latency in seconds",
            &["method", "path"]
        )
        .expect("register http_requests_duration_seconds");
    pub static ref KEY_ROTATIONS_TOTAL: IntCounter = register_int_counter!(
        "key_rotations_total",
        "Number of completed key rotations"
    )
    .expect("register key_rotations_total");
}
