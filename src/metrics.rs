// Copyright (c) Aptos
// SPDX-License-Identifier: Apache-2.0

use once_cell::sync::Lazy;
use prometheus::{
    exponential_buckets, register_histogram_vec, register_int_counter_vec, HistogramVec,
    IntCounterVec,
};

pub static ROCKPAGE_ITER_LATENCY_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        // metric name
        "rockpage_iter_latency_seconds",
        // metric description
        "Rockpage iter latency in seconds",
        // metric labels (dimensions)
        &["cf_name"],
        exponential_buckets(/*start=*/ 1e-6, /*factor=*/ 2.0, /*count=*/ 22).unwrap(),
    )
    .unwrap()
});

pub static ROCKPAGE_ITER_BYTES: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "rockpage_iter_bytes",
        "Rockpage iter size in bytes",
        &["cf_name"]
    )
    .unwrap()
});

pub static ROCKPAGE_GET_LATENCY_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "rockpage_get_latency_seconds",
        "Rockpage get latency in seconds",
        &["cf_name"],
        exponential_buckets(/*start=*/ 1e-6, /*factor=*/ 2.0, /*count=*/ 22).unwrap(),
    )
    .unwrap()
});

pub static ROCKPAGE_GET_BYTES: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "rockpage_get_bytes",
        "Rockpage get call returned data size in bytes",
        &["cf_name"]
    )
    .unwrap()
});

pub static ROCKPAGE_BATCH_COMMIT_LATENCY_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "rockpage_batch_commit_latency_seconds",
        "Rockpage schema batch commit latency in seconds",
        &["db_name"],
        exponential_buckets(/*start=*/ 1e-3, /*factor=*/ 2.0, /*count=*/ 20).unwrap(),
    )
    .unwrap()
});

pub static ROCKPAGE_BATCH_COMMIT_BYTES: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "rockpage_batch_commit_bytes",
        "Rockpage schema batch commit size in bytes",
        &["db_name"]
    )
    .unwrap()
});

pub static ROCKPAGE_PUT_BYTES: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "rockpage_put_bytes",
        "Rockpage put call puts data size in bytes",
        &["cf_name"]
    )
    .unwrap()
});

pub static ROCKPAGE_DELETES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!("rockpage_deletes", "Rockpage delete calls", &["cf_name"]).unwrap()
});

pub static ROCKPAGE_FETCH_LATENCY_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "rockpage_fetch_latency_seconds",
        "Latency of one page fetch from a data source in seconds",
        &["source_name"],
        exponential_buckets(/*start=*/ 1e-6, /*factor=*/ 2.0, /*count=*/ 22).unwrap(),
    )
    .unwrap()
});

pub static ROCKPAGE_PAGE_ROWS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "rockpage_page_rows",
        "Number of rows returned in one page",
        &["source_name"],
        exponential_buckets(/*start=*/ 1.0, /*factor=*/ 2.0, /*count=*/ 12).unwrap(),
    )
    .unwrap()
});

pub static ROCKPAGE_PAGES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "rockpage_pages",
        "Pages served, by whether the traversal reached its end",
        &["source_name", "outcome"]
    )
    .unwrap()
});

pub static ROCKPAGE_REJECTED_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "rockpage_rejected_requests",
        "Page requests rejected before reaching the data source",
        &["source_name"]
    )
    .unwrap()
});
