use std::time::{Duration, Instant};

use anyhow::Result;
use opentelemetry::{metrics::Histogram, KeyValue};
use opentelemetry_otlp::{MetricExporter, WithExportConfig};
use opentelemetry_sdk::{
    metrics::{PeriodicReader, SdkMeterProvider},
    Resource,
};

pub fn low_latency_boundaries() -> Vec<f64> {
    vec![
        0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 25.0, 50.0, 75.0, 100.0, 250.0,
        500.0, 750.0, 1000.0,
    ]
}

pub fn init_provider(
    enable_metrics: bool,
    endpoint: Option<&String>,
    interval: Duration,
    instance_id: Option<&String>,
    service_version: &str,
) -> Result<Option<SdkMeterProvider>> {
    if !enable_metrics {
        return Ok(None);
    }

    let mut resource_builder = Resource::builder()
        .with_attribute(KeyValue::new("service.namespace", "filevault"))
        .with_attribute(KeyValue::new("service.name", "filevault-server"))
        .with_attribute(KeyValue::new(
            "service.version",
            service_version.to_string(),
        ));
    if let Some(instance_id) = instance_id {
        resource_builder = resource_builder.with_attribute(KeyValue::new(
            "filevault.instance.id",
            instance_id.to_owned(),
        ));
    }
    let resource = resource_builder.build();

    let mut exporter = MetricExporter::builder().with_tonic();
    if let Some(endpoint) = endpoint {
        exporter = exporter.with_endpoint(endpoint.to_owned());
    }
    let exporter = exporter.build()?;

    let reader = PeriodicReader::builder(exporter)
        .with_interval(interval)
        .build();

    let provider = SdkMeterProvider::builder()
        .with_resource(resource)
        .with_reader(reader)
        .build();

    opentelemetry::global::set_meter_provider(provider.clone());
    Ok(Some(provider))
}

pub trait TimerUpdate {
    fn add(&self, duration: Duration, labels: &[KeyValue]);
}

impl TimerUpdate for Histogram<f64> {
    fn add(&self, duration: Duration, labels: &[KeyValue]) {
        self.record(duration.as_secs_f64(), labels);
    }
}

/// Records the time between creation and drop into `metric`.
pub struct Timer<'a, T: TimerUpdate + Sync> {
    start: Instant,
    metric: &'a T,
    labels: &'a [KeyValue],
}

impl<'a, T: TimerUpdate + Sync> Timer<'a, T> {
    pub fn start_with_labels(metric: &'a T, labels: &'a [KeyValue]) -> Self {
        Self {
            start: Instant::now(),
            metric,
            labels,
        }
    }
}

impl<T: TimerUpdate + Sync> Drop for Timer<'_, T> {
    fn drop(&mut self) {
        self.metric.add(self.start.elapsed(), self.labels);
    }
}

pub mod metadata_storage {
    use opentelemetry::metrics::Histogram;

    use crate::metrics::low_latency_boundaries;

    #[derive(Debug)]
    pub struct Metrics {
        pub reads: Histogram<f64>,
        pub writes: Histogram<f64>,
    }

    impl Default for Metrics {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Metrics {
        pub fn new() -> Metrics {
            let meter = opentelemetry::global::meter("metadata-storage");

            let reads = meter
                .f64_histogram("filevault.metadata_read_duration")
                .with_unit("s")
                .with_boundaries(low_latency_boundaries())
                .with_description("metadata store read latencies in seconds")
                .build();

            let writes = meter
                .f64_histogram("filevault.metadata_write_duration")
                .with_unit("s")
                .with_boundaries(low_latency_boundaries())
                .with_description("metadata store write and delete latencies in seconds")
                .build();

            Metrics { reads, writes }
        }
    }
}

pub mod uploads {
    use opentelemetry::metrics::{Counter, Histogram};

    use crate::metrics::low_latency_boundaries;

    #[derive(Debug)]
    pub struct Metrics {
        pub outcomes: Counter<u64>,
        pub uploaded_bytes: Counter<u64>,
        pub compensation_failures: Counter<u64>,
        pub duration: Histogram<f64>,
    }

    impl Default for Metrics {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Metrics {
        pub fn new() -> Metrics {
            let meter = opentelemetry::global::meter("uploads");

            let outcomes = meter
                .u64_counter("filevault.uploads")
                .with_description("uploads by terminal saga state")
                .build();

            let uploaded_bytes = meter
                .u64_counter("filevault.uploaded_bytes")
                .with_description("bytes of committed uploads")
                .build();

            let compensation_failures = meter
                .u64_counter("filevault.compensation_failures")
                .with_description(
                    "metadata records left behind because their rollback failed",
                )
                .build();

            let duration = meter
                .f64_histogram("filevault.upload_duration")
                .with_unit("s")
                .with_boundaries(low_latency_boundaries())
                .with_description("end to end upload latency in seconds")
                .build();

            Metrics {
                outcomes,
                uploaded_bytes,
                compensation_failures,
                duration,
            }
        }
    }
}
