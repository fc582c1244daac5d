//! Observability bootstrap shared by the skiff crates.
//!
//! Provides a `meter` shorthand for registering instruments against the
//! global meter provider, plus `init_observability` to wire the provider and
//! the tracing subscriber from a host binary.

use std::borrow::Cow;

use opentelemetry::global;
use opentelemetry_sdk::{metrics::SdkMeterProvider, Resource};
use snafu::{ResultExt, Snafu};
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter};

pub use opentelemetry::{
    metrics::{Counter, Gauge, Histogram, Meter, UpDownCounter},
    KeyValue,
};

pub use crate::metrics::MetricsExporter;

mod metrics;

#[derive(Debug, Snafu)]
pub enum ObservabilityError {
    #[snafu(display("failed to install the tracing subscriber"))]
    Subscriber {
        source: tracing_subscriber::util::TryInitError,
    },
}

/// Returns a meter registered against the global meter provider.
pub fn meter(name: &'static str) -> Meter {
    global::meter(name)
}

/// Installs the global meter provider and the tracing subscriber.
///
/// Metrics accumulate in memory behind the exporter until the host collects
/// them. Log filtering follows `RUST_LOG`, defaulting to `info`.
pub fn init_observability(
    service_name: impl Into<Cow<'static, str>>,
    service_version: impl Into<Cow<'static, str>>,
    metrics_exporter: MetricsExporter,
) -> Result<(), ObservabilityError> {
    let resource = Resource::builder()
        .with_service_name(service_name.into().into_owned())
        .with_attribute(KeyValue::new(
            "service.version",
            service_version.into().into_owned(),
        ))
        .build();

    let meter_provider = SdkMeterProvider::builder()
        .with_reader(metrics_exporter)
        .with_resource(resource)
        .build();
    global::set_meter_provider(meter_provider);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .finish()
        .try_init()
        .context(SubscriberSnafu)?;

    Ok(())
}
