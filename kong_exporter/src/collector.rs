//! Prometheus collector for Kong status counters.
//!
//! This module translates one scrape trigger into a bounded set of metric
//! families. The descriptor set is built once from the configured namespace
//! and never mutated; every gather fetches a fresh snapshot from the status
//! source under an exclusive lock so that concurrent scrapes never
//! interleave.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use prometheus::core::{Collector, Desc};
use prometheus::proto;
use tracing::warn;

use crate::client::{ServerStats, StatusSource};

/// Value of the `up` gauge when the last scrape succeeded.
const KONG_UP: f64 = 1.0;
/// Value of the `up` gauge when the last scrape failed.
const KONG_DOWN: f64 = 0.0;

/// Errors produced by [`KongCollector`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A metric descriptor could not be built from the namespace.
    #[error("invalid metric descriptor: {0}")]
    Descriptor(#[from] prometheus::Error),
}

/// Exposition kind of one status metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Gauge,
    Counter,
}

/// Immutable metadata for one exposed metric plus the snapshot field it
/// reads.
#[derive(Debug)]
struct MetricDesc {
    desc: Desc,
    kind: Kind,
    read: fn(&ServerStats) -> f64,
}

/// Prometheus collector backed by a [`StatusSource`].
///
/// A single instance is registered once and shared by every scrape trigger.
/// No per-scrape state survives a [`Collector::collect`] call.
#[derive(Debug)]
pub struct KongCollector<C> {
    source: C,
    up: Desc,
    metrics: Vec<MetricDesc>,
    scrape_lock: Mutex<()>,
}

impl<C> KongCollector<C> {
    /// Create a new [`KongCollector`] exposing metrics under `namespace`.
    ///
    /// The descriptor names and help strings are fixed; existing dashboards
    /// depend on them verbatim.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace produces an invalid metric name.
    pub fn new(source: C, namespace: &str) -> Result<Self, Error> {
        let up = global_desc(namespace, "up", "Status of the last metric scrape")?;
        let metrics = vec![
            MetricDesc {
                desc: global_desc(
                    namespace,
                    "connections_active",
                    "Active client connections",
                )?,
                kind: Kind::Gauge,
                read: |s: &ServerStats| s.connections_active,
            },
            MetricDesc {
                desc: global_desc(
                    namespace,
                    "connections_accepted",
                    "Accepted client connections",
                )?,
                kind: Kind::Counter,
                read: |s: &ServerStats| s.connections_accepted,
            },
            MetricDesc {
                desc: global_desc(
                    namespace,
                    "connections_handled",
                    "Handled client connections",
                )?,
                kind: Kind::Counter,
                read: |s: &ServerStats| s.connections_handled,
            },
            MetricDesc {
                desc: global_desc(
                    namespace,
                    "connections_reading",
                    "Connections where NGINX is reading the request header",
                )?,
                kind: Kind::Gauge,
                read: |s: &ServerStats| s.connections_reading,
            },
            MetricDesc {
                desc: global_desc(
                    namespace,
                    "connections_writing",
                    "Connections where NGINX is writing the response back to the client",
                )?,
                kind: Kind::Gauge,
                read: |s: &ServerStats| s.connections_writing,
            },
            MetricDesc {
                desc: global_desc(namespace, "connections_waiting", "Idle client connections")?,
                kind: Kind::Gauge,
                read: |s: &ServerStats| s.connections_waiting,
            },
            MetricDesc {
                desc: global_desc(namespace, "http_requests_total", "Total http requests")?,
                kind: Kind::Counter,
                read: |s: &ServerStats| s.total_requests,
            },
        ];

        Ok(Self {
            source,
            up,
            metrics,
            scrape_lock: Mutex::new(()),
        })
    }
}

impl<C> Collector for KongCollector<C>
where
    C: StatusSource,
{
    fn desc(&self) -> Vec<&Desc> {
        std::iter::once(&self.up)
            .chain(self.metrics.iter().map(|m| &m.desc))
            .collect()
    }

    fn collect(&self) -> Vec<proto::MetricFamily> {
        // One scrape at a time. Concurrent gathers queue here rather than
        // racing on the upstream endpoint.
        let _scrape = self
            .scrape_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let status = match self.source.status() {
            Ok(status) => status,
            Err(err) => {
                warn!("failed to fetch Kong status: {err}");
                return vec![const_family(&self.up, Kind::Gauge, KONG_DOWN)];
            }
        };
        if !status.database.reachable {
            warn!("Kong reports its datastore unreachable");
            return vec![const_family(&self.up, Kind::Gauge, KONG_DOWN)];
        }

        let mut families = Vec::with_capacity(1 + self.metrics.len());
        families.push(const_family(&self.up, Kind::Gauge, KONG_UP));
        for metric in &self.metrics {
            families.push(const_family(
                &metric.desc,
                metric.kind,
                (metric.read)(&status.server),
            ));
        }
        families
    }
}

fn global_desc(namespace: &str, name: &str, help: &str) -> Result<Desc, prometheus::Error> {
    Desc::new(
        format!("{namespace}_{name}"),
        help.to_string(),
        Vec::new(),
        HashMap::new(),
    )
}

/// Build a single-sample metric family carrying `value` under `desc`.
fn const_family(desc: &Desc, kind: Kind, value: f64) -> proto::MetricFamily {
    let mut metric = proto::Metric::default();
    match kind {
        Kind::Gauge => {
            let mut gauge = proto::Gauge::default();
            gauge.set_value(value);
            metric.set_gauge(gauge);
        }
        Kind::Counter => {
            let mut counter = proto::Counter::default();
            counter.set_value(value);
            metric.set_counter(counter);
        }
    }

    let mut family = proto::MetricFamily::default();
    family.set_name(desc.fq_name.clone());
    family.set_help(desc.help.clone());
    family.set_field_type(match kind {
        Kind::Gauge => proto::MetricType::GAUGE,
        Kind::Counter => proto::MetricType::COUNTER,
    });
    family.mut_metric().push(metric);
    family
}
