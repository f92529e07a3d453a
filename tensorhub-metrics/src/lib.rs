#![deny(missing_docs)]
//! TensorHub metrics

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use witchcraft_metrics::{Metric, MetricRegistry, Metrics, MetricsIter};

// re-export exposed metric types
pub use witchcraft_metrics::{Counter, Histogram, MetricId, Timer};

/// A shared metric registry for cache and storage counters.
///
/// Cloning is cheap; clones observe and update the same registry. One registry is typically
/// shared by every tensor of a dataset.
#[derive(Clone, Default)]
pub struct HubMetrics(Arc<Inner>);

#[derive(Default)]
struct Inner {
    registry: MetricRegistry,
    default_tags: DefaultTags,
}

/// Default tags applied to every metric exported from a [`HubMetrics`] snapshot.
#[derive(Default)]
pub struct DefaultTags(BTreeMap<Cow<'static, str>, Cow<'static, str>>);

impl<K, V> From<&[(K, V)]> for DefaultTags
where
    K: Clone + Into<Cow<'static, str>>,
    V: Clone + Into<Cow<'static, str>>,
{
    fn from(pairs: &[(K, V)]) -> Self {
        DefaultTags(
            pairs
                .iter()
                .map(|(k, v)| (k.clone().into(), v.clone().into()))
                .collect(),
        )
    }
}

impl HubMetrics {
    /// Create an empty registry that tags every exported metric with `default_tags`.
    pub fn with_tags(default_tags: impl Into<DefaultTags>) -> Self {
        Self(Arc::new(Inner {
            registry: MetricRegistry::default(),
            default_tags: default_tags.into(),
        }))
    }

    /// Returns the counter with the specified ID, creating a default instance if absent.
    ///
    /// # Panics
    ///
    /// Panics if a metric is registered with the ID that is not a counter.
    pub fn counter<T>(&self, id: T) -> Arc<Counter>
    where
        T: Into<MetricId>,
    {
        self.0.registry.counter(id)
    }

    /// Returns the histogram with the specified ID, creating a default instance if absent.
    ///
    /// # Panics
    ///
    /// Panics if a metric is registered with the ID that is not a histogram.
    pub fn histogram<T>(&self, id: T) -> Arc<Histogram>
    where
        T: Into<MetricId>,
    {
        self.0.registry.histogram(id)
    }

    /// Returns the timer with the specified ID, creating a default instance if absent.
    ///
    /// # Panics
    ///
    /// Panics if a metric is registered with the ID that is not a timer.
    pub fn timer<T>(&self, id: T) -> Arc<Timer>
    where
        T: Into<MetricId>,
    {
        self.0.registry.timer(id)
    }

    /// Current value of the named counter, or zero if it was never registered.
    pub fn count(&self, name: &'static str) -> i64 {
        self.metrics()
            .iter()
            .find_map(|(id, metric)| match metric {
                Metric::Counter(c) if id.name() == name => Some(c.count()),
                _ => None,
            })
            .unwrap_or(0)
    }

    /// Returns a snapshot of the metrics in the registry.
    ///
    /// Modifications to the registry after this method is called will not affect the state of
    /// the returned `MetricsSnapshot`.
    pub fn metrics(&self) -> MetricsSnapshot<'_> {
        MetricsSnapshot {
            snapshot: self.0.registry.metrics(),
            default_tags: &self.0.default_tags,
        }
    }
}

impl Debug for HubMetrics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubMetrics")
            .field("default_tags", &self.0.default_tags.0)
            .finish_non_exhaustive()
    }
}

/// A snapshot of the metrics in a registry with default tags.
pub struct MetricsSnapshot<'a> {
    snapshot: Metrics,
    default_tags: &'a DefaultTags,
}

impl MetricsSnapshot<'_> {
    /// Create an iterator over the metrics snapshot.
    pub fn iter(&self) -> HubMetricsIter<'_> {
        HubMetricsIter {
            iter: self.snapshot.iter(),
            default_tags: self.default_tags,
        }
    }
}

/// Metrics iterator that applies the default tags to each metric in the inner iterator.
pub struct HubMetricsIter<'a> {
    iter: MetricsIter<'a>,
    default_tags: &'a DefaultTags,
}

impl<'a> Iterator for HubMetricsIter<'a> {
    type Item = (MetricId, &'a Metric);

    #[inline]
    fn next(&mut self) -> Option<(MetricId, &'a Metric)> {
        self.iter.next().map(|(k, v)| {
            let mut metric_id = k.clone();
            for (tag_key, tag_value) in self.default_tags.0.iter() {
                metric_id = metric_id.with_tag(tag_key.clone(), tag_value.clone())
            }

            (metric_id, v)
        })
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_registry() {
        let metrics = HubMetrics::with_tags([("dataset", "mnist")].as_slice());
        let clone = metrics.clone();
        clone.counter("tensorhub.cache.memory.hits").inc();
        metrics.counter("tensorhub.cache.memory.hits").add(2);

        assert_eq!(metrics.count("tensorhub.cache.memory.hits"), 3);
        assert_eq!(metrics.count("tensorhub.cache.memory.misses"), 0);
    }

    #[test]
    fn snapshot_applies_default_tags() {
        let metrics = HubMetrics::with_tags([("dataset", "mnist")].as_slice());
        metrics.counter("tensorhub.store.writes").inc();

        let snapshot = metrics.metrics();
        let (id, _) = snapshot.iter().next().unwrap();
        assert_eq!(id.name(), "tensorhub.store.writes");
        assert!(id.tags().iter().any(|(k, v)| k == "dataset" && v == "mnist"));
    }
}
