use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::analytics_client::AnalyticsSource;
use crate::metrics::MetricsResponse;
use crate::types::{DateRange, MetricCategory};

type CacheKey = (MetricCategory, DateRange);

struct CacheEntry {
    stored_at: Instant,
    response: MetricsResponse,
}

/// Memoizes successful fetches per `(category, start, end)` for `ttl`.
/// A zero TTL turns the wrapper into a pass-through.
pub struct CachedSource<S> {
    inner: S,
    ttl: Duration,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl<S: AnalyticsSource> CachedSource<S> {
    pub fn new(inner: S, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn passthrough(inner: S) -> Self {
        Self::new(inner, Duration::ZERO)
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Drops every category cached for `range`.
    pub async fn invalidate_range(&self, range: &DateRange) {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|(_, cached_range), _| cached_range != range);
        let dropped = before - entries.len();
        if dropped > 0 {
            log::info!(
                "[MetricsCache] Invalidated {} entries for {}..{}",
                dropped,
                range.start,
                range.end
            );
        }
    }

}

impl<S: AnalyticsSource> AnalyticsSource for CachedSource<S> {
    async fn fetch_analytics(&self, category: MetricCategory, range: DateRange) -> MetricsResponse {
        if self.ttl.is_zero() {
            return self.inner.fetch_analytics(category, range).await;
        }

        let key = (category, range);
        {
            let entries = self.entries.lock().await;
            if let Some(entry) = entries.get(&key) {
                if entry.stored_at.elapsed() < self.ttl {
                    log::debug!(
                        "[MetricsCache] Hit for {} {}..{}",
                        category.path_segment(),
                        range.start,
                        range.end
                    );
                    return entry.response.clone();
                }
            }
        }

        let response = self.inner.fetch_analytics(category, range).await;
        if !response.is_failure() {
            let ttl = self.ttl;
            let mut entries = self.entries.lock().await;
            entries.retain(|_, entry| entry.stored_at.elapsed() < ttl);
            entries.insert(
                key,
                CacheEntry {
                    stored_at: Instant::now(),
                    response: response.clone(),
                },
            );
        }
        response
    }
}
