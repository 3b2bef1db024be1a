use crate::{
    cache::LinkCache,
    config::CoreConfig,
    error::InfraError,
    models::{Link, LinkFilter},
    singleflight::Group,
    store::LinkStore,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Result of looking up a code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Redirect(String),
    NotFound,
}

/// Resolves codes to long URLs, cache first.
///
/// - Codes of the wrong length are rejected without any I/O.
/// - A cached not-found sentinel answers `NotFound` without touching the
///   store, so repeated lookups of unknown codes stay in the cache.
/// - Concurrent misses for the same code share one store read and one
///   cache fill.
pub struct LinkResolver {
    cache: Arc<dyn LinkCache>,
    store: Arc<dyn LinkStore>,
    flights: Group<Result<Resolution, InfraError>>,
    code_len: usize,
    code_ttl_secs: u64,
    not_found_ttl_secs: u64,
    not_found_value: String,
}

impl LinkResolver {
    pub fn new(cache: Arc<dyn LinkCache>, store: Arc<dyn LinkStore>, config: &CoreConfig) -> Self {
        Self {
            cache,
            store,
            flights: Group::new(),
            code_len: config.code_len,
            code_ttl_secs: config.code_ttl_secs,
            not_found_ttl_secs: config.not_found_ttl_secs,
            not_found_value: config.cache_not_found_value.clone(),
        }
    }

    pub async fn resolve(&self, code: &str) -> Result<Resolution, InfraError> {
        if code.len() != self.code_len {
            return Ok(Resolution::NotFound);
        }

        match self.cache.get(code).await? {
            Some(value) if value == self.not_found_value => {
                tracing::trace!("Negative cache hit for {}", code);
                return Ok(Resolution::NotFound);
            }
            Some(value) if !value.is_empty() => {
                tracing::trace!("Cache hit for {}", code);
                return Ok(Resolution::Redirect(value));
            }
            _ => {}
        }

        tracing::debug!(
            "Cache miss for {} ({} lookup(s) in flight)",
            code,
            self.flights.in_flight()
        );
        self.flights.run(code, move || self.load(code)).await
    }

    /// Read the store and fill the cache. Runs once per coalesced group.
    async fn load(&self, code: &str) -> Result<Resolution, InfraError> {
        let link = self.store.get(&LinkFilter::by_code(code)).await?;
        let now = Utc::now();

        match link {
            Some(link) if !link.long_url.is_empty() && !link.is_expired_at(now) => {
                let ttl = self.cache_ttl(&link, now);
                self.cache.set(code, &link.long_url, ttl).await?;
                Ok(Resolution::Redirect(link.long_url))
            }
            _ => {
                self.cache
                    .set(code, &self.not_found_value, self.not_found_ttl_secs)
                    .await?;
                Ok(Resolution::NotFound)
            }
        }
    }

    /// The default TTL, cut short so the entry never outlives the deadline.
    fn cache_ttl(&self, link: &Link, now: DateTime<Utc>) -> u64 {
        match link.deadline {
            None => self.code_ttl_secs,
            Some(deadline) => {
                let remaining = (deadline - now).num_seconds().max(1) as u64;
                remaining.min(self.code_ttl_secs)
            }
        }
    }
}
