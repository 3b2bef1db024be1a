use crate::{
    codegen::CodeGenerator,
    config::CoreConfig,
    error::CreateError,
    models::{Link, LinkFilter, NewLink},
    probe::UrlProbe,
    store::{Inserted, LinkStore},
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use url::Url;

/// Creates links: validates the long URL, refuses duplicates of a live
/// link, and persists a new row under a freshly generated code.
pub struct LinkWriter {
    store: Arc<dyn LinkStore>,
    probe: Arc<dyn UrlProbe>,
    generator: CodeGenerator,
    retention: chrono::Duration,
}

impl LinkWriter {
    pub fn new(store: Arc<dyn LinkStore>, probe: Arc<dyn UrlProbe>, config: &CoreConfig) -> Self {
        Self {
            store,
            probe,
            generator: CodeGenerator::new(config.code_len),
            retention: chrono::Duration::days(config.expired_keep_days),
        }
    }

    /// Create a link for `owner_id` pointing at `long_url`.
    ///
    /// Returns [`CreateError::Conflict`] carrying the existing code when the
    /// owner already has an active link for the same URL.
    ///
    /// A code that is already taken is regenerated with a millisecond
    /// timestamp salt from the previous code, and the insert retried until
    /// it lands. There is no attempt limit.
    pub async fn create(
        &self,
        owner_id: &str,
        long_url: &str,
        deadline: Option<DateTime<Utc>>,
    ) -> Result<Link, CreateError> {
        let url = parse_http_url(long_url)?;

        self.probe.check(&url).await?;

        let existing = self
            .store
            .get(&LinkFilter::by_owner_and_url(owner_id, long_url))
            .await?;
        if let Some(existing) = existing {
            if !existing.is_expired() {
                return Err(CreateError::Conflict {
                    code: existing.code,
                });
            }
        }

        let now = Utc::now();
        let mut link = NewLink {
            owner_id: owner_id.to_owned(),
            code: self.generator.generate(owner_id, long_url, ""),
            salt: String::new(),
            long_url: long_url.to_owned(),
            deadline,
            retention_expiry: deadline.map(|d| d + self.retention),
            created_at: now,
            updated_at: now,
        };

        loop {
            match self.store.create(&link).await? {
                Inserted::Created(id) => {
                    tracing::info!("Created link {} for owner '{}'", link.code, owner_id);
                    return Ok(link.into_link(id));
                }
                Inserted::CodeTaken => {
                    let salt = Utc::now().timestamp_millis().to_string();
                    let code = self.generator.generate(owner_id, &link.code, &salt);
                    tracing::warn!(
                        "Code {} already taken, retrying with {} (salt {})",
                        link.code,
                        code,
                        salt
                    );
                    link.code = code;
                    link.salt = salt;
                }
            }
        }
    }
}

/// Accept only absolute http(s) URLs.
fn parse_http_url(raw: &str) -> Result<Url, CreateError> {
    let url = Url::parse(raw).map_err(|_| CreateError::InvalidUrl)?;
    match url.scheme() {
        "http" | "https" if url.host().is_some() => Ok(url),
        _ => Err(CreateError::InvalidUrl),
    }
}
