use chrono::{DateTime, Utc};

/// A shortened link record from the `links` table.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Link {
    pub id: i64,
    pub owner_id: String,
    pub code: String,
    /// Empty unless a code collision forced a salted regeneration.
    pub salt: String,
    pub long_url: String,
    /// `None` means the link never expires.
    pub deadline: Option<DateTime<Utc>>,
    /// `deadline` plus the retention window; the row may be purged after this.
    pub retention_expiry: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Link {
    /// A link is expired once its deadline has passed.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.deadline, Some(deadline) if deadline < now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// A link that has not been persisted yet. The store assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLink {
    pub owner_id: String,
    pub code: String,
    pub salt: String,
    pub long_url: String,
    pub deadline: Option<DateTime<Utc>>,
    pub retention_expiry: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NewLink {
    pub fn into_link(self, id: i64) -> Link {
        Link {
            id,
            owner_id: self.owner_id,
            code: self.code,
            salt: self.salt,
            long_url: self.long_url,
            deadline: self.deadline,
            retention_expiry: self.retention_expiry,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Equality constraints on a link lookup, combined with AND.
/// Fields left as `None` are not constrained.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkFilter {
    pub owner_id: Option<String>,
    pub code: Option<String>,
    pub long_url: Option<String>,
}

impl LinkFilter {
    pub fn by_code(code: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            ..Self::default()
        }
    }

    pub fn by_owner_and_url(owner_id: impl Into<String>, long_url: impl Into<String>) -> Self {
        Self {
            owner_id: Some(owner_id.into()),
            long_url: Some(long_url.into()),
            ..Self::default()
        }
    }

    /// Field-by-field comparison, used by stores that filter in memory.
    pub fn matches(&self, link: &Link) -> bool {
        fn eq(want: &Option<String>, have: &str) -> bool {
            want.as_deref().map_or(true, |w| w == have)
        }

        eq(&self.owner_id, &link.owner_id)
            && eq(&self.code, &link.code)
            && eq(&self.long_url, &link.long_url)
    }
}
