//! In-memory doubles for the store, cache and URL probe, with call counters.

use crate::{
    cache::LinkCache,
    error::InfraError,
    models::{Link, LinkFilter, NewLink},
    probe::{ProbeError, UrlProbe},
    store::{Inserted, LinkStore},
};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};
use url::Url;

pub fn store_down() -> InfraError {
    sqlx::Error::Protocol("store unavailable".into()).into()
}

#[derive(Default)]
pub struct FakeStore {
    pub rows: Mutex<Vec<Link>>,
    /// Attempted inserts, including rejected ones.
    pub attempts: Mutex<Vec<NewLink>>,
    pub gets: AtomicUsize,
    /// Number of upcoming inserts to reject as code collisions.
    pub collisions: AtomicUsize,
    pub get_delay: Option<Duration>,
    pub fail_gets: bool,
    pub fail_creates: bool,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: Vec<Link>) -> Self {
        Self {
            rows: Mutex::new(rows),
            ..Self::default()
        }
    }

    pub fn rows(&self) -> Vec<Link> {
        self.rows.lock().unwrap().clone()
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn inserts(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }
}

#[async_trait]
impl LinkStore for FakeStore {
    async fn create(&self, link: &NewLink) -> Result<Inserted, InfraError> {
        self.attempts.lock().unwrap().push(link.clone());
        if self.fail_creates {
            return Err(store_down());
        }
        let taken = self
            .collisions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        let mut rows = self.rows.lock().unwrap();
        if taken || rows.iter().any(|row| row.code == link.code) {
            return Ok(Inserted::CodeTaken);
        }
        let id = rows.len() as i64 + 1;
        rows.push(link.clone().into_link(id));
        Ok(Inserted::Created(id))
    }

    async fn get(&self, filter: &LinkFilter) -> Result<Option<Link>, InfraError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.get_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_gets {
            return Err(store_down());
        }
        let rows = self.rows.lock().unwrap();
        Ok(rows.iter().rev().find(|row| filter.matches(row)).cloned())
    }
}

#[derive(Default)]
pub struct FakeCache {
    pub entries: Mutex<HashMap<String, (String, u64)>>,
    pub gets: AtomicUsize,
    pub sets: AtomicUsize,
    pub fail_gets: bool,
}

impl FakeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(key: &str, value: &str) -> Self {
        let cache = Self::default();
        cache
            .entries
            .lock()
            .unwrap()
            .insert(key.to_owned(), (value.to_owned(), 3600));
        cache
    }

    /// Value and TTL last written for `key`.
    pub fn entry(&self, key: &str) -> Option<(String, u64)> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LinkCache for FakeCache {
    async fn get(&self, key: &str) -> Result<Option<String>, InfraError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.fail_gets {
            let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "cache down");
            return Err(redis::RedisError::from(io).into());
        }
        Ok(self.entries.lock().unwrap().get(key).map(|(v, _)| v.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), InfraError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_owned(), (value.to_owned(), ttl_secs));
        Ok(())
    }
}

/// Probe that answers the same way for every URL.
pub struct FakeProbe {
    pub reachable: bool,
    pub checks: AtomicUsize,
}

impl FakeProbe {
    pub fn up() -> Self {
        Self {
            reachable: true,
            checks: AtomicUsize::new(0),
        }
    }

    pub fn down() -> Self {
        Self {
            reachable: false,
            checks: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl UrlProbe for FakeProbe {
    async fn check(&self, _url: &Url) -> Result<(), ProbeError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        if self.reachable {
            Ok(())
        } else {
            Err(ProbeError::Status(reqwest::StatusCode::NOT_FOUND))
        }
    }
}
