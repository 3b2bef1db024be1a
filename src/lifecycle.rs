use async_trait::async_trait;
use std::sync::Arc;

/// A long-lived dependency (database pool, cache connection) that must be
/// acquired and verified before serving and released on the way out.
#[async_trait]
pub trait Resource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Acquire the connection and check it is alive.
    async fn startup(&self) -> anyhow::Result<()>;

    async fn shutdown(&self) -> anyhow::Result<()>;
}

/// Ordered set of resources owned by the process entry point.
///
/// Resources start in registration order and stop in reverse order.
#[derive(Default)]
pub struct Lifecycle {
    resources: Vec<Arc<dyn Resource>>,
    started: usize,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, resource: Arc<dyn Resource>) -> &mut Self {
        self.resources.push(resource);
        self
    }

    /// Start every resource. If one fails, the ones already started are
    /// shut down again before the error is returned.
    pub async fn startup(&mut self) -> anyhow::Result<()> {
        while self.started < self.resources.len() {
            let resource = &self.resources[self.started];
            if let Err(e) = resource.startup().await {
                tracing::error!("Failed to start {}: {:?}", resource.name(), e);
                let name = resource.name();
                self.shutdown().await;
                return Err(e.context(format!("starting {name}")));
            }
            tracing::info!("Started {}", resource.name());
            self.started += 1;
        }
        Ok(())
    }

    /// Stop every started resource, newest first. Errors are logged, not
    /// returned, so one failure does not leak the rest.
    pub async fn shutdown(&mut self) {
        while self.started > 0 {
            self.started -= 1;
            let resource = &self.resources[self.started];
            match resource.shutdown().await {
                Ok(()) => tracing::info!("Stopped {}", resource.name()),
                Err(e) => tracing::error!("Failed to stop {}: {:?}", resource.name(), e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Probe {
        name: &'static str,
        fail_startup: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Resource for Probe {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn startup(&self) -> anyhow::Result<()> {
            self.log.lock().unwrap().push(format!("start {}", self.name));
            if self.fail_startup {
                anyhow::bail!("{} unavailable", self.name);
            }
            Ok(())
        }

        async fn shutdown(&self) -> anyhow::Result<()> {
            self.log.lock().unwrap().push(format!("stop {}", self.name));
            Ok(())
        }
    }

    fn probe(name: &'static str, fail_startup: bool, log: &Arc<Mutex<Vec<String>>>) -> Arc<Probe> {
        Arc::new(Probe {
            name,
            fail_startup,
            log: log.clone(),
        })
    }

    #[tokio::test]
    async fn starts_in_order_and_stops_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut lifecycle = Lifecycle::new();
        lifecycle
            .register(probe("store", false, &log))
            .register(probe("cache", false, &log));

        lifecycle.startup().await.unwrap();
        lifecycle.shutdown().await;
        // A second shutdown is a no-op.
        lifecycle.shutdown().await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["start store", "start cache", "stop cache", "stop store"]
        );
    }

    #[tokio::test]
    async fn failed_startup_releases_started_resources() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut lifecycle = Lifecycle::new();
        lifecycle
            .register(probe("store", false, &log))
            .register(probe("cache", true, &log))
            .register(probe("never", false, &log));

        let err = lifecycle.startup().await.unwrap_err();
        assert!(format!("{err:#}").contains("starting cache"));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["start store", "start cache", "stop store"]
        );
    }
}
