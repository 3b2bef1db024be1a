use dashmap::{mapref::entry::Entry, DashMap};
use std::{future::Future, sync::Arc};
use tokio::sync::watch;

type Slot<T> = Arc<watch::Sender<Option<T>>>;

/// Collapses concurrent calls for the same key into one execution.
///
/// The first caller for a key becomes the leader and runs the work; callers
/// arriving while it runs subscribe to the leader's slot and receive a clone
/// of its result. The slot is removed before the result is published, so a
/// caller arriving afterwards starts a fresh flight.
///
/// No lock is held while the work runs. Dropping a waiting caller has no
/// effect on the flight. Dropping the leader tears the flight down and one of
/// the waiting callers runs the work in its place.
pub struct Group<T> {
    calls: DashMap<String, Slot<T>>,
}

enum Role<T> {
    Leader(Slot<T>),
    Follower(watch::Receiver<Option<T>>),
}

/// Unregisters the leader's slot when the flight ends, completed or not.
struct Flight<'a, T> {
    calls: &'a DashMap<String, Slot<T>>,
    key: &'a str,
    slot: Slot<T>,
}

impl<T> Drop for Flight<'_, T> {
    fn drop(&mut self) {
        self.calls
            .remove_if(self.key, |_, slot| Arc::ptr_eq(slot, &self.slot));
    }
}

impl<T> Default for Group<T> {
    fn default() -> Self {
        Self {
            calls: DashMap::new(),
        }
    }
}

impl<T> Group<T>
where
    T: Clone + Send + Sync,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` for `key` unless a call for the same key is already in
    /// flight, in which case wait for and return that call's result.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> T
    where
        F: Fn() -> Fut,
        Fut: Future<Output = T>,
    {
        loop {
            let role = match self.calls.entry(key.to_owned()) {
                Entry::Occupied(e) => Role::Follower(e.get().subscribe()),
                Entry::Vacant(e) => {
                    let slot: Slot<T> = Arc::new(watch::channel(None).0);
                    e.insert(slot.clone());
                    Role::Leader(slot)
                }
            };

            match role {
                Role::Leader(slot) => {
                    let flight = Flight {
                        calls: &self.calls,
                        key,
                        slot: slot.clone(),
                    };
                    let out = work().await;
                    drop(flight);
                    slot.send_replace(Some(out.clone()));
                    return out;
                }
                Role::Follower(mut rx) => {
                    let shared = rx
                        .wait_for(Option::is_some)
                        .await
                        .ok()
                        .and_then(|value| value.clone());
                    if let Some(out) = shared {
                        return out;
                    }
                    tracing::debug!("single-flight leader for '{}' went away, retrying", key);
                }
            }
        }
    }

    /// Number of keys with a flight currently open.
    pub fn in_flight(&self) -> usize {
        self.calls.len()
    }

    #[cfg(test)]
    fn waiters(&self, key: &str) -> usize {
        self.calls
            .get(key)
            .map(|slot| slot.receiver_count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };
    use tokio::sync::Notify;

    async fn wait_for_waiters<T: Clone + Send + Sync>(group: &Group<T>, key: &str, n: usize) {
        for _ in 0..500 {
            if group.waiters(key) >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("only {} of {} waiters arrived", group.waiters(key), n);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_calls_share_one_execution() {
        let group = Arc::new(Group::<u32>::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let (group, calls, gate) = (group.clone(), calls.clone(), gate.clone());
            tasks.push(tokio::spawn(async move {
                group
                    .run("abc123", || {
                        let (calls, gate) = (calls.clone(), gate.clone());
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            gate.notified().await;
                            42
                        }
                    })
                    .await
            }));
        }

        wait_for_waiters(&group, "abc123", 31).await;
        gate.notify_one();

        for task in tasks {
            assert_eq!(task.await.unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(group.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn errors_reach_every_waiter() {
        let group = Arc::new(Group::<Result<u32, String>>::new());
        let gate = Arc::new(Notify::new());

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let (group, gate) = (group.clone(), gate.clone());
            tasks.push(tokio::spawn(async move {
                group
                    .run("abc123", || {
                        let gate = gate.clone();
                        async move {
                            gate.notified().await;
                            Err("store down".to_string())
                        }
                    })
                    .await
            }));
        }

        wait_for_waiters(&group, "abc123", 7).await;
        gate.notify_one();

        for task in tasks {
            assert_eq!(task.await.unwrap(), Err("store down".to_string()));
        }
    }

    #[tokio::test]
    async fn sequential_calls_open_new_flights() {
        let group = Group::<usize>::new();
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let work = move || async move { calls.fetch_add(1, Ordering::SeqCst) + 1 };

        assert_eq!(group.run("abc123", work).await, 1);
        assert_eq!(group.run("abc123", work).await, 2);
        assert_eq!(group.run("def456", work).await, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dropped_leader_hands_over_to_a_waiter() {
        let group = Arc::new(Group::<u32>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let work = {
            let calls = calls.clone();
            move || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        std::future::pending::<()>().await;
                    }
                    7
                }
            }
        };

        let leader = {
            let (group, work) = (group.clone(), work.clone());
            tokio::spawn(async move { group.run("abc123", work).await })
        };
        while calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        let follower = {
            let (group, work) = (group.clone(), work.clone());
            tokio::spawn(async move { group.run("abc123", work).await })
        };
        wait_for_waiters(&group, "abc123", 1).await;

        leader.abort();

        assert_eq!(follower.await.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn waiter_can_give_up_without_blocking_the_flight() {
        let group = Arc::new(Group::<u32>::new());
        let gate = Arc::new(Notify::new());

        let leader = {
            let (group, gate) = (group.clone(), gate.clone());
            tokio::spawn(async move {
                group
                    .run("abc123", || {
                        let gate = gate.clone();
                        async move {
                            gate.notified().await;
                            9
                        }
                    })
                    .await
            })
        };
        while group.in_flight() == 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        let impatient = tokio::time::timeout(
            Duration::from_millis(20),
            group.run("abc123", || async { 0 }),
        )
        .await;
        assert!(impatient.is_err());

        gate.notify_one();
        assert_eq!(leader.await.unwrap(), 9);
    }
}
