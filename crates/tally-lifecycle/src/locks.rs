// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-plugin-name mutual exclusion.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Held while an install, update or removal runs for one or more names.
pub struct NameGuard {
    names: Vec<String>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl NameGuard {
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// One async mutex per plugin name, created on first use.
#[derive(Default, Clone)]
pub struct NameLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl NameLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, name: &str) -> Arc<Mutex<()>> {
        // The DashMap shard guard must not be held across the await below.
        Arc::clone(
            self.locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// Wait for exclusive access to `name`.
    pub async fn acquire(&self, name: &str) -> NameGuard {
        self.acquire_many([name]).await
    }

    /// Lock several names at once. Names are locked in sorted order so two
    /// callers with overlapping sets cannot deadlock.
    pub async fn acquire_many<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> NameGuard {
        let sorted: BTreeSet<&str> = names.into_iter().collect();
        let mut guards = Vec::with_capacity(sorted.len());
        for name in &sorted {
            guards.push(self.slot(name).lock_owned().await);
        }
        NameGuard {
            names: sorted.into_iter().map(String::from).collect(),
            _guards: guards,
        }
    }

    /// Whether `name` is currently locked.
    pub fn is_locked(&self, name: &str) -> bool {
        self.locks
            .get(name)
            .is_some_and(|slot| slot.try_lock().is_err())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_name_is_serialized() {
        let locks = NameLocks::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let locks = locks.clone();
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                tokio::spawn(async move {
                    let _guard = locks.acquire("aws-cost").await;
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_names_do_not_block() {
        let locks = NameLocks::new();
        let _aws = locks.acquire("aws-cost").await;
        let gcp = tokio::time::timeout(Duration::from_millis(100), locks.acquire("gcp-cost")).await;
        assert!(gcp.is_ok());
        assert!(locks.is_locked("aws-cost"));
    }

    #[tokio::test]
    async fn acquire_many_dedups_and_sorts() {
        let locks = NameLocks::new();
        let guard = locks.acquire_many(["b", "a", "b"]).await;
        assert_eq!(guard.names(), ["a".to_string(), "b".to_string()]);
        drop(guard);
        assert!(!locks.is_locked("a"));
    }
}
