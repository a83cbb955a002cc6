// src/storage/tests/mod.rs

mod sqlite_tests;

// Behaviour every backend must share
pub(crate) mod common {
    use futures::future::join_all;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Barrier;

    use crate::algorithms::{FixedWindow, Step};
    use crate::error::Result;
    use crate::policy::Policy;
    use crate::rate::Rate;
    use crate::storage::StorageBackend;

    pub fn policy(limit: u64) -> Policy {
        Policy::requests(limit, Duration::from_secs(60), vec![]).unwrap()
    }

    // Saved rates read back field for field, and reads have no side effects
    pub async fn test_save_and_load<S: StorageBackend>(storage: &S, key: &str) -> Result<()> {
        assert_eq!(storage.load(key).await?, None);

        let rate = Rate {
            key: key.to_string(),
            limit: 10,
            remaining: 7,
            reset: 4_102_444_800_000,
        };
        storage.save(&rate).await?;

        let first = storage.load(key).await?;
        let second = storage.load(key).await?;
        assert_eq!(first.as_ref(), Some(&rate));
        assert_eq!(first, second);
        Ok(())
    }

    // A missing key is created lazily by the first update
    pub async fn test_update_creates_and_decrements<S: StorageBackend>(
        storage: &S,
        key: &str,
        now: u64,
    ) -> Result<()> {
        let policy = policy(3);
        let consume = |current| FixedWindow::apply(current, key, &policy, Step::Consume(1), now);

        let first = storage.update(key, &consume).await?;
        assert!(first.admitted);
        assert_eq!(first.rate.remaining, 2);

        let second = storage.update(key, &consume).await?;
        assert_eq!(second.rate.remaining, 1);
        assert_eq!(second.rate.reset, first.rate.reset);

        let stored = storage.load(key).await?.unwrap();
        assert_eq!(stored, second.rate);
        Ok(())
    }

    // Concurrent updates of one key must each see the previous write
    pub async fn test_concurrent_updates<S>(storage: Arc<S>, key: &str, now: u64) -> Result<()>
    where
        S: StorageBackend + 'static,
    {
        let tasks = 16;
        let limit = 10;
        let barrier = Arc::new(Barrier::new(tasks));

        let handles = (0..tasks).map(|_| {
            let storage = Arc::clone(&storage);
            let barrier = Arc::clone(&barrier);
            let key = key.to_string();
            tokio::spawn(async move {
                let policy = policy(limit);
                barrier.wait().await;
                let consume =
                    |current| FixedWindow::apply(current, &key, &policy, Step::Consume(1), now);
                storage.update(&key, &consume).await.map(|t| t.admitted)
            })
        });

        let mut admitted = 0;
        for result in join_all(handles).await {
            if result.unwrap()? {
                admitted += 1;
            }
        }

        assert_eq!(admitted, limit, "Exactly the limit may be admitted");
        assert_eq!(storage.load(key).await?.unwrap().remaining, 0);
        Ok(())
    }
}
