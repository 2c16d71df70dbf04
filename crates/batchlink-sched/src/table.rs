//! Concurrency-safe store of job records.
//!
//! Records are spread over a fixed number of shards, each behind its own
//! lock, so queries on unrelated jobs do not contend. Callers take a
//! snapshot, release the lock, talk to the backend, then write back with
//! [`JobTable::update`]. No lock is held across an external call.

use std::hash::{Hash, Hasher};

use rustc_hash::{FxHashMap, FxHasher};
use tokio::sync::RwLock;

use crate::job::{JobId, JobRecord};

const SHARD_COUNT: usize = 16;

pub(crate) struct JobTable {
    shards: Vec<RwLock<FxHashMap<JobId, JobRecord>>>,
    max_retained: usize,
}

impl JobTable {
    /// Create a table that starts reclaiming once more than `max_retained`
    /// records have had their exit code retrieved.
    pub fn new(max_retained: usize) -> Self {
        let shards = (0..SHARD_COUNT)
            .map(|_| RwLock::new(FxHashMap::default()))
            .collect();
        Self {
            shards,
            max_retained: max_retained.max(1),
        }
    }

    fn shard(&self, job_id: &JobId) -> &RwLock<FxHashMap<JobId, JobRecord>> {
        let mut hasher = FxHasher::default();
        job_id.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    pub async fn insert(&self, record: JobRecord) {
        let mut shard = self.shard(&record.job_id).write().await;
        shard.insert(record.job_id.clone(), record);
    }

    /// Snapshot of a record.
    pub async fn get(&self, job_id: &JobId) -> Option<JobRecord> {
        self.shard(job_id).read().await.get(job_id).cloned()
    }

    /// Mutate a record in place. Returns `None` if the record is gone.
    pub async fn update<F, R>(&self, job_id: &JobId, f: F) -> Option<R>
    where
        F: FnOnce(&mut JobRecord) -> R,
    {
        let mut shard = self.shard(job_id).write().await;
        shard.get_mut(job_id).map(f)
    }

    pub async fn ids(&self) -> Vec<JobId> {
        let mut ids = Vec::new();
        for shard in &self.shards {
            ids.extend(shard.read().await.keys().cloned());
        }
        ids.sort();
        ids
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        let mut len = 0;
        for shard in &self.shards {
            len += shard.read().await.len();
        }
        len
    }

    /// Evict the oldest quarter of reclaimable records when there are too
    /// many of them. Records whose exit code was never retrieved are kept.
    pub async fn reclaim(&self) -> usize {
        let mut reclaimable = Vec::new();
        for shard in &self.shards {
            let shard = shard.read().await;
            reclaimable.extend(
                shard
                    .values()
                    .filter(|r| r.exit_code_retrieved)
                    .map(|r| (r.submitted_at, r.job_id.clone())),
            );
        }

        if reclaimable.len() <= self.max_retained {
            return 0;
        }

        reclaimable.sort();
        let to_evict = (self.max_retained / 4).max(reclaimable.len() - self.max_retained);
        let mut evicted = 0;
        for (_, job_id) in reclaimable.into_iter().take(to_evict) {
            if self.shard(&job_id).write().await.remove(&job_id).is_some() {
                evicted += 1;
            }
        }

        tracing::debug!("Reclaimed {} finished job records", evicted);
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CapturePaths;
    use crate::job::JobStatus;
    use std::path::Path;

    fn record(id: &str) -> JobRecord {
        JobRecord::new(
            JobId::new(id),
            id.to_string(),
            CapturePaths::new(Path::new("/work"), id),
        )
    }

    #[tokio::test]
    async fn test_insert_get_update() {
        let table = JobTable::new(100);
        table.insert(record("1")).await;

        let snapshot = table.get(&JobId::new("1")).await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Pending);

        let status = table
            .update(&JobId::new("1"), |r| r.observe(JobStatus::Running))
            .await;
        assert_eq!(status, Some(JobStatus::Running));
        assert_eq!(
            table.get(&JobId::new("1")).await.unwrap().status,
            JobStatus::Running
        );

        assert!(table.get(&JobId::new("2")).await.is_none());
        assert!(table.update(&JobId::new("2"), |_| ()).await.is_none());
    }

    #[tokio::test]
    async fn test_ids_are_sorted() {
        let table = JobTable::new(100);
        for id in ["c", "a", "b"] {
            table.insert(record(id)).await;
        }
        let ids: Vec<String> = table.ids().await.into_iter().map(|id| id.0).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(table.len().await, 3);
    }

    #[tokio::test]
    async fn test_reclaim_only_evicts_retrieved_records() {
        let table = JobTable::new(4);
        for i in 0..10 {
            let mut r = record(&format!("done-{i}"));
            r.exit_code_retrieved = true;
            table.insert(r).await;
        }
        table.insert(record("active")).await;

        let evicted = table.reclaim().await;
        assert_eq!(evicted, 6);
        assert_eq!(table.len().await, 5);
        assert!(table.get(&JobId::new("active")).await.is_some());

        assert_eq!(table.reclaim().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_updates_on_distinct_records() {
        let table = std::sync::Arc::new(JobTable::new(100));
        for i in 0..32 {
            table.insert(record(&i.to_string())).await;
        }

        let mut handles = Vec::new();
        for i in 0..32 {
            let table = table.clone();
            handles.push(tokio::spawn(async move {
                let id = JobId::new(i.to_string());
                table.update(&id, |r| r.observe(JobStatus::Done)).await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), Some(JobStatus::Done));
        }
        for id in table.ids().await {
            assert_eq!(table.get(&id).await.unwrap().status, JobStatus::Done);
        }
    }
}
