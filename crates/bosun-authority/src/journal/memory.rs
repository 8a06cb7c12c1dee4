//! In-memory journal implementation.
//!
//! Serves tests and the single-process pseudo-leader mode. Records are held
//! as serialized bytes so the serde round-trip every production backend
//! performs is exercised here too. Supports failure injection for the
//! `PersistenceUnavailable` path.
//!
//! ## Limitations
//!
//! - **No durability**: all records are lost when the process exits
//! - **Single-process only**: no coordination across processes

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;

use super::{Journal, JournalTransaction};
use crate::error::{Error, Result};

/// In-memory journal backed by a vector of serialized records.
#[derive(Debug, Default)]
pub struct InMemoryJournal {
    records: RwLock<Vec<Bytes>>,
    failures_remaining: AtomicUsize,
}

fn poisoned<T>(_: PoisonError<T>) -> Error {
    Error::journal("journal lock poisoned")
}

impl InMemoryJournal {
    /// Creates an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the journal to fail the next `n` appends.
    pub fn fail_next(&self, n: usize) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    /// Returns the number of committed transactions.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().expect("journal lock poisoned").len()
    }

    /// Returns true if nothing has been committed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Journal for InMemoryJournal {
    async fn append(&self, transaction: &JournalTransaction) -> Result<u64> {
        if self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::journal("injected append failure"));
        }

        let payload = serde_json::to_vec(transaction)
            .map_err(|e| Error::serialization(format!("failed to encode transaction: {e}")))?;

        let mut records = self.records.write().map_err(poisoned)?;
        records.push(Bytes::from(payload));
        let sequence = u64::try_from(records.len()).unwrap_or(u64::MAX);
        drop(records);

        tracing::debug!(
            transaction_id = transaction.transaction_id,
            sequence,
            deltas = transaction.deltas.len(),
            "journal append committed"
        );
        Ok(sequence)
    }

    async fn replay(&self) -> Result<Vec<JournalTransaction>> {
        let records = self.records.read().map_err(poisoned)?;
        records
            .iter()
            .map(|record| {
                serde_json::from_slice(record).map_err(|e| {
                    Error::journal(format!("corrupt journal record: {e}"))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapshotDelta;
    use crate::spec::{RunSpec, RunSpecRef};

    fn transaction(id: u64) -> JournalTransaction {
        JournalTransaction::new(
            id,
            vec![SnapshotDelta::RunSpecPut {
                spec: RunSpec::new(RunSpecRef::new("/svc", "v1"), "./run"),
            }],
        )
    }

    #[tokio::test]
    async fn append_assigns_increasing_sequences() -> Result<()> {
        let journal = InMemoryJournal::new();
        assert_eq!(journal.append(&transaction(1)).await?, 1);
        assert_eq!(journal.append(&transaction(2)).await?, 2);
        assert_eq!(journal.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn replay_returns_write_order() -> Result<()> {
        let journal = InMemoryJournal::new();
        journal.append(&transaction(10)).await?;
        journal.append(&transaction(11)).await?;

        let replayed = journal.replay().await?;
        let ids: Vec<u64> = replayed.iter().map(|t| t.transaction_id).collect();
        assert_eq!(ids, vec![10, 11]);
        Ok(())
    }

    #[tokio::test]
    async fn injected_failure_commits_nothing() -> Result<()> {
        let journal = InMemoryJournal::new();
        journal.fail_next(1);

        assert!(journal.append(&transaction(1)).await.is_err());
        assert!(journal.is_empty());

        journal.append(&transaction(1)).await?;
        assert_eq!(journal.len(), 1);
        Ok(())
    }
}
