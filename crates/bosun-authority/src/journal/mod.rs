//! The persistence journal: an append-only ordered log of committed state
//! transitions.
//!
//! The journal stores [`SnapshotDelta`]s, never effects. Broker calls are
//! not replayed after a restart; they are reconciled against the rebuilt
//! snapshot. The authority appends one [`JournalTransaction`] per applied
//! event and waits for the acknowledgement before publishing the post-state
//! snapshot, so an acknowledged command is durable and an unacknowledged one
//! left no trace.
//!
//! Contract:
//! - `append` is linearizable with respect to its own ordering and atomic
//!   per transaction (all of a transaction's deltas or none)
//! - `replay` returns transactions in write order; folding their deltas from
//!   the empty snapshot rebuilds the state exactly

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::snapshot::{Snapshot, SnapshotDelta};

/// The atomically journaled unit: all deltas of one applied input event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalTransaction {
    /// Monotonic transaction id assigned by the authority.
    pub transaction_id: u64,
    /// The state deltas, in application order.
    pub deltas: Vec<SnapshotDelta>,
}

impl JournalTransaction {
    /// Creates a transaction.
    #[must_use]
    pub const fn new(transaction_id: u64, deltas: Vec<SnapshotDelta>) -> Self {
        Self {
            transaction_id,
            deltas,
        }
    }
}

/// Append-only durable log of state transitions.
#[async_trait]
pub trait Journal: Send + Sync {
    /// Appends a transaction, returning its sequence number once durable.
    ///
    /// # Errors
    ///
    /// Returns a journal error when the write could not be made durable; the
    /// caller must discard the tentative snapshot and surface
    /// `PersistenceUnavailable` to the requester.
    async fn append(&self, transaction: &JournalTransaction) -> Result<u64>;

    /// Returns every transaction in write order.
    ///
    /// # Errors
    ///
    /// Returns a journal error when the log cannot be read or a record fails
    /// to decode (corruption — callers escalate to the crash strategy).
    async fn replay(&self) -> Result<Vec<JournalTransaction>>;
}

/// Rebuilds the authoritative snapshot by folding a replayed journal from
/// the empty state.
///
/// # Errors
///
/// Propagates replay errors from the journal.
pub async fn replay_snapshot(journal: &dyn Journal) -> Result<Snapshot> {
    let transactions = journal.replay().await?;
    let mut snapshot = Snapshot::empty();
    for transaction in &transactions {
        for delta in &transaction.deltas {
            snapshot.apply(delta);
        }
        snapshot.set_version(transaction.transaction_id);
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::memory::InMemoryJournal;
    use super::*;
    use crate::spec::{RunSpec, RunSpecRef};

    fn put(path: &str, version: &str) -> SnapshotDelta {
        SnapshotDelta::RunSpecPut {
            spec: RunSpec::new(RunSpecRef::new(path, version), "./run"),
        }
    }

    #[tokio::test]
    async fn replay_rebuilds_fold_of_all_deltas() -> Result<()> {
        let journal = InMemoryJournal::new();
        let transactions = vec![
            JournalTransaction::new(1, vec![put("/a", "v1")]),
            JournalTransaction::new(
                2,
                vec![
                    put("/b", "v1"),
                    SnapshotDelta::RunSpecRemoved {
                        reference: RunSpecRef::new("/a", "v1"),
                    },
                ],
            ),
        ];

        for transaction in &transactions {
            journal.append(transaction).await?;
        }

        let replayed = replay_snapshot(&journal).await?;
        let folded = Snapshot::fold(
            transactions
                .iter()
                .flat_map(|transaction| transaction.deltas.iter()),
        );

        assert_eq!(replayed.version(), 2);
        assert!(replayed.run_spec(&RunSpecRef::new("/a", "v1")).is_none());
        assert!(replayed.run_spec(&RunSpecRef::new("/b", "v1")).is_some());
        assert_eq!(
            folded.run_spec(&RunSpecRef::new("/b", "v1")).is_some(),
            replayed.run_spec(&RunSpecRef::new("/b", "v1")).is_some()
        );
        Ok(())
    }

    #[tokio::test]
    async fn empty_journal_replays_to_empty_snapshot() -> Result<()> {
        let journal = InMemoryJournal::new();
        let snapshot = replay_snapshot(&journal).await?;
        assert_eq!(snapshot.version(), 0);
        assert_eq!(snapshot.instance_count(), 0);
        Ok(())
    }
}
