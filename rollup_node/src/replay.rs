//! Reconstruction of the rollup state from the on-chain event history.
//!
//! The engine drives the gateway's event producer and a consumer
//! concurrently over one bounded channel and folds every event into a fresh
//! trie under the settlement layer's ordering rules. Deposits and
//! withdrawals observed between two batches belong to the *earlier* state:
//! they are folded in at the next batch boundary, before that batch's
//! transactions replay. Whatever is still queued when the stream ends is
//! handed back to the caller to carry across resync cycles.

use ethereum_types::H256;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    gateway::{ChainGateway, GatewayError},
    state::{OptimisticTrie, StateError},
    types::{Batch, Deposit, Event, FraudEvidence, Withdraw},
};

/// Capacity of the event channel between the gateway producer and the
/// replay consumer. The producer blocks once the consumer falls this far
/// behind.
pub const EVENT_CHANNEL_SIZE: usize = 32;

/// An error that aborts a replay pass.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// An event could not be applied to the trie.
    #[error(transparent)]
    State(#[from] StateError),

    /// The gateway failed mid-stream or on a validity query.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// The outcome of a full replay pass.
#[derive(Debug)]
pub enum Replay {
    /// Every event folded in cleanly.
    Complete {
        /// The reconstructed account state.
        trie: OptimisticTrie,
        /// Root of `trie` after the final event.
        state_root: H256,
        /// Deposits seen after the last batch, not yet folded in.
        pending_deposits: Vec<Deposit>,
        /// Withdrawals seen after the last batch, not yet folded in.
        pending_withdraws: Vec<Withdraw>,
    },
    /// The head batch drives an account balance negative. The evidence is
    /// assembled against the speculative state at the point of violation.
    Fraud(FraudEvidence),
}

/// Replays the gateway's full event history onto a fresh trie.
///
/// Two passes over the same event stream produce bit-for-bit identical
/// state roots; events are never reordered.
pub async fn replay<G: ChainGateway + Sync>(gateway: &G) -> Result<Replay, ReplayError> {
    let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);

    let producer = gateway.stream_events(events_tx);
    let consumer = consume(gateway, events_rx);
    let ((), outcome) = tokio::join!(producer, consumer);

    outcome
}

async fn consume<G: ChainGateway>(
    gateway: &G,
    mut events: mpsc::Receiver<Event>,
) -> Result<Replay, ReplayError> {
    let mut trie = OptimisticTrie::new();
    let mut pending_deposits: Vec<Deposit> = Vec::new();
    let mut pending_withdraws: Vec<Withdraw> = Vec::new();

    while let Some(event) = events.recv().await {
        match event {
            Event::Deposit(deposit) => {
                debug!(from = ?deposit.from, value = %deposit.value, "on-chain deposit");
                pending_deposits.push(deposit);
            }
            Event::Withdraw(withdraw) => {
                debug!(from = ?withdraw.from, value = %withdraw.value, "on-chain withdraw");
                pending_withdraws.push(withdraw);
            }
            Event::Batch(batch) => {
                info!(txs = batch.transactions.len(), "on-chain batch");
                let valid = gateway.is_state_root_valid(batch.state_root).await?;
                let head = gateway.current_state_root().await?;

                // Value movements observed before this batch are part of the
                // pre-state its prev_state_root summarized: fold them in
                // before any of the batch replays.
                for deposit in pending_deposits.drain(..) {
                    trie.add_funds(deposit.from, deposit.value)?;
                }
                for withdraw in pending_withdraws.drain(..) {
                    trie.remove_funds(withdraw.from, withdraw.value)?;
                }

                if valid {
                    // Finalized batch: it survived its challenge window, so
                    // replaying it cannot fail against honest state.
                    for tx in &batch.transactions {
                        trie.process_tx(tx)?;
                    }
                } else if batch.state_root == head {
                    // Head batch still inside its challenge window: replay
                    // speculatively on a shadow first.
                    match speculate(&trie, &batch)? {
                        Some(evidence) => return Ok(Replay::Fraud(evidence)),
                        None => {
                            for tx in &batch.transactions {
                                trie.process_tx(tx)?;
                            }
                        }
                    }
                } else {
                    debug!(claimed = ?batch.state_root, "skipping superseded invalid batch");
                }
            }
            Event::Fault(cause) => {
                warn!(%cause, "event producer failed, aborting replay");
                return Err(ReplayError::Gateway(cause));
            }
        }
    }

    let state_root = trie.state_root();
    Ok(Replay::Complete {
        trie,
        state_root,
        pending_deposits,
        pending_withdraws,
    })
}

/// Replays `batch` on a shadow of `trie`. An underfunded transfer is the
/// fraud signal and yields evidence against the shadow's state at that
/// point; any other failure aborts the pass.
fn speculate(trie: &OptimisticTrie, batch: &Batch) -> Result<Option<FraudEvidence>, StateError> {
    let mut shadow = trie.snapshot();

    for tx in &batch.transactions {
        match shadow.process_tx(tx) {
            Ok(_) => {}
            Err(StateError::InvalidBalance(address)) => {
                warn!(?address, "batch drives an account balance negative");
                let account = shadow.account(address)?.encode();
                let proof = shadow.prove(address);

                return Ok(Some(FraudEvidence {
                    address,
                    account,
                    proof,
                    state_root: shadow.state_root(),
                    batch: batch.clone(),
                }));
            }
            Err(e) => return Err(e),
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use ethereum_types::{H160, H256, U256};

    use super::{replay, Replay};
    use crate::{
        state::OptimisticTrie,
        testing::{transfer, ScriptedGateway},
        types::{Batch, Deposit, Event, Withdraw},
    };

    const A: H160 = H160::repeat_byte(0xaa);
    const B: H160 = H160::repeat_byte(0xbb);

    fn deposit(from: H160, value: u64) -> Event {
        Event::Deposit(Deposit {
            from,
            value: U256::from(value),
        })
    }

    async fn complete(gateway: &ScriptedGateway) -> (OptimisticTrie, H256, Vec<Deposit>, Vec<Withdraw>) {
        match replay(gateway).await.unwrap() {
            Replay::Complete {
                trie,
                state_root,
                pending_deposits,
                pending_withdraws,
            } => (trie, state_root, pending_deposits, pending_withdraws),
            other => panic!("expected a complete replay, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn deposit_is_folded_in_at_the_batch_boundary() {
        let mut expected = OptimisticTrie::new();
        expected.add_funds(A, U256::from(100)).unwrap();

        let gateway = ScriptedGateway::new(vec![
            deposit(A, 100),
            Event::Batch(Batch {
                prev_state_root: OptimisticTrie::new().state_root(),
                state_root: expected.state_root(),
                transactions: Vec::new(),
            }),
        ]);
        gateway.set_head(expected.state_root());
        gateway.mark_valid(expected.state_root());

        let (trie, state_root, pending_deposits, _) = complete(&gateway).await;

        assert_eq!(state_root, expected.state_root());
        assert_eq!(trie.account(A).unwrap().balance, U256::from(100));
        assert!(pending_deposits.is_empty());
    }

    #[tokio::test]
    async fn deposits_fold_in_before_the_batch_replays() {
        // A's transfer is only funded if its deposit lands first.
        let mut expected = OptimisticTrie::new();
        expected.add_funds(A, U256::from(50)).unwrap();
        expected.add_funds(B, U256::from(20)).unwrap();
        expected.process_tx(&transfer(A, B, 10, 0)).unwrap();

        let gateway = ScriptedGateway::new(vec![
            deposit(A, 50),
            deposit(B, 20),
            Event::Batch(Batch {
                prev_state_root: OptimisticTrie::new().state_root(),
                state_root: expected.state_root(),
                transactions: vec![transfer(A, B, 10, 0)],
            }),
        ]);
        gateway.set_head(expected.state_root());
        gateway.mark_valid(expected.state_root());

        let (trie, state_root, _, _) = complete(&gateway).await;

        assert_eq!(state_root, expected.state_root());
        assert_eq!(trie.account(A).unwrap().balance, U256::from(40));
        assert_eq!(trie.account(A).unwrap().nonce, 1);
        assert_eq!(trie.account(B).unwrap().balance, U256::from(30));
        assert_eq!(trie.account(B).unwrap().nonce, 0);
    }

    #[tokio::test]
    async fn withdraws_are_drained_at_the_batch_boundary() {
        let mut expected = OptimisticTrie::new();
        expected.add_funds(A, U256::from(100)).unwrap();
        expected.remove_funds(A, U256::from(60)).unwrap();

        let gateway = ScriptedGateway::new(vec![
            deposit(A, 100),
            Event::Withdraw(Withdraw {
                from: A,
                value: U256::from(60),
            }),
            Event::Batch(Batch {
                prev_state_root: OptimisticTrie::new().state_root(),
                state_root: expected.state_root(),
                transactions: Vec::new(),
            }),
        ]);
        gateway.set_head(expected.state_root());
        gateway.mark_valid(expected.state_root());

        let (trie, state_root, _, pending_withdraws) = complete(&gateway).await;

        assert_eq!(state_root, expected.state_root());
        assert_eq!(trie.account(A).unwrap().balance, U256::from(40));
        assert!(pending_withdraws.is_empty());
    }

    #[tokio::test]
    async fn residual_movements_are_returned_not_applied() {
        let gateway = ScriptedGateway::new(vec![deposit(A, 7)]);
        gateway.set_head(OptimisticTrie::new().state_root());

        let (trie, state_root, pending_deposits, _) = complete(&gateway).await;

        // No batch boundary was seen, so the deposit stays pending.
        assert_eq!(state_root, OptimisticTrie::new().state_root());
        assert!(trie.account(A).is_err());
        assert_eq!(
            pending_deposits,
            vec![Deposit {
                from: A,
                value: U256::from(7)
            }]
        );
    }

    #[tokio::test]
    async fn superseded_invalid_batch_is_skipped() {
        // The bogus batch is neither finalized nor the head, so its
        // transactions are ignored; its boundary still drains the deposit.
        let mut expected = OptimisticTrie::new();
        expected.add_funds(A, U256::from(5)).unwrap();

        let gateway = ScriptedGateway::new(vec![
            deposit(A, 5),
            Event::Batch(Batch {
                prev_state_root: OptimisticTrie::new().state_root(),
                state_root: H256::repeat_byte(0x66),
                transactions: vec![transfer(A, B, 999, 0)],
            }),
        ]);
        gateway.set_head(expected.state_root());

        let (trie, state_root, _, _) = complete(&gateway).await;

        assert_eq!(state_root, expected.state_root());
        assert_eq!(trie.account(A).unwrap().balance, U256::from(5));
        assert!(trie.account(B).is_err());
    }

    #[tokio::test]
    async fn fraudulent_head_batch_yields_evidence() {
        let fraudulent_root = H256::repeat_byte(0x66);
        let batch = Batch {
            prev_state_root: OptimisticTrie::new().state_root(),
            state_root: fraudulent_root,
            transactions: vec![transfer(A, B, 50, 0)],
        };

        let gateway = ScriptedGateway::new(vec![deposit(A, 10), Event::Batch(batch.clone())]);
        gateway.set_head(fraudulent_root);

        let evidence = match replay(&gateway).await.unwrap() {
            Replay::Fraud(evidence) => evidence,
            other => panic!("expected fraud, got {other:?}"),
        };

        assert_eq!(evidence.address, A);
        assert_eq!(evidence.batch, batch);
        // The evidence proves A's pre-transfer account against the shadow
        // state the batch actually produces up to the violation.
        let mut pre_state = OptimisticTrie::new();
        pre_state.add_funds(A, U256::from(10)).unwrap();
        assert_eq!(evidence.state_root, pre_state.state_root());
        assert_eq!(
            account_trie::verify_proof(evidence.state_root, A, &evidence.proof).unwrap(),
            Some(evidence.account.clone())
        );
    }

    #[tokio::test]
    async fn replay_is_deterministic_across_passes() {
        let mut expected = OptimisticTrie::new();
        expected.add_funds(A, U256::from(50)).unwrap();
        expected.process_tx(&transfer(A, B, 20, 0)).unwrap();

        let gateway = ScriptedGateway::new(vec![
            deposit(A, 50),
            Event::Batch(Batch {
                prev_state_root: OptimisticTrie::new().state_root(),
                state_root: expected.state_root(),
                transactions: vec![transfer(A, B, 20, 0)],
            }),
        ]);
        gateway.set_head(expected.state_root());
        gateway.mark_valid(expected.state_root());

        let (_, first, _, _) = complete(&gateway).await;
        let (_, second, _, _) = complete(&gateway).await;

        assert_eq!(first, second);
        assert_eq!(first, expected.state_root());
    }
}
