//! The challenger role: periodically recomputes the expected rollup state
//! and disputes a fraudulent head batch with a merkle fraud proof.

use std::time::Duration;

use ethereum_types::{H160, H256, U256};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::{
    error::NodeError,
    gateway::{ChainGateway, TxHandle},
    replay::{replay, Replay},
    state::OptimisticTrie,
};

/// Challenger tuning knobs.
#[derive(Clone, Debug)]
pub struct ChallengerConfig {
    /// How often the chain is re-verified.
    pub poll_interval: Duration,
    /// Gas allowance for `proveFraud` submissions.
    pub proof_gas_limit: u64,
    /// Gas price for `proveFraud` submissions; `None` asks the network.
    pub proof_gas_price: Option<U256>,
}

impl Default for ChallengerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            proof_gas_limit: 5_000_000,
            proof_gas_price: None,
        }
    }
}

/// What a verification pass found. None of these stop the loop: an
/// out-of-sync replica and even an ongoing fraud are conditions to keep
/// watching, not faults.
#[derive(Debug)]
pub enum Diagnostic {
    /// A full replay could not reproduce the on-chain root. Possibly an
    /// in-flight commit, possibly fraud the next pass will pin down.
    NotSynced {
        /// Root computed by the local replay.
        computed: H256,
        /// Root the settlement contract reports.
        on_chain: H256,
    },
    /// A fraud proof went out for the named account.
    FraudProven {
        /// The account whose balance the disputed batch drives negative.
        address: H160,
        /// Settlement-layer transaction carrying the proof.
        handle: TxHandle,
    },
    /// A pass failed; the loop retries on the next tick.
    TransientError(NodeError),
}

/// The challenger node.
#[derive(Debug)]
pub struct ChallengerNode<G> {
    gateway: G,
    config: ChallengerConfig,
    trie: OptimisticTrie,
}

impl<G: ChainGateway + Sync> ChallengerNode<G> {
    /// Creates a challenger with an empty replica.
    pub fn new(gateway: G, config: ChallengerConfig) -> Self {
        Self {
            gateway,
            config,
            trie: OptimisticTrie::new(),
        }
    }

    /// Runs the verification loop until `quit` fires or the diagnostics
    /// receiver goes away. The loop never mutates chain state except
    /// through fraud-proof submission.
    pub async fn run(&mut self, diagnostics: mpsc::Sender<Diagnostic>, mut quit: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = match self.verify_head().await {
                        Ok(None) => {
                            info!("on-chain state verified");
                            continue;
                        }
                        Ok(Some(diagnostic)) => diagnostic,
                        Err(error) => {
                            warn!(%error, "verification pass failed, retrying on next tick");
                            Diagnostic::TransientError(error)
                        }
                    };
                    if diagnostics.send(report).await.is_err() {
                        return;
                    }
                }
                _ = quit.changed() => {
                    info!("challenger loop stopping");
                    return;
                }
            }
        }
    }

    /// One verification pass: resync if needed and dispute a fraudulent
    /// head batch. Returns `None` when the chain checks out.
    pub async fn verify_head(&mut self) -> Result<Option<Diagnostic>, NodeError> {
        let on_chain = self.gateway.current_state_root().await.map_err(NodeError::Gateway)?;
        if on_chain == self.trie.state_root() {
            return Ok(None);
        }

        match replay(&self.gateway).await? {
            Replay::Complete {
                trie, state_root, ..
            } => {
                self.trie = trie;
                match state_root == on_chain {
                    true => Ok(None),
                    false => Ok(Some(Diagnostic::NotSynced {
                        computed: state_root,
                        on_chain,
                    })),
                }
            }
            Replay::Fraud(evidence) => {
                let window = self
                    .gateway
                    .remaining_challenge_window()
                    .await
                    .map_err(NodeError::Gateway)?;
                warn!(
                    address = ?evidence.address,
                    window = %window,
                    "fraud found, submitting proof"
                );
                let opts = self
                    .gateway
                    .prepare_tx_options(
                        U256::zero(),
                        self.config.proof_gas_limit,
                        self.config.proof_gas_price,
                    )
                    .await
                    .map_err(NodeError::Gateway)?;

                let address = evidence.address;
                let handle = self
                    .gateway
                    .submit_fraud_proof(evidence, opts)
                    .await
                    .map_err(NodeError::Gateway)?;

                Ok(Some(Diagnostic::FraudProven { address, handle }))
            }
        }
    }
}
