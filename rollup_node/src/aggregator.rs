//! The aggregator role: buffers user transfers, keeps the local replica in
//! step with the chain, and commits batches through the gateway.

use ethereum_types::{H160, H256, U256};
use tracing::{debug, info, warn};

use crate::{
    error::NodeError,
    gateway::{ChainGateway, TxHandle},
    replay::{replay, Replay},
    state::{OptimisticTrie, StateError},
    types::{Account, Batch, Deposit, Transaction, Withdraw},
};

/// Buffered transactions that trigger a batch commit.
pub const MAX_TRANSACTIONS_BATCH: usize = 502;

/// How the aggregator applies buffered transfers when building a batch.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TxPolicy {
    /// Reject underfunded transfers, as the settlement rules demand.
    #[default]
    Honest,
    /// Apply underfunded transfers anyway by crediting the sender first.
    /// Exists solely so end-to-end rigs can exercise the challenger; never
    /// use it against a chain holding real funds.
    Byzantine,
}

/// Aggregator tuning knobs.
#[derive(Clone, Debug)]
pub struct AggregatorConfig {
    /// Buffer length that triggers a commit.
    pub batch_threshold: usize,
    /// Gas allowance for `newBatch` submissions.
    pub batch_gas_limit: u64,
    /// Gas price for `newBatch` submissions; `None` asks the network.
    pub batch_gas_price: Option<U256>,
    /// Value attached to `newBatch` submissions.
    pub batch_value: U256,
    /// Transfer application policy.
    pub policy: TxPolicy,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            batch_threshold: MAX_TRANSACTIONS_BATCH,
            batch_gas_limit: 2,
            batch_gas_price: Some(U256::from(2)),
            batch_value: U256::zero(),
            policy: TxPolicy::Honest,
        }
    }
}

/// The aggregator node.
///
/// Not a `Sync` service: the trie has a single writer, so syncing and
/// committing are serialized behind `&mut self`.
#[derive(Debug)]
pub struct AggregatorNode<G> {
    gateway: G,
    config: AggregatorConfig,
    trie: OptimisticTrie,
    transactions: Vec<Transaction>,
    pending_deposits: Vec<Deposit>,
    pending_withdraws: Vec<Withdraw>,
}

impl<G: ChainGateway + Sync> AggregatorNode<G> {
    /// Creates an aggregator with an empty replica and an empty buffer.
    pub fn new(gateway: G, config: AggregatorConfig) -> Self {
        Self {
            gateway,
            config,
            trie: OptimisticTrie::new(),
            transactions: Vec::new(),
            pending_deposits: Vec::new(),
            pending_withdraws: Vec::new(),
        }
    }

    /// Appends a user transfer to the buffer. Reaching the batch threshold
    /// triggers a resync and a commit; if the resync fails, the commit is
    /// aborted, the buffer is kept, and the error surfaces.
    pub async fn submit_transaction(&mut self, tx: Transaction) -> Result<(), NodeError> {
        debug!(from = ?tx.from, to = ?tx.to, value = %tx.value, "buffered transaction");
        self.transactions.push(tx);

        if self.transactions.len() >= self.config.batch_threshold {
            info!("batch threshold reached, preparing commit");
            self.synced().await?;
            self.commit_batch().await?;
        }

        Ok(())
    }

    /// Ensures the local replica matches the on-chain root, replaying the
    /// full event history if it does not. A replay that cannot reproduce
    /// the on-chain root is fatal ([`NodeError::UnreachableRoot`]).
    pub async fn synced(&mut self) -> Result<bool, NodeError> {
        let on_chain = self.gateway.current_state_root().await.map_err(NodeError::Gateway)?;
        if on_chain == self.trie.state_root() {
            return Ok(true);
        }

        match replay(&self.gateway).await? {
            Replay::Complete {
                trie,
                state_root,
                pending_deposits,
                pending_withdraws,
            } => {
                info!(computed = ?state_root, on_chain = ?on_chain, "replayed event history");
                self.trie = trie;
                self.pending_deposits = pending_deposits;
                self.pending_withdraws = pending_withdraws;

                match state_root == on_chain {
                    true => Ok(true),
                    false => Err(NodeError::UnreachableRoot {
                        computed: state_root,
                        on_chain,
                    }),
                }
            }
            Replay::Fraud(evidence) => Err(NodeError::FraudulentHead(evidence.state_root)),
        }
    }

    /// Builds a batch out of the pending queues and the buffered transfers
    /// and submits it. The buffer is only cleared once the gateway accepts
    /// the submission.
    pub async fn commit_batch(&mut self) -> Result<TxHandle, NodeError> {
        let prev_state_root = self.gateway.current_state_root().await.map_err(NodeError::Gateway)?;

        for deposit in std::mem::take(&mut self.pending_deposits) {
            self.trie.add_funds(deposit.from, deposit.value)?;
        }
        for withdraw in std::mem::take(&mut self.pending_withdraws) {
            self.trie.remove_funds(withdraw.from, withdraw.value)?;
        }
        for i in 0..self.transactions.len() {
            let tx = self.transactions[i].clone();
            self.apply_tx(&tx)?;
        }

        let batch = Batch {
            prev_state_root,
            state_root: self.trie.state_root(),
            transactions: self.transactions.clone(),
        };

        let opts = self
            .gateway
            .prepare_tx_options(
                self.config.batch_value,
                self.config.batch_gas_limit,
                self.config.batch_gas_price,
            )
            .await
            .map_err(NodeError::Gateway)?;
        let handle = self
            .gateway
            .submit_batch(batch, opts)
            .await
            .map_err(NodeError::Gateway)?;

        info!(txs = self.transactions.len(), handle = ?handle, "batch accepted by the gateway");
        self.transactions.clear();

        Ok(handle)
    }

    /// The current nonce of `address`, or 0 for an absent account.
    pub fn nonce_of(&self, address: H160) -> u64 {
        self.trie
            .account(address)
            .map(|account| account.nonce)
            .unwrap_or(0)
    }

    /// Root of the local replica.
    pub fn state_root(&self) -> H256 {
        self.trie.state_root()
    }

    /// Number of buffered transactions.
    pub fn buffered(&self) -> usize {
        self.transactions.len()
    }

    fn apply_tx(&mut self, tx: &Transaction) -> Result<H256, StateError> {
        match self.config.policy {
            TxPolicy::Honest => self.trie.process_tx(tx),
            TxPolicy::Byzantine => self.apply_tx_unchecked(tx),
        }
    }

    /// Mirrors the honest transfer but never rejects an underfunded sender:
    /// the shortfall is conjured by crediting the sender first, since the
    /// account encoding cannot represent a negative balance. This is the
    /// exact defect a fraud proof pins on the committed batch.
    fn apply_tx_unchecked(&mut self, tx: &Transaction) -> Result<H256, StateError> {
        let mut from = self.trie.account(tx.from)?;
        if from.balance < tx.value {
            warn!(from = ?tx.from, "applying underfunded transfer without checks");
            from.balance += tx.value;
        }

        if tx.from == tx.to {
            from.nonce += 1;
            return Ok(self.trie.update_account(tx.from, &from));
        }

        let mut to = match self.trie.account(tx.to) {
            Ok(account) => account,
            Err(StateError::AccountNotFound(_)) => Account::default(),
            Err(e) => return Err(e),
        };

        from.balance -= tx.value;
        to.balance += tx.value;
        from.nonce += 1;

        self.trie.update_account(tx.from, &from);
        Ok(self.trie.update_account(tx.to, &to))
    }
}
