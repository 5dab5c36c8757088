//! Scripted gateway double shared by the replay, aggregator and challenger
//! tests. The event script plays back on every `stream_events` call, and
//! every submission is captured for assertions.

use std::{
    collections::HashSet,
    sync::Mutex,
};

use ethereum_types::{H160, H256, U256};
use tokio::sync::mpsc;

use crate::{
    gateway::{ChainGateway, GatewayError, TxHandle, TxOptions},
    types::{Batch, Event, FraudEvidence, Transaction, WithdrawRequest},
};

pub(crate) fn transfer(from: H160, to: H160, value: u64, nonce: u64) -> Transaction {
    Transaction {
        from,
        to,
        value: U256::from(value),
        gas: U256::zero(),
        nonce,
    }
}

#[derive(Debug, Default)]
pub(crate) struct ScriptedGateway {
    events: Mutex<Vec<Event>>,
    head: Mutex<H256>,
    valid_roots: Mutex<HashSet<H256>>,
    pub(crate) submitted_batches: Mutex<Vec<Batch>>,
    pub(crate) submitted_fraud_proofs: Mutex<Vec<FraudEvidence>>,
    pub(crate) fail_batch_submission: Mutex<bool>,
}

impl ScriptedGateway {
    pub(crate) fn new(events: Vec<Event>) -> Self {
        Self {
            events: Mutex::new(events),
            ..Self::default()
        }
    }

    pub(crate) fn set_head(&self, root: H256) {
        *self.head.lock().unwrap() = root;
    }

    pub(crate) fn mark_valid(&self, root: H256) {
        self.valid_roots.lock().unwrap().insert(root);
    }

    pub(crate) fn push_event(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl ChainGateway for ScriptedGateway {
    async fn stream_events(&self, sink: mpsc::Sender<Event>) {
        let events = self.events.lock().unwrap().clone();
        for event in events {
            if sink.send(event).await.is_err() {
                return;
            }
        }
    }

    async fn current_state_root(&self) -> Result<H256, GatewayError> {
        Ok(*self.head.lock().unwrap())
    }

    async fn is_state_root_valid(&self, root: H256) -> Result<bool, GatewayError> {
        Ok(self.valid_roots.lock().unwrap().contains(&root))
    }

    async fn remaining_challenge_window(&self) -> Result<U256, GatewayError> {
        Ok(U256::zero())
    }

    async fn prepare_tx_options(
        &self,
        value: U256,
        gas_limit: u64,
        gas_price: Option<U256>,
    ) -> Result<TxOptions, GatewayError> {
        Ok(TxOptions {
            value,
            gas_limit,
            gas_price: gas_price.unwrap_or_else(|| U256::from(1)),
            nonce: 0,
        })
    }

    async fn submit_batch(
        &self,
        batch: Batch,
        _opts: TxOptions,
    ) -> Result<TxHandle, GatewayError> {
        if *self.fail_batch_submission.lock().unwrap() {
            return Err(GatewayError::Rpc("scripted submission failure".into()));
        }
        self.submitted_batches.lock().unwrap().push(batch);
        Ok(H256::repeat_byte(0xba))
    }

    async fn submit_fraud_proof(
        &self,
        evidence: FraudEvidence,
        _opts: TxOptions,
    ) -> Result<TxHandle, GatewayError> {
        self.submitted_fraud_proofs.lock().unwrap().push(evidence);
        Ok(H256::repeat_byte(0xfa))
    }

    async fn submit_withdraw(
        &self,
        _request: WithdrawRequest,
        _opts: TxOptions,
    ) -> Result<TxHandle, GatewayError> {
        Ok(H256::repeat_byte(0x0d))
    }

    async fn submit_bond(&self, _opts: TxOptions) -> Result<TxHandle, GatewayError> {
        Ok(H256::repeat_byte(0xb0))
    }

    async fn submit_deposit(&self, _opts: TxOptions) -> Result<TxHandle, GatewayError> {
        Ok(H256::repeat_byte(0xde))
    }
}
