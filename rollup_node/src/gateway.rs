//! The boundary between the node and the settlement layer.
//!
//! Everything the node knows about the chain arrives through
//! [`ChainGateway`]; everything it does to the chain leaves through it. The
//! production implementation is [`RpcGateway`][crate::rpc::RpcGateway];
//! tests script the trait directly.

use std::future::Future;

use ethereum_types::{H256, U256};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::types::{Batch, Event, FraudEvidence, WithdrawRequest};

/// Hash of a settlement-layer transaction accepted into the mempool.
pub type TxHandle = H256;

/// An error raised by the settlement layer or the transport to it.
/// Retryable at the loop level; never a statement about rollup state.
#[derive(Clone, Debug, Error)]
pub enum GatewayError {
    /// The chain RPC transport failed.
    #[error("chain rpc failure: {0}")]
    Rpc(String),

    /// The settlement contract returned data the node cannot interpret.
    #[error("settlement contract returned malformed data: {0}")]
    Contract(String),

    /// A block the scan needs is not available from the endpoint.
    #[error("block {0} is not available")]
    MissingBlock(u64),
}

/// Prepared options for a settlement-layer transaction.
///
/// The gas values are passed through opaquely; the gateway only fills in the
/// sender's pending nonce and, when asked, a suggested gas price.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TxOptions {
    /// Value attached to the call.
    pub value: U256,
    /// Gas allowance.
    pub gas_limit: u64,
    /// Gas price, possibly network-suggested.
    pub gas_price: U256,
    /// The sender's pending nonce.
    pub nonce: u64,
}

/// On-chain side of the rollup, as seen by the off-chain node.
pub trait ChainGateway {
    /// Streams the settlement contract's full event history into `sink` in
    /// on-chain chronological order, then closes it. Fatal conditions are
    /// delivered in-band as [`Event::Fault`].
    fn stream_events(&self, sink: mpsc::Sender<Event>) -> impl Future<Output = ()> + Send;

    /// The state root most recently committed on-chain.
    fn current_state_root(&self) -> impl Future<Output = Result<H256, GatewayError>> + Send;

    /// Whether `root` has survived its challenge window and is final.
    fn is_state_root_valid(
        &self,
        root: H256,
    ) -> impl Future<Output = Result<bool, GatewayError>> + Send;

    /// Seconds left in the current head batch's challenge window.
    fn remaining_challenge_window(
        &self,
    ) -> impl Future<Output = Result<U256, GatewayError>> + Send;

    /// Prepares transaction options for a submission. A `None` gas price
    /// asks the network for a suggestion; the nonce is always the sender's
    /// pending nonce.
    fn prepare_tx_options(
        &self,
        value: U256,
        gas_limit: u64,
        gas_price: Option<U256>,
    ) -> impl Future<Output = Result<TxOptions, GatewayError>> + Send;

    /// Submits an encoded batch through the contract's `newBatch` entry.
    fn submit_batch(
        &self,
        batch: Batch,
        opts: TxOptions,
    ) -> impl Future<Output = Result<TxHandle, GatewayError>> + Send;

    /// Submits fraud evidence through the contract's `proveFraud` entry.
    fn submit_fraud_proof(
        &self,
        evidence: FraudEvidence,
        opts: TxOptions,
    ) -> impl Future<Output = Result<TxHandle, GatewayError>> + Send;

    /// Submits a user withdrawal with its balance proof.
    fn submit_withdraw(
        &self,
        request: WithdrawRequest,
        opts: TxOptions,
    ) -> impl Future<Output = Result<TxHandle, GatewayError>> + Send;

    /// Posts the role's collateral bond.
    fn submit_bond(
        &self,
        opts: TxOptions,
    ) -> impl Future<Output = Result<TxHandle, GatewayError>> + Send;

    /// Moves the attached value onto the rollup.
    fn submit_deposit(
        &self,
        opts: TxOptions,
    ) -> impl Future<Output = Result<TxHandle, GatewayError>> + Send;
}
