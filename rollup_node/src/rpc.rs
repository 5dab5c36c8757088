//! The production [`ChainGateway`]: an alloy provider plus the settlement
//! contract's ABI.
//!
//! Event streaming scans every block from genesis and decodes the calldata
//! of successful transactions addressed to the contract. That is fine for
//! the local and devnet chains this node targets; against a long main
//! chain an ingestion service should feed the scan instead.

use std::marker::PhantomData;

use alloy::{
    primitives::Bytes,
    providers::Provider,
    rpc::types::{BlockId, BlockTransactions, BlockTransactionsKind},
    sol,
    sol_types::SolCall,
    transports::Transport,
};
use ethereum_types::{H256, U256};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    compat::Compat,
    gateway::{ChainGateway, GatewayError, TxHandle, TxOptions},
    types::{Account, Batch, Deposit, Event, FraudEvidence, Withdraw, WithdrawRequest},
};

sol! {
    #[sol(rpc)]
    contract Settlement {
        function deposit() external payable;
        function withdraw(bytes addr, bytes account, bytes proof, bytes32 stateRoot) external;
        function newBatch(bytes batch) external;
        function proveFraud(bytes addr, bytes value, bytes proof, bytes32 stateRoot, bytes batch) external;
        function bond() external payable;
        function stateRoot() external view returns (bytes32);
        function validStateRoots(bytes32 root) external view returns (bool);
        function remainingProofTime() external view returns (uint256);
    }
}

/// [`ChainGateway`] over a JSON-RPC endpoint.
///
/// The provider is expected to carry a wallet filler for the node's
/// identity; submissions are signed there.
#[derive(Debug)]
pub struct RpcGateway<ProviderT, TransportT> {
    provider: ProviderT,
    contract: alloy::primitives::Address,
    signer: alloy::primitives::Address,
    _phantom: PhantomData<TransportT>,
}

impl<ProviderT, TransportT> RpcGateway<ProviderT, TransportT>
where
    ProviderT: Provider<TransportT>,
    TransportT: Transport + Clone,
{
    /// Wraps `provider` for the settlement contract at `contract`,
    /// submitting as `signer`.
    pub fn new(
        provider: ProviderT,
        contract: alloy::primitives::Address,
        signer: alloy::primitives::Address,
    ) -> Self {
        Self {
            provider,
            contract,
            signer,
            _phantom: PhantomData,
        }
    }

    async fn scan_chain(&self, sink: &mpsc::Sender<Event>) -> Result<(), GatewayError> {
        let head = self.provider.get_block_number().await.map_err(rpc_err)?;
        debug!(blocks = head + 1, "scanning chain for settlement events");

        for number in 0..=head {
            let block = self
                .provider
                .get_block(BlockId::from(number), BlockTransactionsKind::Full)
                .await
                .map_err(rpc_err)?
                .ok_or(GatewayError::MissingBlock(number))?;

            let BlockTransactions::Full(transactions) = &block.transactions else {
                return Err(GatewayError::Contract(format!(
                    "block {number} did not include full transactions"
                )));
            };

            for tx in transactions {
                if tx.to != Some(self.contract) {
                    continue;
                }
                // Reverted calls moved no value and committed nothing.
                let receipt = self
                    .provider
                    .get_transaction_receipt(tx.hash)
                    .await
                    .map_err(rpc_err)?;
                match receipt {
                    Some(receipt) if receipt.status() => {}
                    _ => continue,
                }

                if let Some(event) = self.decode_call(tx) {
                    if sink.send(event).await.is_err() {
                        return Ok(());
                    }
                }
            }
        }

        info!("all blocks scanned");
        Ok(())
    }

    /// Decodes one settlement-contract call into an event. Unknown
    /// selectors and undecodable payloads are skipped, not fatal: the
    /// contract accepted them, so the node must tolerate them.
    fn decode_call(&self, tx: &alloy::rpc::types::Transaction) -> Option<Event> {
        let input: &[u8] = &tx.input;

        if input.starts_with(&Settlement::depositCall::SELECTOR) {
            return Some(Event::Deposit(Deposit {
                from: tx.from.compat(),
                value: tx.value.compat(),
            }));
        }

        if input.starts_with(&Settlement::newBatchCall::SELECTOR) {
            let call = match Settlement::newBatchCall::abi_decode(input, true) {
                Ok(call) => call,
                Err(e) => {
                    warn!(%e, "skipping undecodable newBatch calldata");
                    return None;
                }
            };
            return match Batch::decode(&call.batch) {
                Ok(batch) => Some(Event::Batch(batch)),
                Err(e) => {
                    warn!(%e, "skipping batch that does not decode");
                    None
                }
            };
        }

        if input.starts_with(&Settlement::withdrawCall::SELECTOR) {
            let call = match Settlement::withdrawCall::abi_decode(input, true) {
                Ok(call) => call,
                Err(e) => {
                    warn!(%e, "skipping undecodable withdraw calldata");
                    return None;
                }
            };
            return match Account::decode(&call.account) {
                Ok(account) => Some(Event::Withdraw(Withdraw {
                    from: tx.from.compat(),
                    value: account.balance,
                })),
                Err(e) => {
                    warn!(%e, "skipping withdraw whose account does not decode");
                    None
                }
            };
        }

        None
    }
}

fn rpc_err(e: impl std::fmt::Display) -> GatewayError {
    GatewayError::Rpc(e.to_string())
}

fn contract_err(e: impl std::fmt::Display) -> GatewayError {
    GatewayError::Contract(e.to_string())
}

impl<ProviderT, TransportT> ChainGateway for RpcGateway<ProviderT, TransportT>
where
    ProviderT: Provider<TransportT>,
    TransportT: Transport + Clone,
{
    async fn stream_events(&self, sink: mpsc::Sender<Event>) {
        if let Err(cause) = self.scan_chain(&sink).await {
            // The consumer aborts on the in-band fault; if it is already
            // gone there is nobody left to tell.
            let _ = sink.send(Event::Fault(cause)).await;
        }
    }

    async fn current_state_root(&self) -> Result<H256, GatewayError> {
        let contract = Settlement::new(self.contract, &self.provider);
        let root = contract.stateRoot().call().await.map_err(contract_err)?;

        Ok(root._0.compat())
    }

    async fn is_state_root_valid(&self, root: H256) -> Result<bool, GatewayError> {
        let contract = Settlement::new(self.contract, &self.provider);
        let valid = contract
            .validStateRoots(root.compat())
            .call()
            .await
            .map_err(contract_err)?;

        Ok(valid._0)
    }

    async fn remaining_challenge_window(&self) -> Result<U256, GatewayError> {
        let contract = Settlement::new(self.contract, &self.provider);
        let remaining = contract
            .remainingProofTime()
            .call()
            .await
            .map_err(contract_err)?;

        Ok(remaining._0.compat())
    }

    async fn prepare_tx_options(
        &self,
        value: U256,
        gas_limit: u64,
        gas_price: Option<U256>,
    ) -> Result<TxOptions, GatewayError> {
        let gas_price = match gas_price {
            Some(price) => price,
            None => U256::from(self.provider.get_gas_price().await.map_err(rpc_err)?),
        };
        let nonce = self
            .provider
            .get_transaction_count(self.signer)
            .pending()
            .await
            .map_err(rpc_err)?;

        Ok(TxOptions {
            value,
            gas_limit,
            gas_price,
            nonce,
        })
    }

    async fn submit_batch(&self, batch: Batch, opts: TxOptions) -> Result<TxHandle, GatewayError> {
        let encoded = batch.encode();
        warn!(bytes = encoded.len(), "batch size");

        let contract = Settlement::new(self.contract, &self.provider);
        let call = contract
            .newBatch(Bytes::from(encoded))
            .value(opts.value.compat())
            .gas(opts.gas_limit as u128)
            .gas_price(opts.gas_price.low_u128())
            .nonce(opts.nonce);
        let pending = call.send().await.map_err(contract_err)?;

        info!(hash = %pending.tx_hash(), "batch submitted on-chain");
        Ok((*pending.tx_hash()).compat())
    }

    async fn submit_fraud_proof(
        &self,
        evidence: FraudEvidence,
        opts: TxOptions,
    ) -> Result<TxHandle, GatewayError> {
        let contract = Settlement::new(self.contract, &self.provider);
        let call = contract
            .proveFraud(
                Bytes::copy_from_slice(evidence.address.as_bytes()),
                Bytes::from(evidence.account),
                Bytes::from(rlp::encode_list::<Vec<u8>, _>(&evidence.proof).to_vec()),
                evidence.state_root.compat(),
                Bytes::from(evidence.batch.encode()),
            )
            .value(opts.value.compat())
            .gas(opts.gas_limit as u128)
            .gas_price(opts.gas_price.low_u128())
            .nonce(opts.nonce);
        let pending = call.send().await.map_err(contract_err)?;

        info!(hash = %pending.tx_hash(), "fraud proof submitted on-chain");
        Ok((*pending.tx_hash()).compat())
    }

    async fn submit_withdraw(
        &self,
        request: WithdrawRequest,
        opts: TxOptions,
    ) -> Result<TxHandle, GatewayError> {
        let contract = Settlement::new(self.contract, &self.provider);
        let call = contract
            .withdraw(
                Bytes::copy_from_slice(request.address.as_bytes()),
                Bytes::from(request.account),
                Bytes::from(rlp::encode_list::<Vec<u8>, _>(&request.proof).to_vec()),
                request.state_root.compat(),
            )
            .value(opts.value.compat())
            .gas(opts.gas_limit as u128)
            .gas_price(opts.gas_price.low_u128())
            .nonce(opts.nonce);
        let pending = call.send().await.map_err(contract_err)?;

        info!(hash = %pending.tx_hash(), "withdraw submitted on-chain");
        Ok((*pending.tx_hash()).compat())
    }

    async fn submit_bond(&self, opts: TxOptions) -> Result<TxHandle, GatewayError> {
        let contract = Settlement::new(self.contract, &self.provider);
        let call = contract
            .bond()
            .value(opts.value.compat())
            .gas(opts.gas_limit as u128)
            .gas_price(opts.gas_price.low_u128())
            .nonce(opts.nonce);
        let pending = call.send().await.map_err(contract_err)?;

        Ok((*pending.tx_hash()).compat())
    }

    async fn submit_deposit(&self, opts: TxOptions) -> Result<TxHandle, GatewayError> {
        let contract = Settlement::new(self.contract, &self.provider);
        let call = contract
            .deposit()
            .value(opts.value.compat())
            .gas(opts.gas_limit as u128)
            .gas_price(opts.gas_price.low_u128())
            .nonce(opts.nonce);
        let pending = call.send().await.map_err(contract_err)?;

        info!(hash = %pending.tx_hash(), "deposit submitted on-chain");
        Ok((*pending.tx_hash()).compat())
    }
}
