//! Off-chain node for an optimistic rollup settlement contract.
//!
//! The node keeps a local replica of the rollup account state in a
//! Merkle-Patricia trie ([`state::OptimisticTrie`]) and reconstructs it by
//! replaying the settlement contract's event history ([`replay`]). On top of
//! that sit the two roles:
//! - the [`aggregator`], which buffers user transactions and commits them
//!   on-chain as batches, and
//! - the [`challenger`], which independently recomputes the expected state
//!   and disputes invalid batches with merkle fraud proofs.
//!
//! All chain access goes through the [`gateway::ChainGateway`] trait;
//! [`rpc::RpcGateway`] is the production implementation on top of an alloy
//! provider.

pub mod aggregator;
pub mod challenger;
pub mod compat;
pub mod error;
pub mod gateway;
pub mod replay;
pub mod rpc;
pub mod state;
pub mod tracing;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use error::NodeError;
