//! Node-level error taxonomy.

use ethereum_types::H256;
use thiserror::Error;

use crate::{gateway::GatewayError, replay::ReplayError, state::StateError};

/// An error surfaced by the aggregator or challenger roles.
#[derive(Debug, Error)]
pub enum NodeError {
    /// A replay pass failed.
    #[error(transparent)]
    Replay(#[from] ReplayError),

    /// A full replay of the event history did not reproduce the on-chain
    /// root. Fatal for the aggregator, which cannot safely commit on a state
    /// it cannot reconstruct.
    #[error("replayed the full event history to root {computed:?} but the chain reports {on_chain:?}")]
    UnreachableRoot {
        /// Root computed by the local replay.
        computed: H256,
        /// Root the settlement contract reports.
        on_chain: H256,
    },

    /// The head batch is provably fraudulent; an honest aggregator refuses
    /// to build on it.
    #[error("head batch claiming root {0:?} is fraudulent")]
    FraudulentHead(H256),

    /// A direct gateway call failed outside of a replay pass.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// A state mutation failed while assembling a batch.
    #[error(transparent)]
    State(#[from] StateError),
}
