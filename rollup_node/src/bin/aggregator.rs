//! Batch commit driver: syncs an aggregator against the settlement
//! contract and optionally floods it with demo transfers to force a
//! commit, mirroring the devnet workflow.

use alloy::{
    network::EthereumWallet, providers::ProviderBuilder, signers::local::PrivateKeySigner,
    transports::http::reqwest::Url,
};
use anyhow::{bail, Result};
use clap::Parser;
use ethereum_types::{H160, U256};
use rollup_node::{
    aggregator::{AggregatorConfig, AggregatorNode, TxPolicy, MAX_TRANSACTIONS_BATCH},
    rpc::RpcGateway,
    tracing::LogFormat,
    types::Transaction,
};
use tracing::info;

/// Aggregator node for the rollup settlement contract.
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Chain JSON-RPC endpoint.
    #[arg(short = 'u', long, env = "ROLLUP_RPC_URL")]
    rpc_url: Url,

    /// Settlement contract address.
    #[arg(short, long, env = "ROLLUP_CONTRACT")]
    contract: alloy::primitives::Address,

    /// Hex-encoded private key of the aggregator identity.
    #[arg(short = 'k', long, env = "ROLLUP_PRIVATE_KEY")]
    private_key: String,

    /// Buffered transactions that trigger a commit.
    #[arg(long, env = "ROLLUP_BATCH_THRESHOLD", default_value_t = MAX_TRANSACTIONS_BATCH)]
    batch_threshold: usize,

    /// Apply underfunded transfers instead of rejecting them. Only for
    /// test rigs exercising the challenger.
    #[arg(long)]
    byzantine: bool,

    /// Feed this many demo transfers into the buffer after syncing.
    #[arg(long)]
    flood: Option<usize>,

    /// Sender of the demo transfers.
    #[arg(long, value_parser = parse_address, requires = "flood")]
    flood_from: Option<H160>,

    /// Recipient of the demo transfers.
    #[arg(long, value_parser = parse_address, requires = "flood")]
    flood_to: Option<H160>,

    /// Value of each demo transfer, in wei.
    #[arg(long, value_parser = parse_u256, default_value = "10000000000000000")]
    flood_value: U256,

    /// Log output format. Text suits this run-and-exit driver.
    #[arg(long, env = "ROLLUP_LOG_FORMAT", value_enum, default_value = "text")]
    log_format: LogFormat,
}

fn parse_address(s: &str) -> Result<H160, String> {
    let hex = s.strip_prefix("0x").unwrap_or(s);
    hex.parse().map_err(|e| format!("invalid address: {e}"))
}

fn parse_u256(s: &str) -> Result<U256, String> {
    U256::from_dec_str(s).map_err(|e| format!("invalid amount: {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    rollup_node::tracing::init(cli.log_format);

    let signer: PrivateKeySigner = cli.private_key.parse()?;
    let signer_address = signer.address();
    let provider = ProviderBuilder::new()
        .with_recommended_fillers()
        .wallet(EthereumWallet::from(signer))
        .on_http(cli.rpc_url);
    info!(contract = %cli.contract, "connected to the chain endpoint");

    let gateway = RpcGateway::new(provider, cli.contract, signer_address);
    let config = AggregatorConfig {
        batch_threshold: cli.batch_threshold,
        policy: match cli.byzantine {
            true => TxPolicy::Byzantine,
            false => TxPolicy::Honest,
        },
        ..AggregatorConfig::default()
    };
    let mut node = AggregatorNode::new(gateway, config);

    if !node.synced().await? {
        bail!("unable to synchronize with on-chain state");
    }
    info!(root = ?node.state_root(), "synchronized with on-chain state");

    if let Some(count) = cli.flood {
        let (Some(from), Some(to)) = (cli.flood_from, cli.flood_to) else {
            bail!("--flood requires --flood-from and --flood-to");
        };
        info!(count, "flooding demo transfers");
        for _ in 0..count {
            let nonce = node.nonce_of(from);
            node.submit_transaction(Transaction {
                from,
                to,
                value: cli.flood_value,
                gas: U256::from(1_000_000_000_000_000_000u64),
                nonce,
            })
            .await?;
        }
        info!(buffered = node.buffered(), "flood complete");
    }

    Ok(())
}
