//! Challenger daemon: watches the settlement contract and disputes
//! fraudulent batches until interrupted.

use std::time::Duration;

use alloy::{
    network::EthereumWallet, providers::ProviderBuilder, signers::local::PrivateKeySigner,
    transports::http::reqwest::Url,
};
use anyhow::Result;
use clap::Parser;
use rollup_node::{
    challenger::{ChallengerConfig, ChallengerNode, Diagnostic},
    rpc::RpcGateway,
    tracing::LogFormat,
};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

/// Challenger node for the rollup settlement contract.
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Chain JSON-RPC endpoint.
    #[arg(short = 'u', long, env = "ROLLUP_RPC_URL")]
    rpc_url: Url,

    /// Settlement contract address.
    #[arg(short, long, env = "ROLLUP_CONTRACT")]
    contract: alloy::primitives::Address,

    /// Hex-encoded private key of the challenger identity.
    #[arg(short = 'k', long, env = "ROLLUP_PRIVATE_KEY")]
    private_key: String,

    /// Seconds between verification passes.
    #[arg(long, env = "ROLLUP_POLL_INTERVAL", default_value_t = 5)]
    poll_interval: u64,

    /// Log output format. This daemon defaults to JSON for log collectors.
    #[arg(long, env = "ROLLUP_LOG_FORMAT", value_enum, default_value = "json")]
    log_format: LogFormat,
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
    let config = ChallengerConfig {
        poll_interval: Duration::from_secs(cli.poll_interval),
        ..ChallengerConfig::default()
    };
    let mut node = ChallengerNode::new(gateway, config);

    let (diagnostics_tx, mut diagnostics) = mpsc::channel(16);
    let (quit_tx, quit_rx) = watch::channel(false);
    let loop_handle = tokio::spawn(async move { node.run(diagnostics_tx, quit_rx).await });

    loop {
        tokio::select! {
            report = diagnostics.recv() => match report {
                Some(Diagnostic::FraudProven { address, handle }) => {
                    info!(?address, ?handle, "fraud proof submitted");
                }
                Some(Diagnostic::NotSynced { computed, on_chain }) => {
                    warn!(?computed, ?on_chain, "not synced with on-chain data");
                }
                Some(Diagnostic::TransientError(error)) => {
                    warn!(%error, "verification pass failed");
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                let _ = quit_tx.send(true);
                break;
            }
        }
    }

    loop_handle.await?;
    Ok(())
}
