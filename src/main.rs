//! Kyber widget transaction submitter
//!
//! Loads a configured intent, prices and signs it, and broadcasts it through
//! the submission pipeline.

use anyhow::{Context, Result};
use ethers::types::{Bytes, U256};
use ethers::utils::parse_units;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use kyber_widget_tx::chain::{ChainProvider, HttpGasFeed};
use kyber_widget_tx::config::{IntentConfig, Settings, TokenConfig};
use kyber_widget_tx::intent::{Account, Token, TransactionIntent};
use kyber_widget_tx::tx::{GasPriceSelection, LocalKeystore};
use kyber_widget_tx::{SubmissionPipeline, SubmissionRequest};

const DEFAULT_KEY_ENV: &str = "WIDGET_PRIVATE_KEY";

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::load()?;

    // Initialize logging
    init_logging(settings.logging.json);

    info!("Starting Kyber widget submitter v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Loaded configuration for chain {} with {} RPC endpoints",
        settings.network.chain_id,
        settings.network.rpc_urls.len()
    );

    let intent_config = settings
        .intent
        .clone()
        .context("No [intent] section configured")?;

    // Initialize chain access
    let provider = Arc::new(ChainProvider::new(&settings.network)?);
    let feed = Arc::new(HttpGasFeed::new(
        settings.gas.cache_url.clone(),
        Duration::from_millis(settings.network.request_timeout_ms),
    )?);

    // Initialize keystore
    let key_env = settings
        .wallet
        .private_key_env
        .clone()
        .unwrap_or_else(|| DEFAULT_KEY_ENV.to_string());
    let keystore = LocalKeystore::from_env(&key_env)?;
    let account = keystore
        .accounts()
        .into_iter()
        .next()
        .context("Keystore holds no accounts")?;

    let pipeline = SubmissionPipeline::from_settings(
        &settings,
        provider,
        feed,
        Arc::new(keystore),
    )?;
    info!("Submission pipeline initialized");

    // Prime the gas cache, then keep it fresh in the background
    let cancel = CancellationToken::new();
    let gas = pipeline.gas_cache();
    if let Err(e) = gas.refresh().await {
        warn!("Initial gas price refresh failed, using defaults: {}", e);
    }
    let refresher = gas.spawn_refresher(cancel.child_token());

    let request = build_request(&intent_config, account, settings.network.chain_id)?;

    let submission = pipeline.submit(request, &cancel);
    tokio::pin!(submission);

    let finished = tokio::select! {
        result = &mut submission => Some(result),
        _ = shutdown_signal() => None,
    };
    let outcome = match finished {
        Some(result) => result,
        None => {
            info!("Shutdown signal received, cancelling submission...");
            cancel.cancel();
            submission.await
        }
    };

    cancel.cancel();
    if let Err(e) = refresher.await {
        warn!("Gas refresher task ended abnormally: {}", e);
    }

    match outcome {
        Ok(receipt) => {
            info!(
                tx_hash = %receipt.tx_hash,
                nonce = receipt.nonce,
                fee_wei = %receipt.estimated_fee,
                "Transaction submitted"
            );
            println!("{}", receipt.tx_hash);
            Ok(())
        }
        Err(e) => {
            error!("{}", e);
            anyhow::bail!(e.user_message())
        }
    }
}

fn build_request(
    config: &IntentConfig,
    account: Account,
    chain_id: u64,
) -> Result<SubmissionRequest> {
    let from = token(&config.from)?;
    let to = token(&config.to)?;

    let amount_from = units(&config.amount_from, from.decimals())
        .context("Invalid intent.amount_from")?;

    let mut intent = TransactionIntent::new(config.kind, from, to, account, amount_from, chain_id)
        .with_destination(config.destination_wallet.clone());

    if let Some(amount_to) = &config.amount_to {
        let decimals = intent.to.decimals();
        intent = intent.with_amount_to(units(amount_to, decimals).context("Invalid intent.amount_to")?);
    }
    if let Some(commission) = config.commission_id {
        intent = intent.with_commission(commission);
    }
    if let Some(data) = &config.payment_data {
        let bytes: Bytes = data.parse().context("Invalid intent.payment_data")?;
        intent = intent.with_payment_data(bytes);
    }

    let gas_price = match &config.custom_gas_price_gwei {
        Some(gwei) => GasPriceSelection::Custom(
            units(gwei, 9).context("Invalid intent.custom_gas_price_gwei")?,
        ),
        None => GasPriceSelection::Tier(config.gas_tier),
    };

    let mut request = SubmissionRequest::new(intent).with_gas_price(gas_price);
    if let Some(percent) = config.slippage_percent {
        request = request.with_slippage(percent);
    }
    Ok(request)
}

fn token(config: &TokenConfig) -> Result<Token> {
    Ok(Token::new(config.address, config.decimals, config.symbol.clone())?)
}

fn units(amount: &str, decimals: u32) -> Result<U256> {
    let parsed = parse_units(amount.trim(), decimals)
        .with_context(|| format!("Cannot parse amount {:?}", amount))?;
    Ok(parsed.into())
}

fn init_logging(json: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,kyber_widget_tx=debug,hyper=warn,reqwest=warn")
    });

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
