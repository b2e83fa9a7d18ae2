//! Tallybank Coordinator Binary
//!
//! Operator CLI for the transfer coordinator against PostgreSQL.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tallybank_common::{AccountId, Currency, TransferError, TransferId};
use tallybank_coordinator::{CoordinatorConfig, QuoteRequest, TransferCoordinator, TransferRequest};
use tallybank_fx::{ExchangeResolver, LedgerRateProvider};
use tallybank_ledger::{verify_account, LedgerStore, Page, PgLedgerStore};

/// Tallybank coordinator CLI
#[derive(Parser, Debug)]
#[command(name = "coordinator")]
#[command(about = "Ledger-backed funds transfers with currency conversion")]
struct Args {
    /// PostgreSQL DSN; overrides DATABASE_URL
    #[arg(long)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply schema migrations
    Migrate,

    /// Move money between two accounts
    Transfer {
        #[arg(long)]
        from: i64,
        #[arg(long)]
        to: i64,
        #[arg(long)]
        amount: Decimal,
        #[arg(long)]
        from_currency: String,
        /// Defaults to the source currency
        #[arg(long)]
        to_currency: Option<String>,
        /// Rate confirmed from a quote
        #[arg(long)]
        rate: Option<Decimal>,
        /// Retry transient failures per TRANSFER_RETRY_ATTEMPTS
        #[arg(long)]
        retry: bool,
    },

    /// Show conversion terms for a prospective transfer
    Quote {
        #[arg(long)]
        from_currency: String,
        #[arg(long)]
        to_currency: String,
        #[arg(long)]
        amount: Decimal,
    },

    /// List stored exchange rates with their expiry
    Rates,

    /// Show one transfer
    ShowTransfer { id: i64 },

    /// List an account's entries and transfers
    History {
        account: i64,
        #[arg(long, default_value = "1")]
        page: u32,
        #[arg(long, default_value = "20")]
        size: u32,
    },

    /// Reconcile an account's balance against its entries
    Audit { account: i64 },
}

/// Error body printed for a failed transfer or quote.
#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    status: u16,
    message: String,
}

impl From<&TransferError> for ErrorBody {
    fn from(err: &TransferError) -> Self {
        Self {
            code: err.error_code(),
            status: err.status_code(),
            message: err.public_message(),
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn report(err: TransferError) -> anyhow::Result<()> {
    if err.is_retryable() {
        error!(error = %err, "Transfer failed with a retryable error");
    } else {
        info!(error = %err, code = err.error_code(), "Request rejected");
    }
    print_json(&ErrorBody::from(&err))?;
    Err(anyhow::anyhow!("{}", err.public_message()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = CoordinatorConfig::from_env();
    if let Some(url) = args.database_url {
        config.database_url = url;
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let pg = PgLedgerStore::connect(&config.store_config())
        .await
        .context("connecting to the ledger database")?;

    if let Command::Migrate = args.command {
        pg.migrate().await?;
        return Ok(());
    }

    let store: Arc<dyn LedgerStore> = Arc::new(pg);
    let resolver = Arc::new(ExchangeResolver::new(
        Arc::new(LedgerRateProvider::new(store.clone())),
        config.resolver_config(),
    ));
    let coordinator = TransferCoordinator::new(store.clone(), resolver.clone(), config.fee_policy())
        .with_timeout(config.transfer.timeout);

    match args.command {
        Command::Migrate => Ok(()),

        Command::Transfer {
            from,
            to,
            amount,
            from_currency,
            to_currency,
            rate,
            retry,
        } => {
            let from_currency = Currency::new(from_currency);
            let to_currency = to_currency.map(Currency::new).unwrap_or_else(|| from_currency.clone());
            let mut request = TransferRequest::cross_currency(
                AccountId::new(from),
                AccountId::new(to),
                amount,
                from_currency,
                to_currency,
            );
            if let Some(rate) = rate {
                request = request.with_expected_rate(rate);
            }

            let result = if retry {
                coordinator
                    .execute_with_retry(request, &config.retry_policy())
                    .await
            } else {
                coordinator.execute(request).await
            };

            match result {
                Ok(outcome) => print_json(&outcome),
                Err(err) => report(err),
            }
        }

        Command::Quote {
            from_currency,
            to_currency,
            amount,
        } => {
            let quote = coordinator
                .quote(QuoteRequest {
                    from_currency: Currency::new(from_currency),
                    to_currency: Currency::new(to_currency),
                    amount,
                })
                .await;
            match quote {
                Ok(quote) => print_json(&quote),
                Err(err) => report(err),
            }
        }

        Command::Rates => {
            let rates = resolver.list_rates().await.map_err(TransferError::from);
            match rates {
                Ok(rates) => print_json(&rates),
                Err(err) => report(err),
            }
        }

        Command::ShowTransfer { id } => {
            let transfer = store
                .get_transfer(TransferId::new(id))
                .await?
                .with_context(|| format!("transfer {} not found", id))?;
            print_json(&transfer)
        }

        Command::History { account, page, size } => {
            let account = AccountId::new(account);
            let page = Page::numbered(page, size);
            let entries = store.list_entries(account, page).await?;
            let transfers = store.list_transfers(account, page).await?;
            print_json(&serde_json::json!({
                "account_id": account,
                "entries": entries,
                "transfers": transfers,
            }))
        }

        Command::Audit { account } => {
            let audit = verify_account(store.as_ref(), AccountId::new(account)).await?;
            print_json(&audit)?;
            if !audit.is_consistent {
                anyhow::bail!("account {} does not reconcile (drift {})", account, audit.drift());
            }
            Ok(())
        }
    }
}
