//! Mailscan admin CLI.
//!
//! Thin shell over the library crates: wires up configuration, the
//! database, the token vault, and the scan pipeline, then dispatches one
//! subcommand. Core business logic lives in the `crates/` libraries.

use anyhow::{bail, Context, Result};
use mailscan_classify::OpenAiClassifier;
use mailscan_core::{AppConfig, Provider};
use mailscan_db::{ledger, Database, ScanStatus};
use mailscan_mail::{ConnectionService, GmailClient, GoogleTokenRefresher};
use mailscan_scanner::{ScanOrchestrator, ScanScheduler};
use mailscan_vault::TokenCipher;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,mailscan=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

fn usage() -> ! {
    eprintln!(
        "usage: mailscan <command>\n\
         \n\
         commands:\n\
         \x20 migrate                          run database migrations\n\
         \x20 status <user>                    latest scan for the user\n\
         \x20 balance <user>                   credit balance\n\
         \x20 grant <user> <amount>            add a bonus credit grant\n\
         \x20 history <user>                   credit transaction history\n\
         \x20 connect <user> <email> <token>   store a Gmail refresh token\n\
         \x20 disconnect <user>                remove the Gmail connection\n\
         \x20 scan <user> [start_ts end_ts]    run a scan to completion"
    );
    std::process::exit(2);
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = AppConfig::load_with_env().context("load configuration")?;
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        usage();
    };

    let db = Database::open(&config.database.path)
        .await
        .context("open database")?;
    db.run_migrations().await.context("run migrations")?;

    match (command, args.len()) {
        ("migrate", 1) => {
            info!("migrations up to date");
        }
        ("status", 2) => status(&db, &args[1]).await?,
        ("balance", 2) => {
            let balance = ledger::balance(db.pool(), &args[1]).await?;
            println!("{balance}");
        }
        ("grant", 3) => grant(&db, &args[1], &args[2]).await?,
        ("history", 2) => history(&db, &args[1]).await?,
        ("connect", 4) => {
            connection_service(&config, db.clone())?
                .connect(&args[1], Provider::Gmail, &args[2], &args[3])
                .await?;
            println!("connected {} as {}", args[1], args[2]);
        }
        ("disconnect", 2) => {
            connection_service(&config, db.clone())?
                .disconnect(&args[1], Provider::Gmail)
                .await?;
            println!("disconnected {}", args[1]);
        }
        ("scan", 2) => scan(&config, db.clone(), &args[1], None).await?,
        ("scan", 4) => {
            let start_ts: i64 = args[2].parse().context("parse start_ts")?;
            let end_ts: i64 = args[3].parse().context("parse end_ts")?;
            scan(&config, db.clone(), &args[1], Some((start_ts, end_ts))).await?;
        }
        _ => usage(),
    }

    Ok(())
}

/// The vault key is environment-only; refusing to start without a
/// well-formed key is deliberate.
fn load_cipher() -> Result<TokenCipher> {
    let encoded = std::env::var("MAILSCAN_VAULT_KEY")
        .context("MAILSCAN_VAULT_KEY is required (base64, 32 bytes)")?;
    Ok(TokenCipher::from_base64(&encoded)?)
}

fn connection_service(config: &AppConfig, db: Database) -> Result<ConnectionService> {
    let secret = config
        .mail
        .google_client_secret
        .clone()
        .context("MAILSCAN_GOOGLE_CLIENT_SECRET is required")?;
    let refresher = GoogleTokenRefresher::new(
        config.mail.google_client_id.clone(),
        secret,
        config.scan.call_timeout_secs,
    )?;
    Ok(ConnectionService::new(
        db,
        load_cipher()?,
        Arc::new(refresher),
    ))
}

async fn status(db: &Database, user_id: &str) -> Result<()> {
    match mailscan_db::scan_logs::latest_for_user(db.pool(), user_id).await? {
        Some(scan) => {
            println!(
                "scan {} [{}] processed {}/{} job_emails {} credits {}",
                scan.id, scan.status, scan.processed, scan.total, scan.job_emails,
                scan.credits_spent
            );
            if let Some(message) = scan.error_message {
                println!("error: {message}");
            }
        }
        None => println!("no scans for {user_id}"),
    }
    Ok(())
}

async fn grant(db: &Database, user_id: &str, amount: &str) -> Result<()> {
    let amount: i64 = amount.parse().context("parse amount")?;
    if amount <= 0 {
        bail!("grant amount must be positive");
    }
    let id = ledger::insert(
        db.pool(),
        ledger::NewTransaction {
            user_id,
            amount,
            kind: ledger::TransactionKind::Bonus,
            reference_id: None,
            description: Some("admin grant"),
        },
    )
    .await?;
    println!("granted {amount} credits ({id})");
    Ok(())
}

async fn history(db: &Database, user_id: &str) -> Result<()> {
    let entries = ledger::history(db.pool(), user_id).await?;
    if entries.is_empty() {
        println!("no transactions for {user_id}");
        return Ok(());
    }
    for entry in entries {
        println!(
            "{} {:>8} {:<12} {}",
            entry.created_at,
            entry.amount,
            entry.kind,
            entry.description.unwrap_or_default()
        );
    }
    Ok(())
}

async fn scan(
    config: &AppConfig,
    db: Database,
    user_id: &str,
    range: Option<(i64, i64)>,
) -> Result<()> {
    let api_key = config
        .classify
        .api_key
        .clone()
        .context("MAILSCAN_OPENAI_API_KEY is required")?;
    let classifier = OpenAiClassifier::new(
        api_key,
        config.classify.model.clone(),
        config.classify.max_tokens,
        config.scan.call_timeout_secs,
    )?;
    let gmail = GmailClient::new(config.scan.call_timeout_secs)?;
    let broker = Arc::new(connection_service(config, db.clone())?);

    let orchestrator = Arc::new(ScanOrchestrator::new(
        db,
        broker,
        Arc::new(gmail),
        Arc::new(classifier),
        config.scan.clone(),
    ));

    let scan = orchestrator.prepare(user_id, Provider::Gmail, range).await?;
    println!("scan {} prepared: {} messages", scan.id, scan.total);
    orchestrator.start(&scan.id).await?;

    let scheduler = ScanScheduler::start(Arc::clone(&orchestrator));
    scheduler.enqueue(user_id).await?;

    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let Some(current) = orchestrator.get_status(user_id).await? else {
            bail!("scan record disappeared");
        };
        if current.status == ScanStatus::Preparing || current.status == ScanStatus::Running {
            println!(
                "  {}/{} processed, {} job emails",
                current.processed, current.total, current.job_emails
            );
            continue;
        }
        println!(
            "scan {} finished: {} ({}/{} processed, {} credits spent)",
            current.id, current.status, current.processed, current.total, current.credits_spent
        );
        if let Some(message) = current.error_message {
            println!("error: {message}");
        }
        break;
    }

    scheduler.shutdown().await;
    Ok(())
}
