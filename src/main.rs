use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};

use mail_triage::channels::{ImapMailbox, SmtpSender};
use mail_triage::config::AppConfig;
use mail_triage::llm::{ClassifierClient, RetryPolicy, create_service};
use mail_triage::logging;
use mail_triage::pipeline::{DecisionEngine, EngineConfig, spawn_poll_loop};

#[tokio::main]
async fn main() {
    // A missing .env file is fine; the environment may already be populated.
    dotenv::dotenv().ok();

    // Install rustls crypto provider before any TLS usage. An already-installed
    // provider is fine.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let log_dir = std::env::var("MAIL_LOG_DIR")
        .ok()
        .filter(|dir| !dir.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("logs"));

    let guard = match logging::init(&log_dir) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: failed to initialize logging in {}: {e}", log_dir.display());
            std::process::exit(1);
        }
    };

    if let Err(e) = run().await {
        error!(severity = "critical", "Startup failed: {e:#}");
        // Flush the file writer before exiting.
        drop(guard);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("failed to load configuration")?;

    let service = create_service(&config.classifier)
        .context("failed to initialize classification client")?;
    let classifier = Arc::new(ClassifierClient::new(service, RetryPolicy::default()));

    let mailbox = Arc::new(ImapMailbox::new(config.imap.clone()));
    let sender = Arc::new(SmtpSender::new(config.smtp.clone()));
    let engine = Arc::new(DecisionEngine::new(
        EngineConfig::from_app_config(&config),
        classifier,
        mailbox,
        sender,
    ));

    info!(
        version = env!("CARGO_PKG_VERSION"),
        interval_secs = config.poll_interval.as_secs(),
        mailbox = %config.imap.user,
        folder = %config.imap.folder,
        log_dir = %config.log_dir.display(),
        "Mail triage service started"
    );

    let (handle, _shutdown) = spawn_poll_loop(engine, config.poll_interval);
    handle.await.context("poll loop task ended unexpectedly")?;
    Ok(())
}
