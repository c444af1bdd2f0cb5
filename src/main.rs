use std::sync::Arc;

use anyhow::Context;

use inbox_sentry::channels::{ImapMailbox, TelegramNotifier};
use inbox_sentry::config::{self, WatchConfig};
use inbox_sentry::pipeline::{HttpPageFetcher, KeywordMatcher, WatchOptions, Watcher};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Some(path) = config::load_env_file()? {
        tracing::debug!(path = %path.display(), "Loaded env file");
    }

    let config = WatchConfig::from_env()?;

    let matcher =
        KeywordMatcher::new(&config.search_terms).context("Failed to compile search terms")?;
    let fetcher = Arc::new(HttpPageFetcher::new(config.link_timeout)?);
    let notifier = Arc::new(TelegramNotifier::new(config.telegram.clone()));
    let watcher = Watcher::new(
        matcher,
        fetcher,
        notifier,
        WatchOptions {
            alert_label: config.alert_label.clone(),
            follow_links: config.follow_links,
        },
    );

    tracing::info!(
        host = %config.imap_host,
        mailbox = %config.mailbox,
        sender = %config.sender_filter,
        terms = ?config.search_terms,
        "Connecting to IMAP server"
    );

    let mut mailbox = ImapMailbox::open(
        &config.imap_host,
        config.imap_port,
        &config.username,
        &config.password,
        &config.mailbox,
    )
    .await
    .with_context(|| format!("Failed to open {} on {}", config.mailbox, config.imap_host))?;

    let summary = watcher
        .run(&mut mailbox, &config.sender_filter)
        .await
        .context("Mailbox poll failed")?;

    tracing::info!(
        found = summary.found,
        alerted = summary.alerted,
        deleted = summary.deleted,
        failed = summary.failed,
        "Done"
    );

    if !summary.is_clean() {
        anyhow::bail!("{} message(s) could not be processed", summary.failed);
    }
    Ok(())
}
