//! The watch run: classify each unseen message, then alert or purge.
//!
//! One pass over the mailbox:
//! 1. `UID SEARCH` for unseen messages from the configured sender
//! 2. Decode each message and test subject + text against the keywords
//! 3. No hit in the text → dereference plain links and test the pages
//! 4. Hit → send an alert, then flag `\Seen`
//! 5. No hit → flag `\Deleted`
//! 6. One `EXPUNGE` for the whole batch, even when nothing new was flagged

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::channels::email::Mailbox;
use crate::channels::telegram::{Notifier, format_alert};
use crate::error::ChannelError;
use crate::pipeline::content::MessageContent;
use crate::pipeline::links::PageFetcher;
use crate::pipeline::matcher::{KeywordMatcher, merge_terms};

/// Knobs that shape a run without changing what it talks to.
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Word used in the alert headline, e.g. "Facebook".
    pub alert_label: String,
    /// Dereference links when the message text has no match.
    pub follow_links: bool,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            alert_label: "Facebook".to_string(),
            follow_links: true,
        }
    }
}

/// What happened to a single message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Alert sent and message marked `\Seen`.
    Alerted { terms: Vec<String> },
    /// No match; message flagged `\Deleted`.
    Deleted,
    /// Left untouched (still unseen) for the next run.
    Failed,
}

/// Counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub found: usize,
    pub alerted: usize,
    pub deleted: usize,
    pub failed: usize,
}

impl RunSummary {
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Alerted { .. } => self.alerted += 1,
            Outcome::Deleted => self.deleted += 1,
            Outcome::Failed => self.failed += 1,
        }
    }

    /// True when every message was either alerted or deleted.
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Classifies messages and acts on them.
pub struct Watcher {
    matcher: KeywordMatcher,
    fetcher: Arc<dyn PageFetcher>,
    notifier: Arc<dyn Notifier>,
    options: WatchOptions,
}

impl Watcher {
    pub fn new(
        matcher: KeywordMatcher,
        fetcher: Arc<dyn PageFetcher>,
        notifier: Arc<dyn Notifier>,
        options: WatchOptions,
    ) -> Self {
        Self {
            matcher,
            fetcher,
            notifier,
            options,
        }
    }

    /// Keywords found in a message, falling back to its linked pages.
    ///
    /// Returns an empty list when nothing matched.
    pub async fn classify(&self, content: &MessageContent) -> Vec<String> {
        let found = self.matcher.find_terms(&content.search_space());
        if !found.is_empty() || !self.options.follow_links {
            return found;
        }

        let mut found = Vec::new();
        for url in content.links() {
            match self.fetcher.fetch_text(&url).await {
                Ok(page) => {
                    let hits = self.matcher.find_terms(&page);
                    if !hits.is_empty() {
                        debug!(%url, terms = ?hits, "Keyword found on linked page");
                    }
                    merge_terms(&mut found, hits);
                }
                Err(e) => debug!(%url, error = %e, "Skipping unreachable link"),
            }
        }
        found
    }

    /// Process every unseen message from `sender`, then expunge and log out.
    ///
    /// Mailbox errors abort the run. Alert failures leave the message
    /// unseen and are counted in [`RunSummary::failed`].
    pub async fn run<M>(&self, mailbox: &mut M, sender: &str) -> Result<RunSummary, ChannelError>
    where
        M: Mailbox + ?Sized,
    {
        let uids = mailbox.search_unseen_from(sender).await?;
        info!(count = uids.len(), ?uids, "Unseen messages found");

        let mut summary = RunSummary {
            found: uids.len(),
            ..RunSummary::default()
        };

        for uid in uids {
            let outcome = self.process_one(mailbox, uid).await?;
            summary.record(&outcome);
        }

        // Also purges `\Deleted` messages left behind by an aborted run.
        mailbox.expunge().await?;
        debug!(deleted = summary.deleted, "Expunged deleted messages");

        if let Err(e) = mailbox.logout().await {
            warn!(error = %e, "IMAP logout failed");
        }

        Ok(summary)
    }

    async fn process_one<M>(&self, mailbox: &mut M, uid: u32) -> Result<Outcome, ChannelError>
    where
        M: Mailbox + ?Sized,
    {
        debug!(uid, "Fetching message");
        let raw = match mailbox.fetch_raw(uid).await {
            Ok(raw) => raw,
            Err(e) => {
                error!(uid, error = %e, "Failed to fetch message");
                return Ok(Outcome::Failed);
            }
        };

        let content = MessageContent::parse(&raw).unwrap_or_else(|| {
            warn!(uid, "Unparsable message, treating as non-matching");
            MessageContent::default()
        });

        let terms = self.classify(&content).await;
        info!(uid, subject = %content.subject, ?terms, "Message classified");

        if terms.is_empty() {
            info!(uid, "No keywords found, deleting");
            mailbox.mark_deleted(uid).await?;
            return Ok(Outcome::Deleted);
        }

        let links = content.links();
        let alert = format_alert(
            &self.options.alert_label,
            &terms,
            &content.subject,
            links.first().map(String::as_str),
        );

        if let Err(e) = self.notifier.notify(&alert).await {
            error!(uid, channel = self.notifier.name(), error = %e, "Alert delivery failed");
            return Ok(Outcome::Failed);
        }

        mailbox.mark_seen(uid).await?;
        Ok(Outcome::Alerted { terms })
    }
}

// ── Tests ───────────────────────────────────────────────────────────
