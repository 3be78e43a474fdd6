use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{Config, Feed};
use crate::db::{self, AdId, ScrapePass, Store, StoreError};
use crate::extract;
use crate::fetch::Fetch;
use crate::notify::{MailTransport, Notifier};
use crate::page::AdFragment;
use crate::utils::contains_any_keyword;
use crate::walker::{PageWalker, WalkEnd};

/// Outcome of one feed's pass.
#[derive(Debug, Default)]
pub struct PassReport {
    pub feed: String,
    pub pages: u32,
    pub fragments: usize,
    pub malformed: usize,
    pub excluded: usize,
    pub already_known: usize,
    pub extract_failed: usize,
    pub new_ids: Vec<AdId>,
    pub walk_end: Option<WalkEnd>,
    pub persisted: bool,
    pub delivered: usize,
    pub delivery_failures: usize,
}

/// Why a feed produced no report this cycle.
#[derive(Debug, Error)]
pub enum PassError {
    #[error("could not load known ads: {0}")]
    Load(StoreError),
}

/// What the filter decided for a single fragment.
enum Verdict {
    Malformed(String),
    Excluded,
    Known,
    Candidate(AdId),
}

/// Runs passes over every configured feed, forever or once.
pub struct Scheduler<'a> {
    config: &'a Config,
    store: &'a Store,
    fetcher: &'a dyn Fetch,
    mailer: &'a dyn MailTransport,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        config: &'a Config,
        store: &'a Store,
        fetcher: &'a dyn Fetch,
        mailer: &'a dyn MailTransport,
    ) -> Self {
        Self {
            config,
            store,
            fetcher,
            mailer,
        }
    }

    /// Cycle over all feeds, sleep, repeat. Never returns.
    pub async fn run_forever(&self) {
        let mut cycle = 0u64;
        loop {
            cycle += 1;
            let t0 = Instant::now();
            let reports = self.run_cycle().await;
            let new_ads: usize = reports.iter().map(|r| r.new_ids.len()).sum();
            info!(
                "Cycle {} done in {:.1}s: {} feeds, {} new ads. Sleeping {}s",
                cycle,
                t0.elapsed().as_secs_f64(),
                reports.len(),
                new_ads,
                self.config.scrape_delay_secs
            );
            tokio::time::sleep(self.config.scrape_delay()).await;
        }
    }

    /// One pass per feed, strictly in order. A failing feed never stops the others.
    pub async fn run_cycle(&self) -> Vec<PassReport> {
        let mut reports = Vec::with_capacity(self.config.feeds.len());
        for feed in &self.config.feeds {
            match self.run_pass(feed).await {
                Ok(report) => reports.push(report),
                Err(e) => error!("{}: skipping feed this cycle, {}", feed.name, e),
            }
        }
        reports
    }

    /// Load → paginate → extract and filter → merge → persist → notify.
    pub async fn run_pass(&self, feed: &Feed) -> Result<PassReport, PassError> {
        info!("{}: starting pass", feed.name);
        let known = self.store.load(&feed.name).map_err(PassError::Load)?;
        debug!("{}: {} known ads", feed.name, known.len());

        let mut report = PassReport {
            feed: feed.name.clone(),
            ..Default::default()
        };
        let mut pass = ScrapePass::default();

        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.enable_steady_tick(Duration::from_millis(120));

        let mut walker = PageWalker::new(
            self.fetcher,
            &feed.url,
            self.config.page_delay(),
            self.config.max_pages,
        );
        while let Some(fragments) = walker.next_page().await {
            report.fragments += fragments.len();
            for fragment in &fragments {
                self.consider(feed, fragment, &known, &mut pass, &mut report);
            }
            pb.set_message(format!(
                "{}: page {} ({} new so far)",
                feed.name,
                walker.pages_fetched(),
                pass.len()
            ));
        }
        pb.finish_and_clear();

        report.pages = walker.pages_fetched();
        report.walk_end = walker.into_end_reason();
        if let Some(WalkEnd::FetchFailed(e)) = &report.walk_end {
            warn!("{}: pagination aborted ({}), keeping partial results", feed.name, e);
        }
        report.new_ids = pass.iter().map(|r| r.id).collect();
        info!(
            "{}: {} pages, {} fragments, {} new, {} known, {} excluded, {} unreadable ({})",
            feed.name,
            report.pages,
            report.fragments,
            pass.len(),
            report.already_known,
            report.excluded,
            report.malformed + report.extract_failed,
            report
                .walk_end
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_default()
        );

        let merged = db::merge(known, &pass);
        if let Err(e) = self.store.persist(&feed.name, &merged) {
            // Not notifying means the same ads are found and mailed on the next pass.
            error!(
                "{}: failed to persist {} ads, skipping notification: {}",
                feed.name,
                merged.len(),
                e
            );
            return Ok(report);
        }
        report.persisted = true;

        let mail = &self.config.mail;
        let outcomes = Notifier::new(self.mailer, &mail.sender, &mail.recipients)
            .notify(&feed.name, &pass)
            .await;
        report.delivered = outcomes.iter().filter(|(_, r)| r.is_ok()).count();
        report.delivery_failures = outcomes.len() - report.delivered;

        Ok(report)
    }

    fn consider(
        &self,
        feed: &Feed,
        fragment: &AdFragment,
        known: &db::KnownAdSet,
        pass: &mut ScrapePass,
        report: &mut PassReport,
    ) {
        match self.verdict(fragment, known, pass) {
            Verdict::Malformed(why) => {
                warn!("{}: skipping unreadable ad: {}", feed.name, why);
                report.malformed += 1;
            }
            Verdict::Excluded => {
                debug!(
                    "{}: excluded {:?}",
                    feed.name,
                    fragment.title.as_deref().unwrap_or_default()
                );
                report.excluded += 1;
            }
            Verdict::Known => report.already_known += 1,
            Verdict::Candidate(id) => match extract::extract(fragment, &self.config.site_base) {
                Ok(record) => {
                    pass.insert(record);
                }
                Err(e) => {
                    warn!("{}: skipping ad {}: {}", feed.name, id, e);
                    report.extract_failed += 1;
                }
            },
        }
    }

    fn verdict(&self, fragment: &AdFragment, known: &db::KnownAdSet, pass: &ScrapePass) -> Verdict {
        let id = match extract::ad_id(fragment) {
            Ok(id) => id,
            Err(e) => return Verdict::Malformed(e.to_string()),
        };
        let Some(title) = fragment.title.as_deref() else {
            return Verdict::Malformed(format!("ad {} has no title", id));
        };
        if contains_any_keyword(title, &self.config.exclude_words) {
            return Verdict::Excluded;
        }
        if known.contains(id) || pass.contains(id) {
            return Verdict::Known;
        }
        Verdict::Candidate(id)
    }
}
