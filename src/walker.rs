use std::fmt;
use std::time::Duration;

use tracing::{debug, warn};

use crate::fetch::{Fetch, FetchError};
use crate::page::{parse_fragments, AdFragment};

/// Why a walk stopped.
#[derive(Debug)]
pub enum WalkEnd {
    /// A page came back with no ads.
    Exhausted,
    /// The site served a different URL than requested (past-the-end page numbers
    /// bounce back to page 1).
    Redirected { requested: String, landed: String },
    FetchFailed(FetchError),
    PageLimit(u32),
}

impl fmt::Display for WalkEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalkEnd::Exhausted => write!(f, "no more ads"),
            WalkEnd::Redirected { requested, landed } => {
                write!(f, "redirected from {} to {}", requested, landed)
            }
            WalkEnd::FetchFailed(e) => write!(f, "fetch failed: {}", e),
            WalkEnd::PageLimit(n) => write!(f, "page limit {} reached", n),
        }
    }
}

/// URL of results page `page` (1-based) for a search URL.
///
/// Page 1 is the search URL itself. Later pages get a `page-N` segment before the
/// last path component: `.../b-category/item` → `.../b-category/page-3/item`.
pub fn page_url(base: &str, page: u32) -> String {
    if page <= 1 {
        return base.to_string();
    }
    let path_end = base.find(['?', '#']).unwrap_or(base.len());
    let authority = base.find("://").map_or(0, |i| i + 3);
    match base[authority..path_end].rfind('/') {
        Some(i) => {
            let slash = authority + i;
            format!("{}/page-{}{}", &base[..slash], page, &base[slash..])
        }
        // Host only: the page segment becomes the whole path.
        None => format!("{}/page-{}{}", &base[..path_end], page, &base[path_end..]),
    }
}

fn same_location(requested: &str, landed: &str) -> bool {
    match (reqwest::Url::parse(requested), reqwest::Url::parse(landed)) {
        (Ok(a), Ok(b)) => a == b,
        _ => requested == landed,
    }
}

/// Walks the result pages of one search. Finite and single-use: once it has
/// returned `None` it keeps returning `None`.
pub struct PageWalker<'a> {
    fetcher: &'a dyn Fetch,
    base: String,
    next: u32,
    page_delay: Duration,
    max_pages: Option<u32>,
    fetched: u32,
    end: Option<WalkEnd>,
}

impl<'a> PageWalker<'a> {
    pub fn new(
        fetcher: &'a dyn Fetch,
        base: &str,
        page_delay: Duration,
        max_pages: Option<u32>,
    ) -> Self {
        Self {
            fetcher,
            base: base.to_string(),
            next: 1,
            page_delay,
            max_pages,
            fetched: 0,
            end: None,
        }
    }

    /// Fetch and split the next page, or `None` when the walk is over.
    pub async fn next_page(&mut self) -> Option<Vec<AdFragment>> {
        if self.end.is_some() {
            return None;
        }
        if let Some(limit) = self.max_pages {
            if self.fetched >= limit {
                self.end = Some(WalkEnd::PageLimit(limit));
                return None;
            }
        }

        let url = page_url(&self.base, self.next);
        if self.next > 1 && !self.page_delay.is_zero() {
            tokio::time::sleep(self.page_delay).await;
        }
        self.next += 1;

        debug!("Fetching {}", url);
        let page = match self.fetcher.fetch(&url).await {
            Ok(page) => page,
            Err(e) => {
                warn!("Stopping walk at {}: {}", url, e);
                self.end = Some(WalkEnd::FetchFailed(e));
                return None;
            }
        };
        self.fetched += 1;

        if !same_location(&url, &page.final_url) {
            self.end = Some(WalkEnd::Redirected {
                requested: url,
                landed: page.final_url,
            });
            return None;
        }

        let fragments = parse_fragments(&page.body);
        if fragments.is_empty() {
            self.end = Some(WalkEnd::Exhausted);
            return None;
        }
        Some(fragments)
    }

    /// Pages actually fetched, including the one that ended the walk.
    pub fn pages_fetched(&self) -> u32 {
        self.fetched
    }

    #[cfg(test)]
    pub fn end_reason(&self) -> Option<&WalkEnd> {
        self.end.as_ref()
    }

    pub fn into_end_reason(self) -> Option<WalkEnd> {
        self.end
    }
}
