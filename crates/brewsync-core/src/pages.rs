//! Lazy page sequence over a [`SyncSource`].
//!
//! [`Pages`] only knows about cursors. It does not transform or write
//! anything, so pagination termination can be tested without a sink.

use tracing::debug;

use crate::error::{Error, Result};
use crate::source::{RawPage, SyncSource};
use crate::types::SyncWindow;

pub struct Pages<'a, S> {
    source: &'a S,
    window: SyncWindow,
    cursor: Option<String>,
    done: bool,
    pages: u64,
    records: u64,
    max_pages: Option<u64>,
}

impl<'a, S: SyncSource> Pages<'a, S> {
    pub fn new(source: &'a S, window: SyncWindow) -> Self {
        Self {
            source,
            window,
            cursor: None,
            done: false,
            pages: 0,
            records: 0,
            max_pages: None,
        }
    }

    /// Refuse to fetch more than `max_pages` pages.
    pub fn with_max_pages(mut self, max_pages: Option<u64>) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// Fetch the next page, or `None` once upstream stops returning a cursor.
    pub async fn next_page(&mut self) -> Result<Option<RawPage>> {
        if self.done {
            return Ok(None);
        }

        if let Some(max_pages) = self.max_pages {
            if self.pages >= max_pages {
                return Err(Error::PageLimitExceeded {
                    source_name: self.source.name().to_string(),
                    max_pages,
                });
            }
        }

        let page = self
            .source
            .fetch_page(&self.window, self.cursor.as_deref())
            .await?;

        self.pages += 1;
        self.records += page.records.len() as u64;

        let next = page.cursor.clone().filter(|c| !c.is_empty());
        if let (Some(previous), Some(next)) = (&self.cursor, &next) {
            if previous == next {
                return Err(Error::StuckCursor {
                    source_name: self.source.name().to_string(),
                    cursor: next.clone(),
                });
            }
        }

        debug!(
            source = self.source.name(),
            page = self.pages,
            records = page.records.len(),
            has_more = next.is_some(),
            "Fetched page"
        );

        self.done = next.is_none();
        self.cursor = next;

        Ok(Some(page))
    }

    /// Start over from the first page of the same window.
    pub fn restart(&mut self) {
        self.cursor = None;
        self.done = false;
        self.pages = 0;
        self.records = 0;
    }

    pub fn pages(&self) -> u64 {
        self.pages
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn is_done(&self) -> bool {
        self.done
    }
}
