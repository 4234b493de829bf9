//! Cursor pagination over the listing endpoint.
//!
//! `START -> FETCHING -> (MORE | DONE | ABORTED)`. The loop is bounded by the
//! item limit and by a page ceiling; cursor progress alone is never trusted
//! to end it.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use serde::Serialize;

use crate::error::FetchError;
use crate::ingest::executor::RequestExecutor;
use crate::ingest::providers::clob::ClobProvider;
use crate::ingest::types::{Cursor, RawItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    TerminalCursor,
    EmptyPage,
    LimitReached,
    PageCeiling,
    SchemaDrift,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::TerminalCursor => "terminal_cursor",
            StopReason::EmptyPage => "empty_page",
            StopReason::LimitReached => "limit_reached",
            StopReason::PageCeiling => "page_ceiling",
            StopReason::SchemaDrift => "schema_drift",
        }
    }
}

#[derive(Debug, Clone)]
pub enum PageEvent {
    /// Items of the page just fetched, already truncated to the fetch limit.
    Items(Vec<RawItem>),
    Done(StopReason),
    /// A page after the first could not be fetched.
    Aborted(Arc<FetchError>),
}

#[derive(Debug, Clone)]
pub enum PaginatorState {
    Start,
    More,
    Done(StopReason),
    Aborted(Arc<FetchError>),
    /// The first page failed; the error was handed to the caller.
    Failed,
}

#[derive(Debug, Clone, Copy)]
pub struct PageLimits {
    pub fetch_limit: usize,
    pub max_pages: usize,
}

pub struct Paginator<'a> {
    provider: &'a ClobProvider,
    executor: &'a RequestExecutor,
    limits: PageLimits,
    cursor: Cursor,
    state: PaginatorState,
    pages_fetched: usize,
    items_emitted: usize,
    stalled_pages: usize,
}

impl<'a> Paginator<'a> {
    pub fn new(provider: &'a ClobProvider, executor: &'a RequestExecutor, limits: PageLimits) -> Self {
        Self {
            provider,
            executor,
            limits: PageLimits {
                fetch_limit: limits.fetch_limit,
                max_pages: limits.max_pages.max(1),
            },
            cursor: Cursor::Initial,
            state: PaginatorState::Start,
            pages_fetched: 0,
            items_emitted: 0,
            stalled_pages: 0,
        }
    }

    pub fn state(&self) -> &PaginatorState {
        &self.state
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    pub fn items_emitted(&self) -> usize {
        self.items_emitted
    }

    /// Pages whose `next` cursor repeated the one used to fetch them.
    pub fn stalled_pages(&self) -> usize {
        self.stalled_pages
    }

    /// Fetch the next page.
    ///
    /// `Err` only for a failure on the first page. Once a terminal event has
    /// been returned, further calls repeat it without touching the network.
    pub async fn next_page(&mut self) -> Result<PageEvent, FetchError> {
        match &self.state {
            PaginatorState::Done(r) => return Ok(PageEvent::Done(*r)),
            PaginatorState::Aborted(e) => return Ok(PageEvent::Aborted(Arc::clone(e))),
            PaginatorState::Failed => {
                return Err(FetchError::Network(
                    "listing already failed on the first page".into(),
                ))
            }
            PaginatorState::Start | PaginatorState::More => {}
        }
        if self.items_emitted >= self.limits.fetch_limit {
            return Ok(self.finish(StopReason::LimitReached));
        }
        if self.pages_fetched >= self.limits.max_pages {
            return Ok(self.finish(StopReason::PageCeiling));
        }

        let page_no = self.pages_fetched + 1;
        let remaining = self.limits.fetch_limit - self.items_emitted;
        let req = self.provider.listing_request(&self.cursor, remaining);
        let t0 = Instant::now();
        let fetched = self.executor.execute(&req).await;
        histogram!("ingest_page_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

        let reply = match fetched {
            Ok(reply) => reply,
            Err(e) if page_no == 1 => {
                tracing::error!(page = page_no, error = %e, "first listing page failed");
                self.state = PaginatorState::Failed;
                return Err(e);
            }
            Err(e) => {
                tracing::error!(
                    page = page_no,
                    items_so_far = self.items_emitted,
                    error = %e,
                    "listing page failed, aborting with partial results"
                );
                let e = Arc::new(e);
                self.state = PaginatorState::Aborted(Arc::clone(&e));
                return Ok(PageEvent::Aborted(e));
            }
        };
        self.pages_fetched = page_no;
        counter!("ingest_pages_total").increment(1);

        let page = match self.provider.parse_page(&reply.body) {
            Ok(page) => page,
            Err(why) => {
                tracing::warn!(page = page_no, reason = %why, "unexpected listing shape, stopping");
                return Ok(self.finish(StopReason::SchemaDrift));
            }
        };
        if page.items.is_empty() {
            return Ok(self.finish(StopReason::EmptyPage));
        }
        if let (Cursor::Next(prev), Cursor::Next(next)) = (&self.cursor, &page.next) {
            if prev == next {
                self.stalled_pages += 1;
                counter!("ingest_stalled_cursor_total").increment(1);
                tracing::warn!(page = page_no, cursor = %next, "cursor did not advance");
            }
        }

        let mut items = page.items;
        if items.len() > remaining {
            items.truncate(remaining);
        }
        self.items_emitted += items.len();
        tracing::debug!(page = page_no, items = items.len(), next = ?page.next, "listing page");

        self.state = if page.next.is_end() {
            PaginatorState::Done(StopReason::TerminalCursor)
        } else if self.items_emitted >= self.limits.fetch_limit {
            PaginatorState::Done(StopReason::LimitReached)
        } else if self.pages_fetched >= self.limits.max_pages {
            PaginatorState::Done(StopReason::PageCeiling)
        } else {
            PaginatorState::More
        };
        self.cursor = page.next;
        Ok(PageEvent::Items(items))
    }

    fn finish(&mut self, reason: StopReason) -> PageEvent {
        self.state = PaginatorState::Done(reason);
        PageEvent::Done(reason)
    }
}
