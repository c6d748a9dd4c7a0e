//! Generic page walker over the platform's listing endpoints.
//!
//! The walker is pull-based: callers ask for one page at a time, process
//! it (usually upserting every item), and ask again until `None`. Each
//! fetch goes through the rate-limited client, so throttling only ever
//! delays a page, never ends the walk.

use std::future::Future;
use std::marker::PhantomData;

use tracing::warn;

use archive_types::{RemoteMessage, RemotePage, SlackTs};

use crate::error::Result;
use crate::rate_limit::RateLimitedClient;

/// A fetched page plus where the next one starts. `next == None` marks the
/// terminal page.
#[derive(Debug)]
pub struct Step<T, C> {
    pub items: Vec<T>,
    pub next: Option<C>,
}

/// Cursor endpoints (users, channels): done when the cursor comes back empty.
pub fn by_cursor<T>(page: RemotePage<T>) -> Step<T, String> {
    let next = (!page.next_cursor.is_empty()).then_some(page.next_cursor);
    Step {
        items: page.items,
        next,
    }
}

/// Thread replies: done when `has_more` is false.
pub fn by_has_more<T>(page: RemotePage<T>) -> Step<T, String> {
    let next = page.has_more.then_some(page.next_cursor);
    Step {
        items: page.items,
        next,
    }
}

/// Where the next history request starts: messages after `oldest`, or the
/// page `cursor` names when the platform handed one out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryCursor {
    pub oldest: Option<SlackTs>,
    pub cursor: String,
}

impl HistoryCursor {
    pub fn after(oldest: Option<SlackTs>) -> Self {
        Self {
            oldest,
            cursor: String::new(),
        }
    }
}

/// Channel history: the next request moves `oldest` forward to the first
/// message of this page. An empty page that still has more follows the
/// page cursor instead, keeping the current bound.
pub fn by_oldest(
    page: RemotePage<RemoteMessage>,
    current: &HistoryCursor,
) -> Step<RemoteMessage, HistoryCursor> {
    let next = page.has_more.then(|| match page.items.first() {
        Some(first) => HistoryCursor::after(Some(first.ts)),
        None => HistoryCursor {
            oldest: current.oldest,
            cursor: page.next_cursor.clone(),
        },
    });
    Step {
        items: page.items,
        next,
    }
}

pub struct Paginator<'a, T, C, F> {
    client: &'a RateLimitedClient,
    label: &'static str,
    cursor: C,
    fetch: F,
    pages: usize,
    done: bool,
    _items: PhantomData<fn() -> T>,
}

impl<'a, T, C, F, Fut> Paginator<'a, T, C, F>
where
    C: Clone + PartialEq + std::fmt::Debug,
    F: FnMut(C) -> Fut,
    Fut: Future<Output = Result<Step<T, C>>>,
{
    /// Start a walk at `start`. `fetch` performs one raw page request for
    /// a cursor.
    pub fn new(client: &'a RateLimitedClient, label: &'static str, start: C, fetch: F) -> Self {
        Self {
            client,
            label,
            cursor: start,
            fetch,
            pages: 0,
            done: false,
            _items: PhantomData,
        }
    }

    /// Fetch the next page. `Ok(None)` once the terminal page has been
    /// returned; no request is made after that. An empty page is returned
    /// as `Some(vec![])` when the platform says more pages follow. A page
    /// that points back at its own cursor ends the walk.
    pub async fn next_page(&mut self) -> Result<Option<Vec<T>>> {
        if self.done {
            return Ok(None);
        }

        let client = self.client;
        let cursor = self.cursor.clone();
        let fetch = &mut self.fetch;
        let step = client.call(self.label, || fetch(cursor.clone())).await?;

        self.pages += 1;
        match step.next {
            Some(next) if next == cursor => {
                warn!(operation = self.label, cursor = ?cursor, "Page made no progress, ending walk");
                self.done = true;
            }
            Some(next) => self.cursor = next,
            None => self.done = true,
        }

        Ok(Some(step.items))
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages
    }
}
