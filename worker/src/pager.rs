use std::{
    collections::{BTreeMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::task::JoinHandle;
use ucremote_core::{
    ContentEntry, SourceId,
    wire::{ListingPage, SearchDocument},
};

use crate::{
    error::ClientError,
    http::{HttpClient, Request},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagerOptions {
    /// Entries shown at once.
    pub page_size: usize,
    /// Pages fetched up front when a source is opened.
    pub initial_pages: usize,
    /// Entries fetched ahead once the reader reaches the cache edge.
    pub prefetch_size: usize,
}

impl Default for PagerOptions {
    fn default() -> Self {
        Self {
            page_size: 10,
            initial_pages: 4,
            prefetch_size: 20,
        }
    }
}

/// A slice of a source's listing, as cached when it was read.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    pub source: SourceId,
    pub offset: usize,
    pub count: usize,
    /// Cached entries in the window, by absolute position.
    pub entries: Vec<(usize, ContentEntry)>,
    /// The server has said there is nothing past `end`.
    pub complete: bool,
    pub end: Option<usize>,
}

impl Window {
    pub fn has_previous(&self) -> bool {
        self.offset > 0
    }

    pub fn has_next(&self) -> bool {
        self.end
            .is_none_or(|end| self.offset.saturating_add(self.count) < end)
    }
}

#[derive(Default)]
struct Listing {
    source: Option<SourceId>,
    generation: u64,
    /// `None` marks a position the server returned without a usable id.
    slots: BTreeMap<usize, Option<ContentEntry>>,
    /// One past the highest position any response covered.
    fetched_end: usize,
    known_end: Option<usize>,
    prefetching: HashSet<usize>,
}

impl Listing {
    fn select(&mut self, source: &SourceId) {
        if self.source.as_ref() != Some(source) {
            self.reset(source);
        }
    }

    fn reset(&mut self, source: &SourceId) {
        tracing::debug!("pager starting over on source {source}");
        *self = Self {
            source: Some(source.clone()),
            generation: self.generation + 1,
            ..Self::default()
        };
    }

    /// The uncached tail of `[offset, offset + count)`, clipped to the
    /// known end.
    fn missing(&self, offset: usize, count: usize) -> Option<(usize, usize)> {
        let mut end = offset.saturating_add(count);
        if let Some(known_end) = self.known_end {
            end = end.min(known_end);
        }

        let start = (offset..end).find(|position| !self.slots.contains_key(position))?;
        Some((start, end - start))
    }

    fn merge(&mut self, generation: u64, offset: usize, page: ListingPage) {
        if generation != self.generation {
            tracing::debug!("discarding listing page for a previous source");
            return;
        }

        let page_end = offset.saturating_add(page.len);
        for position in offset..page_end {
            self.slots.entry(position).or_insert(None);
        }
        for (index, entry) in page.entries {
            self.slots.insert(offset + index, Some(entry));
        }

        self.fetched_end = self.fetched_end.max(page_end);

        if !page.more {
            self.known_end = Some(self.known_end.map_or(page_end, |end| end.min(page_end)));
        } else if self.known_end.is_some_and(|end| page_end >= end) {
            tracing::debug!("listing grew past its end at {page_end}");
            self.known_end = None;
        }
    }

    fn window(&self, offset: usize, count: usize) -> Option<Window> {
        let source = self.source.clone()?;
        let entries = self
            .slots
            .range(offset..offset.saturating_add(count))
            .filter_map(|(position, slot)| Some((*position, slot.clone()?)))
            .collect();

        Some(Window {
            source,
            offset,
            count,
            entries,
            complete: self.known_end.is_some(),
            end: self.known_end,
        })
    }
}

/// Windowed cache over one source's content listing at a time.
pub struct ContentPager<H> {
    http: Arc<H>,
    base: Arc<str>,
    options: PagerOptions,
    listing: Arc<Mutex<Listing>>,
}

impl<H> Clone for ContentPager<H> {
    fn clone(&self) -> Self {
        Self {
            http: self.http.clone(),
            base: self.base.clone(),
            options: self.options,
            listing: self.listing.clone(),
        }
    }
}

impl<H: HttpClient> ContentPager<H> {
    pub fn new(http: Arc<H>, base: Arc<str>, options: PagerOptions) -> Self {
        Self {
            http,
            base,
            options,
            listing: Arc::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Listing> {
        self.listing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn options(&self) -> PagerOptions {
        self.options
    }

    pub fn source(&self) -> Option<SourceId> {
        self.lock().source.clone()
    }

    pub fn is_complete(&self) -> bool {
        self.lock().known_end.is_some()
    }

    /// Drop everything cached and start over on `source`. Fetches still in
    /// flight are discarded when they land.
    pub fn reset(&self, source: &SourceId) {
        self.lock().reset(source);
    }

    /// Start `source` afresh, fill the first few pages and return the first.
    pub async fn open(&self, source: &SourceId) -> Result<Window, ClientError> {
        let PagerOptions {
            page_size,
            initial_pages,
            ..
        } = self.options;
        self.reset(source);
        self.fill(source, 0, page_size.saturating_mul(initial_pages))
            .await?;
        self.request_window(source, 0, page_size).await
    }

    /// Read `[offset, offset + count)` of `source`, fetching what is not
    /// cached yet. Reaching the cache edge starts a background prefetch.
    pub async fn request_window(
        &self,
        source: &SourceId,
        offset: usize,
        count: usize,
    ) -> Result<Window, ClientError> {
        self.fill(source, offset, count).await?;

        let (window, prefetch) = {
            let listing = self.lock();
            let window = listing.window(offset, count);
            let at_edge = offset.saturating_add(count) >= listing.fetched_end
                && listing.known_end.is_none();
            (window, at_edge)
        };
        if prefetch {
            self.prefetch();
        }

        Ok(window.unwrap_or_else(|| Window {
            source: source.clone(),
            offset,
            count,
            entries: Vec::new(),
            complete: false,
            end: None,
        }))
    }

    /// The cached part of a window, without touching the network.
    pub fn window(&self, offset: usize, count: usize) -> Option<Window> {
        self.lock().window(offset, count)
    }

    /// Fetch `prefetch_size` entries from the cache edge in the background,
    /// unless the listing is complete or that fetch is already running.
    pub fn prefetch(&self) -> Option<JoinHandle<()>> {
        let (source, generation, offset) = {
            let mut listing = self.lock();
            let source = listing.source.clone()?;
            let offset = listing.fetched_end;
            if listing.known_end.is_some() || !listing.prefetching.insert(offset) {
                return None;
            }
            (source, listing.generation, offset)
        };

        let pager = self.clone();
        Some(tokio::spawn(async move {
            let count = pager.options.prefetch_size;
            if let Err(error) = pager.fetch(&source, generation, offset, count).await {
                tracing::warn!("prefetch of {source} at {offset} failed: {error}");
            }
            let mut listing = pager.lock();
            if listing.generation == generation {
                listing.prefetching.remove(&offset);
            }
        }))
    }

    async fn fill(&self, source: &SourceId, offset: usize, count: usize) -> Result<(), ClientError> {
        let (generation, missing) = {
            let mut listing = self.lock();
            listing.select(source);
            (listing.generation, listing.missing(offset, count))
        };

        match missing {
            Some((start, len)) => self.fetch(source, generation, start, len).await,
            None => Ok(()),
        }
    }

    async fn fetch(
        &self,
        source: &SourceId,
        generation: u64,
        offset: usize,
        count: usize,
    ) -> Result<(), ClientError> {
        let request = Request::get(&self.base, format!("uc/search/sources/{}", source.to_wire()))
            .query("offset", offset)
            .query("results", count);
        tracing::info!("fetching {request}");

        let resource = request.path.clone();
        let body = self.http.send(request).await?;
        let page = SearchDocument::parse(&body)
            .map_err(|source| ClientError::Protocol { resource, source })?
            .into_listing(source);

        self.lock().merge(generation, offset, page);
        Ok(())
    }
}
