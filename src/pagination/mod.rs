//! Generic search pagination over platform resources.
//!
//! Every resource service exposes the same `search-*` shape: a POST with
//! `{filter, sort, limit, page}` answering `{results, total}`. The engine
//! drives those calls two ways: bounded single pages ([`search`]) and a
//! lazy pull-based sequence ([`SearchPager`]) with either offset or
//! keyset cursoring.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::Stream;
use log::debug;
use serde_json::{json, Map, Value};

use crate::error::{Error, Result};
use crate::http::connection::Connection;
use crate::http::request::Request;

/// Field used as the keyset cursor tie-break.
const ID_FIELD: &str = "_id";

/// Pagination defaults for one platform deployment.
#[derive(Debug, Clone)]
pub struct PaginationConfig {
    /// Page number of the first page; most services count from 1, a few
    /// legacy ones from 0.
    pub first_page: u32,
    /// Page size applied when a query does not set one.
    pub default_limit: u32,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self { first_page: 1, default_limit: 100 }
    }
}

/// Search parameters, opaque to the resource layer shaping them.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub filter: Option<Value>,
    /// `{"field": 1 | -1, ...}` in significance order.
    pub sort: Option<Value>,
    pub limit: Option<u32>,
    pub page: Option<u32>,
    /// Cursor on the last-seen `_id` instead of page numbers. Safe under
    /// concurrent inserts/deletes at the page boundary.
    pub keyset_pagination: bool,
}

impl SearchQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Value) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn sort(mut self, sort: Value) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn keyset_pagination(mut self, enabled: bool) -> Self {
        self.keyset_pagination = enabled;
        self
    }
}

/// One page of results with the server-reported total, when present.
#[derive(Debug, Clone)]
pub struct Page {
    pub results: Vec<Value>,
    pub total: Option<u64>,
}

/// Fetch one bounded page from a `search-*` endpoint.
pub async fn search(
    connection: &Connection,
    path: &str,
    query: &SearchQuery,
    config: &PaginationConfig,
) -> Result<Page> {
    let mut body = Map::new();
    if let Some(filter) = &query.filter {
        body.insert("filter".into(), filter.clone());
    }
    if let Some(sort) = &query.sort {
        body.insert("sort".into(), sort.clone());
    }
    body.insert("limit".into(), json!(query.limit.unwrap_or(config.default_limit)));
    body.insert("page".into(), json!(query.page.unwrap_or(config.first_page)));

    // Search endpoints are read-only POSTs, safe to replay.
    let decoded = connection
        .execute_json(Request::post(path).json(Value::Object(body)).retryable())
        .await?;
    parse_page(decoded)
}

fn parse_page(decoded: Value) -> Result<Page> {
    match decoded {
        // Some legacy services answer a bare array.
        Value::Array(results) => Ok(Page { results, total: None }),
        Value::Object(mut map) => {
            let results = match map.remove("results") {
                Some(Value::Array(results)) => results,
                _ => return Err(Error::Decode("search response has no results array".into())),
            };
            let total = map.get("total").and_then(Value::as_u64);
            Ok(Page { results, total })
        }
        other => Err(Error::Decode(format!("unexpected search response: {other}"))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PagerState {
    Fetching,
    HasItems,
    Exhausted,
}

/// Lazy pull-based sequence of resources spanning pages.
///
/// Single-pass and not restartable: create a new pager to iterate again.
/// Each page fetch is deferred until the previous page's items have been
/// consumed.
pub struct SearchPager {
    connection: Arc<Connection>,
    path: String,
    filter: Option<Value>,
    /// Effective sort; in keyset mode a deterministic `_id` tie-break is
    /// always appended when missing.
    sort: Map<String, Value>,
    page_size: u32,
    keyset: bool,
    /// Next page number (offset mode only).
    page: u32,
    /// Sort-field values of the last item seen (keyset mode only).
    cursor: Option<Vec<(String, Value)>>,
    seen: u64,
    total: Option<u64>,
    buffer: VecDeque<Value>,
    state: PagerState,
}

impl SearchPager {
    pub fn new(
        connection: Arc<Connection>,
        path: impl Into<String>,
        query: SearchQuery,
        config: &PaginationConfig,
    ) -> Self {
        let keyset = query.keyset_pagination;
        // Chronological default so resources created during the walk are
        // still found.
        let mut sort = query
            .sort
            .as_ref()
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_else(|| {
                let mut sort = Map::new();
                sort.insert("creation_date".into(), json!(1));
                sort
            });
        if keyset && !sort.contains_key(ID_FIELD) {
            let primary = sort.values().next().map(sort_direction).unwrap_or(1);
            sort.insert(ID_FIELD.into(), json!(primary));
        }

        Self {
            connection,
            path: path.into(),
            filter: query.filter,
            sort,
            page_size: query.limit.unwrap_or(config.default_limit),
            keyset,
            page: query.page.unwrap_or(config.first_page),
            cursor: None,
            seen: 0,
            total: None,
            buffer: VecDeque::new(),
            state: PagerState::Fetching,
        }
    }

    /// Next item in the logical sequence, fetching lazily.
    pub async fn next(&mut self) -> Result<Option<Value>> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Ok(Some(item));
            }
            match self.state {
                PagerState::Exhausted => return Ok(None),
                PagerState::Fetching | PagerState::HasItems => self.fetch_page().await?,
            }
        }
    }

    /// Adapt the pager into a [`futures::Stream`] of items.
    pub fn into_stream(self) -> impl Stream<Item = Result<Value>> {
        futures::stream::unfold(self, |mut pager| async move {
            match pager.next().await {
                Ok(Some(item)) => Some((Ok(item), pager)),
                Ok(None) => None,
                Err(err) => {
                    pager.state = PagerState::Exhausted;
                    pager.buffer.clear();
                    Some((Err(err), pager))
                }
            }
        })
    }

    async fn fetch_page(&mut self) -> Result<()> {
        self.state = PagerState::Fetching;

        let body = self.request_body();
        debug!("fetching search page from {}", self.path);
        let decoded = self
            .connection
            .execute_json(Request::post(&self.path).json(body).retryable())
            .await?;
        let page = parse_page(decoded)?;

        let count = page.results.len();
        if self.keyset {
            if let Some(last) = page.results.last() {
                self.cursor = Some(self.cursor_of(last)?);
            }
        } else {
            self.page += 1;
        }
        self.seen += count as u64;
        if page.total.is_some() {
            self.total = page.total;
        }

        // A page shorter than the limit signals exhaustion; a full page
        // never implies more unless the total says so.
        let exhausted = count < self.page_size as usize
            || self.total.is_some_and(|total| self.seen >= total);

        self.buffer.extend(page.results);
        self.state = if exhausted { PagerState::Exhausted } else { PagerState::HasItems };
        Ok(())
    }

    fn request_body(&self) -> Value {
        let mut body = Map::new();
        if self.keyset {
            match self.keyset_filter() {
                Some(filter) => {
                    body.insert("filter".into(), filter);
                }
                None => {
                    if let Some(filter) = &self.filter {
                        body.insert("filter".into(), filter.clone());
                    }
                }
            }
        } else {
            if let Some(filter) = &self.filter {
                body.insert("filter".into(), filter.clone());
            }
            body.insert("page".into(), json!(self.page));
        }
        body.insert("sort".into(), Value::Object(self.sort.clone()));
        body.insert("limit".into(), json!(self.page_size));
        Value::Object(body)
    }

    /// Filter bounding the next page strictly after the cursor, merged
    /// with the user filter.
    fn keyset_filter(&self) -> Option<Value> {
        let cursor = self.cursor.as_ref()?;

        // Lexicographic bound over the sort fields:
        // (k1 > v1) OR (k1 = v1 AND k2 > v2) OR ...
        let mut clauses = Vec::with_capacity(cursor.len());
        for pivot in 0..cursor.len() {
            let mut clause = Map::new();
            for (field, value) in &cursor[..pivot] {
                clause.insert(field.clone(), json!({"$eq": value}));
            }
            let (field, value) = &cursor[pivot];
            let op = if self.direction(field) >= 0 { "$gt" } else { "$lt" };
            clause.insert(field.clone(), json!({op: value}));
            clauses.push(Value::Object(clause));
        }
        let bound = if clauses.len() == 1 {
            clauses.remove(0)
        } else {
            json!({"$or": clauses})
        };

        Some(match &self.filter {
            Some(filter) => json!({"$and": [filter, bound]}),
            None => bound,
        })
    }

    fn direction(&self, field: &str) -> i64 {
        self.sort.get(field).map(sort_direction).unwrap_or(1)
    }

    fn cursor_of(&self, item: &Value) -> Result<Vec<(String, Value)>> {
        self.sort
            .keys()
            .map(|field| match item.get(field) {
                Some(value) => Ok((field.clone(), value.clone())),
                None => Err(Error::Decode(format!(
                    "keyset pagination requires every item to carry the sort field {field:?}"
                ))),
            })
            .collect()
    }
}

/// Normalize a sort direction to `1` or `-1`; services accept both
/// integer and float forms, only the sign matters.
fn sort_direction(value: &Value) -> i64 {
    let negative = value
        .as_i64()
        .map(|direction| direction < 0)
        .or_else(|| value.as_f64().map(|direction| direction < 0.0))
        .unwrap_or(false);
    if negative {
        -1
    } else {
        1
    }
}
