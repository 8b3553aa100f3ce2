//! Multipart file upload engine.
//!
//! Splits a file into parts sized to respect the service's part-count
//! bound, uploads parts through the shared connection (each part inherits
//! the retry budget), and commits the session with all part
//! acknowledgements in index order. Small files go through a single-shot
//! path instead.

use std::collections::HashMap;
use std::path::Path;

use futures::stream::{self, StreamExt, TryStreamExt};
use log::{debug, info, warn};
use reqwest::Method;
use serde_json::{json, Map, Value};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::{Error, Result};
use crate::http::connection::Connection;
use crate::http::request::Request;

/// Part size floor imposed by the storage backend.
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;
/// Part size ceiling imposed by the storage backend.
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;
/// A session may never hold more parts than this.
pub const MAX_PARTS: u64 = 10_000;
/// Default part size when the caller does not pick one.
pub const DEFAULT_PART_SIZE: u64 = 10 * 1024 * 1024;

/// Statuses meaning the session is gone server-side; retrying the part
/// cannot help, the whole upload must be reinitiated by the caller.
const STALE_SESSION_STATUSES: [u16; 2] = [409, 410];

/// Upload tuning knobs.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Wanted part size; grown when the file would otherwise exceed
    /// `max_parts`, never shrunk.
    pub part_size: u64,
    /// Files at or below this size skip the multipart flow entirely.
    pub multipart_threshold: u64,
    pub min_part_size: u64,
    pub max_part_size: u64,
    pub max_parts: u64,
    /// Bound on concurrent part transfers.
    pub concurrency: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            multipart_threshold: DEFAULT_PART_SIZE,
            min_part_size: MIN_PART_SIZE,
            max_part_size: MAX_PART_SIZE,
            max_parts: MAX_PARTS,
            concurrency: 4,
        }
    }
}

/// Routes and fixed body fields for one upload destination. The resource
/// layer fills this in; `fields` is opaque to the engine and merged into
/// every platform call of the session.
#[derive(Debug, Clone)]
pub struct UploadDestination {
    /// Single-shot: returns `{url, headers?}` for a whole-file PUT.
    pub init_upload_path: String,
    /// Single-shot: marks the element uploaded.
    pub complete_upload_path: String,
    /// Multipart: returns `{upload_id, parts?: [{index, url}]}`.
    pub init_multipart_path: String,
    /// Multipart: returns `{url, headers?}` for one part.
    pub part_url_path: String,
    /// Multipart: commits `{upload_id, parts: [{index, etag}]}`.
    pub complete_multipart_path: String,
    /// Multipart: best-effort session abort.
    pub abort_multipart_path: Option<String>,
    pub fields: Value,
}

#[derive(Debug, Clone, Copy)]
struct PartPlan {
    /// 1-based part number, also the commit index.
    part_number: u64,
    offset: u64,
    size: u64,
}

#[derive(Debug, Clone)]
struct CompletedPart {
    part_number: u64,
    etag: Option<String>,
}

/// Uploads files to signed storage targets through the shared connection.
pub struct Uploader {
    connection: std::sync::Arc<Connection>,
    config: UploadConfig,
}

impl Uploader {
    pub fn new(connection: std::sync::Arc<Connection>, config: UploadConfig) -> Self {
        Self { connection, config }
    }

    /// Upload `file_path` to `destination`.
    ///
    /// Fails with [`Error::Io`] on local file trouble, [`Error::Http`] on
    /// non-retryable platform responses and [`Error::UploadAborted`] when
    /// the multipart session had to be abandoned.
    pub async fn upload(&self, file_path: &Path, destination: &UploadDestination) -> Result<()> {
        let file_size = tokio::fs::metadata(file_path).await?.len();
        let filename = file_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        if file_size <= self.config.multipart_threshold {
            // A zero-length file goes through here as one empty part.
            return self.single_shot(file_path, &filename, file_size, destination).await;
        }

        let part_size = plan_part_size(
            file_size,
            self.config.part_size,
            self.config.min_part_size,
            self.config.max_part_size,
            self.config.max_parts,
        );
        self.multipart(file_path, &filename, file_size, part_size, destination).await
    }

    async fn single_shot(
        &self,
        file_path: &Path,
        filename: &str,
        file_size: u64,
        destination: &UploadDestination,
    ) -> Result<()> {
        debug!("single-shot upload of {filename} ({file_size} bytes)");

        let body = merge_fields(
            &destination.fields,
            json!({"filename": filename, "total_size": file_size}),
        );
        let issued = self
            .connection
            .execute_json(Request::post(&destination.init_upload_path).json(body).retryable())
            .await?;
        let (url, headers) = signed_target(&issued)?;

        let bytes = tokio::fs::read(file_path).await?;
        let mut request = Request::external(Method::PUT, url).bytes(bytes);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        self.connection.execute(request).await?;

        let body = merge_fields(&destination.fields, json!({"filename": filename}));
        self.connection.post(&destination.complete_upload_path, body).await?;
        Ok(())
    }

    async fn multipart(
        &self,
        file_path: &Path,
        filename: &str,
        file_size: u64,
        part_size: u64,
        destination: &UploadDestination,
    ) -> Result<()> {
        let plans = plan_parts(file_size, part_size);
        info!(
            "multipart upload of {filename}: {} parts of up to {part_size} bytes",
            plans.len()
        );

        let body = merge_fields(
            &destination.fields,
            json!({
                "filename": filename,
                "chunk_size": part_size,
                "total_size": file_size,
            }),
        );
        let session = self
            .connection
            .execute_json(Request::post(&destination.init_multipart_path).json(body).retryable())
            .await?;
        let upload_id = session
            .get("upload_id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Decode("multipart initiation returned no upload_id".into()))?
            .to_string();
        let pre_issued = pre_issued_urls(&session);

        let outcome: Result<Vec<CompletedPart>> = stream::iter(plans.into_iter().map(|plan| {
            let url = pre_issued.get(&plan.part_number).cloned();
            self.upload_part(file_path, &upload_id, plan, url, destination)
        }))
        .buffer_unordered(self.config.concurrency.max(1))
        .try_collect()
        .await;

        let mut parts = match outcome {
            Ok(parts) => parts,
            Err(err) => {
                self.abort(destination, &upload_id).await;
                return Err(abort_reason(err));
            }
        };
        parts.sort_by_key(|part| part.part_number);

        let acknowledgements: Vec<Value> = parts
            .iter()
            .map(|part| match &part.etag {
                Some(etag) => json!({"index": part.part_number, "etag": etag}),
                None => json!({"index": part.part_number}),
            })
            .collect();
        let body = merge_fields(
            &destination.fields,
            json!({"upload_id": upload_id, "parts": acknowledgements}),
        );
        if let Err(err) = self
            .connection
            .post(&destination.complete_multipart_path, body)
            .await
        {
            self.abort(destination, &upload_id).await;
            return Err(err);
        }

        debug!("multipart upload of {filename} committed");
        Ok(())
    }

    async fn upload_part(
        &self,
        file_path: &Path,
        upload_id: &str,
        plan: PartPlan,
        pre_issued_url: Option<String>,
        destination: &UploadDestination,
    ) -> Result<CompletedPart> {
        let blob = read_range(file_path, plan.offset, plan.size).await?;

        let (url, headers) = match pre_issued_url {
            Some(url) => (url, HashMap::new()),
            None => {
                let body = merge_fields(
                    &destination.fields,
                    json!({"upload_id": upload_id, "part_number": plan.part_number}),
                );
                let issued = self
                    .connection
                    .execute_json(
                        Request::post(&destination.part_url_path).json(body).retryable(),
                    )
                    .await?;
                signed_target(&issued)?
            }
        };

        let mut request = Request::external(Method::PUT, url).bytes(blob);
        for (name, value) in headers {
            request = request.header(name, value);
        }

        // The PUT rides the connection's retry budget; only a stale
        // session is hopeless and aborts the whole upload.
        let response = match self.connection.execute(request).await {
            Ok(response) => response,
            Err(Error::Http { status, body }) if STALE_SESSION_STATUSES.contains(&status) => {
                return Err(Error::UploadAborted(format!(
                    "stale upload session on part {} (HTTP {status}): {body}",
                    plan.part_number
                )));
            }
            Err(err) => return Err(err),
        };

        let etag = response
            .header("etag")
            .map(|etag| etag.trim_matches('"').to_string());
        debug!("part {} acknowledged", plan.part_number);
        Ok(CompletedPart { part_number: plan.part_number, etag })
    }

    async fn abort(&self, destination: &UploadDestination, upload_id: &str) {
        let Some(path) = &destination.abort_multipart_path else { return };
        let body = merge_fields(&destination.fields, json!({"upload_id": upload_id}));
        if let Err(err) = self.connection.post(path, body).await {
            warn!("failed to abort upload session {upload_id}: {err}");
        }
    }
}

/// Pick a part size honoring the service's part-count bound.
///
/// The size only ever grows to fit `max_parts`; parts are never dropped.
fn plan_part_size(file_size: u64, wanted: u64, min: u64, max: u64, max_parts: u64) -> u64 {
    let mut part_size = wanted.clamp(min, max);
    let parts = file_size.div_ceil(part_size).max(1);
    if parts > max_parts {
        warn!("{parts} parts of {part_size} bytes exceed the {max_parts} part bound, growing part size");
        part_size = file_size.div_ceil(max_parts).clamp(min, max);
    }
    part_size
}

fn plan_parts(file_size: u64, part_size: u64) -> Vec<PartPlan> {
    let count = file_size.div_ceil(part_size).max(1);
    (0..count)
        .map(|index| {
            let offset = index * part_size;
            PartPlan {
                part_number: index + 1,
                offset,
                size: part_size.min(file_size - offset),
            }
        })
        .collect()
}

/// Decode `{url, headers?}` as returned by signed-target endpoints.
fn signed_target(issued: &Value) -> Result<(String, HashMap<String, String>)> {
    let url = issued
        .get("url")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Decode("signed target response has no url".into()))?
        .to_string();
    let headers = issued
        .get("headers")
        .and_then(Value::as_object)
        .map(|headers| {
            headers
                .iter()
                .filter_map(|(name, value)| {
                    value.as_str().map(|value| (name.clone(), value.to_string()))
                })
                .collect()
        })
        .unwrap_or_default();
    Ok((url, headers))
}

fn pre_issued_urls(session: &Value) -> HashMap<u64, String> {
    session
        .get("parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| {
                    let index = part.get("index").and_then(Value::as_u64)?;
                    let url = part.get("url").and_then(Value::as_str)?;
                    Some((index, url.to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn merge_fields(fields: &Value, body: Value) -> Value {
    let mut merged = fields.as_object().cloned().unwrap_or_else(Map::new);
    if let Value::Object(extra) = body {
        merged.extend(extra);
    }
    Value::Object(merged)
}

/// A part failure after the retry budget abandons the whole session;
/// local IO trouble keeps its own type.
fn abort_reason(err: Error) -> Error {
    match err {
        Error::Io(_) | Error::UploadAborted(_) => err,
        other => Error::UploadAborted(format!("part upload failed: {other}")),
    }
}

async fn read_range(path: &Path, offset: u64, size: u64) -> Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(std::io::SeekFrom::Start(offset)).await?;
    let mut buffer = vec![0u8; size as usize];
    file.read_exact(&mut buffer).await?;
    Ok(buffer)
}
