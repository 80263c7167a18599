use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path as UrlPath, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE, RANGE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use axum_extra::headers::{AcceptRanges, ContentLength, ContentRange, HeaderMapExt};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::Error;
use crate::file::StdStorage;
use crate::path;
use crate::provider::{Storage, StorageFile};
use crate::range::RangeError;
use crate::scheduler::{Download, SessionScheduler};
use crate::stream::{body_channel, ChannelTransport};

pub type Scheduler = SessionScheduler<StdStorage, ChannelTransport>;

/// The download endpoint: resolves requests, opens sessions and drives the
/// scheduler that streams them.
pub struct FileServer {
    url_prefix: String,
    root_path: String,
    enable_download: bool,
    tick_interval: Duration,
    scheduler: Mutex<Scheduler>,
}

#[derive(Debug, Default, Deserialize)]
struct DownloadQuery {
    download: Option<String>,
}

impl DownloadQuery {
    fn attachment(&self) -> bool {
        matches!(self.download.as_deref(), Some(value) if value != "false" && value != "0")
    }
}

impl FileServer {
    pub fn new(config: &Config, storage: StdStorage, transport: ChannelTransport) -> Self {
        FileServer {
            url_prefix: config.url_prefix.trim_matches('/').to_string(),
            root_path: config.root_path.clone(),
            enable_download: config.enable_download,
            tick_interval: config.tick_interval(),
            scheduler: Mutex::new(SessionScheduler::new(storage, transport, config.limits())),
        }
    }

    pub fn scheduler(&self) -> &Mutex<Scheduler> {
        &self.scheduler
    }

    pub fn router(self: &Arc<Self>) -> Router {
        let prefix = format!("/{}", self.url_prefix);
        Router::new()
            .route(&prefix, get(download_root))
            .route(&format!("{prefix}/{{*path}}"), get(download))
            .with_state(Arc::clone(self))
    }

    /// Builds the response for a GET of `requested` (relative to the URL prefix).
    ///
    /// Everything that can fail does so before the session is registered, so
    /// an error never follows a partially sent body.
    pub fn respond(&self, requested: &str, range: Option<&str>, attachment: bool) -> Result<Response, Error> {
        if !self.enable_download {
            return Err(Error::Disabled);
        }
        let path = path::resolve(&self.root_path, requested).ok_or_else(|| Error::NotFound(requested.to_string()))?;
        debug!(file = %path::remove_root_path(&path, &self.root_path), ?range, "download requested");

        let mut scheduler = self.scheduler.lock();
        let download = scheduler.open(&path, range)?;
        let (status, headers) = response_head(&download, attachment)?;
        let (socket, body) = body_channel(download.content_length());
        scheduler.start(download, socket)?;

        Ok((status, headers, body).into_response())
    }

    /// Ticks the scheduler until `shutdown` flips to true, then fails what is
    /// left and keeps ticking until in-flight sends came back.
    pub async fn drive(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.scheduler.lock().tick();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.scheduler.lock().cancel_all();
        loop {
            {
                let mut scheduler = self.scheduler.lock();
                scheduler.tick();
                if scheduler.is_empty() {
                    break;
                }
            }
            interval.tick().await;
        }
        info!("scheduler stopped");
    }
}

/// Status line and headers for a download, per the range it resolved to.
pub fn response_head<F: StorageFile>(
    download: &Download<F>,
    attachment: bool,
) -> Result<(StatusCode, HeaderMap), Error> {
    let total = download.total();
    let mut headers = HeaderMap::new();
    headers.typed_insert(AcceptRanges::bytes());
    headers.typed_insert(ContentLength(download.content_length()));

    let status = match download.range() {
        None => StatusCode::OK,
        Some(range) => {
            let content_range = ContentRange::bytes(range.start..range.end_exclusive, total)
                .map_err(|_| Error::RangeNotSatisfiable { total })?;
            headers.typed_insert(content_range);
            StatusCode::PARTIAL_CONTENT
        }
    };

    if let Ok(value) = HeaderValue::from_str(&path::mime_type(download.path())) {
        headers.insert(CONTENT_TYPE, value);
    }
    if attachment {
        let name = path::file_name(download.path()).replace('"', "\\\"");
        if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{name}\"")) {
            headers.insert(CONTENT_DISPOSITION, value);
        }
    }
    Ok((status, headers))
}

async fn download(
    State(server): State<Arc<FileServer>>,
    UrlPath(requested): UrlPath<String>,
    Query(query): Query<DownloadQuery>,
    headers: HeaderMap,
) -> Result<Response, Error> {
    server.respond(&requested, range_header(&headers)?, query.attachment())
}

async fn download_root(
    State(server): State<Arc<FileServer>>,
    Query(query): Query<DownloadQuery>,
    headers: HeaderMap,
) -> Result<Response, Error> {
    server.respond("", range_header(&headers)?, query.attachment())
}

/// The raw `Range` value. A value that is not visible ASCII cannot hold a
/// byte range and is malformed rather than absent.
fn range_header(headers: &HeaderMap) -> Result<Option<&str>, Error> {
    let Some(value) = headers.get(RANGE) else {
        return Ok(None);
    };
    value
        .to_str()
        .map(Some)
        .map_err(|_| RangeError::Malformed(String::from_utf8_lossy(value.as_bytes()).into_owned()).into())
}

/// Logs the settings a server runs with.
pub fn dump_config(config: &Config, storage: &StdStorage) {
    info!("SD File Server:");
    info!("  Address: {}", config.listen);
    info!("  Url Prefix: /{}", config.url_prefix.trim_matches('/'));
    info!("  Root Path: {}", config.root_path);
    info!("  Mount: {}", storage.mount().display());
    info!("  Downloads: {}", if config.enable_download { "enabled" } else { "disabled" });
    if !storage.is_directory(&config.root_path) {
        info!("  Root path is not a directory on the card yet");
    }
}
