//! Line-delimited JSON protocol spoken by `fc-search serve`.
//!
//! One request object per input line, one response object per output line:
//!
//! ```text
//! {"op":"search","channel":"fc-24.11-production","query":"nginx","kind":"package","limit":10,"page":0}
//! {"op":"channels"}
//! {"op":"refresh","channel":"fc-24.11-production"}
//! ```
//!
//! Responses carry `"ok": true` and a `result`, or `"ok": false` and an
//! `error` with a machine-readable `kind`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use fc_search_index::{QueryEngine, QueryError, SearchOptions};
use fc_search_scheduler::{RefreshWorker, SchedulerError};
use fc_search_types::RecordKind;

/// A client request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Search {
        channel: String,
        query: String,
        #[serde(default)]
        kind: Option<RecordKind>,
        #[serde(default)]
        limit: Option<usize>,
        #[serde(default)]
        page: usize,
    },
    Channels,
    Refresh {
        channel: String,
    },
}

/// Failure kinds reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BadRequest,
    UnknownChannel,
    ChannelNotReady,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

/// One response line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    fn success(result: impl Serialize) -> Self {
        match serde_json::to_value(result) {
            Ok(value) => Self {
                ok: true,
                result: Some(value),
                error: None,
            },
            Err(e) => Self::failure(ErrorKind::Internal, e.to_string()),
        }
    }

    fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(ErrorBody {
                kind,
                message: message.into(),
            }),
        }
    }
}

impl From<QueryError> for Response {
    fn from(err: QueryError) -> Self {
        let kind = match err {
            QueryError::UnknownChannel(_) => ErrorKind::UnknownChannel,
            QueryError::ChannelNotReady(_) => ErrorKind::ChannelNotReady,
        };
        Response::failure(kind, err.to_string())
    }
}

/// Answers protocol requests against a live registry.
#[derive(Clone)]
pub struct Handler {
    engine: QueryEngine,
    worker: Arc<RefreshWorker>,
}

impl Handler {
    pub fn new(engine: QueryEngine, worker: Arc<RefreshWorker>) -> Self {
        Self { engine, worker }
    }

    pub fn handle(&self, request: Request) -> Response {
        match request {
            Request::Search {
                channel,
                query,
                kind,
                limit,
                page,
            } => {
                let options = SearchOptions {
                    kind,
                    limit,
                    page,
                };
                match self.engine.search_with(&channel, &query, options) {
                    Ok(page) => Response::success(page),
                    Err(e) => e.into(),
                }
            }
            Request::Channels => Response::success(self.engine.registry().list_channels()),
            Request::Refresh { channel } => match self.worker.trigger(&channel) {
                Ok(()) => Response::success(self.engine.registry().status(&channel)),
                Err(SchedulerError::UnknownChannel(_)) => Response::failure(
                    ErrorKind::UnknownChannel,
                    format!("Unknown channel: {channel}"),
                ),
                Err(e) => Response::failure(ErrorKind::Internal, e.to_string()),
            },
        }
    }

    /// Parse and answer one input line.
    pub fn handle_line(&self, line: &str) -> Response {
        match serde_json::from_str::<Request>(line) {
            Ok(request) => {
                debug!(?request, "Request");
                self.handle(request)
            }
            Err(e) => Response::failure(ErrorKind::BadRequest, e.to_string()),
        }
    }

    /// Answer requests from `reader` until EOF, writing one response line per
    /// non-blank request line to `writer`.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let response = self.handle_line(line);
            let mut out = match serde_json::to_vec(&response) {
                Ok(out) => out,
                Err(e) => {
                    warn!(error = %e, "Failed to encode response");
                    continue;
                }
            };
            out.push(b'\n');
            writer.write_all(&out).await?;
            writer.flush().await?;
        }
        debug!("Request stream closed");
        Ok(())
    }
}
