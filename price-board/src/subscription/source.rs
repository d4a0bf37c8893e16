use super::board::Board;
use crate::{error::PipelineError, model::Symbol, transport::TransportHandle};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Server-side lookup of the symbols that make up a board.
#[async_trait]
pub trait SymbolSource: Send + Sync {
    async fn list_symbols(&self, board: &Board) -> Result<Vec<Symbol>, PipelineError>;
}

/// Resolves board symbols through the REST API: `GET {base}/boards/{id}/symbols`, answered with a
/// JSON array of symbols.
#[derive(Debug, Clone)]
pub struct HttpSymbolSource {
    client: reqwest::Client,
    base: Url,
}

impl HttpSymbolSource {
    pub fn new(base: Url) -> Result<Self, PipelineError> {
        if base.cannot_be_a_base() {
            return Err(PipelineError::Config(format!("{base} cannot be used as an API base")));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|error| PipelineError::Config(error.to_string()))?;

        Ok(Self { client, base })
    }

    pub fn endpoint(&self, board: &Board) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["boards", board.id.as_str(), "symbols"]);
        }
        url
    }
}

#[async_trait]
impl SymbolSource for HttpSymbolSource {
    async fn list_symbols(&self, board: &Board) -> Result<Vec<Symbol>, PipelineError> {
        let url = self.endpoint(board);
        debug!(%url, "requesting board symbols");

        let source_error = |error: reqwest::Error| PipelineError::SymbolSource {
            board: board.id.to_string(),
            reason: error.to_string(),
        };

        self.client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(source_error)?
            .json::<Vec<Symbol>>()
            .await
            .map_err(source_error)
    }
}

/// Default wait for the feed to answer a `list-symbols` request.
pub const DEFAULT_LIST_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolves board symbols with a `list-symbols` request over the feed connection.
#[derive(Debug, Clone)]
pub struct FeedSymbolSource {
    transport: TransportHandle,
    reply_timeout: Duration,
}

impl FeedSymbolSource {
    pub fn new(transport: TransportHandle) -> Self {
        Self {
            transport,
            reply_timeout: DEFAULT_LIST_REPLY_TIMEOUT,
        }
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }
}

#[async_trait]
impl SymbolSource for FeedSymbolSource {
    async fn list_symbols(&self, board: &Board) -> Result<Vec<Symbol>, PipelineError> {
        let request = self.transport.list_symbols(board.id.0.clone());

        match tokio::time::timeout(self.reply_timeout, request).await {
            Ok(result) => result,
            Err(_) => {
                warn!(%board, timeout = ?self.reply_timeout, "no symbol list reply from feed");
                Err(PipelineError::SymbolSource {
                    board: board.id.to_string(),
                    reason: format!("no reply within {:?}", self.reply_timeout),
                })
            }
        }
    }
}
