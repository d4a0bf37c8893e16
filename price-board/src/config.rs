use crate::{
    error::PipelineError,
    schedule::{DEFAULT_FLASH_DURATION, DEFAULT_FRAME_INTERVAL},
    subscription::{Board, DEFAULT_STALE_AFTER},
    transport::TransportConfig,
};
use itertools::Itertools;
use std::{path::PathBuf, time::Duration};
use url::Url;

/// File name of the local cache inside the cache directory.
pub const CACHE_FILE_NAME: &str = "price-board-cache.json";

/// Boards offered when `PRICE_BOARD_BOARDS` is not set.
pub const DEFAULT_BOARDS: &str = "VN30,HNX30,UPCOM";

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub transport: TransportConfig,
    /// REST API base for board symbol lists. Without one, symbols are requested over the feed.
    pub api_url: Option<Url>,
    /// Directory holding the local cache. Without one, the cache lives in memory.
    pub cache_dir: Option<PathBuf>,
    pub stale_after: Duration,
    pub flash_duration: Duration,
    pub frame_interval: Duration,
    /// Capacity of the transport to worker and worker to pipeline channels.
    pub worker_buffer_size: usize,
    /// Boards offered for selection, the first one selected on start.
    pub boards: Vec<Board>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            api_url: None,
            cache_dir: None,
            stale_after: DEFAULT_STALE_AFTER,
            flash_duration: DEFAULT_FLASH_DURATION,
            frame_interval: DEFAULT_FRAME_INTERVAL,
            worker_buffer_size: 1000,
            boards: parse_boards(DEFAULT_BOARDS),
        }
    }
}

impl PipelineConfig {
    /// Read the configuration from `PRICE_BOARD_*` environment variables.
    pub fn from_env() -> Result<Self, PipelineError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`, falling back to defaults for missing or
    /// unparseable numbers. URLs must be valid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, PipelineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let ws_url = match lookup("PRICE_BOARD_WS_URL") {
            Some(url) => validate_url(&url, &["ws", "wss"])?.to_string(),
            None => defaults.transport.url.clone(),
        };

        let api_url = lookup("PRICE_BOARD_API_URL")
            .map(|url| validate_url(&url, &["http", "https"]))
            .transpose()?;

        let cache_dir = lookup("PRICE_BOARD_CACHE_DIR")
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from);

        let stale_after = lookup("PRICE_BOARD_STALE_SECS")
            .and_then(|secs| secs.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.stale_after);

        let flash_duration = lookup("PRICE_BOARD_FLASH_MS")
            .and_then(|ms| ms.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.flash_duration);

        let boards = lookup("PRICE_BOARD_BOARDS")
            .map(|boards| parse_boards(&boards))
            .filter(|boards| !boards.is_empty())
            .unwrap_or(defaults.boards);

        Ok(Self {
            transport: TransportConfig {
                url: ws_url,
                ..defaults.transport
            },
            api_url,
            cache_dir,
            stale_after,
            flash_duration,
            boards,
            ..defaults
        })
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_api_url(mut self, api_url: Url) -> Self {
        self.api_url = Some(api_url);
        self
    }

    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(cache_dir.into());
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn with_flash_duration(mut self, flash_duration: Duration) -> Self {
        self.flash_duration = flash_duration;
        self
    }

    pub fn with_frame_interval(mut self, frame_interval: Duration) -> Self {
        self.frame_interval = frame_interval;
        self
    }

    pub fn with_boards(mut self, boards: Vec<Board>) -> Self {
        self.boards = boards;
        self
    }

    /// Location of the cache file, if the cache is persisted.
    pub fn cache_path(&self) -> Option<PathBuf> {
        self.cache_dir.as_ref().map(|dir| dir.join(CACHE_FILE_NAME))
    }
}

fn validate_url(input: &str, schemes: &[&str]) -> Result<Url, PipelineError> {
    let url = Url::parse(input.trim())
        .map_err(|error| PipelineError::Config(format!("invalid url {input:?}: {error}")))?;

    if !schemes.contains(&url.scheme()) {
        return Err(PipelineError::Config(format!(
            "unsupported scheme {:?} in {input:?}, expected one of {schemes:?}",
            url.scheme()
        )));
    }

    Ok(url)
}

/// Parse a comma separated list of board definitions, skipping invalid and repeated ones.
pub fn parse_boards(input: &str) -> Vec<Board> {
    input.split(',').filter_map(Board::parse).unique().collect()
}
