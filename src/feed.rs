// 7.0 feed.rs: display-series boundary. markets show a time series next to the
// trading panel (driver points, price history); this is where it comes from.
// the wire shape is a header row plus numeric rows, first column being the
// time axis.

use crate::resolver::DataSource;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FeedError {
    #[error("no fixture registered for data type '{0}'")]
    UnknownFixture(String),

    #[error("feed does not serve {0} sources")]
    SourceUnsupported(&'static str),

    #[error("malformed series: {0}")]
    Malformed(String),

    #[error("fetch failed: {0}")]
    Fetch(String),
}

/// One series payload: column headers and numeric rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesData {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl SeriesData {
    /// Every row must be as wide as the header row.
    pub fn validate(&self) -> Result<(), FeedError> {
        if self.headers.is_empty() {
            return Err(FeedError::Malformed("empty header row".into()));
        }
        for (i, row) in self.rows.iter().enumerate() {
            if row.len() != self.headers.len() {
                return Err(FeedError::Malformed(format!(
                    "row {} has {} columns, header has {}",
                    i,
                    row.len(),
                    self.headers.len()
                )));
            }
        }
        Ok(())
    }

    /// Number of plotted series (the first column is the time axis).
    pub fn series_count(&self) -> usize {
        self.headers.len().saturating_sub(1)
    }

    pub fn latest_row(&self) -> Option<&[f64]> {
        self.rows.last().map(Vec::as_slice)
    }
}

#[async_trait]
pub trait DataFeed: Send + Sync {
    async fn fetch(&self, source: &DataSource) -> Result<SeriesData, FeedError>;
}

/// Serves bundled fixture series; oracle sources are somebody else's job.
#[derive(Default)]
pub struct FixtureFeed {
    fixtures: Mutex<HashMap<String, SeriesData>>,
}

impl FixtureFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, data_type: &str, series: SeriesData) {
        self.fixtures.lock().unwrap().insert(data_type.to_string(), series);
    }
}

#[async_trait]
impl DataFeed for FixtureFeed {
    async fn fetch(&self, source: &DataSource) -> Result<SeriesData, FeedError> {
        match source {
            DataSource::Fixture { data_type } => {
                let series = self
                    .fixtures
                    .lock()
                    .unwrap()
                    .get(data_type)
                    .cloned()
                    .ok_or_else(|| FeedError::UnknownFixture(data_type.clone()))?;
                series.validate()?;
                Ok(series)
            }
            DataSource::Oracle { .. } => Err(FeedError::SourceUnsupported("oracle")),
        }
    }
}
