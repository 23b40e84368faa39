use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::sources::{
    BoardThreadParser, ListingFeedParser, SourceDeps, SourceParser, DEFAULT_COURTESY_DELAY,
};
use crate::traits::{MediaIngestor, PageFetcher};
use crate::types::{SourceType, WatcherRecord};

/// Builds the parser for a source type, restoring its cursor from the record.
#[derive(Clone)]
pub struct ParserFactory {
    deps: SourceDeps,
}

impl ParserFactory {
    pub fn new(fetcher: Arc<dyn PageFetcher>, ingestor: Arc<dyn MediaIngestor>) -> Self {
        Self {
            deps: SourceDeps {
                fetcher,
                ingestor,
                courtesy_delay: DEFAULT_COURTESY_DELAY,
            },
        }
    }

    pub fn with_courtesy_delay(mut self, delay: Duration) -> Self {
        self.deps.courtesy_delay = delay;
        self
    }

    pub fn create(&self, source: SourceType, record: &WatcherRecord) -> Result<Box<dyn SourceParser>> {
        Ok(match source {
            SourceType::BoardThread => Box::new(BoardThreadParser::new(self.deps.clone(), record)?),
            SourceType::ListingFeed => Box::new(ListingFeedParser::new(self.deps.clone(), record)?),
        })
    }

    /// Same as `create`, from a persisted tag. Unknown tags are `UnsupportedSource`.
    pub fn create_for_tag(&self, tag: &str, record: &WatcherRecord) -> Result<Box<dyn SourceParser>> {
        self.create(tag.parse()?, record)
    }
}
