pub mod fetch;
pub mod strategy;

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::ResolvedConfig;
use crate::error::CellError;
use crate::http::RequestPacer;

pub use fetch::{CurlPageFetcher, FetchedPage, HttpPageFetcher, PageFetcher};
pub use strategy::{ScriptPatternStrategy, SelectorStrategy, StrategyOutcome, TitleStrategy};

static LOCATION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Publication: (.*) Dataset Version:").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionFailure {
    LocationNotFound,
    NoStrategyMatched,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TitleOutcome {
    Resolved {
        location: String,
        title: String,
        strategy: String,
    },
    Unresolved {
        location: Option<String>,
        reason: ResolutionFailure,
    },
}

impl TitleOutcome {
    pub fn title(&self) -> Option<&str> {
        match self {
            TitleOutcome::Resolved { title, .. } => Some(title),
            TitleOutcome::Unresolved { .. } => None,
        }
    }

    pub fn into_title(self) -> Option<String> {
        match self {
            TitleOutcome::Resolved { title, .. } => Some(title),
            TitleOutcome::Unresolved { .. } => None,
        }
    }
}

pub struct TitleResolver {
    strategies: Vec<Box<dyn TitleStrategy>>,
}

impl TitleResolver {
    pub fn new(strategies: Vec<Box<dyn TitleStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn from_config(config: &ResolvedConfig) -> Result<Self, CellError> {
        let pacer = RequestPacer::new(config.request_delay);
        let primary = HttpPageFetcher::new(config.timeout, pacer)?;
        let secondary = CurlPageFetcher::new(&config.curl_program, pacer);
        let strategies: Vec<Box<dyn TitleStrategy>> = vec![
            Box::new(SelectorStrategy::new(Box::new(primary), &config.selectors)?),
            Box::new(ScriptPatternStrategy::new(Box::new(secondary))?),
        ];
        Ok(Self::new(strategies))
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|strategy| strategy.name()).collect()
    }

    pub fn resolve_title(&self, citation: &str) -> Option<String> {
        self.resolve(citation).into_title()
    }

    pub fn resolve(&self, citation: &str) -> TitleOutcome {
        let Some(location) = extract_location(citation) else {
            warn!(citation, "could not find citation URL");
            return TitleOutcome::Unresolved {
                location: None,
                reason: ResolutionFailure::LocationNotFound,
            };
        };

        info!(citation_url = location.as_str(), "getting title for citation URL");
        for strategy in &self.strategies {
            match strategy.attempt(&location) {
                StrategyOutcome::Found(title) => {
                    info!(
                        citation_url = location.as_str(),
                        strategy = strategy.name(),
                        title = title.as_str(),
                        "found title"
                    );
                    return TitleOutcome::Resolved {
                        location,
                        title,
                        strategy: strategy.name().to_string(),
                    };
                }
                StrategyOutcome::NoMatch => {
                    info!(
                        citation_url = location.as_str(),
                        strategy = strategy.name(),
                        "strategy found no title"
                    );
                }
                StrategyOutcome::Failed(message) => {
                    warn!(
                        citation_url = location.as_str(),
                        strategy = strategy.name(),
                        error = message.as_str(),
                        "strategy failed"
                    );
                }
            }
        }

        TitleOutcome::Unresolved {
            location: Some(location),
            reason: ResolutionFailure::NoStrategyMatched,
        }
    }
}

pub fn extract_location(citation: &str) -> Option<String> {
    LOCATION_PATTERN
        .captures(citation)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|location| !location.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_between_sentinels() {
        let citation = "Publication: https://doi.org/10.1038/s41591-020-0944-y Dataset Version: https://datasets.cellxgene.cziscience.com/abc.h5ad curated and distributed by CZ CELLxGENE Discover";
        assert_eq!(
            extract_location(citation).as_deref(),
            Some("https://doi.org/10.1038/s41591-020-0944-y")
        );
    }

    #[test]
    fn citation_without_publication_has_no_location() {
        assert_eq!(extract_location("Dataset Version: https://example.org"), None);
    }
}
