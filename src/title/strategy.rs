use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, warn};

use crate::error::CellError;
use crate::title::fetch::PageFetcher;

pub const ARTICLE_NAME_PATTERN: &str = r"articleName : '(.*)',";

pub const ARTICLE_SCRIPT_POSITION: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyOutcome {
    Found(String),
    NoMatch,
    Failed(String),
}

pub trait TitleStrategy: Send + Sync {
    fn name(&self) -> &str;
    fn attempt(&self, location: &str) -> StrategyOutcome;
}

pub struct SelectorStrategy {
    fetcher: Box<dyn PageFetcher>,
    selectors: Vec<(String, Selector)>,
}

impl SelectorStrategy {
    pub fn new(fetcher: Box<dyn PageFetcher>, selectors: &[String]) -> Result<Self, CellError> {
        let selectors = selectors
            .iter()
            .map(|raw| {
                Selector::parse(raw)
                    .map(|parsed| (raw.clone(), parsed))
                    .map_err(|err| CellError::InvalidSelector {
                        selector: raw.clone(),
                        message: err.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, CellError>>()?;
        Ok(Self { fetcher, selectors })
    }
}

impl TitleStrategy for SelectorStrategy {
    fn name(&self) -> &str {
        "selectors"
    }

    fn attempt(&self, location: &str) -> StrategyOutcome {
        let page = match self.fetcher.fetch(location) {
            Ok(page) => page,
            Err(err) => return StrategyOutcome::Failed(err.to_string()),
        };
        if !page.is_ok() {
            return StrategyOutcome::Failed(format!(
                "{} returned status {}",
                self.fetcher.name(),
                page.status
            ));
        }
        match select_title(&page.body, &self.selectors, location) {
            Some(title) => StrategyOutcome::Found(title),
            None => StrategyOutcome::NoMatch,
        }
    }
}

pub fn select_title(
    html: &str,
    selectors: &[(String, Selector)],
    location: &str,
) -> Option<String> {
    let document = Html::parse_document(html);
    for (raw, selector) in selectors {
        let selected = document.select(selector).collect::<Vec<_>>();
        let Some(first) = selected.first() else {
            continue;
        };
        let title = first.text().collect::<String>().trim().to_string();
        if title.is_empty() {
            debug!(selector = raw.as_str(), "title selector matched an empty element");
            continue;
        }
        if selected.len() > 1 {
            warn!(
                selector = raw.as_str(),
                citation_url = location,
                matches = selected.len(),
                "selected more than one element, using the first"
            );
        }
        debug!(selector = raw.as_str(), "title selector matched");
        return Some(title);
    }
    None
}

pub struct ScriptPatternStrategy {
    fetcher: Box<dyn PageFetcher>,
    pattern: Regex,
    script_position: usize,
}

impl ScriptPatternStrategy {
    pub fn new(fetcher: Box<dyn PageFetcher>) -> Result<Self, CellError> {
        Self::with_pattern(fetcher, ARTICLE_NAME_PATTERN, ARTICLE_SCRIPT_POSITION)
    }

    pub fn with_pattern(
        fetcher: Box<dyn PageFetcher>,
        pattern: &str,
        script_position: usize,
    ) -> Result<Self, CellError> {
        let pattern =
            Regex::new(pattern).map_err(|err| CellError::InvalidPattern(err.to_string()))?;
        Ok(Self {
            fetcher,
            pattern,
            script_position,
        })
    }
}

impl TitleStrategy for ScriptPatternStrategy {
    fn name(&self) -> &str {
        "script-pattern"
    }

    fn attempt(&self, location: &str) -> StrategyOutcome {
        let page = match self.fetcher.fetch(location) {
            Ok(page) => page,
            Err(err) => return StrategyOutcome::Failed(err.to_string()),
        };
        match script_title(&page.body, &self.pattern, self.script_position) {
            Some(title) => StrategyOutcome::Found(title),
            None => StrategyOutcome::NoMatch,
        }
    }
}

pub fn script_title(html: &str, pattern: &Regex, script_position: usize) -> Option<String> {
    let document = Html::parse_document(html);
    let scripts = Selector::parse("script").ok()?;
    let script = document.select(&scripts).nth(script_position)?;
    let text = script.text().collect::<String>();
    pattern
        .captures(&text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|title| !title.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_title_selectors;

    fn parsed(selectors: &[String]) -> Vec<(String, Selector)> {
        selectors
            .iter()
            .map(|raw| (raw.clone(), Selector::parse(raw).unwrap()))
            .collect()
    }

    #[test]
    fn first_matching_selector_wins() {
        let html = r#"<html><body>
            <div class="core-container"><h1>Container Title</h1></div>
            <h1 class="c-article-title">Nature Title</h1>
        </body></html>"#;
        let selectors = parsed(&default_title_selectors());
        assert_eq!(
            select_title(html, &selectors, "https://example.org"),
            Some("Nature Title".to_string())
        );
    }

    #[test]
    fn nested_markup_is_flattened() {
        let html = r#"<h1 id="page-title" class="highwire-cite-title">Single-cell <i>atlas</i> of lung</h1>"#;
        let selectors = parsed(&default_title_selectors());
        assert_eq!(
            select_title(html, &selectors, "https://example.org"),
            Some("Single-cell atlas of lung".to_string())
        );
    }

    #[test]
    fn no_selector_match_yields_none() {
        let html = "<html><body><h1>Plain</h1></body></html>";
        let selectors = parsed(&default_title_selectors());
        assert_eq!(select_title(html, &selectors, "https://example.org"), None);
    }

    #[test]
    fn script_pattern_reads_fifth_script() {
        let html = r#"<html><head>
            <script>var a = 1;</script>
            <script>var b = 2;</script>
            <script>var c = 3;</script>
            <script>var d = 4;</script>
            <script>dataLayer = { articleName : 'Lung cell census', journal : 'Cell' };</script>
        </head></html>"#;
        let pattern = Regex::new(ARTICLE_NAME_PATTERN).unwrap();
        assert_eq!(
            script_title(html, &pattern, ARTICLE_SCRIPT_POSITION),
            Some("Lung cell census".to_string())
        );
    }

    #[test]
    fn repeated_match_uses_the_first_element() {
        let html = r#"<html><body>
            <h1 class="c-article-title">Lung atlas</h1>
            <h1 class="c-article-title">Related article</h1>
        </body></html>"#;
        let selectors = parsed(&default_title_selectors());
        assert_eq!(
            select_title(html, &selectors, "https://example.org"),
            Some("Lung atlas".to_string())
        );
    }

    #[test]
    fn blank_titles_are_not_matches() {
        let html = r#"<h1 class="c-article-title">  </h1>"#;
        let selectors = parsed(&default_title_selectors());
        assert_eq!(select_title(html, &selectors, "https://example.org"), None);

        let html = r#"<script>a</script><script>b</script><script>c</script><script>d</script>
            <script>x = { articleName : '  Airway census ', };</script>
            <script>y</script>"#;
        let pattern = Regex::new(ARTICLE_NAME_PATTERN).unwrap();
        assert_eq!(
            script_title(html, &pattern, ARTICLE_SCRIPT_POSITION),
            Some("Airway census".to_string())
        );
        let blank = html.replace("  Airway census ", " ");
        assert_eq!(script_title(&blank, &pattern, ARTICLE_SCRIPT_POSITION), None);
    }

    #[test]
    fn script_pattern_needs_enough_scripts() {
        let html = r#"<script>x = { articleName : 'Too early', };</script>"#;
        let pattern = Regex::new(ARTICLE_NAME_PATTERN).unwrap();
        assert_eq!(script_title(html, &pattern, ARTICLE_SCRIPT_POSITION), None);
    }

    #[test]
    fn invalid_selector_is_rejected() {
        struct Never;
        impl PageFetcher for Never {
            fn name(&self) -> &str {
                "never"
            }
            fn fetch(&self, _url: &str) -> Result<crate::title::fetch::FetchedPage, CellError> {
                Err(CellError::PageFetch("unused".to_string()))
            }
        }
        let result = SelectorStrategy::new(Box::new(Never), &["h1[".to_string()]);
        assert!(matches!(result, Err(CellError::InvalidSelector { .. })));
    }
}
