use std::collections::HashMap;
use std::sync::Mutex;

use assert_matches::assert_matches;

use ncbi_cell::domain::Pmid;
use ncbi_cell::error::CellError;
use ncbi_cell::pubmed::{
    EutilsClient, IdentifierFailure, IdentifierOutcome, PmidResolver, SearchResult,
};

#[derive(Default)]
struct MockEutils {
    searches: HashMap<String, SearchResult>,
    titles: HashMap<String, Result<Option<String>, u16>>,
    rate_limited: bool,
    fetched: Mutex<Vec<String>>,
}

impl MockEutils {
    fn search(mut self, title: &str, ids: &[&str]) -> Self {
        self.searches.insert(
            title.to_string(),
            SearchResult {
                count: ids.len(),
                ids: ids.iter().map(|id| id.to_string()).collect(),
            },
        );
        self
    }

    fn article(mut self, pmid: &str, title: &str) -> Self {
        self.titles
            .insert(pmid.to_string(), Ok(Some(title.to_string())));
        self
    }

    fn failing_article(mut self, pmid: &str, status: u16) -> Self {
        self.titles.insert(pmid.to_string(), Err(status));
        self
    }

    fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

impl EutilsClient for MockEutils {
    fn search_title(&self, title: &str) -> Result<SearchResult, CellError> {
        if self.rate_limited {
            return Err(CellError::RateLimited);
        }
        Ok(self.searches.get(title).cloned().unwrap_or(SearchResult {
            count: 0,
            ids: Vec::new(),
        }))
    }

    fn fetch_article_title(&self, pmid: &Pmid) -> Result<Option<String>, CellError> {
        self.fetched.lock().unwrap().push(pmid.to_string());
        match self.titles.get(pmid.as_str()) {
            Some(Ok(title)) => Ok(title.clone()),
            Some(Err(429)) => Err(CellError::RateLimited),
            Some(Err(status)) => Err(CellError::EutilsStatus {
                status: *status,
                message: "server error".to_string(),
            }),
            None => Ok(None),
        }
    }
}

fn pmid(value: &str) -> Pmid {
    value.parse().unwrap()
}

#[test]
fn single_result_is_accepted_without_fetch() {
    let resolver = PmidResolver::new(MockEutils::default().search("Foo Bar", &["38540357"]));
    assert_eq!(
        resolver.resolve_identifier("Foo Bar").unwrap(),
        Some(pmid("38540357"))
    );
    assert!(resolver.client().fetched().is_empty());
}

#[test]
fn ambiguous_search_picks_candidate_with_trailing_period_title() {
    let client = MockEutils::default()
        .search("Foo Bar", &["111", "222"])
        .article("111", "Other.")
        .article("222", "Foo Bar.");
    let resolver = PmidResolver::new(client);

    let outcome = resolver.resolve("Foo Bar").unwrap();
    assert_eq!(
        outcome,
        IdentifierOutcome::Resolved {
            pmid: pmid("222"),
            candidates: 2,
        }
    );
    assert_eq!(resolver.client().fetched(), vec!["111", "222"]);
}

#[test]
fn disambiguation_is_deterministic() {
    let client = MockEutils::default()
        .search("Foo Bar", &["111", "222", "333"])
        .article("111", "Foo Bar.")
        .article("222", "Foo Bar.")
        .article("333", "Other.");
    let resolver = PmidResolver::new(client);
    let first = resolver.resolve_identifier("Foo Bar").unwrap();
    let second = resolver.resolve_identifier("Foo Bar").unwrap();
    assert_eq!(first, Some(pmid("111")));
    assert_eq!(first, second);
}

#[test]
fn exact_title_without_period_does_not_match() {
    let client = MockEutils::default()
        .search("Foo Bar", &["111", "222"])
        .article("111", "Foo Bar")
        .article("222", "Foo Bar!");
    let resolver = PmidResolver::new(client);
    assert_eq!(
        resolver.resolve("Foo Bar").unwrap(),
        IdentifierOutcome::Unresolved(IdentifierFailure::NoExactMatch { candidates: 2 })
    );
}

#[test]
fn failing_candidate_is_skipped() {
    let client = MockEutils::default()
        .search("Foo Bar", &["111", "222"])
        .failing_article("111", 500)
        .article("222", "Foo Bar.");
    let resolver = PmidResolver::new(client);
    assert_eq!(
        resolver.resolve_identifier("Foo Bar").unwrap(),
        Some(pmid("222"))
    );
}

#[test]
fn no_results_is_absent() {
    let resolver = PmidResolver::new(MockEutils::default());
    assert_eq!(
        resolver.resolve("Unknown").unwrap(),
        IdentifierOutcome::Unresolved(IdentifierFailure::NoResults)
    );
}

#[test]
fn rate_limit_on_search_is_terminal() {
    let client = MockEutils {
        rate_limited: true,
        ..MockEutils::default()
    };
    let resolver = PmidResolver::new(client);
    assert_matches!(resolver.resolve("Foo Bar"), Err(CellError::RateLimited));
}

#[test]
fn rate_limit_while_disambiguating_is_terminal() {
    let client = MockEutils::default()
        .search("Foo Bar", &["111", "222"])
        .failing_article("111", 429)
        .article("222", "Foo Bar.");
    let resolver = PmidResolver::new(client);
    assert_matches!(resolver.resolve("Foo Bar"), Err(CellError::RateLimited));
    assert_eq!(resolver.client().fetched(), vec!["111"]);
}
