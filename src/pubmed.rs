use quick_xml::Reader;
use quick_xml::events::Event;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::{Credentials, ResolvedConfig};
use crate::domain::Pmid;
use crate::error::CellError;
use crate::http::{RequestPacer, build_client};

pub const PUBMED_DB: &str = "pubmed";
const RATE_LIMIT_STATUS: u16 = 429;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub count: usize,
    pub ids: Vec<String>,
}

pub trait EutilsClient: Send + Sync {
    fn search_title(&self, title: &str) -> Result<SearchResult, CellError>;
    fn fetch_article_title(&self, pmid: &Pmid) -> Result<Option<String>, CellError>;
}

#[derive(Clone)]
pub struct EutilsHttpClient {
    client: Client,
    base_url: String,
    credentials: Credentials,
    pacer: RequestPacer,
}

impl EutilsHttpClient {
    pub fn new(config: &ResolvedConfig) -> Result<Self, CellError> {
        let client = build_client(config.timeout, CellError::EutilsHttp)?;
        Ok(Self {
            client,
            base_url: config.eutils_base_url.clone(),
            credentials: config.credentials.clone(),
            pacer: RequestPacer::new(config.request_delay),
        })
    }

    fn with_credentials(&self, mut request: RequestBuilder) -> RequestBuilder {
        if let Some(email) = &self.credentials.email {
            request = request.query(&[("email", email.as_str())]);
        }
        if let Some(api_key) = &self.credentials.api_key {
            request = request.query(&[("api_key", api_key.as_str())]);
        }
        request
    }

    fn send(&self, request: RequestBuilder) -> Result<Response, CellError> {
        self.pacer.wait();
        let response = self
            .with_credentials(request)
            .send()
            .map_err(|err| CellError::EutilsHttp(err.to_string()))?;
        let status = response.status().as_u16();
        if status == RATE_LIMIT_STATUS {
            return Err(CellError::RateLimited);
        }
        if !response.status().is_success() {
            let message = response
                .text()
                .unwrap_or_else(|_| "E-utilities request failed".to_string());
            return Err(CellError::EutilsStatus { status, message });
        }
        Ok(response)
    }
}

impl EutilsClient for EutilsHttpClient {
    fn search_title(&self, title: &str) -> Result<SearchResult, CellError> {
        let url = format!("{}/esearch.fcgi", self.base_url);
        let request = self.client.get(&url).query(&[
            ("db", PUBMED_DB),
            ("term", title),
            ("field", "title"),
            ("retmode", "json"),
        ]);
        let body = self
            .send(request)?
            .text()
            .map_err(|err| CellError::EutilsHttp(err.to_string()))?;
        parse_esearch(&body)
    }

    fn fetch_article_title(&self, pmid: &Pmid) -> Result<Option<String>, CellError> {
        let url = format!("{}/efetch.fcgi", self.base_url);
        let request = self.client.get(&url).query(&[
            ("db", PUBMED_DB),
            ("id", pmid.as_str()),
            ("rettype", "xml"),
        ]);
        let body = self
            .send(request)?
            .text()
            .map_err(|err| CellError::EutilsHttp(err.to_string()))?;
        parse_article_title(&body)
    }
}

#[derive(Debug, Deserialize)]
struct EsearchResponse {
    esearchresult: EsearchResult,
}

#[derive(Debug, Deserialize)]
struct EsearchResult {
    #[serde(default)]
    count: Option<String>,
    #[serde(default)]
    idlist: Vec<String>,
}

pub fn parse_esearch(body: &str) -> Result<SearchResult, CellError> {
    let payload: EsearchResponse = serde_json::from_str(body)
        .map_err(|err| CellError::EutilsHttp(format!("invalid esearch response: {err}")))?;
    let count = match payload.esearchresult.count {
        Some(count) => count
            .trim()
            .parse()
            .map_err(|_| CellError::EutilsHttp(format!("invalid esearch count: {count}")))?,
        None => payload.esearchresult.idlist.len(),
    };
    Ok(SearchResult {
        count,
        ids: payload.esearchresult.idlist,
    })
}

pub fn parse_article_title(xml: &str) -> Result<Option<String>, CellError> {
    let mut reader = Reader::from_str(xml);
    let mut inside = false;
    let mut depth = 0usize;
    let mut title = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if inside {
                    depth += 1;
                } else if e.name().as_ref() == b"ArticleTitle" {
                    inside = true;
                }
            }
            Ok(Event::End(_)) if inside => {
                if depth == 0 {
                    return Ok(Some(title));
                }
                depth -= 1;
            }
            Ok(Event::Empty(e)) if !inside && e.name().as_ref() == b"ArticleTitle" => {
                return Ok(Some(String::new()));
            }
            Ok(Event::Text(e)) if inside => {
                let text = e
                    .unescape()
                    .map_err(|err| CellError::EutilsHttp(format!("invalid efetch XML: {err}")))?;
                title.push_str(&text);
            }
            Ok(Event::CData(e)) if inside => {
                title.push_str(&String::from_utf8_lossy(&e.into_inner()));
            }
            Ok(Event::Eof) => break,
            Err(err) => {
                return Err(CellError::EutilsHttp(format!("invalid efetch XML: {err}")));
            }
            _ => {}
        }
    }
    Ok(None)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum IdentifierFailure {
    NoResults,
    NoExactMatch { candidates: usize },
    SearchFailed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IdentifierOutcome {
    Resolved { pmid: Pmid, candidates: usize },
    Unresolved(IdentifierFailure),
}

impl IdentifierOutcome {
    pub fn pmid(&self) -> Option<&Pmid> {
        match self {
            IdentifierOutcome::Resolved { pmid, .. } => Some(pmid),
            IdentifierOutcome::Unresolved(_) => None,
        }
    }

    pub fn into_pmid(self) -> Option<Pmid> {
        match self {
            IdentifierOutcome::Resolved { pmid, .. } => Some(pmid),
            IdentifierOutcome::Unresolved(_) => None,
        }
    }
}

#[derive(Clone)]
pub struct PmidResolver<C: EutilsClient> {
    client: C,
}

impl<C: EutilsClient> PmidResolver<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn resolve_identifier(&self, title: &str) -> Result<Option<Pmid>, CellError> {
        Ok(self.resolve(title)?.into_pmid())
    }

    /// Only a rate-limit response is returned as an error; every other failure
    /// leaves the identifier unresolved.
    pub fn resolve(&self, title: &str) -> Result<IdentifierOutcome, CellError> {
        info!(title, "getting PMID for title");
        let result = match self.client.search_title(title) {
            Ok(result) => result,
            Err(CellError::RateLimited) => {
                error!("too many requests to NCBI API; try again later, or use an API key");
                return Err(CellError::RateLimited);
            }
            Err(err) => {
                error!(title, error = %err, "encountered error in searching PubMed");
                return Ok(IdentifierOutcome::Unresolved(
                    IdentifierFailure::SearchFailed {
                        message: err.to_string(),
                    },
                ));
            }
        };

        let candidates = candidate_pmids(&result.ids);
        match result.count {
            0 => Ok(IdentifierOutcome::Unresolved(IdentifierFailure::NoResults)),
            1 => match candidates.into_iter().next() {
                Some(pmid) => {
                    info!(pmid = %pmid, title, "found PMID");
                    Ok(IdentifierOutcome::Resolved { pmid, candidates: 1 })
                }
                None => Ok(IdentifierOutcome::Unresolved(IdentifierFailure::NoResults)),
            },
            count => {
                warn!(title, count, "PubMed returned more than one result for title");
                self.disambiguate(title, candidates)
            }
        }
    }

    fn disambiguate(
        &self,
        title: &str,
        candidates: Vec<Pmid>,
    ) -> Result<IdentifierOutcome, CellError> {
        let expected = efetch_title_form(title);
        let total = candidates.len();
        for pmid in candidates {
            let fetched = match self.client.fetch_article_title(&pmid) {
                Ok(fetched) => fetched,
                Err(CellError::RateLimited) => return Err(CellError::RateLimited),
                Err(err) => {
                    error!(pmid = %pmid, error = %err, "encountered error in fetching from PubMed");
                    continue;
                }
            };
            if fetched.as_deref() == Some(expected.as_str()) {
                info!(pmid = %pmid, title, "found PMID");
                return Ok(IdentifierOutcome::Resolved {
                    pmid,
                    candidates: total,
                });
            }
        }
        warn!(title, candidates = total, "no candidate PMID matched title exactly");
        Ok(IdentifierOutcome::Unresolved(
            IdentifierFailure::NoExactMatch { candidates: total },
        ))
    }
}

/// PubMed's efetch titles end in a period that esearch titles lack.
pub fn efetch_title_form(title: &str) -> String {
    format!("{title}.")
}

fn candidate_pmids(ids: &[String]) -> Vec<Pmid> {
    ids.iter()
        .filter_map(|id| match id.parse::<Pmid>() {
            Ok(pmid) => Some(pmid),
            Err(_) => {
                warn!(id = id.as_str(), "ignoring malformed PMID in search result");
                None
            }
        })
        .collect()
}
