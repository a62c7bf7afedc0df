use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

pub const WIKIPEDIA_API_URL: &str = "https://en.wikipedia.org/w/api.php";
pub const NO_RESULT: &str = "No good Wikipedia Search Result was found";

const TOP_K_RESULTS: usize = 3;
const MAX_CONTENT_CHARS: usize = 4000;

#[derive(Deserialize)]
struct SearchResponse {
    query: Option<SearchQuery>,
}

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    search: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    title: String,
}

#[derive(Deserialize)]
struct ExtractResponse {
    query: Option<ExtractQuery>,
}

#[derive(Deserialize)]
struct ExtractQuery {
    #[serde(default)]
    pages: HashMap<String, Page>,
}

#[derive(Deserialize)]
struct Page {
    title: String,
    #[serde(default)]
    extract: Option<String>,
}

/// Encyclopedia lookup exposed to the agent as the `wikipedia_search` tool.
#[derive(Clone)]
pub struct WikipediaSearch {
    client: reqwest::Client,
    api_url: String,
}

impl WikipediaSearch {
    pub const NAME: &'static str = "wikipedia_search";

    pub fn new(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into(),
        }
    }

    /// Function-tool declaration in the Responses API format.
    pub fn definition() -> Value {
        json!({
            "type": "function",
            "name": Self::NAME,
            "description": "Search Wikipedia for information about a given topic.",
            "parameters": {
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The topic to search for."
                    }
                },
                "required": ["query"],
                "additionalProperties": false
            },
            "strict": true
        })
    }

    pub async fn search(&self, query: &str) -> Result<String, reqwest::Error> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(NO_RESULT.to_string());
        }

        let limit = TOP_K_RESULTS.to_string();
        let hits: SearchResponse = self
            .client
            .get(&self.api_url)
            .query(&[
                ("action", "query"),
                ("list", "search"),
                ("srsearch", query),
                ("srlimit", limit.as_str()),
                ("format", "json"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let titles: Vec<String> = hits
            .query
            .map(|q| q.search.into_iter().map(|hit| hit.title).collect())
            .unwrap_or_default();

        let mut summaries = Vec::new();
        for title in titles {
            match self.summary(&title).await? {
                Some(block) => summaries.push(block),
                None => log::info!("Wikipedia page '{}' has no extract", title),
            }
        }

        if summaries.is_empty() {
            return Ok(NO_RESULT.to_string());
        }
        Ok(summaries
            .join("\n\n")
            .chars()
            .take(MAX_CONTENT_CHARS)
            .collect())
    }

    async fn summary(&self, title: &str) -> Result<Option<String>, reqwest::Error> {
        let page: ExtractResponse = self
            .client
            .get(&self.api_url)
            .query(&[
                ("action", "query"),
                ("prop", "extracts"),
                ("exintro", "1"),
                ("explaintext", "1"),
                ("redirects", "1"),
                ("titles", title),
                ("format", "json"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(page
            .query
            .into_iter()
            .flat_map(|q| q.pages.into_values())
            .find_map(|page| match page.extract {
                Some(extract) if !extract.trim().is_empty() => {
                    Some(format!("Page: {}\nSummary: {}", page.title, extract.trim()))
                }
                _ => None,
            }))
    }
}
