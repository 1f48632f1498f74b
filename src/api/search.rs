//! Message search through the Substrate search service
//!
//! Substrate only accepts the token the web client acquires for its own
//! search box. When that token is missing or rejected, the query is typed
//! into the web client once so it mints a fresh one, then retried directly.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;

use super::client::{is_auth_expired, RequestAuth, TeamsClient};
use super::html::strip_html;
use crate::auth::AuthError;
use crate::models::{Audience, SearchCredential};

const SEARCH_URL: &str = "https://substrate.office.com/searchservice/api/v2/query";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SearchResponse {
    #[serde(default)]
    entity_sets: Vec<EntitySet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EntitySet {
    #[serde(default)]
    result_sets: Vec<ResultSet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResultSet {
    total: Option<u64>,
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SearchResult {
    hit_highlighted_summary: Option<String>,
    summary: Option<String>,
    source: Option<ResultSource>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResultSource {
    client_conversation_id: Option<String>,
    client_thread_id: Option<String>,
    date_time_received: Option<String>,
    display_to: Option<String>,
    from: Option<Sender>,
    preview: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Sender {
    email_address: Option<EmailAddress>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EmailAddress {
    name: Option<String>,
    address: Option<String>,
}

/// One matching message.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub conversation_id: Option<String>,
    pub sender: String,
    pub sent_at: Option<String>,
    pub summary: String,
}

/// One page of results.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPage {
    pub total: u64,
    pub hits: Vec<SearchHit>,
}

fn request_body(query: &str, from: usize, size: usize) -> serde_json::Value {
    let id = uuid::Uuid::new_v4().to_string();
    serde_json::json!({
        "entityRequests": [{
            "entityTypes": ["Message"],
            "contentSources": ["Teams"],
            "propertySet": "Optimized",
            "fields": [
                "Extension_SkypeSpaces_ConversationPost_Extension_FromSkypeInternalId_String",
                "Extension_SkypeSpaces_ConversationPost_Extension_ThreadType_String",
                "Extension_SkypeSpaces_ConversationPost_Extension_SkypeGroupId_String"
            ],
            "query": {
                "queryString": query,
                "displayQueryString": query
            },
            "from": from,
            "size": size,
            "topResultsCount": 0
        }],
        "cvid": id,
        "logicalId": id,
        "scenario": {
            "Dimensions": [
                {"DimensionName": "QueryType", "DimensionValue": "Messages"},
                {"DimensionName": "FormFactor", "DimensionValue": "general.web.reactSearch"}
            ],
            "Name": "powerbar"
        }
    })
}

fn parse_page(body: SearchResponse) -> SearchPage {
    let mut total = 0;
    let mut hits = Vec::new();

    for set in body.entity_sets.into_iter().flat_map(|e| e.result_sets) {
        total += set.total.unwrap_or(set.results.len() as u64);
        for result in set.results {
            let source = result.source.unwrap_or_default();
            let sender = source
                .from
                .and_then(|f| f.email_address)
                .and_then(|a| a.name.or(a.address))
                .or(source.display_to)
                .unwrap_or_else(|| "?".to_string());
            let summary = result
                .hit_highlighted_summary
                .or(result.summary)
                .or(source.preview)
                .map(|s| strip_html(&s).trim().to_string())
                .unwrap_or_default();

            hits.push(SearchHit {
                conversation_id: source.client_conversation_id.or(source.client_thread_id),
                sender,
                sent_at: source.date_time_received,
                summary,
            });
        }
    }

    SearchPage { total, hits }
}

async fn query_substrate(
    client: &TeamsClient,
    cred: &SearchCredential,
    query: &str,
    from: usize,
    size: usize,
) -> Result<SearchPage> {
    let body = request_body(query, from, size);
    let resp = client
        .send(
            Audience::Search,
            Method::POST,
            SEARCH_URL,
            RequestAuth::Bearer(&cred.token),
            Some(&body),
        )
        .await?;
    let body: SearchResponse = resp
        .json()
        .await
        .context("Failed to parse search response")?;
    Ok(parse_page(body))
}

/// What the search retry loop needs from a client.
#[async_trait]
trait SearchBackend: Sync {
    fn search_credential(&self) -> Option<SearchCredential>;

    /// Run `query` in the web client so it mints a search token.
    async fn mint_search_token(&self, query: &str) -> Result<(), AuthError>;

    async fn query(
        &self,
        cred: &SearchCredential,
        query: &str,
        from: usize,
        size: usize,
    ) -> Result<SearchPage>;
}

#[async_trait]
impl SearchBackend for TeamsClient {
    fn search_credential(&self) -> Option<SearchCredential> {
        self.cached_search_credential()
    }

    async fn mint_search_token(&self, query: &str) -> Result<(), AuthError> {
        self.auth().search_via_browser(query).await
    }

    async fn query(
        &self,
        cred: &SearchCredential,
        query: &str,
        from: usize,
        size: usize,
    ) -> Result<SearchPage> {
        query_substrate(self, cred, query, from, size).await
    }
}

/// Search messages, minting a search token through the browser at most once.
pub async fn search_data(
    client: &TeamsClient,
    query: &str,
    from: usize,
    size: usize,
) -> Result<SearchPage> {
    search_with_healing(client, query, from, size).await
}

async fn search_with_healing<B: SearchBackend + ?Sized>(
    backend: &B,
    query: &str,
    from: usize,
    size: usize,
) -> Result<SearchPage> {
    let mut healed = false;
    loop {
        let Some(cred) = backend.search_credential() else {
            if healed {
                return Err(AuthError::AuthRequired {
                    audience: Audience::Search,
                }
                .into());
            }
            tracing::info!("No search token, running the search in the browser");
            backend.mint_search_token(query).await?;
            healed = true;
            continue;
        };

        match backend.query(&cred, query, from, size).await {
            Err(e) if !healed && is_auth_expired(&e, Audience::Search) => {
                tracing::info!("Search token rejected, running the search in the browser");
                backend.mint_search_token(query).await?;
                healed = true;
            }
            other => return other,
        }
    }
}

/// Search messages (prints to stdout).
pub async fn search(client: &TeamsClient, query: &str, from: usize, size: usize) -> Result<()> {
    let page = search_data(client, query, from, size).await?;

    if page.hits.is_empty() {
        println!("No results for \"{}\".", query);
        return Ok(());
    }

    println!(
        "Results {}-{} of {} for \"{}\":",
        from + 1,
        from + page.hits.len(),
        page.total,
        query
    );
    println!("{:-<60}", "");
    for hit in &page.hits {
        let when = hit.sent_at.as_deref().unwrap_or("");
        println!("[{}] {}: {}", when, hit.sender, hit.summary);
        if let Some(ref conv) = hit.conversation_id {
            println!("  Conversation: {}", conv);
        }
    }
    Ok(())
}
