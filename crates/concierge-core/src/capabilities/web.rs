use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::info;

use concierge_config::WebToolsConfig;

use crate::memory::MemoryStore;
use crate::task::{Capability, TaskOutcome, TaskRequest};

const USER_AGENT: &str = "concierge/0.1";
const BRAVE_SEARCH_URL: &str = "https://api.search.brave.com/res/v1/web/search";
const PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WebAction {
    Search,
    Fetch,
    Monitor,
}

/// Web search, page fetch and change monitoring.
pub struct WebCapability {
    client: reqwest::Client,
    api_key: String,
    max_results: u32,
    memory: Arc<MemoryStore>,
    search_re: Regex,
    fetch_re: Regex,
    monitor_re: Regex,
    query_re: Regex,
    url_re: Regex,
}

impl WebCapability {
    pub fn new(config: &WebToolsConfig, memory: Arc<MemoryStore>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            client,
            api_key: config.search.api_key.clone(),
            max_results: config.search.max_results,
            memory,
            search_re: Regex::new(r"(?i)search")?,
            fetch_re: Regex::new(r"(?i)fetch|get|download|scrape")?,
            monitor_re: Regex::new(r"(?i)monitor|watch|check")?,
            query_re: Regex::new(r#"(?i)search\s+(?:for\s+)?["']?([^"']+)["']?"#)?,
            url_re: Regex::new(r"(?i)https?://\S+")?,
        })
    }

    fn action(&self, description: &str) -> Option<WebAction> {
        if self.search_re.is_match(description) {
            Some(WebAction::Search)
        } else if self.fetch_re.is_match(description) {
            Some(WebAction::Fetch)
        } else if self.monitor_re.is_match(description) {
            Some(WebAction::Monitor)
        } else {
            None
        }
    }

    fn extract_query(&self, description: &str) -> String {
        self.query_re
            .captures(description)
            .map(|caps| caps[1].trim().to_string())
            .unwrap_or_else(|| description.to_string())
    }

    fn extract_url<'a>(&self, description: &'a str) -> Option<&'a str> {
        self.url_re.find(description).map(|m| m.as_str())
    }

    async fn search(&self, query: &str) -> Result<TaskOutcome> {
        info!("Performing web search: {query}");

        if self.api_key.is_empty() {
            return Ok(TaskOutcome::ok(format!("Web search completed for: {query}"))
                .with("query", query)
                .with(
                    "note",
                    "No search API key configured. Set tools.web.search.apiKey or BRAVE_API_KEY for live results.",
                ));
        }

        let count = self.max_results.to_string();
        let resp = self
            .client
            .get(BRAVE_SEARCH_URL)
            .query(&[("q", query), ("count", count.as_str())])
            .header("Accept", "application/json")
            .header("X-Subscription-Token", &self.api_key)
            .send()
            .await?;

        resp.error_for_status_ref()
            .map_err(|e| anyhow::anyhow!("Brave Search API error: {e}"))?;

        let body: serde_json::Value = resp.json().await?;
        let results: Vec<serde_json::Value> = body
            .get("web")
            .and_then(|w| w.get("results"))
            .and_then(|r| r.as_array())
            .map(|items| {
                items
                    .iter()
                    .map(|item| {
                        json!({
                            "title": item.get("title").and_then(|t| t.as_str()).unwrap_or(""),
                            "url": item.get("url").and_then(|u| u.as_str()).unwrap_or(""),
                            "description": item.get("description").and_then(|d| d.as_str()).unwrap_or(""),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(
            TaskOutcome::ok(format!("Found {} results for: {query}", results.len()))
                .with("query", query)
                .with("results", results),
        )
    }

    async fn fetch(&self, url: &str) -> Result<TaskOutcome> {
        info!("Fetching URL: {url}");
        let resp = self.client.get(url).send().await?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = resp.text().await?;
        let preview: String = body.chars().take(PREVIEW_CHARS).collect();

        Ok(TaskOutcome::ok("URL fetched successfully")
            .with("url", url)
            .with("statusCode", status)
            .with("contentType", content_type)
            .with("contentLength", body.len())
            .with("preview", preview))
    }

    async fn monitor(&self, url: &str) -> Result<TaskOutcome> {
        let body = self.client.get(url).send().await?.text().await?;
        let hash = hex_sha256(&body);
        let key = format!("monitor_{url}");

        let previous = self.memory.get_preference(&key, serde_json::Value::Null);
        let changed = previous
            .get("contentHash")
            .and_then(|h| h.as_str())
            .is_some_and(|h| h != hash);

        self.memory.save_preference(
            &key,
            &json!({
                "lastChecked": Utc::now().to_rfc3339(),
                "contentHash": hash,
                "changed": changed,
            }),
        )?;

        info!("Checked {url} (changed={changed})");
        let message = if previous.is_null() {
            format!("Website monitoring started for: {url}")
        } else if changed {
            format!("Content changed since last check: {url}")
        } else {
            format!("No change since last check: {url}")
        };
        Ok(TaskOutcome::ok(message)
            .with("url", url)
            .with("changed", changed)
            .with("note", "Schedule regular checks to detect changes"))
    }
}

fn hex_sha256(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[async_trait]
impl Capability for WebCapability {
    fn task_type(&self) -> &str {
        "web"
    }

    async fn execute(&self, task: &TaskRequest) -> Result<TaskOutcome> {
        let Some(action) = self.action(&task.description) else {
            return Ok(TaskOutcome::rejected("Web action not recognized"));
        };

        if action == WebAction::Search {
            return self.search(&self.extract_query(&task.description)).await;
        }

        let Some(url) = self.extract_url(&task.description) else {
            return Ok(TaskOutcome::rejected("No URL found in task description"));
        };
        match action {
            WebAction::Fetch => self.fetch(url).await,
            _ => self.monitor(url).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn capability() -> (WebCapability, Arc<MemoryStore>) {
        let memory = Arc::new(MemoryStore::open_in_memory().unwrap());
        let cap = WebCapability::new(&WebToolsConfig::default(), memory.clone()).unwrap();
        (cap, memory)
    }

    /// Serve `bodies` in order, one connection each, and return the base URL.
    async fn serve(bodies: Vec<&'static str>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for body in bodies {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = [0u8; 2048];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{addr}/page")
    }

    #[test]
    fn test_action_and_extraction() {
        let (cap, _memory) = capability();
        assert_eq!(cap.action("search for rust news"), Some(WebAction::Search));
        assert_eq!(cap.action("download https://x.y/z"), Some(WebAction::Fetch));
        assert_eq!(cap.action("watch https://x.y"), Some(WebAction::Monitor));
        assert_eq!(cap.action("browse around"), None);

        assert_eq!(cap.extract_query("search for 'tokio runtime'"), "tokio runtime");
        assert_eq!(cap.extract_query("look it up"), "look it up");
        assert_eq!(
            cap.extract_url("fetch https://example.com/a?b=1 now"),
            Some("https://example.com/a?b=1")
        );
    }

    #[tokio::test]
    async fn test_search_without_api_key() {
        let (cap, _memory) = capability();
        let outcome = cap
            .execute(&TaskRequest::new("search for best hiking trails"))
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.payload["query"], "best hiking trails");
        assert!(outcome.payload.contains_key("note"));
    }

    #[tokio::test]
    async fn test_missing_url() {
        let (cap, _memory) = capability();
        let outcome = cap.execute(&TaskRequest::new("download the thing")).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.message.as_deref(), Some("No URL found in task description"));
    }

    #[tokio::test]
    async fn test_fetch_reports_preview() {
        let (cap, _memory) = capability();
        let url = serve(vec!["hello world"]).await;
        let outcome = cap
            .execute(&TaskRequest::new(format!("fetch {url}")))
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.payload["statusCode"], 200);
        assert_eq!(outcome.payload["preview"], "hello world");
        assert_eq!(outcome.payload["contentLength"], 11);
        assert!(outcome.payload["contentType"]
            .as_str()
            .unwrap()
            .starts_with("text/plain"));
    }

    #[tokio::test]
    async fn test_monitor_detects_change() {
        let (cap, memory) = capability();
        let url = serve(vec!["v1", "v1", "v2"]).await;
        let task = TaskRequest::new(format!("monitor {url}"));

        let first = cap.execute(&task).await.unwrap();
        assert_eq!(first.payload["changed"], false);
        let stored = memory.get_preference(&format!("monitor_{url}"), serde_json::Value::Null);
        assert_eq!(stored["contentHash"], hex_sha256("v1"));

        let second = cap.execute(&task).await.unwrap();
        assert_eq!(second.payload["changed"], false);

        let third = cap.execute(&task).await.unwrap();
        assert_eq!(third.payload["changed"], true);
    }

    #[test]
    fn test_hex_sha256() {
        assert_eq!(
            hex_sha256("hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
