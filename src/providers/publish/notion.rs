use async_trait::async_trait;
use serde_json::{json, Value};

use super::Publisher;
use crate::config::Config;
use crate::error::ProviderError;
use crate::providers::error_for_status;
use crate::types::Note;

const API_BASE: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";

/// Notion accepts at most this many children per request
const MAX_BLOCKS_PER_REQUEST: usize = 100;

/// Notion rejects rich text longer than this
const MAX_TEXT_CHARS: usize = 2000;

/// Upserts notes into a Notion database, keyed by exact title
pub struct NotionPublisher {
    client: reqwest::Client,
    api_base: String,
    token: String,
    database_id: String,
    title_property: String,
}

impl NotionPublisher {
    pub fn new(token: impl Into<String>, database_id: impl Into<String>, title_property: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: API_BASE.to_string(),
            token: token.into(),
            database_id: database_id.into(),
            title_property: title_property.into(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, ProviderError> {
        let publish = &config.publish;
        let token = publish
            .token
            .clone()
            .ok_or_else(|| ProviderError::Auth("publish.token is not set".to_string()))?;
        let database_id = publish
            .database_id
            .clone()
            .ok_or_else(|| ProviderError::NotFound("publish.database_id is not set".to_string()))?;

        Ok(Self::new(token, database_id, publish.title_property.clone()))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, ProviderError> {
        let response = request
            .bearer_auth(&self.token)
            .header("Notion-Version", NOTION_VERSION)
            .send()
            .await?;
        let response = error_for_status(response).await?;

        response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))
    }

    /// Id of the first page whose title equals `title` exactly
    async fn find_page(&self, title: &str) -> Result<Option<String>, ProviderError> {
        let url = format!("{}/databases/{}/query", self.api_base, self.database_id);
        let body = json!({
            "filter": {
                "property": self.title_property,
                "title": { "equals": title }
            },
            "page_size": 1
        });

        let result = self.send(self.client.post(url).json(&body)).await?;
        Ok(result["results"][0]["id"].as_str().map(str::to_string))
    }

    async fn create_page(&self, title: &str, blocks: &[Value]) -> Result<String, ProviderError> {
        let (first, rest) = blocks.split_at(blocks.len().min(MAX_BLOCKS_PER_REQUEST));
        let body = json!({
            "parent": { "database_id": self.database_id },
            "properties": title_properties(&self.title_property, title),
            "children": first
        });

        let page = self
            .send(self.client.post(format!("{}/pages", self.api_base)).json(&body))
            .await?;
        let page_id = page["id"]
            .as_str()
            .ok_or_else(|| ProviderError::MalformedResponse("created page has no id".to_string()))?
            .to_string();

        self.append_blocks(&page_id, rest).await?;
        Ok(page_id)
    }

    async fn replace_content(&self, page_id: &str, blocks: &[Value]) -> Result<(), ProviderError> {
        for block_id in self.child_block_ids(page_id).await? {
            self.send(self.client.delete(format!("{}/blocks/{}", self.api_base, block_id)))
                .await?;
        }
        self.append_blocks(page_id, blocks).await
    }

    async fn child_block_ids(&self, page_id: &str) -> Result<Vec<String>, ProviderError> {
        let mut ids = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut url = format!(
                "{}/blocks/{}/children?page_size={}",
                self.api_base, page_id, MAX_BLOCKS_PER_REQUEST
            );
            if let Some(cursor) = &cursor {
                url.push_str(&format!("&start_cursor={}", cursor));
            }

            let page = self.send(self.client.get(url)).await?;
            if let Some(results) = page["results"].as_array() {
                ids.extend(results.iter().filter_map(|b| b["id"].as_str().map(str::to_string)));
            }

            match (page["has_more"].as_bool(), page["next_cursor"].as_str()) {
                (Some(true), Some(next)) => cursor = Some(next.to_string()),
                _ => break,
            }
        }

        Ok(ids)
    }

    async fn append_blocks(&self, page_id: &str, blocks: &[Value]) -> Result<(), ProviderError> {
        for chunk in blocks.chunks(MAX_BLOCKS_PER_REQUEST) {
            let url = format!("{}/blocks/{}/children", self.api_base, page_id);
            self.send(self.client.patch(url).json(&json!({ "children": chunk })))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Publisher for NotionPublisher {
    async fn publish(&self, note: &Note) -> Result<bool, ProviderError> {
        let blocks = markdown_to_blocks(&note.body_markdown(), &note.title);

        match self.find_page(&note.title).await? {
            Some(page_id) => {
                tracing::info!("Updating Notion page '{}' ({})", note.title, page_id);
                self.replace_content(&page_id, &blocks).await?;
            }
            None => {
                tracing::info!("Creating Notion page '{}'", note.title);
                self.create_page(&note.title, &blocks).await?;
            }
        }

        Ok(true)
    }

    fn name(&self) -> &'static str {
        "notion"
    }
}

fn title_properties(property: &str, title: &str) -> Value {
    let mut properties = serde_json::Map::new();
    properties.insert(
        property.to_string(),
        json!({ "title": [{ "text": { "content": title } }] }),
    );
    Value::Object(properties)
}

fn rich_text(text: &str) -> Value {
    let chunks: Vec<Value> = text
        .chars()
        .collect::<Vec<_>>()
        .chunks(MAX_TEXT_CHARS)
        .map(|chunk| json!({ "type": "text", "text": { "content": chunk.iter().collect::<String>() } }))
        .collect();
    Value::Array(chunks)
}

fn text_block(kind: &str, text: &str) -> Value {
    json!({
        "object": "block",
        "type": kind,
        kind: { "rich_text": rich_text(text) }
    })
}

/// Target of a markdown image line `![alt](url)`
fn image_url(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("![")?;
    let open = rest.find("](")?;
    let target = &rest[open + 2..];
    let close = target.find(')')?;
    Some(&target[..close])
}

/// Convert note markdown to Notion blocks.
///
/// `# ` lines become heading_1 (except the page title itself), `## ` lines
/// heading_2, remote images image blocks, and every other non-blank line a
/// paragraph. Local image paths stay paragraphs because Notion only embeds URLs.
pub fn markdown_to_blocks(markdown: &str, page_title: &str) -> Vec<Value> {
    let mut blocks = Vec::new();

    for line in markdown.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(heading) = line.strip_prefix("# ") {
            if heading.trim() != page_title {
                blocks.push(text_block("heading_1", heading.trim()));
            }
        } else if let Some(heading) = line.strip_prefix("## ") {
            blocks.push(text_block("heading_2", heading.trim()));
        } else if let Some(url) = image_url(line).filter(|u| u.starts_with("http://") || u.starts_with("https://")) {
            blocks.push(json!({
                "object": "block",
                "type": "image",
                "image": { "type": "external", "external": { "url": url } }
            }));
        } else {
            blocks.push(text_block("paragraph", line));
        }
    }

    blocks
}
