use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::Value;

use crate::error::SyncError;
use crate::http::{USER_AGENT, ensure_success, join_url, remote_failure};

pub const DEFAULT_DESTINATION_API: &str = "http://localhost:4200/api";

const TAG_LIST_PAGE_SIZE: u32 = 500;

#[derive(Debug, Clone)]
pub struct TagCategory {
    pub id: i64,
    pub name: String,
    pub color: String,
    pub order: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub category_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct Post {
    pub id: i64,
    pub content_type: String,
    pub relative_path: String,
    pub tag_names: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PostPage {
    pub items: Vec<Post>,
    pub total: Option<i64>,
}

/// Attaching an already-present tag is success, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    Attached,
    AlreadyPresent,
}

pub trait DestinationApi {
    fn posts_page(&mut self, page: u32, page_size: u32) -> Result<PostPage>;
    fn post_content(&mut self, post_id: i64) -> Result<Vec<u8>>;
    fn tag_categories(&mut self) -> Result<Vec<TagCategory>>;
    fn create_tag_category(&mut self, name: &str, color: &str, order: i64) -> Result<TagCategory>;
    fn all_tags(&mut self) -> Result<Vec<Tag>>;
    fn create_tag(&mut self, name: &str, category_id: Option<i64>) -> Result<Tag>;
    fn update_tag(&mut self, tag_id: i64, name: &str, category_id: Option<i64>) -> Result<Tag>;
    fn attach_tag(&mut self, post_id: i64, tag_name: &str) -> Result<AttachOutcome>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct DestinationConfig {
    pub api_base: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_secs: u64,
}

pub struct DestinationClient {
    client: Client,
    api_base: String,
    request_count: usize,
}

impl DestinationClient {
    /// Builds the session and, when credentials are present, logs in once.
    /// The session cookie carries authentication for the rest of the run.
    pub fn connect(config: &DestinationConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .cookie_store(true)
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .context("failed to build destination HTTP client")?;

        let mut destination = Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            request_count: 0,
        };
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            destination.login(username, password)?;
        }
        Ok(destination)
    }

    fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let url = join_url(&self.api_base, "/auth/login");
        self.request_count += 1;
        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({ "username": username, "password": password }))
            .send()
            .context("destination login request failed")?;
        ensure_success("destination login", response)?;
        Ok(())
    }
}

impl DestinationApi for DestinationClient {
    fn posts_page(&mut self, page: u32, page_size: u32) -> Result<PostPage> {
        let operation = format!("list posts page {page}");
        let url = join_url(&self.api_base, "/posts");
        self.request_count += 1;
        let response = self
            .client
            .get(url)
            .query(&[
                ("page", page.to_string()),
                ("pageSize", page_size.to_string()),
            ])
            .send()
            .with_context(|| format!("{operation} request failed"))?;
        let payload: Value = ensure_success(&operation, response)?
            .json()
            .with_context(|| format!("{operation} returned invalid JSON"))?;
        parse_post_page(&operation, &payload)
    }

    fn post_content(&mut self, post_id: i64) -> Result<Vec<u8>> {
        let operation = format!("fetch content for post {post_id}");
        let url = join_url(&self.api_base, &format!("/posts/{post_id}/content"));
        self.request_count += 1;
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("{operation} request failed"))?;
        let bytes = ensure_success(&operation, response)?
            .bytes()
            .with_context(|| format!("{operation} could not read the body"))?;
        Ok(bytes.to_vec())
    }

    fn tag_categories(&mut self) -> Result<Vec<TagCategory>> {
        let operation = "list tag categories";
        let url = join_url(&self.api_base, "/tagcategories");
        self.request_count += 1;
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("{operation} request failed"))?;
        let payload: Value = ensure_success(operation, response)?
            .json()
            .with_context(|| format!("{operation} returned invalid JSON"))?;
        parse_categories(operation, payload)
    }

    fn create_tag_category(&mut self, name: &str, color: &str, order: i64) -> Result<TagCategory> {
        let operation = format!("create tag category '{name}'");
        let url = join_url(&self.api_base, "/tagcategories");
        self.request_count += 1;
        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({ "name": name, "color": color, "order": order }))
            .send()
            .with_context(|| format!("{operation} request failed"))?;
        let payload: Value = ensure_success(&operation, response)?
            .json()
            .with_context(|| format!("{operation} returned invalid JSON"))?;
        parse_category(&operation, payload)
    }

    fn all_tags(&mut self) -> Result<Vec<Tag>> {
        let mut tags = Vec::new();
        let mut page: u32 = 1;
        loop {
            let operation = format!("list tags page {page}");
            let url = join_url(&self.api_base, "/tags");
            self.request_count += 1;
            let response = self
                .client
                .get(url)
                .query(&[
                    ("page", page.to_string()),
                    ("pageSize", TAG_LIST_PAGE_SIZE.to_string()),
                ])
                .send()
                .with_context(|| format!("{operation} request failed"))?;
            let payload: Value = ensure_success(&operation, response)?
                .json()
                .with_context(|| format!("{operation} returned invalid JSON"))?;
            let items = parse_tag_items(&operation, &payload)?;
            let item_count = items.len();
            tags.extend(items);
            if item_count < TAG_LIST_PAGE_SIZE as usize {
                break;
            }
            page += 1;
        }
        Ok(tags)
    }

    fn create_tag(&mut self, name: &str, category_id: Option<i64>) -> Result<Tag> {
        let operation = format!("create tag '{name}'");
        let url = join_url(&self.api_base, "/tags");
        self.request_count += 1;
        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({ "name": name, "categoryId": category_id }))
            .send()
            .with_context(|| format!("{operation} request failed"))?;
        let payload: Value = ensure_success(&operation, response)?
            .json()
            .with_context(|| format!("{operation} returned invalid JSON"))?;
        parse_tag(&operation, &payload)
    }

    fn update_tag(&mut self, tag_id: i64, name: &str, category_id: Option<i64>) -> Result<Tag> {
        let operation = format!("update tag {tag_id}");
        let url = join_url(&self.api_base, &format!("/tags/{tag_id}"));
        self.request_count += 1;
        let response = self
            .client
            .put(url)
            .json(&serde_json::json!({ "name": name, "categoryId": category_id }))
            .send()
            .with_context(|| format!("{operation} request failed"))?;
        let payload: Value = ensure_success(&operation, response)?
            .json()
            .with_context(|| format!("{operation} returned invalid JSON"))?;
        parse_tag(&operation, &payload)
    }

    fn attach_tag(&mut self, post_id: i64, tag_name: &str) -> Result<AttachOutcome> {
        let operation = format!("attach tag '{tag_name}' to post {post_id}");
        let url = join_url(&self.api_base, &format!("/posts/{post_id}/tags"));
        self.request_count += 1;
        // The endpoint takes the bare JSON-encoded tag name as its body.
        let response = self
            .client
            .post(url)
            .json(&tag_name)
            .send()
            .with_context(|| format!("{operation} request failed"))?;
        let status = response.status();
        match attach_outcome(status) {
            Some(outcome) => Ok(outcome),
            None => {
                let body = response.text().unwrap_or_default();
                Err(remote_failure(&operation, status.as_u16(), &body))
            }
        }
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

fn attach_outcome(status: StatusCode) -> Option<AttachOutcome> {
    match status {
        StatusCode::OK | StatusCode::CREATED | StatusCode::NO_CONTENT => {
            Some(AttachOutcome::Attached)
        }
        StatusCode::CONFLICT => Some(AttachOutcome::AlreadyPresent),
        _ => None,
    }
}

fn list_items<'a>(operation: &str, payload: &'a Value) -> Result<&'a Vec<Value>> {
    let items = payload.get("items").or_else(|| payload.get("Items"));
    match items.and_then(Value::as_array) {
        Some(list) => Ok(list),
        None => Err(SyncError::PayloadShape {
            operation: operation.to_string(),
            message: "missing or non-list 'items'".to_string(),
        }
        .into()),
    }
}

fn parse_post_page(operation: &str, payload: &Value) -> Result<PostPage> {
    let mut items = Vec::new();
    for item in list_items(operation, payload)? {
        items.push(parse_post(operation, item)?);
    }
    let total = payload.get("totalCount").and_then(Value::as_i64);
    Ok(PostPage { items, total })
}

fn parse_post(operation: &str, item: &Value) -> Result<Post> {
    let id = item
        .get("id")
        .and_then(Value::as_i64)
        .ok_or_else(|| SyncError::PayloadShape {
            operation: operation.to_string(),
            message: "post item is missing an integer 'id'".to_string(),
        })?;
    let content_type = item
        .get("contentType")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let relative_path = item
        .get("relativePath")
        .and_then(Value::as_str)
        .filter(|path| !path.is_empty())
        .map(ToString::to_string)
        .unwrap_or_else(|| format!("post_{id}"));
    let mut tag_names = Vec::new();
    if let Some(tags) = item.get("tags").and_then(Value::as_array) {
        for tag in tags {
            if let Some(name) = tag.get("name").and_then(Value::as_str)
                && !name.trim().is_empty()
            {
                tag_names.push(name.to_string());
            }
        }
    }
    Ok(Post {
        id,
        content_type,
        relative_path,
        tag_names,
    })
}

fn parse_categories(operation: &str, payload: Value) -> Result<Vec<TagCategory>> {
    let parsed: Vec<CategoryPayload> =
        serde_json::from_value(payload).map_err(|error| SyncError::PayloadShape {
            operation: operation.to_string(),
            message: error.to_string(),
        })?;
    Ok(parsed.into_iter().map(TagCategory::from).collect())
}

fn parse_category(operation: &str, payload: Value) -> Result<TagCategory> {
    let parsed: CategoryPayload =
        serde_json::from_value(payload).map_err(|error| SyncError::PayloadShape {
            operation: operation.to_string(),
            message: error.to_string(),
        })?;
    Ok(parsed.into())
}

fn parse_tag_items(operation: &str, payload: &Value) -> Result<Vec<Tag>> {
    let mut tags = Vec::new();
    for item in list_items(operation, payload)? {
        tags.push(parse_tag(operation, item)?);
    }
    Ok(tags)
}

fn parse_tag(operation: &str, item: &Value) -> Result<Tag> {
    let parsed: TagPayload =
        serde_json::from_value(item.clone()).map_err(|error| SyncError::PayloadShape {
            operation: operation.to_string(),
            message: error.to_string(),
        })?;
    Ok(Tag {
        id: parsed.id,
        name: parsed.name,
        category_id: parsed.category_id,
    })
}

#[derive(Debug, Deserialize)]
struct CategoryPayload {
    id: i64,
    name: String,
    #[serde(default)]
    color: String,
    #[serde(default)]
    order: i64,
}

impl From<CategoryPayload> for TagCategory {
    fn from(payload: CategoryPayload) -> Self {
        Self {
            id: payload.id,
            name: payload.name,
            color: payload.color,
            order: payload.order,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TagPayload {
    id: i64,
    name: String,
    #[serde(default, rename = "categoryId")]
    category_id: Option<i64>,
}
