use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use serde_json::Value;

use crate::error::SyncError;
use crate::http::{USER_AGENT, ensure_success, join_url};

pub const DEFAULT_SOURCE_API: &str = "http://localhost:6666/api";
pub const FALLBACK_CATEGORY_COLOR: &str = "#808080";

#[derive(Debug, Clone)]
pub struct SourceCategory {
    pub name: String,
    pub color: String,
    pub order: i64,
}

/// One tag on a matched source post. `names` lists aliases, canonical first.
#[derive(Debug, Clone, Default)]
pub struct SourceTagRecord {
    pub names: Vec<String>,
    pub category: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExactMatch {
    pub post_id: Option<i64>,
    pub tags: Vec<SourceTagRecord>,
}

#[derive(Debug, Clone, Default)]
pub struct ReverseSearchResult {
    pub exact: Option<ExactMatch>,
}

pub trait SourceApi {
    fn tag_categories(&mut self) -> Result<Vec<SourceCategory>>;
    fn reverse_search(
        &mut self,
        content: &[u8],
        filename: &str,
        content_type: &str,
    ) -> Result<ReverseSearchResult>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub api_base: String,
    pub auth_header: Option<String>,
    pub timeout_secs: u64,
}

/// Read-only client. Never issues writes against the source service.
pub struct SourceClient {
    client: Client,
    api_base: String,
    request_count: usize,
}

impl SourceClient {
    pub fn connect(config: &SourceConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(auth) = &config.auth_header {
            let value = HeaderValue::from_str(auth).context("invalid source auth header value")?;
            headers.insert(AUTHORIZATION, value);
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .context("failed to build source HTTP client")?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            request_count: 0,
        })
    }
}

impl SourceApi for SourceClient {
    fn tag_categories(&mut self) -> Result<Vec<SourceCategory>> {
        let operation = "list source tag categories";
        let url = join_url(&self.api_base, "/tag-categories");
        self.request_count += 1;
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("{operation} request failed"))?;
        let payload: Value = ensure_success(operation, response)?
            .json()
            .with_context(|| format!("{operation} returned invalid JSON"))?;
        parse_source_categories(operation, &payload)
    }

    fn reverse_search(
        &mut self,
        content: &[u8],
        filename: &str,
        content_type: &str,
    ) -> Result<ReverseSearchResult> {
        let operation = format!("reverse search for '{filename}'");
        let url = join_url(&self.api_base, "/posts/reverse-search");
        let part = Part::bytes(content.to_vec())
            .file_name(filename.to_string())
            .mime_str(content_type)
            .with_context(|| format!("invalid content type '{content_type}'"))?;
        let form = Form::new().part("content", part);
        self.request_count += 1;
        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .with_context(|| format!("{operation} request failed"))?;
        let payload: Value = ensure_success(&operation, response)?
            .json()
            .with_context(|| format!("{operation} returned invalid JSON"))?;
        parse_reverse_search(&operation, &payload)
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

fn parse_source_categories(operation: &str, payload: &Value) -> Result<Vec<SourceCategory>> {
    let results = match payload.get("results").and_then(Value::as_array) {
        Some(list) => list,
        None => {
            return Err(SyncError::PayloadShape {
                operation: operation.to_string(),
                message: "missing or non-list 'results'".to_string(),
            }
            .into());
        }
    };
    let mut categories = Vec::new();
    for item in results {
        let name = item
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();
        if name.is_empty() {
            continue;
        }
        let color = item
            .get("color")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|color| !color.is_empty())
            .unwrap_or(FALLBACK_CATEGORY_COLOR);
        let order = item.get("order").and_then(Value::as_i64).unwrap_or(0);
        categories.push(SourceCategory {
            name: name.to_string(),
            color: color.to_string(),
            order,
        });
    }
    Ok(categories)
}

fn parse_reverse_search(operation: &str, payload: &Value) -> Result<ReverseSearchResult> {
    if !payload.is_object() {
        return Err(SyncError::PayloadShape {
            operation: operation.to_string(),
            message: "response is not an object".to_string(),
        }
        .into());
    }
    let exact_post = match payload.get("exactPost") {
        None | Some(Value::Null) => return Ok(ReverseSearchResult { exact: None }),
        Some(value) => value,
    };
    let post_id = exact_post.get("id").and_then(Value::as_i64);
    let mut tags = Vec::new();
    if let Some(raw_tags) = exact_post.get("tags").and_then(Value::as_array) {
        for raw_tag in raw_tags {
            tags.push(parse_tag_record(raw_tag));
        }
    }
    Ok(ReverseSearchResult {
        exact: Some(ExactMatch { post_id, tags }),
    })
}

fn parse_tag_record(raw_tag: &Value) -> SourceTagRecord {
    let names = raw_tag
        .get("names")
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default();
    let category = raw_tag
        .get("category")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|category| !category.is_empty())
        .map(ToString::to_string);
    SourceTagRecord { names, category }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{parse_reverse_search, parse_source_categories};
    use crate::error::SyncError;

    #[test]
    fn parse_source_categories_applies_fallbacks() {
        let payload = json!({
            "results": [
                {"name": "Species", "color": "#123456", "order": 3},
                {"name": "artist", "color": ""},
                {"name": "   "},
                {"color": "#ffffff"}
            ]
        });
        let categories =
            parse_source_categories("list source tag categories", &payload).expect("valid payload");
        assert_eq!(categories.len(), 2);
        assert_eq!(categories[0].name, "Species");
        assert_eq!(categories[0].color, "#123456");
        assert_eq!(categories[0].order, 3);
        assert_eq!(categories[1].name, "artist");
        assert_eq!(categories[1].color, "#808080");
        assert_eq!(categories[1].order, 0);
    }

    #[test]
    fn parse_source_categories_rejects_missing_results() {
        let payload = json!({ "items": [] });
        let error = parse_source_categories("list source tag categories", &payload)
            .expect_err("results is required");
        let typed = error.downcast_ref::<SyncError>().expect("typed error");
        assert!(matches!(typed, SyncError::PayloadShape { .. }));
    }

    #[test]
    fn parse_source_categories_rejects_non_list_results() {
        let payload = json!({ "results": {} });
        assert!(parse_source_categories("list source tag categories", &payload).is_err());
    }

    #[test]
    fn parse_reverse_search_without_exact_post() {
        let no_key = json!({ "similarPosts": [] });
        let result = parse_reverse_search("reverse search for 'a.jpg'", &no_key).expect("valid");
        assert!(result.exact.is_none());

        let null_key = json!({ "exactPost": null });
        let result = parse_reverse_search("reverse search for 'a.jpg'", &null_key).expect("valid");
        assert!(result.exact.is_none());
    }

    #[test]
    fn parse_reverse_search_reads_exact_match_tags() {
        let payload = json!({
            "exactPost": {
                "id": 991,
                "tags": [
                    {"names": ["Fox", "kitsune"], "category": "species"},
                    {"names": ["forest"], "category": ""},
                    {"names": [], "category": "meta"},
                    {"names": [7], "category": "broken"}
                ]
            }
        });
        let result =
            parse_reverse_search("reverse search for 'a.jpg'", &payload).expect("valid payload");
        let exact = result.exact.expect("exact match present");
        assert_eq!(exact.post_id, Some(991));
        assert_eq!(exact.tags.len(), 4);
        assert_eq!(exact.tags[0].names, vec!["Fox", "kitsune"]);
        assert_eq!(exact.tags[0].category.as_deref(), Some("species"));
        assert_eq!(exact.tags[1].category, None);
        assert!(exact.tags[2].names.is_empty());
        assert!(exact.tags[3].names.is_empty());
    }

    #[test]
    fn parse_reverse_search_tolerates_missing_tags() {
        let payload = json!({ "exactPost": { "id": 12 } });
        let result =
            parse_reverse_search("reverse search for 'a.jpg'", &payload).expect("valid payload");
        let exact = result.exact.expect("exact match present");
        assert_eq!(exact.post_id, Some(12));
        assert!(exact.tags.is_empty());
    }

    #[test]
    fn parse_reverse_search_rejects_non_object_payload() {
        let payload = json!([1, 2, 3]);
        let error =
            parse_reverse_search("reverse search for 'a.jpg'", &payload).expect_err("not object");
        let typed = error.downcast_ref::<SyncError>().expect("typed error");
        assert!(matches!(typed, SyncError::PayloadShape { .. }));
    }
}
