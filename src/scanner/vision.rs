//! AI product identification.
//!
//! One still frame plus the catalog go to a multimodal messages endpoint
//! which must answer strict JSON naming a product id (or a suggestion when
//! nothing in the catalog fits).

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::VisionError;
use crate::models::{de, Product, ProductId};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 256;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const INSTRUCTION: &str = "You identify products for a live-selling shop in Pakistan. \
Look at the image and match it to the closest product in this list:";

const ANSWER_FORMAT: &str = "Respond ONLY in JSON:\n\
{\"matched\":true,\"productId\":1,\"confidence\":90,\"reason\":\"...\"}\n\
OR {\"matched\":false,\"productId\":null,\"confidence\":0,\"reason\":\"...\",\"suggestion\":\"product name\"}";

#[derive(Debug, Clone, PartialEq, Deserialize, serde::Serialize)]
pub struct VisionVerdict {
    #[serde(default)]
    pub matched: bool,
    #[serde(default, rename = "productId", deserialize_with = "de::opt_id")]
    pub product_id: Option<ProductId>,
    #[serde(default, deserialize_with = "de::money")]
    pub confidence: f64,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub suggestion: Option<String>,
}

impl VisionVerdict {
    /// The product to fetch, when the model committed to one.
    pub fn matched_id(&self) -> Option<ProductId> {
        if self.matched {
            self.product_id.filter(|id| *id > 0)
        } else {
            None
        }
    }

    /// `AI Vision (90%)`
    pub fn method_label(&self) -> String {
        format!("AI Vision ({}%)", self.confidence.round() as i64)
    }

    pub fn suggestion_or_unknown(&self) -> String {
        self.suggestion
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("Unknown product")
            .to_string()
    }
}

#[async_trait]
pub trait ProductIdentifier: Send + Sync {
    async fn identify(
        &self,
        api_key: &str,
        jpeg_base64: &str,
        catalog: &[Product],
    ) -> Result<VisionVerdict, VisionError>;
}

pub struct VisionClient {
    http: reqwest::Client,
    url: String,
    model: String,
}

impl VisionClient {
    pub fn new(config: &AppConfig) -> Result<Self, VisionError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| VisionError::Request(e.to_string()))?;
        Ok(Self {
            http,
            url: config.vision_url.clone(),
            model: config.vision_model.clone(),
        })
    }
}

#[async_trait]
impl ProductIdentifier for VisionClient {
    async fn identify(
        &self,
        api_key: &str,
        jpeg_base64: &str,
        catalog: &[Product],
    ) -> Result<VisionVerdict, VisionError> {
        if api_key.trim().is_empty() {
            return Err(VisionError::MissingKey);
        }
        let body = request_body(&self.model, jpeg_base64, catalog);
        info!(
            model = %self.model,
            catalog = catalog.len(),
            image_bytes = jpeg_base64.len(),
            "sending AI identification request"
        );

        let resp = self
            .http
            .post(&self.url)
            .header("x-api-key", api_key.trim())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    VisionError::Request("request timed out".into())
                } else {
                    VisionError::Request(e.to_string())
                }
            })?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| VisionError::Request(e.to_string()))?;
        let reply: Value = serde_json::from_str(&text).map_err(|_| {
            if status.is_success() {
                VisionError::BadReply(text.chars().take(200).collect())
            } else {
                VisionError::Service(format!("HTTP {}", status.as_u16()))
            }
        })?;

        let verdict = parse_reply(&reply)?;
        info!(
            matched = verdict.matched,
            product_id = ?verdict.product_id,
            confidence = verdict.confidence,
            "AI identification answered"
        );
        Ok(verdict)
    }
}

pub fn catalog_lines(catalog: &[Product]) -> String {
    catalog
        .iter()
        .map(|p| {
            format!(
                "- ID:{} | SKU:{} | Name:{} | Category:{} | Tags:{}",
                p.id,
                p.sku,
                p.name,
                p.category.as_deref().unwrap_or(""),
                p.tags.as_deref().unwrap_or("")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn request_body(model: &str, jpeg_base64: &str, catalog: &[Product]) -> Value {
    let prompt = format!(
        "{INSTRUCTION}\n{}\n\n{ANSWER_FORMAT}",
        catalog_lines(catalog)
    );
    json!({
        "model": model,
        "max_tokens": MAX_TOKENS,
        "messages": [{
            "role": "user",
            "content": [
                {
                    "type": "image",
                    "source": { "type": "base64", "media_type": "image/jpeg", "data": jpeg_base64 }
                },
                { "type": "text", "text": prompt }
            ]
        }]
    })
}

/// Pull the verdict out of a messages-API reply.
pub fn parse_reply(reply: &Value) -> Result<VisionVerdict, VisionError> {
    if let Some(err) = reply.get("error").filter(|e| !e.is_null()) {
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        warn!(error = %message, "AI service returned an error");
        return Err(VisionError::Service(message));
    }

    let text = reply
        .get("content")
        .and_then(Value::as_array)
        .and_then(|blocks| {
            blocks
                .iter()
                .find_map(|b| b.get("text").and_then(Value::as_str))
        })
        .unwrap_or("");
    let cleaned = strip_fences(text);
    if cleaned.is_empty() {
        return Err(VisionError::BadReply("empty answer".into()));
    }
    serde_json::from_str(&cleaned).map_err(|e| VisionError::BadReply(e.to_string()))
}

/// Remove Markdown code fences the model sometimes wraps its JSON in.
pub fn strip_fences(text: &str) -> String {
    text.replace("```json", "").replace("```", "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Vec<Product> {
        vec![
            Product {
                id: 1,
                sku: "MUG-01".into(),
                name: "Ceramic Mug".into(),
                category: Some("Kitchen".into()),
                tags: Some("mug,cup".into()),
                ..Default::default()
            },
            Product {
                id: 2,
                sku: "EB-02".into(),
                name: "Earbuds".into(),
                ..Default::default()
            },
        ]
    }

    #[test]
    fn test_catalog_lines_format() {
        let lines = catalog_lines(&catalog());
        assert_eq!(
            lines,
            "- ID:1 | SKU:MUG-01 | Name:Ceramic Mug | Category:Kitchen | Tags:mug,cup\n\
             - ID:2 | SKU:EB-02 | Name:Earbuds | Category: | Tags:"
        );
    }

    #[test]
    fn test_request_body_has_image_then_text() {
        let body = request_body("claude-opus-4-5", "QUJD", &catalog());
        assert_eq!(body["max_tokens"], 256);
        let content = &body["messages"][0]["content"];
        assert_eq!(content[0]["type"], "image");
        assert_eq!(content[0]["source"]["media_type"], "image/jpeg");
        assert_eq!(content[0]["source"]["data"], "QUJD");
        assert!(content[1]["text"].as_str().unwrap().contains("ID:2 | SKU:EB-02"));
    }

    #[test]
    fn test_parse_fenced_match() {
        let reply = json!({
            "content": [{ "type": "text", "text": "```json\n{\"matched\":true,\"productId\":1,\"confidence\":87,\"reason\":\"mug shape\"}\n```" }]
        });
        let verdict = parse_reply(&reply).unwrap();
        assert_eq!(verdict.matched_id(), Some(1));
        assert_eq!(verdict.method_label(), "AI Vision (87%)");
    }

    #[test]
    fn test_parse_no_match_with_suggestion() {
        let reply = json!({
            "content": [{ "type": "text", "text": "{\"matched\":false,\"productId\":null,\"confidence\":0,\"reason\":\"not listed\",\"suggestion\":\"Steel Water Bottle\"}" }]
        });
        let verdict = parse_reply(&reply).unwrap();
        assert_eq!(verdict.matched_id(), None);
        assert_eq!(verdict.suggestion_or_unknown(), "Steel Water Bottle");
    }

    #[test]
    fn test_parse_service_error() {
        let reply = json!({ "type": "error", "error": { "type": "authentication_error", "message": "invalid x-api-key" } });
        let err = parse_reply(&reply).unwrap_err();
        assert_eq!(err.notification(), "AI error: invalid x-api-key");
    }

    #[test]
    fn test_parse_garbage_answer() {
        let reply = json!({ "content": [{ "type": "text", "text": "I think it's a mug." }] });
        assert!(matches!(parse_reply(&reply), Err(VisionError::BadReply(_))));
    }

    #[tokio::test]
    async fn test_missing_key_makes_no_call() {
        let config = AppConfig {
            vision_url: "http://127.0.0.1:9/never".into(),
            ..Default::default()
        };
        let client = VisionClient::new(&config).unwrap();
        let err = client.identify("  ", "QUJD", &catalog()).await.unwrap_err();
        assert!(matches!(err, VisionError::MissingKey));
    }
}
