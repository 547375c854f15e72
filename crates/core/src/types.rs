//! Wire types shared by the HTTP gateway and its clients.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Body of `POST /embeddings`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EmbeddingRequest {
    /// Texts to embed. May be empty; the empty string is a valid text.
    pub texts: Vec<String>,
}

/// Successful response of `POST /embeddings`; `embeddings[i]` encodes `texts[i]`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EmbeddingResponse {
    pub embeddings: Vec<Vec<f32>>,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

impl HealthResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

/// Error body returned for every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    pub detail: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_accepts_empty_strings() {
        let req: EmbeddingRequest = serde_json::from_str(r#"{"texts": ["", "a"]}"#).unwrap();
        assert_eq!(req.texts, vec!["".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_request_requires_texts() {
        assert!(serde_json::from_str::<EmbeddingRequest>(r#"{"text": ["a"]}"#).is_err());
    }

    #[test]
    fn test_health_shape() {
        let json = serde_json::to_string(&HealthResponse::ok()).unwrap();
        assert_eq!(json, r#"{"status":"ok"}"#);
    }
}
