//! Input Decoder: validates a job's input against the Predictor's declared
//! schema and materializes file/binary fields as local handles released on
//! scope exit.

use std::collections::HashSet;
use std::path::PathBuf;

use serde_json::Value;

use crate::error::DecodeError;

/// Schema-driven decoder for one Predictor's declared input shape.
///
/// File-typed fields are detected the way cog's schema generator marks them:
/// `{"type": "string", "format": "uri"}`.
pub struct InputDecoder {
    validator: jsonschema::Validator,
    file_fields: HashSet<String>,
    http: reqwest::Client,
}

impl InputDecoder {
    pub fn new(input_schema: &Value) -> Result<Self, DecodeError> {
        let mut schema = input_schema.clone();
        if let Some(obj) = schema.as_object_mut() {
            obj.insert("additionalProperties".to_string(), Value::Bool(false));
        }

        let validator = jsonschema::validator_for(&schema)
            .map_err(|e| DecodeError::InputInvalid(format!("invalid input schema: {e}")))?;

        let file_fields = schema
            .get("properties")
            .and_then(|p| p.as_object())
            .map(|props| {
                props
                    .iter()
                    .filter(|(_, v)| v.get("format").and_then(|f| f.as_str()) == Some("uri"))
                    .map(|(k, _)| k.clone())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self { validator, file_fields, http: reqwest::Client::new() })
    }

    /// Validate `input` and materialize any file fields, returning a
    /// [`DecodedInput`] whose handles are released when it is dropped.
    pub async fn decode(&self, mut input: Value) -> Result<DecodedInput, DecodeError> {
        if self.validator.validate(&input).is_err() {
            let detail = self
                .validator
                .iter_errors(&input)
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(DecodeError::InputInvalid(detail));
        }

        let mut cleanups = Vec::new();
        if let Some(obj) = input.as_object_mut() {
            for field in &self.file_fields {
                let Some(Value::String(url)) = obj.get(field) else {
                    continue;
                };
                let url = url.clone();
                let path = self.fetch_to_tempfile(&url).await?;
                obj.insert(field.clone(), Value::String(path.to_string_lossy().into_owned()));
                cleanups.push(CleanupGuard::new(path));
            }
        }

        Ok(DecodedInput { value: input, _cleanups: cleanups })
    }

    async fn fetch_to_tempfile(&self, url: &str) -> Result<PathBuf, DecodeError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| DecodeError::FetchFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DecodeError::FetchFailed(format!(
                "GET {url} returned {}",
                response.status()
            )));
        }

        let bytes = response.bytes().await.map_err(|e| DecodeError::FetchFailed(e.to_string()))?;

        let path = std::env::temp_dir().join(format!("coglet-input-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, &bytes).await.map_err(|e| DecodeError::FetchFailed(e.to_string()))?;

        Ok(path)
    }
}

/// A validated, fully materialized job input. Any file handles it owns are
/// released when this value is dropped — success, failure, or early return
/// all release on scope exit, with no explicit cleanup-callback list needed.
pub struct DecodedInput {
    pub value: Value,
    _cleanups: Vec<CleanupGuard>,
}

struct CleanupGuard {
    path: PathBuf,
}

impl CleanupGuard {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to clean up materialized input file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn schema(props: Value, required: Vec<&str>) -> Value {
        json!({
            "type": "object",
            "properties": props,
            "required": required,
        })
    }

    #[tokio::test]
    async fn rejects_missing_required_field() {
        let decoder = InputDecoder::new(&schema(json!({"s": {"type": "string"}}), vec!["s"])).unwrap();
        let err = decoder.decode(json!({})).await.unwrap_err();
        assert!(matches!(err, DecodeError::InputInvalid(_)));
    }

    #[tokio::test]
    async fn rejects_additional_properties() {
        let decoder = InputDecoder::new(&schema(json!({"s": {"type": "string"}}), vec!["s"])).unwrap();
        let err = decoder.decode(json!({"s": "ok", "extra": 1})).await.unwrap_err();
        assert!(matches!(err, DecodeError::InputInvalid(_)));
    }

    #[tokio::test]
    async fn additional_properties_is_forced_false_even_if_schema_declares_true() {
        let mut lenient_schema = schema(json!({"s": {"type": "string"}}), vec!["s"]);
        lenient_schema.as_object_mut().unwrap().insert("additionalProperties".to_string(), json!(true));

        let decoder = InputDecoder::new(&lenient_schema).unwrap();
        let err = decoder.decode(json!({"s": "ok", "extra": 1})).await.unwrap_err();
        assert!(matches!(err, DecodeError::InputInvalid(_)));
    }

    #[tokio::test]
    async fn passes_through_plain_input() {
        let decoder = InputDecoder::new(&schema(json!({"s": {"type": "string"}}), vec!["s"])).unwrap();
        let decoded = decoder.decode(json!({"s": "ok"})).await.unwrap();
        assert_eq!(decoded.value, json!({"s": "ok"}));
    }

    #[tokio::test]
    async fn materializes_file_field_and_cleans_up() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
            .mount(&server)
            .await;

        let decoder = InputDecoder::new(&schema(
            json!({"image": {"type": "string", "format": "uri"}}),
            vec!["image"],
        ))
        .unwrap();

        let decoded = decoder.decode(json!({"image": server.uri()})).await.unwrap();
        let path = decoded.value["image"].as_str().unwrap().to_string();
        assert!(std::path::Path::new(&path).exists());
        drop(decoded);
        assert!(!std::path::Path::new(&path).exists(), "cleanup guard should remove the file on drop");
    }

    #[tokio::test]
    async fn file_fetch_failure_is_input_invalid_fetch_failed() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(404)).mount(&server).await;

        let decoder = InputDecoder::new(&schema(
            json!({"image": {"type": "string", "format": "uri"}}),
            vec!["image"],
        ))
        .unwrap();

        let err = decoder.decode(json!({"image": server.uri()})).await.unwrap_err();
        assert!(matches!(err, DecodeError::FetchFailed(_)));
    }
}
