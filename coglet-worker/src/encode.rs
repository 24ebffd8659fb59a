//! Output Encoder: recursively walks a prediction output value, uploading
//! binary handles and substituting the URL the upload service returns.

use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::EncodeError;
use crate::predictor::{BinaryHandle, OutputValue};

pub struct OutputEncoder {
    http: reqwest::Client,
    upload_url: String,
}

impl OutputEncoder {
    pub fn new(upload_url: String) -> Self {
        Self { http: reqwest::Client::new(), upload_url }
    }

    /// Recursively encode `value`, uploading any binary handle it contains.
    pub fn encode<'a>(&'a self, value: OutputValue) -> BoxFuture<'a, Result<Value, EncodeError>> {
        Box::pin(async move {
            match value {
                OutputValue::Json(v) => Ok(v),
                OutputValue::Binary(handle) => self.upload(handle).await,
                OutputValue::Array(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.encode(item).await?);
                    }
                    Ok(Value::Array(out))
                }
                OutputValue::Object(fields) => {
                    let mut map = serde_json::Map::new();
                    for (k, v) in fields {
                        map.insert(k, self.encode(v).await?);
                    }
                    Ok(Value::Object(map))
                }
            }
        })
    }

    async fn upload(&self, handle: BinaryHandle) -> Result<Value, EncodeError> {
        let bytes = tokio::fs::read(&handle.path).await.map_err(|e| EncodeError::UploadFailed(e.to_string()))?;

        let filename = handle
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());

        let mut part = reqwest::multipart::Part::bytes(bytes).file_name(filename);
        if let Some(ct) = &handle.content_type {
            part = part.mime_str(ct).map_err(|e| EncodeError::UploadFailed(e.to_string()))?;
        }
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .http
            .put(&self.upload_url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| EncodeError::UploadFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EncodeError::UploadFailed(format!(
                "PUT {} returned {}",
                self.upload_url,
                response.status()
            )));
        }

        let body: Value = response.json().await.map_err(|e| EncodeError::UploadFailed(e.to_string()))?;
        body.get("url")
            .cloned()
            .ok_or_else(|| EncodeError::UploadFailed("upload response missing url field".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn plain_json_passes_through_unchanged() {
        let encoder = OutputEncoder::new("http://unused.invalid".into());
        let out = encoder.encode(OutputValue::Json(json!({"a": 1}))).await.unwrap();
        assert_eq!(out, json!({"a": 1}));
    }

    #[tokio::test]
    async fn uploads_binary_handle_and_substitutes_url() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"url": "https://cdn.example/out.png"})))
            .mount(&server)
            .await;

        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), b"fake image bytes").unwrap();

        let encoder = OutputEncoder::new(server.uri());
        let handle = BinaryHandle { path: tmp.path().to_path_buf(), content_type: Some("image/png".into()) };
        let out = encoder.encode(OutputValue::Binary(handle)).await.unwrap();
        assert_eq!(out, json!("https://cdn.example/out.png"));
    }

    #[tokio::test]
    async fn upload_failure_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("PUT")).respond_with(ResponseTemplate::new(500)).mount(&server).await;

        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), b"data").unwrap();

        let encoder = OutputEncoder::new(server.uri());
        let handle = BinaryHandle { path: tmp.path().to_path_buf(), content_type: None };
        let err = encoder.encode(OutputValue::Binary(handle)).await.unwrap_err();
        assert!(matches!(err, EncodeError::UploadFailed(_)));
    }

    #[tokio::test]
    async fn recurses_into_nested_object_with_one_binary_field() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"url": "https://cdn.example/nested.bin"})))
            .mount(&server)
            .await;

        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), b"bytes").unwrap();

        let encoder = OutputEncoder::new(server.uri());
        let value = OutputValue::Object(vec![
            ("label".to_string(), OutputValue::Json(json!("cat"))),
            ("file".to_string(), OutputValue::Binary(BinaryHandle { path: tmp.path().to_path_buf(), content_type: None })),
        ]);
        let out = encoder.encode(value).await.unwrap();
        assert_eq!(out, json!({"label": "cat", "file": "https://cdn.example/nested.bin"}));
    }
}
