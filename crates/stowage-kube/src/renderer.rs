//! Overlay renderer: fetch a manifest source and apply structural overlays

use std::time::Duration;

use async_trait::async_trait;
use stowage_core::{ImageSubstitution, Patch};
use tracing::debug;
use url::Url;

use crate::error::{KubeError, Result};

/// Expands a manifest source plus overlays into rendered documents
///
/// Output must be deterministic for identical input so that fingerprints
/// are meaningful.
#[async_trait]
pub trait OverlayRenderer: Send + Sync {
    async fn render(
        &self,
        url: &str,
        patches: &[Patch],
        images: &[ImageSubstitution],
    ) -> Result<Vec<u8>>;
}

/// Renderer fetching sources over HTTP(S) or from local files
pub struct HttpOverlayRenderer {
    client: reqwest::Client,
}

impl HttpOverlayRenderer {
    /// Create a renderer whose fetches are bounded by `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("stowage/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Create with an existing HTTP client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Fetch the raw manifest source
    pub async fn fetch(&self, source: &str) -> Result<String> {
        let url = Url::parse(source)
            .map_err(|e| KubeError::InvalidManifest(format!("invalid URL '{}': {}", source, e)))?;

        match url.scheme() {
            "file" => {
                let path = url.to_file_path().map_err(|_| {
                    KubeError::InvalidManifest(format!("invalid file URL '{}'", source))
                })?;
                tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| unreadable(source, e))
            }
            "http" | "https" => {
                let response = self
                    .client
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| unreadable(source, e))?;
                let status = response.status();
                if status != reqwest::StatusCode::OK {
                    return Err(KubeError::Fetch {
                        url: source.to_string(),
                        status: status.as_u16(),
                    });
                }
                response.text().await.map_err(|e| unreadable(source, e))
            }
            other => Err(KubeError::InvalidManifest(format!(
                "unsupported URL scheme '{}' in '{}'",
                other, source
            ))),
        }
    }
}

/// Transport and filesystem failures are input errors of the declared source
fn unreadable(source: &str, err: impl std::fmt::Display) -> KubeError {
    KubeError::Render {
        url: source.to_string(),
        message: err.to_string(),
    }
}

#[async_trait]
impl OverlayRenderer for HttpOverlayRenderer {
    async fn render(
        &self,
        url: &str,
        patches: &[Patch],
        images: &[ImageSubstitution],
    ) -> Result<Vec<u8>> {
        let source = self.fetch(url).await?;
        debug!(url, bytes = source.len(), "fetched manifest source");

        stowage_core::render(&source, patches, images).map_err(|e| KubeError::Render {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stowage_core::PatchTarget;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MANIFEST: &str = r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
spec:
  replicas: 1
"#;

    fn renderer() -> HttpOverlayRenderer {
        HttpOverlayRenderer::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_render_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/web.yaml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(MANIFEST))
            .mount(&server)
            .await;

        let patches = vec![Patch {
            target: PatchTarget {
                kind: "Deployment".to_string(),
                name: Some("web".to_string()),
                namespace: None,
            },
            patch: json!({"spec": {"replicas": 3}}),
        }];
        let url = format!("{}/web.yaml", server.uri());
        let rendered = renderer().render(&url, &patches, &[]).await.unwrap();
        let text = String::from_utf8(rendered).unwrap();
        assert!(text.contains("replicas: 3"));
    }

    #[tokio::test]
    async fn test_non_200_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let url = format!("{}/missing.yaml", server.uri());
        let err = renderer().render(&url, &[], &[]).await.unwrap_err();
        assert!(matches!(err, KubeError::Fetch { status: 404, .. }));
        assert!(err.is_input_error());
    }

    #[tokio::test]
    async fn test_render_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("web.yaml");
        std::fs::write(&file, MANIFEST).unwrap();

        let url = Url::from_file_path(&file).unwrap().to_string();
        let a = renderer().render(&url, &[], &[]).await.unwrap();
        let b = renderer().render(&url, &[], &[]).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_invalid_source_reported_as_render_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("bad.yaml");
        std::fs::write(&file, "- just\n- a list\n").unwrap();

        let url = Url::from_file_path(&file).unwrap().to_string();
        let err = renderer().render(&url, &[], &[]).await.unwrap_err();
        assert!(matches!(err, KubeError::Render { .. }));
    }

    #[tokio::test]
    async fn test_missing_file_is_input_error() {
        let dir = tempfile::tempdir().unwrap();
        let url = Url::from_file_path(dir.path().join("absent.yaml")).unwrap().to_string();

        let err = renderer().render(&url, &[], &[]).await.unwrap_err();
        assert!(matches!(err, KubeError::Render { .. }));
        assert!(err.is_input_error());
    }

    #[tokio::test]
    async fn test_refused_connection_is_input_error() {
        let err = renderer()
            .render("http://127.0.0.1:1/web.yaml", &[], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::Render { ref url, .. } if url == "http://127.0.0.1:1/web.yaml"));
        assert!(err.is_input_error());
    }

    #[tokio::test]
    async fn test_unsupported_scheme() {
        let err = renderer().fetch("ftp://example.com/x.yaml").await.unwrap_err();
        assert!(matches!(err, KubeError::InvalidManifest(_)));
    }
}
