//! Hosting backend trait and HTTP implementation

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{multipart, StatusCode};

use super::credentials::CredentialProvider;
use super::response::decode_upload_response;
use super::HostingError;

/// A backend that stores bytes and hands back a public URL
#[async_trait]
pub trait HostingBackend: Send + Sync {
    /// Upload a single file and return its public URL
    async fn upload(
        &self,
        bytes: Bytes,
        file_name: &str,
        content_type: &str,
    ) -> Result<String, HostingError>;
}

/// HTTP client for a bearer-authenticated image host
pub struct ImageHostClient {
    http: reqwest::Client,
    base_url: String,
    upload_path: String,
    credentials: Arc<CredentialProvider>,
}

impl ImageHostClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        upload_path: impl Into<String>,
        credentials: Arc<CredentialProvider>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            upload_path: upload_path.into(),
            credentials,
        }
    }

    fn upload_url(&self) -> String {
        format!("{}{}", self.base_url, self.upload_path)
    }

    async fn send(
        &self,
        bytes: &Bytes,
        file_name: &str,
        content_type: &str,
        token: &str,
    ) -> Result<reqwest::Response, HostingError> {
        let part = multipart::Part::stream_with_length(
            reqwest::Body::from(bytes.clone()),
            bytes.len() as u64,
        )
        .file_name(file_name.to_string())
        .mime_str(content_type)?;
        let form = multipart::Form::new().part("file", part);

        Ok(self
            .http
            .post(self.upload_url())
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await?)
    }
}

#[async_trait]
impl HostingBackend for ImageHostClient {
    async fn upload(
        &self,
        bytes: Bytes,
        file_name: &str,
        content_type: &str,
    ) -> Result<String, HostingError> {
        let token = self.credentials.token().await?;
        let mut response = self.send(&bytes, file_name, content_type, &token).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            tracing::info!("Hosting backend rejected token, refreshing credentials");
            let credential = self.credentials.refresh().await?;
            response = self
                .send(&bytes, file_name, content_type, &credential.token)
                .await?;
            if response.status() == StatusCode::UNAUTHORIZED {
                return Err(HostingError::Auth(
                    "token rejected after refresh".to_string(),
                ));
            }
        }

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(HostingError::Rejected {
                status: status.as_u16(),
                message: body,
            });
        }

        let url = decode_upload_response(&body, &self.base_url)?;

        tracing::debug!(
            file_name = %file_name,
            size = bytes.len(),
            url = %url,
            "Uploaded file to hosting backend"
        );

        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hosting::Credential;
    use chrono::{Duration, Utc};

    fn client(server: &mockito::Server, credentials: CredentialProvider) -> ImageHostClient {
        ImageHostClient::new(
            reqwest::Client::new(),
            server.url(),
            "/upload",
            Arc::new(credentials),
        )
    }

    #[tokio::test]
    async fn test_upload_decodes_src_list() {
        let mut server = mockito::Server::new_async().await;
        let upload = server
            .mock("POST", "/upload")
            .match_header("authorization", "Bearer fixed")
            .with_status(200)
            .with_body(r#"[{"src":"/file/abc.jpg"}]"#)
            .expect(1)
            .create_async()
            .await;

        let client = client(&server, CredentialProvider::with_static_token("fixed"));
        let url = client
            .upload(Bytes::from_static(b"\xFF\xD8\xFFdata"), "a.jpg", "image/jpeg")
            .await
            .unwrap();

        assert_eq!(url, format!("{}/file/abc.jpg", server.url()));
        upload.assert_async().await;
    }

    #[tokio::test]
    async fn test_unauthorized_refreshes_once() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/upload")
            .match_header("authorization", "Bearer stale")
            .with_status(401)
            .create_async()
            .await;
        server
            .mock("POST", "/upload")
            .match_header("authorization", "Bearer fresh")
            .with_status(200)
            .with_body(r#"{"url":"https://img.example/ok.jpg"}"#)
            .create_async()
            .await;
        let login = server
            .mock("POST", "/login")
            .with_status(200)
            .with_body(r#"{"token":"fresh"}"#)
            .expect(1)
            .create_async()
            .await;

        let credentials = CredentialProvider::with_login(
            reqwest::Client::new(),
            format!("{}/login", server.url()),
            "user",
            "pass",
            std::time::Duration::from_secs(3600),
        );
        credentials
            .set(Credential {
                token: "stale".to_string(),
                expires_at: Utc::now() + Duration::hours(1),
            })
            .await;

        let url = client(&server, credentials)
            .upload(Bytes::from_static(b"data"), "a.jpg", "image/jpeg")
            .await
            .unwrap();

        assert_eq!(url, "https://img.example/ok.jpg");
        login.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejected_upload() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/upload")
            .with_status(413)
            .with_body("too big")
            .create_async()
            .await;

        let err = client(&server, CredentialProvider::with_static_token("fixed"))
            .upload(Bytes::from_static(b"data"), "a.jpg", "image/jpeg")
            .await
            .unwrap_err();

        assert!(matches!(err, HostingError::Rejected { status: 413, .. }));
    }

    #[tokio::test]
    async fn test_message_only_response_fails() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/upload")
            .with_status(200)
            .with_body(r#"{"message":"success"}"#)
            .create_async()
            .await;

        let err = client(&server, CredentialProvider::with_static_token("fixed"))
            .upload(Bytes::from_static(b"data"), "a.jpg", "image/jpeg")
            .await
            .unwrap_err();

        assert!(matches!(err, HostingError::UnrecognizedResponse(_)));
    }
}
