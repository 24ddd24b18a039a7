//! IMDSv2 client.
//!
//! Plain HTTP/1.1 over a fresh TCP connection per request, the same way the
//! node's own tooling talks to the link-local endpoint. Every read first
//! obtains a session token with `PUT /latest/api/token`.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Empty};
use tracing::debug;

use rootsize_core::config::MetadataConfig;

use crate::error::FetchError;

const TOKEN_PATH: &str = "/latest/api/token";
const INSTANCE_ID_PATH: &str = "/latest/meta-data/instance-id";
const INSTANCE_TYPE_PATH: &str = "/latest/meta-data/instance-type";

const TOKEN_TTL_HEADER: &str = "x-aws-ec2-metadata-token-ttl-seconds";
const TOKEN_HEADER: &str = "x-aws-ec2-metadata-token";

/// Read-only view of the instance metadata the resolver needs.
pub trait MetadataSource {
    fn instance_id(&self) -> impl Future<Output = Result<String, FetchError>> + Send;
    fn instance_type(&self) -> impl Future<Output = Result<String, FetchError>> + Send;
}

/// Client for the EC2 instance metadata service (IMDSv2).
#[derive(Debug, Clone)]
pub struct ImdsClient {
    /// `host:port` of the endpoint.
    address: String,
    request_timeout: Duration,
    token_ttl_secs: u32,
}

impl ImdsClient {
    pub fn new(config: &MetadataConfig) -> Self {
        let authority = config
            .endpoint
            .strip_prefix("http://")
            .unwrap_or(&config.endpoint)
            .trim_end_matches('/');
        let address = if authority.contains(':') {
            authority.to_string()
        } else {
            format!("{authority}:80")
        };
        Self {
            address,
            request_timeout: config.request_timeout,
            token_ttl_secs: config.token_ttl_secs,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn token(&self) -> Result<String, FetchError> {
        let ttl = self.token_ttl_secs.to_string();
        self.request(Method::PUT, TOKEN_PATH, TOKEN_TTL_HEADER, &ttl).await
    }

    /// GET a metadata path with a fresh session token.
    pub async fn get(&self, path: &str) -> Result<String, FetchError> {
        let token = self.token().await?;
        self.request(Method::GET, path, TOKEN_HEADER, &token).await
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        header: &str,
        value: &str,
    ) -> Result<String, FetchError> {
        let exchange = async {
            let stream = tokio::net::TcpStream::connect(&self.address)
                .await
                .map_err(|e| FetchError::Transient(format!("connect {}: {e}", self.address)))?;

            let io = hyper_util::rt::TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| FetchError::Transient(format!("handshake: {e}")))?;

            // Drive the connection in the background.
            tokio::spawn(async move {
                let _ = conn.await;
            });

            let req = http::Request::builder()
                .method(method.clone())
                .uri(path)
                .header("host", &self.address)
                .header("user-agent", "rootsize/0.1")
                .header(header, value)
                .body(Empty::<Bytes>::new())
                .map_err(|e| FetchError::Malformed(format!("request for {path}: {e}")))?;

            let resp = sender
                .send_request(req)
                .await
                .map_err(|e| FetchError::Transient(format!("{method} {path}: {e}")))?;

            let status = resp.status();
            let body = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| FetchError::Transient(format!("{method} {path} body: {e}")))?
                .to_bytes();

            classify(status, path)?;

            String::from_utf8(body.to_vec())
                .map(|s| s.trim().to_string())
                .map_err(|_| FetchError::Malformed(format!("{path}: response is not UTF-8")))
        };

        match tokio::time::timeout(self.request_timeout, exchange).await {
            Ok(result) => {
                if let Err(e) = &result {
                    debug!(error = %e, %path, "metadata request failed");
                }
                result
            }
            Err(_) => {
                debug!(%path, "metadata request timed out");
                Err(FetchError::Transient(format!(
                    "{method} {path}: timed out after {:?}",
                    self.request_timeout
                )))
            }
        }
    }
}

impl MetadataSource for ImdsClient {
    async fn instance_id(&self) -> Result<String, FetchError> {
        self.get(INSTANCE_ID_PATH).await
    }

    async fn instance_type(&self) -> Result<String, FetchError> {
        self.get(INSTANCE_TYPE_PATH).await
    }
}

/// Map an HTTP status onto retry semantics.
fn classify(status: StatusCode, path: &str) -> Result<(), FetchError> {
    if status.is_success() {
        Ok(())
    } else if status.is_server_error()
        || status == StatusCode::UNAUTHORIZED
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        Err(FetchError::Transient(format!("{path}: HTTP {status}")))
    } else {
        Err(FetchError::Malformed(format!("{path}: HTTP {status}")))
    }
}
