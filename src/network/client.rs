use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::HeaderMap;
use std::time::Duration;
use url::Url;

use super::{GatewayRequest, GatewayResponse, Network};
use crate::cache::ResponseSource;
use crate::config::NetworkConfig;

/// Headers that describe a single hop and must not be forwarded.
const HOP_BY_HOP: &[&str] = &[
  "connection",
  "keep-alive",
  "proxy-authenticate",
  "proxy-authorization",
  "proxy-connection",
  "te",
  "trailer",
  "transfer-encoding",
  "upgrade",
  "host",
  "content-length",
];

/// Network backed by an upstream HTTP origin.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
  upstream: Url,
}

impl HttpNetwork {
  pub fn new(config: &NetworkConfig) -> Result<Self> {
    let upstream = Url::parse(&config.upstream)
      .map_err(|e| eyre!("Invalid upstream URL {}: {}", config.upstream, e))?;

    let mut builder = reqwest::Client::builder();
    if let Some(secs) = config.timeout_secs {
      builder = builder.timeout(Duration::from_secs(secs));
    }
    let client = builder
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, upstream })
  }

  pub fn upstream(&self) -> &Url {
    &self.upstream
  }

  /// Upstream URL for an origin-relative target.
  ///
  /// Only the path and query are taken from the target, so a target such as
  /// `//other-host/x` stays on the upstream origin.
  fn resolve(&self, target: &str) -> Result<Url> {
    let (path, query) = match target.split_once('?') {
      Some((path, query)) => (path, Some(query)),
      None => (target, None),
    };
    if !path.starts_with('/') {
      return Err(eyre!("Target {} is not origin-relative", target));
    }

    let mut url = self.upstream.clone();
    url.set_path(path);
    url.set_query(query);
    Ok(url)
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &GatewayRequest) -> Result<GatewayResponse> {
    let url = self.resolve(&request.target)?;

    let response = self
      .client
      .request(request.method.clone(), url.clone())
      .headers(end_to_end(&request.headers))
      .body(request.body.clone())
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", url, e))?;

    let status = response.status();
    let headers = end_to_end(response.headers());
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", url, e))?
      .to_vec();

    Ok(GatewayResponse {
      status,
      headers,
      body,
      source: ResponseSource::Network,
    })
  }
}

/// Copy of `headers` without hop-by-hop headers.
fn end_to_end(headers: &HeaderMap) -> HeaderMap {
  let mut out = headers.clone();
  for name in HOP_BY_HOP {
    out.remove(*name);
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use reqwest::{Method, StatusCode};
  use wiremock::matchers::{body_string, header, method, path, query_param};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn network(upstream: &str) -> HttpNetwork {
    HttpNetwork::new(&NetworkConfig {
      upstream: upstream.to_string(),
      timeout_secs: Some(5),
    })
    .unwrap()
  }

  #[tokio::test]
  async fn test_forwards_path_query_and_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/points"))
      .and(query_param("since", "10"))
      .and(header("x-client", "logger"))
      .respond_with(
        ResponseTemplate::new(200)
          .set_body_raw("[]", "application/json"),
      )
      .expect(1)
      .mount(&server)
      .await;

    let mut request = GatewayRequest::get("/api/points?since=10");
    request
      .headers
      .insert("x-client", "logger".parse().unwrap());

    let response = network(&server.uri()).fetch(&request).await.unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, b"[]");
    assert_eq!(response.headers["content-type"], "application/json");
    assert_eq!(response.source, ResponseSource::Network);
  }

  #[tokio::test]
  async fn test_forwards_method_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/upload"))
      .and(body_string("lat,lon"))
      .respond_with(ResponseTemplate::new(201))
      .expect(1)
      .mount(&server)
      .await;

    let mut request = GatewayRequest::new(Method::POST, "/upload");
    request.body = b"lat,lon".to_vec();

    let response = network(&server.uri()).fetch(&request).await.unwrap();
    assert_eq!(response.status, StatusCode::CREATED);
  }

  #[tokio::test]
  async fn test_error_status_is_not_a_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(503).set_body_string("down"))
      .mount(&server)
      .await;

    let response = network(&server.uri())
      .fetch(&GatewayRequest::get("/"))
      .await
      .unwrap();

    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.body, b"down");
  }

  #[tokio::test]
  async fn test_unreachable_upstream_is_an_error() {
    // Bind and release a port so nothing is listening on it
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let uri = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let result = network(&uri).fetch(&GatewayRequest::get("/")).await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_scheme_relative_target_stays_on_upstream() {
    let upstream = MockServer::start().await;
    let other = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(200).set_body_string("upstream"))
      .expect(1)
      .mount(&upstream)
      .await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(200).set_body_string("other"))
      .expect(0)
      .mount(&other)
      .await;

    let target = format!("//{}/secret", other.address());
    let response = network(&upstream.uri())
      .fetch(&GatewayRequest::get(target))
      .await
      .unwrap();

    assert_eq!(response.body, b"upstream");
    upstream.verify().await;
    other.verify().await;
  }

  #[test]
  fn test_resolve_keeps_upstream_origin() {
    let network = network("http://127.0.0.1:8000");

    let url = network.resolve("/api/points?since=10").unwrap();
    assert_eq!(url.as_str(), "http://127.0.0.1:8000/api/points?since=10");

    let url = network.resolve("//evil.example:9000/x").unwrap();
    assert_eq!(url.host_str(), Some("127.0.0.1"));
    assert_eq!(url.port(), Some(8000));
    assert_eq!(url.path(), "//evil.example:9000/x");

    assert!(network.resolve("http://evil.example/x").is_err());
  }

  #[test]
  fn test_hop_by_hop_headers_are_stripped() {
    let mut headers = HeaderMap::new();
    headers.insert("connection", "keep-alive".parse().unwrap());
    headers.insert("transfer-encoding", "chunked".parse().unwrap());
    headers.insert("cache-control", "no-cache".parse().unwrap());

    let out = end_to_end(&headers);
    assert_eq!(out.len(), 1);
    assert_eq!(out["cache-control"], "no-cache");
  }
}
