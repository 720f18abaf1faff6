//! Hetzner Cloud REST client

use super::{ProviderApi, ProviderCredential, RawServer, ServerSnapshot};
use crate::error::{Result, WardenError};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_BASE_URL: &str = "https://api.hetzner.cloud/v1";
const PAGE_SIZE: u32 = 50;

#[derive(Clone)]
pub struct HetznerClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ServersPage {
    servers: Vec<RawServer>,
    #[serde(default)]
    meta: Option<PageMeta>,
}

#[derive(Debug, Deserialize)]
struct PageMeta {
    pagination: Pagination,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    next_page: Option<u32>,
}

impl HetznerClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL, timeout)
    }

    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("traffic-warden/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn fetch_page(&self, credential: &ProviderCredential, page: u32) -> Result<ServersPage> {
        let url = format!("{}/servers", self.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(credential.expose())
            .query(&[("page", page), ("per_page", PAGE_SIZE)])
            .send()
            .await
            .map_err(|e| WardenError::Fetch {
                credential: credential.masked(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WardenError::Fetch {
                credential: credential.masked(),
                reason: format!("{status}: {body}"),
            });
        }

        response.json().await.map_err(|e| WardenError::Fetch {
            credential: credential.masked(),
            reason: format!("invalid listing payload: {e}"),
        })
    }
}

#[async_trait]
impl ProviderApi for HetznerClient {
    async fn list_servers(&self, credential: &ProviderCredential) -> Result<Vec<ServerSnapshot>> {
        let mut servers = Vec::new();
        let mut page = 1;

        loop {
            let listing = self.fetch_page(credential, page).await?;
            servers.extend(
                listing
                    .servers
                    .into_iter()
                    .map(|raw| raw.into_snapshot(credential.clone())),
            );

            match listing.meta.and_then(|m| m.pagination.next_page) {
                Some(next) if next > page => page = next,
                _ => break,
            }
        }

        debug!(credential = %credential, pages = page, "Server listing complete");
        Ok(servers)
    }

    async fn shutdown(&self, server_id: u64, credential: &ProviderCredential) -> Result<()> {
        let url = format!("{}/servers/{}/actions/shutdown", self.base_url, server_id);
        let response = self
            .http
            .post(&url)
            .bearer_auth(credential.expose())
            .send()
            .await
            .map_err(|e| WardenError::Shutdown {
                server_id,
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WardenError::Shutdown {
                server_id,
                reason: format!("{status}: {body}"),
            });
        }

        info!(server_id, "Shutdown accepted by provider");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_parsing_with_pagination() {
        let page: ServersPage = serde_json::from_str(
            r#"{
                "servers": [
                    {"id": 1, "name": "a", "status": "running", "outgoing_traffic": 10, "included_traffic": 100},
                    {"id": 2, "name": "b", "status": "off", "outgoing_traffic": null, "included_traffic": 100}
                ],
                "meta": {"pagination": {"page": 1, "next_page": 2}}
            }"#,
        )
        .unwrap();

        assert_eq!(page.servers.len(), 2);
        assert_eq!(page.servers[1].outgoing_traffic, 0);
        assert_eq!(page.meta.unwrap().pagination.next_page, Some(2));
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = HetznerClient::with_base_url("http://localhost:9000/v1/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url, "http://localhost:9000/v1");
    }

    mod http {
        use super::*;
        use axum::extract::{Path, Query};
        use axum::http::{HeaderMap, StatusCode};
        use axum::response::{IntoResponse, Response};
        use axum::routing::{get, post};
        use axum::{Json, Router};
        use serde_json::json;
        use std::collections::HashMap;

        async fn serve(router: Router) -> HetznerClient {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, router).await.unwrap();
            });
            HetznerClient::with_base_url(format!("http://{addr}/v1"), Duration::from_secs(5)).unwrap()
        }

        async fn list(headers: HeaderMap, Query(query): Query<HashMap<String, String>>) -> Response {
            if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer project-token") {
                return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
            }
            assert_eq!(query.get("per_page").map(String::as_str), Some("50"));
            let page: u32 = query.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
            let next_page = if page < 3 { Some(page + 1) } else { None };
            Json(json!({
                "servers": [{
                    "id": page,
                    "name": format!("srv-{page}"),
                    "status": "running",
                    "outgoing_traffic": page * 10,
                    "included_traffic": 100
                }],
                "meta": { "pagination": { "page": page, "next_page": next_page } }
            }))
            .into_response()
        }

        async fn shutdown(Path(id): Path<u64>) -> Response {
            if id == 1 {
                Json(json!({ "action": { "status": "running" } })).into_response()
            } else {
                (StatusCode::LOCKED, "server is locked").into_response()
            }
        }

        fn router() -> Router {
            Router::new()
                .route("/v1/servers", get(list))
                .route("/v1/servers/{id}/actions/shutdown", post(shutdown))
        }

        #[tokio::test]
        async fn test_listing_follows_every_page() {
            let client = serve(router()).await;

            let servers = client.list_servers(&ProviderCredential::new("project-token")).await.unwrap();

            let ids: Vec<u64> = servers.iter().map(|s| s.id).collect();
            assert_eq!(ids, vec![1, 2, 3]);
            assert_eq!(servers[2].outgoing_bytes, 30);
            assert_eq!(servers[0].credential.expose(), "project-token");
        }

        #[tokio::test]
        async fn test_rejected_credential_is_masked_in_error() {
            let client = serve(router()).await;

            let err = client.list_servers(&ProviderCredential::new("wrong-token")).await.unwrap_err();
            assert!(matches!(err, WardenError::Fetch { .. }));
            let message = err.to_string();
            assert!(message.contains("401"));
            assert!(!message.contains("wrong-token"));
        }

        #[tokio::test]
        async fn test_shutdown_status_mapping() {
            let client = serve(router()).await;
            let credential = ProviderCredential::new("project-token");

            client.shutdown(1, &credential).await.unwrap();
            match client.shutdown(2, &credential).await {
                Err(WardenError::Shutdown { server_id, reason }) => {
                    assert_eq!(server_id, 2);
                    assert!(reason.contains("423"));
                }
                other => panic!("unexpected result: {other:?}"),
            }
        }
    }
}
