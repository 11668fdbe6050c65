use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::info;

use deskbox::{
    CreateSandbox, PreviewLink, ProvisionError, Result, SandboxProvider, Snapshot, SnapshotSpec,
    Volume, VolumeMount,
};

use crate::http::HttpClient;

/// `SandboxProvider` implementation over the provider's REST API.
#[derive(Clone)]
pub struct CloudClient {
    http: HttpClient,
}

// -- wire types -------------------------------------------------------------

#[derive(Deserialize)]
struct SnapshotResponse {
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct VolumeResponse {
    id: String,
    name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSnapshotRequest<'a> {
    name: &'a str,
    image_name: &'a str,
    cpu: u32,
    memory: u32,
    disk: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VolumeMountRequest<'a> {
    volume_id: &'a str,
    mount_path: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSandboxRequest<'a> {
    snapshot: &'a str,
    volumes: Vec<VolumeMountRequest<'a>>,
    env: std::collections::BTreeMap<&'a str, &'a str>,
}

#[derive(Deserialize)]
struct CreateSandboxResponse {
    id: String,
}

#[derive(Deserialize)]
struct PreviewLinkResponse {
    url: String,
    token: String,
}

// -- client -----------------------------------------------------------------

impl CloudClient {
    pub fn new(api_url: String, api_key: String) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new(api_url, api_key)?,
        })
    }

    /// Issue a request and decode a JSON body, mapping non-success statuses
    /// to [`ProvisionError::Backend`]. `Ok(None)` on 404 when `missing_ok`.
    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        missing_ok: bool,
    ) -> Result<Option<T>> {
        let mut request = self.http.request(method, path);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ProvisionError::Backend(format!("{path}: {e}")))?;

        let status = response.status();
        if missing_ok && status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProvisionError::Backend(format!("{path} {status}: {body}")));
        }

        let value = response
            .json::<T>()
            .await
            .map_err(|e| ProvisionError::Backend(format!("{path} decode: {e}")))?;
        Ok(Some(value))
    }

    /// Like [`Self::call`] but the resource is required to exist.
    async fn call_required<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        self.call(method, path, body, false)
            .await?
            .ok_or_else(|| ProvisionError::Backend(format!("{path}: empty response")))
    }

    /// Issue a request whose response body is irrelevant (e.g. DELETE).
    async fn call_unit(&self, method: Method, path: &str) -> Result<()> {
        let response = self
            .http
            .request(method, path)
            .send()
            .await
            .map_err(|e| ProvisionError::Backend(format!("{path}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProvisionError::Backend(format!("{path} {status}: {body}")));
        }
        Ok(())
    }
}

#[async_trait]
impl SandboxProvider for CloudClient {
    async fn get_snapshot(&self, name: &str) -> Result<Option<Snapshot>> {
        let found: Option<SnapshotResponse> = self
            .call(Method::GET, &format!("/snapshots/{name}"), None, true)
            .await?;
        Ok(found.map(|s| Snapshot {
            id: s.id,
            name: s.name,
        }))
    }

    async fn create_snapshot(&self, spec: &SnapshotSpec) -> Result<Snapshot> {
        let request = CreateSnapshotRequest {
            name: &spec.name,
            image_name: &spec.image,
            cpu: spec.cpu,
            memory: spec.memory_gb,
            disk: spec.disk_gb,
        };
        let body = serde_json::to_value(&request)
            .map_err(|e| ProvisionError::Backend(format!("encode snapshot request: {e}")))?;
        let created: SnapshotResponse = self
            .call_required(Method::POST, "/snapshots", Some(body))
            .await?;
        info!(id = %created.id, name = %created.name, "snapshot created");
        Ok(Snapshot {
            id: created.id,
            name: created.name,
        })
    }

    async fn get_volume(&self, name: &str) -> Result<Option<Volume>> {
        let found: Option<VolumeResponse> = self
            .call(Method::GET, &format!("/volumes/{name}"), None, true)
            .await?;
        Ok(found.map(|v| Volume {
            id: v.id,
            name: v.name,
        }))
    }

    async fn create_sandbox(&self, params: &CreateSandbox) -> Result<String> {
        let request = CreateSandboxRequest {
            snapshot: &params.snapshot,
            volumes: params
                .volumes
                .iter()
                .map(|m: &VolumeMount| VolumeMountRequest {
                    volume_id: &m.volume_id,
                    mount_path: &m.mount_path,
                })
                .collect(),
            env: params
                .env
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect(),
        };
        let body = serde_json::to_value(&request)
            .map_err(|e| ProvisionError::Backend(format!("encode sandbox request: {e}")))?;
        let created: CreateSandboxResponse = self
            .call_required(Method::POST, "/sandbox", Some(body))
            .await?;
        Ok(created.id)
    }

    async fn preview_link(&self, sandbox_id: &str, port: u16) -> Result<PreviewLink> {
        let link: PreviewLinkResponse = self
            .call_required(
                Method::GET,
                &format!("/sandbox/{sandbox_id}/ports/{port}/preview-url"),
                None,
            )
            .await?;
        Ok(PreviewLink {
            url: link.url,
            token: link.token,
        })
    }

    async fn delete_sandbox(&self, sandbox_id: &str) -> Result<()> {
        self.call_unit(Method::DELETE, &format!("/sandbox/{sandbox_id}"))
            .await
    }
}
