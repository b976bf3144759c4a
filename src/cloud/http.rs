//! Thin `reqwest`-backed implementations of the cloud trait interfaces.
//! Out of core scope per the design brief — the volume-lifecycle state
//! machine is written against [`BlockClient`]/[`ComputeClient`]/[`ShareClient`],
//! never against this module directly, so it stays a thin adapter over the
//! OpenStack HTTP APIs rather than load-bearing logic.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::cloud::block::{BlockClient, Connection, ConnectorProperties, CreateVolumeParams, VolumeFilter};
use crate::cloud::compute::ComputeClient;
use crate::cloud::identity::IdentitySession;
use crate::cloud::share::{AccessRule, CreateShareParams, ShareClient};
use crate::error::{FuxiError, FuxiResult};
use crate::model::{Attachment, LogicalVolume};

async fn authed_request(
    http: &reqwest::Client,
    identity: &dyn IdentitySession,
    method: Method,
    url: &str,
    body: Option<&Value>,
) -> FuxiResult<Value> {
    let token = identity.token().await?;
    let mut request = http.request(method, url).header("X-Auth-Token", token);
    if let Some(body) = body {
        request = request.json(body);
    }
    let response = request
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("request to {} failed: {}", url, e))?;

    match response.status() {
        StatusCode::UNAUTHORIZED => return Err(FuxiError::Unauthorized(format!("{} returned 401", url))),
        StatusCode::NOT_FOUND => return Err(FuxiError::NotFound(url.to_string())),
        status if !status.is_success() => {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("{} returned {}: {}", url, status, text).into());
        }
        _ => {}
    }

    if response.content_length() == Some(0) {
        return Ok(Value::Null);
    }
    response
        .json()
        .await
        .map_err(|e| anyhow::anyhow!("failed to parse response from {}: {}", url, e).into())
}

fn field<T: DeserializeOwned>(value: &Value, path: &[&str]) -> FuxiResult<T> {
    let mut current = value;
    for key in path {
        current = current
            .get(key)
            .ok_or_else(|| anyhow::anyhow!("response missing field {}", path.join(".")))?;
    }
    serde_json::from_value(current.clone()).map_err(|e| anyhow::anyhow!("malformed field {}: {}", path.join("."), e).into())
}

fn volume_from_json(v: &Value) -> FuxiResult<LogicalVolume> {
    let attachments = v
        .get("attachments")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .map(|a| Attachment {
                    host_id: a.get("host_name").and_then(Value::as_str).unwrap_or_default().to_string(),
                    server_id: a.get("server_id").and_then(Value::as_str).map(str::to_string),
                    attachment_id: a.get("attachment_id").and_then(Value::as_str).map(str::to_string),
                })
                .collect()
        })
        .unwrap_or_default();
    let metadata: BTreeMap<String, String> = v
        .get("metadata")
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default();

    Ok(LogicalVolume {
        id: field(v, &["id"])?,
        name: v.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
        size_gib: v.get("size").and_then(Value::as_u64).unwrap_or(0),
        status: field(v, &["status"])?,
        attachments,
        multiattach: v.get("multiattach").and_then(Value::as_bool).unwrap_or(false),
        metadata,
        protocol: v.get("share_proto").and_then(Value::as_str).map(str::to_string),
        export_locations: v
            .get("export_locations")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|e| e.get("path").and_then(Value::as_str).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default(),
    })
}

pub struct CinderHttpClient {
    http: reqwest::Client,
    endpoint: String,
    identity: Arc<dyn IdentitySession>,
}

impl CinderHttpClient {
    pub fn new(endpoint: String, identity: Arc<dyn IdentitySession>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            identity,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl BlockClient for CinderHttpClient {
    async fn list_volumes(&self, filter: &VolumeFilter) -> FuxiResult<Vec<LogicalVolume>> {
        let mut url = self.url("/volumes/detail");
        if let Some(name) = &filter.name {
            url = format!("{}?name={}", url, name);
        }
        let body = authed_request(&self.http, self.identity.as_ref(), Method::GET, &url, None).await?;
        let volumes: Vec<Value> = field(&body, &["volumes"])?;
        let mut result = Vec::new();
        for v in &volumes {
            let volume = volume_from_json(v)?;
            if filter
                .metadata
                .iter()
                .all(|(k, val)| volume.metadata.get(k) == Some(val))
            {
                result.push(volume);
            }
        }
        Ok(result)
    }

    async fn get_volume(&self, id: &str) -> FuxiResult<LogicalVolume> {
        let url = self.url(&format!("/volumes/{}", id));
        let body = authed_request(&self.http, self.identity.as_ref(), Method::GET, &url, None).await?;
        volume_from_json(&field(&body, &["volume"])?)
    }

    async fn create_volume(&self, params: &CreateVolumeParams) -> FuxiResult<LogicalVolume> {
        let url = self.url("/volumes");
        let payload = json!({"volume": {
            "name": params.name,
            "size": params.size_gib,
            "consistencygroup_id": params.consistencygroup_id,
            "snapshot_id": params.snapshot_id,
            "source_volid": params.source_volid,
            "description": params.description,
            "volume_type": params.volume_type,
            "user_id": params.user_id,
            "project_id": params.project_id,
            "availability_zone": params.availability_zone,
            "scheduler_hints": params.scheduler_hints,
            "source_replica": params.source_replica,
            "multiattach": params.multiattach,
            "metadata": params.metadata,
        }});
        let body = authed_request(&self.http, self.identity.as_ref(), Method::POST, &url, Some(&payload)).await?;
        volume_from_json(&field(&body, &["volume"])?)
    }

    async fn delete_volume(&self, id: &str) -> FuxiResult<()> {
        let url = self.url(&format!("/volumes/{}", id));
        authed_request(&self.http, self.identity.as_ref(), Method::DELETE, &url, None).await?;
        Ok(())
    }

    async fn reserve(&self, id: &str) -> FuxiResult<()> {
        let url = self.url(&format!("/volumes/{}/action", id));
        authed_request(&self.http, self.identity.as_ref(), Method::POST, &url, Some(&json!({"os-reserve": {}}))).await?;
        Ok(())
    }

    async fn unreserve(&self, id: &str) -> FuxiResult<()> {
        let url = self.url(&format!("/volumes/{}/action", id));
        authed_request(&self.http, self.identity.as_ref(), Method::POST, &url, Some(&json!({"os-unreserve": {}}))).await?;
        Ok(())
    }

    async fn initialize_connection(&self, id: &str, connector_properties: &ConnectorProperties) -> FuxiResult<Connection> {
        let url = self.url(&format!("/volumes/{}/action", id));
        let payload = json!({"os-initialize_connection": {"connector": connector_properties}});
        let body = authed_request(&self.http, self.identity.as_ref(), Method::POST, &url, Some(&payload)).await?;
        let info: Value = field(&body, &["connection_info"])?;
        Ok(Connection {
            driver_volume_type: field(&info, &["driver_volume_type"])?,
            data: info.get("data").cloned().unwrap_or(Value::Null),
        })
    }

    async fn terminate_connection(&self, id: &str, connector_properties: &ConnectorProperties) -> FuxiResult<()> {
        let url = self.url(&format!("/volumes/{}/action", id));
        let payload = json!({"os-terminate_connection": {"connector": connector_properties}});
        authed_request(&self.http, self.identity.as_ref(), Method::POST, &url, Some(&payload)).await?;
        Ok(())
    }

    async fn attach(&self, id: &str, host_name: &str, mountpoint: Option<&str>) -> FuxiResult<String> {
        let url = self.url(&format!("/volumes/{}/action", id));
        let payload = json!({"os-attach": {"host_name": host_name, "mountpoint": mountpoint, "mode": "rw"}});
        let body = authed_request(&self.http, self.identity.as_ref(), Method::POST, &url, Some(&payload)).await?;
        Ok(body
            .get("attachment_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    async fn detach(&self, id: &str, attachment_id: &str) -> FuxiResult<()> {
        let url = self.url(&format!("/volumes/{}/action", id));
        let payload = json!({"os-detach": {"attachment_id": attachment_id}});
        authed_request(&self.http, self.identity.as_ref(), Method::POST, &url, Some(&payload)).await?;
        Ok(())
    }

    async fn set_metadata(&self, id: &str, metadata: &BTreeMap<String, String>) -> FuxiResult<()> {
        let url = self.url(&format!("/volumes/{}/metadata", id));
        authed_request(&self.http, self.identity.as_ref(), Method::PUT, &url, Some(&json!({"metadata": metadata}))).await?;
        Ok(())
    }
}

pub struct NovaHttpClient {
    http: reqwest::Client,
    endpoint: String,
    identity: Arc<dyn IdentitySession>,
}

impl NovaHttpClient {
    pub fn new(endpoint: String, identity: Arc<dyn IdentitySession>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            identity,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl ComputeClient for NovaHttpClient {
    async fn create_server_volume(&self, server_id: &str, volume_id: &str) -> FuxiResult<String> {
        let url = self.url(&format!("/servers/{}/os-volume_attachments", server_id));
        let payload = json!({"volumeAttachment": {"volumeId": volume_id}});
        let body = authed_request(&self.http, self.identity.as_ref(), Method::POST, &url, Some(&payload)).await?;
        field(&body, &["volumeAttachment", "id"])
    }

    async fn delete_server_volume(&self, server_id: &str, volume_id: &str) -> FuxiResult<()> {
        let url = self.url(&format!("/servers/{}/os-volume_attachments/{}", server_id, volume_id));
        authed_request(&self.http, self.identity.as_ref(), Method::DELETE, &url, None).await?;
        Ok(())
    }
}

pub struct ManilaHttpClient {
    http: reqwest::Client,
    endpoint: String,
    identity: Arc<dyn IdentitySession>,
}

impl ManilaHttpClient {
    pub fn new(endpoint: String, identity: Arc<dyn IdentitySession>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            identity,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl ShareClient for ManilaHttpClient {
    async fn list_shares(&self, filter: &VolumeFilter) -> FuxiResult<Vec<LogicalVolume>> {
        let mut url = self.url("/shares/detail");
        if let Some(name) = &filter.name {
            url = format!("{}?name={}", url, name);
        }
        let body = authed_request(&self.http, self.identity.as_ref(), Method::GET, &url, None).await?;
        let shares: Vec<Value> = field(&body, &["shares"])?;
        let mut result = Vec::new();
        for s in &shares {
            let share = volume_from_json(s)?;
            if filter.metadata.iter().all(|(k, val)| share.metadata.get(k) == Some(val)) {
                result.push(share);
            }
        }
        Ok(result)
    }

    async fn get_share(&self, id: &str) -> FuxiResult<LogicalVolume> {
        let url = self.url(&format!("/shares/{}", id));
        let body = authed_request(&self.http, self.identity.as_ref(), Method::GET, &url, None).await?;
        volume_from_json(&field(&body, &["share"])?)
    }

    async fn create_share(&self, params: &CreateShareParams) -> FuxiResult<LogicalVolume> {
        let url = self.url("/shares");
        let payload = json!({"share": {
            "name": params.name,
            "share_proto": params.share_proto,
            "size": params.size_gib,
            "snapshot_id": params.snapshot_id,
            "description": params.description,
            "share_network_id": params.share_network,
            "share_type": params.share_type,
            "is_public": params.is_public,
            "availability_zone": params.availability_zone,
            "consistency_group_id": params.consistency_group_id,
            "metadata": params.metadata,
        }});
        let body = authed_request(&self.http, self.identity.as_ref(), Method::POST, &url, Some(&payload)).await?;
        volume_from_json(&field(&body, &["share"])?)
    }

    async fn delete_share(&self, id: &str) -> FuxiResult<()> {
        let url = self.url(&format!("/shares/{}", id));
        authed_request(&self.http, self.identity.as_ref(), Method::DELETE, &url, None).await?;
        Ok(())
    }

    async fn allow(&self, id: &str, access_type: &str, access_to: &str, access_level: &str) -> FuxiResult<AccessRule> {
        let url = self.url(&format!("/shares/{}/action", id));
        let payload = json!({"os-allow_access": {
            "access_type": access_type,
            "access_to": access_to,
            "access_level": access_level,
        }});
        let body = authed_request(&self.http, self.identity.as_ref(), Method::POST, &url, Some(&payload)).await?;
        let rule: Value = field(&body, &["access"])?;
        Ok(AccessRule {
            id: field(&rule, &["id"])?,
            access_type: access_type.to_string(),
            access_to: access_to.to_string(),
            access_level: access_level.to_string(),
            state: rule.get("state").and_then(Value::as_str).unwrap_or("new").to_string(),
        })
    }

    async fn deny(&self, id: &str, access_id: &str) -> FuxiResult<()> {
        let url = self.url(&format!("/shares/{}/action", id));
        let payload = json!({"os-deny_access": {"access_id": access_id}});
        authed_request(&self.http, self.identity.as_ref(), Method::POST, &url, Some(&payload)).await?;
        Ok(())
    }

    async fn access_list(&self, id: &str) -> FuxiResult<Vec<AccessRule>> {
        let url = self.url(&format!("/shares/{}/action", id));
        let body = authed_request(&self.http, self.identity.as_ref(), Method::POST, &url, Some(&json!({"os-access_list": null}))).await?;
        let rules: Vec<Value> = field(&body, &["access_list"])?;
        rules
            .iter()
            .map(|r| {
                Ok(AccessRule {
                    id: field(r, &["id"])?,
                    access_type: field(r, &["access_type"])?,
                    access_to: field(r, &["access_to"])?,
                    access_level: r.get("access_level").and_then(Value::as_str).unwrap_or("rw").to_string(),
                    state: field(r, &["state"])?,
                })
            })
            .collect()
    }

    async fn update_all_metadata(&self, id: &str, metadata: &BTreeMap<String, String>) -> FuxiResult<()> {
        let url = self.url(&format!("/shares/{}/metadata", id));
        authed_request(&self.http, self.identity.as_ref(), Method::PUT, &url, Some(&json!({"metadata": metadata}))).await?;
        Ok(())
    }
}
