//! Translates Docker's volume plugin HTTP verbs into [`ProviderRegistry`]
//! calls. Out of core scope per the design brief: this is a thin JSON
//! request/response envelope, not where the interesting logic lives.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderValue, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::FuxiResult;
use crate::provider::ProviderRegistry;

const PLUGIN_CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1+json; charset=utf-8";

struct AppState {
    registry: Arc<ProviderRegistry>,
}

#[derive(Deserialize)]
struct NameRequest {
    #[serde(rename = "Name")]
    name: String,
}

#[derive(Deserialize, Default)]
struct CreateRequest {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Opts", default)]
    opts: BTreeMap<String, String>,
}

#[derive(Serialize, Default)]
struct ErrResponse {
    #[serde(rename = "Err")]
    err: String,
}

#[derive(Serialize, Default)]
struct MountResponse {
    #[serde(rename = "Mountpoint")]
    mountpoint: String,
    #[serde(rename = "Err")]
    err: String,
}

#[derive(Serialize)]
struct VolumeEntry {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Mountpoint")]
    mountpoint: String,
}

#[derive(Serialize)]
struct GetResponse {
    #[serde(rename = "Volume")]
    volume: Option<VolumeEntry>,
    #[serde(rename = "Err")]
    err: String,
}

#[derive(Serialize)]
struct ListResponse {
    #[serde(rename = "Volumes")]
    volumes: Vec<VolumeEntry>,
    #[serde(rename = "Err")]
    err: String,
}

#[derive(Serialize)]
struct ActivateResponse {
    #[serde(rename = "Implements")]
    implements: Vec<String>,
}

#[derive(Serialize)]
struct CapabilitiesResponse {
    #[serde(rename = "Capabilities")]
    capabilities: serde_json::Value,
}

fn err_string<T>(result: FuxiResult<T>) -> String {
    match result {
        Ok(_) => String::new(),
        Err(e) => {
            log::error!("{}", e);
            e.to_string()
        }
    }
}

async fn activate() -> Json<ActivateResponse> {
    Json(ActivateResponse {
        implements: vec!["VolumeDriver".to_string()],
    })
}

async fn create(State(state): State<Arc<AppState>>, Json(req): Json<CreateRequest>) -> Json<ErrResponse> {
    let result = state.registry.create(&req.name, &req.opts).await;
    Json(ErrResponse { err: err_string(result) })
}

async fn remove(State(state): State<Arc<AppState>>, Json(req): Json<NameRequest>) -> Json<ErrResponse> {
    let result = state.registry.remove(&req.name).await;
    Json(ErrResponse { err: err_string(result) })
}

async fn mount(State(state): State<Arc<AppState>>, Json(req): Json<NameRequest>) -> Json<MountResponse> {
    match state.registry.mount(&req.name).await {
        Ok(path) => Json(MountResponse {
            mountpoint: path.to_string_lossy().into_owned(),
            err: String::new(),
        }),
        Err(e) => Json(MountResponse {
            mountpoint: String::new(),
            err: e.to_string(),
        }),
    }
}

async fn unmount(State(state): State<Arc<AppState>>, Json(req): Json<NameRequest>) -> Json<ErrResponse> {
    let result = state.registry.unmount(&req.name).await;
    Json(ErrResponse { err: err_string(result) })
}

async fn path(State(state): State<Arc<AppState>>, Json(req): Json<NameRequest>) -> Json<MountResponse> {
    match state.registry.path(&req.name).await {
        Ok(info) => Json(MountResponse {
            mountpoint: info.mountpoint.to_string_lossy().into_owned(),
            err: String::new(),
        }),
        Err(e) => Json(MountResponse {
            mountpoint: String::new(),
            err: e.to_string(),
        }),
    }
}

async fn get(State(state): State<Arc<AppState>>, Json(req): Json<NameRequest>) -> Json<GetResponse> {
    match state.registry.get(&req.name).await {
        Ok(info) => Json(GetResponse {
            volume: Some(VolumeEntry {
                name: info.name,
                mountpoint: info.mountpoint.to_string_lossy().into_owned(),
            }),
            err: String::new(),
        }),
        Err(e) => Json(GetResponse {
            volume: None,
            err: e.to_string(),
        }),
    }
}

async fn list(State(state): State<Arc<AppState>>) -> Json<ListResponse> {
    match state.registry.list().await {
        Ok(infos) => Json(ListResponse {
            volumes: infos
                .into_iter()
                .map(|i| VolumeEntry {
                    name: i.name,
                    mountpoint: i.mountpoint.to_string_lossy().into_owned(),
                })
                .collect(),
            err: String::new(),
        }),
        Err(e) => Json(ListResponse {
            volumes: Vec::new(),
            err: e.to_string(),
        }),
    }
}

async fn capabilities(State(state): State<Arc<AppState>>) -> Json<CapabilitiesResponse> {
    Json(CapabilitiesResponse {
        capabilities: state.registry.capabilities(),
    })
}

async fn set_plugin_content_type(request: Request<Body>, next: Next<Body>) -> Response {
    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(PLUGIN_CONTENT_TYPE));
    response
}

pub fn router(registry: Arc<ProviderRegistry>) -> Router {
    let state = Arc::new(AppState { registry });
    Router::new()
        .route("/Plugin.Activate", post(activate))
        .route("/VolumeDriver.Create", post(create))
        .route("/VolumeDriver.Remove", post(remove))
        .route("/VolumeDriver.Mount", post(mount))
        .route("/VolumeDriver.Unmount", post(unmount))
        .route("/VolumeDriver.Path", post(path))
        .route("/VolumeDriver.Get", post(get))
        .route("/VolumeDriver.List", post(list))
        .route("/VolumeDriver.Capabilities", post(capabilities))
        .layer(middleware::from_fn(set_plugin_content_type))
        .with_state(state)
}
