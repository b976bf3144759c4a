//! Layered configuration: a config file (TOML/YAML/JSON, whatever
//! extension is given), overridden by `FUXI_*` environment variables,
//! following the `Defaults`/`Cinder`/`Manila`/`Keystone` grouping.

use std::path::Path;

use serde::Deserialize;

use crate::cloud::identity::KeystoneConfig;
use crate::constants::{DEFAULT_FSTYPE, DEFAULT_FUXI_PORT, DEFAULT_SHARE_PROTO, DEFAULT_VOLUME_DIR, DEFAULT_VOLUME_FROM, DEFAULT_VOLUME_SIZE_GIB};
use crate::error::FuxiResult;

fn default_fuxi_port() -> u16 {
    DEFAULT_FUXI_PORT
}
fn default_volume_dir() -> String {
    DEFAULT_VOLUME_DIR.to_string()
}
fn default_volume_from() -> String {
    DEFAULT_VOLUME_FROM.to_string()
}
fn default_volume_size() -> u64 {
    DEFAULT_VOLUME_SIZE_GIB
}
fn default_true() -> bool {
    true
}
fn default_fstype() -> String {
    DEFAULT_FSTYPE.to_string()
}
fn default_share_proto() -> String {
    DEFAULT_SHARE_PROTO.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default)]
    pub my_ip: String,
    #[serde(default = "default_fuxi_port")]
    pub fuxi_port: u16,
    #[serde(default = "default_volume_dir")]
    pub volume_dir: String,
    #[serde(default)]
    pub volume_providers: Vec<String>,
    #[serde(default = "default_volume_from")]
    pub volume_from: String,
    #[serde(default = "default_volume_size")]
    pub default_volume_size: u64,
    #[serde(default = "default_true")]
    pub threaded: bool,
    #[serde(default)]
    pub rootwrap_config: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CinderConfig {
    #[serde(default)]
    pub region_name: Option<String>,
    #[serde(default = "default_connector_openstack")]
    pub volume_connector: String,
    #[serde(default)]
    pub availability_zone: Option<String>,
    #[serde(default)]
    pub volume_type: Option<String>,
    #[serde(default = "default_fstype")]
    pub fstype: String,
    #[serde(default)]
    pub multiattach: bool,
    /// Cinder API endpoint. Required unless resolved from the Keystone
    /// service catalog (not implemented; out of core scope).
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Nova API endpoint, needed only by the `openstack` (nova-attach) volume_connector.
    #[serde(default)]
    pub nova_endpoint: Option<String>,
}

fn default_connector_openstack() -> String {
    "openstack".to_string()
}
fn default_connector_osbrick() -> String {
    "osbrick".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManilaConfig {
    #[serde(default)]
    pub region_name: Option<String>,
    #[serde(default = "default_connector_osbrick")]
    pub volume_connector: String,
    #[serde(default = "default_share_proto")]
    pub share_proto: String,
    #[serde(default)]
    pub proto_access_type_map: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    pub availability_zone: Option<String>,
    #[serde(default)]
    pub access_to_for_cert: Option<String>,
    /// Manila API endpoint. Required unless resolved from the Keystone
    /// service catalog (not implemented; out of core scope).
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeystoneSettings {
    pub auth_url: String,
    #[serde(default)]
    pub admin_user: String,
    #[serde(default)]
    pub admin_password: String,
    #[serde(default)]
    pub admin_tenant_name: String,
    #[serde(default)]
    pub admin_token: Option<String>,
    #[serde(default)]
    pub auth_ca_cert: Option<String>,
    #[serde(default)]
    pub auth_insecure: bool,
    #[serde(default)]
    pub region: Option<String>,
}

impl From<KeystoneSettings> for KeystoneConfig {
    fn from(s: KeystoneSettings) -> Self {
        KeystoneConfig {
            auth_url: s.auth_url,
            admin_user: s.admin_user,
            admin_password: s.admin_password,
            admin_tenant_name: s.admin_tenant_name,
            admin_token: s.admin_token,
            auth_ca_cert: s.auth_ca_cert,
            auth_insecure: s.auth_insecure,
            region: s.region,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub cinder: CinderConfig,
    #[serde(default)]
    pub manila: ManilaConfig,
    pub keystone: KeystoneSettings,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            my_ip: String::new(),
            fuxi_port: DEFAULT_FUXI_PORT,
            volume_dir: DEFAULT_VOLUME_DIR.to_string(),
            volume_providers: Vec::new(),
            volume_from: DEFAULT_VOLUME_FROM.to_string(),
            default_volume_size: DEFAULT_VOLUME_SIZE_GIB,
            threaded: true,
            rootwrap_config: None,
        }
    }
}

impl Default for CinderConfig {
    fn default() -> Self {
        Self {
            region_name: None,
            volume_connector: default_connector_openstack(),
            availability_zone: None,
            volume_type: None,
            fstype: DEFAULT_FSTYPE.to_string(),
            multiattach: false,
            endpoint: None,
            nova_endpoint: None,
        }
    }
}

impl Default for ManilaConfig {
    fn default() -> Self {
        Self {
            region_name: None,
            volume_connector: default_connector_osbrick(),
            share_proto: DEFAULT_SHARE_PROTO.to_string(),
            proto_access_type_map: std::collections::BTreeMap::new(),
            availability_zone: None,
            access_to_for_cert: None,
            endpoint: None,
        }
    }
}

/// Loads `path` (if it exists) layered under `FUXI_`-prefixed environment
/// variables, e.g. `FUXI_DEFAULTS__FUXI_PORT=8000`.
pub fn load(path: Option<&Path>) -> FuxiResult<AppConfig> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path).required(false));
    }
    builder = builder.add_source(
        config::Environment::with_prefix("FUXI")
            .separator("__")
            .try_parsing(true),
    );
    let raw = builder
        .build()
        .map_err(|e| anyhow::anyhow!("failed to load configuration: {}", e))?;
    raw.try_deserialize()
        .map_err(|e| anyhow::anyhow!("failed to parse configuration: {}", e).into())
}
