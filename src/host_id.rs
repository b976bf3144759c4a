//! Discovers the identifier Cinder/Nova attachments will carry for this
//! host: the instance UUID when using Nova-attach, the lowercased hostname
//! when using os-brick. Nova-attach mode tries an ordered list of
//! strategies and takes the first well-formed UUID.

use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;

use crate::error::{FuxiError, FuxiResult};

const CLOUD_INIT_INSTANCES_DIR: &str = "/var/lib/cloud/instances";
const METADATA_SERVICE_HOST: &str = "169.254.169.254";
/// Tried newest-first; the metadata service 404s on versions it doesn't
/// support rather than redirecting.
const METADATA_API_VERSIONS: &[&str] = &["2018-08-27", "2017-02-22", "2016-10-06", "2015-10-15", "latest"];

lazy_static::lazy_static! {
    static ref UUID_RE: Regex = Regex::new(
        r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$"
    ).expect("static uuid regex is valid");
}

/// Instance UUID for Nova-attach mode, discovered from cloud-init's local
/// directory first and falling back to the metadata service.
pub async fn discover_instance_uuid(http: &reqwest::Client) -> FuxiResult<String> {
    if let Some(uuid) = from_cloud_init_dir(Path::new(CLOUD_INIT_INSTANCES_DIR))? {
        return Ok(uuid);
    }
    if let Some(uuid) = from_metadata_service(http).await? {
        return Ok(uuid);
    }
    Err(FuxiError::Other(anyhow::anyhow!(
        "could not determine this host's instance UUID from cloud-init or the metadata service"
    )))
}

fn from_cloud_init_dir(dir: &Path) -> FuxiResult<Option<String>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        if UUID_RE.is_match(&name) {
            return Ok(Some(name.into_owned()));
        }
    }
    Ok(None)
}

async fn from_metadata_service(http: &reqwest::Client) -> FuxiResult<Option<String>> {
    for version in METADATA_API_VERSIONS {
        let url = format!("http://{}/openstack/{}/meta_data.json", METADATA_SERVICE_HOST, version);
        let response = http
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await;
        let response = match response {
            Ok(r) if r.status().is_success() => r,
            _ => continue,
        };
        let body: serde_json::Value = match response.json().await {
            Ok(b) => b,
            Err(_) => continue,
        };
        if let Some(uuid) = body.get("uuid").and_then(serde_json::Value::as_str) {
            if UUID_RE.is_match(uuid) {
                return Ok(Some(uuid.to_string()));
            }
        }
    }
    Ok(None)
}

/// Lowercased hostname for os-brick mode.
pub fn local_hostname() -> FuxiResult<String> {
    let hostname = hostname::get()
        .map_err(|e| anyhow::anyhow!("failed to read local hostname: {}", e))?
        .to_string_lossy()
        .to_lowercase();
    Ok(hostname)
}

#[allow(dead_code)]
fn cloud_init_instance_path(uuid: &str) -> PathBuf {
    Path::new(CLOUD_INIT_INSTANCES_DIR).join(uuid)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;

    #[test]
    fn finds_uuid_directory_entry() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("not-a-uuid")).unwrap();
        fs::create_dir(dir.path().join("9b1deb4d-3b7d-4bad-9bdd-2b0d7b3dcb6d")).unwrap();
        let uuid = from_cloud_init_dir(dir.path()).unwrap();
        assert_eq!(uuid.as_deref(), Some("9b1deb4d-3b7d-4bad-9bdd-2b0d7b3dcb6d"));
    }

    #[test]
    fn missing_cloud_init_dir_is_not_an_error() {
        assert!(from_cloud_init_dir(Path::new("/no/such/dir")).unwrap().is_none());
    }
}
