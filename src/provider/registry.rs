//! Ordered mapping from provider name to Provider instance. Built once at
//! startup and never mutated afterward — every request re-derives state
//! from the cloud and the host, so the registry itself holds no cache.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{FuxiError, FuxiResult};

use super::{Provider, VolumeInfo};

pub struct ProviderRegistry {
    providers: Vec<(String, Arc<dyn Provider>)>,
}

impl ProviderRegistry {
    pub fn new(providers: Vec<(String, Arc<dyn Provider>)>) -> FuxiResult<Self> {
        if providers.is_empty() {
            return Err(FuxiError::Other(anyhow::anyhow!(
                "no volume providers configured; volume_providers must name at least one"
            )));
        }
        Ok(Self { providers })
    }

    fn find(&self, name: &str) -> Option<&Arc<dyn Provider>> {
        self.providers.iter().find(|(n, _)| n == name).map(|(_, p)| p)
    }

    pub async fn create(&self, name: &str, opts: &BTreeMap<String, String>) -> FuxiResult<()> {
        let provider = match opts.get("volume_provider") {
            Some(requested) => self
                .find(requested)
                .ok_or_else(|| FuxiError::InvalidInput(format!("unknown volume_provider {}", requested)))?,
            None => &self.providers[0].1,
        };

        for (_, other) in &self.providers {
            if Arc::ptr_eq(other, provider) {
                continue;
            }
            if other.check_exist(name).await? {
                return Err(FuxiError::InvalidInput(
                    "The volume with the same name already exists in other volume provider backend".to_string(),
                ));
            }
        }

        provider.create(name, opts).await
    }

    /// Docker expects Remove to report success even when nothing owned the
    /// name — that is not an error from Docker's point of view.
    pub async fn remove(&self, name: &str) -> FuxiResult<()> {
        for (_, provider) in &self.providers {
            if provider.delete(name).await? {
                return Ok(());
            }
        }
        Ok(())
    }

    pub async fn mount(&self, name: &str) -> FuxiResult<PathBuf> {
        for (_, provider) in &self.providers {
            if provider.check_exist(name).await? {
                return provider.mount(name).await;
            }
        }
        Err(FuxiError::NotFound(name.to_string()))
    }

    pub async fn unmount(&self, _name: &str) -> FuxiResult<()> {
        Ok(())
    }

    pub async fn path(&self, name: &str) -> FuxiResult<VolumeInfo> {
        for (_, provider) in &self.providers {
            if let Ok(info) = provider.show(name).await {
                return Ok(info);
            }
        }
        Err(FuxiError::NotFound(name.to_string()))
    }

    pub async fn get(&self, name: &str) -> FuxiResult<VolumeInfo> {
        self.path(name).await
    }

    pub async fn list(&self) -> FuxiResult<Vec<VolumeInfo>> {
        let mut out = Vec::new();
        for (_, provider) in &self.providers {
            out.extend(provider.list().await?);
        }
        Ok(out)
    }

    pub fn capabilities(&self) -> serde_json::Value {
        serde_json::json!({"Scope": "global"})
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct StubProvider {
        name: &'static str,
        exists: Mutex<bool>,
    }

    #[async_trait]
    impl Provider for StubProvider {
        fn name(&self) -> &str {
            self.name
        }
        async fn create(&self, _name: &str, _opts: &BTreeMap<String, String>) -> FuxiResult<()> {
            *self.exists.lock().unwrap() = true;
            Ok(())
        }
        async fn delete(&self, _name: &str) -> FuxiResult<bool> {
            Ok(*self.exists.lock().unwrap())
        }
        async fn mount(&self, _name: &str) -> FuxiResult<PathBuf> {
            Ok(PathBuf::from("/fuxi/data/stub/v1"))
        }
        async fn unmount(&self, _name: &str) -> FuxiResult<()> {
            Ok(())
        }
        async fn list(&self) -> FuxiResult<Vec<VolumeInfo>> {
            Ok(Vec::new())
        }
        async fn show(&self, name: &str) -> FuxiResult<VolumeInfo> {
            if *self.exists.lock().unwrap() {
                Ok(VolumeInfo {
                    name: name.to_string(),
                    mountpoint: PathBuf::new(),
                })
            } else {
                Err(FuxiError::NotFound(name.to_string()))
            }
        }
        async fn check_exist(&self, _name: &str) -> FuxiResult<bool> {
            Ok(*self.exists.lock().unwrap())
        }
    }

    #[tokio::test]
    async fn create_refuses_cross_backend_name_collision() {
        let cinder: Arc<dyn Provider> = Arc::new(StubProvider {
            name: "cinder",
            exists: Mutex::new(false),
        });
        let manila: Arc<dyn Provider> = Arc::new(StubProvider {
            name: "manila",
            exists: Mutex::new(true),
        });
        let registry = ProviderRegistry::new(vec![("cinder".to_string(), cinder), ("manila".to_string(), manila)]).unwrap();

        let mut opts = BTreeMap::new();
        opts.insert("volume_provider".to_string(), "cinder".to_string());
        let err = registry.create("v3", &opts).await.unwrap_err();
        assert!(matches!(err, FuxiError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn remove_reports_success_when_nothing_owns_the_name() {
        let cinder: Arc<dyn Provider> = Arc::new(StubProvider {
            name: "cinder",
            exists: Mutex::new(false),
        });
        let registry = ProviderRegistry::new(vec![("cinder".to_string(), cinder)]).unwrap();
        registry.remove("ghost").await.unwrap();
    }

    #[test]
    fn empty_provider_list_is_a_fatal_startup_error() {
        assert!(ProviderRegistry::new(Vec::new()).is_err());
    }
}
