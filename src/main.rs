use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use log::LevelFilter;
use simple_logger::SimpleLogger;

use fuxi::cloud::identity::{KeystoneConfig, KeystoneSession};
use fuxi::cloud::{CinderHttpClient, IdentitySession, ManilaHttpClient, NovaHttpClient};
use fuxi::config::{self, AppConfig};
use fuxi::connector::manila::ManilaConnectorConfig;
use fuxi::connector::{Connector, ManilaConnector, NovaAttachConnector, OsBrickConnector};
use fuxi::executor::{Executor, ProcessExecutor};
use fuxi::host_id;
use fuxi::mount::Mounter;
use fuxi::provider::{CinderProvider, ManilaProvider, Provider, ProviderRegistry};
use hyperlocal::UnixServerExt;

const DEFAULT_SOCKET_PATH: &str = "/run/docker/plugins/fuxi.sock";

#[derive(Parser)]
#[command(name = "fuxid", version = env!("VERGEN_SEMVER"), about = "Docker volume plugin bridging Docker volumes to OpenStack Cinder and Manila")]
struct Cli {
    /// Configuration file (TOML/YAML/JSON); overridden by FUXI_* environment variables.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Unix socket Docker's plugin protocol is served on.
    #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,
}

fn init_logging(verbosity: u8) {
    let (global_level, module_level) = match verbosity {
        0 => (LevelFilter::Warn, LevelFilter::Info),
        1 => (LevelFilter::Warn, LevelFilter::Debug),
        2 => (LevelFilter::Info, LevelFilter::Trace),
        _ => (LevelFilter::Debug, LevelFilter::Trace),
    };
    SimpleLogger::new()
        .with_module_level("fuxi", module_level)
        .with_level(global_level)
        .init()
        .expect("logger already initialized");
}

fn prepare_volume_dir(volume_dir: &str) -> Result<PathBuf> {
    let path = PathBuf::from(volume_dir);
    std::fs::create_dir_all(&path).with_context(|| format!("failed to create volume_dir {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o700))
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }
    Ok(path)
}

fn root_helper(rootwrap_config: &Option<String>) -> Vec<String> {
    match rootwrap_config {
        Some(path) => vec!["sudo".to_string(), "fuxi-rootwrap".to_string(), path.clone()],
        None => vec!["sudo".to_string()],
    }
}

async fn build_cinder_provider(
    config: &AppConfig,
    executor: Arc<dyn Executor>,
    mounter: Arc<Mounter>,
    identity: Arc<dyn IdentitySession>,
    volume_dir: &std::path::Path,
    http: &reqwest::Client,
) -> Result<Arc<dyn Provider>> {
    let endpoint = config
        .cinder
        .endpoint
        .clone()
        .ok_or_else(|| anyhow!("cinder.endpoint must be set to use the cinder volume provider"))?;
    let block = Arc::new(CinderHttpClient::new(endpoint, identity.clone()));

    let (connector, host_id): (Arc<dyn Connector>, String) = match config.cinder.volume_connector.as_str() {
        "openstack" => {
            let nova_endpoint = config
                .cinder
                .nova_endpoint
                .clone()
                .ok_or_else(|| anyhow!("cinder.nova_endpoint must be set when volume_connector is 'openstack'"))?;
            let compute = Arc::new(NovaHttpClient::new(nova_endpoint, identity.clone()));
            let instance_id = host_id::discover_instance_uuid(http)
                .await
                .context("discovering this host's Nova instance UUID")?;
            (
                Arc::new(NovaAttachConnector::new(block.clone(), compute, executor.clone(), instance_id.clone())),
                instance_id,
            )
        }
        "osbrick" => {
            let hostname = host_id::local_hostname().context("discovering this host's hostname")?;
            let mut connector_properties = BTreeMap::new();
            connector_properties.insert("ip".to_string(), config.defaults.my_ip.clone());
            connector_properties.insert("host".to_string(), hostname.clone());
            connector_properties.insert("platform".to_string(), std::env::consts::ARCH.to_string());
            connector_properties.insert("os_type".to_string(), "linux".to_string());
            (
                Arc::new(OsBrickConnector::new(block.clone(), executor.clone(), hostname.clone(), connector_properties)),
                hostname,
            )
        }
        other => bail!("unknown cinder volume_connector '{}', expected 'openstack' or 'osbrick'", other),
    };

    Ok(Arc::new(CinderProvider::new(
        block,
        connector,
        mounter,
        volume_dir.to_path_buf(),
        config.defaults.volume_from.clone(),
        host_id,
        config.defaults.default_volume_size,
        config.cinder.fstype.clone(),
    )))
}

async fn build_manila_provider(
    config: &AppConfig,
    mounter: Arc<Mounter>,
    identity: Arc<dyn IdentitySession>,
    volume_dir: &std::path::Path,
) -> Result<Arc<dyn Provider>> {
    let endpoint = config
        .manila
        .endpoint
        .clone()
        .ok_or_else(|| anyhow!("manila.endpoint must be set to use the manila volume provider"))?;
    let share = Arc::new(ManilaHttpClient::new(endpoint, identity.clone()));

    if config.manila.volume_connector != "osbrick" {
        bail!("unknown manila volume_connector '{}', expected 'osbrick'", config.manila.volume_connector);
    }

    let mut connector_config = ManilaConnectorConfig {
        my_ip: config.defaults.my_ip.clone(),
        access_to_for_cert: config.manila.access_to_for_cert.clone(),
        ..ManilaConnectorConfig::default()
    };
    if !config.manila.proto_access_type_map.is_empty() {
        connector_config.proto_access_type_map = config.manila.proto_access_type_map.clone();
    }

    let connector: Arc<dyn Connector> = Arc::new(ManilaConnector::new(share.clone(), mounter, volume_dir.to_path_buf(), connector_config));

    Ok(Arc::new(ManilaProvider::new(
        share,
        connector,
        identity,
        config.defaults.volume_from.clone(),
        config.defaults.default_volume_size,
        config.manila.share_proto.clone(),
    )))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = config::load(cli.config.as_deref()).context("loading configuration")?;
    let volume_dir = prepare_volume_dir(&config.defaults.volume_dir)?;

    let executor: Arc<dyn Executor> = Arc::new(ProcessExecutor::new(root_helper(&config.defaults.rootwrap_config)));
    let mounter = Arc::new(Mounter::new(executor.clone()));

    let http = reqwest::Client::new();
    let keystone_config = KeystoneConfig::from(config.keystone.clone());
    let identity: Arc<dyn IdentitySession> = Arc::new(KeystoneSession::new(keystone_config)?);

    if config.defaults.volume_providers.is_empty() {
        bail!("defaults.volume_providers must list at least one of 'cinder', 'manila'");
    }

    let mut providers: Vec<(String, Arc<dyn Provider>)> = Vec::new();
    for name in &config.defaults.volume_providers {
        let provider = match name.as_str() {
            "cinder" => build_cinder_provider(&config, executor.clone(), mounter.clone(), identity.clone(), &volume_dir, &http).await?,
            "manila" => build_manila_provider(&config, mounter.clone(), identity.clone(), &volume_dir).await?,
            other => bail!("unknown volume provider '{}' in volume_providers", other),
        };
        providers.push((name.clone(), provider));
    }

    let registry = Arc::new(ProviderRegistry::new(providers)?);
    let app = fuxi::endpoint::router(registry);

    if let Some(parent) = cli.socket.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    }
    match std::fs::remove_file(&cli.socket) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).context(format!("failed to remove stale socket {}", cli.socket.display())),
    }

    log::info!("fuxid listening on {}", cli.socket.display());
    hyper::Server::bind_unix(&cli.socket)
        .with_context(|| format!("failed to bind unix socket {}", cli.socket.display()))?
        .serve(app.into_make_service())
        .await
        .context("plugin http server failed")?;

    Ok(())
}
