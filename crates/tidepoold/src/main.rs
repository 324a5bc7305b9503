//! tidepoold: the Tidepool manage server.
//!
//! Prepares the metadata store for the configured db type, then serves the
//! manage HTTP API, over mutual TLS when enabled.
//!
//! # Usage
//!
//! ```text
//! tidepoold --cluster c1 --region us-east-1 \
//!     --availability-zones us-east-1a,us-east-1b,us-east-1c \
//!     --dbtype controldb --data-dir /var/lib/tidepool
//! ```

mod bootstrap;
mod tls;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tidepool_core::{
    DEFAULT_MANAGE_PORT, DbType, ManageConfig, PlatformKind, TlsFiles, WaitConfig,
    config::parse_zones,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,tidepoold=debug,tidepool=debug";

#[derive(Parser, Debug)]
#[command(name = "tidepoold", about = "Tidepool manage server")]
struct Cli {
    /// TOML config file. Flags override its values.
    #[arg(long, env = "TIDEPOOL_CONFIG")]
    config: Option<PathBuf>,

    /// The container platform: ecs, swarm or k8s.
    #[arg(long = "container-platform", env = "CONTAINER_PLATFORM")]
    platform: Option<PlatformKind>,

    /// The metadata db type: clouddb, controldb or k8sdb.
    #[arg(long, env = "TIDEPOOL_DB_TYPE")]
    dbtype: Option<DbType>,

    /// Comma separated availability zones, e.g. us-east-1a,us-east-1b.
    #[arg(long = "availability-zones", env = "TIDEPOOL_AVAILABILITY_ZONES")]
    availability_zones: Option<String>,

    /// DNS name of the manage server.
    #[arg(long)]
    dnsname: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    #[arg(long, env = "CLUSTER")]
    cluster: Option<String>,

    #[arg(long, env = "REGION")]
    region: Option<String>,

    /// Directory holding the metadata database.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Serve over mutual TLS.
    #[arg(long)]
    tlsverify: bool,

    #[arg(long)]
    tlscacert: Option<PathBuf>,

    #[arg(long)]
    tlscert: Option<PathBuf>,

    #[arg(long)]
    tlskey: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, env = "TIDEPOOL_LOG_JSON")]
    log_json: bool,
}

impl Cli {
    /// Build the validated config, layering flags over the config file.
    fn into_config(self) -> anyhow::Result<ManageConfig> {
        let mut config = match &self.config {
            Some(path) => ManageConfig::from_file(path)?,
            None => ManageConfig {
                platform: PlatformKind::Ecs,
                db_type: DbType::CloudDb,
                cluster: String::new(),
                region: String::new(),
                availability_zones: Vec::new(),
                dns_name: None,
                port: DEFAULT_MANAGE_PORT,
                data_dir: PathBuf::from("/var/lib/tidepool"),
                tls: None,
                wait: WaitConfig::default(),
            },
        };

        if let Some(platform) = self.platform {
            config.platform = platform;
        }
        if let Some(db_type) = self.dbtype {
            config.db_type = db_type;
        }
        if let Some(zones) = &self.availability_zones {
            config.availability_zones = parse_zones(zones);
        }
        if self.dnsname.is_some() {
            config.dns_name = self.dnsname;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(cluster) = self.cluster {
            config.cluster = cluster;
        }
        if let Some(region) = self.region {
            config.region = region;
        }
        if let Some(data_dir) = self.data_dir {
            config.data_dir = data_dir;
        }
        if let Some(tls) = TlsFiles::from_flags(self.tlsverify, self.tlscacert, self.tlscert, self.tlskey)? {
            config.tls = Some(tls);
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = cli.into_config().context("invalid manage server configuration")?;
    run(config).await
}

async fn run(config: ManageConfig) -> anyhow::Result<()> {
    info!(
        platform = %config.platform,
        db_type = %config.db_type,
        cluster = %config.cluster,
        zones = ?config.availability_zones,
        "tidepool manage server starting"
    );

    // TLS material is checked before bootstrap creates anything.
    let tls_config = match &config.tls {
        Some(files) => Some(tls::load_server_config(files)?),
        None => None,
    };

    let lifecycle = bootstrap::bootstrap(&config).await?;
    let router = tidepool_api::build_router(lifecycle);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, tls = tls_config.is_some(), url = %config.manage_url(), "manage API listening");

    match tls_config {
        Some(tls_config) => tls::serve(listener, router, tls_config, shutdown_signal()).await?,
        None => {
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?
        }
    }

    info!("tidepool manage server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        return;
    }
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["tidepoold"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn flags_build_a_config() {
        let config = parse(&[
            "--container-platform",
            "swarm",
            "--dbtype",
            "controldb",
            "--availability-zones",
            "us-east-1a,us-east-1b",
            "--cluster",
            "c1",
            "--region",
            "us-east-1",
            "--port",
            "28000",
        ])
        .into_config()
        .unwrap();
        assert_eq!(config.platform, PlatformKind::Swarm);
        assert_eq!(config.db_type, DbType::ControlDb);
        assert_eq!(config.availability_zones, vec!["us-east-1a", "us-east-1b"]);
        assert_eq!(
            config.manage_url(),
            "http://tidepool-manageserver.c1-tidepool.com:28000/"
        );
    }

    #[test]
    fn zones_are_required() {
        let err = parse(&["--cluster", "c1", "--region", "us-east-1"])
            .into_config()
            .unwrap_err();
        assert!(err.to_string().contains("availability zones"));
    }

    #[test]
    fn unknown_platform_is_rejected() {
        assert!(Cli::try_parse_from(["tidepoold", "--container-platform", "nomad"]).is_err());
    }

    #[test]
    fn tls_flag_needs_all_files() {
        let err = parse(&[
            "--cluster",
            "c1",
            "--region",
            "us-east-1",
            "--availability-zones",
            "us-east-1a",
            "--tlsverify",
            "--tlscert",
            "cert.pem",
        ])
        .into_config()
        .unwrap_err();
        assert!(err.to_string().contains("tls"));
    }

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manage.toml");
        std::fs::write(
            &path,
            r#"
platform = "k8s"
db_type = "k8sdb"
cluster = "c1"
region = "us-east-1"
availability_zones = ["us-east-1a"]
"#,
        )
        .unwrap();
        let config = parse(&[
            "--config",
            path.to_str().unwrap(),
            "--cluster",
            "c2",
            "--dnsname",
            "manage.internal",
        ])
        .into_config()
        .unwrap();
        assert_eq!(config.platform, PlatformKind::K8s);
        assert_eq!(config.cluster, "c2");
        assert_eq!(config.manage_url(), "http://manage.internal:27040/");
    }
}
