use std::future::Future;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Result};
use clap::{ArgAction, Parser, ValueEnum};
use keel_cache::DedupCache;
use keel_core::{DesiredObject, OsType, OwnerRef, StaticComponent, StaticInstallation};
use keel_engine::{ComponentHandler, ReconcileError};
use keel_kubehub::KubeClusterClient;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod manifest;
mod status;

#[derive(Parser, Debug)]
#[command(name = "keelctl", version, about = "Reconcile a component's objects against the current cluster")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, default_value_t = Output::Human)]
    output: Output,

    /// Desired objects (multi-document YAML), applied in file and document order
    #[arg(short = 'f', long = "file", required = true)]
    files: Vec<PathBuf>,

    /// Objects to delete if present
    #[arg(long = "obsolete")]
    obsolete: Vec<PathBuf>,

    /// Component name used in logs
    #[arg(long = "name", default_value = "keelctl")]
    name: String,

    /// Never modify existing objects; report them as already existing
    #[arg(long = "create-only", action = ArgAction::SetTrue)]
    create_only: bool,

    /// Operating system the component's pods must run on
    #[arg(long = "os", value_enum, default_value_t = Os::Any)]
    os: Os,

    #[command(flatten)]
    owner: OwnerArgs,

    /// TLS cipher suites injected into Deployment/DaemonSet containers
    #[arg(long = "tls-cipher-suites", env = "KEEL_TLS_CIPHER_SUITES")]
    tls_cipher_suites: Option<String>,
}

#[derive(clap::Args, Debug)]
struct OwnerArgs {
    /// Owner apiVersion, e.g. "operator.keel.dev/v1"
    #[arg(long = "owner-api-version", requires_all = ["owner_kind", "owner_name", "owner_uid"])]
    owner_api_version: Option<String>,
    #[arg(long = "owner-kind")]
    owner_kind: Option<String>,
    #[arg(long = "owner-name")]
    owner_name: Option<String>,
    #[arg(long = "owner-uid")]
    owner_uid: Option<String>,
    /// Owner namespace; omit for cluster-scoped owners
    #[arg(long = "owner-namespace")]
    owner_namespace: Option<String>,
    /// Attach the owner as a non-controlling reference next to existing owners
    #[arg(long = "shared-owner", action = ArgAction::SetTrue)]
    shared_owner: bool,
}

impl OwnerArgs {
    fn owner(&self) -> Option<OwnerRef> {
        Some(OwnerRef {
            api_version: self.owner_api_version.clone()?,
            kind: self.owner_kind.clone()?,
            name: self.owner_name.clone()?,
            uid: self.owner_uid.clone()?,
            namespace: self.owner_namespace.clone().filter(|ns| !ns.is_empty()),
        })
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Os {
    Any,
    Linux,
    Windows,
}

impl From<Os> for OsType {
    fn from(os: Os) -> Self {
        match os {
            Os::Any => OsType::Any,
            Os::Linux => OsType::Linux,
            Os::Windows => OsType::Windows,
        }
    }
}

fn init_tracing() {
    let env = std::env::var("KEEL_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KEEL_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid KEEL_METRICS_ADDR; expected host:port");
        }
    }
}

/// Cancel `token` once `interrupt` fires. A failed signal listener leaves it alone.
fn cancel_on<F>(interrupt: F, token: CancellationToken) -> tokio::task::JoinHandle<()>
where
    F: Future<Output = std::io::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        match interrupt.await {
            Ok(()) => {
                warn!("interrupted, cancelling in-flight calls");
                token.cancel();
            }
            Err(e) => warn!(error = %e, "cannot listen for interrupts"),
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let desired = manifest::load_files(&cli.files)?;
    let obsolete = manifest::load_files(&cli.obsolete)?;
    let wrap = if cli.owner.shared_owner { DesiredObject::shared } else { DesiredObject::new };
    let component = StaticComponent::new(cli.name.clone())
        .with_desired(desired.into_iter().map(wrap))
        .with_obsolete(obsolete)
        .with_os(cli.os.into());
    info!(component = %cli.name, desired = component.desired.len(), obsolete = component.obsolete.len(), "loaded manifests");

    let client = KubeClusterClient::try_default().await?;
    let cancel = CancellationToken::new();
    let installation = StaticInstallation { tls_cipher_suites: cli.tls_cipher_suites.clone() };
    let mut handler = ComponentHandler::new(Arc::new(client), DedupCache::shared())
        .with_installation(Arc::new(installation))
        .with_owner(cli.owner.owner())
        .with_cancellation(cancel.clone());
    if cli.create_only {
        handler.set_create_only();
    }

    // The handler observes the token itself so an interrupted call still
    // drops its cache entry before returning.
    let interrupt = cancel_on(signal::ctrl_c(), cancel.clone());

    let status = status::LogStatus::default();
    let started = Instant::now();
    let result = handler.create_or_update_or_delete(&component, Some(&status)).await;
    interrupt.abort();
    let elapsed_ms = started.elapsed().as_millis();

    match cli.output {
        Output::Human => match &result {
            Ok(()) => println!("{}: reconciled in {} ms", cli.name, elapsed_ms),
            Err(ReconcileError::AlreadyExists { identities }) => {
                println!("{}: created missing objects; left {} existing:", cli.name, identities.len());
                for id in identities {
                    println!("  {id}");
                }
            }
            Err(e) => eprintln!("{}: {e}", cli.name),
        },
        Output::Json => {
            let report = serde_json::json!({
                "component": cli.name,
                "ok": result.is_ok(),
                "elapsedMs": elapsed_ms,
                "alreadyExists": match &result {
                    Err(ReconcileError::AlreadyExists { identities }) => identities.iter().map(ToString::to_string).collect(),
                    _ => Vec::new(),
                },
                "error": result.as_ref().err().map(ToString::to_string),
                "workloads": status.snapshot(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    result.map_err(|e| {
        error!(error = %e, "reconcile failed");
        anyhow!(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn interrupt_cancels_the_token() {
        let token = CancellationToken::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let watcher = cancel_on(async move { rx.await.map_err(std::io::Error::other) }, token.clone());
        assert!(!token.is_cancelled());
        tx.send(()).unwrap();
        watcher.await.unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn failed_listener_does_not_cancel() {
        let token = CancellationToken::new();
        cancel_on(async { Err(std::io::Error::other("no signal handler")) }, token.clone()).await.unwrap();
        assert!(!token.is_cancelled());
    }
}
