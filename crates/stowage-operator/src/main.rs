//! Stowage - Kubernetes add-on operator

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use kube::Client;
use miette::Result;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use stowage_kube::crd::all_crds;
use stowage_kube::{HttpOverlayRenderer, KubeStore, ManifestController};

mod config;
mod controllers;
mod error;

use config::{OperatorConfig, RunArgs};
use error::OperatorError;

#[derive(Parser, Debug)]
#[command(name = "stowage")]
#[command(version)]
#[command(about = "Kubernetes add-on operator: charts, manifest bundles and issuers from one resource", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, env = "STOWAGE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true, env = "STOWAGE_LOG_JSON")]
    log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controllers
    Run(RunArgs),

    /// Print the custom resource definitions as YAML
    Crdgen,

    /// Wait until a manifest component reports Available
    Wait {
        /// Component name
        name: String,

        /// Component namespace
        #[arg(short, long, default_value = "default")]
        namespace: String,

        /// Seconds to wait before giving up
        #[arg(long, default_value_t = 300)]
        timeout: u64,
    },
}

fn init_logging(level: &str, json: bool) -> error::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| OperatorError::Logging {
            message: e.to_string(),
        })?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).try_init()
    };
    result.map_err(|e| OperatorError::Logging {
        message: e.to_string(),
    })
}

/// All custom resource definitions as one YAML stream
fn render_crds() -> error::Result<String> {
    let mut out = String::new();
    for crd in all_crds() {
        let yaml = serde_yaml::to_string(&crd).map_err(|e| OperatorError::CrdGen {
            message: e.to_string(),
        })?;
        out.push_str("---\n");
        out.push_str(&yaml);
    }
    Ok(out)
}

async fn client() -> error::Result<Client> {
    Client::try_default().await.map_err(OperatorError::Client)
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_panic_hook();

    let cli = Cli::parse();

    match cli.command {
        Commands::Crdgen => {
            print!("{}", render_crds()?);
            Ok(())
        }

        Commands::Run(args) => {
            init_logging(&cli.log_level, cli.log_json)?;
            let config = OperatorConfig::from(&args);
            controllers::run(client().await?, config).await?;
            Ok(())
        }

        Commands::Wait {
            name,
            namespace,
            timeout,
        } => {
            init_logging(&cli.log_level, cli.log_json)?;
            let config = OperatorConfig::default();
            let store = Arc::new(KubeStore::with_timeout(client().await?, config.operation_timeout));
            let renderer = Arc::new(HttpOverlayRenderer::new(config.operation_timeout).map_err(OperatorError::from)?);
            let manifests = ManifestController::new(store, renderer);

            let status = manifests
                .await_addon(&namespace, &name, Duration::from_secs(timeout))
                .await
                .map_err(OperatorError::from)?;
            println!("{}/{} is {}", namespace, name, status.type_);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_flags() {
        let cli = Cli::try_parse_from([
            "stowage",
            "run",
            "--namespace",
            "addons",
            "--requeue-interval",
            "30",
            "--log-json",
        ])
        .unwrap();

        assert!(cli.log_json);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        let config = OperatorConfig::from(&args);
        assert_eq!(config.namespace.as_deref(), Some("addons"));
        assert_eq!(config.requeue_interval, Duration::from_secs(30));
        assert_eq!(config.operation_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_wait_defaults() {
        let cli = Cli::try_parse_from(["stowage", "wait", "metrics"]).unwrap();
        match cli.command {
            Commands::Wait {
                name,
                namespace,
                timeout,
            } => {
                assert_eq!(name, "metrics");
                assert_eq!(namespace, "default");
                assert_eq!(timeout, 300);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_render_crds_stream() {
        let yaml = render_crds().unwrap();
        assert_eq!(yaml.matches("---\n").count(), 5);
        assert!(yaml.contains("name: addonsets.stowage.io"));
        assert!(yaml.contains("name: manifestrecords.stowage.io"));
    }
}
