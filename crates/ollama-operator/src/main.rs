//! Ollama Operator - runs Ollama models and answers prompts against them

use std::io::Read;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use kube::Client;

use ollama_client::HttpClientProvider;
use ollama_common::leader_election::{LeaderElector, LEADER_LEASE_NAME};
use ollama_common::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig};
use ollama_common::OPERATOR_NAMESPACE;
use ollama_operator::controller_runner::{build_controllers, RunnerConfig};
use ollama_operator::health::{self, HealthState};
use ollama_operator::{render, startup};

/// Ollama operator - declarative Ollama models and prompts for Kubernetes
#[derive(Parser, Debug)]
#[command(name = "ollama-operator", version, about, long_about = None)]
struct Cli {
    /// Print the CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    controller: ControllerArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the Model and Prompt controllers (default mode)
    Controller,

    /// Print the StatefulSet and Service rendered for a Model manifest
    Render {
        /// Model manifest (YAML or JSON), `-` for stdin
        file: String,
    },
}

#[derive(Args, Debug, Clone)]
struct ControllerArgs {
    /// Only watch this namespace
    #[arg(long, global = true, env = "OLLAMA_OPERATOR_NAMESPACE")]
    namespace: Option<String>,

    /// Acquire a Lease before starting the controllers
    #[arg(long, global = true, env = "OLLAMA_OPERATOR_LEADER_ELECT")]
    leader_elect: bool,

    /// Namespace of the leader election Lease (defaults to POD_NAMESPACE)
    #[arg(long, global = true, env = "OLLAMA_OPERATOR_LEADER_ELECTION_NAMESPACE")]
    leader_election_namespace: Option<String>,

    /// Port serving /healthz and /readyz
    #[arg(long, global = true, env = "OLLAMA_OPERATOR_HEALTH_PORT", default_value_t = 8081)]
    health_port: u16,

    /// Reconciles run in parallel per controller
    #[arg(long, global = true, env = "OLLAMA_OPERATOR_CONCURRENCY", default_value_t = 10)]
    concurrency: u16,

    /// Install or update the CRDs on startup
    #[arg(long, global = true, env = "OLLAMA_OPERATOR_INSTALL_CRDS")]
    install_crds: bool,

    /// OTLP gRPC endpoint (falls back to OTEL_EXPORTER_OTLP_ENDPOINT)
    #[arg(long, global = true, env = "OLLAMA_OPERATOR_TRACING_ENDPOINT")]
    tracing_endpoint: Option<String>,

    /// Fraction of traces sampled
    #[arg(long, global = true, env = "OLLAMA_OPERATOR_TRACING_SAMPLING_RATE", default_value_t = 1.0)]
    tracing_sampling_rate: f64,
}

impl ControllerArgs {
    fn lease_namespace(&self) -> String {
        self.leader_election_namespace
            .clone()
            .or_else(|| std::env::var("POD_NAMESPACE").ok())
            .unwrap_or_else(|| OPERATOR_NAMESPACE.to_string())
    }

    fn telemetry(&self) -> TelemetryConfig {
        let defaults = TelemetryConfig::default();
        TelemetryConfig {
            otlp_endpoint: self.tracing_endpoint.clone().or(defaults.otlp_endpoint),
            sampling_ratio: self.tracing_sampling_rate,
            ..defaults
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        print!("{}", startup::crds_yaml().context("Failed to serialize CRDs")?);
        return Ok(());
    }

    match cli.command {
        Some(Commands::Render { file }) => {
            let input = read_input(&file)?;
            print!("{}", render::render_manifests(&input)?);
            Ok(())
        }
        Some(Commands::Controller) | None => {
            init_telemetry(cli.controller.telemetry())?;
            let result = run_controller(cli.controller).await;
            shutdown_telemetry();
            result
        }
    }
}

fn read_input(file: &str) -> anyhow::Result<String> {
    if file == "-" {
        let mut input = String::new();
        std::io::stdin()
            .read_to_string(&mut input)
            .context("failed to read Model from stdin")?;
        return Ok(input);
    }
    std::fs::read_to_string(file).with_context(|| format!("failed to read {file}"))
}

fn identity() -> String {
    std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("ollama-operator-{}", std::process::id()))
}

async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    if args.install_crds {
        startup::install_crds(&client).await?;
    }

    let health_state = HealthState::default();
    tokio::spawn(health::serve(args.health_port, health_state.clone()));

    let mut leadership = if args.leader_elect {
        let elector = Arc::new(LeaderElector::new(
            client.clone(),
            LEADER_LEASE_NAME,
            &args.lease_namespace(),
            &identity(),
        ));
        Some(elector.acquire().await)
    } else {
        None
    };

    let config = RunnerConfig {
        namespace: args.namespace.clone(),
        concurrency: args.concurrency,
    };
    tracing::info!("Starting Ollama operator controllers...");
    let controllers = build_controllers(client, Arc::new(HttpClientProvider::default()), &config);
    health_state.mark_ready();

    let run_all = futures::future::join_all(controllers);
    match leadership.as_mut() {
        Some(guard) => {
            tokio::select! {
                _ = run_all => {
                    tracing::info!("Controllers stopped");
                }
                _ = guard.lost() => {
                    anyhow::bail!("Lost leadership, exiting");
                }
            }
        }
        None => {
            run_all.await;
            tracing::info!("Controllers stopped");
        }
    }

    if let Some(guard) = leadership {
        if let Err(e) = guard.release().await {
            tracing::warn!(error = %e, "Failed to release leader lease");
        }
    }

    tracing::info!("Ollama operator shutting down");
    Ok(())
}
