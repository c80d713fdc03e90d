//! NFD Operator
//!
//! Keeps the Node Feature Discovery operand (worker DaemonSet plus its
//! ServiceAccount, RBAC and configuration) present for every
//! NodeFeatureDiscovery object in the cluster.

use anyhow::{anyhow, Context};
use clap::Parser;
use kube::{Client, CustomResourceExt};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use nfd_operator::{
    controller, default_templates, InMemoryStore, KubeStore, NodeFeatureDiscovery,
    NodeFeatureDiscoverySpec, ObjectKey, OwnerScopePolicy, ReconcileMetrics, Reconciler,
    ReconcilerConfig, ResourceKind, Stage, TemplateConfig,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// NFD Operator - declarative reconciliation of the Node Feature Discovery operand
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Namespace of the operand objects
    #[arg(long, env = "OPERAND_NAMESPACE", default_value = "openshift-nfd")]
    operand_namespace: String,

    /// Name shared by the operand objects
    #[arg(long, env = "OPERAND_NAME", default_value = "nfd-worker")]
    operand_name: String,

    /// nfd-worker image
    #[arg(
        long,
        env = "OPERAND_IMAGE",
        default_value = "quay.io/openshift/origin-node-feature-discovery:latest"
    )]
    operand_image: String,

    /// nfd-worker image pull policy
    #[arg(long, env = "OPERAND_IMAGE_PULL_POLICY", default_value = "Always")]
    operand_image_pull_policy: String,

    /// Owner scope policy (permissive, strict)
    #[arg(long, env = "OWNER_SCOPE_POLICY", default_value = "permissive")]
    owner_scope_policy: OwnerScopePolicy,

    /// Manage the OpenShift SecurityContextConstraints object
    #[arg(long, env = "SECURITY_CONTEXT_CONSTRAINTS")]
    security_context_constraints: bool,

    /// Stage pipeline as STAGE=KIND[,KIND...], e.g. driver=service-account,daemon-set
    #[arg(long = "stage", env = "STAGES", value_delimiter = ';')]
    stages: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Run one pass against an in-memory store (no Kubernetes)
    #[arg(long, env = "STANDALONE")]
    standalone: bool,

    /// Name of the NodeFeatureDiscovery used in standalone mode
    #[arg(long, default_value = "nfd")]
    standalone_name: String,

    /// Print the NodeFeatureDiscovery CRD as YAML and exit
    #[arg(long)]
    print_crd: bool,
}

impl Args {
    fn template_config(&self) -> TemplateConfig {
        TemplateConfig {
            namespace: self.operand_namespace.clone(),
            name: self.operand_name.clone(),
            image: self.operand_image.clone(),
            image_pull_policy: self.operand_image_pull_policy.clone(),
            ..Default::default()
        }
    }

    fn reconciler_config(&self) -> anyhow::Result<ReconcilerConfig> {
        let mut stages = BTreeMap::new();
        for entry in &self.stages {
            let (stage, kinds) = parse_stage(entry)?;
            stages.insert(stage, kinds);
        }
        Ok(ReconcilerConfig {
            scope_policy: self.owner_scope_policy,
            security_context_constraints: self.security_context_constraints,
            stages,
        })
    }
}

fn parse_stage(entry: &str) -> anyhow::Result<(Stage, Vec<ResourceKind>)> {
    let (stage, kinds) = entry
        .split_once('=')
        .ok_or_else(|| anyhow!("Invalid stage '{}', expected STAGE=KIND[,KIND...]", entry))?;
    let stage: Stage = stage.parse()?;
    let kinds = kinds
        .split(',')
        .filter(|k| !k.trim().is_empty())
        .map(str::parse)
        .collect::<nfd_operator::Result<Vec<ResourceKind>>>()?;
    Ok((stage, kinds))
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.print_crd {
        print!("{}", serde_yaml::to_string(&NodeFeatureDiscovery::crd())?);
        return Ok(());
    }

    // Initialize logging
    init_logging(&args)?;

    info!("Starting NFD Operator");
    info!("  Version: {}", nfd_operator::VERSION);
    info!("  Operand namespace: {}", args.operand_namespace);
    info!("  Owner scope policy: {}", args.owner_scope_policy);
    info!("  SecurityContextConstraints: {}", args.security_context_constraints);
    info!("  Standalone mode: {}", args.standalone);

    let templates = default_templates(&args.template_config())?;
    let config = args.reconciler_config()?;

    if args.standalone {
        return run_standalone(&args, templates, &config).await;
    }

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let metrics = Arc::new(ReconcileMetrics::new(prometheus::default_registry())?);
    let store = Arc::new(KubeStore::new(client.clone()));
    let reconciler = Reconciler::new(store, templates, &config)?.with_metrics(metrics);

    for (stage, pipeline) in reconciler.pipelines().iter() {
        info!(%stage, steps = pipeline.steps().len(), "Pipeline registered");
    }

    // Start health server
    let health_addr = args.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr).await {
            error!("Metrics server error: {}", e);
        }
    });

    controller::run(client, Arc::new(reconciler)).await?;

    info!("Operator shutdown complete");
    Ok(())
}

// =============================================================================
// Standalone Mode
// =============================================================================

async fn run_standalone(
    args: &Args,
    templates: nfd_operator::ResourceTemplates,
    config: &ReconcilerConfig,
) -> anyhow::Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let mut spec = NodeFeatureDiscovery::new(&args.standalone_name, NodeFeatureDiscoverySpec::default());
    spec.metadata.namespace = Some(args.operand_namespace.clone());
    store.insert_spec(spec);

    let reconciler = Reconciler::new(store.clone(), templates, config)?;
    let key = ObjectKey::namespaced(&args.operand_namespace, &args.standalone_name);
    let report = reconciler
        .reconcile_key(store.as_ref(), &key)
        .await?
        .ok_or_else(|| anyhow!("NodeFeatureDiscovery {} vanished", key))?;

    info!(created = ?report.created, found = ?report.found, "Standalone pass complete");
    for object in store.objects() {
        info!(kind = %object.kind(), key = %object.key(), "Managed object");
    }
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("kube=info".parse()?)
        .add_directive("tower=warn".parse()?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}

// =============================================================================
// Health & Metrics Servers
// =============================================================================

fn text_response(status: hyper::StatusCode, body: impl Into<hyper::Body>) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(body.into());
    *response.status_mut() = status;
    response
}

async fn run_health_server(addr: &str) -> anyhow::Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/healthz" | "/livez" | "/readyz" => text_response(StatusCode::OK, "ok"),
                _ => text_response(StatusCode::NOT_FOUND, "not found"),
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("Invalid health server address: {}", addr))?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr).serve(make_svc).await?;
    Ok(())
}

async fn run_metrics_server(addr: &str) -> anyhow::Result<()> {
    use hyper::header::CONTENT_TYPE;
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/metrics" => {
                    let encoder = TextEncoder::new();
                    let mut buffer = Vec::new();
                    match encoder.encode(&prometheus::gather(), &mut buffer) {
                        Ok(()) => {
                            let mut response = text_response(StatusCode::OK, buffer);
                            if let Ok(value) = encoder.format_type().parse() {
                                response.headers_mut().insert(CONTENT_TYPE, value);
                            }
                            response
                        }
                        Err(e) => text_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
                    }
                }
                _ => text_response(StatusCode::NOT_FOUND, "not found"),
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("Invalid metrics server address: {}", addr))?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr).serve(make_svc).await?;
    Ok(())
}
