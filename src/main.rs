use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use cluster_probe::clusterstatus::{HttpApiServerStatus, HttpEtcdStatus, KubeNodeLister};
use cluster_probe::config::ClusterConfig;
use cluster_probe::exec::SshConnector;
use cluster_probe::investigate::{InvestigationReport, Investigator, Reconciler};
use cluster_probe::Error;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Probe the control plane and print what was found
    Investigate(InvestigateArgs),
    /// Show version information
    Version,
}

#[derive(Parser, Debug)]
struct InvestigateArgs {
    /// Cluster manifest describing the desired control plane
    #[arg(long, env = "CLUSTER_MANIFEST")]
    manifest: PathBuf,

    /// Kubeconfig used to list node objects (default client config if unset)
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Report format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    /// Log format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// SSH connect timeout in seconds
    #[arg(long, env = "SSH_CONNECT_TIMEOUT", default_value_t = 10)]
    ssh_connect_timeout: u64,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum OutputFormat {
    /// Human readable summary
    #[default]
    Text,
    Json,
    Yaml,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("cluster-probe v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Investigate(investigate_args) => run_investigation(investigate_args).await,
    }
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

async fn run_investigation(args: InvestigateArgs) -> Result<(), Error> {
    init_tracing(args.log_format);

    info!("Starting cluster-probe v{}", env!("CARGO_PKG_VERSION"));

    let mut cluster = ClusterConfig::from_file(&args.manifest)?;
    info!(
        "Loaded manifest for cluster {} with {} control-plane hosts",
        cluster.name,
        cluster.control_plane.hosts.len()
    );

    let connector = SshConnector::new(Duration::from_secs(args.ssh_connect_timeout));
    let reconciler = Reconciler::new(
        Arc::new(HttpApiServerStatus::new(&cluster.api_server)?),
        Arc::new(HttpEtcdStatus::new(&cluster)?),
        Arc::new(KubeNodeLister::new(args.kubeconfig)),
    );
    let investigator = Investigator::new(Arc::new(connector), reconciler);

    let report = match investigator.investigate(&mut cluster).await {
        Ok(report) => report,
        Err(e) => {
            error!("Investigation of {} failed: {}", cluster.name, e);
            return Err(e);
        }
    };

    report.log();
    print_report(&report, args.output)
}

fn print_report(report: &InvestigationReport, format: OutputFormat) -> Result<(), Error> {
    match format {
        OutputFormat::Text => print!("{report}"),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(report)?),
    }
    Ok(())
}
