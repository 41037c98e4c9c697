use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use kata_operator::controller::{
    self,
    config::{DEFAULT_DAEMON_IMAGE, DEFAULT_KATA_PAYLOAD_IMAGE, DEFAULT_OPERATOR_NAMESPACE},
    ControllerConfig, ControllerState,
};
use kata_operator::crd::KataConfig;
use kata_operator::Error;
use kube::CustomResourceExt;
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
    /// Run the operator
    Run(RunArgs),
    /// Print the KataConfig CustomResourceDefinition as YAML
    Crd,
    /// Show version and build information
    Version,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Namespace the install/uninstall daemons run in
    #[arg(long, env = "OPERATOR_NAMESPACE", default_value = DEFAULT_OPERATOR_NAMESPACE)]
    namespace: String,

    /// Image of the on-node install/uninstall daemon
    #[arg(long, env = "KATA_DAEMON_IMAGE", default_value = DEFAULT_DAEMON_IMAGE)]
    daemon_image: String,

    /// Kata payload image recorded in the KataConfig status
    #[arg(long, env = "KATA_PAYLOAD_IMAGE", default_value = DEFAULT_KATA_PAYLOAD_IMAGE)]
    payload_image: String,

    /// Seconds to wait after creating the kata-oc MachineConfigPool
    #[arg(long, env = "POOL_CREATED_REQUEUE_SECS", default_value_t = 20)]
    pool_created_requeue_secs: u64,

    /// Seconds between polls while waiting on pools or pending nodes
    #[arg(long, env = "WAIT_REQUEUE_SECS", default_value_t = 15)]
    wait_requeue_secs: u64,

    /// Seconds to pause after removing machine configuration before reading
    /// pool counters
    #[arg(long, env = "POOL_SETTLE_DELAY_SECS", default_value_t = 60)]
    pool_settle_delay_secs: u64,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Address for the health, metrics and status API
    #[arg(long, env = "HTTP_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    listen_addr: SocketAddr,

    /// Do not start the HTTP API
    #[arg(long, env = "DISABLE_HTTP")]
    disable_http: bool,
}

impl RunArgs {
    fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            operator_namespace: self.namespace.clone(),
            daemon_image: self.daemon_image.clone(),
            payload_image: self.payload_image.clone(),
            pool_created_requeue: Duration::from_secs(self.pool_created_requeue_secs),
            wait_requeue: Duration::from_secs(self.wait_requeue_secs),
            pool_settle_delay: Duration::from_secs(self.pool_settle_delay_secs),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("Kata Operator v{}", env!("CARGO_PKG_VERSION"));
            println!("Build Date: {}", env!("BUILD_DATE"));
            println!("Git SHA: {}", env!("GIT_SHA"));
            Ok(())
        }
        Commands::Crd => {
            let yaml = serde_yaml::to_string(&KataConfig::crd())
                .map_err(|e| Error::ConfigError(format!("Failed to render CRD: {e}")))?;
            print!("{yaml}");
            Ok(())
        }
        Commands::Run(run_args) => run_operator(run_args).await,
    }
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Text => registry.with(fmt::layer().with_target(true)).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

async fn run_operator(args: RunArgs) -> Result<(), Error> {
    init_tracing(args.log_format);

    info!("Starting Kata Operator v{}", env!("CARGO_PKG_VERSION"));

    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    info!("Connected to Kubernetes cluster");

    let config = args.controller_config();
    info!(
        namespace = %config.operator_namespace,
        daemon_image = %config.daemon_image,
        "Controller configured"
    );
    let state = Arc::new(ControllerState::new(client, config));

    #[cfg(feature = "rest-api")]
    if !args.disable_http {
        let api_state = state.clone();
        let addr = args.listen_addr;
        tokio::spawn(async move {
            if let Err(e) = kata_operator::rest_api::run_server(api_state, addr).await {
                error!("REST API server error: {:?}", e);
            }
        });
    }
    #[cfg(not(feature = "rest-api"))]
    let _ = (args.listen_addr, args.disable_http);

    controller::run_controller(state).await
}
