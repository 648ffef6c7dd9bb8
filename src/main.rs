use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use h2tun::tunnel::{ClientForwarder, ServerForwarder};
use h2tun::{TunnelConfig, TunnelError};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Tunnel raw TCP connections through an HTTP/2 transport"
)]
struct Args {
    /// Run in server mode: accept tunnel exchanges and dial the backend.
    #[arg(short = 's', long, env = "H2TUN_SERVER")]
    server: bool,

    /// Handle tunnel exchanges at this HTTP path.
    #[arg(short, long, env = "H2TUN_PATH", default_value = "/h2tunnel")]
    path: String,

    /// Local host. Client mode listens here; server mode dials the backend here.
    #[arg(long, env = "H2TUN_LOCAL_HOST", default_value = "127.0.0.1")]
    local_host: String,

    #[arg(long, env = "H2TUN_LOCAL_PORT", default_value_t = 18086)]
    local_port: u16,

    /// Remote host. Client mode dials the tunnel server here; server mode listens here.
    #[arg(long, env = "H2TUN_REMOTE_HOST", default_value = "127.0.0.1")]
    remote_host: String,

    #[arg(long, env = "H2TUN_REMOTE_PORT", default_value_t = 18096)]
    remote_port: u16,

    /// Client mode: connect to the tunnel server over TLS.
    #[arg(long, env = "H2TUN_TLS")]
    tls: bool,

    /// Client mode: skip TLS certificate verification (self-signed/testing).
    #[arg(long, env = "H2TUN_INSECURE_SKIP_VERIFY")]
    insecure_skip_verify: bool,

    /// Server mode: TLS certificate file (PEM). TLS is served only when both
    /// --cert-file and --key-file are set; otherwise cleartext HTTP/2 (h2c).
    #[arg(long, env = "H2TUN_CERT_FILE")]
    cert_file: Option<PathBuf>,

    /// Server mode: TLS private key file (PEM).
    #[arg(long, env = "H2TUN_KEY_FILE")]
    key_file: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, env = "H2TUN_DEBUG")]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let default_directive = if args.debug {
        "h2tun=debug,hyper=warn"
    } else {
        "h2tun=info,hyper=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_directive.into()),
        )
        .compact()
        .init();

    if let Err(e) = run(args).await {
        error!(error = %e, "forwarder failed");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), TunnelError> {
    let local = format!("{}:{}", args.local_host, args.local_port);
    let remote = format!("{}:{}", args.remote_host, args.remote_port);

    // Same orientation on both sides of the deployment: the server listens
    // on the remote pair and dials the local pair, the client the reverse.
    let (listen_addr, peer_addr) = if args.server {
        (remote, local)
    } else {
        (local, remote)
    };

    let config = TunnelConfig {
        listen_addr,
        peer_addr,
        path: args.path,
        use_tls: args.tls,
        insecure_skip_verify: args.insecure_skip_verify,
        cert_file: args.cert_file,
        key_file: args.key_file,
    };

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    if args.server {
        info!("running in server mode");
        ServerForwarder::bind(config).await?.serve(shutdown).await
    } else {
        info!("running in client mode");
        ClientForwarder::bind(config).await?.serve(shutdown).await
    }
}
