use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tokio::net::{UnixListener, UnixStream};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use vm0_guest_agent::{handshake, session};

#[derive(Parser, Debug)]
#[command(
    name = "vm0-guest-agent",
    version,
    about = "In-VM control agent for vm0 micro-VM workloads"
)]
struct Cli {
    /// Speak over a Unix domain socket (with the CONNECT/OK emulation
    /// handshake) instead of vsock.
    #[arg(long)]
    unix_socket: Option<PathBuf>,

    /// Accept inbound connections instead of dialing the host.
    #[arg(long)]
    listen: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Fatal: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match (&cli.unix_socket, cli.listen) {
        (Some(path), false) => unix_connect(path).await,
        (Some(path), true) => unix_listen(path).await,
        (None, false) => vsock_connect().await,
        (None, true) => vsock_listen().await,
    }
}

async fn unix_connect(path: &Path) -> anyhow::Result<()> {
    info!(path = %path.display(), "connecting to host over unix socket");
    let mut stream = UnixStream::connect(path)
        .await
        .with_context(|| format!("failed to connect to {}", path.display()))?;
    handshake::emulation_handshake(&mut stream).await?;
    session::run(stream).await?;
    Ok(())
}

async fn unix_listen(path: &Path) -> anyhow::Result<()> {
    // A stale socket file from a previous run would fail the bind.
    let _ = std::fs::remove_file(path);
    let listener = UnixListener::bind(path)
        .with_context(|| format!("failed to bind {}", path.display()))?;
    info!(path = %path.display(), "listening on unix socket");

    loop {
        let (mut stream, _) = listener.accept().await.context("accept failed")?;
        info!("host connected");
        let result = async {
            handshake::emulation_handshake(&mut stream).await?;
            session::run(stream).await
        }
        .await;
        if let Err(e) = result {
            error!(error = %e, "session ended with error");
        }
    }
}

#[cfg(target_os = "linux")]
async fn vsock_connect() -> anyhow::Result<()> {
    use tokio_vsock::{VsockAddr, VsockStream};
    use vm0_proto::{GUEST_AGENT_PORT, HOST_CID};

    info!(cid = HOST_CID, port = GUEST_AGENT_PORT, "connecting to host over vsock");
    let stream = VsockStream::connect(VsockAddr::new(HOST_CID, GUEST_AGENT_PORT))
        .await
        .context("failed to connect to host vsock")?;
    session::run(stream).await?;
    Ok(())
}

#[cfg(target_os = "linux")]
async fn vsock_listen() -> anyhow::Result<()> {
    use tokio_vsock::{VsockAddr, VsockListener, VMADDR_CID_ANY};
    use vm0_proto::GUEST_AGENT_PORT;

    let listener = VsockListener::bind(VsockAddr::new(VMADDR_CID_ANY, GUEST_AGENT_PORT))
        .context("failed to bind vsock listener")?;
    info!(port = GUEST_AGENT_PORT, "listening on vsock");

    loop {
        let (stream, addr) = listener.accept().await.context("vsock accept failed")?;
        info!(cid = addr.cid(), port = addr.port(), "host connected");
        if let Err(e) = session::run(stream).await {
            error!(error = %e, "session ended with error");
        }
    }
}

#[cfg(not(target_os = "linux"))]
async fn vsock_connect() -> anyhow::Result<()> {
    anyhow::bail!("vsock transport is only available on Linux; use --unix-socket")
}

#[cfg(not(target_os = "linux"))]
async fn vsock_listen() -> anyhow::Result<()> {
    anyhow::bail!("vsock transport is only available on Linux; use --unix-socket")
}
