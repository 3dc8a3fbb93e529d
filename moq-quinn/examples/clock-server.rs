use std::path;
use std::time::Duration;

use clap::Parser;

use moq_proto::{Group, Parameters};
use moq_quinn::{IncomingSession, Server, TrackContext};

/// A MOQ server that publishes the current time as one group per second.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "[::]:4443")]
    addr: std::net::SocketAddr,

    /// Use the certificates at this path, encoded as PEM.
    #[arg(long)]
    pub tls_cert: path::PathBuf,

    /// Use the private key at this path, encoded as PEM.
    #[arg(long)]
    pub tls_key: path::PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Enable info logging.
    let env = env_logger::Env::default().default_filter_or("info");
    env_logger::init_from_env(env);

    let args = Args::parse();

    let server = Server::builder().with_handler(serve_clock).build();

    log::info!("listening on {}", args.addr);

    let res = tokio::select! {
        res = server.listen_and_serve_tls(args.addr, &args.tls_cert, &args.tls_key) => res,
        _ = tokio::signal::ctrl_c() => {
            log::info!("draining sessions");
            server.shutdown(tokio::time::sleep(Duration::from_secs(5))).await
        }
    };

    res?;
    Ok(())
}

async fn serve_clock(incoming: IncomingSession) -> Result<(), moq_quinn::Error> {
    log::info!("session offer: path={:?}", incoming.path());

    let session = incoming.accept_session(Parameters::new()).await?;
    let track = TrackContext::new();

    let mut sequence = 0;
    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = session.closed() => return Ok(()),
            _ = ticker.tick() => {}
        }

        let group = Group {
            subscribe_id: 0,
            sequence,
        };
        sequence += 1;

        let mut writer = session.open_group(&track, group).await?;
        let now = format!("{:?}", std::time::SystemTime::now());
        writer.write_frame(now.as_bytes()).await?;
        writer.close().ok();
    }
}
