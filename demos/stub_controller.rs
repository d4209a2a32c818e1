//! Stub Dobot controller.
//!
//! Accepts dashboard connections and answers every command the way a real
//! controller does: `0,{},Command();`. `GetPose()` gets a fixed pose back.
//!
//! Run: cargo run --example stub_controller
//! Then run: cargo run --example dashboard_client

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

const BIND_ADDR: &str = "127.0.0.1:29999";

fn reply_for(command: &str) -> String {
    match command {
        "GetPose()" => "0,{250.0,0.0,50.0,0.0,0.0,0.0},GetPose();".to_owned(),
        "RobotMode()" => "0,{5},RobotMode();".to_owned(),
        other => format!("0,{{}},{other};"),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let listener = TcpListener::bind(BIND_ADDR).await?;
    info!("stub controller listening on {BIND_ADDR}");

    loop {
        let (stream, peer) = listener.accept().await?;
        info!(%peer, "client connected");

        tokio::spawn(async move {
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();

            while let Ok(Some(line)) = lines.next_line().await {
                let reply = reply_for(line.trim());
                info!(%peer, command = %line, %reply, "answering");
                if write_half.write_all(reply.as_bytes()).await.is_err() {
                    break;
                }
            }
            info!(%peer, "client disconnected");
        });
    }
}
