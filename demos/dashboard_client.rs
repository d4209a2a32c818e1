//! Dashboard client example.
//!
//! Shares one controller connection between two consumers, queues commands
//! from both and prints status changes as they happen.
//!
//! Run the stub first: cargo run --example stub_controller
//! Then run: cargo run --example dashboard_client

use dobot_link::codec::payload_values;
use dobot_link::connection::{ConnectionConfig, ConnectionEvent, ConnectionRegistry, ControlAction};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .init();

    let registry = ConnectionRegistry::new();
    let config = ConnectionConfig::from_toml_str(
        r#"
        host = "127.0.0.1"
        port = 29999
        auto_connect = true
        command_timeout = "2s"
        "#,
    )?;

    // Two consumers resolve to the same manager.
    let mover = registry.get_or_create(config.clone());
    let poller = registry.get_or_create(config);

    let mut events = mover.subscribe();
    mover.register("move-node");
    poller.register("status-node");

    println!("Waiting for connection...");
    while let Some(event) = events.recv().await {
        match event {
            ConnectionEvent::Status(status) => println!("status: {}", status.label),
            ConnectionEvent::Connected => break,
            ConnectionEvent::Disconnected => return Err("controller unavailable".into()),
        }
    }

    // Submitted back to back; the manager writes them one at a time.
    let enable = mover.send_command("EnableRobot()");
    let pose = poller.send_command("GetPose()");
    let mode = poller.send_command("RobotMode()");

    println!("EnableRobot -> {}", enable.await?);
    let pose = pose.await?;
    println!("GetPose     -> {pose} (values {:?})", payload_values(&pose));
    println!("RobotMode   -> {}", mode.await?);

    let report = registry.control(mover.target(), ControlAction::Status).await?;
    println!("control status: {} (connected={})", report.message, report.connected);

    println!("stats: {:?}", mover.stats().await?);

    // The last consumer to leave closes the socket.
    poller.deregister("status-node");
    mover.deregister("move-node");
    while let Some(event) = events.recv().await {
        if event == ConnectionEvent::Disconnected {
            println!("disconnected");
            break;
        }
    }

    Ok(())
}
