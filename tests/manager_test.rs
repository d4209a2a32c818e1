//! Integration tests for the connection manager against a stub controller.

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, timeout};

use dobot_link::connection::{ConnectionConfig, ConnectionEvent, ConnectionManager, ConnectionState};
use dobot_link::{ControlAction, DobotError};

/// What the stub controller should do next.
enum Action {
    Reply(&'static str),
    Close,
}

/// A controller that reports every read and only answers when told to.
struct StubController {
    config: ConnectionConfig,
    writes: mpsc::UnboundedReceiver<String>,
    actions: mpsc::UnboundedSender<Action>,
    task: JoinHandle<()>,
}

impl StubController {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (writes_tx, writes) = mpsc::unbounded_channel();
        let (actions, mut actions_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            loop {
                tokio::select! {
                    read = stream.read(&mut buf) => match read {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            let _ = writes_tx.send(String::from_utf8_lossy(&buf[..n]).into_owned());
                        }
                    },
                    action = actions_rx.recv() => match action {
                        Some(Action::Reply(reply)) => stream.write_all(reply.as_bytes()).await.unwrap(),
                        Some(Action::Close) | None => break,
                    },
                }
            }
        });

        Self {
            config: ConnectionConfig::new("127.0.0.1", port),
            writes,
            actions,
            task,
        }
    }

    async fn next_write(&mut self) -> String {
        timeout(Duration::from_secs(2), self.writes.recv())
            .await
            .expect("controller saw no write")
            .expect("controller task ended")
    }

    async fn assert_no_write(&mut self) {
        assert!(
            timeout(Duration::from_millis(150), self.writes.recv()).await.is_err(),
            "controller saw an unexpected write"
        );
    }

    fn reply(&self, text: &'static str) {
        self.actions.send(Action::Reply(text)).unwrap();
    }

    fn close(&self) {
        self.actions.send(Action::Close).unwrap();
    }
}

/// A controller that answers every read with `reply-N`, counting from 1.
async fn counting_controller() -> ConnectionConfig {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        let mut count = 0;
        while let Ok(n) = stream.read(&mut buf).await {
            if n == 0 {
                break;
            }
            // Exactly one command per read: a second line would mean two in flight.
            let text = String::from_utf8_lossy(&buf[..n]);
            assert_eq!(text.matches('\n').count(), 1, "more than one command in flight: {text:?}");
            count += 1;
            stream.write_all(format!("reply-{count}\r\n").as_bytes()).await.unwrap();
        }
    });

    ConnectionConfig::new("127.0.0.1", port)
}

async fn connected(config: ConnectionConfig) -> ConnectionManager {
    let manager = ConnectionManager::new(config);
    manager.connect();
    timeout(Duration::from_secs(2), manager.wait_for_state(ConnectionState::Connected))
        .await
        .unwrap()
        .unwrap();
    manager
}

fn status(state: ConnectionState) -> ConnectionEvent {
    ConnectionEvent::Status(state.into())
}

#[tokio::test]
async fn test_end_to_end_single_in_flight() {
    let mut stub = StubController::start().await;
    let manager = ConnectionManager::new(stub.config.clone().with_auto_connect(true));
    let mut events = manager.subscribe();

    manager.register("node-a");
    assert_eq!(events.recv().await, Some(status(ConnectionState::Connecting)));
    assert_eq!(events.recv().await, Some(status(ConnectionState::Connected)));
    assert_eq!(events.recv().await, Some(ConnectionEvent::Connected));

    let order = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    for (name, command) in [("cb1", "EnableRobot()"), ("cb2", "ClearError()")] {
        let order = order.clone();
        let done_tx = done_tx.clone();
        manager.send_command_with(command, move |outcome| {
            order.lock().unwrap().push((name, outcome.unwrap()));
            let _ = done_tx.send(());
        });
    }

    assert_eq!(stub.next_write().await, "EnableRobot()\n");
    stub.assert_no_write().await;

    stub.reply("{ok}");
    assert_eq!(stub.next_write().await, "ClearError()\n");
    stub.reply("{ok}");

    done_rx.recv().await.unwrap();
    done_rx.recv().await.unwrap();
    assert_eq!(
        *order.lock().unwrap(),
        vec![("cb1", "{ok}".to_owned()), ("cb2", "{ok}".to_owned())]
    );
}

#[tokio::test]
async fn test_mid_queue_failure_resolves_every_command() {
    let mut stub = StubController::start().await;
    let manager = connected(stub.config.clone()).await;
    let mut events = manager.subscribe();

    let first = manager.send_command("MovJ(250,0,50,0)");
    let second = manager.send_command("MovJ(200,0,50,0)");
    assert_eq!(stub.next_write().await, "MovJ(250,0,50,0)\n");

    stub.close();

    let first = first.await.unwrap_err();
    let second = second.await.unwrap_err();
    assert!(matches!(first, DobotError::TransportClosed));
    assert!(matches!(second, DobotError::ConnectionLost));
    assert!(first.is_connection_level() && second.is_connection_level());

    assert_eq!(events.recv().await, Some(status(ConnectionState::Disconnected)));
    assert_eq!(events.recv().await, Some(ConnectionEvent::Disconnected));
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(manager.stats().await.unwrap().commands_abandoned, 2);

    let err = manager.send_command("ClearError()").await.unwrap_err();
    assert!(matches!(err, DobotError::NotConnected));
}

#[tokio::test]
async fn test_fifo_order_for_many_commands() {
    let manager = connected(counting_controller().await).await;

    let replies: Vec<_> = (0..20).map(|i| manager.send_command(format!("Cmd({i})"))).collect();

    for (i, reply) in replies.into_iter().enumerate() {
        assert_eq!(reply.await.unwrap(), format!("reply-{}", i + 1));
    }

    let stats = manager.stats().await.unwrap();
    assert_eq!(stats.commands_sent, 20);
    assert_eq!(stats.replies_received, 20);
}

#[tokio::test]
async fn test_callback_submitting_more_work_stays_in_order() {
    let manager = connected(counting_controller().await).await;

    let order = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();

    let inner = manager.clone();
    let log = order.clone();
    let tx = done_tx.clone();
    manager.send_command_with("First()", move |outcome| {
        log.lock().unwrap().push(outcome.unwrap());
        let log = log.clone();
        // Submitted from inside a completion: must run after Second().
        inner.send_command_with("Third()", move |outcome| {
            log.lock().unwrap().push(outcome.unwrap());
            let _ = tx.send(());
        });
    });

    let log = order.clone();
    manager.send_command_with("Second()", move |outcome| {
        log.lock().unwrap().push(outcome.unwrap());
    });

    timeout(Duration::from_secs(2), done_rx.recv()).await.unwrap().unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["reply-1", "reply-2", "reply-3"]);
}

#[tokio::test]
async fn test_connect_is_idempotent() {
    let stub = StubController::start().await;
    let manager = ConnectionManager::new(stub.config.clone());
    let mut events = manager.subscribe();

    manager.connect();
    manager.connect();
    manager.wait_for_state(ConnectionState::Connected).await.unwrap();
    manager.connect();

    let stats = manager.stats().await.unwrap();
    assert_eq!(stats.connect_attempts, 1);
    assert_eq!(stats.connect_count, 1);

    assert_eq!(events.try_recv(), Some(status(ConnectionState::Connecting)));
    assert_eq!(events.try_recv(), Some(status(ConnectionState::Connected)));
    assert_eq!(events.try_recv(), Some(ConnectionEvent::Connected));
    assert_eq!(events.try_recv(), None);
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let manager = ConnectionManager::new(ConnectionConfig::new("127.0.0.1", 29999));
    let mut events = manager.subscribe();

    manager.disconnect();
    manager.disconnect();
    manager.stats().await.unwrap();

    assert_eq!(events.try_recv(), None);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_disconnect_while_connecting_abandons_attempt() {
    let stub = StubController::start().await;
    let manager = ConnectionManager::new(stub.config.clone());
    let mut events = manager.subscribe();

    manager.connect();
    manager.disconnect();
    manager.stats().await.unwrap();

    assert_eq!(events.try_recv(), Some(status(ConnectionState::Connecting)));
    assert_eq!(events.try_recv(), Some(status(ConnectionState::Disconnected)));

    // The stale open outcome must not flip the state to connected.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(events.try_recv(), None);
}

#[tokio::test]
async fn test_reference_counting() {
    let stub = StubController::start().await;
    let manager = ConnectionManager::new(stub.config.clone().with_auto_connect(true));

    manager.register("a");
    manager.register("b");
    manager.wait_for_state(ConnectionState::Connected).await.unwrap();
    assert_eq!(manager.consumer_count().await.unwrap(), 2);

    manager.deregister("a");
    assert_eq!(manager.consumer_count().await.unwrap(), 1);
    assert_eq!(manager.state(), ConnectionState::Connected);

    manager.deregister("b");
    manager.wait_for_state(ConnectionState::Disconnected).await.unwrap();
    assert_eq!(manager.consumer_count().await.unwrap(), 0);
    assert_eq!(manager.stats().await.unwrap().connect_attempts, 1);
}

#[tokio::test]
async fn test_register_without_auto_connect_stays_disconnected() {
    let manager = ConnectionManager::new(ConnectionConfig::new("127.0.0.1", 29999));

    manager.register("a");
    assert_eq!(manager.consumer_count().await.unwrap(), 1);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(manager.stats().await.unwrap().connect_attempts, 0);
}

#[tokio::test]
async fn test_not_connected_rejection() {
    let manager = ConnectionManager::new(ConnectionConfig::new("127.0.0.1", 29999));

    let (tx, rx) = tokio::sync::oneshot::channel();
    manager.send_command_with("EnableRobot()", move |outcome| {
        let _ = tx.send(outcome);
    });

    let outcome = rx.await.unwrap();
    assert!(matches!(outcome, Err(DobotError::NotConnected)));
    assert_eq!(manager.stats().await.unwrap().commands_sent, 0);
}

#[tokio::test]
async fn test_explicit_disconnect_abandons_queue() {
    let mut stub = StubController::start().await;
    let manager = connected(stub.config.clone()).await;

    let first = manager.send_command("Sync()");
    let second = manager.send_command("RobotMode()");
    assert_eq!(stub.next_write().await, "Sync()\n");

    manager.disconnect();

    assert!(matches!(first.await, Err(DobotError::ConnectionLost)));
    assert!(matches!(second.await, Err(DobotError::ConnectionLost)));
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    stub.task.await.unwrap();
}

#[tokio::test]
async fn test_control_actions() {
    let stub = StubController::start().await;
    let manager = ConnectionManager::new(stub.config.clone());

    let report = manager.control(ControlAction::Status).await.unwrap();
    assert_eq!(report.message, "Disconnected");
    assert!(!report.connected);

    let report = manager.control(ControlAction::Connect).await.unwrap();
    assert_eq!(report.message, "Connection initiated");
    manager.wait_for_state(ConnectionState::Connected).await.unwrap();

    let report = manager.control("connect".parse().unwrap()).await.unwrap();
    assert_eq!(report.message, "Already connected");
    assert!(report.connected);

    let report = manager.control(ControlAction::Disconnect).await.unwrap();
    assert_eq!(report.message, "Disconnected");
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    let report = manager.control(ControlAction::Disconnect).await.unwrap();
    assert_eq!(report.message, "Already disconnected");
}

#[tokio::test]
async fn test_reconnect_after_controller_restart() {
    let stub = StubController::start().await;
    let config = stub.config.clone();
    let manager = connected(config.clone()).await;

    stub.close();
    manager.wait_for_state(ConnectionState::Disconnected).await.unwrap();
    stub.task.await.unwrap();

    // Bring a controller back up on the same port.
    let listener = TcpListener::bind(("127.0.0.1", config.port)).await.unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 64];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"RobotMode()\n");
        stream.write_all(b"0,{5},RobotMode();").await.unwrap();
        let _ = stream.read(&mut buf).await;
    });

    manager.connect();
    manager.wait_for_state(ConnectionState::Connected).await.unwrap();
    assert_eq!(manager.send_command("RobotMode()").await.unwrap(), "0,{5},RobotMode();");

    let stats = manager.stats().await.unwrap();
    assert_eq!(stats.connect_count, 2);
}
