// Command/response tests: reply capture, silence, busy rejection, I/O failure

#[path = "../common/mod.rs"]
mod common;

use common::{fast_config, SimDevice};
use devlink::config::ConnectionConfig;
use devlink::connection::{Connection, SendError};
use std::sync::Arc;
use std::time::{Duration, Instant};

async fn connected(sim: &SimDevice, config: ConnectionConfig) -> Connection {
    let conn = Connection::new(config);
    conn.connect_transport(sim.transport()).await.unwrap();
    conn
}

// ============================================================================
// REPLIES
// ============================================================================

#[tokio::test]
async fn test_ping_returns_pong_with_default_timing() {
    let sim = SimDevice::new();
    sim.on_command("ping", &[(300, "pong")]);
    let conn = connected(&sim, ConnectionConfig::default().with_welcome_timeout_ms(100)).await;

    let started = Instant::now();
    let reply = conn.send_command("ping").await.unwrap();

    assert_eq!(reply.unwrap().text(), "pong");
    // The reply is read only after the settle delay.
    assert!(started.elapsed() >= Duration::from_millis(450));
    assert!(conn.is_connected());
}

#[tokio::test]
async fn test_command_is_sent_verbatim() {
    let sim = SimDevice::new();
    let conn = connected(&sim, fast_config()).await;

    conn.send_command("status").await.unwrap();
    conn.send_command("reset\r\n").await.unwrap();

    assert_eq!(sim.written(), vec!["status".to_string(), "reset\r\n".to_string()]);
}

#[tokio::test]
async fn test_reply_arriving_during_settle_delay_is_returned() {
    let sim = SimDevice::new();
    sim.on_command("version", &[(0, "v1.2.3")]);
    let conn = connected(&sim, fast_config()).await;

    let reply = conn.send_command("version").await.unwrap();

    assert_eq!(reply.unwrap().text(), "v1.2.3");
}

#[tokio::test]
async fn test_only_first_burst_is_the_reply() {
    let sim = SimDevice::new();
    sim.on_command("info", &[(0, "line one"), (10, "line two")]);
    let conn = connected(&sim, fast_config()).await;

    let reply = conn.send_command("info").await.unwrap();

    assert_eq!(reply.unwrap().text(), "line one");
    // Nothing reads the second burst until the next command.
    let next = conn.send_command("noop").await.unwrap();
    assert_eq!(next.unwrap().text(), "line two");
}

// ============================================================================
// SILENCE
// ============================================================================

#[tokio::test]
async fn test_silent_device_returns_none_after_default_window() {
    let sim = SimDevice::new();
    let conn = connected(&sim, ConnectionConfig::default().with_welcome_timeout_ms(100)).await;

    let started = Instant::now();
    let reply = conn.send_command("hello").await.unwrap();
    let elapsed = started.elapsed();

    assert!(reply.is_none());
    // settle 500ms + reply timeout 2000ms
    assert!(elapsed >= Duration::from_millis(2400), "returned after {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(3200), "returned after {:?}", elapsed);
    assert!(conn.is_connected());
}

#[tokio::test]
async fn test_silence_is_counted() {
    let sim = SimDevice::new();
    let conn = connected(&sim, fast_config()).await;

    assert!(conn.send_command("hello").await.unwrap().is_none());

    let stats = conn.stats();
    assert_eq!(stats.commands_sent, 1);
    assert_eq!(stats.bytes_sent, 5);
    assert_eq!(stats.reply_timeouts, 1);
    assert_eq!(stats.replies_received, 0);
}

// ============================================================================
// CONCURRENCY
// ============================================================================

#[tokio::test]
async fn test_concurrent_command_is_rejected_busy() {
    let sim = SimDevice::new();
    let conn = connected(&sim, fast_config()).await;

    let (first, second) = tokio::join!(conn.send_command("first"), conn.send_command("second"));

    assert_eq!(first, Ok(None));
    assert_eq!(second, Err(SendError::Busy));
    assert_eq!(sim.written(), vec!["first".to_string()]);
    assert!(conn.is_connected());
}

#[tokio::test]
async fn test_commands_after_busy_still_work() {
    let sim = SimDevice::new();
    sim.on_command("ping", &[(0, "pong")]);
    let conn = connected(&sim, fast_config()).await;

    let _ = tokio::join!(conn.send_command("ping"), conn.send_command("ping"));
    let reply = conn.send_command("ping").await.unwrap();

    assert_eq!(reply.unwrap().text(), "pong");
}

// ============================================================================
// FAILURES
// ============================================================================

#[tokio::test]
async fn test_write_failure_invalidates_connection() {
    let sim = SimDevice::new();
    let conn = connected(&sim, fast_config()).await;
    sim.fail_writes();

    let err = conn.send_command("ping").await.unwrap_err();

    assert!(matches!(err, SendError::IoFailure(_)));
    assert!(err.is_fatal());
    assert!(!conn.is_connected());
    assert!(sim.is_closed());

    assert_eq!(conn.send_command("ping").await.unwrap_err(), SendError::NotConnected);
}

#[tokio::test]
async fn test_read_failure_invalidates_connection() {
    let sim = SimDevice::new();
    let conn = connected(&sim, fast_config().with_settle_delay_ms(200)).await;

    let breaker = sim.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        breaker.break_link();
    });
    let err = conn.send_command("ping").await.unwrap_err();

    assert!(matches!(err, SendError::IoFailure(_)));
    assert!(!conn.is_connected());
}

#[tokio::test]
async fn test_disconnect_during_command_fails_promptly() {
    let sim = SimDevice::new();
    let config = fast_config().with_settle_delay_ms(20).with_reply_timeout_ms(10_000);
    let conn = Arc::new(connected(&sim, config).await);

    let sender = Arc::clone(&conn);
    let task = tokio::spawn(async move { sender.send_command("slow").await });

    tokio::time::sleep(Duration::from_millis(200)).await;
    let started = Instant::now();
    conn.disconnect().await;

    let result = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("command should not wait for its full reply timeout")
        .unwrap();

    assert!(matches!(result, Err(SendError::IoFailure(_))));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!conn.is_connected());
}

#[tokio::test]
async fn test_disconnect_during_slow_write_is_prompt() {
    let sim = SimDevice::new();
    let conn = Arc::new(connected(&sim, fast_config()).await);
    sim.slow_writes(Duration::from_secs(3));

    let sender = Arc::clone(&conn);
    let task = tokio::spawn(async move { sender.send_command("x").await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    conn.disconnect().await;
    assert!(started.elapsed() < Duration::from_secs(1), "disconnect took {:?}", started.elapsed());

    let result = tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("write should be cut short by the close")
        .unwrap();
    assert!(matches!(result, Err(SendError::IoFailure(_))));
    assert!(sim.is_closed());
}

#[test]
fn test_busy_is_not_fatal() {
    assert!(!SendError::Busy.is_fatal());
    assert!(SendError::NotConnected.is_fatal());
}
