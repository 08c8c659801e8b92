use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use trellis_core::config::Config;
use trellis_core::ipc::{FailureKind, Payload};
use trellis_core::{Rect, Request, WindowId, WorkspaceId};
use trellis_runtime::control::{is_daemon_running, send_request};
use trellis_runtime::daemon::Daemon;
use trellis_runtime::observer::{DeliveryConfig, Observer, VirtualHost};

const TIMEOUT: Duration = Duration::from_secs(2);

fn test_config() -> Config {
    let mut config = Config::default();
    config.broker.listen = "127.0.0.1:0".into();
    config.control.listen = "127.0.0.1:0".into();
    config.relay.heartbeat_ms = 50;
    config.broker.liveness_ms = 100;
    config
}

fn windows(addr: &str, workspace: u32) -> Vec<trellis_core::WindowDescriptor> {
    let response = send_request(
        addr,
        &Request::Query {
            workspace: WorkspaceId(workspace),
        },
        TIMEOUT,
    )
    .unwrap();
    match response.payload {
        Some(Payload::Windows { windows }) => windows,
        other => panic!("unexpected payload {other:?}"),
    }
}

fn eventually<T>(mut probe: impl FnMut() -> Option<T>) -> T {
    let started = Instant::now();
    loop {
        if let Some(value) = probe() {
            return value;
        }
        assert!(started.elapsed() < Duration::from_secs(5), "timed out");
        thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn daemon_serves_observers_and_control_clients_until_stopped() {
    // Arrange
    let config = test_config();
    let daemon = Daemon::start(&config).unwrap();
    let control = daemon.control_addr().to_string();
    let broker = daemon.broker_addr().to_string();

    let host = Arc::new(VirtualHost::new(std::process::id(), "editor"));
    let observer = Observer::new(
        host.clone(),
        64,
        DeliveryConfig::from_relay(&config.relay),
    );
    let observing = thread::spawn(move || observer.connect(&broker));
    let window = host.open("draft", Rect::new(100, 100, 400, 300));

    // Act
    let listed = eventually(|| {
        let listed = windows(&control, 1);
        let tiled = listed.len() == 1 && listed[0].rect.width > 400;
        tiled.then_some(listed)
    });
    let closed = send_request(&control, &Request::Close { window }, TIMEOUT).unwrap();
    eventually(|| windows(&control, 1).is_empty().then_some(()));
    let stale = send_request(&control, &Request::Focus { window }, TIMEOUT).unwrap();
    let stopped = send_request(&control, &Request::Stop, TIMEOUT).unwrap();

    // Assert
    assert_eq!(listed[0].id, window);
    assert!(closed.is_ok());
    assert!(host.window(window).is_none());
    assert_eq!(stale.failure, Some(FailureKind::NotFound));
    assert!(stopped.is_ok());
    daemon.wait().unwrap();
    assert!(!is_daemon_running(&control));
    observing.join().unwrap().ok();
}

#[test]
fn unknown_window_is_not_found_over_the_wire() {
    // Arrange
    let daemon = Daemon::start(&test_config()).unwrap();
    let control = daemon.control_addr().to_string();

    // Act
    let response = send_request(
        &control,
        &Request::Focus {
            window: WindowId::new(1, 0xDEAD),
        },
        TIMEOUT,
    )
    .unwrap();

    // Assert
    assert_eq!(response.failure, Some(FailureKind::NotFound));
    daemon.stop();
    daemon.wait().unwrap();
}
