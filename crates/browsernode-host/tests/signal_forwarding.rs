//! Host signals reach the browser, and the browser's exit drives teardown.
//!
//! Kept in its own test binary: raising SIGTERM on the test process would
//! otherwise be forwarded to every browser supervised by concurrent tests.

#![cfg(unix)]

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{raise, Signal};
use tokio::process::Command;
use tokio::signal::unix::{signal, SignalKind};

use browsernode_host::infrastructure::browser::{supervise, BrowserProcessHandle, Teardown};

#[derive(Default)]
struct RecordingTeardown {
    steps: Mutex<Vec<&'static str>>,
}

#[async_trait]
impl Teardown for RecordingTeardown {
    async fn stop_api_server(&self) {
        self.steps.lock().unwrap().push("stop_api_server");
    }

    async fn remove_address_file(&self) {
        self.steps.lock().unwrap().push("remove_address_file");
    }
}

#[tokio::test(flavor = "current_thread")]
async fn test_sigterm_is_forwarded_and_browser_exit_tears_down_once() {
    // Arrange: keep SIGTERM from terminating the test process itself
    let _guard = signal(SignalKind::terminate()).unwrap();
    let mut command = Command::new("sleep");
    command.arg("30");
    let browser = BrowserProcessHandle::spawn(command).unwrap();
    let teardown = RecordingTeardown::default();

    tokio::spawn(async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        raise(Signal::SIGTERM).unwrap();
    });

    // Act
    let code = tokio::time::timeout(
        Duration::from_secs(10),
        supervise(browser, &teardown, std::future::pending::<()>(), None),
    )
    .await
    .expect("browser was not stopped by the forwarded signal");

    // Assert
    assert_eq!(code, 143);
    assert_eq!(
        *teardown.steps.lock().unwrap(),
        ["stop_api_server", "remove_address_file"]
    );
}
