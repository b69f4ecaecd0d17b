//! Guard pipeline ordering and teardown contracts.

use std::sync::Arc;

use async_trait::async_trait;
use openbrowser_viewport::guards::{Guard, GuardContext};
use openbrowser_viewport::{LaunchProfile, NoopTransport, Viewport, ViewportError};
use tokio::sync::Mutex;

type Log = Arc<Mutex<Vec<String>>>;

struct RecorderGuard {
    name: &'static str,
    priority: u32,
    fail_attach: bool,
    log: Log,
}

impl RecorderGuard {
    fn new(name: &'static str, priority: u32, log: Log) -> Arc<Self> {
        Arc::new(Self {
            name,
            priority,
            fail_attach: false,
            log,
        })
    }

    fn failing(name: &'static str, priority: u32, log: Log) -> Arc<Self> {
        Arc::new(Self {
            name,
            priority,
            fail_attach: true,
            log,
        })
    }
}

#[async_trait]
impl Guard for RecorderGuard {
    fn name(&self) -> &'static str {
        self.name
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    async fn attach(&self, _ctx: GuardContext) -> Result<(), ViewportError> {
        self.log.lock().await.push(format!("attach:{}", self.name));
        if self.fail_attach {
            return Err(ViewportError::internal("intentional attach failure"));
        }
        Ok(())
    }

    async fn detach(&self) {
        self.log.lock().await.push(format!("detach:{}", self.name));
    }
}

fn stub_viewport() -> Arc<Viewport> {
    let options = LaunchProfile::new().headless(true).build();
    Viewport::with_transport(options, Arc::new(NoopTransport))
}

#[tokio::test]
async fn guards_attach_by_priority_and_detach_in_reverse() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let viewport = stub_viewport();

    // Deliberately out of order; start must sort by priority.
    let guards: Vec<Arc<dyn Guard>> = vec![
        RecorderGuard::new("download", 300, Arc::clone(&log)),
        RecorderGuard::new("local", 10, Arc::clone(&log)),
        RecorderGuard::new("page-ready", 200, Arc::clone(&log)),
    ];

    viewport.start(guards).await.expect("start");
    viewport.close().await;

    let entries = log.lock().await.clone();
    assert_eq!(
        entries,
        vec![
            "attach:local",
            "attach:page-ready",
            "attach:download",
            "detach:download",
            "detach:page-ready",
            "detach:local",
        ]
    );
}

#[tokio::test]
async fn attach_failure_aborts_start_and_rolls_back() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let viewport = stub_viewport();

    let guards: Vec<Arc<dyn Guard>> = vec![
        RecorderGuard::new("first", 10, Arc::clone(&log)),
        RecorderGuard::failing("broken", 50, Arc::clone(&log)),
        RecorderGuard::new("never", 100, Arc::clone(&log)),
    ];

    let err = viewport.start(guards).await.expect_err("start must fail");
    assert!(matches!(err, ViewportError::GuardAttach { .. }));

    let entries = log.lock().await.clone();
    // The third guard never attached; the first was rolled back.
    assert_eq!(
        entries,
        vec!["attach:first", "attach:broken", "detach:first"]
    );
}

#[tokio::test]
async fn double_close_is_idempotent() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let viewport = stub_viewport();
    let guards: Vec<Arc<dyn Guard>> = vec![RecorderGuard::new("only", 10, Arc::clone(&log))];

    viewport.start(guards).await.expect("start");
    viewport.close().await;
    viewport.close().await;

    let entries = log.lock().await.clone();
    assert_eq!(entries, vec!["attach:only", "detach:only"]);
}
