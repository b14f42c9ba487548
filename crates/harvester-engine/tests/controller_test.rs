mod common;

use common::{
    EventLog, FailingStore, FakeElement, LOGIN_URL, MockBackend, MockHttp, PAGE_1, PAGE_2,
    RecordingSleeper, config, cookie, csv, login_page,
};
use harvester_engine::backend::Backend;
use harvester_engine::config::{RunConfig, Secret};
use harvester_engine::context::RunContext;
use harvester_engine::controller::{MISSING_CREDENTIALS, RunController, RunError};
use harvester_engine::record::RunStatus;
use harvester_engine::session::SESSION_KEY;
use harvester_engine::storage::{KeyValueStore, MemoryDataset, MemoryKeyValueStore};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

struct Harness {
    log: EventLog,
    store: Arc<dyn KeyValueStore>,
    dataset: Arc<MemoryDataset>,
    http: Arc<MockHttp>,
    sleeper: Arc<RecordingSleeper>,
    created: Arc<AtomicU32>,
}

impl Harness {
    fn new() -> Self {
        Self::with_store(Arc::new(MemoryKeyValueStore::new()))
    }

    fn with_store(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            log: EventLog::default(),
            store,
            dataset: Arc::new(MemoryDataset::new()),
            http: Arc::new(MockHttp::new()),
            sleeper: Arc::new(RecordingSleeper::default()),
            created: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Controller whose n-th backend (1-based) is built by `build(n, log)`.
    fn controller<F>(&self, build: F) -> RunController
    where
        F: Fn(u32, EventLog) -> MockBackend + Send + Sync + 'static,
    {
        let ctx = RunContext::new(self.store.clone(), self.dataset.clone(), self.http.clone());
        let log = self.log.clone();
        let created = self.created.clone();
        let factory = move || -> Box<dyn Backend> {
            let n = created.fetch_add(1, Ordering::SeqCst) + 1;
            Box::new(build(n, log.clone()))
        };
        RunController::new(ctx, factory).with_sleeper(self.sleeper.clone())
    }

    fn created(&self) -> u32 {
        self.created.load(Ordering::SeqCst)
    }
}

fn dashboard(log: EventLog) -> MockBackend {
    MockBackend::new(log).page(
        PAGE_1,
        vec![FakeElement::text("button", "Export CSV").downloads(csv(4))],
    )
}

fn empty_site(log: EventLog) -> MockBackend {
    MockBackend::new(log)
        .page(PAGE_1, vec![])
        .page(PAGE_2, vec![])
        .page(LOGIN_URL, login_page())
}

#[tokio::test]
async fn missing_credentials_skip_every_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new();
    let controller = harness.controller(|_, log| dashboard(log));
    let config = RunConfig {
        password: Secret::default(),
        ..config(dir.path())
    };

    let record = controller.run(&config).await.unwrap();

    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.error.as_deref(), Some(MISSING_CREDENTIALS));
    assert_eq!(record.attempts, 0);
    assert_eq!(harness.created(), 0);
    assert!(harness.log.navigations().is_empty());
    assert!(harness.sleeper.delays().is_empty());
    let records = harness.dataset.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["error"], MISSING_CREDENTIALS);
}

#[tokio::test]
async fn valid_session_skips_login_and_delivers() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new();
    let controller = harness.controller(|_, log| dashboard(log));
    let mut config = config(dir.path());
    config.notification_url = "https://hooks.example/csv".into();

    let record = controller.run(&config).await.unwrap();

    assert!(record.is_success());
    assert_eq!(record.attempts, 1);
    assert_eq!(record.file_size, Some(csv(4).len()));
    assert!(record.stored);
    assert!(record.notified);
    assert!(!record.session_saved);
    assert!(!harness.log.navigations().contains(&LOGIN_URL.to_string()));
    assert_eq!(harness.log.count("close"), 1);
    assert_eq!(
        harness.store.get("indeed-output.csv").await.unwrap(),
        Some(csv(4))
    );
    let records = harness.dataset.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["status"], "Success");
    assert_eq!(records[0]["source_strategy"], "ui_download");
    assert_eq!(records[0]["job_id"], "job-42");
}

#[tokio::test]
async fn login_persists_the_new_session() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new();
    let link = "https://files.example/export.csv";
    let http = MockHttp::new().respond(link, 200, csv(2));
    let harness = Harness {
        http: Arc::new(http),
        ..harness
    };
    let controller = harness.controller(move |_, log| {
        let mut backend = MockBackend::new(log)
            .page(PAGE_1, vec![FakeElement::link(link)])
            .page(LOGIN_URL, login_page());
        backend.cookies = vec![cookie("sid", "fresh")];
        backend
    });
    let config = config(dir.path());

    let record = controller.run(&config).await.unwrap();

    assert!(record.is_success());
    assert!(record.session_saved);
    assert_eq!(
        harness.log.navigations(),
        vec![PAGE_1.to_string(), LOGIN_URL.to_string(), PAGE_1.to_string()]
    );
    let saved = harness.store.get(SESSION_KEY).await.unwrap().unwrap();
    let cookies: Vec<harvester_engine::backend::Cookie> = serde_json::from_slice(&saved).unwrap();
    assert_eq!(cookies, vec![cookie("sid", "fresh")]);
}

#[tokio::test]
async fn session_is_not_saved_when_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new();
    let controller = harness.controller(|_, log| {
        let mut backend = MockBackend::new(log)
            .page(
                PAGE_1,
                vec![FakeElement::text("a", "Export candidates").downloads(csv(3))],
            )
            .page(LOGIN_URL, login_page());
        backend.cookies = vec![cookie("sid", "fresh")];
        backend
    });
    let mut config = config(dir.path());
    config.save_session = false;

    let record = controller.run(&config).await.unwrap();

    assert!(record.is_success());
    assert!(!record.session_saved);
    assert!(harness.store.get(SESSION_KEY).await.unwrap().is_none());
}

#[tokio::test]
async fn exhausted_retries_record_the_last_error_once() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new();
    let controller = harness.controller(|n, log| {
        let mut backend = empty_site(log);
        backend.fail_launch = n == 1;
        backend
    });
    let config = config(dir.path());

    let err = controller.run(&config).await.unwrap_err();

    let RunError::Exhausted {
        attempts,
        last,
        record,
    } = err;
    assert_eq!(attempts, 2);
    assert!(last.to_string().contains("Unable to find or download"));
    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.attempts, 2);
    assert_eq!(record.error.as_deref(), Some(last.to_string().as_str()));
    assert_eq!(harness.created(), 2);
    assert_eq!(harness.log.count("launch"), 2);
    assert_eq!(harness.log.count("close"), 2);
    assert_eq!(harness.sleeper.delays(), vec![Duration::from_millis(5)]);

    let records = harness.dataset.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["status"], "Failed");
    assert_eq!(records[0]["attempts"], 2);
    assert!(
        records[0]["error"]
            .as_str()
            .unwrap()
            .contains("Unable to find or download")
    );
}

#[tokio::test]
async fn backoff_grows_linearly_with_the_attempt_number() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new();
    let controller = harness.controller(|_, log| empty_site(log));
    let mut config = config(dir.path());
    config.max_retries = 4;
    config.backoff_unit_ms = 10;

    assert!(controller.run(&config).await.is_err());

    assert_eq!(
        harness.sleeper.delays(),
        vec![
            Duration::from_millis(50),
            Duration::from_millis(100),
            Duration::from_millis(150),
        ]
    );
    assert_eq!(harness.created(), 4);
    assert_eq!(harness.dataset.records().len(), 1);
}

#[tokio::test]
async fn a_later_attempt_can_succeed() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new();
    let controller = harness.controller(|n, log| {
        if n == 1 {
            let mut backend = dashboard(log);
            backend.fail_launch = true;
            backend
        } else {
            dashboard(log)
        }
    });
    let mut config = config(dir.path());
    config.max_retries = 3;

    let record = controller.run(&config).await.unwrap();

    assert!(record.is_success());
    assert_eq!(record.attempts, 2);
    assert_eq!(harness.sleeper.delays(), vec![Duration::from_millis(5)]);
    assert_eq!(harness.dataset.records().len(), 1);
}

#[tokio::test]
async fn missing_submit_control_fails_the_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new();
    let controller = harness.controller(|_, log| {
        MockBackend::new(log)
            .page(PAGE_1, vec![])
            .page(LOGIN_URL, vec![FakeElement::css("input")])
    });
    let mut config = config(dir.path());
    config.max_retries = 1;

    let err = controller.run(&config).await.unwrap_err();

    let RunError::Exhausted { attempts, last, .. } = err;
    assert_eq!(attempts, 1);
    assert!(last.to_string().starts_with("Login failed"));
    assert!(harness.sleeper.delays().is_empty());
}

#[tokio::test]
async fn storage_outage_still_counts_as_success() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::with_store(Arc::new(FailingStore));
    let controller = harness.controller(|_, log| dashboard(log));
    let mut config = config(dir.path());
    config.notification_url = "https://hooks.example/csv".into();

    let record = controller.run(&config).await.unwrap();

    assert_eq!(record.status, RunStatus::Success);
    assert!(!record.stored);
    assert!(record.notified);
    assert_eq!(harness.http.post_count(), 1);
}
