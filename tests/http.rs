use chrono::NaiveDate;
use daily_checkin::clock::ManualClock;
use daily_checkin::config::ClientConfig;
use daily_checkin::coordinator::{DataSource, LoginOutcome, Session};
use daily_checkin::local::MemoryStorage;
use daily_checkin::models::{
    ApiResponse, CheckIn, DeleteResponse, StatsReport, ToggleAction, ToggleResponse, UserProfile,
};
use once_cell::sync::Lazy;
use reqwest::{Client, StatusCode};
use std::net::TcpListener;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;

struct TestServer {
    base_url: String,
    child: Child,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

static TEST_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));
static SERVER: Lazy<Mutex<Option<Arc<TestServer>>>> = Lazy::new(|| Mutex::new(None));
static USER_SEQ: AtomicU32 = AtomicU32::new(0);

#[cfg(unix)]
mod cleanup {
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Once;

    static REGISTER: Once = Once::new();
    static PID: AtomicI32 = AtomicI32::new(0);

    pub fn register(pid: u32) {
        REGISTER.call_once(|| {
            PID.store(pid as i32, Ordering::SeqCst);
            unsafe {
                libc::atexit(on_exit);
            }
        });
    }

    extern "C" fn on_exit() {
        let pid = PID.load(Ordering::SeqCst);
        if pid > 0 {
            unsafe {
                libc::kill(pid, libc::SIGTERM);
            }
        }
    }
}

fn pick_free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind random port");
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

fn unique_suffix() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!(
        "{}_{}_{}",
        std::process::id(),
        nanos,
        USER_SEQ.fetch_add(1, Ordering::SeqCst)
    )
}

fn unique_data_path() -> String {
    let mut path = std::env::temp_dir();
    path.push(format!("daily_checkin_http_{}.json", unique_suffix()));
    path.to_string_lossy().to_string()
}

fn unique_user() -> String {
    format!("user-{}", unique_suffix())
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

async fn wait_until_ready(base_url: &str) {
    let client = Client::new();
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        if let Ok(resp) = client.get(format!("{base_url}/api/health")).send().await {
            if resp.status().is_success() {
                return;
            }
        }
        if Instant::now() > deadline {
            panic!("server did not become ready");
        }
        sleep(Duration::from_millis(100)).await;
    }
}

async fn spawn_server() -> TestServer {
    let port = pick_free_port();
    let data_path = unique_data_path();
    let child = Command::new(env!("CARGO_BIN_EXE_daily_checkin"))
        .env("PORT", port.to_string())
        .env("APP_DATA_PATH", data_path)
        .env("RUST_LOG", "info")
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .expect("failed to spawn server");

    #[cfg(unix)]
    cleanup::register(child.id());

    let base_url = format!("http://127.0.0.1:{port}");
    wait_until_ready(&base_url).await;

    TestServer { base_url, child }
}

async fn shared_server() -> Arc<TestServer> {
    let mut guard = SERVER.lock().await;
    if let Some(server) = guard.as_ref() {
        return Arc::clone(server);
    }
    let server = Arc::new(spawn_server().await);
    *guard = Some(Arc::clone(&server));
    server
}

async fn toggle(client: &Client, base_url: &str, user: &str, task_id: &str, on: &str) -> ToggleResponse {
    let response: ApiResponse<ToggleResponse> = client
        .post(format!("{base_url}/api/checkins"))
        .bearer_auth(user)
        .json(&serde_json::json!({ "taskId": task_id, "date": on }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(response.success);
    response.data.unwrap()
}

#[tokio::test]
async fn http_toggle_checks_then_unchecks() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;
    let client = Client::new();
    let user = unique_user();

    let first = toggle(&client, &server.base_url, &user, "morning-water", "2025-01-03").await;
    assert_eq!(first.action, ToggleAction::Checked);
    assert_eq!(first.check_in.unwrap().task_id, "morning-water");

    let listed: ApiResponse<Vec<CheckIn>> = client
        .get(format!(
            "{}/api/checkins?startDate=2025-01-01&endDate=2025-01-31",
            server.base_url
        ))
        .bearer_auth(&user)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let rows = listed.data.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].date, date(2025, 1, 3));

    let second = toggle(&client, &server.base_url, &user, "morning-water", "2025-01-03").await;
    assert_eq!(second.action, ToggleAction::Unchecked);
    assert!(second.check_in.is_none());
}

#[tokio::test]
async fn http_requests_without_token_are_rejected() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;
    let client = Client::new();

    let response = client
        .get(format!("{}/api/tasks", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: ApiResponse<serde_json::Value> = response.json().await.unwrap();
    assert!(!body.success);
    assert!(body.error.is_some());
}

#[tokio::test]
async fn http_unknown_task_is_not_found() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;
    let client = Client::new();

    let response = client
        .post(format!("{}/api/checkins", server.base_url))
        .bearer_auth(unique_user())
        .json(&serde_json::json!({ "taskId": "no-such-task", "date": "2025-01-03" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn http_malformed_bodies_use_error_envelope() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;
    let client = Client::new();
    let user = unique_user();

    let syntax = client
        .post(format!("{}/api/checkins", server.base_url))
        .bearer_auth(&user)
        .header("content-type", "application/json")
        .body("{ nope")
        .send()
        .await
        .unwrap();
    assert_eq!(syntax.status(), StatusCode::BAD_REQUEST);
    let body: ApiResponse<serde_json::Value> = syntax.json().await.unwrap();
    assert!(!body.success);
    assert!(body.error.is_some());

    let wrong_type = client
        .put(format!("{}/api/user", server.base_url))
        .bearer_auth(&user)
        .json(&serde_json::json!({ "name": 5 }))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong_type.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: ApiResponse<serde_json::Value> = wrong_type.json().await.unwrap();
    assert!(!body.success);
}

#[tokio::test]
async fn http_oversized_monthly_stats_are_rejected() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;
    let client = Client::new();

    let response = client
        .get(format!(
            "{}/api/stats?type=monthly&startDate=0001-01-01&endDate=9999-12-31",
            server.base_url
        ))
        .bearer_auth(unique_user())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: ApiResponse<serde_json::Value> = response.json().await.unwrap();
    assert!(!body.success);
}

#[tokio::test]
async fn http_daily_stats_count_check_ins() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;
    let client = Client::new();
    let user = unique_user();

    toggle(&client, &server.base_url, &user, "morning-water", "2025-02-10").await;
    toggle(&client, &server.base_url, &user, "growth-read", "2025-02-10").await;

    let stats: ApiResponse<StatsReport> = client
        .get(format!(
            "{}/api/stats?type=daily&startDate=2025-02-09&endDate=2025-02-10",
            server.base_url
        ))
        .bearer_auth(&user)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    match stats.data.unwrap() {
        StatsReport::Daily { days } => {
            assert_eq!(days.len(), 2);
            assert_eq!(days[0].completed, 0);
            assert_eq!(days[1].date, date(2025, 2, 10));
            assert_eq!(days[1].completed, 2);
        }
        other => panic!("expected daily stats, got {other:?}"),
    }
}

#[tokio::test]
async fn http_user_profile_update_and_delete() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;
    let client = Client::new();
    let user = unique_user();

    let updated: ApiResponse<UserProfile> = client
        .put(format!("{}/api/user", server.base_url))
        .bearer_auth(&user)
        .json(&serde_json::json!({ "name": "Ada" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let profile = updated.data.unwrap();
    assert_eq!(profile.id, user);
    assert_eq!(profile.name.as_deref(), Some("Ada"));
    assert_eq!(profile.settings.timezone, "UTC");

    let deleted: ApiResponse<DeleteResponse> = client
        .delete(format!("{}/api/user", server.base_url))
        .bearer_auth(&user)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(deleted.data.unwrap().deleted);
}

#[tokio::test]
async fn coordinator_migrates_local_history_into_the_account() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;
    let user = unique_user();

    let config = ClientConfig {
        api_url: server.base_url.clone(),
        ..ClientConfig::default()
    };
    let clock = Arc::new(ManualClock::at_date(date(2025, 1, 3)));
    let mut coordinator = config.build_coordinator_with(Arc::new(MemoryStorage::new()), clock);

    let local = coordinator.toggle_task("morning-water").await.unwrap();
    assert_eq!(local.source, DataSource::Local);
    assert!(local.completed);

    let outcome = coordinator
        .set_user(Some(Session {
            user_id: user.clone(),
            token: user.clone(),
        }))
        .await
        .unwrap();
    assert_eq!(outcome, LoginOutcome::MigrationPrompt { pending_entries: 1 });

    let report = coordinator.accept_migration().await.unwrap();
    assert_eq!(report.migrated_count, 1);
    assert!(report.failures.is_empty());
    assert_eq!(coordinator.data_source(), DataSource::Cloud);
    assert!(coordinator
        .current_data()
        .check_in_history
        .is_checked(date(2025, 1, 3), "morning-water"));
    assert_eq!(coordinator.streak().current, 1);

    let cloud = coordinator.toggle_task("morning-water").await.unwrap();
    assert_eq!(cloud.source, DataSource::Cloud);
    assert!(!cloud.completed);

    coordinator.refresh().await.unwrap();
    assert!(!coordinator
        .current_data()
        .check_in_history
        .is_checked(date(2025, 1, 3), "morning-water"));
}

#[tokio::test]
async fn coordinator_stays_local_when_api_is_unreachable() {
    let config = ClientConfig {
        api_url: format!("http://127.0.0.1:{}", pick_free_port()),
        ..ClientConfig::default()
    };
    let clock = Arc::new(ManualClock::at_date(date(2025, 1, 3)));
    let mut coordinator = config.build_coordinator_with(Arc::new(MemoryStorage::new()), clock);

    let result = coordinator
        .set_user(Some(Session {
            user_id: "offline".to_string(),
            token: "offline".to_string(),
        }))
        .await;
    assert!(result.is_err());
    assert_eq!(coordinator.data_source(), DataSource::Local);

    let outcome = coordinator.toggle_task("health-sleep").await.unwrap();
    assert_eq!(outcome.source, DataSource::Local);
    assert!(outcome.completed);
}
