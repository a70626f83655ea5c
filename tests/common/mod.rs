#![allow(dead_code)]

use once_cell::sync::Lazy;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::net::TcpListener;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;

pub struct TestServer {
    pub base_url: String,
    child: Child,
    _data_dir: tempfile::TempDir,
}

impl TestServer {
    pub fn api_url(&self) -> String {
        format!("{}/api", self.base_url)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

static SERVER: Lazy<Mutex<Option<Arc<TestServer>>>> = Lazy::new(|| Mutex::new(None));
static NEXT_USER: AtomicU32 = AtomicU32::new(0);

#[cfg(unix)]
mod cleanup {
    use std::sync::Once;
    use std::sync::atomic::{AtomicI32, Ordering};

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

async fn wait_until_ready(base_url: &str) {
    let client = Client::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(resp) = client.get(format!("{base_url}/health")).send().await {
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
    let data_dir = tempfile::tempdir().expect("create data dir");
    let child = Command::new(env!("CARGO_BIN_EXE_drivers_ledger"))
        .env("PORT", port.to_string())
        .env("LEDGER_PROVIDER", "local")
        .env("LEDGER_DATA_PATH", data_dir.path().join("ledger.json"))
        .env("RUST_LOG", "info")
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .expect("failed to spawn server");

    #[cfg(unix)]
    cleanup::register(child.id());

    let base_url = format!("http://127.0.0.1:{port}");
    wait_until_ready(&base_url).await;

    TestServer {
        base_url,
        child,
        _data_dir: data_dir,
    }
}

pub async fn shared_server() -> Arc<TestServer> {
    let mut guard = SERVER.lock().await;
    if let Some(server) = guard.as_ref() {
        return Arc::clone(server);
    }
    let server = Arc::new(spawn_server().await);
    *guard = Some(Arc::clone(&server));
    server
}

/// A fresh email so tests sharing the server never collide.
pub fn unique_email(prefix: &str) -> String {
    let n = NEXT_USER.fetch_add(1, Ordering::SeqCst);
    format!("{prefix}-{}-{n}@example.com", std::process::id())
}

#[derive(Debug, Deserialize)]
struct LoginBody {
    session: SessionBody,
}

#[derive(Debug, Deserialize)]
struct SessionBody {
    access_token: String,
}

/// Signs a new user up and returns their access token.
pub async fn signup_and_login(server: &TestServer, prefix: &str) -> String {
    let client = Client::new();
    let email = unique_email(prefix);
    let credentials = json!({ "email": email, "password": "secret-pass" });

    let response = client
        .post(format!("{}/auth/signup", server.api_url()))
        .json(&credentials)
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success(), "signup failed");

    let response = client
        .post(format!("{}/auth/login", server.api_url()))
        .json(&credentials)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: LoginBody = response.json().await.unwrap();
    body.session.access_token
}

pub async fn error_message(response: Response) -> String {
    let body: serde_json::Value = response.json().await.unwrap();
    body["error"].as_str().unwrap_or_default().to_string()
}
