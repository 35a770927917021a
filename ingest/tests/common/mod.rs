use std::net::SocketAddr;
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use ingest::config::Config;
use ingest::server::serve;

pub fn random_string(prefix: &str, length: usize) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(Alphanumeric)
        .take(length)
        .map(char::from)
        .collect();
    format!("{}_{}", prefix, suffix)
}

/// Config pointing at a fresh database under the system temp directory.
pub fn test_config() -> Config {
    let db_path = std::env::temp_dir()
        .join(random_string("ingest_test", 12))
        .join("dedup.db");

    Config {
        address: "127.0.0.1:0".parse().unwrap(),
        database_path: db_path.to_string_lossy().into_owned(),
        queue_capacity: 10_000,
        sink_delay_ms: 0,
        export_prometheus: false,
        cleanup_interval_secs: 0,
        cleanup_max_age_days: 30,
    }
}

/// A real server on an ephemeral port, torn down when the handle drops.
pub struct ServerHandle {
    pub addr: SocketAddr,
    server: JoinHandle<()>,
}

impl ServerHandle {
    pub async fn for_config(config: Config) -> ServerHandle {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind listener");
        let addr = listener.local_addr().expect("failed to read local addr");

        let server = tokio::spawn(serve(config, listener, std::future::pending()));

        ServerHandle { addr, server }
    }

    pub async fn publish(&self, body: &Value) -> reqwest::Response {
        reqwest::Client::new()
            .post(format!("http://{}/publish", self.addr))
            .json(body)
            .send()
            .await
            .expect("failed to send publish request")
    }

    pub async fn publish_raw(&self, body: String) -> reqwest::Response {
        reqwest::Client::new()
            .post(format!("http://{}/publish", self.addr))
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .expect("failed to send publish request")
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        reqwest::Client::new()
            .get(format!("http://{}{}", self.addr, path))
            .send()
            .await
            .expect("failed to send request")
    }

    pub async fn stats(&self) -> Value {
        self.get("/stats")
            .await
            .json()
            .await
            .expect("failed to parse stats")
    }

    /// Polls /stats until the consumer has committed `expected` events.
    pub async fn wait_for_unique_processed(&self, expected: u64) {
        for _ in 0..100 {
            if self.stats().await["unique_processed"] == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("timed out waiting for {} processed events", expected);
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.server.abort();
    }
}
