//! Shared, pooled HTTP clients keyed by base URL.
//!
//! One `reqwest::Client` per base URL, lazily created and reused so
//! connections, DNS lookups, and TLS handshakes are not paid for on every
//! invocation. Tuning mirrors long-lived agent workloads: idle connections
//! are kept warm for 90s, up to 10 per host, with a keepalive ping every
//! 60s.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use lazy_static::lazy_static;

lazy_static! {
    static ref HTTP_CLIENT_POOL: Mutex<HashMap<String, reqwest::Client>> = Mutex::new(HashMap::new());
}

/// Get or create a shared `reqwest::Client` for `base_url`.
pub fn get_shared_http_client(base_url: &str) -> reqwest::Client {
    let mut pool = HTTP_CLIENT_POOL.lock().unwrap();
    if let Some(client) = pool.get(base_url) {
        return client.clone();
    }
    let client = reqwest::ClientBuilder::new()
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .pool_max_idle_per_host(10)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .timeout(Duration::from_secs(300))
        .connect_timeout(Duration::from_secs(30))
        .build()
        .expect("failed to build shared HTTP client");
    pool.insert(base_url.to_string(), client.clone());
    client
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_base_url_returns_a_reusable_client() {
        let a = get_shared_http_client("https://api.example.test");
        let b = get_shared_http_client("https://api.example.test");
        // reqwest::Client is a cheap Arc-backed handle; we can't compare
        // pointer identity through its public API, but we can at least
        // confirm the pool doesn't panic on repeated lookups and returns
        // usable clients.
        drop(a);
        drop(b);
    }
}
