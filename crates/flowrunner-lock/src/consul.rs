//! Lock materialized as a key in Consul's KV store.
//!
//! Acquisition creates a session and tries a single `acquire` on the key.
//! Consul answers `true` when the session now owns the key and `false` when
//! another session does. Release gives the key back and destroys the session.
//!
//! Sessions carry a TTL and are renewed in the background while the lock is
//! held, so the key is freed once a crashed holder stops renewing.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use tokio::task::JoinHandle;

use crate::error::{LockError, Result};
use crate::Lock;

/// Session TTL used by [`ConsulLock::new`].
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(15);

/// A lock on a Consul KV key.
#[derive(Debug)]
pub struct ConsulLock {
    client: reqwest::Client,
    base_url: String,
    key: String,
    ttl: Duration,
    session: Mutex<Option<HeldSession>>,
}

#[derive(Debug)]
struct HeldSession {
    id: String,
    renewal: JoinHandle<()>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SessionRequest<'a> {
    name: &'a str,
    behavior: &'a str,
    #[serde(rename = "TTL")]
    ttl: String,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    #[serde(rename = "ID")]
    id: String,
}

impl ConsulLock {
    /// Create a lock on `key` at the Consul agent `address`.
    ///
    /// `address` may omit the scheme (`consul:8500`), in which case plain
    /// HTTP is used.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(address: &str, key: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| LockError::Consul(format!("failed to create HTTP client: {e}")))?;

        Ok(Self::with_client(client, address, key))
    }

    /// Create a lock with a custom reqwest client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, address: &str, key: &str) -> Self {
        let address = address.trim_end_matches('/');
        let base_url = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };

        Self {
            client,
            base_url,
            key: key.trim_start_matches('/').to_string(),
            ttl: DEFAULT_SESSION_TTL,
            session: Mutex::new(None),
        }
    }

    /// Use `ttl` for sessions created by this lock.
    ///
    /// The session is renewed every half TTL while the lock is held.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// The KV key guarded by this lock.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    async fn put_bool(&self, url: &str, body: String) -> Result<bool> {
        let response = self
            .client
            .put(url)
            .body(body)
            .send()
            .await
            .map_err(|e| LockError::Consul(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LockError::Consul(format!("{url} returned status {status}")));
        }

        response
            .json::<bool>()
            .await
            .map_err(|e| LockError::Consul(format!("unexpected response from {url}: {e}")))
    }

    async fn create_session(&self) -> Result<String> {
        let url = format!("{}/v1/session/create", self.base_url);
        let request = SessionRequest {
            name: "flowrunner",
            behavior: "release",
            ttl: format!("{}ms", self.ttl.as_millis()),
        };

        let response = self
            .client
            .put(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LockError::Consul(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LockError::Consul(format!(
                "session creation returned status {status}"
            )));
        }

        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| LockError::Consul(format!("invalid session response: {e}")))?;
        Ok(session.id)
    }

    async fn destroy_session(&self, session: &str) -> Result<()> {
        let url = format!("{}/v1/session/destroy/{session}", self.base_url);
        self.put_bool(&url, String::new()).await.map(|_| ())
    }

    fn spawn_renewal(&self, session: &str) -> JoinHandle<()> {
        let client = self.client.clone();
        let url = format!("{}/v1/session/renew/{session}", self.base_url);
        let period = (self.ttl / 2).max(Duration::from_millis(10));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match client.put(&url).send().await {
                    Ok(response) if response.status().is_success() => {}
                    Ok(response) if response.status() == reqwest::StatusCode::NOT_FOUND => {
                        tracing::warn!(url = %url, "Consul session expired; lock is lost");
                        return;
                    }
                    Ok(response) => {
                        tracing::warn!(url = %url, status = %response.status(), "Consul session renewal failed");
                    }
                    Err(e) => {
                        tracing::warn!(url = %url, error = %e, "Consul session renewal failed");
                    }
                }
            }
        })
    }
}

impl Drop for ConsulLock {
    fn drop(&mut self) {
        if let Some(held) = self.session.get_mut().take() {
            held.renewal.abort();
        }
    }
}

#[async_trait]
impl Lock for ConsulLock {
    async fn try_acquire(&self) -> Result<()> {
        if self.session.lock().is_some() {
            return Ok(());
        }

        let session = self.create_session().await?;
        let url = format!("{}/v1/kv/{}?acquire={session}", self.base_url, self.key);
        let holder = format!("flowrunner pid {}", std::process::id());

        match self.put_bool(&url, holder).await {
            Ok(true) => {
                tracing::debug!(key = %self.key, session = %session, "Acquired consul lock");
                let renewal = self.spawn_renewal(&session);
                *self.session.lock() = Some(HeldSession {
                    id: session,
                    renewal,
                });
                Ok(())
            }
            Ok(false) => {
                if let Err(e) = self.destroy_session(&session).await {
                    tracing::warn!(session = %session, error = %e, "Failed to destroy unused session");
                }
                Err(LockError::Held(self.key.clone()))
            }
            Err(e) => {
                if let Err(destroy) = self.destroy_session(&session).await {
                    tracing::warn!(session = %session, error = %destroy, "Failed to destroy unused session");
                }
                Err(e)
            }
        }
    }

    async fn release(&self) -> Result<()> {
        let Some(session) = self.session.lock().as_ref().map(|held| held.id.clone()) else {
            return Err(LockError::NotHeld(self.key.clone()));
        };

        let url = format!("{}/v1/kv/{}?release={session}", self.base_url, self.key);
        if !self.put_bool(&url, String::new()).await? {
            return Err(LockError::NotHeld(self.key.clone()));
        }

        if let Some(held) = self.session.lock().take() {
            held.renewal.abort();
        }
        self.destroy_session(&session).await?;
        tracing::debug!(key = %self.key, "Released consul lock");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_session(server: &MockServer) {
        Mock::given(method("PUT"))
            .and(path("/v1/session/create"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ID": "sess-1" })))
            .mount(server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1/session/destroy/sess-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(true)))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn acquire_and_release() {
        let server = MockServer::start().await;
        mount_session(&server).await;
        Mock::given(method("PUT"))
            .and(path("/v1/kv/locks/run"))
            .and(query_param("acquire", "sess-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(true)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1/kv/locks/run"))
            .and(query_param("release", "sess-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(true)))
            .expect(1)
            .mount(&server)
            .await;

        let lock = ConsulLock::new(&server.uri(), "/locks/run").unwrap();
        assert_eq!(lock.key(), "locks/run");

        lock.try_acquire().await.unwrap();
        lock.release().await.unwrap();
    }

    #[tokio::test]
    async fn contested_key_is_held() {
        let server = MockServer::start().await;
        mount_session(&server).await;
        Mock::given(method("PUT"))
            .and(path("/v1/kv/locks/run"))
            .and(query_param("acquire", "sess-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(false)))
            .mount(&server)
            .await;

        let lock = ConsulLock::new(&server.uri(), "locks/run").unwrap();
        let err = lock.try_acquire().await.unwrap_err();
        assert!(err.is_held());
    }

    #[test]
    fn session_id_decodes_from_consul_shape() {
        let session: SessionResponse = serde_json::from_value(json!({ "ID": "adf4238a" })).unwrap();
        assert_eq!(session.id, "adf4238a");
    }

    #[tokio::test]
    async fn session_has_ttl_and_is_renewed_while_held() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/session/create"))
            .and(body_partial_json(json!({ "Behavior": "release", "TTL": "200ms" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ID": "sess-1" })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1/session/destroy/sess-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(true)))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1/session/renew/sess-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "ID": "sess-1" }])))
            .expect(1..)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1/kv/locks/run"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(true)))
            .mount(&server)
            .await;

        let lock = ConsulLock::new(&server.uri(), "locks/run")
            .unwrap()
            .with_ttl(Duration::from_millis(200));
        lock.try_acquire().await.unwrap();
        tokio::time::sleep(Duration::from_millis(350)).await;
        lock.release().await.unwrap();
        assert!(lock.session.lock().is_none());
    }

    #[tokio::test]
    async fn release_without_acquire_is_not_held() {
        let lock = ConsulLock::new("127.0.0.1:1", "locks/run").unwrap();
        let err = lock.release().await.unwrap_err();
        assert!(matches!(err, LockError::NotHeld(_)));
    }

    #[tokio::test]
    async fn server_error_is_consul_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/session/create"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let lock = ConsulLock::new(&server.uri(), "locks/run").unwrap();
        let err = lock.try_acquire().await.unwrap_err();
        assert!(matches!(err, LockError::Consul(_)));
    }

    #[test]
    fn address_without_scheme_uses_http() {
        let lock = ConsulLock::new("consul.service:8500/", "k").unwrap();
        assert_eq!(lock.base_url, "http://consul.service:8500");
    }
}
