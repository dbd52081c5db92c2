use std::num::NonZeroUsize;

use log::trace;
use lru::LruCache;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

use crate::error::{unavailable_error, StoreError};
use crate::types::Caller;

const CACHE_SIZE: NonZeroUsize = match NonZeroUsize::new(5000) {
    Some(size) => size,
    None => panic!("cache size must be non-zero"),
};

/// Resolves auth tokens into callers by asking the external auth service.
///
/// The service receives a POST to `auth_url + token` and answers 200 with
/// `{"id": .., "consumerKey": .., "isAdmin": ..}` for a valid token.
/// Without an `auth_url` every request is anonymous.
pub struct IdentityResolver {
    auth_url: Option<String>,
    client: reqwest::Client,
    ttl: Duration,
    cache: Mutex<LruCache<String, (Caller, Instant)>>,
}

impl IdentityResolver {
    pub fn new(auth_url: Option<String>, ttl: Duration) -> Self {
        Self {
            auth_url,
            client: reqwest::Client::new(),
            ttl,
            cache: Mutex::new(LruCache::new(CACHE_SIZE)),
        }
    }

    async fn get_from_cache(&self, token: &str) -> Option<Caller> {
        let mut cache = self.cache.lock().await;
        let stale = match cache.get(token) {
            Some((caller, at)) if at.elapsed() < self.ttl => {
                return Some(caller.clone())
            }
            Some(_) => true,
            None => false,
        };
        if stale {
            cache.pop(token);
        }
        None
    }

    async fn put_to_cache(&self, token: String, caller: Caller) {
        let mut cache = self.cache.lock().await;
        cache.put(token, (caller, Instant::now()));
    }

    /// `Ok(None)` is an anonymous request. A token the service rejects is
    /// an error, not an anonymous request.
    pub async fn resolve(
        &self,
        token: Option<&str>,
    ) -> Result<Option<Caller>, StoreError> {
        let (Some(auth_url), Some(token)) = (&self.auth_url, token) else {
            return Ok(None);
        };
        if let Some(caller) = self.get_from_cache(token).await {
            return Ok(Some(caller));
        }

        let url = format!("{}{}", auth_url, token);
        let res = self
            .client
            .post(url)
            .body("".to_string())
            .send()
            .await
            .map_err(unavailable_error)?;
        if res.status().is_server_error() {
            return Err(StoreError::unavailable("Authentication service failed"));
        }
        if res.status() != reqwest::StatusCode::OK {
            return Err(StoreError::auth_failed("Authentication failed"));
        }
        let body = res.text().await.map_err(unavailable_error)?;
        let Ok(caller) = serde_json::from_str::<Caller>(&body) else {
            return Err(StoreError::auth_failed("Authentication failed"));
        };
        trace!("identity: authorized request as {}", caller.id);
        self.put_to_cache(token.to_string(), caller.clone()).await;
        Ok(Some(caller))
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::protocol::ErrorCode;

    /// Serves `response` verbatim to the first connection and closes it.
    async fn auth_service(response: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });
        format!("http://{}/auth/", addr)
    }

    fn resolver(auth_url: String) -> IdentityResolver {
        IdentityResolver::new(Some(auth_url), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn valid_token_resolves_to_caller() {
        let body = r#"{"id":"alice","consumerKey":"c1","isAdmin":true}"#;
        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        let resolver = resolver(auth_service(response).await);
        let caller = resolver.resolve(Some("t")).await.unwrap();
        assert_eq!(caller, Some(Caller::admin("alice", "c1")));
        // second lookup is served from the cache, the service is gone
        assert_eq!(resolver.resolve(Some("t")).await.unwrap(), caller);
    }

    #[tokio::test]
    async fn rejected_token_is_auth_failure() {
        let url = auth_service("HTTP/1.1 403 Forbidden\r\ncontent-length: 0\r\n\r\n".to_string()).await;
        let err = resolver(url).resolve(Some("t")).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::AuthFailed);
    }

    #[tokio::test]
    async fn truncated_response_is_unavailable() {
        let url =
            auth_service("HTTP/1.1 200 OK\r\ncontent-length: 100\r\n\r\n{\"id\"".to_string()).await;
        let err = resolver(url).resolve(Some("t")).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Unavailable);
    }

    #[tokio::test]
    async fn unreachable_service_is_unavailable() {
        let err = resolver("http://127.0.0.1:1/auth/".to_string())
            .resolve(Some("t"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Unavailable);
    }

    #[tokio::test]
    async fn anonymous_without_auth_url_or_token() {
        let resolver = IdentityResolver::new(None, Duration::from_secs(60));
        assert_eq!(resolver.resolve(Some("token")).await.unwrap(), None);
        let resolver = IdentityResolver::new(
            Some("http://127.0.0.1:1/auth/".to_string()),
            Duration::from_secs(60),
        );
        assert_eq!(resolver.resolve(None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn cached_callers_expire() {
        let resolver = IdentityResolver::new(
            Some("http://127.0.0.1:1/auth/".to_string()),
            Duration::from_millis(50),
        );
        let alice = Caller::new("alice", "c1");
        resolver.put_to_cache("t".to_string(), alice.clone()).await;
        assert_eq!(resolver.resolve(Some("t")).await.unwrap(), Some(alice));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(resolver.get_from_cache("t").await, None);
    }
}
