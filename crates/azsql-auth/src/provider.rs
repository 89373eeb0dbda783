//! Single-flight token provider
//!
//! Caches the current access token and guarantees at most one fetch is in
//! flight at a time. Concurrent callers that find the cache stale all await
//! one shared future instead of issuing parallel requests to Azure AD; a
//! failed fetch propagates the same error to every waiter and clears the
//! in-flight marker so the next caller starts a fresh attempt.
//!
//! `reset()` may race with an in-flight fetch. The settle step compares the
//! stored marker against the future the caller awaited and only records the
//! outcome when they still match, so a reset (or a newer refresh) is never
//! clobbered by a stale result.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::Shared;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::constants::DEFAULT_REFRESH_BUFFER_SECS;
use crate::credential::{AccessCredential, now_ms};
use crate::error::Result;
use crate::source::TokenSource;

type RefreshFuture = Shared<Pin<Box<dyn Future<Output = Result<AccessCredential>> + Send>>>;

struct State {
    credential: Option<AccessCredential>,
    in_flight: Option<RefreshFuture>,
}

/// Caching token provider with single-flight refresh.
pub struct TokenProvider {
    source: Arc<dyn TokenSource>,
    refresh_buffer: Duration,
    state: Mutex<State>,
}

impl TokenProvider {
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self::with_refresh_buffer(source, Duration::from_secs(DEFAULT_REFRESH_BUFFER_SECS))
    }

    pub fn with_refresh_buffer(source: Arc<dyn TokenSource>, refresh_buffer: Duration) -> Self {
        Self {
            source,
            refresh_buffer,
            state: Mutex::new(State {
                credential: None,
                in_flight: None,
            }),
        }
    }

    /// Whether a token is cached and its remaining lifetime exceeds the
    /// refresh buffer.
    pub async fn is_valid(&self) -> bool {
        let state = self.state.lock().await;
        state
            .credential
            .as_ref()
            .is_some_and(|c| c.is_valid_at(now_ms(), self.refresh_buffer))
    }

    /// Whether the cached token's lifetime has fully elapsed. No token at
    /// all counts as expired.
    pub async fn is_expired(&self) -> bool {
        let state = self.state.lock().await;
        state
            .credential
            .as_ref()
            .is_none_or(|c| c.is_expired_at(now_ms()))
    }

    /// Minutes until the cached token expires, rounded to the nearest whole
    /// minute. Returns -1 when no token is cached.
    pub async fn time_until_expiry_minutes(&self) -> i64 {
        let state = self.state.lock().await;
        state
            .credential
            .as_ref()
            .map_or(-1, |c| c.minutes_until_expiry_at(now_ms()))
    }

    /// A clone of the cached credential, valid or not.
    pub async fn current(&self) -> Option<AccessCredential> {
        let state = self.state.lock().await;
        state.credential.clone()
    }

    /// Return the cached token if still valid, otherwise fetch a new one.
    ///
    /// At most one fetch runs at a time; every caller that arrives while it
    /// is in flight awaits the same future and receives the same outcome.
    pub async fn refresh_if_needed(&self) -> Result<AccessCredential> {
        let shared = {
            let mut state = self.state.lock().await;

            if let Some(cred) = &state.credential {
                if cred.is_valid_at(now_ms(), self.refresh_buffer) {
                    return Ok(cred.clone());
                }
            }

            // A fetch whose awaiters were all cancelled can finish without
            // anyone running the settle step. Harvest it here.
            let settled = state.in_flight.as_ref().and_then(|f| f.peek().cloned());
            if let Some(result) = settled {
                state.in_flight = None;
                if let Ok(cred) = result {
                    if cred.is_valid_at(now_ms(), self.refresh_buffer) {
                        state.credential = Some(cred.clone());
                        return Ok(cred);
                    }
                }
            }

            match &state.in_flight {
                Some(f) => {
                    debug!("joining in-flight token refresh");
                    f.clone()
                }
                None => {
                    let f = self.start_refresh();
                    state.in_flight = Some(f.clone());
                    f
                }
            }
        };

        let result = shared.clone().await;
        self.settle(&shared, &result).await;
        result
    }

    /// Discard the cached token and fetch. An in-flight refresh is joined
    /// rather than duplicated, so a burst of forced refreshes still results
    /// in one request.
    pub async fn force_refresh(&self) -> Result<AccessCredential> {
        {
            let mut state = self.state.lock().await;
            state.credential = None;
        }
        self.refresh_if_needed().await
    }

    /// Clear the cached token and any in-flight marker. No network I/O;
    /// waiters already attached to an in-flight fetch still receive its
    /// outcome, but the result is not cached.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.credential = None;
        state.in_flight = None;
        debug!("token state cleared");
    }

    fn start_refresh(&self) -> RefreshFuture {
        let source = Arc::clone(&self.source);
        let fut = async move {
            debug!("requesting access token");
            match source.fetch().await {
                Ok(response) => {
                    let issued_at = now_ms();
                    let expires_at = issued_at + response.expires_in as i64 * 1000;
                    info!(expires_in = response.expires_in, "access token acquired");
                    Ok(AccessCredential {
                        token: response.access_token,
                        issued_at,
                        expires_at,
                    })
                }
                Err(err) => {
                    warn!(error = %err, "access token request failed");
                    Err(err)
                }
            }
        };
        (Box::pin(fut) as Pin<Box<dyn Future<Output = Result<AccessCredential>> + Send>>).shared()
    }

    /// Record the outcome of `ours` if it is still the stored in-flight
    /// fetch. A marker replaced by `reset()` or a later refresh wins over
    /// the stale result.
    async fn settle(&self, ours: &RefreshFuture, result: &Result<AccessCredential>) {
        let mut state = self.state.lock().await;
        let still_ours = state.in_flight.as_ref().is_some_and(|f| f.ptr_eq(ours));
        if !still_ours {
            return;
        }
        state.in_flight = None;
        if let Ok(cred) = result {
            state.credential = Some(cred.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::source::TokenResponse;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Source that counts fetches and can be flipped into failure mode.
    struct StubSource {
        calls: AtomicUsize,
        fail: AtomicBool,
        expires_in: u64,
        delay: Duration,
    }

    impl StubSource {
        fn new(expires_in: u64) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                expires_in,
                delay: Duration::ZERO,
            })
        }

        fn slow(expires_in: u64, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                expires_in,
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TokenSource for StubSource {
        fn fetch(&self) -> Pin<Box<dyn Future<Output = Result<TokenResponse>> + Send + '_>> {
            Box::pin(async move {
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                let n = self.calls.fetch_add(1, Ordering::SeqCst);
                if self.fail.load(Ordering::SeqCst) {
                    Err(Error::Http("connection refused".into()))
                } else {
                    Ok(TokenResponse {
                        access_token: format!("tok-{n}"),
                        expires_in: self.expires_in,
                    })
                }
            })
        }
    }

    fn provider(source: Arc<StubSource>) -> TokenProvider {
        TokenProvider::new(source)
    }

    #[tokio::test]
    async fn first_call_fetches_a_token() {
        let source = StubSource::new(3600);
        let p = provider(source.clone());

        let cred = p.refresh_if_needed().await.unwrap();
        assert_eq!(cred.token, "tok-0");
        assert!(p.is_valid().await);
        assert!(!p.is_expired().await);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn valid_token_is_reused_without_fetching() {
        let source = StubSource::new(3600);
        let p = provider(source.clone());

        let first = p.refresh_if_needed().await.unwrap();
        let second = p.refresh_if_needed().await.unwrap();
        assert_eq!(first.token, second.token);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn token_inside_refresh_buffer_is_refetched() {
        // 240s lifetime sits inside the 300s buffer, so every call refetches.
        let source = StubSource::new(240);
        let p = provider(source.clone());

        let first = p.refresh_if_needed().await.unwrap();
        let second = p.refresh_if_needed().await.unwrap();
        assert_eq!(first.token, "tok-0");
        assert_eq!(second.token, "tok-1");
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_calls_share_one_fetch() {
        let source = StubSource::slow(3600, Duration::from_millis(50));
        let p = Arc::new(provider(source.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let p = p.clone();
            handles.push(tokio::spawn(async move {
                p.refresh_if_needed().await.unwrap().token
            }));
        }

        let mut tokens = Vec::new();
        for h in handles {
            tokens.push(h.await.unwrap());
        }
        assert!(tokens.iter().all(|t| t == "tok-0"), "tokens: {tokens:?}");
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_reaches_every_waiter_and_clears_the_marker() {
        let source = StubSource::slow(3600, Duration::from_millis(50));
        source.fail.store(true, Ordering::SeqCst);
        let p = Arc::new(provider(source.clone()));

        let a = tokio::spawn({
            let p = p.clone();
            async move { p.refresh_if_needed().await }
        });
        let b = tokio::spawn({
            let p = p.clone();
            async move { p.refresh_if_needed().await }
        });
        assert!(a.await.unwrap().is_err());
        assert!(b.await.unwrap().is_err());
        assert_eq!(source.calls(), 1, "both waiters share the failed fetch");

        // Marker cleared: the next call starts over and succeeds.
        source.fail.store(false, Ordering::SeqCst);
        let cred = p.refresh_if_needed().await.unwrap();
        assert_eq!(cred.token, "tok-1");
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn force_refresh_replaces_a_valid_token() {
        let source = StubSource::new(3600);
        let p = provider(source.clone());

        let first = p.refresh_if_needed().await.unwrap();
        let second = p.force_refresh().await.unwrap();
        assert_eq!(first.token, "tok-0");
        assert_eq!(second.token, "tok-1");
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn reset_clears_all_state_without_fetching() {
        let source = StubSource::new(3600);
        let p = provider(source.clone());

        p.refresh_if_needed().await.unwrap();
        p.reset().await;

        assert!(!p.is_valid().await);
        assert!(p.is_expired().await);
        assert_eq!(p.time_until_expiry_minutes().await, -1);
        assert!(p.current().await.is_none());
        assert_eq!(source.calls(), 1, "reset must not touch the network");
    }

    #[tokio::test(start_paused = true)]
    async fn reset_during_refresh_discards_the_stale_result() {
        let source = StubSource::slow(3600, Duration::from_millis(100));
        let p = Arc::new(provider(source.clone()));

        let refresh = tokio::spawn({
            let p = p.clone();
            async move { p.refresh_if_needed().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        p.reset().await;

        // The waiter still gets the fetched token back.
        let cred = refresh.await.unwrap().unwrap();
        assert_eq!(cred.token, "tok-0");

        // But the reset state was not clobbered by the stale settle.
        assert!(p.current().await.is_none());
        assert!(!p.is_valid().await);
    }

    #[tokio::test]
    async fn expiry_metrics_report_remaining_minutes() {
        let source = StubSource::new(3600);
        let p = provider(source.clone());

        assert_eq!(p.time_until_expiry_minutes().await, -1);
        p.refresh_if_needed().await.unwrap();
        assert_eq!(p.time_until_expiry_minutes().await, 60);
    }

    #[tokio::test]
    async fn missing_token_counts_as_expired_but_not_valid() {
        let source = StubSource::new(3600);
        let p = provider(source);

        assert!(!p.is_valid().await);
        assert!(p.is_expired().await);
    }
}
