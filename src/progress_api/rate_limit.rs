use std::{num::NonZeroU32, sync::Arc};

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use poem::{Endpoint, IntoResponse, Middleware, Request, Response, http::StatusCode};

/// Per-client request quota, keyed by remote IP.
#[derive(Clone)]
pub struct RateLimit {
    limiter: Option<Arc<DefaultKeyedRateLimiter<String>>>,
}

impl RateLimit {
    /// `0` disables limiting.
    pub fn per_minute(requests: u32) -> Self {
        let limiter = NonZeroU32::new(requests)
            .map(|requests| Arc::new(RateLimiter::keyed(Quota::per_minute(requests))));
        Self { limiter }
    }
}

impl<E: Endpoint> Middleware<E> for RateLimit {
    type Output = RateLimitEndpoint<E>;

    fn transform(&self, ep: E) -> Self::Output {
        RateLimitEndpoint {
            inner: ep,
            limiter: self.limiter.clone(),
        }
    }
}

pub struct RateLimitEndpoint<E> {
    inner: E,
    limiter: Option<Arc<DefaultKeyedRateLimiter<String>>>,
}

fn client_key(req: &Request) -> String {
    let remote = req.remote_addr();
    match remote.as_socket_addr() {
        Some(addr) => addr.ip().to_string(),
        None => remote.to_string(),
    }
}

impl<E: Endpoint> Endpoint for RateLimitEndpoint<E> {
    type Output = Response;

    async fn call(&self, req: Request) -> poem::Result<Self::Output> {
        if let Some(limiter) = &self.limiter {
            let key = client_key(&req);
            if limiter.check_key(&key).is_err() {
                tracing::warn!(client = %key, path = %req.uri().path(), "rate limit exceeded");
                return Ok(Response::builder()
                    .status(StatusCode::TOO_MANY_REQUESTS)
                    .body("Too many requests, please try again later"));
            }
        }
        self.inner.call(req).await.map(IntoResponse::into_response)
    }
}
