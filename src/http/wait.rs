//! Waiting for one of several URLs to answer
//!
//! Right after boot the metadata service may not be listening yet, or may
//! answer very slowly. [`HttpClient::race_until_ready`] keeps sweeping a
//! list of candidate URLs until one of them returns a useful response, but
//! never for longer than a wall-clock budget.

use std::time::Duration;
use tracing::debug;

use super::{HttpClient, Response, UrlRequest};
use crate::error::UrlError;

/// Receives a message for every failed probe
pub type StatusCallback<'a> = Box<dyn FnMut(&str) + Send + 'a>;

/// Receives the message and the error of every failed probe
pub type FailureCallback<'a> = Box<dyn FnMut(&str, &UrlError) + Send + 'a>;

/// Optional observers for [`HttpClient::race_until_ready_with`]
#[derive(Default)]
pub struct WaitCallbacks<'a> {
    pub on_status: Option<StatusCallback<'a>>,
    pub on_failure: Option<FailureCallback<'a>>,
}

impl HttpClient {
    /// Poll `urls` until one answers with a non-empty `2xx` response.
    ///
    /// See [`HttpClient::race_until_ready_with`].
    pub async fn race_until_ready(
        &self,
        urls: &[String],
        max_wait: Duration,
        timeout: Option<Duration>,
    ) -> Option<(String, Response)> {
        self.race_until_ready_with(urls, max_wait, timeout, WaitCallbacks::default())
            .await
    }

    /// Poll `urls` in round-robin passes until one answers usefully.
    ///
    /// A response counts only when its body is non-empty and its status is
    /// `2xx`. The per-request `timeout` shrinks as the deadline approaches so
    /// a pass never runs past `max_wait`, measured from the call. Passes are
    /// separated by a delay that grows by one interval every five passes. A
    /// zero `max_wait` makes a single pass. Returns `None` once the budget is
    /// spent.
    pub async fn race_until_ready_with(
        &self,
        urls: &[String],
        max_wait: Duration,
        timeout: Option<Duration>,
        mut callbacks: WaitCallbacks<'_>,
    ) -> Option<(String, Response)> {
        let clock = self.clock.clone();
        let start = clock.now();
        let deadline = start + max_wait;
        let time_up = || max_wait.is_zero() || clock.now().duration_since(start) > max_wait;

        let mut timeout = timeout;
        let mut pass: u32 = 0;

        loop {
            let sleep_time = self.policy.delay_for(pass);

            for url in urls {
                if pass != 0 {
                    if time_up() {
                        break;
                    }
                    let now = clock.now();
                    if let Some(t) = timeout {
                        if now + t > deadline {
                            timeout = Some(deadline.saturating_duration_since(now));
                        }
                    }
                }

                let request = UrlRequest::get(url.as_str())
                    .check_status(false)
                    .timeout(timeout);

                let failure = match self.read_url(&request).await {
                    Ok(response) if response.contents.is_empty() => UrlError::status(
                        format!("empty response [{}]", response.status),
                        response.status,
                        response.headers,
                    ),
                    Ok(response) if !response.ok(false) => UrlError::status(
                        format!("bad status code [{}]", response.status),
                        response.status,
                        response.headers,
                    ),
                    Ok(response) => return Some((url.clone(), response)),
                    Err(mut e) => {
                        e.cause = format!("request error [{}]", e.cause);
                        e
                    }
                };

                let taken = clock.now().duration_since(start).as_secs();
                let message = format!(
                    "Calling '{}' failed [{}/{}s]: {}",
                    url,
                    taken,
                    max_wait.as_secs(),
                    failure
                );
                match callbacks.on_status.as_mut() {
                    Some(on_status) => on_status(&message),
                    None => debug!("{}", message),
                }
                if let Some(on_failure) = callbacks.on_failure.as_mut() {
                    on_failure(&message, &failure);
                }
            }

            if time_up() {
                break;
            }

            pass += 1;
            debug!("Please wait {:?} while we wait to try again", sleep_time);
            clock.sleep(sleep_time).await;
        }

        None
    }
}
