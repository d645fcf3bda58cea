use async_trait::async_trait;
use futures::future::{select, Either};
use gloo_timers::future::TimeoutFuture;
use std::future::Future;

/// Suspends the orchestrator between steps.
#[async_trait(?Send)]
pub trait Pause {
    async fn pause(&self, ms: u32);
}

/// Browser timer (`setTimeout`).
#[derive(Debug, Clone, Copy, Default)]
pub struct TimerPause;

#[async_trait(?Send)]
impl Pause for TimerPause {
    async fn pause(&self, ms: u32) {
        if ms > 0 {
            TimeoutFuture::new(ms).await;
        }
    }
}

/// Marker returned when a raced future loses to its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed(pub u32);

/// Races `future` against a browser timer. `None` waits without a deadline.
pub async fn with_timeout<F: Future>(future: F, timeout_ms: Option<u32>) -> Result<F::Output, Elapsed> {
    let Some(ms) = timeout_ms else {
        return Ok(future.await);
    };
    match select(Box::pin(future), TimeoutFuture::new(ms)).await {
        Either::Left((output, _)) => Ok(output),
        Either::Right((_, _)) => Err(Elapsed(ms)),
    }
}
