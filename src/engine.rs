use crate::Result;
use crate::cookies::CookieSpec;
use crate::monitor::{RequestMeta, ResourceError, ResponseMeta};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Abort,
}

/// One-shot handle the engine holds for a paused request. The engine must not let
/// the request proceed until a verdict arrives; a dropped handle means abort.
#[derive(Debug)]
pub struct RequestControl {
    tx: oneshot::Sender<Verdict>,
}

impl RequestControl {
    pub fn channel() -> (Self, oneshot::Receiver<Verdict>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    pub fn send(self, verdict: Verdict) {
        // The engine may have gone away already; nothing left to decide then.
        self.tx.send(verdict).ok();
    }

    pub fn allow(self) {
        self.send(Verdict::Allow);
    }

    pub fn abort(self) {
        self.send(Verdict::Abort);
    }
}

/// Resolve a verdict receiver, treating a dropped handle as abort.
pub async fn await_verdict(rx: oneshot::Receiver<Verdict>) -> Verdict {
    rx.await.unwrap_or(Verdict::Abort)
}

#[derive(Debug)]
pub enum EngineEvent {
    RequestStarted {
        request: RequestMeta,
        control: RequestControl,
    },
    ResponseReceived(ResponseMeta),
    ResourceFailed(ResourceError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Same-origin enforcement; scans run with it off so cross-origin
    /// sub-resources are observable.
    pub web_security: bool,
    pub javascript_enabled: bool,
    pub resource_timeout: Duration,
}

#[async_trait]
pub trait RenderingEngine: Send {
    async fn apply_settings(&mut self, settings: &EngineSettings) -> Result<()>;

    async fn set_cookies(&mut self, cookies: &[CookieSpec]) -> Result<()>;

    /// Lifecycle event stream. Called once per scan, before `navigate`.
    async fn events(&mut self) -> Result<mpsc::Receiver<EngineEvent>>;

    /// Begins loading `url`. Must return without waiting for the load to finish,
    /// since the load itself blocks on request verdicts.
    async fn navigate(&mut self, url: &str) -> Result<()>;

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dropped_control_means_abort() {
        let (control, rx) = RequestControl::channel();
        drop(control);
        assert_eq!(await_verdict(rx).await, Verdict::Abort);
    }

    #[test]
    fn test_verdict_pending_until_released() {
        let (control, rx) = RequestControl::channel();
        let mut verdict = tokio_test::task::spawn(await_verdict(rx));
        tokio_test::assert_pending!(verdict.poll());

        control.allow();
        assert!(verdict.is_woken());
        tokio_test::assert_ready_eq!(verdict.poll(), Verdict::Allow);
    }
}
