use super::idle::IdleCompletionDetector;
use super::models::{RequestMeta, ResourceError, ResponseMeta};
use super::registry::{Applied, ResourceLog, ResourceRegistry};
use crate::config::ScanOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// The closed set of lifecycle events the monitor understands.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    RequestStarted(RequestMeta),
    /// Response notification; only the `End` stage commits a response.
    ResponseEnded(ResponseMeta),
    ResourceErrored(ResourceError),
}

/// State for one scan: resolved options, the resource table, and the idle detector.
pub struct ScanSession {
    scan_id: Uuid,
    options: Arc<ScanOptions>,
    registry: ResourceRegistry,
    detector: IdleCompletionDetector,
    requests_seen: usize,
    last_activity_at: Option<Instant>,
}

impl ScanSession {
    pub fn new(options: Arc<ScanOptions>) -> Self {
        let detector =
            IdleCompletionDetector::new(Duration::from_millis(options.idle_timeout_ms));
        Self {
            scan_id: Uuid::new_v4(),
            options,
            registry: ResourceRegistry::new(),
            detector,
            requests_seen: 0,
            last_activity_at: None,
        }
    }

    pub fn scan_id(&self) -> Uuid {
        self.scan_id
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    pub fn detector(&self) -> &IdleCompletionDetector {
        &self.detector
    }

    pub fn detector_mut(&mut self) -> &mut IdleCompletionDetector {
        &mut self.detector
    }

    pub fn requests_seen(&self) -> usize {
        self.requests_seen
    }

    pub fn last_activity_at(&self) -> Option<Instant> {
        self.last_activity_at
    }

    pub fn resource_timeout(&self) -> Duration {
        Duration::from_millis(self.options.resource_timeout_ms)
    }

    pub fn dispatch(&mut self, event: ScanEvent, now: Instant) -> Applied {
        self.touch(now);
        match event {
            ScanEvent::RequestStarted(request) => {
                self.requests_seen += 1;
                tracing::debug!("[{}] request {} {}", request.id, request.method, request.url);
                self.registry.on_request(request, now)
            }
            ScanEvent::ResponseEnded(response) => {
                tracing::trace!("[{}] response {:?} {:?}", response.id, response.stage, response.status);
                self.registry.on_response(response)
            }
            ScanEvent::ResourceErrored(error) => {
                tracing::debug!(
                    "[{}] error {} {} ({})",
                    error.id,
                    error.error_code,
                    error.error_string,
                    error.url
                );
                self.registry.on_error(error)
            }
        }
    }

    /// Counts as activity so the scan does not finish while work is still landing.
    pub fn touch(&mut self, now: Instant) {
        self.last_activity_at = Some(now);
        self.detector.record_activity(now);
    }

    pub fn expire_overdue(&mut self, now: Instant) -> usize {
        let timeout = self.resource_timeout();
        let expired = self.registry.expire_overdue(now, timeout);
        for id in &expired {
            tracing::debug!("[{}] timed out after {}ms", id, timeout.as_millis());
        }
        if !expired.is_empty() {
            self.touch(now);
        }
        expired.len()
    }

    pub fn next_expiry(&self) -> Option<Instant> {
        self.registry.next_expiry(self.resource_timeout())
    }

    pub fn snapshot(&self) -> ResourceLog {
        self.registry.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::models::TransferStage;

    fn session() -> ScanSession {
        ScanSession::new(Arc::new(ScanOptions::default()))
    }

    #[test]
    fn test_every_event_resets_idle_deadline() {
        let mut s = session();
        let start = Instant::now();
        assert!(s.detector().deadline().is_none());

        s.dispatch(
            ScanEvent::RequestStarted(RequestMeta::get_request("1", "http://a.test/")),
            start,
        );
        let first = s.detector().deadline().unwrap();

        let later = start + Duration::from_secs(2);
        s.dispatch(
            ScanEvent::ResponseEnded(ResponseMeta::new("1", "http://a.test/", TransferStage::Start)),
            later,
        );
        assert!(s.detector().deadline().unwrap() > first);

        let latest = start + Duration::from_secs(4);
        s.dispatch(
            ScanEvent::ResourceErrored(ResourceError::new("nope", "http://b.test/", 3, "x")),
            latest,
        );
        assert_eq!(
            s.detector().deadline(),
            Some(latest + s.detector().quiet_interval())
        );
        assert_eq!(s.last_activity_at(), Some(latest));
    }

    #[test]
    fn test_requests_seen_counts_request_events_only() {
        let mut s = session();
        let now = Instant::now();
        s.dispatch(ScanEvent::RequestStarted(RequestMeta::get_request("1", "http://a.test/")), now);
        s.dispatch(
            ScanEvent::ResponseEnded(ResponseMeta::new("1", "http://a.test/", TransferStage::End)),
            now,
        );
        s.dispatch(ScanEvent::RequestStarted(RequestMeta::get_request("2", "http://a.test/x")), now);
        assert_eq!(s.requests_seen(), 2);
        assert_eq!(s.registry().counts().completed, 1);
    }

    #[test]
    fn test_expire_overdue_counts_as_activity() {
        let mut s = session();
        let start = Instant::now();
        s.dispatch(ScanEvent::RequestStarted(RequestMeta::get_request("1", "http://a.test/")), start);

        let overdue = start + s.resource_timeout();
        assert_eq!(s.next_expiry(), Some(overdue));
        assert_eq!(s.expire_overdue(overdue), 1);
        assert_eq!(s.last_activity_at(), Some(overdue));
        assert!(s.next_expiry().is_none());
    }
}
