use super::models::{
    RequestMeta, ResourceError, ResourceId, ResourceRecord, ResourceState, ResponseMeta,
    TransferStage,
};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Result of applying a lifecycle event to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Created,
    Replaced,
    Committed,
    /// Non-terminal stage, ignored.
    Progress,
    /// No record for the id.
    Untracked,
    /// Record already terminal; first terminal event wins.
    AlreadyTerminal,
}

#[derive(Debug, Default)]
pub struct ResourceRegistry {
    records: Vec<ResourceRecord>,
    index: HashMap<ResourceId, usize>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_request(&mut self, request: RequestMeta, now: Instant) -> Applied {
        let record = ResourceRecord {
            id: request.id.clone(),
            request,
            state: ResourceState::Pending,
            started_at: now,
        };

        match self.index.get(&record.id) {
            Some(&slot) => {
                tracing::debug!("Resource {} requested again, replacing record", record.id);
                self.records[slot] = record;
                Applied::Replaced
            }
            None => {
                self.index.insert(record.id.clone(), self.records.len());
                self.records.push(record);
                Applied::Created
            }
        }
    }

    pub fn on_response(&mut self, response: ResponseMeta) -> Applied {
        if response.stage != TransferStage::End {
            return Applied::Progress;
        }
        let id = response.id.clone();
        self.commit(&id, ResourceState::Completed(response))
    }

    pub fn on_error(&mut self, error: ResourceError) -> Applied {
        let id = error.id.clone();
        self.commit(&id, ResourceState::Failed(error))
    }

    fn commit(&mut self, id: &ResourceId, state: ResourceState) -> Applied {
        let Some(record) = self.get_mut(id) else {
            tracing::debug!("Dropping terminal event for untracked resource {}", id);
            return Applied::Untracked;
        };

        if record.state.is_terminal() {
            tracing::debug!("Resource {} already terminal, ignoring {:?}", id, state);
            return Applied::AlreadyTerminal;
        }

        record.state = state;
        Applied::Committed
    }

    pub fn get(&self, id: &ResourceId) -> Option<&ResourceRecord> {
        self.index.get(id).map(|&slot| &self.records[slot])
    }

    fn get_mut(&mut self, id: &ResourceId) -> Option<&mut ResourceRecord> {
        self.index.get(id).map(|&slot| &mut self.records[slot])
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Earliest instant at which a pending record outlives `timeout`.
    pub fn next_expiry(&self, timeout: Duration) -> Option<Instant> {
        self.records
            .iter()
            .filter(|r| r.is_pending())
            .map(|r| r.started_at + timeout)
            .min()
    }

    /// Fails every pending record started at least `timeout` before `now`.
    pub fn expire_overdue(&mut self, now: Instant, timeout: Duration) -> Vec<ResourceId> {
        let mut expired = Vec::new();
        for record in self.records.iter_mut() {
            if record.is_pending() && record.started_at + timeout <= now {
                record.state = ResourceState::Failed(ResourceError::timed_out(
                    record.id.clone(),
                    record.request.url.clone(),
                ));
                expired.push(record.id.clone());
            }
        }
        expired
    }

    pub fn counts(&self) -> ResourceCounts {
        let mut counts = ResourceCounts {
            total: self.records.len(),
            ..Default::default()
        };
        for record in &self.records {
            match &record.state {
                ResourceState::Pending => counts.pending += 1,
                ResourceState::Completed(_) => counts.completed += 1,
                ResourceState::Failed(e) if e.is_blocked() => counts.blocked += 1,
                ResourceState::Failed(_) => counts.failed += 1,
            }
        }
        counts
    }

    pub fn snapshot(&self) -> ResourceLog {
        ResourceLog {
            records: self.records.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResourceCounts {
    pub total: usize,
    pub pending: usize,
    pub completed: usize,
    pub failed: usize,
    pub blocked: usize,
}

/// Frozen registry contents, serialized as an id-keyed JSON object in request order.
#[derive(Debug, Clone, Default)]
pub struct ResourceLog {
    records: Vec<ResourceRecord>,
}

impl ResourceLog {
    pub fn records(&self) -> &[ResourceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn blocked_urls(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| r.error().is_some_and(ResourceError::is_blocked))
            .map(|r| r.request.url.clone())
            .collect()
    }
}

impl Serialize for ResourceLog {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.records.len()))?;
        for record in &self.records {
            map.serialize_entry(record.id.as_str(), record)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: &str, url: &str) -> RequestMeta {
        RequestMeta::get_request(id, url)
    }

    #[test]
    fn test_response_end_completes_record() {
        let mut registry = ResourceRegistry::new();
        let now = Instant::now();
        registry.on_request(request("1", "http://example.com/"), now);

        let applied = registry.on_response(
            ResponseMeta::new("1", "http://example.com/", TransferStage::End).with_status(200, "OK"),
        );

        assert_eq!(applied, Applied::Committed);
        let record = registry.get(&"1".into()).unwrap();
        assert_eq!(record.response().and_then(|r| r.status), Some(200));
        assert!(record.error().is_none());
    }

    #[test]
    fn test_progress_stage_keeps_record_pending() {
        let mut registry = ResourceRegistry::new();
        registry.on_request(request("1", "http://example.com/"), Instant::now());

        let applied =
            registry.on_response(ResponseMeta::new("1", "http://example.com/", TransferStage::Start));

        assert_eq!(applied, Applied::Progress);
        assert!(registry.get(&"1".into()).unwrap().is_pending());
    }

    #[test]
    fn test_error_for_untracked_id_is_dropped() {
        let mut registry = ResourceRegistry::new();
        let applied = registry.on_error(ResourceError::new("404", "http://x/", 3, "refused"));
        assert_eq!(applied, Applied::Untracked);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_first_terminal_event_wins() {
        let mut registry = ResourceRegistry::new();
        registry.on_request(request("1", "http://10.0.0.5/"), Instant::now());

        assert_eq!(
            registry.on_error(ResourceError::blocked("1", "http://10.0.0.5/")),
            Applied::Committed
        );
        assert_eq!(
            registry.on_error(ResourceError::new("1", "http://10.0.0.5/", 5, "canceled")),
            Applied::AlreadyTerminal
        );
        assert_eq!(
            registry.on_response(ResponseMeta::new("1", "http://10.0.0.5/", TransferStage::End)),
            Applied::AlreadyTerminal
        );

        let record = registry.get(&"1".into()).unwrap();
        assert!(record.error().unwrap().is_blocked());
        assert!(record.response().is_none());
    }

    #[test]
    fn test_duplicate_request_replaces_in_place() {
        let mut registry = ResourceRegistry::new();
        let now = Instant::now();
        registry.on_request(request("1", "http://a.test/"), now);
        registry.on_request(request("2", "http://b.test/"), now);
        registry.on_response(ResponseMeta::new("1", "http://a.test/", TransferStage::End));

        assert_eq!(
            registry.on_request(request("1", "http://a.test/redirected"), now),
            Applied::Replaced
        );

        let log = registry.snapshot();
        assert_eq!(log.len(), 2);
        assert_eq!(log.records()[0].request.url, "http://a.test/redirected");
        assert!(log.records()[0].is_pending());
    }

    #[test]
    fn test_expire_overdue_only_touches_pending() {
        let mut registry = ResourceRegistry::new();
        let start = Instant::now();
        let timeout = Duration::from_secs(10);
        registry.on_request(request("1", "http://slow.test/"), start);
        registry.on_request(request("2", "http://fast.test/"), start);
        registry.on_response(ResponseMeta::new("2", "http://fast.test/", TransferStage::End));

        assert_eq!(registry.next_expiry(timeout), Some(start + timeout));
        assert!(registry.expire_overdue(start + Duration::from_secs(9), timeout).is_empty());

        let expired = registry.expire_overdue(start + timeout, timeout);
        assert_eq!(expired, vec![ResourceId::new("1")]);

        let record = registry.get(&"1".into()).unwrap();
        assert_eq!(record.error().unwrap().error_code, ResourceError::TIMEOUT_CODE);
        assert!(registry.get(&"2".into()).unwrap().response().is_some());
        assert_eq!(registry.next_expiry(timeout), None);
    }

    #[test]
    fn test_counts() {
        let mut registry = ResourceRegistry::new();
        let now = Instant::now();
        for id in ["1", "2", "3", "4"] {
            registry.on_request(request(id, "http://x.test/"), now);
        }
        registry.on_response(ResponseMeta::new("1", "http://x.test/", TransferStage::End));
        registry.on_error(ResourceError::blocked("2", "http://x.test/"));
        registry.on_error(ResourceError::new("3", "http://x.test/", 3, "refused"));

        let counts = registry.counts();
        assert_eq!(counts.total, 4);
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.blocked, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.pending, 1);
    }

    #[test]
    fn test_snapshot_serializes_in_request_order() {
        let mut registry = ResourceRegistry::new();
        let now = Instant::now();
        registry.on_request(request("9", "http://first.test/"), now);
        registry.on_request(request("10", "http://second.test/"), now);

        let json = serde_json::to_string(&registry.snapshot()).unwrap();
        let first = json.find("\"9\"").unwrap();
        let second = json.find("\"10\"").unwrap();
        assert!(first < second);

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["9"]["request"]["url"], "http://first.test/");
    }

    #[test]
    fn test_empty_snapshot_is_empty_object() {
        let registry = ResourceRegistry::new();
        assert_eq!(serde_json::to_string(&registry.snapshot()).unwrap(), "{}");
    }
}
