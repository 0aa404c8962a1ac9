use crate::engine::{EngineEvent, RequestControl, Verdict, await_verdict};
use crate::monitor::{Headers, RequestMeta, ResourceError, ResourceId, ResponseMeta, TransferStage};
use crate::{Result, ScanError};
use chromiumoxide::{
    Page,
    cdp::browser_protocol::fetch::{
        ContinueRequestParams, EnableParams as FetchEnableParams, EventRequestPaused,
        FailRequestParams, RequestPattern, RequestStage,
    },
    cdp::browser_protocol::network::{
        EnableParams as NetworkEnableParams, ErrorReason, EventLoadingFailed, EventLoadingFinished,
        EventResponseReceived, SetBypassServiceWorkerParams,
    },
};
use chrono::Utc;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug)]
struct Tracked {
    id: ResourceId,
    url: String,
    response: Option<ResponseMeta>,
}

/// Maps Chrome's request ids onto sequential numeric resource ids and holds each
/// response head until the matching loading-finished event commits it.
#[derive(Debug, Default)]
pub(crate) struct NetworkTracker {
    next_id: u64,
    tracked: HashMap<String, Tracked>,
}

impl NetworkTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// A redirect pauses the same Chrome request again and keeps its resource id.
    pub(crate) fn on_paused(&mut self, key: &str, url: &str) -> ResourceId {
        if let Some(entry) = self.tracked.get_mut(key) {
            entry.url = url.to_string();
            entry.response = None;
            return entry.id.clone();
        }

        self.next_id += 1;
        let id = ResourceId::new(self.next_id.to_string());
        self.tracked.insert(
            key.to_string(),
            Tracked {
                id: id.clone(),
                url: url.to_string(),
                response: None,
            },
        );
        id
    }

    pub(crate) fn on_response(
        &mut self,
        key: &str,
        url: &str,
        status: u16,
        status_text: &str,
    ) -> Option<&mut ResponseMeta> {
        let entry = self.tracked.get_mut(key)?;
        let meta = ResponseMeta::new(entry.id.clone(), url, TransferStage::Start)
            .with_status(status, status_text);
        Some(entry.response.insert(meta))
    }

    pub(crate) fn on_finished(&mut self, key: &str, body_size: i64) -> Option<ResponseMeta> {
        let entry = self.tracked.remove(key)?;
        let mut meta = entry
            .response
            .unwrap_or_else(|| ResponseMeta::new(entry.id, entry.url, TransferStage::End));
        meta.stage = TransferStage::End;
        meta.body_size = Some(body_size);
        meta.time = Utc::now();
        Some(meta)
    }

    pub(crate) fn on_failed(&mut self, key: &str) -> Option<(ResourceId, String)> {
        self.tracked.remove(key).map(|entry| (entry.id, entry.url))
    }
}

/// Wires the page's Fetch and Network domains to the engine event stream.
///
/// Every request is paused at the request stage and only continued (or failed)
/// once the monitor has sent a verdict through the request's control handle.
/// Service workers are bypassed so their fetches surface on the page session.
pub async fn attach(page: &Arc<Page>, tx: mpsc::Sender<EngineEvent>) -> Result<Vec<JoinHandle<()>>> {
    page.execute(NetworkEnableParams::default())
        .await
        .map_err(|e| ScanError::Engine(format!("Failed to enable Network domain: {}", e)))?;

    page.execute(SetBypassServiceWorkerParams::new(true))
        .await
        .map_err(|e| ScanError::Engine(format!("Failed to bypass service workers: {}", e)))?;

    page.execute(FetchEnableParams {
        handle_auth_requests: Some(false),
        patterns: Some(vec![RequestPattern {
            url_pattern: Some("*".into()),
            resource_type: None,
            request_stage: Some(RequestStage::Request),
        }]),
    })
    .await
    .map_err(|e| ScanError::Engine(format!("Failed to enable Fetch domain: {}", e)))?;

    let listen_err = |e: chromiumoxide::error::CdpError| {
        ScanError::Engine(format!("Failed to attach network listener: {}", e))
    };
    let mut paused = page
        .event_listener::<EventRequestPaused>()
        .await
        .map_err(listen_err)?;
    let mut responses = page
        .event_listener::<EventResponseReceived>()
        .await
        .map_err(listen_err)?;
    let mut finished = page
        .event_listener::<EventLoadingFinished>()
        .await
        .map_err(listen_err)?;
    let mut failed = page
        .event_listener::<EventLoadingFailed>()
        .await
        .map_err(listen_err)?;

    let page = page.clone();
    let task = tokio::spawn(async move {
        let mut tracker = NetworkTracker::new();

        // Chrome emits request, response, finished/failed in that order. Polling
        // the listeners in the same order keeps that sequence per request.
        loop {
            let event = tokio::select! {
                biased;
                Some(event) = paused.next() => on_paused(&page, &mut tracker, &event),
                Some(event) = responses.next() => on_response(&mut tracker, &event),
                Some(event) = finished.next() => on_finished(&mut tracker, &event),
                Some(event) = failed.next() => on_failed(&mut tracker, &event),
                else => break,
            };

            let Some(event) = event else { continue };
            if tx.send(event).await.is_err() {
                break;
            }
        }
    });

    Ok(vec![task])
}

fn on_paused(
    page: &Arc<Page>,
    tracker: &mut NetworkTracker,
    event: &EventRequestPaused,
) -> Option<EngineEvent> {
    let key = event
        .network_id
        .as_ref()
        .map(|id| id.inner().to_string())
        .unwrap_or_else(|| event.request_id.inner().to_string());
    let url = event.request.url.clone();
    let id = tracker.on_paused(&key, &url);

    let request = RequestMeta {
        id,
        url,
        method: event.request.method.clone(),
        headers: headers_from_json(event.request.headers.inner()),
        resource_type: Some(format!("{:?}", event.resource_type)),
        time: Utc::now(),
    };

    let (control, verdict_rx) = RequestControl::channel();
    let page = page.clone();
    let fetch_id = event.request_id.clone();
    tokio::spawn(async move {
        let result = match await_verdict(verdict_rx).await {
            Verdict::Allow => page
                .execute(ContinueRequestParams::new(fetch_id))
                .await
                .map(|_| ()),
            Verdict::Abort => page
                .execute(FailRequestParams::new(fetch_id, ErrorReason::BlockedByClient))
                .await
                .map(|_| ()),
        };
        if let Err(e) = result {
            tracing::debug!("Failed to release paused request: {}", e);
        }
    });

    Some(EngineEvent::RequestStarted { request, control })
}

fn on_response(tracker: &mut NetworkTracker, event: &EventResponseReceived) -> Option<EngineEvent> {
    let response = &event.response;
    let meta = tracker.on_response(
        event.request_id.inner(),
        &response.url,
        response.status as u16,
        &response.status_text,
    )?;
    meta.headers = headers_from_json(response.headers.inner());
    meta.content_type = Some(response.mime_type.clone());
    Some(EngineEvent::ResponseReceived(meta.clone()))
}

fn on_finished(tracker: &mut NetworkTracker, event: &EventLoadingFinished) -> Option<EngineEvent> {
    let meta = tracker.on_finished(event.request_id.inner(), event.encoded_data_length as i64)?;
    Some(EngineEvent::ResponseReceived(meta))
}

fn on_failed(tracker: &mut NetworkTracker, event: &EventLoadingFailed) -> Option<EngineEvent> {
    let Some((id, url)) = tracker.on_failed(event.request_id.inner()) else {
        tracing::trace!("Untracked failure for {}", event.request_id.inner());
        return None;
    };

    let code = if event.canceled.unwrap_or(false) {
        ResourceError::CANCELED_CODE
    } else {
        ResourceError::ENGINE_CODE
    };
    Some(EngineEvent::ResourceFailed(ResourceError::new(
        id,
        url,
        code,
        event.error_text.clone(),
    )))
}

fn headers_from_json(value: &serde_json::Value) -> Headers {
    value
        .as_object()
        .map(|map| {
            map.iter()
                .map(|(k, v)| {
                    let v = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
                    (k.clone(), v)
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_from_json() {
        let json = serde_json::json!({"Accept": "*/*", "X-Count": 3});
        let headers = headers_from_json(&json);
        assert_eq!(headers.get("Accept").map(String::as_str), Some("*/*"));
        assert_eq!(headers.get("X-Count").map(String::as_str), Some("3"));
    }

    #[test]
    fn test_headers_from_non_object() {
        assert!(headers_from_json(&serde_json::Value::Null).is_empty());
    }

    #[test]
    fn test_resource_ids_are_sequential_integers() {
        let mut tracker = NetworkTracker::new();
        let first = tracker.on_paused("1000.42", "http://127.0.0.1/ad.html");
        let second = tracker.on_paused("A3F9C0DE11", "http://ads.test/a.js");

        assert_eq!(first.as_str(), "1");
        assert_eq!(second.as_str(), "2");
        assert!(second.as_str().parse::<u64>().is_ok());
    }

    #[test]
    fn test_redirect_keeps_resource_id() {
        let mut tracker = NetworkTracker::new();
        let first = tracker.on_paused("1000.7", "http://ads.test/r");
        let again = tracker.on_paused("1000.7", "http://ads.test/final");

        assert_eq!(first, again);
        let (_, url) = tracker.on_failed("1000.7").unwrap();
        assert_eq!(url, "http://ads.test/final");
    }

    #[test]
    fn test_finished_commits_stored_response_head() {
        let mut tracker = NetworkTracker::new();
        tracker.on_paused("1000.1", "http://ads.test/pixel.gif");
        tracker
            .on_response("1000.1", "http://ads.test/pixel.gif", 204, "No Content")
            .unwrap()
            .content_type = Some("image/gif".into());

        let meta = tracker.on_finished("1000.1", 43).unwrap();
        assert_eq!(meta.id.as_str(), "1");
        assert_eq!(meta.stage, TransferStage::End);
        assert_eq!(meta.status, Some(204));
        assert_eq!(meta.content_type.as_deref(), Some("image/gif"));
        assert_eq!(meta.body_size, Some(43));
    }

    #[test]
    fn test_untracked_events_are_dropped() {
        let mut tracker = NetworkTracker::new();
        assert!(tracker.on_response("9", "http://x.test/", 200, "OK").is_none());
        assert!(tracker.on_finished("9", 0).is_none());
        assert!(tracker.on_failed("9").is_none());
    }
}
