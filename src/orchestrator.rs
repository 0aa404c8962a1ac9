use crate::config::ScanOptions;
use crate::cookies::{CookieSpec, load_cookie_dir};
use crate::engine::{EngineEvent, EngineSettings, RenderingEngine, RequestControl, Verdict};
use crate::monitor::{ResourceError, ResourceId, ScanEvent, ScanSession};
use crate::output;
use crate::policy::PrivateNetworkResolver;
use crate::report::ScanReport;
use crate::{Result, ScanError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

#[derive(Debug)]
struct VerdictOutcome {
    id: ResourceId,
    url: String,
    verdict: Verdict,
}

pub struct ScanOrchestrator {
    options: Arc<ScanOptions>,
    resolver: PrivateNetworkResolver,
    json_pretty: bool,
}

impl ScanOrchestrator {
    pub fn new(options: ScanOptions, resolver: PrivateNetworkResolver) -> Self {
        Self {
            options: Arc::new(options),
            resolver,
            json_pretty: false,
        }
    }

    pub fn with_pretty_json(mut self, pretty: bool) -> Self {
        self.json_pretty = pretty;
        self
    }

    pub async fn run<E: RenderingEngine + ?Sized>(&self, engine: &mut E) -> Result<ScanReport> {
        let started = Instant::now();
        let mut session = ScanSession::new(self.options.clone());
        let (complete_tx, mut complete_rx) = oneshot::channel::<()>();
        session.detector_mut().on_complete(move || {
            complete_tx.send(()).ok();
        });

        tracing::info!(
            "Scan {} starting: url={:?} hosted_locally={} javascript={}",
            session.scan_id(),
            self.options.url,
            self.options.hosted_locally,
            self.options.javascript_enabled
        );

        let cookies = self.load_cookies();

        let Some(url) = self.options.url.clone() else {
            tracing::info!("No URL given, finalizing immediately");
            session.detector_mut().force_complete();
            return self.finalize(&session, started);
        };

        engine
            .apply_settings(&EngineSettings {
                web_security: false,
                javascript_enabled: self.options.javascript_enabled,
                resource_timeout: session.resource_timeout(),
            })
            .await?;
        if !cookies.is_empty() {
            engine.set_cookies(&cookies).await?;
        }

        let mut events = engine.events().await?;
        let (verdict_tx, mut verdict_rx) = mpsc::unbounded_channel::<VerdictOutcome>();
        engine.navigate(&url).await?;

        let scan_deadline = started + Duration::from_secs(self.options.max_scan_secs);
        let mut engine_open = true;

        loop {
            let idle_deadline = session.detector().deadline();
            let expiry = session.next_expiry();

            tokio::select! {
                biased;
                _ = &mut complete_rx => break,
                Some(outcome) = verdict_rx.recv() => {
                    self.apply_verdict(&mut session, outcome);
                }
                event = events.recv(), if engine_open => match event {
                    Some(event) => self.handle_event(&mut session, event, &verdict_tx),
                    None => {
                        tracing::warn!("Rendering engine closed its event stream, finalizing");
                        engine_open = false;
                        session.detector_mut().force_complete();
                    }
                },
                _ = sleep_until_opt(expiry) => {
                    session.expire_overdue(Instant::now());
                }
                _ = sleep_until_opt(idle_deadline) => {
                    if session.detector_mut().poll(Instant::now()) {
                        tracing::debug!("Network idle, finalizing");
                    }
                }
                _ = tokio::time::sleep_until(scan_deadline) => {
                    tracing::warn!(
                        "Scan exceeded {}s without going idle, finalizing",
                        self.options.max_scan_secs
                    );
                    session.detector_mut().force_complete();
                }
            }
        }

        self.finalize(&session, started)
    }

    fn load_cookies(&self) -> Vec<CookieSpec> {
        if !self.options.use_cookie {
            return Vec::new();
        }
        let Some(ref dir) = self.options.cookie_dir else {
            return Vec::new();
        };
        match load_cookie_dir(dir) {
            Ok(cookies) => cookies,
            Err(e) => {
                tracing::warn!("{}", e);
                Vec::new()
            }
        }
    }

    fn handle_event(
        &self,
        session: &mut ScanSession,
        event: EngineEvent,
        verdict_tx: &mpsc::UnboundedSender<VerdictOutcome>,
    ) {
        let now = Instant::now();
        match event {
            EngineEvent::RequestStarted { request, control } => {
                let id = request.id.clone();
                let url = request.url.clone();
                session.dispatch(ScanEvent::RequestStarted(request), now);

                if self.options.hosted_locally && session.requests_seen() == 1 {
                    tracing::debug!("[{}] top-level request exempt from destination check", id);
                    control.allow();
                    return;
                }

                self.spawn_destination_check(id, url, control, verdict_tx.clone());
            }
            EngineEvent::ResponseReceived(response) => {
                session.dispatch(ScanEvent::ResponseEnded(response), now);
            }
            EngineEvent::ResourceFailed(error) => {
                session.dispatch(ScanEvent::ResourceErrored(error), now);
            }
        }
    }

    fn spawn_destination_check(
        &self,
        id: ResourceId,
        url: String,
        control: RequestControl,
        verdict_tx: mpsc::UnboundedSender<VerdictOutcome>,
    ) {
        let resolver = self.resolver.clone();
        tokio::spawn(async move {
            let verdict = if resolver.is_private_destination(&url).await {
                Verdict::Abort
            } else {
                Verdict::Allow
            };
            // Record the verdict before releasing the engine so the block lands
            // ahead of the engine's own failure report for this request.
            verdict_tx.send(VerdictOutcome { id, url, verdict }).ok();
            control.send(verdict);
        });
    }

    fn apply_verdict(&self, session: &mut ScanSession, outcome: VerdictOutcome) {
        match outcome.verdict {
            Verdict::Allow => tracing::trace!("[{}] allowed {}", outcome.id, outcome.url),
            Verdict::Abort => {
                tracing::warn!("Blocked request into private network: {}", outcome.url);
                session.dispatch(
                    ScanEvent::ResourceErrored(ResourceError::blocked(outcome.id, outcome.url)),
                    Instant::now(),
                );
            }
        }
    }

    fn finalize(&self, session: &ScanSession, started: Instant) -> Result<ScanReport> {
        let log = session.snapshot();
        let path = &self.options.log_file;
        let json = output::to_json(&log, self.json_pretty)?;

        std::fs::write(path, json).map_err(|source| ScanError::LogWrite {
            path: path.display().to_string(),
            source,
        })?;

        let counts = session.registry().counts();
        tracing::info!(
            "Scan {} finished: {} resources ({} blocked, {} failed, {} pending), log at {}",
            session.scan_id(),
            counts.total,
            counts.blocked,
            counts.failed,
            counts.pending,
            path.display()
        );

        Ok(ScanReport {
            scan_id: session.scan_id(),
            url: self.options.url.clone(),
            log_file: path.clone(),
            counts,
            blocked_urls: log.blocked_urls(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            log,
        })
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

