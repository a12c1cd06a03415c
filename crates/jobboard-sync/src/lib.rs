//! Fetch-and-reconcile pipeline, run guard and daily scheduler.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jobboard_ashby::{AshbyClientConfig, FetchError, JobSource, ParseError};
use jobboard_core::{
    ChangeSummary, ConfigError, FetchRunRecord, NormalizedJob, OrganizationId, ScheduleConfig,
    SlotTime,
};
use jobboard_store::{JobStore, StoreError};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "jobboard-sync";

const DEFAULT_USER_AGENT: &str = concat!("jobboard-sync/", env!("CARGO_PKG_VERSION"));

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: String,
    pub api_base: String,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub web_port: u16,
    pub scheduler_enabled: bool,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:jobboard.db".to_string()),
            api_base: std::env::var("JOBBOARD_API_BASE")
                .unwrap_or_else(|_| jobboard_ashby::DEFAULT_API_BASE.to_string()),
            http_timeout_secs: std::env::var("JOBBOARD_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(jobboard_ashby::DEFAULT_TIMEOUT_SECS),
            user_agent: std::env::var("JOBBOARD_USER_AGENT")
                .unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string()),
            web_port: std::env::var("JOBBOARD_WEB_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            scheduler_enabled: std::env::var("JOBBOARD_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(true),
        }
    }

    pub fn client_config(&self) -> AshbyClientConfig {
        AshbyClientConfig {
            base_url: self.api_base.clone(),
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("refusing to clear {snapshot_len} cached postings on an empty batch")]
    EmptyBatch { snapshot_len: usize },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync is not configured yet")]
    NotConfigured,
    #[error("a sync run is already in progress")]
    Busy,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Mirror one fetched batch into the store: upsert everything incoming,
/// then delete whatever the batch no longer carries. An empty batch over a
/// populated store is refused so a bad upstream response cannot wipe the
/// cache. Rows that fail to write or delete are tallied in `failed_writes`
/// and left for the next run; only the snapshot read aborts the pass.
pub async fn reconcile(
    store: &JobStore,
    batch: Vec<NormalizedJob>,
    fingerprint: &str,
    now: DateTime<Utc>,
) -> Result<ChangeSummary, ReconcileError> {
    let snapshot: BTreeSet<String> = store.list_ids().await?.into_iter().collect();

    // Last record wins when the payload repeats an id.
    let mut incoming: BTreeMap<String, NormalizedJob> = BTreeMap::new();
    for job in batch {
        incoming.insert(job.external_id.clone(), job);
    }

    if incoming.is_empty() && !snapshot.is_empty() {
        return Err(ReconcileError::EmptyBatch {
            snapshot_len: snapshot.len(),
        });
    }

    let incoming_ids: BTreeSet<String> = incoming.keys().cloned().collect();
    let mut summary = ChangeSummary::default();

    for (external_id, normalized) in incoming {
        let existed = snapshot.contains(&external_id);
        let job = normalized.into_job(fingerprint, now);
        match store.upsert(&job).await {
            Ok(n) if n > 0 => {
                if existed {
                    summary.updated += 1;
                } else {
                    summary.added += 1;
                }
            }
            Ok(_) => {
                warn!(%external_id, "upsert touched no rows");
                summary.failed_writes += 1;
            }
            Err(err) => {
                warn!(%external_id, error = %err, "failed to write posting");
                summary.failed_writes += 1;
            }
        }
    }

    let leftover: Vec<String> = snapshot.difference(&incoming_ids).cloned().collect();
    if !leftover.is_empty() {
        match store.delete_by_ids(&leftover).await {
            Ok(n) => summary.removed = n as usize,
            Err(err) => {
                warn!(stale = leftover.len(), error = %err, "failed to delete stale postings");
                summary.failed_writes += leftover.len();
            }
        }
    }

    Ok(summary)
}

/// Owns the store, the posting source and the run guard shared by manual
/// and scheduled triggers.
pub struct SyncService {
    store: JobStore,
    source: Box<dyn JobSource>,
    run_guard: Mutex<()>,
}

impl SyncService {
    pub fn new(store: JobStore, source: Box<dyn JobSource>) -> Self {
        Self {
            store,
            source,
            run_guard: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// One fetch-parse-reconcile pass. At most one run at a time; a second
    /// caller gets [`SyncError::Busy`] instead of waiting.
    pub async fn run_once(&self) -> Result<ChangeSummary, SyncError> {
        let _running = self.run_guard.try_lock().map_err(|_| SyncError::Busy)?;

        let Some(settings) = self.store.load_settings().await? else {
            return Err(SyncError::NotConfigured);
        };
        if !settings.setup_complete {
            return Err(SyncError::NotConfigured);
        }

        let run_id = Uuid::new_v4();
        let ran_at = Utc::now();
        let mut payload_hash: Option<String> = None;

        let outcome: Result<ChangeSummary, SyncError> = async {
            let payload = self
                .source
                .fetch_listing(run_id, &settings.organization_id)
                .await?;
            payload_hash = Some(payload.content_hash.clone());
            let batch = self.source.parse_listing(&payload)?;
            let summary = reconcile(&self.store, batch, &payload.content_hash, ran_at).await?;
            Ok(summary)
        }
        .await;

        match outcome {
            Ok(summary) => {
                let record = FetchRunRecord {
                    run_id,
                    ran_at,
                    payload_hash,
                    summary,
                    error: None,
                };
                self.store.save_last_run(&record).await?;
                info!(
                    %run_id,
                    added = summary.added,
                    updated = summary.updated,
                    removed = summary.removed,
                    failed_writes = summary.failed_writes,
                    "sync run complete"
                );
                Ok(summary)
            }
            Err(err) => {
                let record = FetchRunRecord {
                    run_id,
                    ran_at,
                    payload_hash,
                    summary: ChangeSummary::default(),
                    error: Some(err.to_string()),
                };
                if let Err(save_err) = self.store.save_last_run(&record).await {
                    warn!(error = %save_err, "could not record failed run");
                }
                Err(err)
            }
        }
    }

    /// Validate raw form input and persist it as the active settings.
    pub async fn save_setup(
        &self,
        organization_id: &str,
        times: &[String],
    ) -> Result<ScheduleConfig, SyncError> {
        let organization_id = OrganizationId::new(organization_id)?;
        let times = ScheduleConfig::parse_times(times)?;
        let config = ScheduleConfig::new(organization_id, times)?;
        self.store.save_settings(&config, Utc::now()).await?;
        Ok(config)
    }

    pub async fn schedule_status(&self, now: DateTime<Utc>) -> Result<ScheduleStatus, SyncError> {
        let settings = self.store.load_settings().await?;
        let last_run = self.store.load_last_run().await?;
        let stats = self.store.stats().await?;

        let mut status = ScheduleStatus {
            organization_id: None,
            setup_complete: false,
            schedule_times: Vec::new(),
            next_fire_times: Vec::new(),
            last_run,
            jobs_count: stats.total_jobs,
            jobs_last_updated: stats.last_updated,
        };
        if let Some(config) = settings {
            status.organization_id = Some(config.organization_id.to_string());
            status.setup_complete = config.setup_complete;
            status.schedule_times = config.times_of_day.iter().map(|t| t.to_string()).collect();
            if config.setup_complete {
                status.next_fire_times = next_fire_times(&config.times_of_day, now);
            }
        }
        Ok(status)
    }
}

/// Settings, last outcome and cache counts in one status view.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleStatus {
    pub organization_id: Option<String>,
    pub setup_complete: bool,
    pub schedule_times: Vec<String>,
    pub next_fire_times: Vec<DateTime<Utc>>,
    pub last_run: Option<FetchRunRecord>,
    pub jobs_count: u64,
    pub jobs_last_updated: Option<DateTime<Utc>>,
}

/// Next UTC fire instant for each slot relative to `now`: later today if
/// the slot is still ahead, otherwise tomorrow. Sorted soonest first.
pub fn next_fire_times(slots: &[SlotTime], now: DateTime<Utc>) -> Vec<DateTime<Utc>> {
    let mut fires: Vec<DateTime<Utc>> = slots
        .iter()
        .filter_map(|slot| {
            let today = now
                .date_naive()
                .and_hms_opt(slot.hour() as u32, slot.minute() as u32, 0)?
                .and_utc();
            if today > now {
                Some(today)
            } else {
                today.checked_add_signed(ChronoDuration::days(1))
            }
        })
        .collect();
    fires.sort();
    fires
}

/// In-process cron wrapper: one job per schedule slot, all driving the
/// same [`SyncService`].
pub struct FetchScheduler {
    inner: JobScheduler,
    service: Arc<SyncService>,
    job_ids: Mutex<Vec<Uuid>>,
}

impl FetchScheduler {
    pub async fn new(service: Arc<SyncService>) -> Result<Self> {
        let inner = JobScheduler::new().await.context("creating scheduler")?;
        Ok(Self {
            inner,
            service,
            job_ids: Mutex::new(Vec::new()),
        })
    }

    /// Replace every scheduled job with one cron entry per slot. Slots are
    /// UTC wall-clock times.
    pub async fn configure(&self, slots: &[SlotTime]) -> Result<()> {
        self.cancel_all().await?;

        let mut job_ids = self.job_ids.lock().await;
        for slot in slots {
            let cron = format!("0 {} {} * * *", slot.minute(), slot.hour());
            let service = self.service.clone();
            let job = CronJob::new_async(cron.as_str(), move |_uuid, _lock| {
                let service = service.clone();
                Box::pin(async move {
                    if let Err(err) = service.run_once().await {
                        warn!(error = %err, "scheduled sync run failed");
                    }
                })
            })
            .with_context(|| format!("creating scheduler job for {slot}"))?;
            let job_id = self
                .inner
                .add(job)
                .await
                .with_context(|| format!("adding scheduler job for {slot}"))?;
            job_ids.push(job_id);
        }
        Ok(())
    }

    pub async fn cancel_all(&self) -> Result<()> {
        let mut job_ids = self.job_ids.lock().await;
        for job_id in job_ids.drain(..) {
            self.inner
                .remove(&job_id)
                .await
                .context("removing scheduler job")?;
        }
        Ok(())
    }

    pub async fn start(&self) -> Result<()> {
        self.inner.start().await.context("starting scheduler")?;
        Ok(())
    }

    /// Run the pipeline now, outside the cron cadence. Shares the run
    /// guard with scheduled firings.
    pub async fn trigger_now(&self) -> Result<ChangeSummary, SyncError> {
        self.service.run_once().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use jobboard_ashby::{normalize, sha256_hex, RawPayload};
    use tokio::sync::Semaphore;

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, minute, 0)
            .single()
            .unwrap()
    }

    fn mk_normalized(id: &str, title: &str) -> NormalizedJob {
        NormalizedJob {
            external_id: id.to_string(),
            title: title.to_string(),
            department: "Engineering".to_string(),
            team: "Platform".to_string(),
            location: "Remote".to_string(),
            employment_type: "FullTime".to_string(),
            compensation: String::new(),
            published_at: String::new(),
            is_remote: true,
            application_url: format!("https://jobs.ashbyhq.com/acme/{id}"),
        }
    }

    fn listing_json(jobs: &[(&str, &str)]) -> String {
        let records: Vec<serde_json::Value> = jobs
            .iter()
            .map(|(id, title)| {
                serde_json::json!({
                    "id": id,
                    "title": title,
                    "department": "Engineering",
                    "team": "Platform",
                    "location": "Remote",
                    "employmentType": "FullTime",
                    "isRemote": true,
                    "jobUrl": format!("https://jobs.ashbyhq.com/acme/{id}"),
                })
            })
            .collect();
        serde_json::json!({ "jobs": records }).to_string()
    }

    fn mk_payload(body: &str, organization_id: &OrganizationId) -> RawPayload {
        let bytes = body.as_bytes().to_vec();
        RawPayload {
            content_hash: sha256_hex(&bytes),
            body: bytes,
            final_url: format!("https://api.test/{organization_id}"),
            fetched_at: Utc::now(),
        }
    }

    struct StaticSource {
        payload: String,
    }

    #[async_trait]
    impl JobSource for StaticSource {
        async fn fetch_listing(
            &self,
            _run_id: Uuid,
            organization_id: &OrganizationId,
        ) -> Result<RawPayload, FetchError> {
            Ok(mk_payload(&self.payload, organization_id))
        }

        fn parse_listing(&self, payload: &RawPayload) -> Result<Vec<NormalizedJob>, ParseError> {
            normalize(payload)
        }
    }

    struct FailingSource;

    #[async_trait]
    impl JobSource for FailingSource {
        async fn fetch_listing(
            &self,
            _run_id: Uuid,
            organization_id: &OrganizationId,
        ) -> Result<RawPayload, FetchError> {
            Err(FetchError::HttpStatus {
                status: 503,
                url: format!("https://api.test/{organization_id}"),
            })
        }

        fn parse_listing(&self, payload: &RawPayload) -> Result<Vec<NormalizedJob>, ParseError> {
            normalize(payload)
        }
    }

    /// Parks every fetch on a semaphore so a test can hold a run in flight.
    struct GatedSource {
        gate: Arc<Semaphore>,
        payload: String,
    }

    #[async_trait]
    impl JobSource for GatedSource {
        async fn fetch_listing(
            &self,
            _run_id: Uuid,
            organization_id: &OrganizationId,
        ) -> Result<RawPayload, FetchError> {
            self.gate.acquire().await.expect("gate open").forget();
            Ok(mk_payload(&self.payload, organization_id))
        }

        fn parse_listing(&self, payload: &RawPayload) -> Result<Vec<NormalizedJob>, ParseError> {
            normalize(payload)
        }
    }

    async fn configured_service(payload: String) -> SyncService {
        let store = JobStore::connect_in_memory().await.expect("store");
        let service = SyncService::new(store, Box::new(StaticSource { payload }));
        service
            .save_setup("acme", &["08:00".to_string(), "20:00".to_string()])
            .await
            .expect("setup");
        service
    }

    #[tokio::test]
    async fn first_pass_adds_every_posting() {
        let store = JobStore::connect_in_memory().await.expect("store");
        let batch = vec![
            mk_normalized("a", "A"),
            mk_normalized("b", "B"),
            mk_normalized("c", "C"),
        ];
        let summary = reconcile(&store, batch, "fp-1", at(10, 8, 0))
            .await
            .expect("reconcile");
        assert_eq!(
            summary,
            ChangeSummary {
                added: 3,
                updated: 0,
                removed: 0,
                failed_writes: 0
            }
        );
    }

    #[tokio::test]
    async fn identical_second_pass_only_updates() {
        let store = JobStore::connect_in_memory().await.expect("store");
        let batch = vec![
            mk_normalized("a", "A"),
            mk_normalized("b", "B"),
            mk_normalized("c", "C"),
        ];
        reconcile(&store, batch.clone(), "fp-1", at(10, 8, 0))
            .await
            .expect("first");
        let summary = reconcile(&store, batch, "fp-1", at(10, 20, 0))
            .await
            .expect("second");
        assert_eq!(
            summary,
            ChangeSummary {
                added: 0,
                updated: 3,
                removed: 0,
                failed_writes: 0
            }
        );
        assert_eq!(store.list_ids().await.expect("ids").len(), 3);
    }

    #[tokio::test]
    async fn store_converges_to_the_incoming_batch() {
        let store = JobStore::connect_in_memory().await.expect("store");
        let seed = vec![
            mk_normalized("a", "A"),
            mk_normalized("b", "B"),
            mk_normalized("c", "C"),
        ];
        reconcile(&store, seed, "fp-1", at(10, 8, 0))
            .await
            .expect("seed");

        let batch = vec![
            mk_normalized("b", "B renamed"),
            mk_normalized("c", "C"),
            mk_normalized("d", "D"),
        ];
        let summary = reconcile(&store, batch, "fp-2", at(10, 20, 0))
            .await
            .expect("reconcile");
        assert_eq!(
            summary,
            ChangeSummary {
                added: 1,
                updated: 2,
                removed: 1,
                failed_writes: 0
            }
        );

        assert_eq!(store.list_ids().await.expect("ids"), ["b", "c", "d"]);
        let b = store.get("b").await.expect("get").expect("present");
        assert_eq!(b.title, "B renamed");
        assert_eq!(b.last_fetch_fingerprint, "fp-2");
    }

    #[tokio::test]
    async fn empty_batch_never_clears_a_populated_store() {
        let store = JobStore::connect_in_memory().await.expect("store");
        let seed = vec![mk_normalized("a", "A"), mk_normalized("b", "B")];
        reconcile(&store, seed, "fp-1", at(10, 8, 0))
            .await
            .expect("seed");

        let err = reconcile(&store, Vec::new(), "fp-2", at(10, 20, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::EmptyBatch { snapshot_len: 2 }));
        assert_eq!(store.list_ids().await.expect("ids").len(), 2);
    }

    #[tokio::test]
    async fn empty_batch_on_an_empty_store_is_a_noop() {
        let store = JobStore::connect_in_memory().await.expect("store");
        let summary = reconcile(&store, Vec::new(), "fp-1", at(10, 8, 0))
            .await
            .expect("reconcile");
        assert_eq!(summary, ChangeSummary::default());
    }

    #[tokio::test]
    async fn repeated_ids_in_one_batch_collapse_to_the_last() {
        let store = JobStore::connect_in_memory().await.expect("store");
        let batch = vec![mk_normalized("a", "First"), mk_normalized("a", "Second")];
        let summary = reconcile(&store, batch, "fp-1", at(10, 8, 0))
            .await
            .expect("reconcile");
        assert_eq!(summary.added, 1);
        let a = store.get("a").await.expect("get").expect("present");
        assert_eq!(a.title, "Second");
    }

    #[tokio::test]
    async fn unchanged_postings_are_still_rewritten() {
        let store = JobStore::connect_in_memory().await.expect("store");
        reconcile(&store, vec![mk_normalized("a", "A")], "fp-1", at(10, 8, 0))
            .await
            .expect("first");
        reconcile(&store, vec![mk_normalized("a", "A")], "fp-2", at(10, 20, 0))
            .await
            .expect("second");

        let a = store.get("a").await.expect("get").expect("present");
        assert_eq!(a.last_fetch_fingerprint, "fp-2");
        assert_eq!(a.updated_at, at(10, 20, 0));
        assert_eq!(a.created_at, at(10, 8, 0));
    }

    #[tokio::test]
    async fn failed_delete_is_tallied_not_fatal() {
        let store = JobStore::connect_in_memory().await.expect("store");
        reconcile(
            &store,
            vec![mk_normalized("a", "A"), mk_normalized("b", "B")],
            "fp-1",
            at(10, 8, 0),
        )
        .await
        .expect("seed");

        sqlx::query(
            "CREATE TRIGGER block_job_deletes BEFORE DELETE ON jobs \
             BEGIN SELECT RAISE(ABORT, 'deletes disabled'); END",
        )
        .execute(store.pool())
        .await
        .expect("trigger");

        let summary = reconcile(&store, vec![mk_normalized("a", "A2")], "fp-2", at(10, 20, 0))
            .await
            .expect("reconcile");
        assert_eq!(
            summary,
            ChangeSummary {
                added: 0,
                updated: 1,
                removed: 0,
                failed_writes: 1
            }
        );
        // Stale row stays for the next run to retry.
        assert!(store.get("b").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn run_without_setup_is_rejected() {
        let store = JobStore::connect_in_memory().await.expect("store");
        let service = SyncService::new(
            store,
            Box::new(StaticSource {
                payload: listing_json(&[]),
            }),
        );
        let err = service.run_once().await.unwrap_err();
        assert!(matches!(err, SyncError::NotConfigured));
    }

    #[tokio::test]
    async fn successful_run_records_its_outcome() {
        let service = configured_service(listing_json(&[("j-1", "One"), ("j-2", "Two")])).await;

        let summary = service.run_once().await.expect("run");
        assert_eq!(summary.added, 2);

        let record = service
            .store()
            .load_last_run()
            .await
            .expect("load")
            .expect("present");
        assert!(record.error.is_none());
        assert!(record.payload_hash.is_some());
        assert_eq!(record.summary.added, 2);
    }

    #[tokio::test]
    async fn failed_fetch_is_recorded_and_surfaced() {
        let store = JobStore::connect_in_memory().await.expect("store");
        let service = SyncService::new(store, Box::new(FailingSource));
        service
            .save_setup("acme", &["08:00".to_string()])
            .await
            .expect("setup");

        let err = service.run_once().await.unwrap_err();
        assert!(matches!(err, SyncError::Fetch(_)));

        let record = service
            .store()
            .load_last_run()
            .await
            .expect("load")
            .expect("present");
        assert!(record.payload_hash.is_none());
        assert!(record.error.as_deref().unwrap_or_default().contains("503"));
        assert_eq!(record.summary, ChangeSummary::default());
    }

    #[tokio::test]
    async fn second_run_is_rejected_while_one_is_in_flight() {
        let store = JobStore::connect_in_memory().await.expect("store");
        let gate = Arc::new(Semaphore::new(0));
        let source = GatedSource {
            gate: gate.clone(),
            payload: listing_json(&[("j-1", "One"), ("j-2", "Two")]),
        };
        let service = Arc::new(SyncService::new(store, Box::new(source)));
        service
            .save_setup("acme", &["08:00".to_string()])
            .await
            .expect("setup");

        let background = {
            let service = service.clone();
            tokio::spawn(async move { service.run_once().await })
        };
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        let busy = service.run_once().await;
        assert!(matches!(busy, Err(SyncError::Busy)));

        gate.add_permits(1);
        let summary = background.await.expect("join").expect("run");
        assert_eq!(summary.added, 2);

        // Guard released, so the next manual run goes through.
        gate.add_permits(1);
        let summary = service.run_once().await.expect("second run");
        assert_eq!(summary.updated, 2);
    }

    #[tokio::test]
    async fn setup_collapses_duplicates_and_rejects_bad_times() {
        let store = JobStore::connect_in_memory().await.expect("store");
        let service = SyncService::new(
            store,
            Box::new(StaticSource {
                payload: listing_json(&[]),
            }),
        );

        let config = service
            .save_setup("acme", &["08:00".to_string(), "08:00".to_string()])
            .await
            .expect("setup");
        assert_eq!(config.times_of_day.len(), 1);

        let err = service
            .save_setup("acme", &["25:00".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn fire_times_roll_past_slots_to_tomorrow() {
        let slots = [
            SlotTime::parse("08:00").unwrap(),
            SlotTime::parse("20:00").unwrap(),
        ];
        let fires = next_fire_times(&slots, at(10, 9, 0));
        assert_eq!(fires, [at(10, 20, 0), at(11, 8, 0)]);
    }

    #[test]
    fn fire_time_exactly_on_a_slot_rolls_to_tomorrow() {
        let slots = [SlotTime::parse("08:00").unwrap()];
        assert_eq!(next_fire_times(&slots, at(10, 8, 0)), [at(11, 8, 0)]);
    }

    #[tokio::test]
    async fn status_reports_settings_counts_and_next_fires() {
        let store = JobStore::connect_in_memory().await.expect("store");
        let service = SyncService::new(
            store,
            Box::new(StaticSource {
                payload: listing_json(&[("j-1", "One")]),
            }),
        );

        let blank = service.schedule_status(at(10, 9, 0)).await.expect("status");
        assert!(!blank.setup_complete);
        assert!(blank.organization_id.is_none());
        assert!(blank.next_fire_times.is_empty());
        assert_eq!(blank.jobs_count, 0);

        service
            .save_setup("acme", &["08:00".to_string(), "20:00".to_string()])
            .await
            .expect("setup");
        service.run_once().await.expect("run");

        let status = service.schedule_status(at(10, 9, 0)).await.expect("status");
        assert!(status.setup_complete);
        assert_eq!(status.organization_id.as_deref(), Some("acme"));
        assert_eq!(status.schedule_times, ["08:00", "20:00"]);
        assert_eq!(status.next_fire_times, [at(10, 20, 0), at(11, 8, 0)]);
        assert_eq!(status.jobs_count, 1);
        assert!(status.last_run.is_some());
    }

    #[tokio::test]
    async fn scheduler_reconfigures_and_cancels_cleanly() {
        let service = Arc::new(configured_service(listing_json(&[])).await);
        let scheduler = FetchScheduler::new(service).await.expect("scheduler");

        let two = [
            SlotTime::parse("08:00").unwrap(),
            SlotTime::parse("20:00").unwrap(),
        ];
        scheduler.configure(&two).await.expect("configure");
        scheduler
            .configure(&[SlotTime::parse("12:30").unwrap()])
            .await
            .expect("reconfigure");
        scheduler.cancel_all().await.expect("cancel");

        // Manual trigger works independently of registered cron slots.
        let summary = scheduler.trigger_now().await.expect("manual trigger");
        assert_eq!(summary, ChangeSummary::default());
    }

    #[tokio::test]
    async fn records_without_ids_are_skipped_not_fatal() {
        let payload = serde_json::json!({
            "jobs": [
                { "id": "j-1", "title": "One" },
                { "title": "No id, dropped" },
                { "id": "j-2", "title": "Two" }
            ]
        })
        .to_string();
        let service = configured_service(payload).await;

        let summary = service.run_once().await.expect("run");
        assert_eq!(summary.added, 2);
        assert_eq!(
            service.store().list_ids().await.expect("ids"),
            ["j-1", "j-2"]
        );
    }
}
