//! JSON API over the job cache and sync pipeline.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use jobboard_core::Job;
use jobboard_sync::{next_fire_times, FetchScheduler, SyncError, SyncService};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "jobboard-web";

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SyncService>,
    pub scheduler: Arc<FetchScheduler>,
}

/// One posting as served to clients. Bookkeeping columns stay internal.
#[derive(Debug, Clone, Serialize)]
pub struct JobRow {
    pub external_id: String,
    pub title: String,
    pub department: String,
    pub team: String,
    pub location: String,
    pub employment_type: String,
    pub compensation: String,
    pub published_at: String,
    pub is_remote: bool,
    pub application_url: String,
    pub updated_at: DateTime<Utc>,
}

impl From<Job> for JobRow {
    fn from(job: Job) -> Self {
        Self {
            external_id: job.external_id,
            title: job.title,
            department: job.department,
            team: job.team,
            location: job.location,
            employment_type: job.employment_type,
            compensation: job.compensation,
            published_at: job.published_at,
            is_remote: job.is_remote,
            application_url: job.application_url,
            updated_at: job.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobsResponse {
    pub total: usize,
    pub jobs: Vec<JobRow>,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub organization_id: String,
    pub times: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ScheduleSaved {
    organization_id: String,
    schedule_times: Vec<String>,
    next_fire_times: Vec<DateTime<Utc>>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/jobs", get(jobs_handler))
        .route("/refresh", post(refresh_handler))
        .route("/schedule", get(schedule_handler).post(schedule_save_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn jobs_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.service.store().list_all().await {
        Ok(jobs) => {
            let jobs: Vec<JobRow> = jobs.into_iter().map(JobRow::from).collect();
            Json(JobsResponse {
                total: jobs.len(),
                jobs,
            })
            .into_response()
        }
        Err(err) => server_error(anyhow::Error::new(err)),
    }
}

async fn refresh_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.scheduler.trigger_now().await {
        Ok(summary) => Json(summary).into_response(),
        Err(err) => sync_error_response(err),
    }
}

async fn schedule_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.service.schedule_status(Utc::now()).await {
        Ok(status) => Json(status).into_response(),
        Err(err) => sync_error_response(err),
    }
}

async fn schedule_save_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ScheduleRequest>,
) -> Response {
    let config = match state
        .service
        .save_setup(&request.organization_id, &request.times)
        .await
    {
        Ok(config) => config,
        Err(err) => return sync_error_response(err),
    };

    if let Err(err) = state.scheduler.configure(&config.times_of_day).await {
        return server_error(err);
    }

    // First fetch right away; the response does not wait for it.
    let scheduler = state.scheduler.clone();
    tokio::spawn(async move {
        if let Err(err) = scheduler.trigger_now().await {
            warn!(error = %err, "initial sync run failed");
        }
    });

    Json(ScheduleSaved {
        organization_id: config.organization_id.to_string(),
        schedule_times: config.times_of_day.iter().map(|t| t.to_string()).collect(),
        next_fire_times: next_fire_times(&config.times_of_day, Utc::now()),
    })
    .into_response()
}

fn sync_error_response(err: SyncError) -> Response {
    let status = match &err {
        SyncError::NotConfigured | SyncError::Config(_) => StatusCode::BAD_REQUEST,
        SyncError::Busy => StatusCode::CONFLICT,
        SyncError::Fetch(_) | SyncError::Parse(_) => StatusCode::BAD_GATEWAY,
        SyncError::Reconcile(_) | SyncError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
}

fn server_error(err: anyhow::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": err.to_string() })),
    )
        .into_response()
}
