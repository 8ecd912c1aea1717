//! Sample instrumented routes.
//!
//! An in-memory job board standing in for the application's CRUD handlers, so
//! the binary has traffic to measure. Each simulated query is timed through
//! [`DbTimings`], and the caller's identity comes from an `x-user-id` header.

use axum::{
    extract::Path,
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::get,
    Extension, Json, Router,
};
use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::ApiError;
use crate::middleware::timing::{AuthenticatedUser, DbTimings};
use crate::redaction::redact;

// ─── Domain types ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: u64,
    pub title: String,
    pub company: String,
    pub contact_email: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub title: String,
    pub company: String,
    pub contact_email: String,
}

#[derive(Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<u64, Job>>,
    next_id: AtomicU64,
}

impl JobStore {
    /// Simulated round-trip so the recorded db timings are non-trivial.
    async fn query_latency() {
        let ms = rand::thread_rng().gen_range(1..=5);
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    async fn get(&self, id: u64) -> Option<Job> {
        Self::query_latency().await;
        self.jobs.read().get(&id).cloned()
    }

    async fn list(&self) -> Vec<Job> {
        Self::query_latency().await;
        let mut jobs: Vec<Job> = self.jobs.read().values().cloned().collect();
        jobs.sort_by_key(|j| j.id);
        jobs
    }

    async fn insert(&self, req: CreateJobRequest) -> Job {
        Self::query_latency().await;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let job = Job {
            id,
            title: req.title,
            company: req.company,
            contact_email: req.contact_email,
        };
        self.jobs.write().insert(id, job.clone());
        job
    }
}

/// `/api/jobs` routes, carrying their own store.
pub fn routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/api/jobs", get(list_jobs).post(create_job))
        .route("/api/jobs/:id", get(get_job))
        .layer(Extension(Arc::new(JobStore::default())))
}

// ─── Handlers ────────────────────────────────────────────────────

async fn list_jobs(
    Extension(store): Extension<Arc<JobStore>>,
    db: DbTimings,
) -> Json<Vec<Job>> {
    Json(db.time(store.list()).await)
}

async fn get_job(
    Extension(store): Extension<Arc<JobStore>>,
    db: DbTimings,
    Path(id): Path<u64>,
) -> Result<Json<Job>, ApiError> {
    db.time(store.get(id))
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("job {id} not found")))
}

async fn create_job(
    Extension(store): Extension<Arc<JobStore>>,
    db: DbTimings,
    headers: HeaderMap,
    Json(req): Json<CreateJobRequest>,
) -> Result<Response, ApiError> {
    if req.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title must not be empty".into()));
    }

    let job = db.time(store.insert(req)).await;
    if let Ok(payload) = serde_json::to_value(&job) {
        tracing::info!(job = %redact(&payload), "job created");
    }

    let mut response = Json(job).into_response();
    if let Some(user) = headers.get("x-user-id").and_then(|v| v.to_str().ok()) {
        response
            .extensions_mut()
            .insert(AuthenticatedUser(user.to_string()));
    }
    Ok(response)
}
