//! Prose recommendations for the offline report.
//!
//! With an API key configured, a compact summary is sent to an
//! OpenAI-compatible chat completion endpoint. Without one, or on any
//! failure, the report falls back to a fixed list.

use serde::Serialize;
use serde_json::{json, Value};

use super::anomaly::Finding;
use crate::config::AnalysisConfig;
use crate::error::{MonitorError, MonitorResult};
use crate::metrics::RouteSummary;

pub const STATIC_RECOMMENDATIONS: &[&str] = &[
    "Add database indexes for the columns filtered on by the slowest routes.",
    "Cache responses for read-heavy routes whose data changes rarely.",
    "Paginate list endpoints and cap page sizes to bound response payloads.",
    "Batch or join related queries to avoid N+1 query patterns.",
    "Move slow, non-critical work (emails, file processing) to background jobs.",
    "Review error logs for routes with elevated error rates and add input validation.",
];

const SYSTEM_PROMPT: &str = "You are a backend performance engineer. Given request \
    statistics for a web application, reply with 3 to 6 concise, actionable \
    recommendations, one per line, each starting with \"- \".";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationSource {
    Ai,
    Static,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendations {
    pub source: RecommendationSource,
    pub items: Vec<String>,
}

impl Recommendations {
    pub fn fallback() -> Self {
        Self {
            source: RecommendationSource::Static,
            items: STATIC_RECOMMENDATIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

pub struct Recommender {
    client: reqwest::Client,
    api_key: Option<String>,
    endpoint: String,
    model: String,
}

impl Recommender {
    pub fn new(client: reqwest::Client, api_key: Option<String>, endpoint: String, model: String) -> Self {
        Self {
            client,
            api_key,
            endpoint,
            model,
        }
    }

    pub fn from_config(config: &AnalysisConfig, client: reqwest::Client) -> Self {
        Self::new(
            client,
            config.ai_api_key.clone(),
            config.ai_endpoint.clone(),
            config.ai_model.clone(),
        )
    }

    /// Never fails: every problem degrades to the static list.
    pub async fn recommend(&self, slowest: &[RouteSummary], findings: &[Finding]) -> Recommendations {
        let Some(api_key) = self.api_key.as_deref() else {
            tracing::info!("no text-generation credential configured; using static recommendations");
            return Recommendations::fallback();
        };

        let prompt = build_prompt(slowest, findings);
        match self.request(api_key, &prompt).await {
            Ok(items) if !items.is_empty() => Recommendations {
                source: RecommendationSource::Ai,
                items,
            },
            Ok(_) => {
                tracing::info!("text-generation service returned no recommendations; using static list");
                Recommendations::fallback()
            }
            Err(e) => {
                tracing::info!(error = %e, "text-generation service unavailable; using static recommendations");
                Recommendations::fallback()
            }
        }
    }

    async fn request(&self, api_key: &str, prompt: &str) -> MonitorResult<Vec<String>> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
            ],
            "temperature": 0.2,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(MonitorError::UnexpectedResponse {
                service: "text generation",
                detail: format!("status {status}"),
            });
        }
        let value: Value = response.json().await?;
        parse_completion(&value)
    }
}

/// Compact, plain-text description of the period for the model.
pub fn build_prompt(slowest: &[RouteSummary], findings: &[Finding]) -> String {
    let mut prompt = String::from("Slowest routes by p95:\n");
    if slowest.is_empty() {
        prompt.push_str("(no traffic recorded)\n");
    }
    for s in slowest {
        prompt.push_str(&format!(
            "- {}: {} requests, avg {:.1}ms, p95 {:.1}ms, p99 {:.1}ms, db {:.0}%, errors {:.1}%\n",
            s.route,
            s.count,
            s.avg_duration_ms,
            s.p95_duration_ms,
            s.p99_duration_ms,
            s.db_time_percent,
            s.error_rate(),
        ));
    }

    prompt.push_str("\nBottlenecks:\n");
    if findings.is_empty() {
        prompt.push_str("(none)\n");
    }
    for f in findings {
        prompt.push_str(&format!(
            "- [{}] {} on {}: {}\n",
            f.severity.as_str(),
            f.kind.as_str(),
            f.route,
            f.message
        ));
    }
    prompt
}

/// Pull `choices[0].message.content` out of a chat completion and split it
/// into bullet items.
pub fn parse_completion(value: &Value) -> MonitorResult<Vec<String>> {
    let content = value
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| MonitorError::UnexpectedResponse {
            service: "text generation",
            detail: "missing choices[0].message.content".into(),
        })?;
    Ok(bullet_items(content))
}

fn bullet_items(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .map(|line| {
            let line = line.trim_start_matches(['-', '*', '•']).trim_start();
            // "1. Foo" / "2) Foo"
            let digits = line.chars().take_while(char::is_ascii_digit).count();
            if digits > 0 && matches!(line[digits..].chars().next(), Some('.' | ')')) {
                line[digits + 1..].trim_start()
            } else {
                line
            }
        })
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::anomaly::detect;
    use axum::{
        extract::State,
        http::{header, HeaderMap, StatusCode},
        routing::post,
        Json, Router,
    };
    use tokio::sync::mpsc;

    /// Authorization header and JSON body of one request.
    type Seen = (Option<String>, Value);

    /// Chat completion endpoint on an ephemeral port that always answers
    /// `status` with `reply`.
    async fn spawn_completions(status: StatusCode, reply: Value) -> (String, mpsc::Receiver<Seen>) {
        let (tx, rx) = mpsc::channel(4);
        let handler = move |State(tx): State<mpsc::Sender<Seen>>,
                            headers: HeaderMap,
                            Json(body): Json<Value>| {
            let reply = reply.clone();
            async move {
                let auth = headers
                    .get(header::AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let _ = tx.send((auth, body)).await;
                (status, Json(reply))
            }
        };
        let app = Router::new()
            .route("/v1/chat/completions", post(handler))
            .with_state(tx);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{addr}/v1/chat/completions"), rx)
    }

    fn completion(content: &str) -> Value {
        json!({ "choices": [{ "message": { "role": "assistant", "content": content } }] })
    }

    fn slow_jobs() -> RouteSummary {
        RouteSummary {
            count: 4,
            p95_duration_ms: 750.0,
            success_rate: 100.0,
            ..RouteSummary::from_records("/api/jobs", &[])
        }
    }

    #[test]
    fn parses_bullets_and_numbered_lines() {
        let reply = json!({
            "choices": [{ "message": { "role": "assistant", "content":
                "- Add an index on jobs.company\n\n2. Cache the listing page\n* Paginate results\n  3) Trim payloads" } }]
        });
        let items = parse_completion(&reply).unwrap();
        assert_eq!(
            items,
            [
                "Add an index on jobs.company",
                "Cache the listing page",
                "Paginate results",
                "Trim payloads",
            ]
        );
    }

    #[test]
    fn malformed_completion_is_an_error() {
        assert!(parse_completion(&json!({ "error": "quota" })).is_err());
        assert!(parse_completion(&json!({ "choices": [] })).is_err());
    }

    #[test]
    fn prompt_lists_routes_and_bottlenecks() {
        let slow = slow_jobs();
        let findings = detect(std::slice::from_ref(&slow));
        let prompt = build_prompt(&[slow], &findings);
        assert!(prompt.contains("/api/jobs: 4 requests"));
        assert!(prompt.contains("[high] slow_response on /api/jobs"));
    }

    #[tokio::test]
    async fn missing_credential_uses_static_list() {
        let recommender = Recommender::new(
            reqwest::Client::new(),
            None,
            "http://127.0.0.1:9/v1/chat/completions".into(),
            "m".into(),
        );
        let recs = recommender.recommend(&[], &[]).await;
        assert_eq!(recs.source, RecommendationSource::Static);
        assert_eq!(recs.items.len(), STATIC_RECOMMENDATIONS.len());
    }

    #[tokio::test]
    async fn unreachable_service_degrades_to_static_list() {
        let recommender = Recommender::new(
            reqwest::Client::new(),
            Some("key".into()),
            "http://127.0.0.1:9/v1/chat/completions".into(),
            "m".into(),
        );
        let recs = recommender.recommend(&[], &[]).await;
        assert_eq!(recs.source, RecommendationSource::Static);
    }

    #[tokio::test]
    async fn completion_reply_becomes_generated_recommendations() {
        let (url, mut seen) =
            spawn_completions(StatusCode::OK, completion("- Add an index\n- Cache listings")).await;
        let recommender = Recommender::new(
            reqwest::Client::new(),
            Some("sk-test".into()),
            url,
            "test-model".into(),
        );
        let slow = slow_jobs();
        let findings = detect(std::slice::from_ref(&slow));

        let recs = recommender.recommend(&[slow], &findings).await;
        assert_eq!(recs.source, RecommendationSource::Ai);
        assert_eq!(recs.items, ["Add an index", "Cache listings"]);

        let (auth, body) = seen.recv().await.unwrap();
        assert_eq!(auth.as_deref(), Some("Bearer sk-test"));
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["temperature"], 0.2);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        let prompt = body["messages"][1]["content"].as_str().unwrap();
        assert!(prompt.contains("/api/jobs: 4 requests"));
        assert!(prompt.contains("slow_response on /api/jobs"));
    }

    #[tokio::test]
    async fn error_status_falls_back_to_static_list() {
        let (url, mut seen) = spawn_completions(
            StatusCode::TOO_MANY_REQUESTS,
            json!({ "error": { "message": "rate limited" } }),
        )
        .await;
        let recommender =
            Recommender::new(reqwest::Client::new(), Some("k".into()), url, "m".into());

        let recs = recommender.recommend(&[], &[]).await;
        assert_eq!(recs.source, RecommendationSource::Static);
        assert!(seen.recv().await.is_some());
    }

    #[tokio::test]
    async fn blank_completion_falls_back_to_static_list() {
        let (url, _seen) = spawn_completions(StatusCode::OK, completion("\n  \n")).await;
        let recommender =
            Recommender::new(reqwest::Client::new(), Some("k".into()), url, "m".into());

        let recs = recommender.recommend(&[], &[]).await;
        assert_eq!(recs.source, RecommendationSource::Static);
        assert_eq!(recs.items.len(), STATIC_RECOMMENDATIONS.len());
    }
}
