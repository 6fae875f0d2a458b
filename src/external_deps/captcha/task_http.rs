//! Asynchronous token-solving client.
//!
//! [`HttpTaskTransport`] speaks the `createTask` / `getTaskResult` JSON API
//! used by the common solving vendors; [`TokenSolverClient`] owns the bounded
//! submit/poll cycle on top of any [`TaskTransport`]. The loop is sequential
//! and awaited: a fixed delay between polls, a poll-count budget, and a hard
//! wall-clock deadline that terminates the solve even if individual polls are
//! slow.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep};
use url::Url;

use super::{CaptchaConfig, CaptchaError, TaskStatus, TaskTransport, TokenProvider, TokenTask};

#[derive(Serialize)]
struct CreateTaskRequest<'a> {
    #[serde(rename = "clientKey")]
    client_key: &'a str,
    task: TaskPayload<'a>,
}

#[derive(Serialize)]
struct TaskPayload<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(rename = "websiteURL")]
    website_url: &'a str,
    #[serde(rename = "websiteKey")]
    website_key: &'a str,
    #[serde(rename = "action", skip_serializing_if = "Option::is_none")]
    action: Option<&'a str>,
    #[serde(rename = "cData", skip_serializing_if = "Option::is_none")]
    cdata: Option<&'a str>,
}

#[derive(Deserialize)]
struct CreateTaskResponse {
    #[serde(rename = "errorId", default)]
    error_id: i64,
    #[serde(rename = "errorCode", default)]
    error_code: Option<String>,
    #[serde(rename = "errorDescription", default)]
    error_description: Option<String>,
    #[serde(rename = "taskId", default)]
    task_id: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct TaskResultResponse {
    #[serde(rename = "errorId", default)]
    error_id: i64,
    #[serde(rename = "errorCode", default)]
    error_code: Option<String>,
    #[serde(rename = "errorDescription", default)]
    error_description: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    solution: Option<TaskSolution>,
}

#[derive(Deserialize)]
struct TaskSolution {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

fn service_error(code: Option<String>, description: Option<String>) -> String {
    match (code, description) {
        (Some(code), Some(desc)) if code != desc => format!("{code}: {desc}"),
        (Some(code), _) => code,
        (None, Some(desc)) => desc,
        (None, None) => "unspecified service error".into(),
    }
}

/// Reqwest-backed [`TaskTransport`] for the vendor JSON API.
#[derive(Debug, Clone)]
pub struct HttpTaskTransport {
    endpoint: Url,
    api_key: String,
    client: Client,
}

impl HttpTaskTransport {
    pub fn new(
        endpoint: Url,
        api_key: impl Into<String>,
        config: &CaptchaConfig,
    ) -> Result<Self, CaptchaError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| CaptchaError::Unreachable(err.to_string()))?;
        Ok(Self {
            endpoint,
            api_key: api_key.into(),
            client,
        })
    }

    fn route(&self, path: &str) -> Result<Url, CaptchaError> {
        self.endpoint
            .join(path)
            .map_err(|err| CaptchaError::Malformed(format!("bad endpoint route {path}: {err}")))
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: Url,
        body: &serde_json::Value,
    ) -> Result<T, CaptchaError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|err| CaptchaError::Unreachable(err.to_string()))?;
        response
            .json::<T>()
            .await
            .map_err(|err| CaptchaError::Malformed(err.to_string()))
    }
}

#[async_trait]
impl TaskTransport for HttpTaskTransport {
    async fn create_task(&self, task: &TokenTask) -> Result<String, CaptchaError> {
        let request = CreateTaskRequest {
            client_key: &self.api_key,
            task: TaskPayload {
                kind: "TurnstileTaskProxyless",
                website_url: task.page_url.as_str(),
                website_key: &task.site_key,
                action: task.action.as_deref(),
                cdata: task.cdata.as_deref(),
            },
        };
        let body = serde_json::to_value(&request)
            .map_err(|err| CaptchaError::Malformed(err.to_string()))?;

        let parsed: CreateTaskResponse = self.post_json(self.route("createTask")?, &body).await?;
        if parsed.error_id != 0 {
            return Err(CaptchaError::Rejected(service_error(
                parsed.error_code,
                parsed.error_description,
            )));
        }

        match parsed.task_id {
            Some(serde_json::Value::String(id)) => Ok(id),
            Some(serde_json::Value::Number(id)) => Ok(id.to_string()),
            _ => Err(CaptchaError::Malformed(
                "createTask answered without a task id".into(),
            )),
        }
    }

    async fn task_result(&self, task_id: &str) -> Result<TaskStatus, CaptchaError> {
        let body = serde_json::json!({
            "clientKey": self.api_key,
            "taskId": task_id,
        });

        let parsed: TaskResultResponse =
            self.post_json(self.route("getTaskResult")?, &body).await?;
        if parsed.error_id != 0 {
            return Ok(TaskStatus::Errored(service_error(
                parsed.error_code,
                parsed.error_description,
            )));
        }

        match parsed.status.as_deref() {
            Some("processing") | None => Ok(TaskStatus::Pending),
            Some("ready") => {
                let token = parsed
                    .solution
                    .and_then(|solution| solution.token.or(solution.text))
                    .ok_or_else(|| {
                        CaptchaError::Malformed("ready task carried no token".into())
                    })?;
                Ok(TaskStatus::Ready(token))
            }
            Some(other) => Err(CaptchaError::Malformed(format!(
                "unknown task status '{other}'"
            ))),
        }
    }
}

/// [`TokenProvider`] that drives the submit/poll cycle over a transport.
///
/// At most one live task exists per `solve` call, and a task that reported a
/// definitive error is never polled again.
pub struct TokenSolverClient {
    transport: Arc<dyn TaskTransport>,
    config: CaptchaConfig,
}

impl TokenSolverClient {
    pub fn new(transport: Arc<dyn TaskTransport>, config: CaptchaConfig) -> Self {
        Self { transport, config }
    }

    /// Convenience constructor wiring up the HTTP transport.
    pub fn http(
        endpoint: Url,
        api_key: impl Into<String>,
        config: CaptchaConfig,
    ) -> Result<Self, CaptchaError> {
        let transport = HttpTaskTransport::new(endpoint, api_key, &config)?;
        Ok(Self::new(Arc::new(transport), config))
    }
}

#[async_trait]
impl TokenProvider for TokenSolverClient {
    fn name(&self) -> &'static str {
        "token-solver"
    }

    async fn solve(&self, task: &TokenTask) -> Result<String, CaptchaError> {
        let task_id = self.transport.create_task(task).await?;
        log::debug!(
            "token task {task_id} submitted for site key {} on {}",
            task.site_key,
            task.page_url
        );

        let deadline = Instant::now() + self.config.solve_deadline;
        for poll in 1..=self.config.poll_budget {
            sleep(self.config.poll_interval).await;
            if Instant::now() >= deadline {
                log::warn!("token task {task_id} hit the solve deadline");
                return Err(CaptchaError::Timeout(self.config.solve_deadline));
            }

            match self.transport.task_result(&task_id).await? {
                TaskStatus::Pending => {
                    log::debug!("token task {task_id} still pending (poll {poll})");
                }
                TaskStatus::Ready(token) => {
                    log::info!("token task {task_id} solved after {poll} poll(s)");
                    return Ok(token);
                }
                TaskStatus::Errored(reason) => {
                    log::warn!("token task {task_id} failed: {reason}");
                    return Err(CaptchaError::Rejected(reason));
                }
            }
        }

        Err(CaptchaError::Timeout(
            self.config.poll_interval * self.config.poll_budget,
        ))
    }
}
