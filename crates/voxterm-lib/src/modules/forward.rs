//! Catch-all that hands unmatched commands to a home-automation server.
//!
//! Request: `POST <url>` with `{"text": .., "model": ..}`.
//! Response: `{"handled": bool, "reply": string?}`; `handled` defaults to
//! true. An unhandled command passes on to the next module.
//!
//! Handlers run while the dispatch lock is held, so the HTTP call is driven
//! on a worker thread with its own current-thread runtime. It never waits on
//! the runtime that serves the API.

use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

use voxterm_core::effects::Outcome;
use voxterm_core::error::HandlerError;
use voxterm_core::module::{Handler, Invocation};

const FORWARD_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct ForwardRequest<'a> {
    text: &'a str,
    model: Option<&'a str>,
}

#[derive(Deserialize)]
struct ForwardResponse {
    #[serde(default = "handled_by_default")]
    handled: bool,
    #[serde(default)]
    reply: Option<String>,
}

fn handled_by_default() -> bool {
    true
}

struct Job {
    text: String,
    model: Option<String>,
    done: std_mpsc::Sender<Result<ForwardResponse, String>>,
}

/// Cheap to clone; the worker thread exits once every clone is dropped.
#[derive(Clone)]
pub struct ForwardHandler {
    jobs: mpsc::UnboundedSender<Job>,
}

impl ForwardHandler {
    /// Start the forward worker thread for `url`.
    pub fn spawn(url: impl Into<String>) -> std::io::Result<Self> {
        let url = url.into();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (jobs, mut job_rx) = mpsc::unbounded_channel::<Job>();

        std::thread::Builder::new()
            .name("voxterm-forward".into())
            .spawn(move || {
                runtime.block_on(async move {
                    let client = reqwest::Client::new();
                    while let Some(job) = job_rx.recv().await {
                        let resp = forward(&client, &url, &job.text, job.model.as_deref()).await;
                        let _ = job.done.send(resp);
                    }
                });
                info!("forward worker stopped");
            })?;

        Ok(Self { jobs })
    }
}

async fn forward(
    client: &reqwest::Client,
    url: &str,
    text: &str,
    model: Option<&str>,
) -> Result<ForwardResponse, String> {
    let resp = client
        .post(url)
        .timeout(FORWARD_TIMEOUT)
        .json(&ForwardRequest { text, model })
        .send()
        .await
        .map_err(|e| format!("forward request failed: {e}"))?;

    let status = resp.status();
    if !status.is_success() {
        let detail = resp.text().await.unwrap_or_default();
        return Err(format!("forward server error {status}: {detail}"));
    }
    resp.json::<ForwardResponse>()
        .await
        .map_err(|e| format!("forward response is not valid JSON: {e}"))
}

impl Handler for ForwardHandler {
    fn handle(&self, call: &Invocation<'_>) -> Result<Outcome, HandlerError> {
        debug!("forward: {:?}", call.utterance);
        let (done, result) = std_mpsc::channel();
        self.jobs
            .send(Job {
                text: call.utterance.to_string(),
                model: call.active_model.map(str::to_owned),
                done,
            })
            .map_err(|_| "forward worker is gone")?;
        let resp = result
            .recv()
            .map_err(|_| "forward worker dropped the request")??;

        if !resp.handled {
            return Ok(Outcome::next());
        }
        Ok(match resp.reply {
            Some(reply) if !reply.trim().is_empty() => Outcome::say(reply),
            _ => Outcome::silent(),
        })
    }
}
