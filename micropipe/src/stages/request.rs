//! HTTP calls per value.

use super::transform::RetryPolicy;
use crate::pipeline::{Emitter, ItemHandler, Stage, StageOptions};
use async_trait::async_trait;
use micropipe_shared::{FlowValue, PipelineError, PipelineResult};
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

fn default_client() -> Client {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Decode a JSON response body.
pub async fn decode_json<T: DeserializeOwned>(response: Response) -> PipelineResult<T> {
    response
        .json::<T>()
        .await
        .map_err(|e| PipelineError::Http(format!("invalid JSON body: {}", e)))
}

/// Decode a response body as text.
pub async fn decode_text(response: Response) -> PipelineResult<String> {
    response
        .text()
        .await
        .map_err(|e| PipelineError::Http(format!("unreadable body: {}", e)))
}

/// Requests every incoming URL and emits the decoded response.
///
/// A transport error, a status outside 2xx or a failed decode each count as
/// one failed attempt. Attempts follow the stage's [`RetryPolicy`]; once they
/// run out the URL is lost. The URL's metadata is carried over to the decoded
/// value.
pub struct Request<O, D> {
    client: Client,
    method: Method,
    decoder: D,
    retry: RetryPolicy,
    options: StageOptions<O>,
}

impl<O, D, Fut> Request<O, D>
where
    D: Fn(Response) -> Fut,
    Fut: Future<Output = PipelineResult<O>>,
{
    /// `GET` every URL with a client of its own and the default retry policy.
    pub fn new(decoder: D) -> Self {
        Self {
            client: default_client(),
            method: Method::GET,
            decoder,
            retry: RetryPolicy::default(),
            options: StageOptions::default(),
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Share a client, and its connection pool, with other stages.
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn attempt(&self, url: &str) -> PipelineResult<O> {
        let response = self
            .client
            .request(self.method.clone(), url)
            .send()
            .await
            .map_err(|e| PipelineError::Http(format!("{} {} failed: {}", self.method, url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Http(format!(
                "{} {} returned HTTP {}",
                self.method, url, status
            )));
        }

        (self.decoder)(response).await
    }
}

#[async_trait]
impl<O, D, Fut> ItemHandler for Request<O, D>
where
    O: Send + 'static,
    D: Fn(Response) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PipelineResult<O>> + Send + 'static,
{
    type Input = String;
    type Output = O;

    fn kind(&self) -> &'static str {
        "Request"
    }

    fn options(&self) -> &StageOptions<O> {
        &self.options
    }

    fn options_mut(&mut self) -> &mut StageOptions<O> {
        &mut self.options
    }

    async fn handle(&self, item: &FlowValue<String>, out: &Emitter<O>) -> PipelineResult<bool> {
        let stage = Stage::name(self);
        match self.retry.run(stage, move || self.attempt(&item.value)).await {
            Some(decoded) => {
                out.emit(decoded, item.meta.clone()).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
