//! # Streaming
//!
//! Two halves. Backends that can stream implement [`StreamingModel`] and
//! yield [`ModelChunk`]s; [`collect_chunks`] folds them back into a
//! [`ModelResponse`] while forwarding text deltas. Callers of
//! [`Runner::run_streamed`](crate::runner::Runner::run_streamed) receive a
//! [`StreamingRun`]: a stream of [`RunEvent`]s ending in `Completed` or
//! `Failed`, plus the final result.
//!
//! Streaming only changes how progress is observed. The recorded history
//! and final output are the same as for a non-streamed run.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower::BoxError;

use crate::error::{AgentsError, RunError};
use crate::items::ConversationItem;
use crate::model::{ModelRequest, ModelResponse, ScriptedModel, ToolCallRequest};
use crate::result::RunResult;
use crate::usage::Usage;

/// One increment of a streamed model response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelChunk {
    TextDelta { delta: String },
    ToolCall { call: ToolCallRequest },
    Usage { usage: Usage },
}

pub type ChunkStream = BoxStream<'static, Result<ModelChunk, BoxError>>;

/// A backend that can stream its responses.
pub trait StreamingModel: Send + Sync {
    fn stream(&self, request: ModelRequest) -> BoxFuture<'static, Result<ChunkStream, BoxError>>;
}

/// Folds a chunk stream into a response, calling `on_delta` for each text delta.
pub async fn collect_chunks<F>(mut chunks: ChunkStream, mut on_delta: F) -> Result<ModelResponse, BoxError>
where
    F: FnMut(&str) + Send,
{
    let mut content: Option<String> = None;
    let mut tool_calls = Vec::new();
    let mut usage = None;
    while let Some(chunk) = chunks.next().await {
        match chunk? {
            ModelChunk::TextDelta { delta } => {
                on_delta(&delta);
                content.get_or_insert_with(String::new).push_str(&delta);
            }
            ModelChunk::ToolCall { call } => tool_calls.push(call),
            ModelChunk::Usage { usage: u } => usage = Some(u),
        }
    }
    Ok(ModelResponse {
        content,
        tool_calls,
        usage: usage.unwrap_or_else(Usage::request),
    })
}

/// Splits a complete response into the chunks a streaming backend would send.
pub fn response_chunks(response: ModelResponse) -> Vec<ModelChunk> {
    let mut chunks: Vec<ModelChunk> = response
        .content
        .as_deref()
        .map(|text| {
            text.split_inclusive(' ')
                .map(|word| ModelChunk::TextDelta {
                    delta: word.to_string(),
                })
                .collect()
        })
        .unwrap_or_default();
    chunks.extend(
        response
            .tool_calls
            .into_iter()
            .map(|call| ModelChunk::ToolCall { call }),
    );
    chunks.push(ModelChunk::Usage {
        usage: response.usage,
    });
    chunks
}

impl StreamingModel for ScriptedModel {
    fn stream(&self, request: ModelRequest) -> BoxFuture<'static, Result<ChunkStream, BoxError>> {
        let next = self.next_response(request);
        Box::pin(async move {
            let chunks = response_chunks(next?);
            Ok(stream::iter(chunks.into_iter().map(Ok)).boxed())
        })
    }
}

/// Progress of a streamed run.
#[derive(Debug, Clone)]
pub enum RunEvent {
    AgentStarted { agent: String },
    TextDelta { agent: String, delta: String },
    ItemAppended(ConversationItem),
    Handoff { source: String, target: String },
    Completed(Box<RunResult>),
    Failed { error: String },
}

impl RunEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunEvent::Completed(_) | RunEvent::Failed { .. })
    }
}

pub(crate) type EventSender = UnboundedSender<RunEvent>;

/// Handle to a run executing in a background task.
pub struct StreamingRun {
    run_id: String,
    events: UnboundedReceiverStream<RunEvent>,
    handle: JoinHandle<Result<RunResult, RunError>>,
}

impl StreamingRun {
    pub(crate) fn new(
        run_id: String,
        events: UnboundedReceiver<RunEvent>,
        handle: JoinHandle<Result<RunResult, RunError>>,
    ) -> Self {
        Self {
            run_id,
            events: UnboundedReceiverStream::new(events),
            handle,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Waits for the run to finish. Undelivered events are dropped.
    pub async fn result(self) -> Result<RunResult, RunError> {
        let Self { handle, run_id, .. } = self;
        finish(handle, run_id).await
    }

    /// Drains every event, then returns them with the final result.
    pub async fn collect(mut self) -> (Vec<RunEvent>, Result<RunResult, RunError>) {
        let mut events = Vec::new();
        while let Some(event) = self.events.next().await {
            events.push(event);
        }
        let Self { handle, run_id, .. } = self;
        (events, finish(handle, run_id).await)
    }
}

/// Joins the run task. An aborted task still reports its run id.
async fn finish(
    handle: JoinHandle<Result<RunResult, RunError>>,
    run_id: String,
) -> Result<RunResult, RunError> {
    match handle.await {
        Ok(outcome) => outcome,
        Err(join) => {
            let mut partial = RunResult::empty("");
            partial.run_id = run_id;
            Err(RunError::new(AgentsError::RunAborted(join.to_string()), partial))
        }
    }
}

impl Stream for StreamingRun {
    type Item = RunEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(agent: &str) -> ModelRequest {
        ModelRequest {
            agent: agent.to_string(),
            instructions: String::new(),
            output_schema: None,
            tools: vec![],
            history: vec![],
            settings: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_aborted_run_keeps_run_id() {
        let (_tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = tokio::spawn(futures::future::pending::<Result<RunResult, RunError>>());
        handle.abort();

        let run = StreamingRun::new("run-42".to_string(), rx, handle);
        let err = run.result().await.unwrap_err();
        assert!(matches!(err.error(), AgentsError::RunAborted(_)));
        assert_eq!(err.partial().run_id, "run-42");
    }

    #[tokio::test]
    async fn test_collect_rebuilds_response() {
        let model = ScriptedModel::new().respond(
            "poet",
            ModelResponse::text("roses are red").with_usage(Usage::new(3, 3)),
        );
        let chunks = StreamingModel::stream(&model, request("poet")).await.unwrap();

        let mut deltas = Vec::new();
        let response = collect_chunks(chunks, |d| deltas.push(d.to_string())).await.unwrap();
        assert_eq!(deltas, vec!["roses ", "are ", "red"]);
        assert_eq!(response.content.as_deref(), Some("roses are red"));
        assert_eq!(response.usage.total_tokens, 6);
    }

    #[tokio::test]
    async fn test_tool_calls_pass_through() {
        let model =
            ScriptedModel::new().respond("calc", ModelResponse::tool_call("add", json!({"a": 1})));
        let chunks = StreamingModel::stream(&model, request("calc")).await.unwrap();
        let response = collect_chunks(chunks, |_| {}).await.unwrap();
        assert!(response.content.is_none());
        assert_eq!(response.tool_calls[0].name, "add");
        assert_eq!(response.usage.request_count, 1);
    }

    #[tokio::test]
    async fn test_stream_error_surfaces() {
        let chunks: ChunkStream = stream::iter(vec![
            Ok(ModelChunk::TextDelta { delta: "partial".into() }),
            Err::<ModelChunk, BoxError>("connection reset".into()),
        ])
        .boxed();
        let err = collect_chunks(chunks, |_| {}).await.unwrap_err();
        assert_eq!(err.to_string(), "connection reset");
    }
}
