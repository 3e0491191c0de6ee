use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Result};
use futures::StreamExt;
#[allow(deprecated)]
use rig::client::completion::CompletionModelHandle;
use rig::completion::{CompletionModel, CompletionRequest, Message};
use rig::message::{AssistantContent, Text, ToolCall, ToolResult, ToolResultContent, UserContent};
use rig::streaming::StreamedAssistantContent;
use rig::OneOrMany;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::message::{ConversationMessage, Role, ToolCallRef};
use crate::stream::{Delimiter, StreamEvent};
use crate::tools::ToolRegistry;

pub type EventReceiver = mpsc::Receiver<Result<StreamEvent>>;

/// The opaque capability that, given the history and a catalog of callable
/// operations, streams back a response that may invoke some of them.
pub trait ReasoningEngine: Send + Sync {
    fn respond(&self, history: Vec<ConversationMessage>, catalog: Arc<ToolRegistry>) -> EventReceiver;
}

/// Reasoning backed by a rig completion model.
///
/// Runs its own model <> tool loop: each model turn is streamed as events,
/// requested tools are executed through the catalog and their results fed
/// back, until the model answers without calling a tool.
#[allow(deprecated)]
#[derive(Clone)]
pub struct RigReasoningEngine {
    model: CompletionModelHandle<'static>,
    model_name: String,
    agent_name: String,
    instructions: String,
    temperature: f64,
    max_tokens: u64,
    max_tool_iterations: usize,
}

#[allow(deprecated)]
impl RigReasoningEngine {
    pub fn new(
        model: CompletionModelHandle<'static>,
        model_name: impl Into<String>,
        agent_name: impl Into<String>,
        instructions: impl Into<String>,
    ) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            agent_name: agent_name.into(),
            instructions: instructions.into(),
            temperature: 0.7,
            max_tokens: 4096,
            max_tool_iterations: 10,
        }
    }

    pub fn with_sampling(mut self, temperature: f64, max_tokens: u64) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_max_tool_iterations(mut self, max: usize) -> Self {
        self.max_tool_iterations = max.max(1);
        self
    }

    /// Drive the model <> tool loop, pushing every message it creates onto
    /// `produced` as soon as it exists.
    async fn run(
        &self,
        history: Vec<ConversationMessage>,
        catalog: &ToolRegistry,
        tx: &mpsc::Sender<Result<StreamEvent>>,
        produced: &mut Vec<ConversationMessage>,
    ) -> Result<()> {
        let tool_defs = catalog.definitions();
        let mut chat = to_rig_history(&history);
        let sender = Some(self.agent_name.clone());

        for iteration in 1..=self.max_tool_iterations {
            let request = CompletionRequest {
                preamble: Some(self.instructions.clone()),
                chat_history: OneOrMany::many(chat.clone())
                    .map_err(|_| anyhow!("cannot prompt the model with an empty history"))?,
                documents: Vec::new(),
                tools: tool_defs.clone(),
                temperature: Some(self.temperature),
                max_tokens: Some(self.max_tokens),
                tool_choice: None,
                additional_params: None,
            };

            debug!(
                "LLM request [{iteration}/{}]: {} messages to {}",
                self.max_tool_iterations,
                chat.len(),
                self.model_name
            );
            let started = Instant::now();
            let mut stream = self
                .model
                .stream(request)
                .await
                .map_err(|e| anyhow!("LLM completion error: {e}"))?;

            emit(tx, StreamEvent::TurnDelimiter(Delimiter::Start)).await?;
            let mut text = String::new();
            let mut calls: Vec<ToolCall> = Vec::new();
            while let Some(chunk) = stream.next().await {
                match chunk.map_err(|e| anyhow!("LLM stream error: {e}"))? {
                    StreamedAssistantContent::Text(t) if !t.text.is_empty() => {
                        text.push_str(&t.text);
                        emit(
                            tx,
                            StreamEvent::ContentDelta {
                                sender: sender.clone(),
                                text: t.text,
                            },
                        )
                        .await?;
                    }
                    StreamedAssistantContent::ToolCall { tool_call, .. } => {
                        emit(
                            tx,
                            StreamEvent::ToolCallAnnounced {
                                sender: sender.clone(),
                                action: tool_call.function.name.clone(),
                            },
                        )
                        .await?;
                        calls.push(tool_call);
                    }
                    _ => {}
                }
            }
            emit(tx, StreamEvent::TurnDelimiter(Delimiter::End)).await?;

            debug!(
                "LLM response [{iteration}/{}]: {} chars, {} tool call(s) in {:.1}s",
                self.max_tool_iterations,
                text.len(),
                calls.len(),
                started.elapsed().as_secs_f64()
            );

            let refs = calls
                .iter()
                .map(|tc| ToolCallRef {
                    name: tc.function.name.clone(),
                })
                .collect();
            produced.push(ConversationMessage::assistant(&self.agent_name, &text, refs));

            if calls.is_empty() {
                return emit(tx, StreamEvent::FinalResponse(std::mem::take(produced))).await;
            }

            let mut content = Vec::with_capacity(calls.len() + 1);
            if !text.is_empty() {
                content.push(AssistantContent::Text(Text { text }));
            }
            content.extend(calls.iter().cloned().map(AssistantContent::ToolCall));
            chat.push(Message::Assistant {
                id: None,
                content: OneOrMany::many(content)
                    .map_err(|_| anyhow!("model turn produced no content"))?,
            });

            let mut results = Vec::with_capacity(calls.len());
            for tc in &calls {
                let name = &tc.function.name;
                info!(
                    "Tool call [{iteration}/{}]: {name}({})",
                    self.max_tool_iterations,
                    preview(&tc.function.arguments.to_string(), 200)
                );
                let output = catalog.execute(name, tc.function.arguments.clone()).await;
                debug!("Tool result [{name}]: {}", preview(&output, 200));

                produced.push(ConversationMessage::tool(name.as_str(), output.as_str()));
                results.push(UserContent::ToolResult(ToolResult {
                    id: tc.id.clone(),
                    call_id: tc.call_id.clone(),
                    content: OneOrMany::one(ToolResultContent::Text(Text { text: output })),
                }));
            }
            chat.push(Message::User {
                content: OneOrMany::many(results)
                    .map_err(|_| anyhow!("tool calls produced no results"))?,
            });
        }

        warn!(
            "Reasoning stopped after {} tool iterations without a final answer",
            self.max_tool_iterations
        );
        emit(tx, StreamEvent::FinalResponse(std::mem::take(produced))).await
    }
}

impl ReasoningEngine for RigReasoningEngine {
    fn respond(&self, history: Vec<ConversationMessage>, catalog: Arc<ToolRegistry>) -> EventReceiver {
        let (tx, rx) = mpsc::channel(64);
        let engine = self.clone();
        tokio::spawn(async move {
            let mut produced = Vec::new();
            if let Err(e) = engine.run(history, &catalog, &tx, &mut produced).await {
                // Tools may already have acted; their record must reach history.
                if !produced.is_empty() {
                    warn!(
                        "Response failed after {} message(s); handing them back",
                        produced.len()
                    );
                    let _ = tx.send(Ok(StreamEvent::PartialResponse(produced))).await;
                }
                let _ = tx.send(Err(e)).await;
            }
        });
        rx
    }
}

async fn emit(tx: &mpsc::Sender<Result<StreamEvent>>, event: StreamEvent) -> Result<()> {
    tx.send(Ok(event))
        .await
        .map_err(|_| anyhow!("response stream closed by receiver"))
}

fn user_text(text: String) -> Message {
    Message::User {
        content: OneOrMany::one(UserContent::Text(Text { text })),
    }
}

/// Convert stored history into rig messages.
///
/// Only names of past tool calls are kept in history, so earlier tool turns
/// are replayed as plain text rather than as structured calls.
fn to_rig_history(history: &[ConversationMessage]) -> Vec<Message> {
    history
        .iter()
        .map(|msg| match msg.role {
            Role::User => user_text(msg.text().to_string()),
            Role::Assistant => {
                let mut text = msg.text().to_string();
                if !msg.tool_calls.is_empty() {
                    let names: Vec<&str> = msg.tool_calls.iter().map(|c| c.name.as_str()).collect();
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(&format!("[called: {}]", names.join(", ")));
                }
                Message::Assistant {
                    id: None,
                    content: OneOrMany::one(AssistantContent::Text(Text { text })),
                }
            }
            Role::Tool => user_text(format!(
                "[result of {}] {}",
                msg.sender.as_deref().unwrap_or("tool"),
                msg.text()
            )),
        })
        .collect()
}

fn preview(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... ({} chars)", &s[..end], s.len())
}
