//! Reduces the incremental events of one reasoning invocation into console
//! output and the finalized messages for the history.

use std::io::Write;

use anyhow::{bail, Result};
use colored::Colorize;
use tokio::sync::mpsc;

use crate::message::ConversationMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    Start,
    End,
}

/// One event of a streamed response, in temporal order. A stream ends with
/// exactly one `FinalResponse`.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    ContentDelta {
        sender: Option<String>,
        text: String,
    },
    ToolCallAnnounced {
        sender: Option<String>,
        action: String,
    },
    TurnDelimiter(Delimiter),
    /// Messages already acted on when a response fails part way; the error
    /// follows on the stream.
    PartialResponse(Vec<ConversationMessage>),
    FinalResponse(Vec<ConversationMessage>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Emitting,
}

pub struct StreamAccumulator<W: Write> {
    out: W,
    styled: bool,
    state: State,
    buffer: String,
    line_open: bool,
    last_sender: Option<String>,
    completed: Vec<String>,
    partial: Vec<ConversationMessage>,
}

impl<W: Write> StreamAccumulator<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            styled: false,
            state: State::Idle,
            buffer: String::new(),
            line_open: false,
            last_sender: None,
            completed: Vec::new(),
            partial: Vec::new(),
        }
    }

    /// Colour sender names and action names.
    pub fn styled(mut self, styled: bool) -> Self {
        self.styled = styled;
        self
    }

    pub fn reset(&mut self) {
        self.state = State::Idle;
        self.buffer.clear();
        self.line_open = false;
        self.last_sender = None;
        self.completed.clear();
        self.partial.clear();
    }

    /// Messages from a response that failed after acting.
    pub fn take_partial(&mut self) -> Vec<ConversationMessage> {
        std::mem::take(&mut self.partial)
    }

    /// Output units flushed so far in this invocation.
    pub fn completed(&self) -> &[String] {
        &self.completed
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.out
    }

    pub fn is_styled(&self) -> bool {
        self.styled
    }

    /// Feed one event. Returns the messages once the final response arrives.
    pub fn handle(&mut self, event: StreamEvent) -> std::io::Result<Option<Vec<ConversationMessage>>> {
        match event {
            StreamEvent::ContentDelta { sender, text } => {
                self.note_sender(sender);
                if text.is_empty() {
                    return Ok(None);
                }
                if self.state == State::Idle {
                    if let Some(name) = self.last_sender.clone() {
                        write!(self.out, "{} ", self.paint_sender(&format!("{name}:")))?;
                    }
                    self.state = State::Emitting;
                }
                write!(self.out, "{text}")?;
                self.line_open = true;
                self.buffer.push_str(&text);
            }
            StreamEvent::ToolCallAnnounced { sender, action } => {
                self.note_sender(sender);
                if self.line_open {
                    writeln!(self.out)?;
                    self.line_open = false;
                }
                let who = self.last_sender.clone().unwrap_or_default();
                let call = format!("{action}()");
                let call = if self.styled {
                    call.magenta().to_string()
                } else {
                    call
                };
                writeln!(self.out, "{} {call}", self.paint_sender(&format!("{who}:")))?;
            }
            StreamEvent::TurnDelimiter(Delimiter::Start) => {}
            StreamEvent::TurnDelimiter(Delimiter::End) => {
                if self.line_open {
                    writeln!(self.out)?;
                    self.line_open = false;
                }
                if !self.buffer.is_empty() {
                    self.completed.push(std::mem::take(&mut self.buffer));
                }
                self.state = State::Idle;
            }
            StreamEvent::PartialResponse(messages) => {
                self.partial.extend(messages);
            }
            StreamEvent::FinalResponse(messages) => {
                self.out.flush()?;
                return Ok(Some(messages));
            }
        }
        self.out.flush()?;
        Ok(None)
    }

    /// Drain one invocation's event channel, returning its final messages.
    pub async fn consume(
        &mut self,
        events: &mut mpsc::Receiver<Result<StreamEvent>>,
    ) -> Result<Vec<ConversationMessage>> {
        self.reset();
        while let Some(item) = events.recv().await {
            if let Some(messages) = self.handle(item?)? {
                return Ok(messages);
            }
        }
        bail!("response stream ended without a final response")
    }

    fn note_sender(&mut self, sender: Option<String>) {
        if let Some(name) = sender.filter(|s| !s.is_empty()) {
            self.last_sender = Some(name);
        }
    }

    fn paint_sender(&self, label: &str) -> String {
        if self.styled {
            label.blue().bold().to_string()
        } else {
            label.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(text: &str) -> StreamEvent {
        StreamEvent::ContentDelta {
            sender: Some("Manlet".into()),
            text: text.into(),
        }
    }

    fn output(acc: &StreamAccumulator<Vec<u8>>) -> String {
        String::from_utf8(acc.get_ref().clone()).unwrap()
    }

    async fn run(events: Vec<Result<StreamEvent>>) -> (StreamAccumulator<Vec<u8>>, Result<Vec<ConversationMessage>>) {
        let (tx, mut rx) = mpsc::channel(16);
        for event in events {
            tx.send(event).await.unwrap();
        }
        drop(tx);
        let mut acc = StreamAccumulator::new(Vec::new());
        let result = acc.consume(&mut rx).await;
        (acc, result)
    }

    #[tokio::test]
    async fn deltas_flush_once_at_end_of_turn() {
        let msg = ConversationMessage::assistant("Manlet", "Hi there", Vec::new());
        let (acc, result) = run(vec![
            Ok(delta("Hi")),
            Ok(delta(" there")),
            Ok(StreamEvent::TurnDelimiter(Delimiter::End)),
            Ok(StreamEvent::FinalResponse(vec![msg.clone()])),
        ])
        .await;

        assert_eq!(result.unwrap(), vec![msg]);
        assert_eq!(acc.completed(), ["Hi there".to_string()]);
        let out = output(&acc);
        assert_eq!(out, "Manlet: Hi there\n");
        assert_eq!(out.matches("Hi there").count(), 1);
    }

    #[tokio::test]
    async fn tool_calls_are_announced_on_their_own_line() {
        let (acc, result) = run(vec![
            Ok(StreamEvent::TurnDelimiter(Delimiter::Start)),
            Ok(delta("Sending now")),
            Ok(StreamEvent::ToolCallAnnounced {
                sender: Some("Manlet".into()),
                action: "transfer_asset".into(),
            }),
            Ok(StreamEvent::TurnDelimiter(Delimiter::End)),
            Ok(StreamEvent::FinalResponse(Vec::new())),
        ])
        .await;

        assert!(result.unwrap().is_empty());
        assert_eq!(output(&acc), "Manlet: Sending now\nManlet: transfer_asset()\n");
        assert_eq!(acc.completed(), ["Sending now".to_string()]);
    }

    #[tokio::test]
    async fn each_turn_gets_its_own_prefix() {
        let (acc, _) = run(vec![
            Ok(delta("one")),
            Ok(StreamEvent::TurnDelimiter(Delimiter::End)),
            Ok(delta("two")),
            Ok(StreamEvent::TurnDelimiter(Delimiter::End)),
            Ok(StreamEvent::FinalResponse(Vec::new())),
        ])
        .await;
        assert_eq!(output(&acc), "Manlet: one\nManlet: two\n");
        assert_eq!(acc.completed().len(), 2);
    }

    #[tokio::test]
    async fn end_without_content_flushes_nothing() {
        let (acc, _) = run(vec![
            Ok(StreamEvent::TurnDelimiter(Delimiter::End)),
            Ok(StreamEvent::FinalResponse(Vec::new())),
        ])
        .await;
        assert!(acc.completed().is_empty());
        assert_eq!(output(&acc), "");
    }

    #[tokio::test]
    async fn missing_final_response_is_an_error() {
        let (_, result) = run(vec![Ok(delta("dangling"))]).await;
        assert!(result.unwrap_err().to_string().contains("without a final response"));
    }

    #[tokio::test]
    async fn stream_errors_propagate() {
        let (_, result) = run(vec![
            Ok(delta("partial")),
            Err(anyhow::anyhow!("provider hung up")),
        ])
        .await;
        assert_eq!(result.unwrap_err().to_string(), "provider hung up");
    }

    #[tokio::test]
    async fn empty_deltas_print_nothing() {
        let (acc, _) = run(vec![
            Ok(delta("")),
            Ok(StreamEvent::ToolCallAnnounced {
                sender: Some("Manlet".into()),
                action: "request_sol_from_faucet".into(),
            }),
            Ok(StreamEvent::TurnDelimiter(Delimiter::End)),
            Ok(delta("Funded.")),
            Ok(StreamEvent::TurnDelimiter(Delimiter::End)),
            Ok(StreamEvent::FinalResponse(Vec::new())),
        ])
        .await;
        assert_eq!(
            output(&acc),
            "Manlet: request_sol_from_faucet()\nManlet: Funded.\n"
        );
        assert_eq!(acc.completed(), ["Funded.".to_string()]);
    }

    #[tokio::test]
    async fn partial_messages_survive_a_failed_stream() {
        let tool = ConversationMessage::tool("transfer_asset", "Asset transferred: sig");
        let (mut acc, result) = run(vec![
            Ok(StreamEvent::PartialResponse(vec![tool.clone()])),
            Err(anyhow::anyhow!("503 overloaded")),
        ])
        .await;
        assert_eq!(result.unwrap_err().to_string(), "503 overloaded");
        assert_eq!(acc.take_partial(), vec![tool]);
        assert!(acc.take_partial().is_empty());
    }

    #[test]
    fn unknown_sender_prints_bare_text() {
        let mut acc = StreamAccumulator::new(Vec::new());
        acc.handle(StreamEvent::ContentDelta {
            sender: None,
            text: "anonymous".into(),
        })
        .unwrap();
        assert_eq!(output(&acc), "anonymous");
    }
}
