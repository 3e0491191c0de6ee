//! The unattended directive → reason → act cycle.

use std::io::{self, Write};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use colored::Colorize;
use manlet_config::AutonomyConfig;
use tracing::{debug, info, warn};

use crate::directive::DirectiveSource;
use crate::message::ConversationMessage;
use crate::reasoning::ReasoningEngine;
use crate::stream::StreamAccumulator;

const MAX_BACKOFF: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub interval: Duration,
    /// Consecutive failed cycles before the loop gives up. 0 never gives up.
    pub max_consecutive_failures: u32,
    pub backoff: Duration,
    /// Trailing messages sent to the model each cycle. 0 sends everything.
    pub history_window: usize,
}

impl LoopSettings {
    pub fn from_config(config: &AutonomyConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_secs),
            max_consecutive_failures: config.max_consecutive_failures,
            backoff: Duration::from_secs(config.backoff_secs),
            history_window: config.history_window,
        }
    }
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self::from_config(&AutonomyConfig::default())
    }
}

/// Owned exclusively by the loop. History only ever grows.
#[derive(Debug, Clone, Default)]
pub struct LoopState {
    pub history: Vec<ConversationMessage>,
    pub last_directive_at: Option<DateTime<Utc>>,
}

pub struct AutonomousLoop<E: ReasoningEngine> {
    engine: E,
    source: DirectiveSource,
    settings: LoopSettings,
    state: LoopState,
    accumulator: StreamAccumulator<Box<dyn Write + Send>>,
}

impl<E: ReasoningEngine> AutonomousLoop<E> {
    pub fn with_output(
        engine: E,
        source: DirectiveSource,
        settings: LoopSettings,
        out: Box<dyn Write + Send>,
        styled: bool,
    ) -> Self {
        Self {
            engine,
            source,
            settings,
            state: LoopState::default(),
            accumulator: StreamAccumulator::new(out).styled(styled),
        }
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    /// One directive, one streamed response, appended to history.
    ///
    /// The directive stays in history even when the response fails, as do
    /// any messages for actions that already ran before the failure.
    pub async fn run_cycle(&mut self) -> Result<()> {
        let directive = self.source.directive();
        self.echo_directive(directive.text())?;
        self.state.history.push(directive);
        self.state.last_directive_at = Some(Utc::now());

        let history = self.window().to_vec();
        debug!(
            "Sending {} of {} history messages",
            history.len(),
            self.state.history.len()
        );
        let mut events = self.engine.respond(history, self.source.catalog());
        let messages = match self.accumulator.consume(&mut events).await {
            Ok(messages) => messages,
            Err(e) => {
                let acted = self.accumulator.take_partial();
                if !acted.is_empty() {
                    warn!("Keeping {} message(s) from the failed cycle", acted.len());
                    self.state.history.extend(acted);
                }
                return Err(e.context("reasoning failed"));
            }
        };

        debug!("Cycle produced {} message(s)", messages.len());
        self.state.history.extend(messages);
        Ok(())
    }

    /// Run cycles until `cycles` have been attempted, or forever with `None`.
    ///
    /// A failed cycle backs off and retries; once `max_consecutive_failures`
    /// cycles in a row have failed the last error is returned.
    pub async fn run_for(&mut self, cycles: Option<u64>) -> Result<()> {
        info!(
            "Starting autonomous {} loop (interval: {}s)",
            self.source.agent_name(),
            self.settings.interval.as_secs()
        );

        if cycles == Some(0) {
            return Ok(());
        }

        let mut attempted: u64 = 0;
        let mut failures: u32 = 0;
        loop {
            attempted += 1;
            match self.run_cycle().await {
                Ok(()) => {
                    if failures > 0 {
                        info!("Cycle {attempted} succeeded after {failures} failure(s)");
                    }
                    failures = 0;
                }
                Err(e) => {
                    failures += 1;
                    let limit = self.settings.max_consecutive_failures;
                    warn!("Cycle {attempted} failed ({failures} in a row): {e:#}");
                    if limit > 0 && failures >= limit {
                        return Err(e.context(format!(
                            "giving up after {failures} consecutive failed cycles"
                        )));
                    }
                }
            }

            if cycles.is_some_and(|limit| attempted >= limit) {
                info!("Autonomous loop finished after {attempted} cycle(s)");
                return Ok(());
            }

            let pause = if failures == 0 {
                self.settings.interval
            } else {
                backoff_delay(self.settings.backoff, failures)
            };
            tokio::time::sleep(pause).await;
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        self.run_for(None).await
    }

    fn window(&self) -> &[ConversationMessage] {
        let history = &self.state.history;
        match self.settings.history_window {
            0 => history,
            n => &history[history.len().saturating_sub(n)..],
        }
    }

    fn echo_directive(&mut self, text: &str) -> io::Result<()> {
        let label = if self.accumulator.is_styled() {
            "Directive:".bright_black().to_string()
        } else {
            "Directive:".to_string()
        };
        let out = self.accumulator.get_mut();
        writeln!(out, "\n{label} {text}")?;
        out.flush()
    }
}

/// `base * 2^(failures-1)`, capped at five minutes.
fn backoff_delay(base: Duration, failures: u32) -> Duration {
    let factor = 1u32
        .checked_shl(failures.saturating_sub(1))
        .unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(MAX_BACKOFF)
}
