//! Orchestration between the chat session and the command dispatcher.
//!
//! The [`Controller`] owns the session and the dispatcher. It takes one
//! utterance at a time (typed or transcribed), sends it to the model, and
//! either dispatches the returned batch or surfaces the reply as plain text.

use std::future::Future;

use log::{debug, warn};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::chat::{ChatModel, ChatSession};
use crate::command::{self, ParseOutcome};
use crate::config::Config;
use crate::dispatch::{CommandReport, Dispatcher, Launcher};
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Recording,
    AwaitingModelReply,
}

/// What became of one utterance.
#[derive(Debug)]
pub enum TurnOutcome {
    /// The utterance was blank; nothing was sent.
    Empty,
    /// The reply was a command batch (possibly empty after validation).
    Dispatched(Vec<CommandReport>),
    /// The reply was not a command batch and is shown verbatim.
    Conversational(String),
    /// The model host could not be reached or answered badly.
    Failed(Error),
}

impl TurnOutcome {
    /// Lines to show the user for this outcome.
    pub fn lines(&self) -> Vec<String> {
        match self {
            TurnOutcome::Empty => vec!["No message provided.".to_string()],
            TurnOutcome::Dispatched(reports) if reports.is_empty() => {
                vec!["The model returned no runnable commands.".to_string()]
            }
            TurnOutcome::Dispatched(reports) => {
                reports.iter().map(CommandReport::status_line).collect()
            }
            TurnOutcome::Conversational(text) => vec![text.clone()],
            TurnOutcome::Failed(err) => vec![format!("Error: {err}")],
        }
    }

    pub fn failures(&self) -> usize {
        match self {
            TurnOutcome::Dispatched(reports) => {
                reports.iter().filter(|r| !r.succeeded()).count()
            }
            TurnOutcome::Failed(_) => 1,
            _ => 0,
        }
    }
}

pub struct Controller<M, L> {
    session: ChatSession<M>,
    dispatcher: Dispatcher<L>,
    phase: Phase,
}

impl<M: ChatModel, L: Launcher> Controller<M, L> {
    pub fn new(session: ChatSession<M>, dispatcher: Dispatcher<L>) -> Self {
        Self {
            session,
            dispatcher,
            phase: Phase::Idle,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn session(&self) -> &ChatSession<M> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut ChatSession<M> {
        &mut self.session
    }

    pub fn dispatcher(&self) -> &Dispatcher<L> {
        &self.dispatcher
    }

    /// Idle → Recording. Returns false if a capture cannot start now.
    pub fn begin_capture(&mut self) -> bool {
        if self.phase != Phase::Idle {
            debug!("Ignoring capture start while {:?}", self.phase);
            return false;
        }
        self.phase = Phase::Recording;
        true
    }

    /// Recording → Idle, when the capture produced nothing to send.
    pub fn abandon_capture(&mut self) {
        if self.phase == Phase::Recording {
            self.phase = Phase::Idle;
        }
    }

    /// Back to Idle after an in-flight turn was cancelled.
    pub fn interrupt(&mut self) {
        self.phase = Phase::Idle;
    }

    /// Resets the conversation; the phase is left as it is.
    pub fn clear(&mut self) {
        self.session.clear();
    }

    /// Runs one full turn: send, parse, dispatch.
    pub async fn submit(&mut self, text: &str) -> TurnOutcome {
        self.phase = Phase::AwaitingModelReply;
        let outcome = self.run_turn(text).await;
        self.phase = Phase::Idle;
        outcome
    }

    /// Like [`submit`](Self::submit), but gives up as soon as `quit` resolves.
    ///
    /// The pending model request is dropped and the controller goes back to
    /// Idle. A user turn already appended stays in the transcript. Returns
    /// `None` when the turn was cancelled.
    pub async fn submit_until<Q>(&mut self, text: &str, quit: Q) -> Option<TurnOutcome>
    where
        Q: Future<Output = ()>,
    {
        let outcome = tokio::select! {
            biased;
            outcome = self.submit(text) => Some(outcome),
            () = quit => None,
        };
        if outcome.is_none() {
            warn!("Quit while waiting for the model, dropping the request");
            self.interrupt();
        }
        outcome
    }

    async fn run_turn(&mut self, text: &str) -> TurnOutcome {
        let reply = match self.session.send(text).await {
            Ok(Some(reply)) => reply,
            Ok(None) => return TurnOutcome::Empty,
            Err(err) => {
                warn!("Chat turn failed: {err}");
                return TurnOutcome::Failed(err);
            }
        };
        match command::parse(&reply) {
            Ok(batch) => {
                if batch.is_empty() {
                    warn!("Reply was a command array without any valid command: {reply}");
                }
                TurnOutcome::Dispatched(self.dispatcher.execute_all(batch))
            }
            Err(ParseOutcome::NotACommandBatch) => TurnOutcome::Conversational(reply),
        }
    }
}

/// Prints an outcome and raises a notification for failures.
pub fn report(config: &Config, outcome: &TurnOutcome) {
    if let TurnOutcome::Conversational(_) = outcome {
        println!("The model did not return commands. Raw response:");
    }
    for line in outcome.lines() {
        println!("{line}");
    }
    let failures = outcome.failures();
    if failures > 0 {
        config.notify(
            "voice-commander",
            &format!("{failures} action(s) failed, see the console"),
        );
    }
}

enum TextInput {
    Quit,
    Clear,
    Message(String),
}

fn classify(line: &str) -> TextInput {
    let line = line.trim();
    match line.to_lowercase().as_str() {
        "quit" | "exit" => TextInput::Quit,
        "clear" => TextInput::Clear,
        _ => TextInput::Message(line.to_string()),
    }
}

/// Line-based chat loop.
///
/// `clear` resets the history, `quit`/`exit`, end of input or ctrl-c leave.
/// A pending model request is dropped on ctrl-c.
pub async fn run_text<M, L, R>(
    controller: &mut Controller<M, L>,
    config: &Config,
    input: R,
) -> anyhow::Result<()>
where
    M: ChatModel,
    L: Launcher,
    R: AsyncBufRead + Unpin,
{
    println!("=== Text chat with {} ===", controller.session().model());
    println!("Type your requests (press Enter to send)");
    println!("Type 'clear' to clear conversation history");
    println!("Type 'quit' or 'exit' to quit");
    println!("{}", "-".repeat(50));

    let mut lines = input.lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!("Exiting...");
            break;
        };
        match classify(&line) {
            TextInput::Quit => break,
            TextInput::Clear => {
                controller.clear();
                println!("Conversation history cleared.");
            }
            TextInput::Message(text) if text.is_empty() => continue,
            TextInput::Message(text) => {
                println!("Waiting for response...");
                let ctrl_c = async {
                    let _ = tokio::signal::ctrl_c().await;
                };
                match controller.submit_until(&text, ctrl_c).await {
                    Some(outcome) => report(config, &outcome),
                    None => {
                        println!("\nExiting...");
                        break;
                    }
                }
            }
        }
    }
    Ok(())
}
