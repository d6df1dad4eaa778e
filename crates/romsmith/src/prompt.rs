use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::{Error, Result};

pub trait Prompt: Send + Sync {
    fn confirm(&self, question: &str, default: bool) -> Result<bool>;
}

/// Asks on the terminal.
pub struct TerminalPrompt;

impl Prompt for TerminalPrompt {
    fn confirm(&self, question: &str, default: bool) -> Result<bool> {
        dialoguer::Confirm::new()
            .with_prompt(question)
            .default(default)
            .interact()
            .map_err(|e| Error::environment(format!("confirmation prompt failed: {e}")))
    }
}

/// Gives the same answer to every question (`--yes`).
pub struct FixedAnswer(pub bool);

impl Prompt for FixedAnswer {
    fn confirm(&self, question: &str, _default: bool) -> Result<bool> {
        tracing::debug!(question, answer = self.0, "auto-answered confirmation");
        Ok(self.0)
    }
}

/// Replays queued answers in order and records the questions it was asked.
#[derive(Default)]
pub struct ScriptedPrompt {
    answers: Mutex<VecDeque<bool>>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedPrompt {
    pub fn new(answers: impl IntoIterator<Item = bool>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

impl Prompt for ScriptedPrompt {
    fn confirm(&self, question: &str, _default: bool) -> Result<bool> {
        if let Ok(mut g) = self.asked.lock() {
            g.push(question.to_string());
        }
        self.answers
            .lock()
            .ok()
            .and_then(|mut g| g.pop_front())
            .ok_or_else(|| Error::msg(format!("no scripted answer for '{question}'")))
    }
}
