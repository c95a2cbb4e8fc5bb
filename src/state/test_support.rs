//! Deterministic stand-ins for the question generator and the judge.

use super::AppState;
use crate::llm::{GuessJudge, LlmError, LlmResult, QuestionGenerator, TextStream};
use crate::types::*;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Hands out "Question 1?", "Question 2?", ... streamed in two fragments
#[derive(Default)]
pub struct ScriptedQuestions {
    calls: AtomicUsize,
    failing: AtomicBool,
    /// Previous-question lists seen by each call
    pub histories: Mutex<Vec<Vec<String>>>,
}

impl ScriptedQuestions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let questions = Self::default();
        questions.failing.store(true, Ordering::SeqCst);
        questions
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuestionGenerator for ScriptedQuestions {
    async fn generate_question(
        &self,
        _theme: &str,
        previous_questions: &[String],
    ) -> LlmResult<TextStream> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.histories
            .lock()
            .unwrap()
            .push(previous_questions.to_vec());
        if self.failing.load(Ordering::SeqCst) {
            return Err(LlmError::ApiError("generator offline".to_string()));
        }
        let fragments = vec![Ok("Question ".to_string()), Ok(format!("{}?", n))];
        Ok(stream::iter(fragments).boxed())
    }
}

#[derive(Debug, Clone)]
pub enum Verdict {
    Reply(String),
    Fail,
    /// Never answers; only the caller's timeout ends the call
    Hang,
}

/// Judge with a default verdict and optional per-guess overrides
pub struct ScriptedJudge {
    default: Verdict,
    by_guess: HashMap<String, Verdict>,
    calls: AtomicUsize,
}

impl ScriptedJudge {
    pub fn replying(text: &str) -> Self {
        Self {
            default: Verdict::Reply(text.to_string()),
            by_guess: HashMap::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            default: Verdict::Fail,
            by_guess: HashMap::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Override the verdict for one specific guess text
    pub fn with(mut self, guess: &str, verdict: Verdict) -> Self {
        self.by_guess.insert(guess.to_string(), verdict);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GuessJudge for ScriptedJudge {
    async fn rate_guess(
        &self,
        _original_answer: &str,
        guess: &str,
        _question: &str,
    ) -> LlmResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.by_guess.get(guess).unwrap_or(&self.default) {
            Verdict::Reply(text) => Ok(text.clone()),
            Verdict::Fail => Err(LlmError::ApiError("judge offline".to_string())),
            Verdict::Hang => std::future::pending().await,
        }
    }
}

pub fn test_state() -> AppState {
    test_state_with(
        Arc::new(ScriptedQuestions::new()),
        Arc::new(ScriptedJudge::replying("7")),
    )
}

pub fn test_state_with(questions: Arc<ScriptedQuestions>, judge: Arc<ScriptedJudge>) -> AppState {
    AppState::new(questions, judge)
}

/// A started room with `n` players (creator first) and its first round
pub async fn playing_room(state: &AppState, n: usize) -> (Room, Vec<Player>, Round) {
    let (room, creator) = state.create_room("Player0", "s0", None).await.unwrap();
    let mut players = vec![creator.clone()];
    for i in 1..n {
        let (_, player) = state
            .join_room(&room.code, &format!("Player{}", i), &format!("s{}", i), None)
            .await
            .unwrap();
        players.push(player);
    }
    let room = state.start_game(&room.id, &creator.id).await.unwrap();
    let round = state
        .get_or_create_current_round(&room.id)
        .await
        .unwrap()
        .round;
    (room, players, round)
}

/// Have every player answer and guess their assigned target
pub async fn submit_everything(state: &AppState, round: &Round, players: &[Player]) {
    for player in players {
        state
            .save_answer(&round.id, &player.id, &format!("answer of {}", player.name), true)
            .await
            .unwrap();
        let target = state
            .get_guess_target(&round.id, &player.id)
            .await
            .unwrap()
            .unwrap();
        state
            .save_guess(
                &round.id,
                &player.id,
                &target.id,
                &format!("guess by {}", player.name),
                true,
            )
            .await
            .unwrap();
    }
}
