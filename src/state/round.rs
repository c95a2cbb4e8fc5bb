use super::{active_members, AppState};
use crate::broadcast::GameSnapshot;
use crate::error::{GameError, GameResult};
use crate::llm::LlmError;
use crate::types::*;
use chrono::Utc;
use futures::StreamExt;
use std::collections::HashSet;

/// Pick the guess target for the player at `caller_index` among `member_count`
/// players sorted by id. Returns None when nobody else is in the room.
///
/// Every player gets exactly one target per round, never themselves, and the
/// pairing rotates as the round number changes.
pub fn assign_guess_target(
    member_count: usize,
    caller_index: usize,
    round_number: u32,
) -> Option<usize> {
    if member_count < MIN_PLAYERS || caller_index >= member_count {
        return None;
    }
    let offset = round_number as usize % member_count;
    let target = (caller_index + offset) % member_count;
    if target == caller_index {
        Some((caller_index + 1) % member_count)
    } else {
        Some(target)
    }
}

fn validate_text(text: &str) -> GameResult<String> {
    if text.chars().count() > MAX_TEXT_CHARS {
        return Err(GameError::Validation(format!(
            "text must be at most {} characters",
            MAX_TEXT_CHARS
        )));
    }
    Ok(text.to_string())
}

impl AppState {
    /// Return the room's current round, generating its question first if
    /// nobody has asked for this round yet
    pub async fn get_or_create_current_round(&self, room_id: &str) -> GameResult<GameSnapshot> {
        let room = self
            .rooms
            .read()
            .await
            .get(room_id)
            .cloned()
            .ok_or(GameError::RoomNotFound)?;
        let number = room.current_round;

        match room.status {
            RoomStatus::Playing => {}
            // A finished game still shows its last round but never grows a new one
            RoomStatus::Finished => {
                let round = self
                    .find_round(room_id, number)
                    .await
                    .ok_or(GameError::RoundNotFound)?;
                return self
                    .game_snapshot(&round.id)
                    .await
                    .ok_or(GameError::RoundNotFound);
            }
            _ => {
                return Err(GameError::InvalidPhase(
                    "the game has not started yet".to_string(),
                ))
            }
        }

        if let Some(round) = self.find_round(room_id, number).await {
            return self
                .game_snapshot(&round.id)
                .await
                .ok_or(GameError::RoundNotFound);
        }

        let previous = self.previous_questions(room_id).await;
        let question = self
            .generate_question(&room.config.initial_prompt, &previous)
            .await?;

        let (round, created) = {
            let rooms = self.rooms.read().await;
            if !rooms.contains_key(room_id) {
                return Err(GameError::RoomNotFound);
            }
            let mut rounds = self.rounds.write().await;
            let existing = rounds
                .values()
                .find(|r| r.room_id == room_id && r.number == number)
                .cloned();

            match existing {
                // Someone else got here first; their question wins
                Some(round) => (round, false),
                None => {
                    let round = Round {
                        id: ulid::Ulid::new().to_string(),
                        room_id: room_id.to_string(),
                        number,
                        question,
                        phase: RoundPhase::Answering,
                        started_at: Utc::now(),
                        ended_at: None,
                    };
                    rounds.insert(round.id.clone(), round.clone());
                    (round, true)
                }
            }
        };

        if created {
            tracing::info!(
                "Round {} of room {} started: {}",
                round.number,
                room_id,
                round.question
            );
            self.broadcast_game(&round.id).await;
        } else {
            tracing::debug!(
                "Round {} of room {} was created concurrently, discarding our question",
                number,
                room_id
            );
        }

        self.game_snapshot(&round.id)
            .await
            .ok_or(GameError::RoundNotFound)
    }

    async fn find_round(&self, room_id: &str, number: u32) -> Option<Round> {
        self.rounds
            .read()
            .await
            .values()
            .find(|r| r.room_id == room_id && r.number == number)
            .cloned()
    }

    async fn previous_questions(&self, room_id: &str) -> Vec<String> {
        let rounds = self.rounds.read().await;
        let mut earlier: Vec<&Round> = rounds.values().filter(|r| r.room_id == room_id).collect();
        earlier.sort_by_key(|r| r.number);
        earlier.into_iter().map(|r| r.question.clone()).collect()
    }

    /// Drain the generator's stream into one question, bounded by the question timeout
    async fn generate_question(&self, theme: &str, previous: &[String]) -> GameResult<String> {
        let produce = async {
            let mut fragments = self.questions.generate_question(theme, previous).await?;
            let mut text = String::new();
            while let Some(fragment) = fragments.next().await {
                text.push_str(&fragment?);
            }
            Ok::<_, LlmError>(text)
        };

        let text = tokio::time::timeout(self.question_timeout, produce)
            .await
            .map_err(|_| LlmError::Timeout(self.question_timeout))
            .and_then(|result| result)
            .map_err(|e| {
                tracing::warn!("Question generation failed: {}", e);
                GameError::QuestionUnavailable(e)
            })?;

        let text = text.trim();
        if text.is_empty() {
            return Err(GameError::QuestionUnavailable(LlmError::ParseError(
                "generator returned an empty question".to_string(),
            )));
        }
        Ok(text.to_string())
    }

    /// Fetch a round that is still collecting answers and guesses
    async fn answering_round(&self, round_id: &str) -> GameResult<Round> {
        let round = self
            .get_round(round_id)
            .await
            .ok_or(GameError::RoundNotFound)?;
        if round.phase != RoundPhase::Answering {
            return Err(GameError::InvalidPhase(
                "this round is no longer accepting answers".to_string(),
            ));
        }
        Ok(round)
    }

    /// Resolve an active player of the given room
    async fn require_member(&self, room_id: &str, player_id: &str) -> GameResult<Player> {
        self.players
            .read()
            .await
            .get(player_id)
            .filter(|p| p.is_active() && p.room_id == room_id)
            .cloned()
            .ok_or(GameError::PlayerNotInRoom)
    }

    /// Create or edit the player's answer; `submit` locks it in
    pub async fn save_answer(
        &self,
        round_id: &str,
        player_id: &str,
        text: &str,
        submit: bool,
    ) -> GameResult<Answer> {
        let round = self.answering_round(round_id).await?;
        self.require_member(&round.room_id, player_id).await?;
        let text = validate_text(text)?;

        let answer = {
            // Holding the round lock keeps the phase check and the write atomic
            // with respect to the answering -> rating transition
            let rounds = self.rounds.read().await;
            if rounds.get(round_id).map(|r| r.phase) != Some(RoundPhase::Answering) {
                return Err(GameError::InvalidPhase(
                    "this round is no longer accepting answers".to_string(),
                ));
            }

            let mut answers = self.answers.write().await;
            let now = Utc::now();
            let existing = answers
                .values_mut()
                .find(|a| a.round_id == round_id && a.player_id == player_id);

            match existing {
                Some(answer) if answer.submitted => {
                    if answer.content == text {
                        return Ok(answer.clone());
                    }
                    return Err(GameError::InvalidPhase(
                        "answer was already submitted".to_string(),
                    ));
                }
                Some(answer) => {
                    answer.content = text;
                    if submit {
                        answer.submitted = true;
                        answer.submitted_at = Some(now);
                    }
                    answer.clone()
                }
                None => {
                    let answer = Answer {
                        id: ulid::Ulid::new().to_string(),
                        round_id: round_id.to_string(),
                        player_id: player_id.to_string(),
                        content: text,
                        submitted: submit,
                        submitted_at: submit.then_some(now),
                    };
                    answers.insert(answer.id.clone(), answer.clone());
                    answer
                }
            }
        };

        if answer.submitted {
            tracing::info!("Player {} submitted an answer in round {}", player_id, round_id);
        }
        self.broadcast_game(round_id).await;
        Ok(answer)
    }

    /// Create or edit a guess at what `target_id` answered; `submit` locks it in
    pub async fn save_guess(
        &self,
        round_id: &str,
        guesser_id: &str,
        target_id: &str,
        text: &str,
        submit: bool,
    ) -> GameResult<Guess> {
        let round = self.answering_round(round_id).await?;
        self.require_member(&round.room_id, guesser_id).await?;
        if guesser_id == target_id {
            return Err(GameError::Validation(
                "players cannot guess their own answer".to_string(),
            ));
        }
        let assigned = self.get_guess_target(round_id, guesser_id).await?;
        if assigned.map(|p| p.id).as_deref() != Some(target_id) {
            return Err(GameError::Validation(
                "players can only guess their assigned target".to_string(),
            ));
        }
        let text = validate_text(text)?;

        let guess = {
            let rounds = self.rounds.read().await;
            if rounds.get(round_id).map(|r| r.phase) != Some(RoundPhase::Answering) {
                return Err(GameError::InvalidPhase(
                    "this round is no longer accepting guesses".to_string(),
                ));
            }

            let mut guesses = self.guesses.write().await;
            let now = Utc::now();
            // One guess per player and round; a draft follows a reassigned target
            let existing = guesses
                .values_mut()
                .find(|g| g.round_id == round_id && g.guesser_id == guesser_id);

            match existing {
                Some(guess) if guess.submitted => {
                    if guess.target_id == target_id && guess.content == text {
                        return Ok(guess.clone());
                    }
                    return Err(GameError::InvalidPhase(
                        "guess was already submitted".to_string(),
                    ));
                }
                Some(guess) => {
                    guess.target_id = target_id.to_string();
                    guess.content = text;
                    if submit {
                        guess.submitted = true;
                        guess.submitted_at = Some(now);
                    }
                    guess.clone()
                }
                None => {
                    let guess = Guess {
                        id: ulid::Ulid::new().to_string(),
                        round_id: round_id.to_string(),
                        guesser_id: guesser_id.to_string(),
                        target_id: target_id.to_string(),
                        content: text,
                        submitted: submit,
                        submitted_at: submit.then_some(now),
                        rating: None,
                        rated_at: None,
                    };
                    guesses.insert(guess.id.clone(), guess.clone());
                    guess
                }
            }
        };

        if guess.submitted {
            tracing::info!("Player {} submitted a guess in round {}", guesser_id, round_id);
        }
        self.broadcast_game(round_id).await;
        Ok(guess)
    }

    /// Whose answer this player has to guess this round
    pub async fn get_guess_target(
        &self,
        round_id: &str,
        player_id: &str,
    ) -> GameResult<Option<PlayerSummary>> {
        let round = self
            .get_round(round_id)
            .await
            .ok_or(GameError::RoundNotFound)?;

        let players = self.players.read().await;
        let mut members = active_members(&players, &round.room_id);
        members.sort_by(|a, b| a.id.cmp(&b.id));

        let caller = members
            .iter()
            .position(|p| p.id == player_id)
            .ok_or(GameError::PlayerNotInRoom)?;

        Ok(assign_guess_target(members.len(), caller, round.number)
            .map(|target| PlayerSummary::from(members[target])))
    }

    /// Move the round to rating once every active player has submitted an
    /// answer and a guess. Safe to call any number of times, concurrently;
    /// only the call that performs the transition goes on to rate.
    pub async fn check_progress(&self, round_id: &str) -> GameResult<bool> {
        {
            let players = self.players.read().await;
            let mut rounds = self.rounds.write().await;
            let round = rounds.get_mut(round_id).ok_or(GameError::RoundNotFound)?;
            if round.phase != RoundPhase::Answering {
                return Ok(false);
            }

            let members: HashSet<&str> = active_members(&players, &round.room_id)
                .into_iter()
                .map(|p| p.id.as_str())
                .collect();
            if members.is_empty() {
                return Ok(false);
            }

            let answered = self
                .answers
                .read()
                .await
                .values()
                .filter(|a| {
                    a.round_id == round_id && a.submitted && members.contains(a.player_id.as_str())
                })
                .count();
            let guessed: HashSet<String> = self
                .guesses
                .read()
                .await
                .values()
                .filter(|g| {
                    g.round_id == round_id && g.submitted && members.contains(g.guesser_id.as_str())
                })
                .map(|g| g.guesser_id.clone())
                .collect();

            // A lone player has nobody to guess, so answers alone finish the round
            let guesses_needed = if members.len() >= MIN_PLAYERS {
                members.len()
            } else {
                0
            };
            if answered < members.len() || guessed.len() < guesses_needed {
                return Ok(false);
            }

            round.phase = RoundPhase::Rating;
        }

        tracing::info!("Round {} is complete, rating guesses", round_id);
        self.broadcast_game(round_id).await;
        self.rate_round(round_id).await;
        Ok(true)
    }

    /// Mark the player ready for the next round. Returns true when this was
    /// the last player the room was waiting for and the round counter advanced.
    pub async fn mark_ready_for_next_round(
        &self,
        round_id: &str,
        player_id: &str,
    ) -> GameResult<bool> {
        let round = self
            .get_round(round_id)
            .await
            .ok_or(GameError::RoundNotFound)?;
        if round.phase != RoundPhase::Completed {
            return Err(GameError::InvalidPhase(
                "the round has not finished yet".to_string(),
            ));
        }

        {
            let rooms = self.rooms.read().await;
            let room = rooms.get(&round.room_id).ok_or(GameError::RoomNotFound)?;
            // Readiness always belongs to the room's current round
            if round.number != room.current_round {
                return Err(GameError::InvalidPhase(
                    "the room has already moved past this round".to_string(),
                ));
            }

            let mut players = self.players.write().await;
            let player = players
                .get_mut(player_id)
                .filter(|p| p.is_active() && p.room_id == round.room_id)
                .ok_or(GameError::PlayerNotInRoom)?;
            player.ready = true;
        }

        let advanced = self.try_advance_round(&round.room_id, round.number).await;
        if !advanced {
            self.broadcast_room(&round.room_id).await;
        }
        Ok(advanced)
    }

    /// Advance the room past `round_number` if every active player is ready
    /// and rounds remain
    async fn try_advance_round(&self, room_id: &str, round_number: u32) -> bool {
        let next = {
            let mut rooms = self.rooms.write().await;
            let Some(room) = rooms.get_mut(room_id) else {
                return false;
            };
            if room.status != RoomStatus::Playing
                || room.current_round != round_number
                || room.current_round >= room.config.total_rounds
            {
                return false;
            }

            let mut players = self.players.write().await;
            let members = active_members(&players, room_id);
            if members.is_empty() || members.iter().any(|p| !p.ready) {
                return false;
            }

            for player in players.values_mut().filter(|p| p.room_id == room_id) {
                player.ready = false;
            }
            room.current_round += 1;
            room.current_round
        };

        tracing::info!("Room {} advanced to round {}", room_id, next);
        self.broadcast_room(room_id).await;
        true
    }

    /// Re-run whatever the current round is waiting on after membership changed
    pub(crate) async fn reevaluate_current_round(&self, room_id: &str) {
        let room = match self.rooms.read().await.get(room_id) {
            Some(room) if room.status == RoomStatus::Playing => room.clone(),
            _ => return,
        };
        let Some(round) = self.find_round(room_id, room.current_round).await else {
            return;
        };

        match round.phase {
            RoundPhase::Answering => {
                if let Err(e) = self.check_progress(&round.id).await {
                    tracing::warn!("Progress check for round {} failed: {}", round.id, e);
                }
            }
            RoundPhase::Completed => {
                self.try_advance_round(room_id, round.number).await;
            }
            _ => {}
        }
    }

    /// Who is ready for the room's next round
    pub async fn get_round_ready_status(&self, room_id: &str) -> GameResult<ReadyStatus> {
        if !self.rooms.read().await.contains_key(room_id) {
            return Err(GameError::RoomNotFound);
        }
        let players = self.players.read().await;
        let mut members = active_members(&players, room_id);
        members.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.id.cmp(&b.id)));

        Ok(ReadyStatus {
            ready: members.iter().filter(|p| p.ready).count(),
            total: members.len(),
            waiting_for: members
                .iter()
                .filter(|p| !p.ready)
                .map(|p| p.name.clone())
                .collect(),
        })
    }

    /// Every answer of the round next to the guess aimed at its author
    pub async fn get_results(&self, round_id: &str) -> GameResult<Vec<RoundResult>> {
        if !self.rounds.read().await.contains_key(round_id) {
            return Err(GameError::RoundNotFound);
        }

        let players = self.players.read().await;
        let answers = self.answers.read().await;
        let guesses = self.guesses.read().await;

        let mut round_answers: Vec<&Answer> =
            answers.values().filter(|a| a.round_id == round_id).collect();
        round_answers.sort_by(|a, b| a.id.cmp(&b.id));

        let results = round_answers
            .into_iter()
            .map(|answer| {
                let guess = guesses
                    .values()
                    .filter(|g| g.round_id == round_id && g.target_id == answer.player_id)
                    .min_by(|a, b| b.submitted.cmp(&a.submitted).then_with(|| a.id.cmp(&b.id)));

                RoundResult {
                    answer_id: answer.id.clone(),
                    answerer: players.get(&answer.player_id).map(PlayerSummary::from),
                    answer: answer.content.clone(),
                    guesser: guess
                        .and_then(|g| players.get(&g.guesser_id))
                        .map(PlayerSummary::from),
                    guess: guess.map(|g| g.content.clone()),
                    rating: guess.and_then(|g| g.rating),
                    rated: guess.is_some_and(|g| g.rating.is_some()),
                }
            })
            .collect();
        Ok(results)
    }
}
