use super::AppState;
use crate::error::{GameError, GameResult};
use crate::types::*;
use chrono::Utc;
use futures::future::join_all;

/// Extract a score from the judge's verdict, clamped to 1-10.
///
/// Numbers that only describe the scale ("1-10", "out of 10", "/10") are
/// skipped in favour of the first number standing on its own. A verdict made
/// only of scale numbers falls back to its first number, and anything without
/// a number counts as the neutral rating.
pub fn parse_rating(verdict: &str) -> u8 {
    let numbers = digit_runs(verdict);
    let chosen = numbers
        .iter()
        .find(|&&(start, end)| !is_scale_bound(verdict, start, end))
        .or_else(|| numbers.first());

    let Some(&(start, end)) = chosen else {
        return FALLBACK_RATING;
    };
    match verdict[start..end].parse::<u64>() {
        Ok(value) => value.clamp(u64::from(MIN_RATING), u64::from(MAX_RATING)) as u8,
        // Absurdly long digit runs overflow; still a number, so the top score
        Err(_) => MAX_RATING,
    }
}

/// Byte ranges of every run of ASCII digits
fn digit_runs(text: &str) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut start = None;
    for (i, c) in text.char_indices() {
        match (c.is_ascii_digit(), start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                runs.push((s, i));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        runs.push((s, text.len()));
    }
    runs
}

/// Whether the number at `start..end` is one end of a range or a denominator
fn is_scale_bound(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].trim_end();
    let after = text[end..].trim_start();

    let joins_next = after
        .strip_prefix(&['-', '/'][..])
        .is_some_and(|rest| rest.trim_start().starts_with(|c: char| c.is_ascii_digit()));
    let joins_previous = before
        .strip_suffix(&['-', '/'][..])
        .is_some_and(|rest| rest.trim_end().ends_with(|c: char| c.is_ascii_digit()));
    let out_of = before.to_ascii_lowercase().ends_with("out of");

    joins_next || joins_previous || out_of
}

impl AppState {
    /// Rate every guess of the round, credit the guessers and complete the
    /// round. Whatever goes wrong, the round does not stay in rating.
    pub async fn rate_round(&self, round_id: &str) {
        if let Err(e) = self.try_rate_round(round_id).await {
            tracing::error!("Rating round {} failed: {}, forcing completion", round_id, e);
            if let Err(e) = self.complete_round(round_id).await {
                tracing::error!("Could not force round {} to complete: {}", round_id, e);
            }
        }
    }

    async fn try_rate_round(&self, round_id: &str) -> GameResult<()> {
        let round = self
            .get_round(round_id)
            .await
            .ok_or(GameError::RoundNotFound)?;

        // Pair each unrated guess with the answer it was aimed at
        let pending: Vec<(Guess, Option<String>)> = {
            let answers = self.answers.read().await;
            let guesses = self.guesses.read().await;
            guesses
                .values()
                .filter(|g| g.round_id == round_id && g.rating.is_none())
                .map(|g| {
                    let original = answers
                        .values()
                        .find(|a| a.round_id == round_id && a.player_id == g.target_id)
                        .map(|a| a.content.clone());
                    (g.clone(), original)
                })
                .collect()
        };

        let question = round.question.as_str();
        let ratings = join_all(pending.into_iter().map(|(guess, original)| async move {
            let rating = match original {
                Some(original) => self.judge_guess(&original, &guess.content, question).await,
                None => {
                    tracing::debug!("Guess {} has no answer to compare against", guess.id);
                    FALLBACK_RATING
                }
            };
            (guess.id, guess.guesser_id, rating)
        }))
        .await;

        let now = Utc::now();
        let mut credited = 0;
        {
            let mut players = self.players.write().await;
            let mut guesses = self.guesses.write().await;
            for (guess_id, guesser_id, rating) in ratings {
                let Some(guess) = guesses.get_mut(&guess_id) else {
                    continue;
                };
                // Only the first rating counts, so a repeated run never pays twice
                if guess.rating.is_some() {
                    continue;
                }
                guess.rating = Some(rating);
                guess.rated_at = Some(now);
                if let Some(player) = players.get_mut(&guesser_id) {
                    player.score += f64::from(rating);
                }
                credited += 1;
            }
        }
        tracing::info!("Rated {} guesses in round {}", credited, round_id);

        self.complete_round(round_id).await
    }

    /// Ask the judge under its timeout; any failure becomes the neutral rating
    async fn judge_guess(&self, original: &str, guess: &str, question: &str) -> u8 {
        let verdict = tokio::time::timeout(
            self.judge_timeout,
            self.judge.rate_guess(original, guess, question),
        )
        .await;

        match verdict {
            Ok(Ok(text)) => parse_rating(&text),
            Ok(Err(e)) => {
                tracing::warn!("Judge failed, using fallback rating: {}", e);
                FALLBACK_RATING
            }
            Err(_) => {
                tracing::warn!(
                    "Judge timed out after {:?}, using fallback rating",
                    self.judge_timeout
                );
                FALLBACK_RATING
            }
        }
    }

    /// Mark the round completed and finish the game after its last round
    async fn complete_round(&self, round_id: &str) -> GameResult<()> {
        let room_id = {
            let mut rooms = self.rooms.write().await;
            let mut rounds = self.rounds.write().await;
            let round = rounds.get_mut(round_id).ok_or(GameError::RoundNotFound)?;
            if round.phase != RoundPhase::Completed {
                round.phase = RoundPhase::Completed;
                round.ended_at = Some(Utc::now());
            }

            if let Some(room) = rooms.get_mut(&round.room_id) {
                if room.status == RoomStatus::Playing
                    && round.number >= room.config.total_rounds
                {
                    room.status = RoomStatus::Finished;
                    tracing::info!("Room {} finished its game", room.code);
                }
            }
            round.room_id.clone()
        };

        self.broadcast_game(round_id).await;
        self.broadcast_room(&room_id).await;
        Ok(())
    }
}
