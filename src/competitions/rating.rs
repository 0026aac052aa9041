//! Elo rating updates.
//!
//! Everything in here is a pure function of the pre-game ratings and the
//! outcome, which is what lets a team's rating be replayed from its games.

use serde::{Deserialize, Serialize};

/// How fractional deltas are turned into the integer ratings stored on teams.
/// Both policies are odd functions, so the two deltas of a game always cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rounding {
    /// Round half away from zero.
    Nearest,
    /// Round toward zero.
    Truncate,
}

impl Rounding {
    pub fn as_str(self) -> &'static str {
        match self {
            Rounding::Nearest => "nearest",
            Rounding::Truncate => "truncate",
        }
    }

    fn apply(self, delta: f64) -> i64 {
        match self {
            Rounding::Nearest => delta.round() as i64,
            Rounding::Truncate => delta.trunc() as i64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatingConfig {
    pub k_factor: f64,
    pub rounding: Rounding,
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            k_factor: 32.0,
            rounding: Rounding::Nearest,
        }
    }
}

/// Result of a game from the point of view of the first team.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatedOutcome {
    Win,
    Draw,
    Loss,
    /// The game does not count; neither rating moves.
    Void,
}

impl RatedOutcome {
    fn score(self) -> Option<f64> {
        match self {
            RatedOutcome::Win => Some(1.0),
            RatedOutcome::Draw => Some(0.5),
            RatedOutcome::Loss => Some(0.0),
            RatedOutcome::Void => None,
        }
    }
}

/// Expected score of a team rated `elo_a` against one rated `elo_b`.
pub fn expected_score(elo_a: i64, elo_b: i64) -> f64 {
    1.0 / (1.0 + 10.0_f64.powf((elo_b - elo_a) as f64 / 400.0))
}

/// Unrounded deltas for both teams.
pub fn raw_deltas(
    elo_a: i64,
    elo_b: i64,
    outcome: RatedOutcome,
    k_factor: f64,
) -> (f64, f64) {
    match outcome.score() {
        Some(actual) => {
            let delta = k_factor * (actual - expected_score(elo_a, elo_b));
            (delta, -delta)
        }
        None => (0.0, 0.0),
    }
}

/// Computes the integer rating deltas `(delta_a, delta_b)` of a finished game.
pub fn apply_result(
    elo_a: i64,
    elo_b: i64,
    outcome: RatedOutcome,
    config: &RatingConfig,
) -> (i64, i64) {
    let (delta_a, _) = raw_deltas(elo_a, elo_b, outcome, config.k_factor);
    let delta_a = config.rounding.apply(delta_a);
    (delta_a, -delta_a)
}
