use chrono::NaiveDateTime;
use diesel::{connection::LoadConnection, prelude::*, sqlite::Sqlite};
use serde::{Deserialize, Serialize};

use crate::{
    competitions::rounds::{
        draws::{Bye, Fixture},
        results::Game,
    },
    schema::{competition_rounds, fixtures, games_2v2, round_byes},
};

pub mod dispatch;
pub mod draws;
pub mod eligibility;
pub mod results;
pub mod scheduler;

#[derive(Serialize, Deserialize, Queryable, Selectable, Clone, Debug)]
#[diesel(table_name = competition_rounds, check_for_backend(Sqlite))]
pub struct Round {
    pub id: String,
    pub competition_id: String,
    pub seq: i64,
    state: String,
    pub opened_at: NaiveDateTime,
    pub paired_at: Option<NaiveDateTime>,
    pub closed_at: Option<NaiveDateTime>,
    /// Set when the round completed without being played.
    pub skip_reason: Option<String>,
}

/// Where a round is in its life cycle.
///
/// ```text
/// Pending -> Pairing -> AwaitingResults -> Closing -> Complete
///               \______________________________________/
///                      (no eligible teams: skipped)
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundState {
    Pending,
    Pairing,
    AwaitingResults,
    Closing,
    Complete,
}

impl RoundState {
    pub fn as_str(self) -> &'static str {
        match self {
            RoundState::Pending => "pending",
            RoundState::Pairing => "pairing",
            RoundState::AwaitingResults => "awaiting_results",
            RoundState::Closing => "closing",
            RoundState::Complete => "complete",
        }
    }
}

impl Round {
    pub fn state(&self) -> RoundState {
        match self.state.as_str() {
            "pending" => RoundState::Pending,
            "pairing" => RoundState::Pairing,
            "awaiting_results" => RoundState::AwaitingResults,
            "closing" => RoundState::Closing,
            "complete" => RoundState::Complete,
            _ => unreachable!("competition_rounds.state is constrained by the schema"),
        }
    }

    pub fn fetch(
        competition_id: &str,
        seq: i64,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Result<Option<Round>, diesel::result::Error> {
        competition_rounds::table
            .filter(
                competition_rounds::competition_id
                    .eq(competition_id)
                    .and(competition_rounds::seq.eq(seq)),
            )
            .select(Round::as_select())
            .first::<Round>(conn)
            .optional()
    }

    /// Retrieves the most recently opened round.
    pub fn current(
        competition_id: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Result<Option<Round>, diesel::result::Error> {
        competition_rounds::table
            .filter(competition_rounds::competition_id.eq(competition_id))
            .order_by(competition_rounds::seq.desc())
            .select(Round::as_select())
            .first::<Round>(conn)
            .optional()
    }

    pub fn all(
        competition_id: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Result<Vec<Round>, diesel::result::Error> {
        competition_rounds::table
            .filter(competition_rounds::competition_id.eq(competition_id))
            .order_by(competition_rounds::seq.asc())
            .select(Round::as_select())
            .load::<Round>(conn)
    }
}

/// Moves a round from `from` to `to`. Returns `false` (and changes nothing)
/// if the round was no longer in `from`.
pub(crate) fn transition(
    round: &Round,
    from: RoundState,
    to: RoundState,
    conn: &mut SqliteConnection,
) -> Result<bool, diesel::result::Error> {
    let updated = diesel::update(
        competition_rounds::table.filter(
            competition_rounds::id
                .eq(&round.id)
                .and(competition_rounds::state.eq(from.as_str())),
        ),
    )
    .set(competition_rounds::state.eq(to.as_str()))
    .execute(conn)?;

    if updated == 1 {
        tracing::info!(
            competition_id = %round.competition_id,
            round = round.seq,
            from = from.as_str(),
            to = to.as_str(),
            "round transition"
        );
    }

    Ok(updated == 1)
}

/// Everything known about the current round of a competition.
#[derive(Debug, Clone, Serialize)]
pub struct RoundView {
    pub round: Round,
    pub state: RoundState,
    pub fixtures: Vec<Fixture>,
    pub games: Vec<Game>,
    pub byes: Vec<Bye>,
}

impl RoundView {
    pub fn fetch(
        competition_id: &str,
        seq: i64,
        conn: &mut (impl Connection<Backend = Sqlite> + LoadConnection),
    ) -> Result<Option<RoundView>, diesel::result::Error> {
        // One read transaction, so the fixtures and games agree with each
        // other.
        conn.transaction(|conn| {
            let Some(round) = Round::fetch(competition_id, seq, conn)? else {
                return Ok(None);
            };

            let fixtures = fixtures::table
                .filter(
                    fixtures::competition_id
                        .eq(competition_id)
                        .and(fixtures::round.eq(seq)),
                )
                .order_by((fixtures::wave.asc(), fixtures::id.asc()))
                .select(Fixture::as_select())
                .load::<Fixture>(conn)?;

            let games = games_2v2::table
                .filter(
                    games_2v2::competition_id
                        .eq(competition_id)
                        .and(games_2v2::round.eq(seq)),
                )
                .order_by(games_2v2::ingest_seq.asc())
                .select(Game::as_select())
                .load::<Game>(conn)?;

            let byes = round_byes::table
                .filter(
                    round_byes::competition_id
                        .eq(competition_id)
                        .and(round_byes::round.eq(seq)),
                )
                .select(Bye::as_select())
                .load::<Bye>(conn)?;

            Ok(Some(RoundView {
                state: round.state(),
                round,
                fixtures,
                games,
                byes,
            }))
        })
    }
}

/// The state of the competition's current round, with its fixtures, results
/// and byes. `None` before the first round has been opened.
#[tracing::instrument(skip(conn))]
pub fn round_state(
    competition_id: &str,
    conn: &mut (impl Connection<Backend = Sqlite> + LoadConnection),
) -> Result<Option<RoundView>, diesel::result::Error> {
    match Round::current(competition_id, conn)? {
        Some(round) => RoundView::fetch(competition_id, round.seq, conn),
        None => Ok(None),
    }
}
