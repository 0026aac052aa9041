use std::fmt;

use chrono::NaiveDateTime;
use diesel::{
    connection::LoadConnection,
    prelude::*,
    result::DatabaseErrorKind,
    sqlite::Sqlite,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    competitions::{
        rating::{RatedOutcome, RatingConfig, Rounding, apply_result},
        rounds::draws::{Fixture, FixtureStatus},
        teams::Team,
    },
    schema::{fixtures, games_2v2, teams},
};

/// A finished game. Rows are never updated once written.
#[derive(Serialize, Deserialize, Queryable, Selectable, Clone, Debug)]
#[diesel(table_name = games_2v2, check_for_backend(Sqlite))]
pub struct Game {
    pub id: String,
    pub competition_id: String,
    pub round: i64,
    pub fixture_id: String,
    pub team1_id: String,
    pub team2_id: String,
    pub team_lo: String,
    pub team_hi: String,
    pub team1_bot1: String,
    pub team1_bot2: String,
    pub team2_bot1: String,
    pub team2_bot2: String,
    outcome: String,
    pub winner_id: Option<String>,
    pub team1_bot1_survived: bool,
    pub team1_bot2_survived: bool,
    pub team2_bot1_survived: bool,
    pub team2_bot2_survived: bool,
    pub public: bool,
    /// Stored and returned exactly as the executor reported it.
    pub additional_data: Option<String>,
    /// Ratings of both teams when the result was applied.
    pub team1_elo: i64,
    pub team2_elo: i64,
    pub team1_delta: i64,
    pub team2_delta: i64,
    pub k_factor: f64,
    rounding: String,
    /// Position of this game in the competition's ingestion order.
    pub ingest_seq: i64,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Team1,
    Team2,
    Draw,
    Void,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Team1 => "team1",
            Outcome::Team2 => "team2",
            Outcome::Draw => "draw",
            Outcome::Void => "void",
        }
    }

    /// The outcome from team 1's point of view.
    pub fn rated(self) -> RatedOutcome {
        match self {
            Outcome::Team1 => RatedOutcome::Win,
            Outcome::Team2 => RatedOutcome::Loss,
            Outcome::Draw => RatedOutcome::Draw,
            Outcome::Void => RatedOutcome::Void,
        }
    }
}

impl Game {
    pub fn outcome(&self) -> Outcome {
        match self.outcome.as_str() {
            "team1" => Outcome::Team1,
            "team2" => Outcome::Team2,
            "draw" => Outcome::Draw,
            "void" => Outcome::Void,
            _ => unreachable!("games_2v2.outcome is constrained by the schema"),
        }
    }

    /// The rating policy the game was ingested under.
    pub fn rating(&self) -> RatingConfig {
        RatingConfig {
            k_factor: self.k_factor,
            rounding: match self.rounding.as_str() {
                "nearest" => Rounding::Nearest,
                "truncate" => Rounding::Truncate,
                _ => unreachable!("games_2v2.rounding is constrained by the schema"),
            },
        }
    }

    /// The rating change this game applied to `team_id`, if it played.
    pub fn delta_of(&self, team_id: &str) -> Option<i64> {
        if self.team1_id == team_id {
            Some(self.team1_delta)
        } else if self.team2_id == team_id {
            Some(self.team2_delta)
        } else {
            None
        }
    }

    pub fn by_fixture(
        fixture_id: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Result<Option<Game>, diesel::result::Error> {
        games_2v2::table
            .filter(games_2v2::fixture_id.eq(fixture_id))
            .select(Game::as_select())
            .first::<Game>(conn)
            .optional()
    }

    pub fn of_competition(
        competition_id: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Result<Vec<Game>, diesel::result::Error> {
        games_2v2::table
            .filter(games_2v2::competition_id.eq(competition_id))
            .order_by(games_2v2::ingest_seq.asc())
            .select(Game::as_select())
            .load::<Game>(conn)
    }

    /// All games `team_id` played, in ingestion order.
    pub fn of_team(
        team_id: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Result<Vec<Game>, diesel::result::Error> {
        games_2v2::table
            .filter(
                games_2v2::team1_id
                    .eq(team_id)
                    .or(games_2v2::team2_id.eq(team_id)),
            )
            .order_by(games_2v2::ingest_seq.asc())
            .select(Game::as_select())
            .load::<Game>(conn)
    }
}

/// Identifies a fixture by its teams. The order of `team_a` and `team_b` does
/// not matter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureKey {
    pub competition_id: String,
    pub round: i64,
    pub team_a: String,
    pub team_b: String,
}

impl fmt::Display for FixtureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} v {} (competition {}, round {})",
            self.team_a, self.team_b, self.competition_id, self.round
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    Team(String),
    Draw,
    /// The game could not be played to a result.
    Void,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotResult {
    pub bot_id: String,
    pub survived: bool,
}

/// What the executor reports for a finished game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameOutcome {
    pub winner: Winner,
    /// One entry for each of the four bots in the fixture.
    pub bots: Vec<BotResult>,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub additional_data: Option<String>,
}

#[derive(Debug, Clone)]
pub enum IngestStatus {
    Ingested(Game),
    /// A result was already recorded for this fixture; it is returned
    /// unchanged.
    DuplicateIgnored(Game),
    /// The fixture had already been voided (it timed out).
    VoidIgnored(Fixture),
}

impl IngestStatus {
    pub fn game(&self) -> Option<&Game> {
        match self {
            IngestStatus::Ingested(game) | IngestStatus::DuplicateIgnored(game) => {
                Some(game)
            }
            IngestStatus::VoidIgnored(_) => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("no dispatched fixture for {fixture}")]
    UnknownFixture { fixture: String },
    #[error("invalid outcome: {0}")]
    InvalidOutcome(String),
    #[error(transparent)]
    Database(#[from] diesel::result::Error),
}

/// Records the outcome of the fixture identified by `key` and applies the
/// rating change. Applying the same result twice is harmless: later attempts
/// get the first game back.
#[tracing::instrument(skip(outcome, rating, conn), fields(fixture = %key))]
pub fn ingest_result(
    key: &FixtureKey,
    outcome: &GameOutcome,
    rating: &RatingConfig,
    now: NaiveDateTime,
    conn: &mut SqliteConnection,
) -> Result<IngestStatus, IngestError> {
    let res = conn.immediate_transaction(|conn| -> Result<_, IngestError> {
        let fixture = Fixture::by_pair(
            &key.competition_id,
            key.round,
            &key.team_a,
            &key.team_b,
            conn,
        )?
        .ok_or_else(|| IngestError::UnknownFixture {
            fixture: key.to_string(),
        })?;
        ingest_fixture(fixture, outcome, rating, now, conn)
    });

    let existing = |conn: &mut SqliteConnection| -> Result<_, diesel::result::Error> {
        match Fixture::by_pair(
            &key.competition_id,
            key.round,
            &key.team_a,
            &key.team_b,
            conn,
        )? {
            Some(fixture) => Game::by_fixture(&fixture.id, conn),
            None => Ok(None),
        }
    };
    resolve_race(res, existing, conn)
}

/// Like [`ingest_result`], with the fixture identified by the handle the
/// executor returned when it was dispatched.
#[tracing::instrument(skip(outcome, rating, conn))]
pub fn ingest_by_handle(
    handle: &str,
    outcome: &GameOutcome,
    rating: &RatingConfig,
    now: NaiveDateTime,
    conn: &mut SqliteConnection,
) -> Result<IngestStatus, IngestError> {
    let res = conn.immediate_transaction(|conn| -> Result<_, IngestError> {
        let fixture = Fixture::by_handle(handle, conn)?.ok_or_else(|| {
            IngestError::UnknownFixture {
                fixture: format!("handle {handle}"),
            }
        })?;
        ingest_fixture(fixture, outcome, rating, now, conn)
    });

    let existing = |conn: &mut SqliteConnection| -> Result<_, diesel::result::Error> {
        match Fixture::by_handle(handle, conn)? {
            Some(fixture) => Game::by_fixture(&fixture.id, conn),
            None => Ok(None),
        }
    };
    resolve_race(res, existing, conn)
}

/// The unique indexes on games are the last line of defence against applying
/// a result twice. If one of them fires, another ingestion won the race and
/// its game is what the caller gets.
fn resolve_race(
    res: Result<IngestStatus, IngestError>,
    existing: impl FnOnce(
        &mut SqliteConnection,
    ) -> Result<Option<Game>, diesel::result::Error>,
    conn: &mut SqliteConnection,
) -> Result<IngestStatus, IngestError> {
    match res {
        Err(IngestError::Database(diesel::result::Error::DatabaseError(
            DatabaseErrorKind::UniqueViolation,
            info,
        ))) => match existing(conn)? {
            Some(game) => {
                tracing::info!(game_id = %game.id, "lost ingestion race");
                Ok(IngestStatus::DuplicateIgnored(game))
            }
            None => Err(IngestError::Database(
                diesel::result::Error::DatabaseError(
                    DatabaseErrorKind::UniqueViolation,
                    info,
                ),
            )),
        },
        other => other,
    }
}

/// Runs inside the ingestion transaction. Everything is validated before the
/// first write, so a rejected outcome leaves no trace.
fn ingest_fixture(
    fixture: Fixture,
    reported: &GameOutcome,
    rating: &RatingConfig,
    now: NaiveDateTime,
    conn: &mut SqliteConnection,
) -> Result<IngestStatus, IngestError> {
    if let Some(game) = Game::by_fixture(&fixture.id, conn)? {
        tracing::info!(game_id = %game.id, "duplicate result ignored");
        return Ok(IngestStatus::DuplicateIgnored(game));
    }

    match fixture.status() {
        FixtureStatus::Void => {
            tracing::info!(fixture_id = %fixture.id, "result for voided fixture ignored");
            return Ok(IngestStatus::VoidIgnored(fixture));
        }
        FixtureStatus::Queued | FixtureStatus::Ingested => {
            return Err(IngestError::UnknownFixture {
                fixture: fixture.id.clone(),
            });
        }
        FixtureStatus::Dispatched => {}
    }

    let (outcome, winner_id) = match &reported.winner {
        Winner::Team(id) if *id == fixture.team1_id => (Outcome::Team1, Some(id)),
        Winner::Team(id) if *id == fixture.team2_id => (Outcome::Team2, Some(id)),
        Winner::Team(id) => {
            return Err(IngestError::InvalidOutcome(format!(
                "team {id} did not play in fixture {}",
                fixture.id
            )));
        }
        Winner::Draw => (Outcome::Draw, None),
        Winner::Void => (Outcome::Void, None),
    };

    let survived = survivals(&fixture, &reported.bots)?;

    let team1 = Team::fetch(&fixture.team1_id, conn)?.ok_or_else(|| {
        IngestError::UnknownFixture {
            fixture: fixture.id.clone(),
        }
    })?;
    let team2 = Team::fetch(&fixture.team2_id, conn)?.ok_or_else(|| {
        IngestError::UnknownFixture {
            fixture: fixture.id.clone(),
        }
    })?;

    let (delta1, delta2) =
        apply_result(team1.elo, team2.elo, outcome.rated(), rating);

    let ingest_seq = games_2v2::table
        .filter(games_2v2::competition_id.eq(&fixture.competition_id))
        .select(diesel::dsl::max(games_2v2::ingest_seq))
        .get_result::<Option<i64>>(conn)?
        .map_or(1, |seq| seq + 1);

    let id = Uuid::now_v7().to_string();
    diesel::insert_into(games_2v2::table)
        .values((
            games_2v2::id.eq(&id),
            games_2v2::competition_id.eq(&fixture.competition_id),
            games_2v2::round.eq(fixture.round),
            games_2v2::fixture_id.eq(&fixture.id),
            games_2v2::team1_id.eq(&fixture.team1_id),
            games_2v2::team2_id.eq(&fixture.team2_id),
            games_2v2::team_lo.eq(&fixture.team_lo),
            games_2v2::team_hi.eq(&fixture.team_hi),
            games_2v2::team1_bot1.eq(&fixture.team1_bot1),
            games_2v2::team1_bot2.eq(&fixture.team1_bot2),
            games_2v2::team2_bot1.eq(&fixture.team2_bot1),
            games_2v2::team2_bot2.eq(&fixture.team2_bot2),
            games_2v2::outcome.eq(outcome.as_str()),
            games_2v2::winner_id.eq(winner_id.cloned()),
            games_2v2::team1_bot1_survived.eq(survived[0]),
            games_2v2::team1_bot2_survived.eq(survived[1]),
            games_2v2::team2_bot1_survived.eq(survived[2]),
            games_2v2::team2_bot2_survived.eq(survived[3]),
            games_2v2::public.eq(reported.public),
            games_2v2::additional_data.eq(&reported.additional_data),
            games_2v2::team1_elo.eq(team1.elo),
            games_2v2::team2_elo.eq(team2.elo),
            games_2v2::team1_delta.eq(delta1),
            games_2v2::team2_delta.eq(delta2),
            games_2v2::k_factor.eq(rating.k_factor),
            games_2v2::rounding.eq(rating.rounding.as_str()),
            games_2v2::ingest_seq.eq(ingest_seq),
            games_2v2::created_at.eq(now),
        ))
        .execute(conn)?;

    for (team_id, delta) in [(&team1.id, delta1), (&team2.id, delta2)] {
        if delta != 0 {
            diesel::update(teams::table.filter(teams::id.eq(team_id)))
                .set(teams::elo.eq(teams::elo + delta))
                .execute(conn)?;
        }
    }

    diesel::update(fixtures::table.filter(fixtures::id.eq(&fixture.id)))
        .set((
            fixtures::status.eq(FixtureStatus::Ingested.as_str()),
            fixtures::resolved_at.eq(Some(now)),
        ))
        .execute(conn)?;

    tracing::info!(
        game_id = %id,
        outcome = outcome.as_str(),
        team1 = %team1.id,
        team2 = %team2.id,
        delta1,
        delta2,
        "result ingested"
    );

    let game = games_2v2::table
        .filter(games_2v2::id.eq(&id))
        .select(Game::as_select())
        .first::<Game>(conn)?;

    Ok(IngestStatus::Ingested(game))
}

/// Matches the reported bots against the fixture's pinned bots. Returns the
/// survival flags in pinned order.
fn survivals(
    fixture: &Fixture,
    reported: &[BotResult],
) -> Result<[bool; 4], IngestError> {
    let pinned = fixture.pinned_bots();
    if reported.len() != pinned.len() {
        return Err(IngestError::InvalidOutcome(format!(
            "expected results for {} bots, got {}",
            pinned.len(),
            reported.len()
        )));
    }

    let mut survived = [None; 4];
    for result in reported {
        let Some(slot) = pinned.iter().position(|bot| *bot == result.bot_id)
        else {
            return Err(IngestError::InvalidOutcome(format!(
                "bot {} did not play in fixture {}",
                result.bot_id, fixture.id
            )));
        };
        if survived[slot].replace(result.survived).is_some() {
            return Err(IngestError::InvalidOutcome(format!(
                "bot {} was reported more than once",
                result.bot_id
            )));
        }
    }

    // Four distinct pinned bots were reported, so every slot is filled.
    Ok(survived.map(|flag| flag.unwrap_or(false)))
}
