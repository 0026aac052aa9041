use std::collections::HashSet;

use chrono::NaiveDateTime;
use diesel::{connection::LoadConnection, prelude::*, sqlite::Sqlite};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    competitions::rounds::eligibility::EligibleTeam,
    schema::{fixtures, round_byes},
};

pub mod swiss;

#[derive(Debug, thiserror::Error)]
pub enum PairingError {
    #[error("cannot pair {available} team(s), at least two are needed")]
    InsufficientTeams { available: usize },
}

/// One scheduled pairing within a round. The bots are pinned when the draw is
/// made, so resubmissions afterwards do not change who plays.
#[derive(Serialize, Deserialize, Queryable, Selectable, Clone, Debug)]
#[diesel(table_name = fixtures, check_for_backend(Sqlite))]
pub struct Fixture {
    pub id: String,
    pub competition_id: String,
    pub round: i64,
    pub wave: i64,
    pub team1_id: String,
    pub team2_id: String,
    pub team_lo: String,
    pub team_hi: String,
    pub team1_bot1: String,
    pub team1_bot2: String,
    pub team2_bot1: String,
    pub team2_bot2: String,
    status: String,
    pub handle: Option<String>,
    pub dispatched_at: Option<NaiveDateTime>,
    pub resolved_at: Option<NaiveDateTime>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureStatus {
    Queued,
    Dispatched,
    Ingested,
    Void,
}

impl FixtureStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FixtureStatus::Queued => "queued",
            FixtureStatus::Dispatched => "dispatched",
            FixtureStatus::Ingested => "ingested",
            FixtureStatus::Void => "void",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, FixtureStatus::Ingested | FixtureStatus::Void)
    }
}

impl Fixture {
    pub fn status(&self) -> FixtureStatus {
        match self.status.as_str() {
            "queued" => FixtureStatus::Queued,
            "dispatched" => FixtureStatus::Dispatched,
            "ingested" => FixtureStatus::Ingested,
            "void" => FixtureStatus::Void,
            _ => unreachable!("fixtures.status is constrained by the schema"),
        }
    }

    /// The bots in the order they are reported back: team 1 first.
    pub fn pinned_bots(&self) -> [&str; 4] {
        [
            &self.team1_bot1,
            &self.team1_bot2,
            &self.team2_bot1,
            &self.team2_bot2,
        ]
    }

    pub fn has_team(&self, team_id: &str) -> bool {
        self.team1_id == team_id || self.team2_id == team_id
    }

    pub fn fetch(
        fixture_id: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Result<Option<Fixture>, diesel::result::Error> {
        fixtures::table
            .filter(fixtures::id.eq(fixture_id))
            .select(Fixture::as_select())
            .first::<Fixture>(conn)
            .optional()
    }

    /// Looks up the fixture between two teams, in either order.
    pub fn by_pair(
        competition_id: &str,
        round: i64,
        team_a: &str,
        team_b: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Result<Option<Fixture>, diesel::result::Error> {
        let (lo, hi) = ordered_pair(team_a, team_b);
        fixtures::table
            .filter(
                fixtures::competition_id
                    .eq(competition_id)
                    .and(fixtures::round.eq(round))
                    .and(fixtures::team_lo.eq(lo))
                    .and(fixtures::team_hi.eq(hi)),
            )
            .select(Fixture::as_select())
            .first::<Fixture>(conn)
            .optional()
    }

    pub fn by_handle(
        handle: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Result<Option<Fixture>, diesel::result::Error> {
        fixtures::table
            .filter(fixtures::handle.eq(handle))
            .select(Fixture::as_select())
            .first::<Fixture>(conn)
            .optional()
    }

    pub fn of_round(
        competition_id: &str,
        round: i64,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Result<Vec<Fixture>, diesel::result::Error> {
        fixtures::table
            .filter(
                fixtures::competition_id
                    .eq(competition_id)
                    .and(fixtures::round.eq(round)),
            )
            .order_by((fixtures::wave.asc(), fixtures::id.asc()))
            .select(Fixture::as_select())
            .load::<Fixture>(conn)
    }
}

#[derive(Serialize, Deserialize, Queryable, Selectable, Clone, Debug)]
#[diesel(table_name = round_byes, check_for_backend(Sqlite))]
pub struct Bye {
    pub id: String,
    pub competition_id: String,
    pub round: i64,
    pub team_id: String,
}

/// Orders two team ids so that an unordered pair has a single
/// representation.
pub fn ordered_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Who has already played whom (and who has already sat out) in a
/// competition.
#[derive(Debug, Default, Clone)]
pub struct PairingHistory {
    pairs: HashSet<(String, String)>,
    byes: HashSet<String>,
}

impl PairingHistory {
    /// Collects the fixtures and byes of every round before `round`. Void
    /// fixtures count: the teams were paired, even if the game never
    /// finished.
    pub fn fetch(
        competition_id: &str,
        round: i64,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Result<Self, diesel::result::Error> {
        let pairs = fixtures::table
            .filter(
                fixtures::competition_id
                    .eq(competition_id)
                    .and(fixtures::round.lt(round)),
            )
            .select((fixtures::team_lo, fixtures::team_hi))
            .load::<(String, String)>(conn)?;

        let byes = round_byes::table
            .filter(
                round_byes::competition_id
                    .eq(competition_id)
                    .and(round_byes::round.lt(round)),
            )
            .select(round_byes::team_id)
            .load::<String>(conn)?;

        Ok(PairingHistory {
            pairs: pairs.into_iter().collect(),
            byes: byes.into_iter().collect(),
        })
    }

    pub fn record_pair(&mut self, a: &str, b: &str) {
        let (lo, hi) = ordered_pair(a, b);
        self.pairs.insert((lo.to_string(), hi.to_string()));
    }

    pub fn record_bye(&mut self, team_id: &str) {
        self.byes.insert(team_id.to_string());
    }

    pub fn have_played(&self, a: &str, b: &str) -> bool {
        let (lo, hi) = ordered_pair(a, b);
        self.pairs.contains(&(lo.to_string(), hi.to_string()))
    }

    pub fn had_bye(&self, team_id: &str) -> bool {
        self.byes.contains(team_id)
    }
}

pub struct DrawInput {
    pub teams: Vec<EligibleTeam>,
    pub history: PairingHistory,
    /// Size of a dispatch wave.
    pub games_per_round: i64,
    /// How many partial pairings the matchmaker may try before falling back
    /// to allowing rematches.
    pub search_budget: usize,
}

#[derive(Debug, Clone)]
pub struct DrawnFixture {
    pub team1: EligibleTeam,
    pub team2: EligibleTeam,
    pub wave: i64,
}

#[derive(Debug, Clone)]
pub struct Draw {
    pub fixtures: Vec<DrawnFixture>,
    pub bye: Option<EligibleTeam>,
    /// Fixtures that repeat a pairing from an earlier round.
    pub rematches: usize,
}

/// Writes a draw as queued fixtures (and the bye, if any). Should run inside
/// the transaction that moves the round out of pairing.
pub fn persist_draw(
    competition_id: &str,
    round: i64,
    draw: &Draw,
    conn: &mut SqliteConnection,
) -> Result<(), diesel::result::Error> {
    for fixture in &draw.fixtures {
        let (team_lo, team_hi) =
            ordered_pair(&fixture.team1.team.id, &fixture.team2.team.id);
        diesel::insert_into(fixtures::table)
            .values((
                fixtures::id.eq(Uuid::now_v7().to_string()),
                fixtures::competition_id.eq(competition_id),
                fixtures::round.eq(round),
                fixtures::wave.eq(fixture.wave),
                fixtures::team1_id.eq(&fixture.team1.team.id),
                fixtures::team2_id.eq(&fixture.team2.team.id),
                fixtures::team_lo.eq(team_lo),
                fixtures::team_hi.eq(team_hi),
                fixtures::team1_bot1.eq(&fixture.team1.bot1.id),
                fixtures::team1_bot2.eq(&fixture.team1.bot2.id),
                fixtures::team2_bot1.eq(&fixture.team2.bot1.id),
                fixtures::team2_bot2.eq(&fixture.team2.bot2.id),
                fixtures::status.eq(FixtureStatus::Queued.as_str()),
                fixtures::handle.eq(None::<String>),
                fixtures::dispatched_at.eq(None::<NaiveDateTime>),
                fixtures::resolved_at.eq(None::<NaiveDateTime>),
            ))
            .execute(conn)?;
    }

    if let Some(bye) = &draw.bye {
        diesel::insert_into(round_byes::table)
            .values((
                round_byes::id.eq(Uuid::now_v7().to_string()),
                round_byes::competition_id.eq(competition_id),
                round_byes::round.eq(round),
                round_byes::team_id.eq(&bye.team.id),
            ))
            .execute(conn)?;
    }

    tracing::debug!(
        competition_id,
        round,
        fixtures = draw.fixtures.len(),
        bye = draw.bye.as_ref().map(|bye| bye.team.id.as_str()),
        "persisted draw"
    );

    Ok(())
}
