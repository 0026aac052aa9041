//! Standings, per-round snapshots, and the rating audit.

use std::collections::HashMap;

use diesel::{connection::LoadConnection, prelude::*, sqlite::Sqlite};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    competitions::{
        RegistryError,
        rating::apply_result,
        rounds::results::Game,
        teams::Team,
    },
    schema::{games_2v2, round_byes, round_standings},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standing {
    /// Teams with equal ratings share a rank.
    pub rank: i64,
    pub team_id: String,
    pub elo: i64,
    pub games_played: i64,
    pub byes: i64,
    pub withdrawn: bool,
}

impl Standing {
    /// Rounds the team took part in. A bye counts as a round played.
    pub fn played(&self) -> i64 {
        self.games_played + self.byes
    }
}

/// Current standings of a competition, best rating first (ties broken by team
/// id).
#[tracing::instrument(skip(conn))]
pub fn standings(
    competition_id: &str,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Result<Vec<Standing>, diesel::result::Error> {
    let mut teams = Team::of_competition(competition_id, conn)?;
    teams.sort_by(|a, b| b.elo.cmp(&a.elo).then_with(|| a.id.cmp(&b.id)));

    let mut games = HashMap::<String, i64>::new();
    for (team1, team2) in games_2v2::table
        .filter(games_2v2::competition_id.eq(competition_id))
        .select((games_2v2::team1_id, games_2v2::team2_id))
        .load::<(String, String)>(conn)?
    {
        *games.entry(team1).or_default() += 1;
        *games.entry(team2).or_default() += 1;
    }

    let mut byes = HashMap::<String, i64>::new();
    for team_id in round_byes::table
        .filter(round_byes::competition_id.eq(competition_id))
        .select(round_byes::team_id)
        .load::<String>(conn)?
    {
        *byes.entry(team_id).or_default() += 1;
    }

    let mut ret = Vec::with_capacity(teams.len());
    let mut rank = 0;
    let mut previous_elo = None;
    for (i, team) in teams.into_iter().enumerate() {
        if previous_elo != Some(team.elo) {
            rank = i as i64 + 1;
            previous_elo = Some(team.elo);
        }
        ret.push(Standing {
            rank,
            games_played: games.get(&team.id).copied().unwrap_or(0),
            byes: byes.get(&team.id).copied().unwrap_or(0),
            team_id: team.id,
            elo: team.elo,
            withdrawn: team.withdrawn,
        });
    }

    Ok(ret)
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = round_standings, check_for_backend(Sqlite))]
pub struct RoundStanding {
    pub id: String,
    pub competition_id: String,
    pub round: i64,
    pub team_id: String,
    pub rank: i64,
    pub elo: i64,
}

/// Records the standings as they are at the end of `round`. Replaces any
/// earlier snapshot of the same round.
pub fn snapshot_round(
    competition_id: &str,
    round: i64,
    conn: &mut SqliteConnection,
) -> Result<usize, diesel::result::Error> {
    diesel::delete(
        round_standings::table.filter(
            round_standings::competition_id
                .eq(competition_id)
                .and(round_standings::round.eq(round)),
        ),
    )
    .execute(conn)?;

    let standings = standings(competition_id, conn)?;
    for standing in &standings {
        diesel::insert_into(round_standings::table)
            .values((
                round_standings::id.eq(Uuid::now_v7().to_string()),
                round_standings::competition_id.eq(competition_id),
                round_standings::round.eq(round),
                round_standings::team_id.eq(&standing.team_id),
                round_standings::rank.eq(standing.rank),
                round_standings::elo.eq(standing.elo),
            ))
            .execute(conn)?;
    }

    Ok(standings.len())
}

pub fn round_snapshot(
    competition_id: &str,
    round: i64,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Result<Vec<RoundStanding>, diesel::result::Error> {
    round_standings::table
        .filter(
            round_standings::competition_id
                .eq(competition_id)
                .and(round_standings::round.eq(round)),
        )
        .order_by((round_standings::rank.asc(), round_standings::team_id.asc()))
        .select(RoundStanding::as_select())
        .load::<RoundStanding>(conn)
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub game_id: String,
    pub round: i64,
    pub ingest_seq: i64,
    pub recorded_delta: i64,
    pub recomputed_delta: i64,
    /// The team's rating after this game, replaying from `initial_elo`.
    pub elo_after: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EloAudit {
    pub team_id: String,
    pub initial_elo: i64,
    pub stored_elo: i64,
    pub replayed_elo: i64,
    pub entries: Vec<AuditEntry>,
}

impl EloAudit {
    /// Whether the stored rating matches the replay and every recorded delta
    /// can be recomputed from its game.
    pub fn consistent(&self) -> bool {
        self.stored_elo == self.replayed_elo
            && self
                .entries
                .iter()
                .all(|entry| entry.recorded_delta == entry.recomputed_delta)
    }
}

/// Replays a team's rating history from its games. Every delta is recomputed
/// from the ratings, K factor and rounding policy stored on the game.
#[tracing::instrument(skip(conn))]
pub fn replay_team_elo(
    team_id: &str,
    conn: &mut impl LoadConnection<Backend = Sqlite>,
) -> Result<EloAudit, RegistryError> {
    let team = Team::fetch(team_id, conn)?
        .ok_or_else(|| RegistryError::not_found("team", team_id))?;

    let mut elo = team.initial_elo;
    let mut entries = Vec::new();
    for game in Game::of_team(team_id, conn)? {
        let Some(recorded_delta) = game.delta_of(team_id) else {
            continue;
        };
        let (delta1, delta2) = apply_result(
            game.team1_elo,
            game.team2_elo,
            game.outcome().rated(),
            &game.rating(),
        );
        let recomputed_delta = if game.team1_id == team_id {
            delta1
        } else {
            delta2
        };

        elo += recorded_delta;
        entries.push(AuditEntry {
            game_id: game.id,
            round: game.round,
            ingest_seq: game.ingest_seq,
            recorded_delta,
            recomputed_delta,
            elo_after: elo,
        });
    }

    let audit = EloAudit {
        team_id: team.id,
        initial_elo: team.initial_elo,
        stored_elo: team.elo,
        replayed_elo: elo,
        entries,
    };

    if !audit.consistent() {
        tracing::warn!(
            stored = audit.stored_elo,
            replayed = audit.replayed_elo,
            "rating does not match its game history"
        );
    }

    Ok(audit)
}
