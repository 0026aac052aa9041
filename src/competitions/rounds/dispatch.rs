//! Hands queued fixtures to the external game executor and voids the ones
//! that never report back.

use chrono::{NaiveDateTime, TimeDelta};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    competitions::{
        Competition,
        rounds::draws::{Fixture, FixtureStatus},
    },
    schema::fixtures,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamLineup {
    pub team_id: String,
    pub bot1: String,
    pub bot2: String,
}

/// Everything the executor needs to run one game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub fixture_id: String,
    /// Opaque reference for the running game. Outcomes may be reported
    /// against it instead of the team pair. It is stored on the fixture
    /// before the executor sees the request.
    pub handle: String,
    pub competition_id: String,
    pub round: i64,
    pub game_pack: String,
    pub team_a: TeamLineup,
    pub team_b: TeamLineup,
}

impl DispatchRequest {
    pub fn for_fixture(competition: &Competition, fixture: &Fixture) -> Self {
        DispatchRequest {
            fixture_id: fixture.id.clone(),
            handle: handle_for(&fixture.id),
            competition_id: fixture.competition_id.clone(),
            round: fixture.round,
            game_pack: competition.game_pack.clone(),
            team_a: TeamLineup {
                team_id: fixture.team1_id.clone(),
                bot1: fixture.team1_bot1.clone(),
                bot2: fixture.team1_bot2.clone(),
            },
            team_b: TeamLineup {
                team_id: fixture.team2_id.clone(),
                bot1: fixture.team2_bot1.clone(),
                bot2: fixture.team2_bot2.clone(),
            },
        }
    }
}

pub fn handle_for(fixture_id: &str) -> String {
    format!("game-{fixture_id}")
}

#[derive(Debug, thiserror::Error)]
#[error("game executor refused the fixture: {0}")]
pub struct DispatchError(pub String);

/// The service that actually runs games.
///
/// The fixture is already dispatched and carries `request.handle` when
/// `dispatch` is called, so the outcome may be reported (through
/// [`crate::driver::ResultReporter`] or
/// [`crate::competitions::rounds::results::ingest_by_handle`]) on another
/// connection before `dispatch` returns.
pub trait GameExecutor {
    fn dispatch(&self, request: &DispatchRequest) -> Result<(), DispatchError>;
}

/// Dispatches queued fixtures of `round`, lowest wave first, into the free
/// slots left by `games_per_round`. Stops at the first executor failure; the
/// failed fixture goes back to the queue for the next attempt.
#[tracing::instrument(skip(competition, executor, conn), fields(competition_id = %competition.id))]
pub fn dispatch_queued(
    competition: &Competition,
    round: i64,
    executor: &dyn GameExecutor,
    now: NaiveDateTime,
    conn: &mut SqliteConnection,
) -> Result<usize, diesel::result::Error> {
    let in_flight = fixtures::table
        .filter(
            fixtures::competition_id
                .eq(&competition.id)
                .and(fixtures::round.eq(round))
                .and(fixtures::status.eq(FixtureStatus::Dispatched.as_str())),
        )
        .count()
        .get_result::<i64>(conn)?;

    let free = competition.games_per_round - in_flight;
    if free <= 0 {
        return Ok(0);
    }

    let queued = fixtures::table
        .filter(
            fixtures::competition_id
                .eq(&competition.id)
                .and(fixtures::round.eq(round))
                .and(fixtures::status.eq(FixtureStatus::Queued.as_str())),
        )
        .order_by((fixtures::wave.asc(), fixtures::id.asc()))
        .limit(free)
        .select(Fixture::as_select())
        .load::<Fixture>(conn)?;

    let mut dispatched = 0;
    for fixture in queued {
        // Claim the fixture and record its handle before the executor sees
        // it, so that a result arriving straight away finds it dispatched.
        let request = DispatchRequest::for_fixture(competition, &fixture);
        let claimed = diesel::update(
            fixtures::table.filter(
                fixtures::id
                    .eq(&fixture.id)
                    .and(fixtures::status.eq(FixtureStatus::Queued.as_str())),
            ),
        )
        .set((
            fixtures::status.eq(FixtureStatus::Dispatched.as_str()),
            fixtures::dispatched_at.eq(Some(now)),
            fixtures::handle.eq(Some(&request.handle)),
        ))
        .execute(conn)?;
        if claimed == 0 {
            continue;
        }

        match executor.dispatch(&request) {
            Ok(()) => {
                tracing::info!(
                    fixture_id = %fixture.id,
                    handle = %request.handle,
                    wave = fixture.wave,
                    "fixture dispatched"
                );
                dispatched += 1;
            }
            Err(error) => {
                tracing::warn!(fixture_id = %fixture.id, %error, "dispatch failed");
                diesel::update(
                    fixtures::table.filter(
                        fixtures::id.eq(&fixture.id).and(
                            fixtures::status
                                .eq(FixtureStatus::Dispatched.as_str()),
                        ),
                    ),
                )
                .set((
                    fixtures::status.eq(FixtureStatus::Queued.as_str()),
                    fixtures::dispatched_at.eq(None::<NaiveDateTime>),
                    fixtures::handle.eq(None::<String>),
                ))
                .execute(conn)?;
                break;
            }
        }
    }

    Ok(dispatched)
}

/// Voids every fixture of `round` that was dispatched more than `timeout`
/// ago without a result. Voided fixtures never affect ratings.
#[tracing::instrument(skip(conn))]
pub fn void_timed_out(
    competition_id: &str,
    round: i64,
    timeout: TimeDelta,
    now: NaiveDateTime,
    conn: &mut SqliteConnection,
) -> Result<usize, diesel::result::Error> {
    let deadline = now - timeout;

    conn.immediate_transaction(|conn| {
        let expired = fixtures::table
            .filter(
                fixtures::competition_id
                    .eq(competition_id)
                    .and(fixtures::round.eq(round))
                    .and(fixtures::status.eq(FixtureStatus::Dispatched.as_str()))
                    .and(fixtures::dispatched_at.le(deadline)),
            )
            .select(Fixture::as_select())
            .load::<Fixture>(conn)?;

        for fixture in &expired {
            tracing::warn!(
                fixture_id = %fixture.id,
                handle = fixture.handle.as_deref(),
                team1 = %fixture.team1_id,
                team2 = %fixture.team2_id,
                "fixture timed out, voiding"
            );
        }

        let ids = expired
            .iter()
            .map(|fixture| fixture.id.as_str())
            .collect::<Vec<_>>();
        diesel::update(
            fixtures::table.filter(
                fixtures::id
                    .eq_any(ids)
                    .and(fixtures::status.eq(FixtureStatus::Dispatched.as_str())),
            ),
        )
        .set((
            fixtures::status.eq(FixtureStatus::Void.as_str()),
            fixtures::resolved_at.eq(Some(now)),
        ))
        .execute(conn)
    })
}
