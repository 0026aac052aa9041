use chrono::NaiveDateTime;
use diesel::{connection::LoadConnection, prelude::*, sqlite::Sqlite};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    competitions::{
        Competition, CompetitionStatus, RegistryError, SubmissionPolicy,
        teams::Team,
    },
    schema::{bots, teams},
};

/// `compile_error` of a bot the compiler has not reported on yet.
pub const NOT_COMPILED: &str = "not compiled yet";

#[derive(Serialize, Deserialize, Queryable, Selectable, Clone, Debug, PartialEq)]
#[diesel(table_name = bots, check_for_backend(Sqlite))]
pub struct Bot {
    pub id: String,
    pub team_id: String,
    pub source_path: String,
    /// Empty when the bot compiled successfully.
    pub compile_error: String,
    pub submitted_at: NaiveDateTime,
}

impl Bot {
    pub fn fetch(
        bot_id: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Result<Option<Bot>, diesel::result::Error> {
        bots::table
            .filter(bots::id.eq(bot_id))
            .select(Bot::as_select())
            .first::<Bot>(conn)
            .optional()
    }

    pub fn fetch_many(
        bot_ids: &[String],
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Result<Vec<Bot>, diesel::result::Error> {
        bots::table
            .filter(bots::id.eq_any(bot_ids))
            .select(Bot::as_select())
            .load::<Bot>(conn)
    }

    pub fn compiled(&self) -> bool {
        self.compile_error.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BotSelector {
    First,
    Second,
}

/// Stores a new bot for `team_id` and points the selected slot at it. The bot
/// it replaces stays in the database, since earlier games may reference it.
#[tracing::instrument(skip(conn))]
pub fn submit_bot(
    team_id: &str,
    slot: BotSelector,
    source_path: &str,
    now: NaiveDateTime,
    conn: &mut SqliteConnection,
) -> Result<Bot, RegistryError> {
    conn.immediate_transaction(|conn| {
        let team = Team::fetch(team_id, conn)?
            .ok_or_else(|| RegistryError::not_found("team", team_id))?;
        let competition = Competition::fetch(&team.competition_id, conn)?
            .ok_or_else(|| {
                RegistryError::not_found("competition", &team.competition_id)
            })?;

        match competition.status() {
            CompetitionStatus::Closed => {
                return Err(RegistryError::Invalid(
                    "the competition is closed".to_string(),
                ));
            }
            _ if competition.submission_policy() == SubmissionPolicy::Window
                && now > competition.submission_cutoff() =>
            {
                // Accepted, but the eligibility gate will not pair the team
                // with this bot.
                tracing::warn!(
                    cutoff = %competition.submission_cutoff(),
                    "bot submitted after the submission cutoff"
                );
            }
            _ => {}
        }

        let id = Uuid::now_v7().to_string();
        diesel::insert_into(bots::table)
            .values((
                bots::id.eq(&id),
                bots::team_id.eq(team_id),
                bots::source_path.eq(source_path),
                bots::compile_error.eq(NOT_COMPILED),
                bots::submitted_at.eq(now),
            ))
            .execute(conn)?;

        let target = teams::table.filter(teams::id.eq(team_id));
        match slot {
            BotSelector::First => diesel::update(target)
                .set(teams::bot1.eq(Some(&id)))
                .execute(conn)?,
            BotSelector::Second => diesel::update(target)
                .set(teams::bot2.eq(Some(&id)))
                .execute(conn)?,
        };

        Bot::fetch(&id, conn)?.ok_or_else(|| RegistryError::not_found("bot", &id))
    })
}

/// What the compilation service reports for a bot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompileStatus {
    Compiled,
    Error(String),
}

impl CompileStatus {
    fn as_compile_error(&self) -> &str {
        match self {
            CompileStatus::Compiled => "",
            CompileStatus::Error(message) if message.is_empty() => {
                "compilation failed"
            }
            CompileStatus::Error(message) => message,
        }
    }
}

/// The compilation service. The engine never compiles bots itself.
pub trait CompileStatusSource {
    fn compile_status(&self, bot_id: &str) -> Option<CompileStatus>;
}

pub fn record_compile_status(
    bot_id: &str,
    status: &CompileStatus,
    conn: &mut SqliteConnection,
) -> Result<(), RegistryError> {
    let updated = diesel::update(bots::table.filter(bots::id.eq(bot_id)))
        .set(bots::compile_error.eq(status.as_compile_error()))
        .execute(conn)?;
    if updated == 0 {
        return Err(RegistryError::not_found("bot", bot_id));
    }
    Ok(())
}

/// Pulls the compile status of every current bot in the competition from
/// `source`. Bots the source knows nothing about keep their stored status.
#[tracing::instrument(skip(source, conn))]
pub fn refresh_compile_status(
    competition_id: &str,
    source: &dyn CompileStatusSource,
    conn: &mut SqliteConnection,
) -> Result<usize, RegistryError> {
    let mut refreshed = 0;
    for team in Team::of_competition(competition_id, conn)? {
        for bot_id in [team.bot1, team.bot2].into_iter().flatten() {
            if let Some(status) = source.compile_status(&bot_id) {
                if let CompileStatus::Error(message) = &status {
                    tracing::debug!(bot_id = %bot_id, error = %message, "bot failed to compile");
                }
                record_compile_status(&bot_id, &status, conn)?;
                refreshed += 1;
            }
        }
    }
    Ok(refreshed)
}
