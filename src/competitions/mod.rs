use chrono::NaiveDateTime;
use diesel::{connection::LoadConnection, prelude::*, sqlite::Sqlite};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::competitions;

pub mod bots;
pub mod rating;
pub mod rounds;
pub mod standings;
pub mod teams;

/// Errors raised while registering or updating competitions, teams and bots.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("{kind} {id} does not exist")]
    NotFound { kind: &'static str, id: String },
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Database(#[from] diesel::result::Error),
}

impl RegistryError {
    pub(crate) fn not_found(kind: &'static str, id: &str) -> Self {
        RegistryError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

#[derive(Queryable, Selectable, Serialize, Deserialize, Clone, Debug)]
#[diesel(table_name = competitions, check_for_backend(Sqlite))]
pub struct Competition {
    pub id: String,
    pub name: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    allowed_submissions: String,
    pub submission_cutoff: Option<NaiveDateTime>,
    /// The most recently opened round (0 before the first one).
    pub round: i64,
    pub type_: String,
    pub games_per_round: i64,
    pub game_pack: String,
    pub final_round: i64,
    status: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompetitionStatus {
    /// Accepting teams and bots; no round has been opened yet.
    Open,
    Running,
    /// Round advancement stopped until an operator resumes the competition.
    Halted,
    Closed,
}

impl CompetitionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CompetitionStatus::Open => "open",
            CompetitionStatus::Running => "running",
            CompetitionStatus::Halted => "halted",
            CompetitionStatus::Closed => "closed",
        }
    }
}

/// Who may submit or replace bots while the competition runs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionPolicy {
    /// Bots submitted after the submission cutoff are not eligible.
    Window,
    /// Bots may be resubmitted between (and during) rounds.
    Anytime,
}

impl SubmissionPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            SubmissionPolicy::Window => "window",
            SubmissionPolicy::Anytime => "anytime",
        }
    }
}

impl Competition {
    #[tracing::instrument(skip(conn))]
    pub fn fetch(
        competition_id: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Result<Option<Competition>, diesel::result::Error> {
        competitions::table
            .filter(competitions::id.eq(competition_id))
            .select(Competition::as_select())
            .first::<Competition>(conn)
            .optional()
    }

    pub fn status(&self) -> CompetitionStatus {
        match self.status.as_str() {
            "open" => CompetitionStatus::Open,
            "running" => CompetitionStatus::Running,
            "halted" => CompetitionStatus::Halted,
            "closed" => CompetitionStatus::Closed,
            _ => unreachable!("competitions.status is constrained by the schema"),
        }
    }

    pub fn submission_policy(&self) -> SubmissionPolicy {
        match self.allowed_submissions.as_str() {
            "window" => SubmissionPolicy::Window,
            "anytime" => SubmissionPolicy::Anytime,
            _ => unreachable!(
                "competitions.allowed_submissions is constrained by the schema"
            ),
        }
    }

    /// Bots submitted after this point are not eligible under
    /// [`SubmissionPolicy::Window`].
    pub fn submission_cutoff(&self) -> NaiveDateTime {
        self.submission_cutoff.unwrap_or(self.start)
    }

    /// Whether completing `round` ends the competition.
    pub fn is_last_round(&self, round: i64, now: NaiveDateTime) -> bool {
        round >= self.final_round || now >= self.end
    }
}

#[derive(Debug, Deserialize)]
pub struct NewCompetition {
    pub name: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub type_: String,
    pub final_round: i64,
    #[serde(default)]
    pub games_per_round: Option<i64>,
    #[serde(default)]
    pub game_pack: Option<String>,
    #[serde(default)]
    pub allowed_submissions: Option<SubmissionPolicy>,
    #[serde(default)]
    pub submission_cutoff: Option<NaiveDateTime>,
}

const DEFAULT_GAMES_PER_ROUND: i64 = 6;

/// Creates a competition in the [`CompetitionStatus::Open`] state.
#[tracing::instrument(skip(conn))]
pub fn create_competition(
    new: NewCompetition,
    now: NaiveDateTime,
    conn: &mut SqliteConnection,
) -> Result<Competition, RegistryError> {
    if new.start >= new.end {
        return Err(RegistryError::Invalid(
            "a competition must start before it ends".to_string(),
        ));
    }
    if new.final_round < 1 {
        return Err(RegistryError::Invalid(
            "a competition needs at least one round".to_string(),
        ));
    }
    let games_per_round = new.games_per_round.unwrap_or(DEFAULT_GAMES_PER_ROUND);
    if games_per_round < 1 {
        return Err(RegistryError::Invalid(
            "games_per_round must be at least 1".to_string(),
        ));
    }

    let id = Uuid::now_v7().to_string();
    let game_pack = new
        .game_pack
        .unwrap_or_else(|| format!("./resources/packs/Batalja{}Pack.zip", new.type_));

    diesel::insert_into(competitions::table)
        .values((
            competitions::id.eq(&id),
            competitions::name.eq(&new.name),
            competitions::start.eq(new.start),
            competitions::end.eq(new.end),
            competitions::allowed_submissions.eq(new
                .allowed_submissions
                .unwrap_or(SubmissionPolicy::Anytime)
                .as_str()),
            competitions::submission_cutoff.eq(new.submission_cutoff),
            competitions::round.eq(0),
            competitions::type_.eq(&new.type_),
            competitions::games_per_round.eq(games_per_round),
            competitions::game_pack.eq(&game_pack),
            competitions::final_round.eq(new.final_round),
            competitions::status.eq(CompetitionStatus::Open.as_str()),
            competitions::created_at.eq(now),
        ))
        .execute(conn)?;

    tracing::info!(competition_id = %id, "created competition");

    Competition::fetch(&id, conn)?
        .ok_or_else(|| RegistryError::not_found("competition", &id))
}

pub(crate) fn set_status(
    competition_id: &str,
    status: CompetitionStatus,
    conn: &mut SqliteConnection,
) -> Result<(), diesel::result::Error> {
    diesel::update(competitions::table.filter(competitions::id.eq(competition_id)))
        .set(competitions::status.eq(status.as_str()))
        .execute(conn)?;
    Ok(())
}
