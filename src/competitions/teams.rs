use chrono::NaiveDateTime;
use diesel::{connection::LoadConnection, prelude::*, sqlite::Sqlite};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    competitions::{Competition, CompetitionStatus, RegistryError},
    schema::teams,
    users::User,
};

#[derive(Serialize, Deserialize, Queryable, Selectable, Clone, Debug)]
#[diesel(table_name = teams, check_for_backend(Sqlite))]
pub struct Team {
    pub id: String,
    pub competition_id: String,
    pub owner: String,
    pub partner: Option<String>,
    /// Current bots. Games pin the bots they were played with, so these may
    /// move on without affecting recorded games.
    pub bot1: Option<String>,
    pub bot2: Option<String>,
    pub elo: i64,
    pub initial_elo: i64,
    pub withdrawn: bool,
    pub created_at: NaiveDateTime,
}

impl Team {
    #[tracing::instrument(skip(conn))]
    pub fn fetch(
        team_id: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Result<Option<Team>, diesel::result::Error> {
        let ret = teams::table
            .filter(teams::id.eq(team_id))
            .select(Team::as_select())
            .first::<Team>(conn)
            .optional();

        tracing::trace!("found? {}", matches!(ret, Ok(Some(_))));

        ret
    }

    pub fn of_competition(
        competition_id: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Result<Vec<Team>, diesel::result::Error> {
        teams::table
            .filter(teams::competition_id.eq(competition_id))
            .order_by(teams::id.asc())
            .select(Team::as_select())
            .load::<Team>(conn)
    }
}

#[derive(Debug, Deserialize)]
pub struct NewTeam {
    pub owner: String,
    pub competition_id: String,
    #[serde(default)]
    pub partner: Option<String>,
}

#[tracing::instrument(skip(conn))]
pub fn register_team(
    new: NewTeam,
    initial_elo: i64,
    now: NaiveDateTime,
    conn: &mut SqliteConnection,
) -> Result<Team, RegistryError> {
    conn.immediate_transaction(|conn| {
        let competition = Competition::fetch(&new.competition_id, conn)?
            .ok_or_else(|| {
                RegistryError::not_found("competition", &new.competition_id)
            })?;
        if competition.status() == CompetitionStatus::Closed {
            return Err(RegistryError::Invalid(
                "the competition is closed".to_string(),
            ));
        }

        if User::fetch(&new.owner, conn)?.is_none() {
            return Err(RegistryError::not_found("user", &new.owner));
        }
        if let Some(partner) = &new.partner {
            check_partner(&new.owner, partner, conn)?;
        }

        let id = Uuid::now_v7().to_string();
        diesel::insert_into(teams::table)
            .values((
                teams::id.eq(&id),
                teams::competition_id.eq(&new.competition_id),
                teams::owner.eq(&new.owner),
                teams::partner.eq(&new.partner),
                teams::bot1.eq(None::<String>),
                teams::bot2.eq(None::<String>),
                teams::elo.eq(initial_elo),
                teams::initial_elo.eq(initial_elo),
                teams::withdrawn.eq(false),
                teams::created_at.eq(now),
            ))
            .execute(conn)?;

        tracing::info!(team_id = %id, "registered team");

        Team::fetch(&id, conn)?.ok_or_else(|| RegistryError::not_found("team", &id))
    })
}

fn check_partner(
    owner: &str,
    partner: &str,
    conn: &mut SqliteConnection,
) -> Result<(), RegistryError> {
    if owner == partner {
        return Err(RegistryError::Invalid(
            "a team's partner must differ from its owner".to_string(),
        ));
    }
    if User::fetch(partner, conn)?.is_none() {
        return Err(RegistryError::not_found("user", partner));
    }
    Ok(())
}

pub fn set_partner(
    team_id: &str,
    partner: &str,
    conn: &mut SqliteConnection,
) -> Result<(), RegistryError> {
    conn.immediate_transaction(|conn| {
        let team = Team::fetch(team_id, conn)?
            .ok_or_else(|| RegistryError::not_found("team", team_id))?;
        check_partner(&team.owner, partner, conn)?;

        diesel::update(teams::table.filter(teams::id.eq(team_id)))
            .set(teams::partner.eq(Some(partner)))
            .execute(conn)?;
        Ok(())
    })
}

/// Withdrawn teams stay in the database (their games still reference them)
/// but are never paired again.
#[tracing::instrument(skip(conn))]
pub fn withdraw_team(
    team_id: &str,
    conn: &mut SqliteConnection,
) -> Result<(), RegistryError> {
    let updated = diesel::update(teams::table.filter(teams::id.eq(team_id)))
        .set(teams::withdrawn.eq(true))
        .execute(conn)?;
    if updated == 0 {
        return Err(RegistryError::not_found("team", team_id));
    }
    tracing::info!("team withdrawn");
    Ok(())
}
