use chrono::NaiveDateTime;
use diesel::{connection::LoadConnection, prelude::*, sqlite::Sqlite};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    competitions::RegistryError,
    schema::users,
    validation::{is_ascii_no_spaces, is_display_name},
};

/// A person who owns or co-owns teams. Authentication happens against the
/// directory elsewhere; the engine only keeps the directory identity.
#[derive(Debug, Queryable, Selectable, Serialize, Deserialize, Clone)]
#[diesel(table_name = users, check_for_backend(Sqlite))]
pub struct User {
    pub id: String,
    pub display_name: String,
    pub directory_id: String,
    role: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Participant,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Participant => "participant",
            Role::Admin => "admin",
        }
    }
}

impl User {
    pub fn fetch(
        user_id: &str,
        conn: &mut impl LoadConnection<Backend = Sqlite>,
    ) -> Result<Option<User>, diesel::result::Error> {
        users::table
            .filter(users::id.eq(user_id))
            .select(User::as_select())
            .first::<User>(conn)
            .optional()
    }

    pub fn role(&self) -> Role {
        match self.role.as_str() {
            "participant" => Role::Participant,
            "admin" => Role::Admin,
            _ => unreachable!("users.role is constrained by the schema"),
        }
    }
}

#[tracing::instrument(skip(conn))]
pub fn create_user(
    display_name: &str,
    directory_id: &str,
    role: Role,
    now: NaiveDateTime,
    conn: &mut SqliteConnection,
) -> Result<User, RegistryError> {
    is_display_name(display_name).map_err(RegistryError::Invalid)?;
    is_ascii_no_spaces(directory_id).map_err(RegistryError::Invalid)?;

    let id = Uuid::now_v7().to_string();
    diesel::insert_into(users::table)
        .values((
            users::id.eq(&id),
            users::display_name.eq(display_name.trim()),
            users::directory_id.eq(directory_id),
            users::role.eq(role.as_str()),
            users::created_at.eq(now),
        ))
        .execute(conn)?;

    User::fetch(&id, conn)?.ok_or_else(|| RegistryError::not_found("user", &id))
}

/// The role is the only part of a user that changes after creation.
pub fn set_role(
    user_id: &str,
    role: Role,
    conn: &mut SqliteConnection,
) -> Result<(), RegistryError> {
    let updated = diesel::update(users::table.filter(users::id.eq(user_id)))
        .set(users::role.eq(role.as_str()))
        .execute(conn)?;
    if updated == 0 {
        return Err(RegistryError::not_found("user", user_id));
    }
    Ok(())
}
