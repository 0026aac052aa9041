use chrono::NaiveDateTime;
use diesel_migrations::{EmbeddedMigrations, embed_migrations};

pub mod competitions;
pub mod config;
pub mod driver;
pub mod schema;
pub mod state;
pub mod users;
pub mod validation;

#[cfg(test)]
mod test;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// The engine stores naive UTC timestamps throughout.
pub fn utc_now() -> NaiveDateTime {
    chrono::Utc::now().naive_utc()
}
