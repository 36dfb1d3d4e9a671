//! Postgres persistence

mod schema;
mod store;

pub use store::PgStore;
