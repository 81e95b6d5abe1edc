#![forbid(unsafe_code)]

mod columns;
mod schema;

pub(super) use columns::*;
pub(super) use schema::migrate_sqlite_schema;
