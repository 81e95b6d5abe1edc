#![forbid(unsafe_code)]

mod changesets;
mod core;
mod indexes;
mod pragmas;
mod webhooks;

pub(super) fn full_schema_sql() -> String {
    let mut sql = String::new();
    sql.push_str(pragmas::SQL);
    sql.push_str(core::SQL);
    sql.push_str(changesets::SQL);
    sql.push_str(webhooks::SQL);
    sql.push_str(indexes::SQL);
    sql
}
