pub mod catalog;
pub mod codec;
pub mod schema;

pub use catalog::{
    create_database, create_table, drop_database, drop_table, has_database, has_table, list_databases, list_tables,
    rename_column, SchemaCache, ADJ_TABLE,
};
pub use schema::{Column, Schema};
