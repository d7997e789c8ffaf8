pub mod config;
pub mod destination;
pub mod fabric;
pub mod history;
pub mod pipeline;
pub mod source;

/// Folder names of the fixed table set, in load order.
pub fn table_folders() -> Vec<String> {
    source::mssql_tables()
        .iter()
        .map(source::TableResource::folder_name)
        .collect()
}
