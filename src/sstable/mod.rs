pub mod block;
pub mod builder;
pub mod footer;
pub mod iterator;
pub mod reader;

pub use builder::SSTableBuilder;
pub use footer::{Footer, IndexEntry, SSTABLE_MAGIC, SSTableMeta};
pub use iterator::SSTableIterator;
pub use reader::SSTable;

/// File name of a live SSTable for a generation id.
pub fn table_file_name(generation: u64) -> String {
    format!("{generation:06}.sst")
}

/// File name an in-progress table is written under until it commits.
pub fn temp_table_file_name(generation: u64) -> String {
    format!("{generation:06}.sst.tmp")
}

/// Parse a generation id out of a live SSTable file name.
pub fn parse_table_file_name(name: &str) -> Option<u64> {
    name.strip_suffix(".sst")?.parse().ok()
}
