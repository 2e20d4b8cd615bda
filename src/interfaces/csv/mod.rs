//! CSV adapters for the batch CLI: the journal reader and the report writer.

pub mod journal_reader;
pub mod report_writer;
