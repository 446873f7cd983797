//! tunematch fingerprint index snapshot format library

pub mod format;
pub mod reader;
pub mod writer;

pub use format::{
    IndexFile, IndexHeader, IndexPayload, PostingRecord, TrackRecord, HEADER_SIZE, MAGIC, VERSION,
};
pub use reader::IndexReader;
pub use writer::IndexWriter;
