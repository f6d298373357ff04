//! Source module
//!
//! Collaborators the sync core consumes, and a declarative HTTP
//! implementation of them.
//!
//! # Overview
//!
//! - `PageSource`, `DeltaSource`, `ExportJobSource` - Per-stream fetch traits
//! - `SyncStream` - A named stream bound to one of those traits
//! - `SourceDefinition` - YAML description of an upstream API
//! - `HttpSource` - Streams and partitions built from a definition

mod definition;
mod http;
pub mod path;
pub mod template;
mod traits;

pub use definition::{
    load_source, load_source_from_str, validate_source, CursorDefinition, DeletedMarker,
    DeltaStreamDefinition, ExportJobStreamDefinition, JobStatusDefinition,
    PaginatedStreamDefinition, PartitionsDefinition, RecordsDefinition, RequestDefinition,
    SourceDefinition, StreamDefinition, TokenDefinition,
};
pub use http::{decode_records, HttpSource};
pub use traits::{
    DeltaPage, DeltaSource, ExportJobSource, PageSource, StreamKind, StreamSource, SyncStream,
};
