//! Configuration composer: discovery, parsing, imports, merge, schema
//! validation, and semantic lint.

pub mod compose;
pub mod discovery;
pub mod document;
pub mod error;
pub mod imports;
pub mod lint;
pub mod merge;
pub mod parse;

pub use compose::{ComposeOptions, ComposeOutcome, compose};
pub use discovery::{
    ConfigResolution, DiscoveryRequest, ResolutionEntry, ResolutionSource, discover,
};
pub use document::{ConfigDocument, LoadedDocument, validate_document};
pub use error::{ComposeError, SchemaIssue};
pub use lint::{LintIssue, LintLevel, has_errors, lint_config};
