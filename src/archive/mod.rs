//! Download post-processing: archive extraction and placement into a library.

mod extractor;
mod processor;

pub use extractor::{is_archive, ArchiveExtractor, ExtractError};
pub use processor::{ArchiveProcessor, ProcessFailure, ProcessOptions, ProcessReport, ProcessedFile};
