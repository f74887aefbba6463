mod summarizer;

pub use summarizer::{parse_metadata_response, Summarizer};
