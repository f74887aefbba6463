mod extractor;
mod fetcher;

pub use extractor::Extractor;
pub use fetcher::Fetcher;
