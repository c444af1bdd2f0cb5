//! Message classification pipeline.
//!
//! Every unseen message flows through:
//! 1. `MessageContent::parse()`: subject + readable text
//! 2. `KeywordMatcher::find_terms()`: fast literal match, no I/O
//! 3. `PageFetcher`: linked pages, only when step 2 found nothing
//! 4. `Watcher`: alert and keep, or flag for deletion

pub mod content;
pub mod links;
pub mod matcher;
pub mod processor;

pub use content::MessageContent;
pub use links::{HttpPageFetcher, PageFetcher};
pub use matcher::KeywordMatcher;
pub use processor::{Outcome, RunSummary, WatchOptions, Watcher};
