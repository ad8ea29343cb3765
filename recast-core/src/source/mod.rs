mod discovery;
mod error;
mod filter;
mod index;
mod models;
mod selector;

pub use discovery::{ChannelDiscovery, DiscoveryOutcome, DiscoveryReport};
pub use error::{SourceError, SourceResult};
pub use filter::ContentFilter;
pub use index::{HttpVideoIndex, VideoIndex};
pub use models::{ChannelRef, VideoMetadata, VideoRef};
pub use selector::{
    CandidateSelector, SelectError, Selection, SelectionOutcome, SelectionReport,
};
