mod target;
mod tiktok;
mod youtube;

pub use target::{Publication, PublishError, PublishResult, PublishTarget};
pub use tiktok::{ChromiumUploadSession, StoredCookie, TikTokTarget, UploadSession};
pub use youtube::YouTubeTarget;
