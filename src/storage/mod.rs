mod categories;
mod episodes;
mod podcasts;
mod schema;
mod types;

pub use podcasts::DueWindow;
pub use schema::{Database, IN_MEMORY};
pub use types::{
    Category, DatabaseError, Episode, EpisodeChanges, FeedResult, Podcast, PodcastUpdate,
    RefreshStatus,
};
