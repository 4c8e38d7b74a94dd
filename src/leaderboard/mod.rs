pub mod compaction_task;
pub mod models;
pub mod service;
pub mod store;
pub mod window_board;

pub use models::{Score, TimeWindow};
pub use service::LeaderboardService;
pub use store::LeaderboardStore;
pub use window_board::GameLeaderboard;
