pub mod feed;
pub mod metrics;
pub mod protocol;

pub use feed::{bind, run_feed, FeedConfig, FeedEvent};
pub use metrics::{init_metrics, record_status, serve_metrics, set_power_state};
pub use protocol::{FeedMessage, ProtocolError, StatusMsg};
