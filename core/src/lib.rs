pub mod cloud;
pub mod collector;
pub mod config;
pub mod data;
pub mod delta;
pub mod error;
pub mod player;
pub mod report;
pub mod segmenter;
pub mod store;
pub mod valuation;

// Re-exports for convenience
pub use collector::{Collector, CollectorEvent, CollectorHandle, CollectorStatus};
pub use config::{AppConfig, CloudConfig};
pub use error::{CloudError, CollectorError, StoreError};
pub use player::{PlayerContext, PlayerScope};
pub use segmenter::RunSegmenter;
pub use store::Store;
