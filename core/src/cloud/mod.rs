pub mod client;
pub mod worker;

pub use client::CloudClient;
pub use worker::{CloudHandle, CloudStatus, CloudSyncWorker, COMMUNITY_MIN_CONTRIBUTORS};
