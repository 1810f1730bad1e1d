//! Counselling chat core: an ordered message store with forward-only
//! delivery status, a peer-to-peer channel session, and the conversation
//! view model that ties them together.

pub mod chat;
pub mod common;
pub mod config;
pub mod error;
pub mod network;
pub mod session;
pub mod storage;

pub use error::{ChatError, Result};
