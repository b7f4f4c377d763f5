//! Robinhood option-order history with an incremental on-disk cache.
//! Wires Session -> Normalizer -> Cache -> Range merge.

pub mod cache;
pub mod config;
pub mod error;
pub mod history;
pub mod normalize;
pub mod robinhood_client;
pub mod session;
pub mod types;
pub mod utils;

pub use cache::CacheStore;
pub use error::{ErrorKind, HistoryError};
pub use history::{OrderHistory, RangeFetch, RowSource};
pub use session::{with_session, Brokerage};
pub use types::{Credentials, NormalizedRecord, RawOrder, RawSnapshot, TransCode};
