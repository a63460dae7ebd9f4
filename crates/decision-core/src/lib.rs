pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::ServiceConfig;
pub use error::CoreError;
pub use traits::{ContextProvider, MarketDataSource};
pub use types::*;
