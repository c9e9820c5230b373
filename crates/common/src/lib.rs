pub mod config;
pub mod error;
pub mod ids;
pub mod types;

pub use error::{DispatchError, Result};
pub use ids::TaskId;
