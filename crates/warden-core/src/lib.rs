//! Shared building blocks for the warden engine: typed identifiers, the
//! millisecond timestamp, query locations, the injectable clock and the
//! event model with its subscriber bus.

pub mod error;
pub mod events;
pub mod traits;
pub mod types;

pub use error::*;
pub use events::*;
pub use traits::*;
pub use types::*;
