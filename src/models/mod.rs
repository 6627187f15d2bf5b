//! Data models

mod authority;
mod mapping;
mod network;
mod reconciliation;
mod task;

pub use authority::*;
pub use mapping::*;
pub use network::*;
pub use reconciliation::*;
pub use task::*;
