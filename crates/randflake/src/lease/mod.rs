mod config;
mod lease;
mod node_set;
mod protocol;

pub use config::*;
pub use lease::*;
pub use node_set::*;
pub(crate) use protocol::*;
