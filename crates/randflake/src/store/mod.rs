mod error;
mod interface;
mod memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use error::*;
pub use interface::*;
pub use memory::*;
#[cfg(feature = "postgres")]
pub use postgres::*;
