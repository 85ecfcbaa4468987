mod handle;
mod randflake;
mod source;
#[cfg(test)]
mod tests;
mod worker;

pub use handle::*;
pub use randflake::*;
pub use source::*;
