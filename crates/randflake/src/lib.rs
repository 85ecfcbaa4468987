#![doc = include_str!("../README.md")]

mod cipher;
mod error;
mod generator;
mod id;
mod lease;
mod store;
mod time;

pub use crate::cipher::*;
pub use crate::error::*;
pub use crate::generator::*;
pub use crate::id::*;
pub use crate::lease::*;
pub use crate::store::*;
pub use crate::time::*;
