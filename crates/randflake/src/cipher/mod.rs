mod sparx64;

pub use sparx64::*;
