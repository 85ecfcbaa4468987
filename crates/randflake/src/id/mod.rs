mod randflake_id;

pub use randflake_id::*;
