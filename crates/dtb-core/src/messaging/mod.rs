//! Transport-neutral messaging surface (port trait + update/keyboard types).

pub mod port;
pub mod types;
