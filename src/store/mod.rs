//! Storage layer: the hot (keyed, TTL) tier and the durable (relational)
//! tier every stateful component reads or writes through.

pub mod durable;
pub mod hot;
