pub mod dynamic_sized_packet;
pub mod fixed_packet;
pub mod reader;
pub mod writer;
