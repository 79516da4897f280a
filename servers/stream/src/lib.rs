pub mod errors;
pub mod fifo;
pub mod filter;
pub mod resender;
pub mod rtcp_context;
pub mod session;
pub mod statistics;
