pub mod error;
pub(crate) mod response;
pub mod session;
pub mod token_manager;
pub mod transport;
