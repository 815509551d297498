pub mod credentials;
pub mod measurement;
pub mod station;
pub mod token;
