pub mod jwks;
pub mod key;
pub mod token;
