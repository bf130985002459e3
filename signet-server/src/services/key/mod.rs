mod generator;
mod manager;
mod rotator;

pub use generator::KeyGenerator;
pub use manager::KeyManager;
pub use rotator::{KeyRotator, RotationOutcome};
