pub mod secrets;

pub use secrets::{FileSecretStore, MemorySecretStore, SecretStore};
