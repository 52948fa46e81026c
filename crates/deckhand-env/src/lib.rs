//! deckhand-env: environment lifecycle for the deployment orchestrator.
//!
//! An environment is the target every deployment runs against: plaintext
//! variables, encrypted secrets, resource bounds, and an advisory lock.
//!
//! # Components
//!
//! - **`cipher`**: AES-256-GCM secret encryption (`nonce || ciphertext`, base64)
//! - **`defaults`**: resource allocation defaults per environment type
//! - **`manager`**: create/get/update/delete, lock/unlock, clone, promote

pub mod cipher;
pub mod defaults;
pub mod error;
pub mod manager;

pub use cipher::{CipherError, SecretCipher};
pub use defaults::default_allocation;
pub use error::{EnvError, EnvResult};
pub use manager::{EnvironmentManager, PROTECTED_VARIABLES};
