//! Authentication subsystem.
//!
//! # Data Flow
//! ```text
//! Authorization: Bearer <token>
//!     → pipeline.rs (header parsing)
//!     → token.rs (signature, algorithm, issuer/audience, [nbf, exp) window)
//!     → PrincipalDirectory lookup
//!     → Principal attached to the request
//!
//! Registration / activation:
//!     → password.rs (bcrypt hash)
//!     → activation.rs (random token, digest stored, plaintext sent out of band)
//! ```

pub mod activation;
pub mod password;
pub mod pipeline;
pub mod principal;
pub mod token;

pub use activation::{ActivationTokenStore, TokenScope};
pub use password::CredentialVerifier;
pub use pipeline::AuthPipeline;
pub use principal::{PermissionSet, Principal, PrincipalId, PrincipalRecord};
pub use token::TokenCodec;
