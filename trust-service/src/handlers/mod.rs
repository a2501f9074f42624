//! HTTP handlers for trust-service.

pub mod audit;
pub mod documents;
pub mod metrics;
pub mod mfa;
pub mod principals;
pub mod sessions;
pub mod versions;

pub use audit::*;
pub use documents::*;
pub use mfa::*;
pub use principals::*;
pub use sessions::*;
pub use versions::*;
