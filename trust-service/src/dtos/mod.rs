pub mod document;
pub mod mfa;
pub mod principal;
pub mod session;

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
