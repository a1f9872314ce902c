// Route modules for Codebridge Server
pub mod push; // Phone-originated verification code pushes
pub mod websocket; // Browser listener connections

use serde::Serialize;

/// Error body shared by all routes.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
        }
    }
}
