use serde::{Deserialize, Serialize};

/// Query string of `GET /generate`. The parameter name is misspelled on the
/// wire and existing clients depend on it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateParams {
    pub characterstics: Option<String>,
    pub script: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthResponse {
    pub status: String,
}
