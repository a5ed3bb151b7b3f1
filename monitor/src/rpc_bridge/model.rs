use rivercore::projection::ContourKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Reply to every command route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandStatus {
    pub ok: bool,
    pub error: Option<String>,
}

impl CommandStatus {
    pub fn success() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ContourQuery {
    pub kind: ContourKind,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectRequest {
    pub port: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
}

fn default_baud() -> u32 {
    rivercore::settings::DEFAULT_BAUD
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextRequest {
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayRequest {
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordRequest {
    pub enabled: bool,
}
