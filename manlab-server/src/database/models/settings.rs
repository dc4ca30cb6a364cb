//! System settings key/value model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A system-wide setting. Secret values are stored sealed (AES-GCM,
/// base64-encoded) and opened on read.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SystemSettingDbModel {
    pub key: String,
    pub value: String,
    pub is_secret: bool,
    pub updated_at: String,
}
