/// Wire types exchanged with the REST backend and the devices.
use derive_more::Display;
use serde::{Deserialize, Serialize};
use strum::{EnumIter, EnumString, IntoStaticStr};

/// Interaction mode of a test session.
#[derive(
    Debug, Display, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum TestMode {
    #[display("sequential")]
    Sequential,
    #[display("random")]
    Random,
    #[display("manual")]
    Manual,
}

impl TestMode {
    /// Name the backend uses for the `tipo` field.
    pub fn backend_name(self) -> &'static str {
        match self {
            TestMode::Sequential => "secuencial",
            TestMode::Random => "aleatorio",
            TestMode::Manual => "manual",
        }
    }
}

/// Outbound command addressed to one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCommand {
    pub device_id: u8,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Correlation number devices may echo back in their answer.
    pub seq: u64,
}

/// Envelope every backend endpoint answers with.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterSessionBody<'a> {
    pub tipo: &'a str,
    #[serde(rename = "cuentaId")]
    pub cuenta_id: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisteredSession {
    pub id: serde_json::Value,
}

impl RegisteredSession {
    /// The backend returns numeric ids; keep them opaque.
    pub fn id_string(&self) -> Option<String> {
        match &self.id {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FinalizeSessionBody {
    pub cantidad_intentos: u32,
    pub cantidad_aciertos: u32,
    pub cantidad_errores: u32,
}
