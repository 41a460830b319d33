//! User-facing acquisition status.

use serde::Serialize;

pub const PERMISSION_REQUIRED_MESSAGE: &str =
    "Location permission is required. Please enable GPS/Location Services to view the safety map.";

pub const SIGNAL_UNAVAILABLE_MESSAGE: &str =
    "Unable to acquire location via GPS or network. The location signal is unavailable right now, please try again shortly.";

pub const CHECK_PERMISSIONS_MESSAGE: &str =
    "Unable to acquire location via GPS or network. Please check that location permissions are enabled.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "state")]
pub enum AcquisitionStatus {
    Locating,
    Connected,
    /// Terminal until the user re-grants access.
    PermissionDenied { message: String },
    /// Every source was exhausted and no position exists.
    Failed { message: String },
}

impl Default for AcquisitionStatus {
    fn default() -> Self {
        Self::Locating
    }
}

impl AcquisitionStatus {
    pub fn permission_denied() -> Self {
        Self::PermissionDenied {
            message: PERMISSION_REQUIRED_MESSAGE.to_string(),
        }
    }

    /// `saw_permission_denial`: a fallback step was refused access along the way.
    pub fn failed(saw_permission_denial: bool) -> Self {
        let message = if saw_permission_denial {
            CHECK_PERMISSIONS_MESSAGE
        } else {
            SIGNAL_UNAVAILABLE_MESSAGE
        };
        Self::Failed {
            message: message.to_string(),
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::PermissionDenied { message } | Self::Failed { message } => Some(message),
            Self::Locating | Self::Connected => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Locating => "locating",
            Self::Connected => "connected",
            Self::PermissionDenied { .. } => "permission-denied",
            Self::Failed { .. } => "failed",
        }
    }
}

impl std::fmt::Display for AcquisitionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
