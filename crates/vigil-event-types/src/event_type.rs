//! Event types and their default sources.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter};

/// Source name used when neither the producer nor the type table gives one.
pub const UNKNOWN_SOURCE: &str = "unknown";

/// The fixed enumeration of telemetry event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(AsRefStr, Display, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventType {
    /// Unexpected process behaviour.
    ProcessAnomaly,
    /// Outbound or inbound network connection.
    NetworkConnection,
    /// DNS lookup.
    DnsRequest,
    /// Watched file created, modified or removed.
    FileIntegrityChange,
    /// Crontab or launchd schedule changed.
    CronModification,
    /// Authorized keys or host keys changed.
    SshKeyChange,
    /// Privacy permission database changed.
    TccPermissionChange,
    /// Local account created, removed or modified.
    UserAccountChange,
    /// Signature engine match.
    SignatureHit,
    /// Intrusion detection alert.
    IdsAlert,
    /// Camera, microphone or location access.
    PrivacyEvent,
    /// Mass encryption or rename behaviour.
    RansomwareActivity,
    /// Security configuration changed.
    ConfigChange,
    /// Catch-all for types outside the enumeration.
    Generic,
}

impl EventType {
    /// Parse a canonical type name or one of the legacy short aliases.
    ///
    /// Returns `None` for anything unrecognized; callers decide whether to
    /// fall back to [`EventType::Generic`].
    pub fn parse(name: &str) -> Option<Self> {
        let ty = match name {
            "process_anomaly" | "process" => Self::ProcessAnomaly,
            "network_connection" | "network" => Self::NetworkConnection,
            "dns_request" => Self::DnsRequest,
            "file_integrity_change" | "filesystem" | "fs" => Self::FileIntegrityChange,
            "cron_modification" | "cron" => Self::CronModification,
            "ssh_key_change" | "ssh" => Self::SshKeyChange,
            "tcc_permission_change" | "tcc_privacy" => Self::TccPermissionChange,
            "user_account_change" | "user_accounts" => Self::UserAccountChange,
            "signature_hit" | "signature" => Self::SignatureHit,
            "ids_alert" | "ids" | "correlation" => Self::IdsAlert,
            "privacy_event" | "privacy" => Self::PrivacyEvent,
            "ransomware_activity" | "ransomware" => Self::RansomwareActivity,
            "config_change" => Self::ConfigChange,
            "generic" => Self::Generic,
            _ => return None,
        };
        Some(ty)
    }

    /// The collector that normally emits this type.
    pub fn default_source(&self) -> &'static str {
        match self {
            Self::FileIntegrityChange => "fsevents_watcher",
            Self::ProcessAnomaly => "process_watcher",
            Self::NetworkConnection | Self::DnsRequest => "network_watcher",
            Self::IdsAlert => "ids_engine",
            Self::SshKeyChange => "ssh_auditor",
            Self::UserAccountChange => "user_account_auditor",
            Self::CronModification => "cron_auditor",
            Self::TccPermissionChange | Self::PrivacyEvent => "tcc_auditor",
            Self::RansomwareActivity => "ransomware_detector",
            Self::SignatureHit => "signature_engine",
            Self::ConfigChange => "config_manager",
            Self::Generic => UNKNOWN_SOURCE,
        }
    }

    /// All event types.
    pub fn all() -> impl Iterator<Item = Self> {
        use strum::IntoEnumIterator;
        Self::iter()
    }
}

impl Default for EventType {
    fn default() -> Self {
        Self::Generic
    }
}
