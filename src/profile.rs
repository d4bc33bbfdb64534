//! Connection profiles
//!
//! The application describes what to connect to with a [`ConnectionProfile`].
//! Profiles are read-only input to the marshaller; how they are stored is the
//! application's business.
//!
//! ```toml
//! label = "build box"
//!
//! [kind]
//! type = "manual"
//! hostname = "10.0.0.5"
//! port = 3389
//!
//! [credentials]
//! username = "alice"
//! domain = "CORP"
//! password = "hunter2"
//!
//! [screen]
//! width = 1280
//! height = 800
//! colors = 32
//!
//! [performance]
//! remote_fx = true
//! font_smoothing = true
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Default RDP port
pub const DEFAULT_PORT: u16 = 3389;

/// Where a profile points. Only manual targets carry an address directly.
///
/// Any `type` other than `manual` is kept by name so the marshaller can
/// reject it as unsupported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawProfileKind", into = "RawProfileKind")]
pub enum ProfileKind {
    /// Hostname and port given explicitly
    Manual(ManualTarget),
    /// Any other kind, identified by name only
    Other { kind: String },
}

impl ProfileKind {
    pub fn name(&self) -> &str {
        match self {
            ProfileKind::Manual(_) => "manual",
            ProfileKind::Other { kind } => kind,
        }
    }
}

/// On-disk shape of `[kind]`; fields of unsupported kinds are ignored
#[derive(Serialize, Deserialize)]
struct RawProfileKind {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
}

impl TryFrom<RawProfileKind> for ProfileKind {
    type Error = String;

    fn try_from(raw: RawProfileKind) -> Result<Self, Self::Error> {
        if raw.kind != "manual" {
            return Ok(ProfileKind::Other { kind: raw.kind });
        }
        let hostname = raw
            .hostname
            .ok_or_else(|| "manual profile needs a hostname".to_string())?;
        Ok(ProfileKind::Manual(ManualTarget {
            hostname,
            port: raw.port.unwrap_or(DEFAULT_PORT),
        }))
    }
}

impl From<ProfileKind> for RawProfileKind {
    fn from(kind: ProfileKind) -> Self {
        match kind {
            ProfileKind::Manual(target) => Self {
                kind: "manual".to_string(),
                hostname: Some(target.hostname),
                port: Some(target.port),
            },
            ProfileKind::Other { kind } => Self {
                kind,
                hostname: None,
                port: None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualTarget {
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Logon credentials. Also used as the output slots of an authenticate request.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub username: String,
    pub domain: String,
    pub password: String,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        domain: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            domain: domain.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("domain", &self.domain)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Display parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenSettings {
    pub width: u32,
    pub height: u32,
    /// Color depth in bits per pixel
    pub colors: u32,
}

impl Default for ScreenSettings {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 768,
            colors: 16,
        }
    }
}

/// Experience settings as the user sees them.
///
/// `wallpaper`, `full_window_drag`, `menu_animations` and `theming` say whether
/// the feature is wanted; the engine receives them as "disable" switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceFlags {
    pub remote_fx: bool,
    pub wallpaper: bool,
    pub full_window_drag: bool,
    pub menu_animations: bool,
    pub theming: bool,
    pub font_smoothing: bool,
    pub desktop_composition: bool,
}

/// Transport security negotiation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityMode {
    #[default]
    Auto,
    Rdp,
    Tls,
    Nla,
}

impl SecurityMode {
    /// Numeric code the engine understands
    pub fn code(self) -> u32 {
        match self {
            SecurityMode::Auto => 0,
            SecurityMode::Rdp => 1,
            SecurityMode::Tls => 2,
            SecurityMode::Nla => 3,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedSettings {
    /// Attach to the console session
    pub console_mode: bool,
    pub security: SecurityMode,
    /// Program to start instead of the shell
    pub remote_program: String,
    pub work_dir: String,
}

/// Everything needed to configure one connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    #[serde(default)]
    pub label: String,
    pub kind: ProfileKind,
    #[serde(default)]
    pub credentials: Credentials,
    #[serde(default)]
    pub screen: ScreenSettings,
    #[serde(default)]
    pub performance: PerformanceFlags,
    #[serde(default)]
    pub advanced: AdvancedSettings,
    /// Name to match the server certificate against instead of the hostname
    #[serde(default)]
    pub certificate_name: String,
}

impl ConnectionProfile {
    /// Profile for a manual target with default settings
    pub fn manual(hostname: impl Into<String>, port: u16) -> Self {
        let hostname = hostname.into();
        Self {
            label: hostname.clone(),
            kind: ProfileKind::Manual(ManualTarget { hostname, port }),
            credentials: Credentials::default(),
            screen: ScreenSettings::default(),
            performance: PerformanceFlags::default(),
            advanced: AdvancedSettings::default(),
            certificate_name: String::new(),
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_screen(mut self, width: u32, height: u32, colors: u32) -> Self {
        self.screen = ScreenSettings {
            width,
            height,
            colors,
        };
        self
    }

    pub fn with_performance(mut self, performance: PerformanceFlags) -> Self {
        self.performance = performance;
        self
    }

    pub fn with_advanced(mut self, advanced: AdvancedSettings) -> Self {
        self.advanced = advanced;
        self
    }

    /// Parse a profile from TOML
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}
