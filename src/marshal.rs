//! Profile → engine configuration
//!
//! The engine takes a flat record. Four experience settings flip polarity on
//! the way: the profile says "wallpaper on", the engine wants "disable
//! wallpaper". Remote rendering, font smoothing and desktop composition keep
//! their polarity.

use std::fmt;

use bitflags::bitflags;

use crate::error::{BridgeError, Result};
use crate::profile::{ConnectionProfile, PerformanceFlags, ProfileKind};

bitflags! {
    /// Performance switches in engine polarity
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct EnginePerformanceFlags: u32 {
        const REMOTEFX                   = 1 << 0;
        const DISABLE_WALLPAPER          = 1 << 1;
        const DISABLE_FULL_WINDOW_DRAG   = 1 << 2;
        const DISABLE_MENU_ANIMATIONS    = 1 << 3;
        const DISABLE_THEMING            = 1 << 4;
        const ENABLE_FONT_SMOOTHING      = 1 << 5;
        const ENABLE_DESKTOP_COMPOSITION = 1 << 6;
    }
}

impl EnginePerformanceFlags {
    pub fn remotefx(self) -> bool {
        self.contains(Self::REMOTEFX)
    }

    pub fn disable_wallpaper(self) -> bool {
        self.contains(Self::DISABLE_WALLPAPER)
    }

    pub fn disable_full_window_drag(self) -> bool {
        self.contains(Self::DISABLE_FULL_WINDOW_DRAG)
    }

    pub fn disable_menu_animations(self) -> bool {
        self.contains(Self::DISABLE_MENU_ANIMATIONS)
    }

    pub fn disable_theming(self) -> bool {
        self.contains(Self::DISABLE_THEMING)
    }

    pub fn enable_font_smoothing(self) -> bool {
        self.contains(Self::ENABLE_FONT_SMOOTHING)
    }

    pub fn enable_desktop_composition(self) -> bool {
        self.contains(Self::ENABLE_DESKTOP_COMPOSITION)
    }
}

impl From<&PerformanceFlags> for EnginePerformanceFlags {
    fn from(flags: &PerformanceFlags) -> Self {
        let mut result = EnginePerformanceFlags::empty();
        result.set(Self::REMOTEFX, flags.remote_fx);
        result.set(Self::DISABLE_WALLPAPER, !flags.wallpaper);
        result.set(Self::DISABLE_FULL_WINDOW_DRAG, !flags.full_window_drag);
        result.set(Self::DISABLE_MENU_ANIMATIONS, !flags.menu_animations);
        result.set(Self::DISABLE_THEMING, !flags.theming);
        result.set(Self::ENABLE_FONT_SMOOTHING, flags.font_smoothing);
        result.set(Self::ENABLE_DESKTOP_COMPOSITION, flags.desktop_composition);
        result
    }
}

/// Connection parameters as pushed to the engine
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParameters {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub domain: String,
    pub width: u32,
    pub height: u32,
    pub color_depth: u32,
    pub console: bool,
    pub security: u32,
    pub certificate_name: String,
}

impl fmt::Debug for ConnectionParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParameters")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("domain", &self.domain)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("color_depth", &self.color_depth)
            .field("console", &self.console)
            .field("security", &self.security)
            .field("certificate_name", &self.certificate_name)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvancedParameters {
    pub remote_program: String,
    pub work_dir: String,
}

/// Flat configuration consumed by the engine at connect time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfiguration {
    pub connection: ConnectionParameters,
    pub performance: EnginePerformanceFlags,
    pub advanced: AdvancedParameters,
}

/// Converts profiles into engine configuration
pub struct ConfigMarshaller;

impl ConfigMarshaller {
    /// Marshal a profile. Only manual profiles are understood.
    pub fn marshal(profile: &ConnectionProfile) -> Result<EngineConfiguration> {
        let target = match &profile.kind {
            ProfileKind::Manual(target) => target,
            other => return Err(BridgeError::UnsupportedProfileKind(other.name().to_string())),
        };

        let connection = ConnectionParameters {
            hostname: target.hostname.clone(),
            port: target.port,
            username: profile.credentials.username.clone(),
            password: profile.credentials.password.clone(),
            domain: profile.credentials.domain.clone(),
            width: profile.screen.width,
            height: profile.screen.height,
            color_depth: profile.screen.colors,
            console: profile.advanced.console_mode,
            security: profile.advanced.security.code(),
            certificate_name: profile.certificate_name.clone(),
        };

        Ok(EngineConfiguration {
            connection,
            performance: EnginePerformanceFlags::from(&profile.performance),
            advanced: AdvancedParameters {
                remote_program: profile.advanced.remote_program.clone(),
                work_dir: profile.advanced.work_dir.clone(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{AdvancedSettings, Credentials, SecurityMode};

    #[test]
    fn test_flag_polarity() {
        let profile = ConnectionProfile::manual("host", 3389).with_performance(PerformanceFlags {
            remote_fx: true,
            wallpaper: true,
            full_window_drag: true,
            menu_animations: true,
            theming: true,
            font_smoothing: false,
            desktop_composition: false,
        });

        let flags = ConfigMarshaller::marshal(&profile).unwrap().performance;
        assert!(!flags.disable_wallpaper());
        assert!(!flags.disable_full_window_drag());
        assert!(!flags.disable_menu_animations());
        assert!(!flags.disable_theming());
        assert!(!flags.enable_font_smoothing());
        assert!(!flags.enable_desktop_composition());
        assert!(flags.remotefx());
        assert_eq!(flags, EnginePerformanceFlags::REMOTEFX);
    }

    #[test]
    fn test_flag_polarity_inverse() {
        let profile = ConnectionProfile::manual("host", 3389).with_performance(PerformanceFlags {
            remote_fx: false,
            wallpaper: false,
            full_window_drag: false,
            menu_animations: false,
            theming: false,
            font_smoothing: true,
            desktop_composition: true,
        });

        let flags = ConfigMarshaller::marshal(&profile).unwrap().performance;
        assert_eq!(
            flags,
            EnginePerformanceFlags::DISABLE_WALLPAPER
                | EnginePerformanceFlags::DISABLE_FULL_WINDOW_DRAG
                | EnginePerformanceFlags::DISABLE_MENU_ANIMATIONS
                | EnginePerformanceFlags::DISABLE_THEMING
                | EnginePerformanceFlags::ENABLE_FONT_SMOOTHING
                | EnginePerformanceFlags::ENABLE_DESKTOP_COMPOSITION
        );
    }

    #[test]
    fn test_connection_fields() {
        let profile = ConnectionProfile::manual("rdp.example.com", 3390)
            .with_credentials(Credentials::new("alice", "CORP", "pw"))
            .with_screen(1920, 1080, 32)
            .with_advanced(AdvancedSettings {
                console_mode: true,
                security: SecurityMode::Tls,
                remote_program: "notepad.exe".to_string(),
                work_dir: "C:\\work".to_string(),
            });

        let config = ConfigMarshaller::marshal(&profile).unwrap();
        let conn = &config.connection;
        assert_eq!(conn.hostname, "rdp.example.com");
        assert_eq!(conn.port, 3390);
        assert_eq!(conn.username, "alice");
        assert_eq!(conn.domain, "CORP");
        assert_eq!(conn.password, "pw");
        assert_eq!((conn.width, conn.height, conn.color_depth), (1920, 1080, 32));
        assert!(conn.console);
        assert_eq!(conn.security, 2);
        assert_eq!(conn.certificate_name, "");
        assert_eq!(config.advanced.remote_program, "notepad.exe");
        assert_eq!(config.advanced.work_dir, "C:\\work");
    }

    #[test]
    fn test_unsupported_kind() {
        let mut profile = ConnectionProfile::manual("host", 3389);
        profile.kind = ProfileKind::Other {
            kind: "gateway".to_string(),
        };

        match ConfigMarshaller::marshal(&profile) {
            Err(BridgeError::UnsupportedProfileKind(kind)) => assert_eq!(kind, "gateway"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_kind_from_file() {
        let profile = ConnectionProfile::from_toml_str(
            r#"
            [kind]
            type = "rdp-file"
            path = "C:\\desk.rdp"
            "#,
        )
        .unwrap();

        assert!(matches!(
            ConfigMarshaller::marshal(&profile),
            Err(BridgeError::UnsupportedProfileKind(kind)) if kind == "rdp-file"
        ));
    }

    #[test]
    fn test_debug_redacts_password() {
        let profile = ConnectionProfile::manual("host", 3389)
            .with_credentials(Credentials::new("u", "d", "topsecret"));
        let config = ConfigMarshaller::marshal(&profile).unwrap();
        assert!(!format!("{:?}", config).contains("topsecret"));
    }
}
