//! Listener traits implemented by the application

use crate::core::Handle;
use crate::profile::Credentials;

use super::graphics::{PixelBuffer, Rect};

/// Lifecycle listener, registered once for all sessions
pub trait EventListener: Send + Sync {
    fn on_connection_success(&self, handle: Handle);
    fn on_connection_failure(&self, handle: Handle);
    fn on_disconnecting(&self, handle: Handle);
    fn on_disconnected(&self, handle: Handle);
}

/// Certificate presented by the server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    pub fingerprint: String,
}

/// Per-session interactive listener.
///
/// Every method has a default so listeners only implement what they use. The
/// defaults for the two requests answer deny.
pub trait UiEventListener: Send + Sync {
    fn on_settings_changed(&self, _width: u32, _height: u32, _bpp: u32) {}

    /// Fill in `credentials` and return `true` to log on, `false` to abort.
    fn on_authenticate(&self, _credentials: &mut Credentials) -> bool {
        false
    }

    /// Return `true` to trust the certificate
    fn on_verify_certificate(&self, _certificate: &CertificateInfo) -> bool {
        false
    }

    /// `pixels` covers exactly `rect` and is only valid for this call
    fn on_graphics_update(&self, _rect: Rect, _pixels: &PixelBuffer<'_>) {}

    fn on_graphics_resize(&self, _width: u32, _height: u32) {}
}
