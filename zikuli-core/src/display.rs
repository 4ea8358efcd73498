//! Display adapter: screen capture, monitor enumeration, and synthetic
//! input over the X11 protocol family.
//!
//! [`X11Display`] talks raw xproto (`GetImage`), the RandR extension
//! (CRTC/output enumeration for [`crate::monitor::MonitorRegistry`]), and
//! the XTest extension (`fake_input`) for synthetic pointer/keyboard
//! events, the way `hotshot-core`'s capture backend and
//! `autopilot`-style input layers each cover one half of this surface.
//! A lost connection is unrecoverable: every method returns
//! [`ZikuliError::Display`] once the underlying socket is gone, and the
//! adapter does not attempt to reconnect.

use x11rb::connection::Connection;
use x11rb::protocol::randr::ConnectionExt as _;
use x11rb::protocol::xproto::{ConnectionExt as _, ImageFormat};
use x11rb::protocol::xtest::ConnectionExt as _;
use x11rb::rust_connection::RustConnection;

use crate::error::ZikuliError;
use crate::geometry::{Point, Rectangle};
use crate::image::{Image, PixelFormat};
use crate::monitor::MonitorRegistry;

/// Synthetic pointer buttons, numbered the way X11 numbers them:
/// 1=left, 2=middle, 3=right, 4=wheel-up, 5=wheel-down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Left,
    Middle,
    Right,
    WheelUp,
    WheelDown,
}

impl Button {
    fn code(self) -> u8 {
        match self {
            Button::Left => 1,
            Button::Middle => 2,
            Button::Right => 3,
            Button::WheelUp => 4,
            Button::WheelDown => 5,
        }
    }
}

/// The display/input surface a `Region` drives operations through.
///
/// Implementations must treat a lost connection as fatal: once any
/// method returns [`ZikuliError::Display`], every later call on the same
/// handle is expected to fail the same way.
pub trait Display {
    /// Capture `rect`, clamped to the virtual screen. Returns
    /// [`ZikuliError::RegionOutOfBounds`] if `rect` does not intersect the
    /// virtual screen at all, or [`ZikuliError::InvalidRegion`] if the
    /// clamped rectangle is degenerate (zero width or height).
    fn capture(&self, rect: Rectangle) -> Result<Image, ZikuliError>;

    /// Move the pointer to an absolute virtual-screen coordinate. A
    /// coordinate outside every monitor's bounds is still accepted (the
    /// "any-screen" sentinel case): X11 clamps it server-side rather than
    /// erroring.
    fn move_mouse_absolute(&self, point: Point) -> Result<(), ZikuliError>;

    /// Press (`down = true`) or release (`down = false`) a pointer button.
    fn button_event(&self, button: Button, down: bool) -> Result<(), ZikuliError>;

    /// Press or release a key by X11 keycode.
    fn key_event(&self, keycode: u8, down: bool) -> Result<(), ZikuliError>;

    /// Current pointer location in virtual-screen coordinates.
    fn query_pointer(&self) -> Result<Point, ZikuliError>;

    /// Enumerate monitors, rebuilding the registry from the server's
    /// current RandR state.
    fn monitors(&self) -> Result<MonitorRegistry, ZikuliError>;
}

/// An X11 connection plus cached root window/screen geometry.
pub struct X11Display {
    conn: RustConnection,
    screen_root: u32,
    screen_num: usize,
}

impl X11Display {
    /// Connect to the X server named by `$DISPLAY` (or `display_name` if
    /// given).
    pub fn connect(display_name: Option<&str>) -> Result<Self, ZikuliError> {
        let (conn, screen_num) = x11rb::connect(display_name).map_err(|e| ZikuliError::Display {
            cause: format!("connect failed: {e}"),
        })?;
        let screen_root = conn.setup().roots[screen_num].root;
        Ok(Self {
            conn,
            screen_root,
            screen_num,
        })
    }

    fn virtual_bounds(&self) -> Result<Rectangle, ZikuliError> {
        Ok(self.monitors()?.virtual_screen_bounds())
    }

    fn fake_input(&self, kind: u8, detail: u32, root_x: i16, root_y: i16) -> Result<(), ZikuliError> {
        self.conn
            .xtest_fake_input(kind as u8, detail as u8, 0, self.screen_root as u32, root_x, root_y, 0)
            .map_err(|e| ZikuliError::InputError {
                event_kind: format!("xtest_fake_input({kind})"),
                cause: e.to_string(),
            })?
            .check()
            .map_err(|e| ZikuliError::InputError {
                event_kind: format!("xtest_fake_input({kind})"),
                cause: e.to_string(),
            })?;
        self.conn.flush().map_err(|e| ZikuliError::Display { cause: e.to_string() })
    }
}

/// XTest event type constants (`xproto::KEY_PRESS_EVENT` etc., but XTest
/// accepts them as a plain `u8` rather than the typed xproto enum).
const KEY_PRESS: u8 = 2;
const KEY_RELEASE: u8 = 3;
const BUTTON_PRESS: u8 = 4;
const BUTTON_RELEASE: u8 = 5;
const MOTION_NOTIFY: u8 = 6;

impl Display for X11Display {
    fn capture(&self, rect: Rectangle) -> Result<Image, ZikuliError> {
        let vbounds = self.virtual_bounds()?;
        if !vbounds.overlaps(&rect) {
            return Err(ZikuliError::RegionOutOfBounds { rect });
        }
        let clamped = rect.clamp_to(&vbounds);
        if clamped.is_empty() {
            return Err(ZikuliError::InvalidRegion {
                requested: rect,
                clamped,
            });
        }

        let reply = self
            .conn
            .get_image(
                ImageFormat::Z_PIXMAP,
                self.screen_root,
                clamped.x as i16,
                clamped.y as i16,
                clamped.w as u16,
                clamped.h as u16,
                !0,
            )
            .map_err(|e| ZikuliError::Capture {
                cause: e.to_string(),
                rect: clamped,
            })?
            .reply()
            .map_err(|e| ZikuliError::Capture {
                cause: e.to_string(),
                rect: clamped,
            })?;

        let expected = clamped.w as usize * clamped.h as usize * 4;
        if reply.data.len() < expected {
            return Err(ZikuliError::IncompleteData {
                expected,
                actual: reply.data.len(),
            });
        }

        // GetImage with Z_PIXMAP on a 32-bit-depth root window hands back
        // native-endian BGRA, one 4-byte pixel per X11 pixel -- no channel
        // swap needed, unlike the RGBA-oriented capture path other tools
        // convert to immediately.
        Image::new(reply.data, clamped.w, clamped.h, PixelFormat::Bgra)
    }

    fn move_mouse_absolute(&self, point: Point) -> Result<(), ZikuliError> {
        self.fake_input(MOTION_NOTIFY, 0, point.x as i16, point.y as i16)
    }

    fn button_event(&self, button: Button, down: bool) -> Result<(), ZikuliError> {
        let kind = if down { BUTTON_PRESS } else { BUTTON_RELEASE };
        self.fake_input(kind, button.code() as u32, 0, 0)
    }

    fn key_event(&self, keycode: u8, down: bool) -> Result<(), ZikuliError> {
        let kind = if down { KEY_PRESS } else { KEY_RELEASE };
        self.fake_input(kind, keycode as u32, 0, 0)
    }

    fn query_pointer(&self) -> Result<Point, ZikuliError> {
        let reply = self
            .conn
            .query_pointer(self.screen_root)
            .map_err(|e| ZikuliError::Display { cause: e.to_string() })?
            .reply()
            .map_err(|e| ZikuliError::Display { cause: e.to_string() })?;
        Ok(Point::new(reply.root_x as i32, reply.root_y as i32))
    }

    fn monitors(&self) -> Result<MonitorRegistry, ZikuliError> {
        let resources = self
            .conn
            .randr_get_screen_resources_current(self.screen_root)
            .map_err(|e| ZikuliError::Display { cause: e.to_string() })?
            .reply()
            .map_err(|e| ZikuliError::Display { cause: e.to_string() })?;

        let primary_output = self
            .conn
            .randr_get_output_primary(self.screen_root)
            .ok()
            .and_then(|cookie| cookie.reply().ok())
            .map(|reply| reply.output);

        let mut raw = Vec::new();
        for crtc in &resources.crtcs {
            let Ok(info) = self.conn.randr_get_crtc_info(*crtc, 0).and_then(|c| c.reply()) else {
                continue;
            };
            if info.width == 0 || info.height == 0 {
                continue;
            }
            let is_primary = primary_output
                .map(|p| info.outputs.iter().any(|o| *o == p))
                .unwrap_or(false);
            raw.push((
                Rectangle::new(info.x as i32, info.y as i32, info.width as u32, info.height as u32),
                is_primary,
                format!("crtc-{crtc}"),
            ));
        }

        if raw.is_empty() {
            let screen = &self.conn.setup().roots[self.screen_num];
            raw.push((
                Rectangle::new(0, 0, screen.width_in_pixels as u32, screen.height_in_pixels as u32),
                true,
                "root".to_string(),
            ));
        }

        Ok(MonitorRegistry::from_monitors(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn button_codes_match_x11_numbering() {
        assert_eq!(Button::Left.code(), 1);
        assert_eq!(Button::Middle.code(), 2);
        assert_eq!(Button::Right.code(), 3);
        assert_eq!(Button::WheelUp.code(), 4);
        assert_eq!(Button::WheelDown.code(), 5);
    }
}
