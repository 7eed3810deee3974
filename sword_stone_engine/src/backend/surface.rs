//! Window surface identity
//!
//! `RawWindowHandle` carries raw pointers and is neither `Send` nor `Sync`.
//! Backends only need to know which windowing platform a handle belongs to
//! and a stable identity for it, so they keep a [`Surface`] instead.

use raw_window_handle::RawWindowHandle;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowPlatform {
    Win32,
    WinRt,
    Xlib,
    Xcb,
    Wayland,
    AppKit,
    UiKit,
    AndroidNdk,
    Web,
    Other,
}

/// Platform plus native window identity (HWND, X11 window id, pointer address)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Surface {
    pub platform: WindowPlatform,
    pub id: u64,
}

impl Surface {
    pub fn from_raw(window: RawWindowHandle) -> Self {
        let (platform, id) = match window {
            RawWindowHandle::Win32(h) => (WindowPlatform::Win32, h.hwnd.get() as u64),
            RawWindowHandle::WinRt(h) => (WindowPlatform::WinRt, h.core_window.as_ptr() as usize as u64),
            RawWindowHandle::Xlib(h) => (WindowPlatform::Xlib, h.window as u64),
            RawWindowHandle::Xcb(h) => (WindowPlatform::Xcb, h.window.get() as u64),
            RawWindowHandle::Wayland(h) => (WindowPlatform::Wayland, h.surface.as_ptr() as usize as u64),
            RawWindowHandle::AppKit(h) => (WindowPlatform::AppKit, h.ns_view.as_ptr() as usize as u64),
            RawWindowHandle::UiKit(h) => (WindowPlatform::UiKit, h.ui_view.as_ptr() as usize as u64),
            RawWindowHandle::AndroidNdk(h) => {
                (WindowPlatform::AndroidNdk, h.a_native_window.as_ptr() as usize as u64)
            }
            RawWindowHandle::Web(h) => (WindowPlatform::Web, h.id as u64),
            _ => (WindowPlatform::Other, 0),
        };
        Self { platform, id }
    }

    /// DXGI swap chains are created for an HWND
    pub fn is_hwnd(&self) -> bool {
        self.platform == WindowPlatform::Win32
    }
}

impl fmt::Display for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} window 0x{:x}", self.platform, self.id)
    }
}
