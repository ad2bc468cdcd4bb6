mod host;
mod openxr_config;
mod xr_interface;

use bitflags::bitflags;

pub use host::{EngineHost, ScreenRect};
pub use openxr_config::OpenXrConfig;
pub use xr_interface::XrInterface;

#[cfg(test)]
pub(crate) use host::test_host;

use std::rc::Rc;

use crate::{openxr_api::OpenXrApi, runtime::XrRuntime, shared::SharedHandle, SessionConfig};

bitflags! {
    /// What the interface can do, in the host engine's terms
    pub struct Capabilities: u32 {
        /// Can render a single view
        const MONO = 1;
        /// Can render one view per eye
        const STEREO = 2;
        /// Can blend with the real world
        const AR = 4;
        /// Presents on its own display rather than the host's window
        const EXTERNAL = 8;
    }
}

/// The eyes the host engine asks about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eye {
    /// The centre of the head, used for mono rendering and head positioning
    Mono,
    /// Left eye
    Left,
    /// Right eye
    Right,
}

impl Eye {
    /// Index into the session's views, `None` for [`Eye::Mono`]
    pub fn view_index(self) -> Option<usize> {
        match self {
            Eye::Mono => None,
            Eye::Left => Some(0),
            Eye::Right => Some(1),
        }
    }
}

/// A [`SharedHandle`] that builds an [`OpenXrApi`] with the default [`SessionConfig`] on first use.
///
/// Hand clones of it to the [`XrInterface`] and any [`OpenXrConfig`] so they share one session.
pub fn shared_session_manager(runtime: Rc<dyn XrRuntime>) -> SharedHandle<OpenXrApi> {
    SharedHandle::new(move || OpenXrApi::new(runtime.clone(), SessionConfig::default()))
}

/// Fit a render target of `render_size` over `screen_rect`, keeping its aspect ratio.
///
/// The image covers the whole rect and is centred on it; whatever overflows is cropped by the
/// host's blit.
pub fn letterbox(render_size: (u32, u32), screen_rect: ScreenRect) -> ScreenRect {
    let (render_width, render_height) = (render_size.0 as f32, render_size.1 as f32);
    if render_width <= 0. || render_height <= 0. {
        return screen_rect;
    }

    let mut rect = screen_rect;
    let new_height = screen_rect.width * (render_height / render_width);
    if new_height > screen_rect.height {
        rect.y = screen_rect.y + 0.5 * (screen_rect.height - new_height);
        rect.height = new_height;
    } else {
        let new_width = screen_rect.height * (render_width / render_height);
        rect.x = screen_rect.x + 0.5 * (screen_rect.width - new_width);
        rect.width = new_width;
    }
    rect
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    pub fn test_letterbox_keeps_aspect_ratio() {
        // Tall eye buffer into a wide window: full width, cropped top and bottom
        let rect = letterbox((1440, 1600), ScreenRect::new(0., 0., 1920., 1080.));
        assert_eq!(rect.x, 0.);
        assert_eq!(rect.width, 1920.);
        assert_relative_eq!(rect.height, 2133.3333, epsilon = 1e-2);
        assert_relative_eq!(rect.y, -526.6667, epsilon = 1e-2);

        // Wide eye buffer into a square window: full height, cropped left and right
        let rect = letterbox((2000, 1000), ScreenRect::new(100., 50., 1000., 1000.));
        assert_eq!((rect.y, rect.height), (50., 1000.));
        assert_relative_eq!(rect.width, 2000.);
        assert_relative_eq!(rect.x, -400.);

        // Same aspect ratio: unchanged
        let screen = ScreenRect::new(10., 20., 800., 400.);
        assert_eq!(letterbox((1600, 800), screen), screen);

        assert_eq!(letterbox((0, 0), screen), screen);
    }

    #[test]
    pub fn test_eye_view_index() {
        assert_eq!(Eye::Mono.view_index(), None);
        assert_eq!(Eye::Left.view_index(), Some(0));
        assert_eq!(Eye::Right.view_index(), Some(1));
    }
}
