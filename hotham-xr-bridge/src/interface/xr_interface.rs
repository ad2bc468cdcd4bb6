use std::{cell::RefCell, rc::Rc};

use glam::{Affine3A, Vec3};
use log::{debug, info};

use super::{letterbox, Capabilities, EngineHost, Eye, ScreenRect};
use crate::{
    extensions::{BuiltinExtensions, CompositionLayerProvider},
    openxr_api::OpenXrApi,
    shared::SharedHandle,
};

/// Used when the session manager can't tell us how big the eye buffers are
const FALLBACK_RENDER_TARGET_SIZE: (u32, u32) = (500, 500);

/// Standing height, in metres, used while there's no tracking
const FALLBACK_HEAD_HEIGHT: f32 = 1.5;

/// Half the interpupillary distance, in metres, used while there's no tracking
const FALLBACK_HALF_IPD: f32 = 0.03;

/// The host engine's view of OpenXR: its stereo rendering callbacks, forwarded to a shared
/// [`OpenXrApi`].
///
/// The session manager is only acquired on [`XrInterface::initialize`] and released again on
/// [`XrInterface::uninitialize`]; until then every query returns a harmless fallback.
pub struct XrInterface {
    handle: SharedHandle<OpenXrApi>,
    api: Option<Rc<RefCell<OpenXrApi>>>,
    extensions: BuiltinExtensions,
    host: Rc<dyn EngineHost>,
    external_texture_eyes: [bool; 2],
}

impl XrInterface {
    /// Create the interface. Nothing touches the runtime until [`XrInterface::initialize`].
    pub fn new(handle: SharedHandle<OpenXrApi>, extensions: BuiltinExtensions, host: Rc<dyn EngineHost>) -> Self {
        Self {
            handle,
            api: None,
            extensions,
            host,
            external_texture_eyes: [false; 2],
        }
    }

    /// Name the host lists the interface under
    pub fn get_name(&self) -> &'static str {
        "OpenXR"
    }

    /// What this interface supports
    pub fn get_capabilities(&self) -> Capabilities {
        let capabilities = Capabilities::MONO | Capabilities::STEREO | Capabilities::AR;
        if cfg!(target_os = "android") {
            capabilities
        } else {
            capabilities | Capabilities::EXTERNAL
        }
    }

    /// Is there a fully initialised session manager behind this interface?
    pub fn is_initialized(&self) -> bool {
        self.api
            .as_ref()
            .map(|api| api.borrow().is_initialised())
            .unwrap_or(false)
    }

    /// Acquire the shared session manager, plug the built in extensions into it and bring it up.
    ///
    /// A failed bring-up keeps the session manager acquired; call [`XrInterface::uninitialize`] to
    /// let go of it.
    pub fn initialize(&mut self) -> bool {
        if self.api.is_none() {
            let api = self.handle.acquire();
            self.attach(&mut api.borrow_mut());
            self.api = Some(api);
        }
        let Some(api) = self.api.clone() else {
            return false;
        };

        let mut api = api.borrow_mut();
        if api.is_initialised() {
            return true;
        }
        info!("[OPENXR] Initialising interface");
        api.initialize()
    }

    /// Shut the session down and release the session manager
    pub fn uninitialize(&mut self) {
        let Some(api) = self.api.take() else {
            return;
        };

        info!("[OPENXR] Uninitialising interface");
        {
            let mut api = api.borrow_mut();
            api.uninitialize();
            self.detach(&mut api);
        }
        drop(api);

        // Release logs a mismatch itself
        let _ = self.handle.release();
        self.external_texture_eyes = [false; 2];
    }

    fn attach(&self, api: &mut OpenXrApi) {
        api.set_host(Some(self.host.clone()));
        for wrapper in self.extensions.wrappers() {
            api.register_extension_wrapper(wrapper);
        }
        api.register_composition_layer_provider(self.passthrough_provider());
    }

    fn detach(&self, api: &mut OpenXrApi) {
        for wrapper in self.extensions.wrappers() {
            api.unregister_extension_wrapper(&wrapper);
        }
        api.unregister_composition_layer_provider(&self.passthrough_provider());
        api.set_host(None);
    }

    fn passthrough_provider(&self) -> Rc<RefCell<dyn CompositionLayerProvider>> {
        self.extensions.passthrough.clone()
    }

    /// Size of each eye's render target
    pub fn get_render_target_size(&self) -> (u32, u32) {
        match &self.api {
            Some(api) => api.borrow().recommended_render_target_size(),
            None => FALLBACK_RENDER_TARGET_SIZE,
        }
    }

    /// World transform to render `eye` from: `camera_transform`, then the host's reference frame,
    /// then the tracked eye (or head, for [`Eye::Mono`]).
    pub fn get_transform_for_eye(&self, eye: Eye, camera_transform: Affine3A) -> Affine3A {
        let world_scale = self.host.world_scale();
        let eye_transform = self
            .api
            .as_ref()
            .and_then(|api| {
                let mut api = api.borrow_mut();
                match eye.view_index() {
                    Some(view) => api.get_view_transform(view, world_scale),
                    None => api.get_head_center(world_scale),
                }
            })
            .unwrap_or_else(|| default_eye_transform(eye, world_scale));

        camera_transform * self.host.reference_frame() * eye_transform
    }

    /// Projection matrix for `eye`, column major. `None` without a session manager.
    ///
    /// The runtime's field of view already fixes the aspect ratio, so `_aspect` is unused.
    pub fn fill_projection_for_eye(&self, eye: Eye, _aspect: f32, near: f32, far: f32) -> Option<[f32; 16]> {
        let api = self.api.as_ref()?;
        let view = eye.view_index().unwrap_or(0);
        Some(api.borrow_mut().fill_projection_matrix(view, near, far))
    }

    /// Hand a rendered eye to the compositor.
    ///
    /// If `screen_rect` has an area the left eye is also mirrored into the host's window.
    pub fn commit_for_eye(&mut self, eye: Eye, render_target: u32, screen_rect: ScreenRect) {
        if eye == Eye::Left && !screen_rect.has_no_area() {
            let rect = letterbox(self.get_render_target_size(), screen_rect);
            self.host.blit_to_screen(0, render_target, rect);
        }

        let (Some(api), Some(view)) = (&self.api, eye.view_index()) else {
            return;
        };
        let has_external_texture = std::mem::take(&mut self.external_texture_eyes[view]);
        api.borrow_mut()
            .render_openxr(view, render_target, has_external_texture);
    }

    /// Run the per frame work: events, frame timing, input
    pub fn process(&self) {
        if let Some(api) = &self.api {
            api.borrow_mut().process_openxr();
        }
    }

    /// The swapchain image the host should render `eye` into directly, if it can
    pub fn get_external_texture_for_eye(&mut self, eye: Eye) -> Option<u64> {
        let view = eye.view_index()?;
        let api = self.api.as_ref()?;
        let image = api.borrow_mut().get_external_texture_for_eye(view);
        self.external_texture_eyes[view] = image.is_some();
        image
    }

    /// Host notifications aren't acted on
    pub fn notification(&self, what: i32) {
        debug!("[OPENXR] Ignoring notification {what}");
    }

    /// OpenXR doesn't expose a camera feed
    pub fn get_camera_feed_id(&self) -> i32 {
        0
    }
}

impl Drop for XrInterface {
    fn drop(&mut self) {
        self.uninitialize();
    }
}

/// Somewhere sensible to put the eyes while there's no tracking, so the head isn't on the floor
fn default_eye_transform(eye: Eye, world_scale: f32) -> Affine3A {
    let x = match eye {
        Eye::Mono => 0.,
        Eye::Left => -FALLBACK_HALF_IPD,
        Eye::Right => FALLBACK_HALF_IPD,
    };
    Affine3A::from_translation(Vec3::new(x, FALLBACK_HEAD_HEIGHT, 0.) * world_scale)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use openxr::sys::SessionState;

    use super::*;
    use crate::{
        interface::{shared_session_manager, test_host::RecordingHost},
        runtime::{mock::MockRuntime, XrRuntime},
    };

    fn interface() -> (Rc<MockRuntime>, Rc<RecordingHost>, SharedHandle<OpenXrApi>, XrInterface) {
        let mock = Rc::new(MockRuntime::default());
        let runtime: Rc<dyn XrRuntime> = mock.clone();
        let handle = shared_session_manager(runtime);
        let host = Rc::new(RecordingHost::default());
        let engine_host: Rc<dyn EngineHost> = host.clone();
        let interface = XrInterface::new(handle.clone(), BuiltinExtensions::default(), engine_host);
        (mock, host, handle, interface)
    }

    fn focus(mock: &MockRuntime) {
        for state in [
            SessionState::IDLE,
            SessionState::READY,
            SessionState::SYNCHRONIZED,
            SessionState::VISIBLE,
            SessionState::FOCUSED,
        ] {
            mock.push_state(state);
        }
    }

    #[test]
    pub fn test_descriptors() {
        let (_, _, _, interface) = interface();
        assert_eq!(interface.get_name(), "OpenXR");
        let capabilities = interface.get_capabilities();
        assert!(capabilities.contains(Capabilities::MONO | Capabilities::STEREO | Capabilities::AR));
        assert_eq!(
            capabilities.contains(Capabilities::EXTERNAL),
            !cfg!(target_os = "android")
        );
        assert_eq!(interface.get_camera_feed_id(), 0);
        interface.notification(1);
    }

    #[test]
    pub fn test_fallbacks_without_a_session_manager() {
        let (mock, host, handle, mut interface) = interface();
        host.world_scale.set(2.);

        assert!(!interface.is_initialized());
        assert_eq!(interface.get_render_target_size(), (500, 500));
        assert!(interface.fill_projection_for_eye(Eye::Left, 1., 0.1, 100.).is_none());
        assert!(interface.get_external_texture_for_eye(Eye::Left).is_none());

        let left = interface.get_transform_for_eye(Eye::Left, Affine3A::IDENTITY);
        let right = interface.get_transform_for_eye(Eye::Right, Affine3A::IDENTITY);
        let head = interface.get_transform_for_eye(Eye::Mono, Affine3A::IDENTITY);
        assert_relative_eq!(Vec3::from(left.translation), Vec3::new(-0.06, 3., 0.));
        assert_relative_eq!(Vec3::from(right.translation), Vec3::new(0.06, 3., 0.));
        assert_relative_eq!(Vec3::from(head.translation), Vec3::new(0., 3., 0.));

        interface.process();
        interface.commit_for_eye(Eye::Left, 7, ScreenRect::new(0., 0., 500., 500.));
        assert_eq!(host.blits.borrow().len(), 1);
        assert!(mock.calls().is_empty());
        assert_eq!(handle.use_count(), 0);
    }

    #[test]
    pub fn test_initialize_and_uninitialize() {
        let (mock, _, handle, mut interface) = interface();
        assert!(interface.initialize());
        assert!(interface.is_initialized());
        assert_eq!(handle.use_count(), 1);
        assert_eq!(interface.get_render_target_size(), (1440, 1600));

        let api = handle.get().unwrap();
        assert_eq!(api.borrow().wrapper_count(), 10);
        drop(api);

        // A second initialise doesn't acquire again
        assert!(interface.initialize());
        assert_eq!(handle.use_count(), 1);
        assert_eq!(mock.count("create_instance"), 1);

        interface.uninitialize();
        assert!(!interface.is_initialized());
        assert_eq!(handle.use_count(), 0);
        assert!(handle.get().is_none());
        assert_eq!(mock.live_handles(), (0, 0, 0, 0));

        interface.uninitialize();
        assert_eq!(handle.use_count(), 0);
    }

    #[test]
    pub fn test_dropping_the_interface_releases() {
        let (mock, _, handle, mut interface) = interface();
        assert!(interface.initialize());
        drop(interface);
        assert_eq!(handle.use_count(), 0);
        assert_eq!(mock.live_handles(), (0, 0, 0, 0));
    }

    #[test]
    pub fn test_failed_initialize_keeps_the_handle() {
        let (mock, _, handle, mut interface) = interface();
        mock.fail("create_session");
        assert!(!interface.initialize());
        assert!(!interface.is_initialized());
        assert_eq!(handle.use_count(), 1);

        mock.succeed("create_session");
        assert!(interface.initialize());
        assert_eq!(handle.use_count(), 1);
    }

    #[test]
    pub fn test_frames_through_the_interface() {
        let (mock, host, _, mut interface) = interface();
        assert!(interface.initialize());
        focus(&mock);

        interface.process();
        interface.commit_for_eye(Eye::Left, 3, ScreenRect::new(0., 0., 800., 600.));
        interface.commit_for_eye(Eye::Right, 4, ScreenRect::default());

        assert_eq!(mock.count("begin_frame"), 1);
        assert_eq!(mock.count("end_frame"), 1);
        assert_eq!(*mock.end_frame_layers.borrow(), vec![1]);
        assert_eq!(host.copies.borrow().len(), 2);
        let blits = host.blits.borrow();
        assert_eq!(blits.len(), 1);
        assert_eq!((blits[0].0, blits[0].1), (0, 3));

        let camera = Affine3A::from_translation(Vec3::X);
        let left = interface.get_transform_for_eye(Eye::Left, camera);
        assert_relative_eq!(Vec3::from(left.translation), Vec3::new(1. - 0.032, 1.6, 0.), epsilon = 1e-6);
        let head = interface.get_transform_for_eye(Eye::Mono, Affine3A::IDENTITY);
        assert_relative_eq!(head.translation.y, 1.6, epsilon = 1e-6);

        let projection = interface.fill_projection_for_eye(Eye::Right, 1., 0.1, 100.).unwrap();
        assert_relative_eq!(projection[0], 1., epsilon = 1e-6);
    }

    #[test]
    pub fn test_external_textures_through_the_interface() {
        let (mock, host, _, mut interface) = interface();
        assert!(interface.initialize());
        focus(&mock);

        interface.process();
        assert!(interface.get_external_texture_for_eye(Eye::Left).is_some());
        assert!(interface.get_external_texture_for_eye(Eye::Right).is_some());
        assert!(interface.get_external_texture_for_eye(Eye::Mono).is_none());
        interface.commit_for_eye(Eye::Left, 3, ScreenRect::default());
        interface.commit_for_eye(Eye::Right, 4, ScreenRect::default());
        assert!(host.copies.borrow().is_empty());
        assert_eq!(mock.outstanding_images(), 0);

        // Without asking for the image again the next frame falls back to copying
        interface.process();
        interface.commit_for_eye(Eye::Left, 3, ScreenRect::default());
        interface.commit_for_eye(Eye::Right, 4, ScreenRect::default());
        assert_eq!(host.copies.borrow().len(), 2);
        assert_eq!(mock.count("end_frame"), 2);
    }
}
