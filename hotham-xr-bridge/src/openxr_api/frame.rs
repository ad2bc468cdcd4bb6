use glam::Affine3A;
use log::{debug, error, info, warn};
use openxr::sys::SessionState;

use super::OpenXrApi;
use crate::{
    actions::sync_action_sets,
    runtime::{xr_check, CompositionLayer},
    util::{create_projection_fov, fallback_projection, is_space_valid, is_view_valid, transform_from_pose},
    BLEND_MODE,
};

/// Vertical field of view used when there is no runtime to ask
const FALLBACK_FOV_DEGREES: f32 = 60.;

/// Has the session reached STOPPING, or gone past it?
fn is_stopping(state: SessionState) -> bool {
    state.into_raw() >= SessionState::STOPPING.into_raw()
}

impl OpenXrApi {
    fn can_run_frame(&self) -> bool {
        self.initialised && self.running && !is_stopping(self.state)
    }

    fn has_frame_timing(&self) -> bool {
        self.frame_timing.predicted_display_time.as_nanos() != 0
    }

    /// Poll events, then wait for and begin the next frame. Call once per engine frame, before
    /// [`Self::render_openxr`].
    pub fn process_openxr(&mut self) {
        if !self.initialised {
            return;
        }
        if !self.poll_events() {
            return;
        }
        if !self.can_run_frame() {
            return;
        }

        if self.frame_begun {
            warn!("[OPENXR] The last frame was never submitted, ending it now");
            self.frame_layer_ok = false;
            self.end_frame();
        }

        self.views_located = false;
        let result = self.runtime.wait_frame(self.session);
        let Some(frame_timing) = xr_check(self.runtime.as_ref(), self.instance, result, "Waiting for frame")
        else {
            return;
        };
        self.frame_timing = frame_timing;

        if self.state == SessionState::FOCUSED {
            self.update_actions();
        }

        // Without views for this frame nothing is rendered, but the frame is still begun and ended
        self.views_located = self.locate_views();

        let result = self.runtime.begin_frame(self.session);
        if xr_check(self.runtime.as_ref(), self.instance, result, "Beginning frame").is_none() {
            return;
        }
        self.frame_begun = true;
        self.frame_layer_ok = true;

        self.notify_wrappers(|w, c| w.on_process_openxr(c));
    }

    fn update_actions(&mut self) {
        let runtime = self.runtime.clone();
        let context = self.context(&runtime);
        if !sync_action_sets(&context, &mut self.action_sets) {
            return;
        }

        let Some(host) = self.host.clone() else {
            return;
        };
        let world_scale = host.world_scale();
        for input_map in self.input_maps.iter_mut() {
            input_map.update(
                &context,
                host.as_ref(),
                &mut self.action_sets,
                &self.default_actions,
                world_scale,
            );
        }
    }

    fn locate_views(&mut self) -> bool {
        let result = self.runtime.locate_views(
            self.session,
            self.config.view_configuration_type(),
            self.frame_timing.predicted_display_time,
            self.play_space,
        );
        let Some((flags, views)) = xr_check(self.runtime.as_ref(), self.instance, result, "Locating views")
        else {
            return false;
        };

        let valid = is_view_valid(flags);
        if valid != self.view_pose_valid {
            if valid {
                info!("[OPENXR] View pose became valid");
            } else {
                warn!("[OPENXR] View pose became invalid");
            }
            self.view_pose_valid = valid;
        }
        if valid {
            self.views = views;
        }
        valid
    }

    /// Hand eye `eye`'s image to the compositor. Call for eye 0 then eye 1, after the host has
    /// rendered into `source_texture`; the last eye ends the frame.
    ///
    /// With `has_external_texture_support` the host rendered straight into the image returned by
    /// [`Self::get_external_texture_for_eye`], which is only released here.
    pub fn render_openxr(&mut self, eye: usize, source_texture: u32, has_external_texture_support: bool) {
        if !self.can_run_frame() {
            return;
        }

        if !self.render_eye(eye, source_texture, has_external_texture_support) {
            self.frame_layer_ok = false;
        }
        if eye + 1 == self.swapchains.len() {
            self.end_frame();
        }
    }

    fn render_eye(&mut self, eye: usize, source_texture: u32, has_external_texture_support: bool) -> bool {
        let runtime = self.runtime.clone();
        let runtime = runtime.as_ref();
        let instance = self.instance;

        let view = self.views.get(eye).copied();
        let should_render = self.frame_begun
            && self.frame_timing.should_render
            && self.views_located
            && self.view_pose_valid
            && view.is_some();

        let Some(swapchain) = self.swapchains.get_mut(eye) else {
            error!("[OPENXR] There is no swapchain for eye {eye}");
            return false;
        };

        if !should_render {
            if swapchain.is_acquired() {
                let result = swapchain.release(runtime);
                xr_check(runtime, instance, result, "Releasing swapchain image");
            }
            return false;
        }

        match swapchain.current_image() {
            None => {
                if has_external_texture_support {
                    debug!("[OPENXR] No external image was acquired for eye {eye}, copying instead");
                }
                let result = swapchain.acquire(runtime);
                let Some(image) = xr_check(runtime, instance, result, "Acquiring swapchain image") else {
                    return false;
                };
                if let Some(host) = &self.host {
                    host.copy_texture(source_texture, image, swapchain.width(), swapchain.height());
                }
            }
            Some(image) if !has_external_texture_support => {
                if let Some(host) = &self.host {
                    host.copy_texture(source_texture, image, swapchain.width(), swapchain.height());
                }
            }
            Some(_) => {}
        }

        let result = swapchain.release(runtime);
        if xr_check(runtime, instance, result, "Releasing swapchain image").is_none() {
            return false;
        }

        if let (Some(view), Some(projection_view)) = (view, self.projection_views.get_mut(eye)) {
            projection_view.pose = view.pose;
            projection_view.fov = view.fov;
        }
        true
    }

    fn end_frame(&mut self) {
        if !self.frame_begun {
            return;
        }
        self.frame_begun = false;

        let display_time = self.frame_timing.predicted_display_time;
        let result = if self.frame_layer_ok {
            let mut layers = self
                .layer_providers
                .iter()
                .filter_map(|p| p.borrow().composition_layer())
                .map(CompositionLayer::Raw)
                .collect::<Vec<_>>();
            layers.push(CompositionLayer::Projection {
                space: self.play_space,
                views: &self.projection_views,
            });
            self.runtime
                .end_frame(self.session, display_time, BLEND_MODE, &layers)
        } else {
            self.runtime
                .end_frame(self.session, display_time, BLEND_MODE, &[])
        };
        xr_check(self.runtime.as_ref(), self.instance, result, "Ending frame");
    }

    /// Acquire eye `eye`'s next swapchain image for the host to render into directly.
    ///
    /// The image stays acquired until [`Self::render_openxr`] is called for the same eye with
    /// `has_external_texture_support` set. Asking again before then returns the same image.
    pub fn get_external_texture_for_eye(&mut self, eye: usize) -> Option<u64> {
        if !self.can_run_frame() {
            return None;
        }

        let runtime = self.runtime.clone();
        let swapchain = self.swapchains.get_mut(eye)?;
        if let Some(image) = swapchain.current_image() {
            return Some(image);
        }
        let result = swapchain.acquire(runtime.as_ref());
        xr_check(runtime.as_ref(), self.instance, result, "Acquiring swapchain image")
    }

    /// Column major projection matrix for `eye`. Views are located again as the host may ask at a
    /// different point of its frame than [`Self::process_openxr`].
    ///
    /// Without a running session a symmetric 60 degree projection is returned.
    pub fn fill_projection_matrix(&mut self, eye: usize, near: f32, far: f32) -> [f32; 16] {
        let fallback = || fallback_projection(FALLBACK_FOV_DEGREES, 1., near, far);
        if !self.can_run_frame() || !self.has_frame_timing() {
            return fallback();
        }

        self.locate_views();
        match self.views.get(eye) {
            Some(view) => create_projection_fov(self.runtime.graphics_api(), &view.fov, near, far),
            None => fallback(),
        }
    }

    /// Where eye `eye` is in the play space. `None` unless this frame's views were located and
    /// are valid.
    pub fn get_view_transform(&self, eye: usize, world_scale: f32) -> Option<Affine3A> {
        if !self.can_run_frame()
            || !self.has_frame_timing()
            || !self.views_located
            || !self.view_pose_valid
        {
            return None;
        }
        let view = self.views.get(eye)?;
        transform_from_pose(&view.pose, world_scale)
    }

    /// Where the head is in the play space at the predicted display time
    pub fn get_head_center(&mut self, world_scale: f32) -> Option<Affine3A> {
        if !self.can_run_frame() || !self.has_frame_timing() {
            return None;
        }

        let result = self.runtime.locate_space(
            self.view_space,
            self.play_space,
            self.frame_timing.predicted_display_time,
        );
        let location = xr_check(self.runtime.as_ref(), self.instance, result, "Locating head")?;

        let valid = is_space_valid(location.flags);
        if valid != self.head_pose_valid {
            if valid {
                info!("[OPENXR] Head pose became valid");
            } else {
                warn!("[OPENXR] Head pose became invalid");
            }
            self.head_pose_valid = valid;
        }
        if !valid {
            return None;
        }
        transform_from_pose(&location.pose, world_scale)
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, ptr::NonNull, rc::Rc};

    use approx::assert_relative_eq;
    use glam::Vec3;
    use openxr::sys::{self, ViewStateFlags};

    use super::super::test_support::{api, running_api};
    use super::*;
    use crate::extensions::CompositionLayerProvider;

    fn frame(api: &mut OpenXrApi) {
        api.process_openxr();
        api.render_openxr(0, 10, false);
        api.render_openxr(1, 11, false);
    }

    fn last_layer_count(mock: &crate::runtime::mock::MockRuntime) -> usize {
        *mock.end_frame_layers.borrow().last().unwrap()
    }

    #[test]
    pub fn test_every_begun_frame_is_ended() {
        let (mock, host, mut api) = running_api(SessionState::FOCUSED);
        host.copies.borrow_mut().clear();

        for _ in 0..3 {
            frame(&mut api);
            assert_eq!(last_layer_count(&mock), 1);
        }
        assert_eq!(mock.count("begin_frame"), 3);
        assert_eq!(mock.count("end_frame"), 3);
        assert_eq!(mock.count("acquire_swapchain_image"), 6);
        assert_eq!(mock.count("release_swapchain_image"), 6);
        assert_eq!(mock.outstanding_images(), 0);
        assert_eq!(mock.count("sync_actions"), 3);

        let copies = host.copies.borrow();
        assert_eq!(copies.len(), 6);
        assert_eq!((copies[0].0, copies[0].2, copies[0].3), (10, 1440, 1600));
        assert_eq!(copies[1].0, 11);
    }

    #[test]
    pub fn test_frame_ended_without_layers_when_not_rendering() {
        let (mock, host, mut api) = running_api(SessionState::FOCUSED);
        host.copies.borrow_mut().clear();
        mock.should_render.set(false);

        frame(&mut api);
        assert_eq!(mock.count("begin_frame"), 1);
        assert_eq!(mock.count("end_frame"), 1);
        assert_eq!(last_layer_count(&mock), 0);
        assert_eq!(mock.count("acquire_swapchain_image"), 0);
        assert!(host.copies.borrow().is_empty());
    }

    #[test]
    pub fn test_frame_ended_without_layers_when_views_are_invalid() {
        let (mock, _, mut api) = running_api(SessionState::FOCUSED);
        mock.view_flags.set(ViewStateFlags::ORIENTATION_VALID);

        frame(&mut api);
        assert_eq!(mock.count("end_frame"), 1);
        assert_eq!(last_layer_count(&mock), 0);
        assert_eq!(mock.count("acquire_swapchain_image"), 0);
        assert!(api.get_view_transform(0, 1.).is_none());

        mock.view_flags
            .set(ViewStateFlags::ORIENTATION_VALID | ViewStateFlags::POSITION_VALID);
        frame(&mut api);
        assert_eq!(last_layer_count(&mock), 1);
    }

    #[test]
    pub fn test_frame_ended_without_layers_when_locate_fails() {
        let (mock, host, mut api) = running_api(SessionState::FOCUSED);
        host.copies.borrow_mut().clear();
        mock.fail("locate_views");

        frame(&mut api);
        assert!(host.copies.borrow().is_empty());
        assert_eq!(mock.count("acquire_swapchain_image"), 0);
        assert_eq!(mock.count("begin_frame"), 1);
        assert_eq!(mock.count("end_frame"), 1);
        assert_eq!(last_layer_count(&mock), 0);
        assert!(api.get_view_transform(0, 1.).is_none());

        mock.succeed("locate_views");
        frame(&mut api);
        assert_eq!(last_layer_count(&mock), 1);
        assert!(api.get_view_transform(0, 1.).is_some());
    }

    #[test]
    pub fn test_timed_out_image_is_kept_until_ready() {
        let (mock, host, mut api) = running_api(SessionState::FOCUSED);
        host.copies.borrow_mut().clear();
        mock.wait_timeouts.set(3);

        frame(&mut api);
        assert_eq!(host.copies.borrow().len(), 1);
        assert_eq!(host.copies.borrow()[0].0, 11);
        assert_eq!(mock.count("release_swapchain_image"), 1);
        assert_eq!(mock.outstanding_images(), 1);
        assert_eq!(mock.count("end_frame"), 1);
        assert_eq!(last_layer_count(&mock), 0);

        // The left eye finishes its wait on the image it already holds
        frame(&mut api);
        assert_eq!(mock.count("acquire_swapchain_image"), 3);
        assert_eq!(mock.count("release_swapchain_image"), 3);
        assert_eq!(mock.outstanding_images(), 0);
        assert_eq!(last_layer_count(&mock), 1);
    }

    #[test]
    pub fn test_external_textures_are_only_released() {
        let (mock, host, mut api) = running_api(SessionState::FOCUSED);
        host.copies.borrow_mut().clear();

        api.process_openxr();
        let left = api.get_external_texture_for_eye(0).unwrap();
        assert_eq!(api.get_external_texture_for_eye(0), Some(left));
        assert_eq!(left, api.swapchains()[0].images()[1]);
        api.render_openxr(0, 0, true);

        let right = api.get_external_texture_for_eye(1).unwrap();
        assert_ne!(left, right);
        api.render_openxr(1, 0, true);

        assert_eq!(mock.count("acquire_swapchain_image"), 2);
        assert_eq!(mock.count("release_swapchain_image"), 2);
        assert_eq!(mock.outstanding_images(), 0);
        assert!(host.copies.borrow().is_empty());
        assert_eq!(last_layer_count(&mock), 1);
    }

    #[test]
    pub fn test_external_textures_released_when_not_rendering() {
        let (mock, _, mut api) = running_api(SessionState::FOCUSED);
        mock.should_render.set(false);

        api.process_openxr();
        assert!(api.get_external_texture_for_eye(0).is_some());
        assert!(api.get_external_texture_for_eye(1).is_some());
        api.render_openxr(0, 0, true);
        api.render_openxr(1, 0, true);

        assert_eq!(mock.count("acquire_swapchain_image"), 2);
        assert_eq!(mock.count("release_swapchain_image"), 2);
        assert_eq!(last_layer_count(&mock), 0);
    }

    #[test]
    pub fn test_nothing_happens_once_stopping() {
        let (mock, _, mut api) = running_api(SessionState::FOCUSED);
        mock.push_state(SessionState::STOPPING);
        api.process_openxr();
        assert_eq!(mock.frame_calls(), 0);

        mock.clear_calls();
        for _ in 0..2 {
            api.process_openxr();
            assert!(api.get_external_texture_for_eye(0).is_none());
            api.render_openxr(0, 1, false);
            api.render_openxr(1, 2, true);
        }
        assert_eq!(mock.frame_calls(), 0);
        assert!(api.get_view_transform(0, 1.).is_none());
        assert!(api.get_head_center(1.).is_none());
        assert_eq!(
            api.fill_projection_matrix(0, 0.1, 100.),
            fallback_projection(FALLBACK_FOV_DEGREES, 1., 0.1, 100.)
        );
        assert_eq!(mock.count("locate_space"), 0);

        // Exiting doesn't wake anything up either
        mock.push_state(SessionState::EXITING);
        api.process_openxr();
        frame(&mut api);
        assert_eq!(mock.frame_calls(), 0);
    }

    #[test]
    pub fn test_actions_only_synced_while_focused() {
        let (mock, host, mut api) = running_api(SessionState::VISIBLE);
        frame(&mut api);
        frame(&mut api);
        assert_eq!(mock.count("sync_actions"), 0);
        assert!(host.added_hands().is_empty());

        mock.push_state(SessionState::FOCUSED);
        frame(&mut api);
        assert_eq!(mock.count("sync_actions"), 1);
        assert_eq!(host.added_hands(), vec![1, 2]);
    }

    #[test]
    pub fn test_skipped_render_still_ends_the_frame() {
        let (mock, _, mut api) = running_api(SessionState::FOCUSED);
        api.process_openxr();
        api.process_openxr();
        assert_eq!(mock.count("begin_frame"), 2);
        assert_eq!(mock.count("end_frame"), 1);
        assert_eq!(last_layer_count(&mock), 0);

        api.render_openxr(0, 1, false);
        api.render_openxr(1, 2, false);
        assert_eq!(mock.count("end_frame"), 2);
        assert_eq!(last_layer_count(&mock), 1);
    }

    struct TestProvider {
        layer: Option<*const sys::CompositionLayerBaseHeader>,
    }

    impl CompositionLayerProvider for TestProvider {
        fn composition_layer(&self) -> Option<*const sys::CompositionLayerBaseHeader> {
            self.layer
        }
    }

    #[test]
    pub fn test_provider_layers_are_submitted() {
        let (mock, _, mut api) = running_api(SessionState::FOCUSED);
        let provider = Rc::new(RefCell::new(TestProvider {
            layer: Some(NonNull::dangling().as_ptr()),
        }));
        let registered: Rc<RefCell<dyn CompositionLayerProvider>> = provider.clone();
        api.register_composition_layer_provider(registered.clone());
        api.register_composition_layer_provider(registered.clone());

        frame(&mut api);
        assert_eq!(last_layer_count(&mock), 2);

        provider.borrow_mut().layer = None;
        frame(&mut api);
        assert_eq!(last_layer_count(&mock), 1);

        provider.borrow_mut().layer = Some(NonNull::dangling().as_ptr());
        api.unregister_composition_layer_provider(&registered);
        frame(&mut api);
        assert_eq!(last_layer_count(&mock), 1);
    }

    #[test]
    pub fn test_view_transforms() {
        let (_, _, mut api) = api();
        assert!(api.initialize());
        assert!(api.get_view_transform(0, 1.).is_none());

        let (_, _, api) = running_api(SessionState::FOCUSED);
        let left = api.get_view_transform(0, 2.).unwrap();
        let right = api.get_view_transform(1, 2.).unwrap();
        assert_relative_eq!(Vec3::from(left.translation), Vec3::new(-0.064, 3.2, 0.));
        assert_relative_eq!(Vec3::from(right.translation), Vec3::new(0.064, 3.2, 0.));
        assert!(api.get_view_transform(2, 1.).is_none());
    }

    #[test]
    pub fn test_head_center() {
        let (mock, _, mut api) = running_api(SessionState::FOCUSED);
        let head = api.get_head_center(1.5).unwrap();
        assert_relative_eq!(head.translation.y, 2.4, epsilon = 1e-6);
        assert_eq!(mock.count("locate_space"), 1);
    }

    #[test]
    pub fn test_projection_matrix() {
        let (mock, _, mut api) = api();
        assert_eq!(
            api.fill_projection_matrix(0, 0.05, 100.),
            fallback_projection(FALLBACK_FOV_DEGREES, 1., 0.05, 100.)
        );
        assert_eq!(mock.calls().len(), 0);

        let (mock, _, mut api) = running_api(SessionState::FOCUSED);
        let m = api.fill_projection_matrix(1, 0.1, 0.1);
        assert_eq!(mock.count("locate_views"), 1);
        assert_relative_eq!(m[0], 1., epsilon = 1e-6);
        assert_relative_eq!(m[5], 1., epsilon = 1e-6);
        assert_eq!(m[10], -1.);
        assert_relative_eq!(m[14], -0.2);
    }

    #[test]
    pub fn test_next_frame_time() {
        let (_, _, mut api) = running_api(SessionState::FOCUSED);
        let current = api.get_predicted_display_time().as_nanos();
        assert_eq!(api.get_next_frame_time().as_nanos(), current + 11_111_111);

        frame(&mut api);
        assert_eq!(api.get_predicted_display_time().as_nanos(), current + 11_111_111);
    }
}
