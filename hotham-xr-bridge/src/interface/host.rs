use glam::Affine3A;

/// A region of the host's window, in pixels
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScreenRect {
    /// Left edge
    pub x: f32,
    /// Top edge
    pub y: f32,
    /// Width
    pub width: f32,
    /// Height
    pub height: f32,
}

impl ScreenRect {
    /// Construct a rect
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// A rect with no area means "don't mirror to the window"
    pub fn has_no_area(&self) -> bool {
        self.width <= 0. || self.height <= 0.
    }
}

/// Everything the bridge needs from the host engine.
///
/// Controller ids are the host's; the bridge only stores and passes them back. All methods are
/// called from the engine's render thread.
pub trait EngineHost {
    /// Metres per world unit
    fn world_scale(&self) -> f32 {
        1.0
    }

    /// The transform of the XR origin in the world
    fn reference_frame(&self) -> Affine3A {
        Affine3A::IDENTITY
    }

    /// Register a tracked controller. `hand` is 1 for left, 2 for right and 0 for anything else.
    fn add_controller(&self, name: &str, hand: u32, tracks_orientation: bool, tracks_position: bool) -> i32;

    /// Forget a controller registered with [`Self::add_controller`]
    fn remove_controller(&self, controller_id: i32);

    /// Move a controller
    fn set_controller_transform(
        &self,
        controller_id: i32,
        transform: Affine3A,
        tracks_orientation: bool,
        tracks_position: bool,
    );

    /// Update one of a controller's axes
    fn set_controller_axis(&self, controller_id: i32, axis: u32, value: f32, can_be_negative: bool);

    /// Update one of a controller's buttons
    fn set_controller_button(&self, controller_id: i32, button: u32, is_pressed: bool);

    /// How strongly the game wants the controller to vibrate, 0 for not at all
    fn get_controller_rumble(&self, controller_id: i32) -> f32;

    /// Copy the host's texture `source` into the swapchain image `dest_image`
    fn copy_texture(&self, source: u32, dest_image: u64, width: u32, height: u32);

    /// Draw the render target of `eye` into `rect` of the host's window
    fn blit_to_screen(&self, eye: usize, render_target: u32, rect: ScreenRect);

    /// Let the host know whether its clear colour has to be transparent, eg. for passthrough
    fn set_transparent_background(&self, _is_transparent: bool) {}
}

#[cfg(test)]
pub(crate) mod test_host {
    use std::{
        cell::{Cell, RefCell},
        collections::HashMap,
    };

    use super::*;

    /// Remembers everything the bridge told it
    pub(crate) struct RecordingHost {
        pub world_scale: Cell<f32>,
        pub rumble: Cell<f32>,
        pub removed: RefCell<Vec<i32>>,
        pub copies: RefCell<Vec<(u32, u64, u32, u32)>>,
        pub blits: RefCell<Vec<(usize, u32, ScreenRect)>>,
        pub transparent_background: Cell<bool>,
        controllers: RefCell<Vec<(i32, u32)>>,
        transforms: RefCell<HashMap<i32, Affine3A>>,
        axes: RefCell<HashMap<(i32, u32), f32>>,
        buttons: RefCell<HashMap<(i32, u32), bool>>,
    }

    impl Default for RecordingHost {
        fn default() -> Self {
            Self {
                world_scale: Cell::new(1.),
                rumble: Cell::new(0.),
                removed: Default::default(),
                copies: Default::default(),
                blits: Default::default(),
                transparent_background: Cell::new(false),
                controllers: Default::default(),
                transforms: Default::default(),
                axes: Default::default(),
                buttons: Default::default(),
            }
        }
    }

    impl RecordingHost {
        pub fn added_hands(&self) -> Vec<u32> {
            self.controllers.borrow().iter().map(|(_, hand)| *hand).collect()
        }

        pub fn transform(&self, controller_id: i32) -> Option<Affine3A> {
            self.transforms.borrow().get(&controller_id).copied()
        }

        pub fn axis(&self, controller_id: i32, axis: u32) -> Option<f32> {
            self.axes.borrow().get(&(controller_id, axis)).copied()
        }

        pub fn button(&self, controller_id: i32, button: u32) -> Option<bool> {
            self.buttons.borrow().get(&(controller_id, button)).copied()
        }
    }

    impl EngineHost for RecordingHost {
        fn world_scale(&self) -> f32 {
            self.world_scale.get()
        }

        fn add_controller(&self, _name: &str, hand: u32, _tracks_orientation: bool, _tracks_position: bool) -> i32 {
            let mut controllers = self.controllers.borrow_mut();
            let controller_id = controllers.len() as i32 + 1;
            controllers.push((controller_id, hand));
            controller_id
        }

        fn remove_controller(&self, controller_id: i32) {
            self.removed.borrow_mut().push(controller_id);
        }

        fn set_controller_transform(&self, controller_id: i32, transform: Affine3A, _: bool, _: bool) {
            self.transforms.borrow_mut().insert(controller_id, transform);
        }

        fn set_controller_axis(&self, controller_id: i32, axis: u32, value: f32, _can_be_negative: bool) {
            self.axes.borrow_mut().insert((controller_id, axis), value);
        }

        fn set_controller_button(&self, controller_id: i32, button: u32, is_pressed: bool) {
            self.buttons.borrow_mut().insert((controller_id, button), is_pressed);
        }

        fn get_controller_rumble(&self, _controller_id: i32) -> f32 {
            self.rumble.get()
        }

        fn copy_texture(&self, source: u32, dest_image: u64, width: u32, height: u32) {
            self.copies.borrow_mut().push((source, dest_image, width, height));
        }

        fn blit_to_screen(&self, eye: usize, render_target: u32, rect: ScreenRect) {
            self.blits.borrow_mut().push((eye, render_target, rect));
        }

        fn set_transparent_background(&self, is_transparent: bool) {
            self.transparent_background.set(is_transparent);
        }
    }
}
