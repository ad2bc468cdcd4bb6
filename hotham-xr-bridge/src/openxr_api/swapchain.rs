use std::ffi::c_void;

use log::{error, warn};
use openxr::sys::{self, Duration, Session, SwapchainUsageFlags};

use crate::{
    runtime::{RecommendedView, SwapchainDesc, XrResult, XrRuntime},
    util::GraphicsApi,
};

const GL_RGBA8: i64 = 0x8058;
const GL_SRGB8_ALPHA8: i64 = 0x8C43;
const VK_FORMAT_R8G8B8A8_UNORM: i64 = 37;
const VK_FORMAT_R8G8B8A8_SRGB: i64 = 43;

/// How long to wait for the compositor to hand an image back
const IMAGE_WAIT_TIMEOUT_NANOS: i64 = 1_000_000_000;

/// Timed out waits in a row before giving up on an image for this frame
const IMAGE_WAIT_ATTEMPTS: u32 = 3;

/// Pick a colour format for the eye swapchains: sRGB unless the host keeps its 3D output linear,
/// then plain RGBA8, then whatever the runtime lists first.
pub fn select_swapchain_format(graphics_api: GraphicsApi, available: &[i64], keep_3d_linear: bool) -> Option<i64> {
    let (srgb, linear) = match graphics_api {
        GraphicsApi::Vulkan => (VK_FORMAT_R8G8B8A8_SRGB, VK_FORMAT_R8G8B8A8_UNORM),
        _ => (GL_SRGB8_ALPHA8, GL_RGBA8),
    };

    let preferred: &[i64] = if keep_3d_linear {
        &[linear]
    } else {
        &[srgb, linear]
    };
    preferred
        .iter()
        .find(|f| available.contains(f))
        .or_else(|| available.first())
        .copied()
}

/// Describe an eye swapchain for a view, scaled by `multiplier`
pub fn eye_swapchain_desc(view: &RecommendedView, format: i64, multiplier: f32) -> SwapchainDesc {
    SwapchainDesc {
        usage_flags: SwapchainUsageFlags::SAMPLED | SwapchainUsageFlags::COLOR_ATTACHMENT,
        format,
        sample_count: view.recommended_sample_count.max(1),
        width: (view.recommended_width as f32 * multiplier) as u32,
        height: (view.recommended_height as f32 * multiplier) as u32,
        face_count: 1,
        array_size: 1,
        mip_count: 1,
    }
}

/// One eye's ring of images.
///
/// At most one image is acquired at a time. An acquired image can only be rendered to or released
/// once a wait on it has succeeded; a wait that times out is picked up again by the next
/// [`Swapchain::acquire`] or [`Swapchain::release`].
#[derive(Debug)]
pub struct Swapchain {
    handle: sys::Swapchain,
    width: u32,
    height: u32,
    images: Vec<u64>,
    acquired_index: Option<u32>,
    image_ready: bool,
}

impl Swapchain {
    pub(crate) fn create(
        runtime: &dyn XrRuntime,
        session: Session,
        desc: &SwapchainDesc,
        next: *const c_void,
    ) -> XrResult<Self> {
        let handle = runtime.create_swapchain(session, desc, next)?;
        let images = match runtime.enumerate_swapchain_images(handle) {
            Ok(images) => images,
            Err(e) => {
                let _ = runtime.destroy_swapchain(handle);
                return Err(e);
            }
        };

        Ok(Self {
            handle,
            width: desc.width,
            height: desc.height,
            images,
            acquired_index: None,
            image_ready: false,
        })
    }

    /// The raw swapchain handle
    pub fn handle(&self) -> sys::Swapchain {
        self.handle
    }

    /// Width of each image
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height of each image
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Graphics API handles of every image in the ring
    pub fn images(&self) -> &[u64] {
        &self.images
    }

    /// Is an image currently acquired?
    pub fn is_acquired(&self) -> bool {
        self.acquired_index.is_some()
    }

    /// The acquired image, once it is ready to be rendered to
    pub fn current_image(&self) -> Option<u64> {
        if !self.image_ready {
            return None;
        }
        self.images.get(self.acquired_index? as usize).copied()
    }

    /// Acquire the next image and wait until it can be rendered to.
    ///
    /// If an earlier wait timed out the same image is waited on again rather than acquiring another.
    /// Running out of attempts returns `TIMEOUT_EXPIRED` with the image still acquired.
    pub(crate) fn acquire(&mut self, runtime: &dyn XrRuntime) -> XrResult<u64> {
        if self.image_ready {
            error!("[OPENXR] Swapchain image acquired twice without being released");
            return Err(sys::Result::ERROR_CALL_ORDER_INVALID);
        }

        if self.acquired_index.is_none() {
            self.acquired_index = Some(runtime.acquire_swapchain_image(self.handle)?);
        }
        self.wait(runtime)?;

        self.current_image().ok_or(sys::Result::ERROR_RUNTIME_FAILURE)
    }

    fn wait(&mut self, runtime: &dyn XrRuntime) -> XrResult<()> {
        let timeout = Duration::from_nanos(IMAGE_WAIT_TIMEOUT_NANOS);
        for _ in 0..IMAGE_WAIT_ATTEMPTS {
            if runtime.wait_swapchain_image(self.handle, timeout)? {
                self.image_ready = true;
                return Ok(());
            }
            warn!("[OPENXR] Timed out waiting for swapchain image");
        }
        Err(sys::Result::TIMEOUT_EXPIRED)
    }

    /// Hand the acquired image back to the compositor.
    ///
    /// An image whose wait never succeeded is waited on first, and stays acquired if that fails.
    pub(crate) fn release(&mut self, runtime: &dyn XrRuntime) -> XrResult<()> {
        if self.acquired_index.is_none() {
            error!("[OPENXR] Swapchain image released without being acquired");
            return Err(sys::Result::ERROR_CALL_ORDER_INVALID);
        }
        if !self.image_ready {
            self.wait(runtime)?;
        }

        self.acquired_index = None;
        self.image_ready = false;
        runtime.release_swapchain_image(self.handle)
    }

    pub(crate) fn destroy(&mut self, runtime: &dyn XrRuntime) {
        if self.handle == sys::Swapchain::NULL {
            return;
        }
        if let Err(e) = runtime.destroy_swapchain(self.handle) {
            warn!("[OPENXR] Failed to destroy swapchain: {e}");
        }
        self.handle = sys::Swapchain::NULL;
        self.images.clear();
        self.acquired_index = None;
        self.image_ready = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::mock::MockRuntime;

    #[test]
    pub fn test_format_selection() {
        let available = [GL_RGBA8, GL_SRGB8_ALPHA8];
        assert_eq!(
            select_swapchain_format(GraphicsApi::OpenGL, &available, false),
            Some(GL_SRGB8_ALPHA8)
        );
        assert_eq!(
            select_swapchain_format(GraphicsApi::OpenGL, &available, true),
            Some(GL_RGBA8)
        );
        assert_eq!(
            select_swapchain_format(GraphicsApi::Vulkan, &[50, VK_FORMAT_R8G8B8A8_UNORM], false),
            Some(VK_FORMAT_R8G8B8A8_UNORM)
        );
        assert_eq!(select_swapchain_format(GraphicsApi::OpenGL, &[1234], false), Some(1234));
        assert_eq!(select_swapchain_format(GraphicsApi::OpenGL, &[], false), None);
    }

    #[test]
    pub fn test_desc_scaled_by_multiplier() {
        let view = RecommendedView {
            recommended_width: 1000,
            recommended_height: 800,
            recommended_sample_count: 0,
            ..Default::default()
        };
        let desc = eye_swapchain_desc(&view, GL_RGBA8, 1.5);
        assert_eq!((desc.width, desc.height), (1500, 1200));
        assert_eq!(desc.sample_count, 1);
        assert!(desc.usage_flags.contains(SwapchainUsageFlags::COLOR_ATTACHMENT));
    }

    fn swapchain(runtime: &MockRuntime) -> Swapchain {
        let view = RecommendedView {
            recommended_width: 100,
            recommended_height: 100,
            ..Default::default()
        };
        Swapchain::create(
            runtime,
            Session::from_raw(3),
            &eye_swapchain_desc(&view, GL_RGBA8, 1.),
            std::ptr::null(),
        )
        .unwrap()
    }

    #[test]
    pub fn test_acquire_release_discipline() {
        let runtime = MockRuntime::default();
        let mut swapchain = swapchain(&runtime);
        assert_eq!(swapchain.images().len(), 3);
        assert_eq!(swapchain.current_image(), None);

        // Nothing to release yet, and the runtime never hears about it
        assert!(swapchain.release(&runtime).is_err());
        assert_eq!(runtime.count("release_swapchain_image"), 0);

        let image = swapchain.acquire(&runtime).unwrap();
        assert_eq!(Some(image), swapchain.current_image());
        assert!(swapchain.acquire(&runtime).is_err());
        assert_eq!(runtime.count("acquire_swapchain_image"), 1);

        swapchain.release(&runtime).unwrap();
        assert_eq!(runtime.outstanding_images(), 0);

        swapchain.destroy(&runtime);
        swapchain.destroy(&runtime);
        assert_eq!(runtime.count("destroy_swapchain"), 1);
    }

    #[test]
    pub fn test_timed_out_image_is_never_released_early() {
        let runtime = MockRuntime::default();
        let mut swapchain = swapchain(&runtime);

        runtime.wait_timeouts.set(2 * IMAGE_WAIT_ATTEMPTS);
        assert_eq!(swapchain.acquire(&runtime), Err(sys::Result::TIMEOUT_EXPIRED));
        assert!(swapchain.is_acquired());
        assert_eq!(swapchain.current_image(), None);
        assert_eq!(runtime.count("wait_swapchain_image"), IMAGE_WAIT_ATTEMPTS as usize);

        // Still not ready, so it stays acquired
        assert_eq!(swapchain.release(&runtime), Err(sys::Result::TIMEOUT_EXPIRED));
        assert!(swapchain.is_acquired());
        assert_eq!(runtime.count("release_swapchain_image"), 0);
        assert_eq!(runtime.outstanding_images(), 1);

        swapchain.release(&runtime).unwrap();
        assert!(!swapchain.is_acquired());
        assert_eq!(runtime.count("release_swapchain_image"), 1);
        assert_eq!(runtime.outstanding_images(), 0);
    }

    #[test]
    pub fn test_acquire_picks_up_a_timed_out_wait() {
        let runtime = MockRuntime::default();
        let mut swapchain = swapchain(&runtime);

        runtime.wait_timeouts.set(IMAGE_WAIT_ATTEMPTS);
        assert!(swapchain.acquire(&runtime).is_err());

        let image = swapchain.acquire(&runtime).unwrap();
        assert_eq!(swapchain.current_image(), Some(image));
        assert_eq!(runtime.count("acquire_swapchain_image"), 1);
        swapchain.release(&runtime).unwrap();
        assert_eq!(runtime.outstanding_images(), 0);
    }
}
