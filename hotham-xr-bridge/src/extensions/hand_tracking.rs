use std::{ffi::c_void, ptr};

use glam::Affine3A;
use log::{debug, info, warn};
use openxr::sys::{
    self, pfn, HandEXT, HandJointLocationEXT, HandJointSetEXT, HandJointVelocityEXT,
    HandJointsMotionRangeEXT, HandTrackerEXT, Posef, SpaceLocationFlags, SpaceVelocityFlags,
    Vector3f,
};

use super::{ExtensionWrapper, RequestedExtensions, RuntimeBinding, SessionContext};
use crate::{
    actions::TrackingConfidence,
    runtime::{cvt, proc_table::proc_table, xr_struct},
    util::transform_from_pose,
};

const HAND_TRACKING: &str = "XR_EXT_hand_tracking";
const HAND_JOINTS_MOTION_RANGE: &str = "XR_EXT_hand_joints_motion_range";

/// Number of joints in `XR_HAND_JOINT_SET_DEFAULT_EXT`
pub const HAND_JOINT_COUNT: usize = 26;

/// Index of the palm joint
pub const PALM_JOINT: usize = 0;

/// Beyond this the runtime is reporting garbage rather than a hand
const MAX_PALM_DISTANCE: f32 = 1e6;

proc_table! {
    pub(crate) struct HandTrackingFunctions {
        create_hand_tracker: pfn::CreateHandTrackerEXT = "xrCreateHandTrackerEXT",
        destroy_hand_tracker: pfn::DestroyHandTrackerEXT = "xrDestroyHandTrackerEXT",
        locate_hand_joints: pfn::LocateHandJointsEXT = "xrLocateHandJointsEXT",
    }
}

const EMPTY_LOCATION: HandJointLocationEXT = HandJointLocationEXT {
    location_flags: SpaceLocationFlags::EMPTY,
    pose: Posef::IDENTITY,
    radius: 0.,
};

const EMPTY_VELOCITY: HandJointVelocityEXT = HandJointVelocityEXT {
    velocity_flags: SpaceVelocityFlags::EMPTY,
    linear_velocity: Vector3f { x: 0., y: 0., z: 0. },
    angular_velocity: Vector3f { x: 0., y: 0., z: 0. },
};

/// Joint data for one hand
#[derive(Debug, Clone)]
pub struct HandTracker {
    /// Runtime handle, `NULL` until the tracker is created
    pub handle: HandTrackerEXT,
    /// Whether the last located frame produced a usable hand
    pub is_active: bool,
    /// Joint poses, indexed by `XrHandJointEXT`
    pub joint_locations: [HandJointLocationEXT; HAND_JOINT_COUNT],
    /// Joint velocities, indexed by `XrHandJointEXT`
    pub joint_velocities: [HandJointVelocityEXT; HAND_JOINT_COUNT],
}

impl Default for HandTracker {
    fn default() -> Self {
        Self {
            handle: HandTrackerEXT::NULL,
            is_active: false,
            joint_locations: [EMPTY_LOCATION; HAND_JOINT_COUNT],
            joint_velocities: [EMPTY_VELOCITY; HAND_JOINT_COUNT],
        }
    }
}

impl HandTracker {
    /// Has the runtime handed us a tracker yet?
    pub fn is_initialised(&self) -> bool {
        self.handle != HandTrackerEXT::NULL
    }

    /// How much to trust the palm
    pub fn confidence(&self) -> TrackingConfidence {
        if !self.is_active {
            return TrackingConfidence::None;
        }
        let flags = self.joint_locations[PALM_JOINT].location_flags;
        if flags.contains(SpaceLocationFlags::POSITION_TRACKED) {
            TrackingConfidence::High
        } else if flags.contains(SpaceLocationFlags::ORIENTATION_VALID) {
            TrackingConfidence::Low
        } else {
            TrackingConfidence::None
        }
    }

    /// Transform of `joint` in play space, if the hand is active and the joint has a pose
    pub fn joint_transform(&self, joint: usize, world_scale: f32) -> Option<Affine3A> {
        if !self.is_active {
            return None;
        }
        let location = self.joint_locations.get(joint)?;
        if !location
            .location_flags
            .contains(SpaceLocationFlags::ORIENTATION_VALID)
        {
            return None;
        }
        transform_from_pose(&location.pose, world_scale)
    }

    fn update_activity(&mut self, runtime_active: bool) {
        let palm_x = self.joint_locations[PALM_JOINT].pose.position.x;
        self.is_active = runtime_active && !palm_x.is_nan() && palm_x.abs() <= MAX_PALM_DISTANCE;
    }
}

/// `XR_EXT_hand_tracking`, with `XR_EXT_hand_joints_motion_range` when available.
///
/// Joints are located for the *next* frame's predicted display time, as they're consumed by the
/// engine a frame after they're fetched.
pub struct HandTrackingExtension {
    requested: RequestedExtensions,
    functions: HandTrackingFunctions,
    binding: RuntimeBinding,
    hand_tracking_supported: bool,
    motion_range: HandJointsMotionRangeEXT,
    hand_trackers: [HandTracker; 2],
}

impl Default for HandTrackingExtension {
    fn default() -> Self {
        Self {
            requested: RequestedExtensions::new(&[HAND_TRACKING, HAND_JOINTS_MOTION_RANGE]),
            functions: Default::default(),
            binding: Default::default(),
            hand_tracking_supported: false,
            motion_range: HandJointsMotionRangeEXT::UNOBSTRUCTED,
            hand_trackers: Default::default(),
        }
    }
}

impl HandTrackingExtension {
    /// Is the extension enabled?
    pub fn is_enabled(&self) -> bool {
        self.requested.is_enabled(HAND_TRACKING)
    }

    /// Enabled, and the system says it can track hands
    pub fn is_supported(&self) -> bool {
        self.is_enabled() && self.hand_tracking_supported
    }

    /// Is `XR_EXT_hand_joints_motion_range` enabled?
    pub fn is_motion_range_enabled(&self) -> bool {
        self.is_enabled() && self.requested.is_enabled(HAND_JOINTS_MOTION_RANGE)
    }

    /// The tracker for `hand` (0 = left, 1 = right)
    pub fn get_hand_tracker(&self, hand: usize) -> Option<&HandTracker> {
        self.hand_trackers.get(hand)
    }

    /// The motion range joints are located with
    pub fn get_motion_range(&self) -> HandJointsMotionRangeEXT {
        self.motion_range
    }

    /// Change the motion range used from the next located frame
    pub fn set_motion_range(&mut self, motion_range: HandJointsMotionRangeEXT) {
        self.motion_range = motion_range;
    }

    fn check_support(&mut self, context: &SessionContext<'_>) {
        let mut properties = xr_struct!(sys::SystemHandTrackingPropertiesEXT {
            supports_hand_tracking: sys::FALSE,
        });
        let result = context.runtime.get_system_properties(
            context.instance,
            context.system_id,
            &mut properties as *mut _ as *mut c_void,
        );
        if self.binding.check(result, "Getting hand tracking properties").is_none() {
            return;
        }

        self.hand_tracking_supported = properties.supports_hand_tracking == sys::TRUE;
        info!(
            "[OPENXR] Hand tracking is {}",
            if self.hand_tracking_supported { "supported" } else { "not supported" }
        );
    }

    fn create_trackers(&mut self, context: &SessionContext<'_>) {
        let Some(create_hand_tracker) = self.functions.create_hand_tracker else {
            return;
        };

        for (index, hand) in [HandEXT::LEFT, HandEXT::RIGHT].into_iter().enumerate() {
            if self.hand_trackers[index].is_initialised() {
                continue;
            }

            let create_info = xr_struct!(sys::HandTrackerCreateInfoEXT {
                hand: hand,
                hand_joint_set: HandJointSetEXT::DEFAULT,
            });
            let mut handle = HandTrackerEXT::NULL;
            let result = cvt(unsafe { create_hand_tracker(context.session, &create_info, &mut handle) });
            if self
                .binding
                .check(result, &format!("Creating the hand tracker for hand {index}"))
                .is_some()
            {
                debug!("[OPENXR] Created hand tracker for hand {index}");
                self.hand_trackers[index].handle = handle;
            }
        }
    }

    fn locate_joints(&mut self, context: &SessionContext<'_>) {
        let Some(locate_hand_joints) = self.functions.locate_hand_joints else {
            return;
        };

        let motion_range_info = xr_struct!(sys::HandJointsMotionRangeInfoEXT {
            hand_joints_motion_range: self.motion_range,
        });
        let next = if self.is_motion_range_enabled() {
            &motion_range_info as *const _ as *const c_void
        } else {
            ptr::null()
        };
        let locate_info = xr_struct!(sys::HandJointsLocateInfoEXT {
            next: next,
            base_space: context.play_space,
            time: context.next_frame_time,
        });

        for (index, tracker) in self.hand_trackers.iter_mut().enumerate() {
            if !tracker.is_initialised() {
                continue;
            }

            let mut velocities = xr_struct!(sys::HandJointVelocitiesEXT {
                joint_count: HAND_JOINT_COUNT as u32,
                joint_velocities: tracker.joint_velocities.as_mut_ptr(),
            });
            let mut locations = xr_struct!(sys::HandJointLocationsEXT {
                next: &mut velocities as *mut _ as *mut c_void,
                is_active: sys::FALSE,
                joint_count: HAND_JOINT_COUNT as u32,
                joint_locations: tracker.joint_locations.as_mut_ptr(),
            });

            let result =
                cvt(unsafe { locate_hand_joints(tracker.handle, &locate_info, &mut locations) });
            if self
                .binding
                .check(result, &format!("Locating the joints of hand {index}"))
                .is_none()
            {
                tracker.is_active = false;
                continue;
            }

            tracker.update_activity(locations.is_active == sys::TRUE);
        }
    }

    fn destroy_trackers(&mut self) {
        let destroy_hand_tracker = self.functions.destroy_hand_tracker;
        for (index, tracker) in self.hand_trackers.iter_mut().enumerate() {
            if !tracker.is_initialised() {
                continue;
            }
            if let Some(destroy_hand_tracker) = destroy_hand_tracker {
                let result = cvt(unsafe { destroy_hand_tracker(tracker.handle) });
                self.binding
                    .check(result, &format!("Destroying the hand tracker for hand {index}"));
            }
            *tracker = HandTracker::default();
        }
    }
}

impl ExtensionWrapper for HandTrackingExtension {
    fn name(&self) -> &'static str {
        "hand_tracking"
    }

    fn requested_extensions(&self) -> &RequestedExtensions {
        &self.requested
    }

    fn requested_extensions_mut(&mut self) -> &mut RequestedExtensions {
        &mut self.requested
    }

    fn on_instance_initialized(&mut self, context: &SessionContext<'_>) {
        self.binding.bind_instance(context);
        if !self.is_enabled() {
            return;
        }

        let (functions, missing) =
            HandTrackingFunctions::load(context.runtime.as_ref(), context.instance);
        if !missing.is_empty() {
            warn!("[OPENXR] Failed to initialise hand tracking extension, missing {missing:?}");
            self.requested.disable(HAND_TRACKING);
            self.requested.disable(HAND_JOINTS_MOTION_RANGE);
            return;
        }
        self.functions = functions;
    }

    fn on_session_initialized(&mut self, context: &SessionContext<'_>) {
        self.binding.bind_session(context);
    }

    fn on_state_ready(&mut self, context: &SessionContext<'_>) {
        if self.is_enabled() {
            self.check_support(context);
        }
    }

    fn on_process_openxr(&mut self, context: &SessionContext<'_>) {
        if !self.is_supported() {
            return;
        }
        self.create_trackers(context);
        self.locate_joints(context);
    }

    fn on_state_stopping(&mut self, _context: &SessionContext<'_>) {
        self.destroy_trackers();
    }

    fn on_session_destroyed(&mut self, _context: &SessionContext<'_>) {
        self.destroy_trackers();
        self.binding.unbind_session();
    }

    fn on_instance_destroyed(&mut self) {
        self.requested.clear();
        self.functions = Default::default();
        self.binding.unbind();
        self.hand_tracking_supported = false;
    }
}
