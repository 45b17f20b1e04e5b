//! Tracked-body model, one [`SkeletonSample`] per body per sensor tick.
//!
//! Enumerations serialize as their numeric discriminants so a session dump
//! stays readable by tools written against the device SDK's numbering.

use serde::{Deserialize, Serialize};

use crate::Timestamp;

pub const JOINT_COUNT: usize = 25;
pub const ACTIVITY_COUNT: usize = 5;

/// Body-index mask value for pixels that belong to a tracked subject.
pub const FOREGROUND: u8 = 0xFF;
/// Body-index mask value for pixels that belong to no one.
pub const BACKGROUND: u8 = 0x00;

// Declares a fieldless enum with explicit discriminants and a u8 wire form.
macro_rules! numeric_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($(#[$vmeta:meta])* $variant:ident = $value:expr),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
        #[serde(into = "u8", try_from = "u8")]
        pub enum $name {
            $($(#[$vmeta])* $variant = $value),+
        }

        impl From<$name> for u8 {
            fn from(v: $name) -> u8 {
                v as u8
            }
        }

        impl TryFrom<u8> for $name {
            type Error = String;

            fn try_from(raw: u8) -> Result<Self, Self::Error> {
                match raw {
                    $(x if x == $value => Ok($name::$variant),)+
                    other => Err(format!("{} has no variant {}", stringify!($name), other)),
                }
            }
        }
    };
}

numeric_enum! {
    /// Joint indices, in device order.
    pub enum JointType {
        #[default]
        SpineBase = 0,
        SpineMid = 1,
        Neck = 2,
        Head = 3,
        ShoulderLeft = 4,
        ElbowLeft = 5,
        WristLeft = 6,
        HandLeft = 7,
        ShoulderRight = 8,
        ElbowRight = 9,
        WristRight = 10,
        HandRight = 11,
        HipLeft = 12,
        KneeLeft = 13,
        AnkleLeft = 14,
        FootLeft = 15,
        HipRight = 16,
        KneeRight = 17,
        AnkleRight = 18,
        FootRight = 19,
        SpineShoulder = 20,
        HandTipLeft = 21,
        ThumbLeft = 22,
        HandTipRight = 23,
        ThumbRight = 24,
    }
}

impl JointType {
    pub const ALL: [JointType; JOINT_COUNT] = [
        JointType::SpineBase,
        JointType::SpineMid,
        JointType::Neck,
        JointType::Head,
        JointType::ShoulderLeft,
        JointType::ElbowLeft,
        JointType::WristLeft,
        JointType::HandLeft,
        JointType::ShoulderRight,
        JointType::ElbowRight,
        JointType::WristRight,
        JointType::HandRight,
        JointType::HipLeft,
        JointType::KneeLeft,
        JointType::AnkleLeft,
        JointType::FootLeft,
        JointType::HipRight,
        JointType::KneeRight,
        JointType::AnkleRight,
        JointType::FootRight,
        JointType::SpineShoulder,
        JointType::HandTipLeft,
        JointType::ThumbLeft,
        JointType::HandTipRight,
        JointType::ThumbRight,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

numeric_enum! {
    pub enum HandState {
        #[default]
        Unknown = 0,
        NotTracked = 1,
        Open = 2,
        Closed = 3,
        Lasso = 4,
    }
}

numeric_enum! {
    pub enum TrackingConfidence {
        #[default]
        Low = 0,
        High = 1,
    }
}

numeric_enum! {
    pub enum TrackingState {
        #[default]
        NotTracked = 0,
        Inferred = 1,
        Tracked = 2,
    }
}

impl TrackingState {
    /// Discrete confidence stored per joint and for lean tracking.
    pub fn confidence(self) -> f32 {
        match self {
            TrackingState::NotTracked => 0.0,
            TrackingState::Inferred => 0.5,
            TrackingState::Tracked => 1.0,
        }
    }
}

numeric_enum! {
    pub enum DetectionResult {
        #[default]
        Unknown = 0,
        No = 1,
        Maybe = 2,
        Yes = 3,
    }
}

numeric_enum! {
    /// Slots of [`SkeletonSample::activities`].
    pub enum Activity {
        #[default]
        EyeLeftClosed = 0,
        EyeRightClosed = 1,
        MouthOpen = 2,
        MouthMoved = 3,
        LookingAway = 4,
    }
}

/// Bitmask of frame borders the body is clipped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameEdges(pub u32);

impl FrameEdges {
    pub const NONE: FrameEdges = FrameEdges(0);
    pub const RIGHT: FrameEdges = FrameEdges(0x1);
    pub const LEFT: FrameEdges = FrameEdges(0x2);
    pub const TOP: FrameEdges = FrameEdges(0x4);
    pub const BOTTOM: FrameEdges = FrameEdges(0x8);

    pub fn contains(self, other: FrameEdges) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: FrameEdges) -> FrameEdges {
        FrameEdges(self.0 | other.0)
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

/// One tracked body at one instant.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkeletonSample {
    /// Unique per tracked person for as long as the sensor keeps the lock.
    pub tracking_id: u64,
    /// Camera-space joint positions in meters.
    pub joint_positions: [[f32; 3]; JOINT_COUNT],
    /// 0.0 not tracked, 0.5 inferred, 1.0 tracked.
    pub joint_confidences: [f32; JOINT_COUNT],
    /// Joint orientations as (x, y, z, w) quaternions.
    pub joint_orientations: [[f32; 4]; JOINT_COUNT],
    pub hand_left_state: HandState,
    pub hand_left_confidence: TrackingConfidence,
    pub hand_right_state: HandState,
    pub hand_right_confidence: TrackingConfidence,
    pub activities: [DetectionResult; ACTIVITY_COUNT],
    pub lean_left_right: f32,
    pub lean_forward_back: f32,
    pub lean_confidence: f32,
    pub clipped_edges: FrameEdges,
    pub timestamp: Timestamp,
}

impl SkeletonSample {
    pub fn new(tracking_id: u64, timestamp: Timestamp) -> Self {
        Self {
            tracking_id,
            timestamp,
            ..Default::default()
        }
    }

    pub fn set_joint(&mut self, joint: JointType, position: [f32; 3], state: TrackingState) {
        let j = joint.index();
        self.joint_positions[j] = position;
        self.joint_confidences[j] = state.confidence();
    }

    pub fn joint(&self, joint: JointType) -> [f32; 3] {
        self.joint_positions[joint.index()]
    }

    pub fn activity(&self, activity: Activity) -> DetectionResult {
        self.activities[activity as usize]
    }

    pub fn set_lean(&mut self, left_right: f32, forward_back: f32, state: TrackingState) {
        self.lean_left_right = left_right;
        self.lean_forward_back = forward_back;
        self.lean_confidence = state.confidence();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joint_order_matches_discriminants() {
        for (i, joint) in JointType::ALL.iter().enumerate() {
            assert_eq!(joint.index(), i);
        }
    }

    #[test]
    fn tracking_state_confidences() {
        let mut s = SkeletonSample::new(7, 100);
        s.set_joint(JointType::Head, [0.1, 0.2, 2.0], TrackingState::Tracked);
        s.set_joint(JointType::HandLeft, [0.0, 0.0, 0.0], TrackingState::Inferred);
        assert_eq!(s.joint_confidences[JointType::Head.index()], 1.0);
        assert_eq!(s.joint_confidences[JointType::HandLeft.index()], 0.5);
        assert_eq!(s.joint_confidences[JointType::FootRight.index()], 0.0);
        assert_eq!(s.joint(JointType::Head), [0.1, 0.2, 2.0]);
    }

    #[test]
    fn frame_edges_mask() {
        let edges = FrameEdges::LEFT.union(FrameEdges::BOTTOM);
        assert!(edges.contains(FrameEdges::LEFT));
        assert!(edges.contains(FrameEdges::BOTTOM));
        assert!(!edges.contains(FrameEdges::TOP));
        assert_eq!(edges.bits(), 0xA);
    }

    #[test]
    fn enums_serialize_as_numbers() {
        let mut s = SkeletonSample::new(1, 42);
        s.hand_left_state = HandState::Lasso;
        s.activities[Activity::MouthOpen as usize] = DetectionResult::Yes;
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["handLeftState"], 4);
        assert_eq!(json["activities"][2], 3);
        assert_eq!(json["trackingId"], 1);

        let back: SkeletonSample = serde_json::from_value(json).unwrap();
        assert_eq!(back.activity(Activity::MouthOpen), DetectionResult::Yes);
    }

    #[test]
    fn unknown_discriminant_is_rejected() {
        assert!(HandState::try_from(9).is_err());
        assert_eq!(TrackingState::try_from(2), Ok(TrackingState::Tracked));
    }
}
