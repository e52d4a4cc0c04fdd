//! Core data types shared across the whole-body control runtime.
//!
//! These types form the contract between the robot model, the scenes and the
//! solvers: joint-space state and commands, SE(3) rigid-body state, contact
//! bookkeeping and wrenches. All vector-valued quantities use the canonical
//! row ordering `(linear_xyz, angular_xyz)`.

use nalgebra::{Isometry3, Vector3, Vector6};
use serde::{Deserialize, Serialize};

use crate::error::StateError;
use crate::time::TimeStamp;

/// Unit-quaternion tolerance for pose validity checks.
const UNIT_QUATERNION_TOL: f64 = 1e-6;

// ---------------------------------------------------------------------------
// JointState
// ---------------------------------------------------------------------------

/// State of a single joint.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct JointStateElement {
    /// Position (rad or m).
    pub position: f64,
    /// Velocity (rad/s or m/s).
    pub speed: f64,
    /// Acceleration (rad/s^2 or m/s^2).
    pub acceleration: f64,
    /// Effort (Nm or N).
    pub effort: f64,
}

impl JointStateElement {
    fn is_finite(&self) -> bool {
        self.position.is_finite()
            && self.speed.is_finite()
            && self.acceleration.is_finite()
            && self.effort.is_finite()
    }
}

/// Ordered, named joint state vector.
///
/// `names` and `elements` are parallel arrays; the name-to-index mapping is
/// bijective. Timestamps must be monotone non-decreasing across successive
/// model updates; the null timestamp marks "never updated".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JointState {
    pub names: Vec<String>,
    pub elements: Vec<JointStateElement>,
    pub time: TimeStamp,
}

impl JointState {
    /// Create a zeroed joint state for the given names.
    pub fn zeros(names: &[String], time: TimeStamp) -> Self {
        Self {
            names: names.to_vec(),
            elements: vec![JointStateElement::default(); names.len()],
            time,
        }
    }

    /// Number of joints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the state holds no joints.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Index of a joint by name.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// State of a joint by name.
    #[must_use]
    pub fn element(&self, name: &str) -> Option<&JointStateElement> {
        self.index_of(name).map(|i| &self.elements[i])
    }

    /// Mutable state of a joint by name.
    #[must_use]
    pub fn element_mut(&mut self, name: &str) -> Option<&mut JointStateElement> {
        self.index_of(name).map(|i| &mut self.elements[i])
    }

    /// Check structural validity: matching sizes, non-null timestamp,
    /// finite values.
    pub fn validate(&self) -> Result<(), StateError> {
        if self.names.len() != self.elements.len() {
            return Err(StateError::JointStateSizeMismatch {
                names: self.names.len(),
                elements: self.elements.len(),
            });
        }
        if self.time.is_null() {
            return Err(StateError::NullTimestamp);
        }
        for (name, e) in self.names.iter().zip(&self.elements) {
            if !e.is_finite() {
                return Err(StateError::NonFiniteJointState(name.clone()));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JointCommand
// ---------------------------------------------------------------------------

/// Command for a single joint. Unset fields are not commanded.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CommandElement {
    pub velocity: Option<f64>,
    pub acceleration: Option<f64>,
    pub effort: Option<f64>,
}

/// Ordered, named joint command vector, produced by a scene `solve`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JointCommand {
    pub names: Vec<String>,
    pub elements: Vec<CommandElement>,
    pub time: TimeStamp,
}

impl JointCommand {
    /// Create an empty command for the given joint names.
    pub fn for_joints(names: &[String], time: TimeStamp) -> Self {
        Self {
            names: names.to_vec(),
            elements: vec![CommandElement::default(); names.len()],
            time,
        }
    }

    /// Number of commanded joints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the command holds no joints.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Command of a joint by name.
    #[must_use]
    pub fn element(&self, name: &str) -> Option<&CommandElement> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.elements[i])
    }
}

// ---------------------------------------------------------------------------
// RigidBodyStateSE3
// ---------------------------------------------------------------------------

/// Pose, twist and spatial acceleration of a rigid body.
///
/// The twist and acceleration are expressed in the frame the state refers to,
/// with `(linear, angular)` component ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RigidBodyStateSE3 {
    /// Frame this state is expressed in.
    pub frame_id: String,
    /// Pose of the body.
    pub pose: Isometry3<f64>,
    /// Linear velocity (m/s).
    pub linear_velocity: Vector3<f64>,
    /// Angular velocity (rad/s).
    pub angular_velocity: Vector3<f64>,
    /// Linear acceleration (m/s^2).
    pub linear_acceleration: Vector3<f64>,
    /// Angular acceleration (rad/s^2).
    pub angular_acceleration: Vector3<f64>,
    pub time: TimeStamp,
}

impl Default for RigidBodyStateSE3 {
    fn default() -> Self {
        Self {
            frame_id: String::new(),
            pose: Isometry3::identity(),
            linear_velocity: Vector3::zeros(),
            angular_velocity: Vector3::zeros(),
            linear_acceleration: Vector3::zeros(),
            angular_acceleration: Vector3::zeros(),
            time: TimeStamp::null(),
        }
    }
}

impl RigidBodyStateSE3 {
    /// Whether the pose is finite with a unit quaternion (tolerance 1e-6).
    #[must_use]
    pub fn has_valid_pose(&self) -> bool {
        let t = &self.pose.translation.vector;
        let q = self.pose.rotation.quaternion();
        t.iter().all(|v| v.is_finite())
            && q.coords.iter().all(|v| v.is_finite())
            && (q.norm() - 1.0).abs() < UNIT_QUATERNION_TOL
    }

    /// Whether all twist components are finite.
    #[must_use]
    pub fn has_valid_twist(&self) -> bool {
        self.linear_velocity.iter().all(|v| v.is_finite())
            && self.angular_velocity.iter().all(|v| v.is_finite())
    }

    /// Whether all acceleration components are finite.
    #[must_use]
    pub fn has_valid_acceleration(&self) -> bool {
        self.linear_acceleration.iter().all(|v| v.is_finite())
            && self.angular_acceleration.iter().all(|v| v.is_finite())
    }

    /// Twist as a 6-vector in `(linear, angular)` ordering.
    #[must_use]
    pub fn twist(&self) -> Vector6<f64> {
        stack_linear_angular(&self.linear_velocity, &self.angular_velocity)
    }

    /// Spatial acceleration as a 6-vector in `(linear, angular)` ordering.
    #[must_use]
    pub fn acceleration(&self) -> Vector6<f64> {
        stack_linear_angular(&self.linear_acceleration, &self.angular_acceleration)
    }
}

/// Stack two 3-vectors into the canonical `(linear, angular)` 6-vector.
#[must_use]
pub fn stack_linear_angular(linear: &Vector3<f64>, angular: &Vector3<f64>) -> Vector6<f64> {
    Vector6::new(
        linear.x, linear.y, linear.z, angular.x, angular.y, angular.z,
    )
}

// ---------------------------------------------------------------------------
// ActiveContacts
// ---------------------------------------------------------------------------

/// Named contact points with per-contact activation flags.
///
/// Persistent across control ticks; mutated only by the user between ticks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActiveContacts {
    pub names: Vec<String>,
    pub active: Vec<bool>,
}

impl ActiveContacts {
    /// All given contact points, initially active.
    pub fn all_active(names: &[String]) -> Self {
        Self {
            names: names.to_vec(),
            active: vec![true; names.len()],
        }
    }

    /// Total number of contact points (active or not).
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether there are no contact points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Number of currently active contact points.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.iter().filter(|a| **a).count()
    }

    /// Set the activation flag of a named contact point. Returns false if the
    /// contact is unknown.
    pub fn set_active(&mut self, name: &str, active: bool) -> bool {
        match self.names.iter().position(|n| n == name) {
            Some(i) => {
                self.active[i] = active;
                true
            }
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Wrenches
// ---------------------------------------------------------------------------

/// A 6D force/torque pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Wrench {
    pub force: Vector3<f64>,
    pub torque: Vector3<f64>,
}

impl Default for Wrench {
    fn default() -> Self {
        Self {
            force: Vector3::zeros(),
            torque: Vector3::zeros(),
        }
    }
}

/// Named, timestamped wrench container (solved contact wrenches).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Wrenches {
    pub names: Vec<String>,
    pub elements: Vec<Wrench>,
    pub time: TimeStamp,
}

impl Wrenches {
    /// Wrench of a contact by name.
    #[must_use]
    pub fn element(&self, name: &str) -> Option<&Wrench> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.elements[i])
    }
}

// ---------------------------------------------------------------------------
// JointLimits
// ---------------------------------------------------------------------------

/// Motion limits of a single joint. `None` position bounds mean unbounded
/// (continuous joints).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct JointLimitRange {
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    /// Maximum velocity magnitude (rad/s or m/s).
    pub velocity: f64,
    /// Maximum effort magnitude (Nm or N).
    pub effort: f64,
}

/// Named joint limits container, read out of the robot description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JointLimits {
    pub names: Vec<String>,
    pub elements: Vec<JointLimitRange>,
}

impl JointLimits {
    /// Limits of a joint by name.
    #[must_use]
    pub fn element(&self, name: &str) -> Option<&JointLimitRange> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.elements[i])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Quaternion, Translation3, UnitQuaternion};

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).into()).collect()
    }

    // -- JointState --

    #[test]
    fn joint_state_zeros() {
        let js = JointState::zeros(&names(&["a", "b"]), TimeStamp::from_secs(1.0));
        assert_eq!(js.len(), 2);
        assert!(js.validate().is_ok());
    }

    #[test]
    fn joint_state_lookup() {
        let mut js = JointState::zeros(&names(&["a", "b"]), TimeStamp::from_secs(1.0));
        js.element_mut("b").unwrap().position = 0.5;
        assert_eq!(js.index_of("b"), Some(1));
        approx::assert_relative_eq!(js.element("b").unwrap().position, 0.5);
        assert!(js.element("c").is_none());
    }

    #[test]
    fn joint_state_validate_null_time() {
        let js = JointState::zeros(&names(&["a"]), TimeStamp::null());
        assert_eq!(js.validate(), Err(StateError::NullTimestamp));
    }

    #[test]
    fn joint_state_validate_size_mismatch() {
        let mut js = JointState::zeros(&names(&["a"]), TimeStamp::from_secs(1.0));
        js.elements.pop();
        assert!(matches!(
            js.validate(),
            Err(StateError::JointStateSizeMismatch { names: 1, elements: 0 })
        ));
    }

    #[test]
    fn joint_state_validate_non_finite() {
        let mut js = JointState::zeros(&names(&["a"]), TimeStamp::from_secs(1.0));
        js.elements[0].speed = f64::NAN;
        assert!(matches!(
            js.validate(),
            Err(StateError::NonFiniteJointState(_))
        ));
    }

    // -- RigidBodyStateSE3 --

    #[test]
    fn default_state_is_valid() {
        let rbs = RigidBodyStateSE3::default();
        assert!(rbs.has_valid_pose());
        assert!(rbs.has_valid_twist());
        assert!(rbs.has_valid_acceleration());
    }

    #[test]
    fn non_unit_quaternion_invalidates_pose() {
        let mut rbs = RigidBodyStateSE3::default();
        rbs.pose = Isometry3::from_parts(
            Translation3::new(0.0, 0.0, 0.0),
            UnitQuaternion::new_unchecked(Quaternion::new(1.1, 0.0, 0.0, 0.0)),
        );
        assert!(!rbs.has_valid_pose());
    }

    #[test]
    fn nan_twist_invalidates() {
        let mut rbs = RigidBodyStateSE3::default();
        rbs.angular_velocity.x = f64::NAN;
        assert!(!rbs.has_valid_twist());
        assert!(rbs.has_valid_acceleration());
    }

    #[test]
    fn twist_vector_ordering() {
        let mut rbs = RigidBodyStateSE3::default();
        rbs.linear_velocity = Vector3::new(1.0, 2.0, 3.0);
        rbs.angular_velocity = Vector3::new(4.0, 5.0, 6.0);
        let v = rbs.twist();
        assert_eq!(v, Vector6::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0));
    }

    // -- ActiveContacts --

    #[test]
    fn contacts_all_active() {
        let c = ActiveContacts::all_active(&names(&["lf", "rf"]));
        assert_eq!(c.len(), 2);
        assert_eq!(c.active_count(), 2);
    }

    #[test]
    fn contacts_set_active() {
        let mut c = ActiveContacts::all_active(&names(&["lf", "rf"]));
        assert!(c.set_active("lf", false));
        assert_eq!(c.active_count(), 1);
        assert!(!c.set_active("mf", false));
    }

    // -- JointCommand --

    #[test]
    fn command_defaults_unset() {
        let cmd = JointCommand::for_joints(&names(&["a"]), TimeStamp::from_secs(1.0));
        let e = cmd.element("a").unwrap();
        assert!(e.velocity.is_none());
        assert!(e.acceleration.is_none());
        assert!(e.effort.is_none());
    }

    // -- JointLimits --

    #[test]
    fn joint_limits_lookup() {
        let lim = JointLimits {
            names: names(&["a"]),
            elements: vec![JointLimitRange {
                lower: Some(-1.0),
                upper: Some(1.0),
                velocity: 2.0,
                effort: 10.0,
            }],
        };
        let e = lim.element("a").unwrap();
        approx::assert_relative_eq!(e.upper.unwrap(), 1.0);
        assert!(lim.element("b").is_none());
    }
}
