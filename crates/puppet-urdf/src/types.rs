//! In-memory robot description.
//!
//! These types are the crate's canonical representation of a robot model,
//! independent of the XML parsing layer. Only the data the control runtime
//! consumes is kept: the kinematic tree, joint limits and link inertials.
//! Visual and collision geometry is not represented.

use std::collections::HashMap;

use tracing::warn;

use crate::error::UrdfError;

// ---------------------------------------------------------------------------
// JointType
// ---------------------------------------------------------------------------

/// URDF joint type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JointType {
    /// Rotation about a single axis, with position limits.
    Revolute,
    /// Unlimited rotation about a single axis.
    Continuous,
    /// Translation along an axis, with position limits.
    Prismatic,
    /// No relative motion between parent and child.
    Fixed,
}

impl JointType {
    /// Whether this joint type contributes a degree of freedom.
    #[must_use]
    pub const fn is_actuated(self) -> bool {
        matches!(self, Self::Revolute | Self::Continuous | Self::Prismatic)
    }
}

// ---------------------------------------------------------------------------
// JointLimits
// ---------------------------------------------------------------------------

/// Limits on a joint's motion, effort, and velocity.
#[derive(Debug, Clone, Copy, Default)]
pub struct JointLimits {
    /// Lower position limit (rad or m). `None` means unbounded.
    pub lower: Option<f64>,
    /// Upper position limit (rad or m). `None` means unbounded.
    pub upper: Option<f64>,
    /// Maximum effort (Nm or N).
    pub effort: f64,
    /// Maximum velocity (rad/s or m/s).
    pub velocity: f64,
}

// ---------------------------------------------------------------------------
// Origin
// ---------------------------------------------------------------------------

/// A 3D pose specified as position + roll-pitch-yaw.
#[derive(Debug, Clone, Copy, Default)]
pub struct Origin {
    /// Translation `[x, y, z]` in meters.
    pub xyz: [f64; 3],
    /// Rotation `[roll, pitch, yaw]` in radians.
    pub rpy: [f64; 3],
}

// ---------------------------------------------------------------------------
// Inertial
// ---------------------------------------------------------------------------

/// Inertial properties of a link.
#[derive(Debug, Clone, Copy, Default)]
pub struct Inertial {
    /// Origin of the inertial frame relative to the link frame.
    pub origin: Origin,
    /// Mass in kilograms.
    pub mass: f64,
    /// Inertia tensor elements `[ixx, ixy, ixz, iyy, iyz, izz]` about the
    /// inertial origin.
    pub inertia: [f64; 6],
}

// ---------------------------------------------------------------------------
// LinkData / JointData
// ---------------------------------------------------------------------------

/// In-memory representation of a URDF link.
#[derive(Debug, Clone)]
pub struct LinkData {
    /// Link name.
    pub name: String,
    /// Inertial properties, if the link carries mass.
    pub inertial: Option<Inertial>,
}

impl LinkData {
    /// Create a massless link.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inertial: None,
        }
    }
}

/// In-memory representation of a URDF joint.
#[derive(Debug, Clone)]
pub struct JointData {
    /// Joint name.
    pub name: String,
    /// Joint type.
    pub joint_type: JointType,
    /// Parent link name.
    pub parent: String,
    /// Child link name.
    pub child: String,
    /// Joint origin relative to parent link.
    pub origin: Origin,
    /// Joint axis (unit vector, default `[0, 0, 1]`).
    pub axis: [f64; 3],
    /// Motion limits.
    pub limits: JointLimits,
}

// ---------------------------------------------------------------------------
// UrdfModel
// ---------------------------------------------------------------------------

/// Complete in-memory robot description.
///
/// Constructed by the parser and consumed by the model back-ends. Contains
/// the full kinematic tree: links, joints, and root link name.
#[derive(Debug, Clone)]
pub struct UrdfModel {
    /// Robot name.
    pub name: String,
    /// All links, keyed by name.
    pub links: HashMap<String, LinkData>,
    /// All joints, keyed by name.
    pub joints: HashMap<String, JointData>,
    /// Name of the root link (the one never referenced as a child).
    pub root_link: String,
}

impl UrdfModel {
    /// Get a link by name.
    pub fn link(&self, name: &str) -> Result<&LinkData, UrdfError> {
        self.links
            .get(name)
            .ok_or_else(|| UrdfError::MissingLink(name.into()))
    }

    /// Get a joint by name.
    pub fn joint(&self, name: &str) -> Result<&JointData, UrdfError> {
        self.joints
            .get(name)
            .ok_or_else(|| UrdfError::MissingJoint(name.into()))
    }

    /// Whether a link exists.
    #[must_use]
    pub fn has_link(&self, name: &str) -> bool {
        self.links.contains_key(name)
    }

    /// Number of degrees of freedom.
    #[must_use]
    pub fn dof(&self) -> usize {
        self.joints
            .values()
            .filter(|j| j.joint_type.is_actuated())
            .count()
    }

    /// The joint whose child link is `link`, if any. Unique in a tree.
    #[must_use]
    pub fn joint_to(&self, link: &str) -> Option<&JointData> {
        self.joints.values().find(|j| j.child == link)
    }

    /// Names of all moving joints, in a deterministic preorder tree walk
    /// from the root (children visited in joint-name order). Parents always
    /// precede their descendants.
    #[must_use]
    pub fn joint_names_in_tree_order(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.dof());
        self.preorder(&self.root_link, &mut names);
        names
    }

    fn preorder(&self, link: &str, out: &mut Vec<String>) {
        let mut children: Vec<&JointData> =
            self.joints.values().filter(|j| j.parent == link).collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));
        for joint in children {
            if joint.joint_type.is_actuated() {
                out.push(joint.name.clone());
            }
            self.preorder(&joint.child, out);
        }
    }

    /// Convert the named joints to fixed joints.
    ///
    /// This is how joints are stripped from a robot description before the
    /// model is built: the subtree stays attached, but the joints no longer
    /// contribute degrees of freedom. Unknown names are skipped with a
    /// warning.
    pub fn apply_joint_blacklist(&mut self, blacklist: &[String]) {
        for name in blacklist {
            match self.joints.get_mut(name) {
                Some(joint) => {
                    joint.joint_type = JointType::Fixed;
                    joint.limits = JointLimits::default();
                }
                None => warn!("blacklisted joint '{name}' is not in the robot description"),
            }
        }
    }

    /// Inject a virtual 6-DoF floating-base linkage under a new root link.
    ///
    /// Prepends a chain of three prismatic joints along the world x/y/z axes
    /// followed by three revolute joints about x/y/z, using the given joint
    /// names (canonical order `trans_x..rot_z`). The new root link is
    /// `world_frame_id`; the previous root becomes the child of the last
    /// revolute joint.
    pub fn inject_floating_base(
        &mut self,
        world_frame_id: &str,
        joint_names: &[&str; 6],
    ) -> Result<(), UrdfError> {
        if self.has_link(world_frame_id) {
            return Err(UrdfError::DuplicateLink(world_frame_id.into()));
        }

        let axes = [
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
        ];

        let old_root = std::mem::replace(&mut self.root_link, world_frame_id.to_string());
        self.links
            .insert(world_frame_id.into(), LinkData::new(world_frame_id));

        let mut parent = world_frame_id.to_string();
        for (i, name) in joint_names.iter().enumerate() {
            // The last joint attaches directly to the previous root; the
            // others get massless intermediate links.
            let child = if i == joint_names.len() - 1 {
                old_root.clone()
            } else {
                let link_name = format!("{world_frame_id}_{name}");
                if self.has_link(&link_name) {
                    return Err(UrdfError::DuplicateLink(link_name));
                }
                self.links
                    .insert(link_name.clone(), LinkData::new(&link_name));
                link_name
            };

            self.joints.insert(
                (*name).into(),
                JointData {
                    name: (*name).into(),
                    joint_type: if i < 3 {
                        JointType::Prismatic
                    } else {
                        JointType::Continuous
                    },
                    parent: parent.clone(),
                    child: child.clone(),
                    origin: Origin::default(),
                    axis: axes[i],
                    limits: JointLimits::default(),
                },
            );
            parent = child;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn two_joint_model() -> UrdfModel {
        let mut links = HashMap::new();
        for name in ["base", "link1", "link2"] {
            links.insert(name.into(), LinkData::new(name));
        }
        let mut joints = HashMap::new();
        joints.insert(
            "j1".into(),
            JointData {
                name: "j1".into(),
                joint_type: JointType::Revolute,
                parent: "base".into(),
                child: "link1".into(),
                origin: Origin::default(),
                axis: [0.0, 0.0, 1.0],
                limits: JointLimits {
                    lower: Some(-1.0),
                    upper: Some(1.0),
                    effort: 10.0,
                    velocity: 2.0,
                },
            },
        );
        joints.insert(
            "j2".into(),
            JointData {
                name: "j2".into(),
                joint_type: JointType::Revolute,
                parent: "link1".into(),
                child: "link2".into(),
                origin: Origin::default(),
                axis: [0.0, 0.0, 1.0],
                limits: JointLimits::default(),
            },
        );
        UrdfModel {
            name: "two_joint".into(),
            links,
            joints,
            root_link: "base".into(),
        }
    }

    #[test]
    fn joint_type_is_actuated() {
        assert!(JointType::Revolute.is_actuated());
        assert!(JointType::Continuous.is_actuated());
        assert!(JointType::Prismatic.is_actuated());
        assert!(!JointType::Fixed.is_actuated());
    }

    #[test]
    fn lookup_and_dof() {
        let model = two_joint_model();
        assert!(model.link("base").is_ok());
        assert!(model.link("missing").is_err());
        assert!(model.joint("j1").is_ok());
        assert_eq!(model.dof(), 2);
    }

    #[test]
    fn joint_to_child() {
        let model = two_joint_model();
        assert_eq!(model.joint_to("link1").unwrap().name, "j1");
        assert!(model.joint_to("base").is_none());
    }

    #[test]
    fn tree_order_is_parent_first() {
        let model = two_joint_model();
        assert_eq!(model.joint_names_in_tree_order(), vec!["j1", "j2"]);
    }

    #[test]
    fn blacklist_fixes_joint() {
        let mut model = two_joint_model();
        model.apply_joint_blacklist(&["j2".into(), "nope".into()]);
        assert_eq!(model.joint("j2").unwrap().joint_type, JointType::Fixed);
        assert_eq!(model.dof(), 1);
        assert_eq!(model.joint_names_in_tree_order(), vec!["j1"]);
    }

    #[test]
    fn floating_base_injection() {
        let mut model = two_joint_model();
        let names = ["trans_x", "trans_y", "trans_z", "rot_x", "rot_y", "rot_z"];
        model.inject_floating_base("world", &names).unwrap();

        assert_eq!(model.root_link, "world");
        assert_eq!(model.dof(), 8);
        // Virtual joints come first, in canonical order.
        let order = model.joint_names_in_tree_order();
        assert_eq!(
            &order[..6],
            &["trans_x", "trans_y", "trans_z", "rot_x", "rot_y", "rot_z"]
        );
        assert_eq!(&order[6..], &["j1", "j2"]);
        // Prismatic then continuous.
        assert_eq!(
            model.joint("trans_y").unwrap().joint_type,
            JointType::Prismatic
        );
        assert_eq!(
            model.joint("rot_x").unwrap().joint_type,
            JointType::Continuous
        );
        // rot_z attaches to the old root.
        assert_eq!(model.joint("rot_z").unwrap().child, "base");
    }

    #[test]
    fn floating_base_duplicate_world() {
        let mut model = two_joint_model();
        let names = ["trans_x", "trans_y", "trans_z", "rot_x", "rot_y", "rot_z"];
        assert!(matches!(
            model.inject_floating_base("base", &names),
            Err(UrdfError::DuplicateLink(_))
        ));
        // Rollback: root unchanged? Injection failed before any edit.
        assert_eq!(model.root_link, "base");
    }
}
