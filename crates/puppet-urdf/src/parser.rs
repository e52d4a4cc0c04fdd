//! URDF XML parsing using `urdf-rs`.
//!
//! Converts `urdf_rs` types into the crate's canonical [`UrdfModel`]
//! representation. Only the data the control runtime needs is converted;
//! visual and collision elements are skipped.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::error::UrdfError;
use crate::types::{Inertial, JointData, JointLimits, JointType, LinkData, Origin, UrdfModel};

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Parse a URDF file from disk into an [`UrdfModel`].
pub fn parse_file(path: impl AsRef<Path>) -> Result<UrdfModel, UrdfError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| UrdfError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_string(&content)
}

/// Parse a URDF XML string into an [`UrdfModel`].
pub fn parse_string(xml: &str) -> Result<UrdfModel, UrdfError> {
    let robot = urdf_rs::read_from_string(xml).map_err(|e| UrdfError::Parse(e.to_string()))?;
    convert_robot(&robot)
}

// ---------------------------------------------------------------------------
// Conversion helpers
// ---------------------------------------------------------------------------

fn convert_robot(robot: &urdf_rs::Robot) -> Result<UrdfModel, UrdfError> {
    let links: HashMap<String, LinkData> = robot
        .links
        .iter()
        .map(|l| (l.name.clone(), convert_link(l)))
        .collect();

    let joints: HashMap<String, JointData> = robot
        .joints
        .iter()
        .map(|j| convert_joint(j).map(|jd| (jd.name.clone(), jd)))
        .collect::<Result<_, _>>()?;

    // Root link = a link that is never a child of any joint.
    let child_links: HashSet<&str> = joints.values().map(|j| j.child.as_str()).collect();
    let root_link = links
        .keys()
        .find(|name| !child_links.contains(name.as_str()))
        .ok_or(UrdfError::NoRootLink)?
        .clone();

    Ok(UrdfModel {
        name: robot.name.clone(),
        links,
        joints,
        root_link,
    })
}

fn convert_link(link: &urdf_rs::Link) -> LinkData {
    LinkData {
        name: link.name.clone(),
        inertial: Some(convert_inertial(&link.inertial)),
    }
}

fn convert_joint(joint: &urdf_rs::Joint) -> Result<JointData, UrdfError> {
    Ok(JointData {
        name: joint.name.clone(),
        joint_type: convert_joint_type(&joint.joint_type)?,
        parent: joint.parent.link.clone(),
        child: joint.child.link.clone(),
        origin: convert_pose(&joint.origin),
        axis: joint.axis.xyz.0,
        limits: convert_limits(&joint.limit),
    })
}

fn convert_joint_type(jt: &urdf_rs::JointType) -> Result<JointType, UrdfError> {
    match jt {
        urdf_rs::JointType::Revolute => Ok(JointType::Revolute),
        urdf_rs::JointType::Continuous => Ok(JointType::Continuous),
        urdf_rs::JointType::Prismatic => Ok(JointType::Prismatic),
        urdf_rs::JointType::Fixed => Ok(JointType::Fixed),
        other => Err(UrdfError::UnsupportedJointType(format!("{other:?}"))),
    }
}

fn convert_limits(limit: &urdf_rs::JointLimit) -> JointLimits {
    // urdf-rs defaults lower/upper to 0.0 for joints without limits.
    // Both zero means "no position limits".
    let has_limits = (limit.lower - limit.upper).abs() > f64::EPSILON;
    JointLimits {
        lower: has_limits.then_some(limit.lower),
        upper: has_limits.then_some(limit.upper),
        effort: limit.effort,
        velocity: limit.velocity,
    }
}

fn convert_pose(pose: &urdf_rs::Pose) -> Origin {
    Origin {
        xyz: pose.xyz.0,
        rpy: pose.rpy.0,
    }
}

fn convert_inertial(inertial: &urdf_rs::Inertial) -> Inertial {
    let i = &inertial.inertia;
    Inertial {
        origin: convert_pose(&inertial.origin),
        mass: inertial.mass.value,
        inertia: [i.ixx, i.ixy, i.ixz, i.iyy, i.iyz, i.izz],
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_LINK_URDF: &str = r#"
        <robot name="two_link">
            <link name="base_link">
                <inertial>
                    <mass value="1.0"/>
                    <inertia ixx="0.01" ixy="0" ixz="0" iyy="0.01" iyz="0" izz="0.01"/>
                </inertial>
            </link>
            <link name="child_link"/>
            <joint name="joint1" type="revolute">
                <parent link="base_link"/>
                <child link="child_link"/>
                <origin xyz="0 0 0.5" rpy="0 0 0"/>
                <axis xyz="0 0 1"/>
                <limit lower="-1.57" upper="1.57" effort="100" velocity="5"/>
            </joint>
        </robot>
    "#;

    const MULTI_JOINT_URDF: &str = r#"
        <robot name="arm">
            <link name="base"/>
            <link name="link1"/>
            <link name="link2"/>
            <link name="link3"/>
            <joint name="joint1" type="revolute">
                <parent link="base"/>
                <child link="link1"/>
                <axis xyz="0 0 1"/>
                <limit lower="-3.14" upper="3.14" effort="50" velocity="2"/>
            </joint>
            <joint name="joint2" type="continuous">
                <parent link="link1"/>
                <child link="link2"/>
                <axis xyz="0 1 0"/>
            </joint>
            <joint name="fixed_end" type="fixed">
                <parent link="link2"/>
                <child link="link3"/>
            </joint>
        </robot>
    "#;

    #[test]
    fn parse_two_link_robot() {
        let model = parse_string(TWO_LINK_URDF).unwrap();
        assert_eq!(model.name, "two_link");
        assert_eq!(model.links.len(), 2);
        assert_eq!(model.joints.len(), 1);
        assert_eq!(model.root_link, "base_link");
    }

    #[test]
    fn parse_multi_joint_robot() {
        let model = parse_string(MULTI_JOINT_URDF).unwrap();
        assert_eq!(model.links.len(), 4);
        assert_eq!(model.joints.len(), 3);
        assert_eq!(model.dof(), 2); // revolute + continuous, not fixed
        assert_eq!(model.root_link, "base");
    }

    #[test]
    fn joint_data_parsed() {
        let model = parse_string(TWO_LINK_URDF).unwrap();
        let joint = model.joint("joint1").unwrap();
        assert_eq!(joint.joint_type, JointType::Revolute);
        assert_eq!(joint.parent, "base_link");
        assert_eq!(joint.child, "child_link");
        approx::assert_relative_eq!(joint.origin.xyz[2], 0.5);
        approx::assert_relative_eq!(joint.axis[2], 1.0);
        approx::assert_relative_eq!(joint.limits.lower.unwrap(), -1.57);
        approx::assert_relative_eq!(joint.limits.upper.unwrap(), 1.57);
        approx::assert_relative_eq!(joint.limits.effort, 100.0);
        approx::assert_relative_eq!(joint.limits.velocity, 5.0);
    }

    #[test]
    fn continuous_joint_has_no_position_limits() {
        let model = parse_string(MULTI_JOINT_URDF).unwrap();
        let joint = model.joint("joint2").unwrap();
        assert!(joint.limits.lower.is_none());
        assert!(joint.limits.upper.is_none());
    }

    #[test]
    fn link_inertial_parsed() {
        let model = parse_string(TWO_LINK_URDF).unwrap();
        let inertial = model.link("base_link").unwrap().inertial.unwrap();
        approx::assert_relative_eq!(inertial.mass, 1.0);
        approx::assert_relative_eq!(inertial.inertia[0], 0.01);
    }

    #[test]
    fn parse_invalid_xml() {
        assert!(matches!(
            parse_string("<not valid urdf>"),
            Err(UrdfError::Parse(_))
        ));
    }

    #[test]
    fn parse_file_not_found() {
        assert!(matches!(
            parse_file("/nonexistent/robot.urdf"),
            Err(UrdfError::Io { .. })
        ));
    }
}
