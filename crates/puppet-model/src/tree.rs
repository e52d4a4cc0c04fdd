//! Parent-indexed kinematic tree with the core kinematics and dynamics
//! routines.
//!
//! The tree is built once from a robot description and then queried with
//! plain `q`/`q̇`/`q̈` vectors; it holds no per-tick state itself. All
//! link quantities are expressed in the frame of the tree root (the model
//! base), which by construction has the identity pose.
//!
//! Dynamics uses the recursive Newton-Euler algorithm in world-frame vector
//! form: bias forces are `rnea(q, q̇, 0)` with gravity, and the joint-space
//! inertia matrix is assembled column-wise from `rnea(q, 0, e_j)` without
//! gravity, which contains no velocity products.

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector, Isometry3, Matrix3, UnitVector3, Vector3};

use puppet_urdf::{JointType, UrdfModel};

use crate::error::ModelError;
use crate::spatial::{inertia_tensor, joint_transform, origin_to_isometry};

// ---------------------------------------------------------------------------
// Tree structure
// ---------------------------------------------------------------------------

/// A single degree of freedom attaching a link to its parent.
#[derive(Debug, Clone)]
pub struct TreeDof {
    /// Joint name (from the robot description).
    pub name: String,
    /// Column of this joint in `q` and in all Jacobians.
    pub q_index: usize,
    /// Joint axis in the child link frame.
    pub axis: UnitVector3<f64>,
    /// Prismatic (true) or revolute (false).
    pub prismatic: bool,
}

/// One link of the tree.
#[derive(Debug, Clone)]
pub struct TreeLink {
    /// Link name; doubles as the frame name.
    pub name: String,
    /// Parent link index; `None` for the root.
    pub parent: Option<usize>,
    /// Static transform from the parent link frame to this joint frame.
    pub origin: Isometry3<f64>,
    /// Moving joint between parent and this link; `None` for fixed
    /// attachments.
    pub dof: Option<TreeDof>,
    /// Link mass (kg).
    pub mass: f64,
    /// Center of mass in the link frame.
    pub com: Vector3<f64>,
    /// Rotational inertia about the center of mass, in the link frame.
    pub inertia: Matrix3<f64>,
}

/// Per-link velocity: `(v, ω)` of the link frame origin, world frame.
pub type LinkVelocity = (Vector3<f64>, Vector3<f64>);
/// Per-link acceleration: `(a, α)` of the link frame origin, world frame.
pub type LinkAcceleration = (Vector3<f64>, Vector3<f64>);

/// Parent-indexed kinematic tree.
#[derive(Debug, Clone)]
pub struct KinematicTree {
    links: Vec<TreeLink>,
    link_index: HashMap<String, usize>,
    n_dof: usize,
}

impl KinematicTree {
    /// Build a tree from a robot description.
    ///
    /// `joint_order` fixes the `q` column of every moving joint and must
    /// contain each moving joint of the description exactly once.
    pub fn from_urdf(model: &UrdfModel, joint_order: &[String]) -> Result<Self, ModelError> {
        let mut q_indices: HashMap<&str, usize> = HashMap::new();
        for (i, name) in joint_order.iter().enumerate() {
            let joint = model.joint(name)?;
            if !joint.joint_type.is_actuated() {
                return Err(ModelError::UnknownJoint(name.clone()));
            }
            q_indices.insert(name.as_str(), i);
        }

        let mut links = Vec::with_capacity(model.links.len());
        let mut link_index = HashMap::new();

        // Depth-first from the root, children in joint-name order, so the
        // link array is topologically sorted (parents first).
        let mut stack = vec![(model.root_link.clone(), None::<usize>)];
        while let Some((link_name, parent)) = stack.pop() {
            let link = model.link(&link_name)?;
            let (origin, dof) = match model.joint_to(&link_name) {
                Some(joint) => {
                    let origin = origin_to_isometry(&joint.origin);
                    let dof = if joint.joint_type == JointType::Fixed {
                        None
                    } else {
                        let q_index = *q_indices
                            .get(joint.name.as_str())
                            .ok_or_else(|| ModelError::UnknownJoint(joint.name.clone()))?;
                        let axis =
                            Vector3::new(joint.axis[0], joint.axis[1], joint.axis[2]);
                        Some(TreeDof {
                            name: joint.name.clone(),
                            q_index,
                            axis: UnitVector3::new_normalize(axis),
                            prismatic: joint.joint_type == JointType::Prismatic,
                        })
                    };
                    (origin, dof)
                }
                None => (Isometry3::identity(), None),
            };

            let (mass, com, inertia) = match &link.inertial {
                Some(inertial) => {
                    let rot = origin_to_isometry(&inertial.origin).rotation;
                    (
                        inertial.mass,
                        Vector3::new(
                            inertial.origin.xyz[0],
                            inertial.origin.xyz[1],
                            inertial.origin.xyz[2],
                        ),
                        rot.to_rotation_matrix().matrix()
                            * inertia_tensor(&inertial.inertia)
                            * rot.to_rotation_matrix().matrix().transpose(),
                    )
                }
                None => (0.0, Vector3::zeros(), Matrix3::zeros()),
            };

            let index = links.len();
            link_index.insert(link_name.clone(), index);
            links.push(TreeLink {
                name: link_name.clone(),
                parent,
                origin,
                dof,
                mass,
                com,
                inertia,
            });

            let mut children: Vec<&puppet_urdf::JointData> = model
                .joints
                .values()
                .filter(|j| j.parent == link_name)
                .collect();
            children.sort_by(|a, b| b.name.cmp(&a.name));
            for child in children {
                stack.push((child.child.clone(), Some(index)));
            }
        }

        Ok(Self {
            links,
            link_index,
            n_dof: joint_order.len(),
        })
    }

    /// Number of degrees of freedom.
    #[must_use]
    pub fn n_dof(&self) -> usize {
        self.n_dof
    }

    /// All links, topologically sorted.
    #[must_use]
    pub fn links(&self) -> &[TreeLink] {
        &self.links
    }

    /// Index of a link by name.
    #[must_use]
    pub fn link_index(&self, name: &str) -> Option<usize> {
        self.link_index.get(name).copied()
    }

    // -----------------------------------------------------------------------
    // Kinematics
    // -----------------------------------------------------------------------

    /// Pose of every link in the tree-root frame.
    #[must_use]
    pub fn forward_kinematics(&self, q: &DVector<f64>) -> Vec<Isometry3<f64>> {
        let mut poses = Vec::with_capacity(self.links.len());
        for link in &self.links {
            let parent_pose = link.parent.map_or_else(Isometry3::identity, |p| poses[p]);
            let mut pose = parent_pose * link.origin;
            if let Some(dof) = &link.dof {
                pose *= joint_transform(&dof.axis, dof.prismatic, q[dof.q_index]);
            }
            poses.push(pose);
        }
        poses
    }

    /// Linear and angular velocity of every link frame origin.
    #[must_use]
    pub fn link_velocities(
        &self,
        poses: &[Isometry3<f64>],
        qd: &DVector<f64>,
    ) -> Vec<LinkVelocity> {
        let mut vels: Vec<LinkVelocity> = Vec::with_capacity(self.links.len());
        for (i, link) in self.links.iter().enumerate() {
            let Some(p) = link.parent else {
                vels.push((Vector3::zeros(), Vector3::zeros()));
                continue;
            };
            let (v_p, w_p) = vels[p];
            let r = poses[i].translation.vector - poses[p].translation.vector;
            let mut v = v_p + w_p.cross(&r);
            let mut w = w_p;
            if let Some(dof) = &link.dof {
                let axis_w = poses[i].rotation * dof.axis.into_inner();
                if dof.prismatic {
                    v += axis_w * qd[dof.q_index];
                } else {
                    w += axis_w * qd[dof.q_index];
                }
            }
            vels.push((v, w));
        }
        vels
    }

    /// Linear and angular acceleration of every link frame origin.
    ///
    /// `base_acceleration` is the linear acceleration assigned to the tree
    /// root (used for the gravity trick in dynamics; zero for plain
    /// kinematics).
    #[must_use]
    pub fn link_accelerations(
        &self,
        poses: &[Isometry3<f64>],
        vels: &[LinkVelocity],
        qd: &DVector<f64>,
        qdd: &DVector<f64>,
        base_acceleration: Vector3<f64>,
    ) -> Vec<LinkAcceleration> {
        let mut accs: Vec<LinkAcceleration> = Vec::with_capacity(self.links.len());
        for (i, link) in self.links.iter().enumerate() {
            let Some(p) = link.parent else {
                accs.push((base_acceleration, Vector3::zeros()));
                continue;
            };
            let (a_p, al_p) = accs[p];
            let (_, w_p) = vels[p];
            let r = poses[i].translation.vector - poses[p].translation.vector;
            let mut a = a_p + al_p.cross(&r) + w_p.cross(&w_p.cross(&r));
            let mut al = al_p;
            if let Some(dof) = &link.dof {
                let axis_w = poses[i].rotation * dof.axis.into_inner();
                let rate = qd[dof.q_index];
                let accel = qdd[dof.q_index];
                if dof.prismatic {
                    a += 2.0 * w_p.cross(&(axis_w * rate)) + axis_w * accel;
                } else {
                    al += axis_w * accel + w_p.cross(&(axis_w * rate));
                }
            }
            accs.push((a, al));
        }
        accs
    }

    /// Space Jacobian of `tip` with respect to `root`, expressed in the
    /// `root` frame with `(linear, angular)` row ordering. Columns of joints
    /// off the connecting path are zero.
    pub fn space_jacobian(
        &self,
        poses: &[Isometry3<f64>],
        root: usize,
        tip: usize,
    ) -> DMatrix<f64> {
        let mut jac = DMatrix::zeros(6, self.n_dof);
        let p_tip = poses[tip].translation.vector;
        let rot_root_t = poses[root].rotation.inverse();

        for (link, sign) in self.path(root, tip) {
            let Some(dof) = &self.links[link].dof else {
                continue;
            };
            let axis_w = poses[link].rotation * dof.axis.into_inner();
            let (lin_w, ang_w) = if dof.prismatic {
                (axis_w * sign, Vector3::zeros())
            } else {
                let p_j = poses[link].translation.vector;
                (axis_w.cross(&(p_tip - p_j)) * sign, axis_w * sign)
            };
            let lin = rot_root_t * lin_w;
            let ang = rot_root_t * ang_w;
            for k in 0..3 {
                jac[(k, dof.q_index)] = lin[k];
                jac[(k + 3, dof.q_index)] = ang[k];
            }
        }
        jac
    }

    /// Time derivative of [`Self::space_jacobian`].
    pub fn jacobian_dot(
        &self,
        poses: &[Isometry3<f64>],
        vels: &[LinkVelocity],
        root: usize,
        tip: usize,
    ) -> DMatrix<f64> {
        let mut jac_dot = DMatrix::zeros(6, self.n_dof);
        let p_tip = poses[tip].translation.vector;
        let (v_tip, _) = vels[tip];
        let rot_root_t = poses[root].rotation.inverse();
        let (_, w_root) = vels[root];

        for (link, sign) in self.path(root, tip) {
            let Some(dof) = &self.links[link].dof else {
                continue;
            };
            let axis_w = poses[link].rotation * dof.axis.into_inner();
            let (v_j, w_j) = vels[link];
            let axis_dot = w_j.cross(&axis_w);

            let (lin_w, ang_w, lin_dot_w, ang_dot_w) = if dof.prismatic {
                (
                    axis_w * sign,
                    Vector3::zeros(),
                    axis_dot * sign,
                    Vector3::zeros(),
                )
            } else {
                let p_j = poses[link].translation.vector;
                let arm = p_tip - p_j;
                (
                    axis_w.cross(&arm) * sign,
                    axis_w * sign,
                    (axis_dot.cross(&arm) + axis_w.cross(&(v_tip - v_j))) * sign,
                    axis_dot * sign,
                )
            };

            // d/dt (Rᵀ·x) = Rᵀ·(ẋ − ω_root × x)
            let lin = rot_root_t * (lin_dot_w - w_root.cross(&lin_w));
            let ang = rot_root_t * (ang_dot_w - w_root.cross(&ang_w));
            for k in 0..3 {
                jac_dot[(k, dof.q_index)] = lin[k];
                jac_dot[(k + 3, dof.q_index)] = ang[k];
            }
        }
        jac_dot
    }

    /// Joints on the path between two links, with traversal sign: `+1` when
    /// the joint is crossed parent-to-child, `-1` when crossed
    /// child-to-parent. Each entry is the child-side link of the joint.
    fn path(&self, root: usize, tip: usize) -> Vec<(usize, f64)> {
        let mut root_chain = self.ancestors(root);
        let tip_chain = self.ancestors(tip);

        // Drop the shared prefix up to the lowest common ancestor.
        let mut tip_branch: Vec<usize> = Vec::new();
        for link in &tip_chain {
            if !root_chain.contains(link) {
                tip_branch.push(*link);
            }
        }
        root_chain.retain(|link| !tip_chain.contains(link));

        let mut path: Vec<(usize, f64)> = root_chain.iter().map(|l| (*l, -1.0)).collect();
        path.extend(tip_branch.iter().map(|l| (*l, 1.0)));
        path
    }

    /// Chain of links from the tree root down to `link`, inclusive.
    fn ancestors(&self, link: usize) -> Vec<usize> {
        let mut chain = vec![link];
        let mut current = link;
        while let Some(parent) = self.links[current].parent {
            chain.push(parent);
            current = parent;
        }
        chain.reverse();
        chain
    }

    // -----------------------------------------------------------------------
    // Dynamics
    // -----------------------------------------------------------------------

    /// Recursive Newton-Euler inverse dynamics: joint forces required to
    /// produce `qdd` at state `(q, qd)` under `gravity`.
    pub fn rnea(
        &self,
        poses: &[Isometry3<f64>],
        qd: &DVector<f64>,
        qdd: &DVector<f64>,
        gravity: Vector3<f64>,
    ) -> DVector<f64> {
        let vels = self.link_velocities(poses, qd);
        // d'Alembert: accelerating the base opposite to gravity makes every
        // inertial force include the gravitational one.
        let accs = self.link_accelerations(poses, &vels, qd, qdd, -gravity);

        let n = self.links.len();
        // Net inertial force/torque per link, world frame, torque about the
        // link frame origin.
        let mut forces = vec![Vector3::zeros(); n];
        let mut torques = vec![Vector3::zeros(); n];

        for (i, link) in self.links.iter().enumerate() {
            if link.mass == 0.0 && link.inertia == Matrix3::zeros() {
                continue;
            }
            let rot = poses[i].rotation.to_rotation_matrix();
            let com_arm = rot * link.com;
            let (a, al) = accs[i];
            let (_, w) = vels[i];

            let a_com = a + al.cross(&com_arm) + w.cross(&w.cross(&com_arm));
            let inertia_w = rot.matrix() * link.inertia * rot.matrix().transpose();

            let f = link.mass * a_com;
            let n_com = inertia_w * al + w.cross(&(inertia_w * w));

            forces[i] = f;
            torques[i] = n_com + com_arm.cross(&f);
        }

        // Inward pass: accumulate child wrenches into parents and project
        // onto the joint axes. Reverse topological order guarantees children
        // are finished before their parent.
        let mut tau = DVector::zeros(self.n_dof);
        for i in (0..n).rev() {
            let link = &self.links[i];
            if let Some(dof) = &link.dof {
                let axis_w = poses[i].rotation * dof.axis.into_inner();
                tau[dof.q_index] += if dof.prismatic {
                    axis_w.dot(&forces[i])
                } else {
                    axis_w.dot(&torques[i])
                };
            }
            if let Some(p) = link.parent {
                let r = poses[i].translation.vector - poses[p].translation.vector;
                let f = forces[i];
                forces[p] += f;
                let tau_i = torques[i];
                torques[p] += tau_i + r.cross(&f);
            }
        }
        tau
    }

    /// Joint-space inertia matrix, assembled column-wise from unit
    /// accelerations at zero velocity and zero gravity.
    pub fn inertia_matrix(&self, poses: &[Isometry3<f64>]) -> DMatrix<f64> {
        let n = self.n_dof;
        let zero = DVector::zeros(n);
        let mut h = DMatrix::zeros(n, n);
        let mut unit = DVector::zeros(n);
        for j in 0..n {
            unit[j] = 1.0;
            let col = self.rnea(poses, &zero, &unit, Vector3::zeros());
            h.set_column(j, &col);
            unit[j] = 0.0;
        }
        // Symmetrize away the round-off asymmetry of the column-wise
        // assembly.
        let ht = h.transpose();
        (h + ht) * 0.5
    }

    // -----------------------------------------------------------------------
    // Center of mass
    // -----------------------------------------------------------------------

    /// Total mass and center of mass in the tree-root frame.
    #[must_use]
    pub fn com_position(&self, poses: &[Isometry3<f64>]) -> (f64, Vector3<f64>) {
        let mut total = 0.0;
        let mut weighted = Vector3::zeros();
        for (i, link) in self.links.iter().enumerate() {
            if link.mass == 0.0 {
                continue;
            }
            let com_w = poses[i] * nalgebra::Point3::from(link.com);
            total += link.mass;
            weighted += link.mass * com_w.coords;
        }
        if total > 0.0 {
            (total, weighted / total)
        } else {
            (0.0, Vector3::zeros())
        }
    }

    /// Center-of-mass Jacobian (3 × n) in the tree-root frame.
    pub fn com_jacobian(&self, poses: &[Isometry3<f64>]) -> DMatrix<f64> {
        let (total, _) = self.com_position(poses);
        let mut jac = DMatrix::zeros(3, self.n_dof);
        if total == 0.0 {
            return jac;
        }
        for (i, link) in self.links.iter().enumerate() {
            if link.mass == 0.0 {
                continue;
            }
            let weight = link.mass / total;
            let com_w = (poses[i] * nalgebra::Point3::from(link.com)).coords;
            // Walk the ancestor chain of this link, including its own joint.
            let mut current = i;
            loop {
                if let Some(dof) = &self.links[current].dof {
                    let axis_w = poses[current].rotation * dof.axis.into_inner();
                    let col = if dof.prismatic {
                        axis_w
                    } else {
                        let p_j = poses[current].translation.vector;
                        axis_w.cross(&(com_w - p_j))
                    };
                    for k in 0..3 {
                        jac[(k, dof.q_index)] += weight * col[k];
                    }
                }
                match self.links[current].parent {
                    Some(p) => current = p,
                    None => break,
                }
            }
        }
        jac
    }

    /// Velocity and acceleration of the center of mass, world frame.
    #[must_use]
    pub fn com_motion(
        &self,
        poses: &[Isometry3<f64>],
        vels: &[LinkVelocity],
        accs: &[LinkAcceleration],
    ) -> (Vector3<f64>, Vector3<f64>) {
        let mut total = 0.0;
        let mut vel = Vector3::zeros();
        let mut acc = Vector3::zeros();
        for (i, link) in self.links.iter().enumerate() {
            if link.mass == 0.0 {
                continue;
            }
            let arm = poses[i].rotation * link.com;
            let (v, w) = vels[i];
            let (a, al) = accs[i];
            total += link.mass;
            vel += link.mass * (v + w.cross(&arm));
            acc += link.mass * (a + al.cross(&arm) + w.cross(&w.cross(&arm)));
        }
        if total > 0.0 {
            (vel / total, acc / total)
        } else {
            (Vector3::zeros(), Vector3::zeros())
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
