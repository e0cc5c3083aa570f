//! Chaining pairwise results into poses relative to the primary camera,
//! and the deferred write of a unit's parameter files.

use std::path::PathBuf;

use multicam_core::{
    extrinsics_file_name, write_extrinsics, write_intrinsics, CalibrationError, CameraIntrinsics,
    CameraTopology, Extrinsics, Iso3,
};

/// Pose of `C` relative to `A` from `B` relative to `A` (`first_leg`) and
/// `C` relative to `B` (`second_leg`).
///
/// With `X_B = R1 X_A + T1` and `X_C = R2 X_B + T2`:
/// `R = R2 R1`, `T = R2 T1 + T2`.
pub fn compose_triplet(first_leg: &Iso3, second_leg: &Iso3) -> Iso3 {
    second_leg * first_leg
}

/// Re-express poses given relative to camera 0 relative to camera `primary`.
///
/// `R_i' = R_i R_p^T`, `T_i' = T_i - R_i' T_p`.
pub fn relative_to_primary(poses: &[Iso3], primary: usize) -> Option<Vec<Iso3>> {
    let p_inv = poses.get(primary)?.inverse();
    Some(poses.iter().map(|q| q * p_inv).collect())
}

/// Calibrated unit: one pose (relative to the primary) and intrinsics per
/// camera, in topology order.
#[derive(Clone, Debug)]
pub struct RigSolution {
    pub cameras: Vec<String>,
    pub primary: usize,
    pub poses: Vec<Iso3>,
    pub intrinsics: Vec<CameraIntrinsics>,
}

impl RigSolution {
    /// Build from legs along the topology chain (`legs[i]` is camera `i+1`
    /// relative to camera `i`).
    pub fn from_legs(
        topology: &CameraTopology,
        legs: &[Iso3],
        intrinsics: Vec<CameraIntrinsics>,
    ) -> Result<Self, CalibrationError> {
        let n = topology.cameras().len();
        if legs.len() + 1 != n || intrinsics.len() != n {
            return Err(CalibrationError::Configuration(format!(
                "{}: expected {} legs and {n} cameras, got {} and {}",
                topology.label(),
                n - 1,
                legs.len(),
                intrinsics.len()
            )));
        }
        let mut from_first = vec![Iso3::identity()];
        for leg in legs {
            let prev = from_first[from_first.len() - 1];
            from_first.push(compose_triplet(&prev, leg));
        }
        let poses = relative_to_primary(&from_first, topology.primary()).ok_or_else(|| {
            CalibrationError::Configuration(format!("{}: bad primary index", topology.label()))
        })?;
        Ok(Self {
            cameras: topology.cameras().to_vec(),
            primary: topology.primary(),
            poses,
            intrinsics,
        })
    }

    /// Extrinsics of every non-primary camera, keyed by camera name.
    pub fn extrinsics(&self) -> Result<Vec<(String, Extrinsics)>, CalibrationError> {
        let primary = &self.intrinsics[self.primary];
        (0..self.cameras.len())
            .filter(|&i| i != self.primary)
            .map(|i| {
                Extrinsics::from_pose(&self.poses[i], primary, &self.intrinsics[i])
                    .map(|e| (self.cameras[i].clone(), e))
                    .ok_or_else(|| {
                        CalibrationError::GeometricDegeneracy(format!(
                            "camera matrix of {} or {} is singular",
                            self.cameras[self.primary], self.cameras[i]
                        ))
                    })
            })
            .collect()
    }
}

/// Files a unit writes once it succeeded.
#[derive(Clone, Debug, Default)]
pub struct PendingArtifacts {
    pub intrinsics: Vec<(PathBuf, CameraIntrinsics)>,
    pub extrinsics: Vec<(PathBuf, Extrinsics)>,
}

impl PendingArtifacts {
    /// Queue `Extrinsics_<primary>_<camera>` for every non-primary camera.
    pub fn for_solution(
        solution: &RigSolution,
        intrinsics: Vec<(PathBuf, CameraIntrinsics)>,
        extrinsics_dir: PathBuf,
    ) -> Result<Self, CalibrationError> {
        let primary = &solution.cameras[solution.primary];
        let extrinsics = solution
            .extrinsics()?
            .into_iter()
            .map(|(cam, e)| (extrinsics_dir.join(extrinsics_file_name(primary, &cam)), e))
            .collect();
        Ok(Self {
            intrinsics,
            extrinsics,
        })
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.intrinsics
            .iter()
            .map(|(p, _)| p.clone())
            .chain(self.extrinsics.iter().map(|(p, _)| p.clone()))
            .collect()
    }

    pub fn commit(&self) -> Result<(), CalibrationError> {
        for (path, cam) in &self.intrinsics {
            write_intrinsics(path, cam)?;
            log::info!("wrote {}", path.display());
        }
        for (path, ext) in &self.extrinsics {
            write_extrinsics(path, ext)?;
            log::info!("wrote {}", path.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use multicam_core::{Distortion, Pt3};
    use nalgebra::{Translation3, UnitQuaternion};

    fn pose(rx: f64, ry: f64, rz: f64, t: [f64; 3]) -> Iso3 {
        Iso3::from_parts(
            Translation3::new(t[0], t[1], t[2]),
            UnitQuaternion::from_euler_angles(rx, ry, rz),
        )
    }

    #[test]
    fn identity_legs_compose_to_identity() {
        let c = compose_triplet(&Iso3::identity(), &Iso3::identity());
        assert_abs_diff_eq!(c.translation.vector.norm(), 0.0);
        assert_abs_diff_eq!(c.rotation.angle(), 0.0);
    }

    #[test]
    fn composition_matches_ground_truth_rig() {
        // world = camera A
        let b = pose(0.05, -0.4, 0.02, [-300.0, 10.0, 40.0]);
        let c = pose(-0.03, -0.9, 0.05, [-520.0, 25.0, 210.0]);
        let a_to_b = b;
        let b_to_c = c * b.inverse();
        let a_to_c = compose_triplet(&a_to_b, &b_to_c);
        assert_abs_diff_eq!(a_to_c.to_homogeneous(), c.to_homogeneous(), epsilon = 1e-9);

        // explicit R, T formula
        let r1 = a_to_b.rotation.to_rotation_matrix().into_inner();
        let r2 = b_to_c.rotation.to_rotation_matrix().into_inner();
        let t = r2 * a_to_b.translation.vector + b_to_c.translation.vector;
        assert_abs_diff_eq!(
            a_to_c.rotation.to_rotation_matrix().into_inner(),
            r2 * r1,
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(a_to_c.translation.vector, t, epsilon = 1e-9);

        // a point seen from C agrees both ways
        let x = Pt3::new(12.0, -40.0, 900.0);
        assert_abs_diff_eq!((a_to_c * x).coords, (c * x).coords, epsilon = 1e-9);
    }

    #[test]
    fn reexpressing_relative_to_middle_camera() {
        let b = pose(0.0, -0.3, 0.0, [-200.0, 0.0, 0.0]);
        let c = pose(0.0, -0.6, 0.0, [-380.0, 0.0, 60.0]);
        let rel = relative_to_primary(&[Iso3::identity(), b, c], 1).expect("primary");
        assert_abs_diff_eq!(
            rel[1].to_homogeneous(),
            Iso3::identity().to_homogeneous(),
            epsilon = 1e-12
        );
        let x = Pt3::new(5.0, 6.0, 700.0);
        // X_C = rel_c * X_B
        assert_abs_diff_eq!((rel[2] * (b * x)).coords, (c * x).coords, epsilon = 1e-9);
        assert_abs_diff_eq!((rel[0] * (b * x)).coords, x.coords, epsilon = 1e-9);
    }

    #[test]
    fn triplet_artifacts_name_primary_first() {
        let topo = CameraTopology::triplet("A", "B", "C").expect("topology");
        let cam =
            CameraIntrinsics::from_params(900.0, 900.0, 320.0, 240.0, Distortion::default());
        let leg = pose(0.0, -0.2, 0.0, [-100.0, 0.0, 0.0]);
        let sol = RigSolution::from_legs(&topo, &[leg, leg], vec![cam.clone(), cam.clone(), cam])
            .expect("solution");
        let artifacts = PendingArtifacts::for_solution(&sol, Vec::new(), PathBuf::from("/out"))
            .expect("artifacts");
        let names: Vec<_> = artifacts
            .paths()
            .iter()
            .filter_map(|p| p.file_name().and_then(|s| s.to_str()).map(str::to_string))
            .collect();
        assert_eq!(names, vec!["Extrinsics_A_B.json", "Extrinsics_A_C.json"]);
    }
}
