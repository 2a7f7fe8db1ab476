//! Registration parameters and the knobs that act on them.

use crate::fit::ScaleParams;
use crate::Vector3;

/// Rotation, translation and scale of the MRI relative to the head frame.
///
/// Defaults to the no-op registration: zero rotation and translation, unit
/// scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegistrationParameters {
    /// Rotation about x, y, z (radians).
    pub rotation: Vector3,
    /// Translation (metres).
    pub translation: Vector3,
    /// Scale factor per axis.
    pub scale: Vector3,
}

impl Default for RegistrationParameters {
    fn default() -> Self {
        Self {
            rotation: Vector3::zeros(),
            translation: Vector3::zeros(),
            scale: Vector3::new(1.0, 1.0, 1.0),
        }
    }
}

impl RegistrationParameters {
    /// `[rx, ry, rz, tx, ty, tz, sx, sy, sz]`
    pub fn to_array(&self) -> [f64; 9] {
        let (r, t, s) = (self.rotation, self.translation, self.scale);
        [r.x, r.y, r.z, t.x, t.y, t.z, s.x, s.y, s.z]
    }

    pub fn from_array(a: [f64; 9]) -> Self {
        Self {
            rotation: Vector3::new(a[0], a[1], a[2]),
            translation: Vector3::new(a[3], a[4], a[5]),
            scale: Vector3::new(a[6], a[7], a[8]),
        }
    }

    fn get_mut(&mut self, kind: ParameterKind) -> &mut Vector3 {
        match kind {
            ParameterKind::Rotation => &mut self.rotation,
            ParameterKind::Translation => &mut self.translation,
            ParameterKind::Scale => &mut self.scale,
        }
    }

    /// Step one parameter by `±step` along `axis`.
    pub(crate) fn nudged(
        mut self,
        kind: ParameterKind,
        axis: Axis,
        direction: Direction,
        steps: &ParameterSteps,
    ) -> Self {
        let delta = direction.sign() * steps.step(kind);
        self.get_mut(kind)[axis.index()] += delta;
        self
    }
}

/// How the MRI may be scaled to fit the head shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScaleMode {
    /// No scaling; the MRI is only rotated and translated.
    #[default]
    None,
    /// A single factor applied to all three axes.
    Uniform,
    /// Independent factors for x, y and z.
    ThreeAxis,
}

impl ScaleMode {
    pub fn n_scale_params(self) -> usize {
        match self {
            ScaleMode::None => 0,
            ScaleMode::Uniform => 1,
            ScaleMode::ThreeAxis => 3,
        }
    }

    pub(crate) fn fit_params(self) -> ScaleParams {
        match self {
            ScaleMode::None => ScaleParams::None,
            ScaleMode::Uniform => ScaleParams::Uniform,
            ScaleMode::ThreeAxis => ScaleParams::ThreeAxis,
        }
    }
}

/// Relative weights of the three fiducial correspondences in every fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FiducialWeights {
    pub lpa: f64,
    pub nasion: f64,
    pub rpa: f64,
}

impl Default for FiducialWeights {
    fn default() -> Self {
        Self {
            lpa: 1.0,
            nasion: 1.0,
            rpa: 1.0,
        }
    }
}

impl FiducialWeights {
    /// Weights in `[LPA, Nasion, RPA]` order.
    pub fn as_array(&self) -> [f64; 3] {
        [self.lpa, self.nasion, self.rpa]
    }
}

/// Increment used when nudging a parameter by hand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterSteps {
    /// Rotation step (radians). Default 0.01.
    pub rotation: f64,
    /// Translation step (metres). Default 0.001.
    pub translation: f64,
    /// Scale step. Default 0.01.
    pub scale: f64,
}

impl Default for ParameterSteps {
    fn default() -> Self {
        Self {
            rotation: 0.01,
            translation: 0.001,
            scale: 0.01,
        }
    }
}

impl ParameterSteps {
    pub fn step(&self, kind: ParameterKind) -> f64 {
        match kind {
            ParameterKind::Rotation => self.rotation,
            ParameterKind::Translation => self.translation,
            ParameterKind::Scale => self.scale,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    Rotation,
    Translation,
    Scale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Increase,
    Decrease,
}

impl Direction {
    fn sign(self) -> f64 {
        match self {
            Direction::Increase => 1.0,
            Direction::Decrease => -1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_noop() {
        let p = RegistrationParameters::default();
        assert_eq!(p.to_array(), [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        assert_eq!(RegistrationParameters::from_array(p.to_array()), p);
    }

    #[test]
    fn test_nudge_moves_one_component() {
        let steps = ParameterSteps::default();
        let p = RegistrationParameters::default()
            .nudged(ParameterKind::Translation, Axis::Y, Direction::Increase, &steps)
            .nudged(ParameterKind::Scale, Axis::Z, Direction::Decrease, &steps);
        assert_eq!(p.translation, Vector3::new(0.0, 0.001, 0.0));
        assert_eq!(p.scale, Vector3::new(1.0, 1.0, 0.99));
        assert_eq!(p.rotation, Vector3::zeros());
    }

    #[test]
    fn test_scale_mode_param_counts() {
        assert_eq!(ScaleMode::None.n_scale_params(), 0);
        assert_eq!(ScaleMode::Uniform.n_scale_params(), 1);
        assert_eq!(ScaleMode::ThreeAxis.n_scale_params(), 3);
        assert_eq!(ScaleMode::ThreeAxis.fit_params().n_params(), 9);
    }
}
