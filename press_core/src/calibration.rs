//! Force calibration value object and the persistence seam.
//!
//! `Calibration` holds everything the controller needs to interpret force:
//! which sensing mode is authoritative, the force to torque map used when
//! limiting by drive torque, and the frame compliance polynomial. The load
//! cell's own map lives with the `LoadSensor`, but is range-checked here.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use press_traits::BoxError;
use thiserror::Error;

/// Which force source drives limit supervision and telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForceMode {
    #[default]
    LoadCell,
    ActuatorTorque,
}

impl ForceMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LoadCell => "load_cell",
            Self::ActuatorTorque => "motor_torque",
        }
    }
}

impl fmt::Display for ForceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ForceMode {
    type Err = CalibrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "load_cell" => Ok(Self::LoadCell),
            "motor_torque" => Ok(Self::ActuatorTorque),
            other => Err(CalibrationError::UnknownMode(other.to_string())),
        }
    }
}

/// `y = scale * x + offset`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearMap {
    pub scale: f32,
    pub offset: f32,
}

impl LinearMap {
    pub const fn new(scale: f32, offset: f32) -> Self {
        Self { scale, offset }
    }

    pub fn apply(&self, x: f32) -> f32 {
        self.scale.mul_add(x, self.offset)
    }

    /// Solve for `x`; `None` when the map is flat.
    pub fn invert(&self, y: f32) -> Option<f32> {
        if self.scale == 0.0 {
            None
        } else {
            Some((y - self.offset) / self.scale)
        }
    }
}

/// Torque percent for a given force in kilograms.
pub const DEFAULT_TORQUE_MAP: LinearMap = LinearMap::new(0.0335, 1.04);

/// Kilograms per raw converter count.
pub const DEFAULT_LOAD_CELL_MAP: LinearMap = LinearMap::new(-0.000_230_76, 6.5);

/// Force (kg) as a quartic in deflection (mm), highest order first.
pub const DEFAULT_STRAIN_COEFFS: [f32; 5] = [-143.0, 592.0, -365.0, 127.0, -2.15];

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("unknown force mode '{0}' (expected load_cell or motor_torque)")]
    UnknownMode(String),
    #[error("torque scale {0} outside (0, 0.2]")]
    TorqueScale(f32),
    #[error("torque offset {0} outside [-10, 10]")]
    TorqueOffset(f32),
    #[error("load cell scale {0} magnitude outside [1e-5, 1e-2]")]
    LoadCellScale(f32),
    #[error("load cell offset {0} outside (-50, 50)")]
    LoadCellOffset(f32),
    #[error("strain coefficient c{index} = {value} is not finite or exceeds 1e4")]
    StrainCoeff { index: usize, value: f32 },
}

pub fn validate_torque_scale(v: f32) -> Result<(), CalibrationError> {
    if v.is_finite() && v > 0.0 && v <= 0.2 {
        Ok(())
    } else {
        Err(CalibrationError::TorqueScale(v))
    }
}

pub fn validate_torque_offset(v: f32) -> Result<(), CalibrationError> {
    if v.is_finite() && (-10.0..=10.0).contains(&v) {
        Ok(())
    } else {
        Err(CalibrationError::TorqueOffset(v))
    }
}

pub fn validate_load_cell_scale(v: f32) -> Result<(), CalibrationError> {
    if v.is_finite() && (1e-5..=1e-2).contains(&v.abs()) {
        Ok(())
    } else {
        Err(CalibrationError::LoadCellScale(v))
    }
}

pub fn validate_load_cell_offset(v: f32) -> Result<(), CalibrationError> {
    if v.is_finite() && v > -50.0 && v < 50.0 {
        Ok(())
    } else {
        Err(CalibrationError::LoadCellOffset(v))
    }
}

pub fn validate_strain_coeffs(coeffs: &[f32; 5]) -> Result<(), CalibrationError> {
    for (i, &c) in coeffs.iter().enumerate() {
        if !c.is_finite() || c.abs() >= 1e4 {
            // c4 first, so the polynomial order is 4 - i
            return Err(CalibrationError::StrainCoeff {
                index: 4 - i,
                value: c,
            });
        }
    }
    Ok(())
}

/// Live calibration cached by the controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub force_mode: ForceMode,
    /// Force (kg) to torque (%)
    pub torque: LinearMap,
    pub strain_coeffs: [f32; 5],
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            force_mode: ForceMode::LoadCell,
            torque: DEFAULT_TORQUE_MAP,
            strain_coeffs: DEFAULT_STRAIN_COEFFS,
        }
    }
}

impl Calibration {
    pub fn validate(&self) -> Result<(), CalibrationError> {
        validate_torque_scale(self.torque.scale)?;
        validate_torque_offset(self.torque.offset)?;
        validate_strain_coeffs(&self.strain_coeffs)
    }

    /// Build from whatever the store holds, substituting defaults for
    /// missing or invalid fields. The names of substituted fields are
    /// returned so the caller can log them and write the defaults back.
    pub fn from_store(store: &dyn CalibrationStore) -> (Self, Vec<&'static str>) {
        let mut repaired = Vec::new();
        let defaults = Self::default();

        let force_mode = store.force_mode().unwrap_or_else(|| {
            repaired.push("force_mode");
            defaults.force_mode
        });
        let torque = match store.torque_map() {
            Some(m)
                if validate_torque_scale(m.scale).is_ok()
                    && validate_torque_offset(m.offset).is_ok() =>
            {
                m
            }
            _ => {
                repaired.push("torque_map");
                defaults.torque
            }
        };
        let strain_coeffs = match store.strain_coeffs() {
            Some(c) if validate_strain_coeffs(&c).is_ok() => c,
            _ => {
                repaired.push("strain_coeffs");
                defaults.strain_coeffs
            }
        };

        (
            Self {
                force_mode,
                torque,
                strain_coeffs,
            },
            repaired,
        )
    }
}

/// Load cell map from the store, or `None` when missing or invalid.
pub fn stored_load_cell_map(store: &dyn CalibrationStore) -> Option<LinearMap> {
    store.load_cell_map().filter(|m| {
        validate_load_cell_scale(m.scale).is_ok() && validate_load_cell_offset(m.offset).is_ok()
    })
}

/// Non-volatile calibration storage.
///
/// Getters return `None` for values that were never written. Encoding is
/// the store's business; the controller only sees typed values.
pub trait CalibrationStore {
    fn force_mode(&self) -> Option<ForceMode>;
    fn set_force_mode(&mut self, mode: ForceMode) -> Result<(), BoxError>;

    fn torque_map(&self) -> Option<LinearMap>;
    fn set_torque_map(&mut self, map: LinearMap) -> Result<(), BoxError>;

    fn load_cell_map(&self) -> Option<LinearMap>;
    fn set_load_cell_map(&mut self, map: LinearMap) -> Result<(), BoxError>;

    fn strain_coeffs(&self) -> Option<[f32; 5]>;
    fn set_strain_coeffs(&mut self, coeffs: [f32; 5]) -> Result<(), BoxError>;
}

impl<T: CalibrationStore + ?Sized> CalibrationStore for Box<T> {
    fn force_mode(&self) -> Option<ForceMode> {
        (**self).force_mode()
    }

    fn set_force_mode(&mut self, mode: ForceMode) -> Result<(), BoxError> {
        (**self).set_force_mode(mode)
    }

    fn torque_map(&self) -> Option<LinearMap> {
        (**self).torque_map()
    }

    fn set_torque_map(&mut self, map: LinearMap) -> Result<(), BoxError> {
        (**self).set_torque_map(map)
    }

    fn load_cell_map(&self) -> Option<LinearMap> {
        (**self).load_cell_map()
    }

    fn set_load_cell_map(&mut self, map: LinearMap) -> Result<(), BoxError> {
        (**self).set_load_cell_map(map)
    }

    fn strain_coeffs(&self) -> Option<[f32; 5]> {
        (**self).strain_coeffs()
    }

    fn set_strain_coeffs(&mut self, coeffs: [f32; 5]) -> Result<(), BoxError> {
        (**self).set_strain_coeffs(coeffs)
    }
}

/// Values held by a store.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StoredCalibration {
    pub force_mode: Option<ForceMode>,
    pub torque_map: Option<LinearMap>,
    pub load_cell_map: Option<LinearMap>,
    pub strain_coeffs: Option<[f32; 5]>,
}

/// Volatile store. Clones share the same contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryCalibrationStore {
    inner: Arc<Mutex<StoredCalibration>>,
}

impl MemoryCalibrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(contents: StoredCalibration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(contents)),
        }
    }

    pub fn snapshot(&self) -> StoredCalibration {
        self.inner.lock().map(|g| *g).unwrap_or_default()
    }

    fn update(&self, f: impl FnOnce(&mut StoredCalibration)) -> Result<(), BoxError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| BoxError::from("calibration store lock poisoned"))?;
        f(&mut guard);
        Ok(())
    }
}

impl CalibrationStore for MemoryCalibrationStore {
    fn force_mode(&self) -> Option<ForceMode> {
        self.snapshot().force_mode
    }

    fn set_force_mode(&mut self, mode: ForceMode) -> Result<(), BoxError> {
        self.update(|s| s.force_mode = Some(mode))
    }

    fn torque_map(&self) -> Option<LinearMap> {
        self.snapshot().torque_map
    }

    fn set_torque_map(&mut self, map: LinearMap) -> Result<(), BoxError> {
        self.update(|s| s.torque_map = Some(map))
    }

    fn load_cell_map(&self) -> Option<LinearMap> {
        self.snapshot().load_cell_map
    }

    fn set_load_cell_map(&mut self, map: LinearMap) -> Result<(), BoxError> {
        self.update(|s| s.load_cell_map = Some(map))
    }

    fn strain_coeffs(&self) -> Option<[f32; 5]> {
        self.snapshot().strain_coeffs
    }

    fn set_strain_coeffs(&mut self, coeffs: [f32; 5]) -> Result<(), BoxError> {
        self.update(|s| s.strain_coeffs = Some(coeffs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("load_cell", ForceMode::LoadCell)]
    #[case("motor_torque", ForceMode::ActuatorTorque)]
    fn force_mode_parses_wire_names(#[case] s: &str, #[case] mode: ForceMode) {
        assert_eq!(s.parse::<ForceMode>().unwrap(), mode);
        assert_eq!(mode.as_str(), s);
    }

    #[test]
    fn unknown_force_mode_is_rejected() {
        assert!(matches!(
            "torque".parse::<ForceMode>(),
            Err(CalibrationError::UnknownMode(_))
        ));
    }

    #[test]
    fn default_calibration_is_valid() {
        Calibration::default().validate().unwrap();
    }

    #[rstest]
    #[case(0.0)]
    #[case(-0.01)]
    #[case(0.5)]
    #[case(f32::NAN)]
    fn torque_scale_range(#[case] v: f32) {
        assert!(validate_torque_scale(v).is_err());
    }

    #[test]
    fn load_cell_scale_accepts_either_sign() {
        validate_load_cell_scale(-0.000_230_76).unwrap();
        validate_load_cell_scale(0.005).unwrap();
        assert!(validate_load_cell_scale(0.5).is_err());
        assert!(validate_load_cell_scale(1e-7).is_err());
    }

    #[test]
    fn strain_coeff_error_names_polynomial_order() {
        let err = validate_strain_coeffs(&[1.0, 2.0, 1e5, 0.0, 0.0]).unwrap_err();
        assert_eq!(
            err,
            CalibrationError::StrainCoeff {
                index: 2,
                value: 1e5
            }
        );
    }

    #[test]
    fn from_store_repairs_missing_and_invalid_fields() {
        let store = MemoryCalibrationStore::with_contents(StoredCalibration {
            force_mode: Some(ForceMode::ActuatorTorque),
            torque_map: Some(LinearMap::new(7.0, 1.0)),
            load_cell_map: None,
            strain_coeffs: None,
        });
        let (cal, repaired) = Calibration::from_store(&store);
        assert_eq!(cal.force_mode, ForceMode::ActuatorTorque);
        assert_eq!(cal.torque, DEFAULT_TORQUE_MAP);
        assert_eq!(cal.strain_coeffs, DEFAULT_STRAIN_COEFFS);
        assert_eq!(repaired, vec!["torque_map", "strain_coeffs"]);
    }

    #[test]
    fn linear_map_inverts() {
        let m = DEFAULT_TORQUE_MAP;
        let kg = m.invert(m.apply(200.0)).unwrap();
        assert!((kg - 200.0).abs() < 1e-3);
        assert!(LinearMap::new(0.0, 1.0).invert(3.0).is_none());
    }
}
