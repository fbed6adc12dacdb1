//! Type-state builder for `PressController`.
//!
//! The builder enforces at compile time that the actuator pair, the load
//! sensor, and the event sink are provided before `build()` is available.
//! `try_build()` is always available for dynamic checks.

use std::marker::PhantomData;
use std::sync::Arc;

use press_traits::{Actuator, Clock, LoadSensor, MonotonicClock};

use crate::calibration::{
    Calibration, CalibrationStore, DEFAULT_LOAD_CELL_MAP, LinearMap, MemoryCalibrationStore,
    stored_load_cell_map, validate_load_cell_offset, validate_load_cell_scale,
};
use crate::config::PressCfg;
use crate::controller::PressController;
use crate::error::{BuildError, Result};
use crate::events::EventSink;
use crate::hw_error::map_hw_error;

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

type ActuatorPair = [Box<dyn Actuator + Send>; 2];

/// Builder for `PressController`. Configuration is validated on `build()`.
pub struct PressBuilder<A, L, E> {
    actuators: Option<ActuatorPair>,
    sensor: Option<Box<dyn LoadSensor + Send>>,
    sink: Option<Box<dyn EventSink + Send>>,
    store: Option<Box<dyn CalibrationStore + Send>>,
    clock: Option<Box<dyn Clock + Send + Sync>>,
    cfg: Option<PressCfg>,
    _a: PhantomData<A>,
    _l: PhantomData<L>,
    _e: PhantomData<E>,
}

impl Default for PressBuilder<Missing, Missing, Missing> {
    fn default() -> Self {
        Self {
            actuators: None,
            sensor: None,
            sink: None,
            store: None,
            clock: None,
            cfg: None,
            _a: PhantomData,
            _l: PhantomData,
            _e: PhantomData,
        }
    }
}

impl PressController {
    /// Start building a controller.
    pub fn builder() -> PressBuilder<Missing, Missing, Missing> {
        PressBuilder::default()
    }
}

fn check_cfg(cfg: &PressCfg) -> std::result::Result<(), BuildError> {
    let positive = |v: f32| v.is_finite() && v > 0.0;
    if !positive(cfg.mechanics.steps_per_mm) {
        return Err(BuildError::InvalidConfig("mechanics.steps_per_mm must be > 0"));
    }
    let h = &cfg.homing;
    if ![
        h.stroke_mm,
        h.rapid_speed_mms,
        h.touch_speed_mms,
        h.backoff_speed_mms,
        h.accel_mmss,
        h.backoff_mm,
    ]
    .into_iter()
    .all(positive)
    {
        return Err(BuildError::InvalidConfig(
            "homing distances and speeds must be > 0",
        ));
    }
    if !(positive(h.search_torque_pct) && positive(h.backoff_torque_pct)) {
        return Err(BuildError::InvalidConfig("homing torque limits must be > 0"));
    }
    if h.start_timeout_ms == 0 || cfg.moves.start_timeout_ms == 0 {
        return Err(BuildError::InvalidConfig("start timeouts must be >= 1 ms"));
    }
    let m = &cfg.moves;
    if !(positive(m.default_speed_mms) && positive(m.max_speed_mms) && positive(m.accel_mmss)) {
        return Err(BuildError::InvalidConfig("move speeds must be > 0"));
    }
    if !(positive(m.default_torque_limit_pct) && m.default_torque_limit_pct <= 100.0) {
        return Err(BuildError::InvalidConfig(
            "default torque limit must be in (0, 100]",
        ));
    }
    let alpha = cfg.torque.ewma_alpha;
    if !(alpha > 0.0 && alpha <= 1.0) {
        return Err(BuildError::InvalidConfig("torque EWMA alpha must be in (0, 1]"));
    }
    let f = &cfg.force;
    if !(f.sensor_min_kg < f.sensor_max_kg) || f.safety_factor < 1.0 {
        return Err(BuildError::InvalidConfig("invalid force sensor range"));
    }
    if !positive(cfg.strain.max_deflection_mm) || cfg.strain.contact_force_kg < 0.0 {
        return Err(BuildError::InvalidConfig("invalid strain model limits"));
    }
    Ok(())
}

/// Validate configuration, restore persisted calibration, and construct.
fn validate_and_build(
    actuators: ActuatorPair,
    mut sensor: Box<dyn LoadSensor + Send>,
    sink: Box<dyn EventSink + Send>,
    mut store: Box<dyn CalibrationStore + Send>,
    clock: Option<Box<dyn Clock + Send + Sync>>,
    cfg: PressCfg,
) -> Result<PressController> {
    check_cfg(&cfg).map_err(eyre::Report::new)?;

    let (calibration, repaired) = Calibration::from_store(store.as_ref());
    for field in &repaired {
        tracing::warn!(field, "stored calibration missing or invalid; using default");
    }
    write_back_defaults(store.as_mut(), &calibration, &repaired);
    restore_load_cell_map(sensor.as_mut(), store.as_mut());

    let clock: Arc<dyn Clock + Send + Sync> = match clock {
        Some(c) => Arc::from(c),
        None => Arc::new(MonotonicClock::new()),
    };
    let mut controller =
        PressController::from_parts(actuators, sensor, sink, store, clock, cfg, calibration);
    for (name, act) in ["A", "B"].iter().zip(controller.actuators.iter_mut()) {
        act.set_enabled(true).map_err(|e| {
            eyre::Report::new(map_hw_error(&*e)).wrap_err(format!("enable actuator {name}"))
        })?;
    }
    tracing::info!(
        force_mode = calibration.force_mode.as_str(),
        "press controller ready"
    );
    Ok(controller)
}

fn write_back_defaults(store: &mut dyn CalibrationStore, cal: &Calibration, repaired: &[&str]) {
    for field in repaired {
        let res = match *field {
            "force_mode" => store.set_force_mode(cal.force_mode),
            "torque_map" => store.set_torque_map(cal.torque),
            "strain_coeffs" => store.set_strain_coeffs(cal.strain_coeffs),
            _ => Ok(()),
        };
        if let Err(e) = res {
            tracing::warn!(field, error = %e, "could not persist default calibration");
        }
    }
}

/// Push the stored load cell map into the sensor, or persist the sensor's
/// own map when the store has none worth using.
fn restore_load_cell_map(sensor: &mut (dyn LoadSensor + Send), store: &mut dyn CalibrationStore) {
    if let Some(map) = stored_load_cell_map(&*store) {
        let res = sensor
            .set_scale(map.scale)
            .and_then(|()| sensor.set_offset(map.offset));
        if let Err(e) = res {
            tracing::warn!(error = %e, "could not apply stored load cell calibration");
        }
        return;
    }
    let (scale, offset) = sensor.calibration();
    let map = if validate_load_cell_scale(scale).is_ok()
        && validate_load_cell_offset(offset).is_ok()
    {
        LinearMap::new(scale, offset)
    } else {
        tracing::warn!(scale, offset, "load cell calibration invalid; using default");
        let d = DEFAULT_LOAD_CELL_MAP;
        if let Err(e) = sensor.set_scale(d.scale).and_then(|()| sensor.set_offset(d.offset)) {
            tracing::warn!(error = %e, "could not apply default load cell calibration");
        }
        d
    };
    if let Err(e) = store.set_load_cell_map(map) {
        tracing::warn!(error = %e, "could not persist load cell calibration");
    }
}

impl<A, L, E> PressBuilder<A, L, E> {
    /// Fallible build available in any type-state; returns detailed error for missing pieces.
    pub fn try_build(self) -> Result<PressController> {
        let actuators = self
            .actuators
            .ok_or_else(|| eyre::Report::new(BuildError::MissingActuators))?;
        let sensor = self
            .sensor
            .ok_or_else(|| eyre::Report::new(BuildError::MissingLoadSensor))?;
        let sink = self
            .sink
            .ok_or_else(|| eyre::Report::new(BuildError::MissingEventSink))?;
        let store = self
            .store
            .unwrap_or_else(|| Box::new(MemoryCalibrationStore::new()));
        validate_and_build(
            actuators,
            sensor,
            sink,
            store,
            self.clock,
            self.cfg.unwrap_or_default(),
        )
    }

    pub fn with_config(mut self, cfg: PressCfg) -> Self {
        self.cfg = Some(cfg);
        self
    }

    /// Persistent calibration; defaults to an in-memory store.
    pub fn with_calibration_store(mut self, store: impl CalibrationStore + Send + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    /// Provide a custom clock implementation; defaults to `MonotonicClock` when not provided.
    pub fn with_clock(mut self, clock: Box<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }
}

// Setters that advance type-state
impl<L, E> PressBuilder<Missing, L, E> {
    pub fn with_actuators(
        self,
        a: impl Actuator + Send + 'static,
        b: impl Actuator + Send + 'static,
    ) -> PressBuilder<Set, L, E> {
        let pair: ActuatorPair = [Box::new(a), Box::new(b)];
        PressBuilder {
            actuators: Some(pair),
            sensor: self.sensor,
            sink: self.sink,
            store: self.store,
            clock: self.clock,
            cfg: self.cfg,
            _a: PhantomData,
            _l: PhantomData,
            _e: PhantomData,
        }
    }
}

impl<A, E> PressBuilder<A, Missing, E> {
    pub fn with_load_sensor(
        self,
        sensor: impl LoadSensor + Send + 'static,
    ) -> PressBuilder<A, Set, E> {
        PressBuilder {
            actuators: self.actuators,
            sensor: Some(Box::new(sensor)),
            sink: self.sink,
            store: self.store,
            clock: self.clock,
            cfg: self.cfg,
            _a: PhantomData,
            _l: PhantomData,
            _e: PhantomData,
        }
    }
}

impl<A, L> PressBuilder<A, L, Missing> {
    pub fn with_event_sink(self, sink: impl EventSink + Send + 'static) -> PressBuilder<A, L, Set> {
        PressBuilder {
            actuators: self.actuators,
            sensor: self.sensor,
            sink: Some(Box::new(sink)),
            store: self.store,
            clock: self.clock,
            cfg: self.cfg,
            _a: PhantomData,
            _l: PhantomData,
            _e: PhantomData,
        }
    }
}

impl PressBuilder<Set, Set, Set> {
    /// Validate and build. Only available when actuators, sensor, and sink are set.
    pub fn build(self) -> Result<PressController> {
        self.try_build()
    }
}
