//! Work-done integration with frame compliance compensation.
//!
//! Gross work is force times travel. Part of that travel is the press frame
//! flexing, not the tool advancing into the workpiece; the strain model
//! estimates that share so `net_joules` reports only useful work.

use crate::strain::StrainModel;

/// kg·mm to joules: 9.81 m/s² × 1e-3 m/mm.
pub const JOULES_PER_KG_MM: f64 = 0.00981;

/// Integrator state for the current operation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnergyState {
    pub net_joules: f64,
    pub machine_joules: f64,
    pub prev_force_kg: f32,
    pub prev_position_mm: f64,
    pub prev_deflection_mm: f64,
    /// Position where the frame would sit unloaded, anchored at first contact
    pub baseline_position_mm: f64,
    pub contact_active: bool,
    pub prev_valid: bool,
    pub integrating: bool,
}

#[derive(Debug, Clone)]
pub struct EnergyIntegrator {
    model: StrainModel,
    contact_force_kg: f32,
    state: EnergyState,
}

impl EnergyIntegrator {
    pub const fn new(model: StrainModel, contact_force_kg: f32) -> Self {
        Self {
            model,
            contact_force_kg,
            state: EnergyState {
                net_joules: 0.0,
                machine_joules: 0.0,
                prev_force_kg: 0.0,
                prev_position_mm: 0.0,
                prev_deflection_mm: 0.0,
                baseline_position_mm: 0.0,
                contact_active: false,
                prev_valid: false,
                integrating: false,
            },
        }
    }

    pub const fn state(&self) -> &EnergyState {
        &self.state
    }

    pub const fn model(&self) -> &StrainModel {
        &self.model
    }

    /// Swap the compliance model. Any in-progress accounting is discarded.
    pub fn set_model(&mut self, model: StrainModel) {
        self.model = model;
        self.reset();
    }

    /// Clear totals and baselines.
    pub fn reset(&mut self) {
        self.state = EnergyState::default();
    }

    /// Begin a fresh operation.
    pub fn start(&mut self) {
        self.reset();
        self.state.integrating = true;
    }

    /// Continue after a pause: totals are kept, baselines re-anchor.
    pub fn resume(&mut self) {
        self.state.prev_valid = false;
        self.state.contact_active = false;
        self.state.integrating = true;
    }

    pub fn stop(&mut self) {
        self.state.integrating = false;
        self.state.prev_valid = false;
        self.state.contact_active = false;
    }

    /// Distance the tool advanced into the workpiece since first contact.
    pub fn penetration_mm(&self, position_mm: f64) -> f64 {
        if !self.state.contact_active {
            return 0.0;
        }
        ((position_mm - self.state.baseline_position_mm).abs() - self.state.prev_deflection_mm)
            .max(0.0)
    }

    /// Feed one sample. `limit_kg` of zero disables the limit.
    ///
    /// Integration stops on the sample where the force reaches the limit.
    pub fn sample(&mut self, position_mm: f64, force_kg: f32, limit_kg: f32) {
        if !self.state.integrating {
            return;
        }
        let limited = limit_kg > 0.0;
        if limited && force_kg >= limit_kg {
            tracing::trace!(force_kg, limit_kg, "energy integration stopped at limit");
            self.stop();
            return;
        }
        let force = if limited {
            force_kg.clamp(0.0, limit_kg)
        } else {
            force_kg.max(0.0)
        };

        if !self.state.contact_active {
            if force_kg < self.contact_force_kg {
                self.state.prev_position_mm = position_mm;
                return;
            }
            let deflection = f64::from(self.model.deflection_for(force));
            self.state.contact_active = true;
            self.state.baseline_position_mm = position_mm - deflection;
            self.anchor(position_mm, force, deflection);
            tracing::debug!(
                position_mm,
                force_kg = force,
                deflection_mm = deflection,
                "workpiece contact"
            );
            return;
        }

        let deflection = f64::from(self.model.deflection_for(force));
        if !self.state.prev_valid {
            self.anchor(position_mm, force, deflection);
            return;
        }

        let travel = (position_mm - self.state.prev_position_mm).abs();
        let avg_force = f64::from(force + self.state.prev_force_kg) * 0.5;
        let gross = avg_force * travel * JOULES_PER_KG_MM;
        let flex = (deflection - self.state.prev_deflection_mm).clamp(0.0, travel);
        let machine = (avg_force * flex * JOULES_PER_KG_MM).max(0.0);
        let net = (gross - machine).max(0.0);

        self.state.net_joules += net;
        self.state.machine_joules += machine;
        self.anchor(position_mm, force, deflection);
        tracing::trace!(
            travel_mm = travel,
            gross_j = gross,
            machine_j = machine,
            net_total_j = self.state.net_joules,
            "energy sample"
        );
    }

    fn anchor(&mut self, position_mm: f64, force: f32, deflection: f64) {
        self.state.prev_position_mm = position_mm;
        self.state.prev_force_kg = force;
        self.state.prev_deflection_mm = deflection;
        self.state.prev_valid = true;
    }
}
