//! Electrical-conductivity smoothing and nutrient-dosing PID controller
//! (§4.7). Runs once per incoming `ec` reading; never commands the
//! appliance directly, only updates the device's published status (C11).

use serde::{Deserialize, Serialize};

const REF_TEMP_C: f64 = 25.0;
const TEMP_COMPENSATION_PER_DEGREE: f64 = 0.0235;
const SMOOTHING_PREVIOUS_WEIGHT: f64 = 0.75;
const SMOOTHING_NEW_WEIGHT: f64 = 0.25;

const PID_REFERENCE: f64 = 1425.0;
const PID_KP: f64 = 0.05;
const PID_KI: f64 = 0.0000002;
const PID_KD: f64 = 150.0;

const NUTRIENT_QUANTUM: i32 = 5;

/// Nutrient-request PID state, persisted across restarts as part of the
/// device snapshot (§6 `NutrientPID`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct PidState {
    integral: f64,
    prev_error: f64,
}

/// EC controller state owned by a device: smoothed reading, PID state, and
/// the monotonically-latched nutrient request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct EcController {
    smoothed: Option<f64>,
    pid: PidState,
    want_nutrient: i32,
    last_update: Option<i64>,
}

impl EcController {
    pub fn want_nutrient(&self) -> i32 {
        self.want_nutrient
    }

    pub fn smoothed(&self) -> Option<f64> {
        self.smoothed
    }

    /// Feeds a new EC reading (already adjusted for tank temperature) at
    /// time `t` (unix seconds). Returns the updated nutrient request.
    pub fn update(&mut self, ec: f64, tank_temp_c: f64, t: i64) -> i32 {
        let comp = ec / (1.0 - TEMP_COMPENSATION_PER_DEGREE * (tank_temp_c - REF_TEMP_C));

        let smoothed = match self.smoothed {
            None => comp,
            Some(prev) => SMOOTHING_PREVIOUS_WEIGHT * prev + SMOOTHING_NEW_WEIGHT * comp,
        };
        self.smoothed = Some(smoothed);

        let dt = match self.last_update {
            None => 0.0,
            Some(prev_t) => (t - prev_t).max(0) as f64,
        };
        self.last_update = Some(t);

        let error = PID_REFERENCE - smoothed;
        self.pid.integral += error * dt;
        let derivative = if dt > 0.0 {
            (error - self.pid.prev_error) / dt
        } else {
            0.0
        };
        self.pid.prev_error = error;

        let control_signal = PID_KP * error + PID_KI * self.pid.integral + PID_KD * derivative;
        let quantised = (control_signal / NUTRIENT_QUANTUM as f64).floor() as i32 * NUTRIENT_QUANTUM;

        if quantised > self.want_nutrient {
            self.want_nutrient = quantised;
        }
        self.want_nutrient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_reading_sets_smoothed_directly() {
        let mut ctrl = EcController::default();
        ctrl.update(1425.0, 25.0, 1000);
        assert_eq!(ctrl.smoothed(), Some(1425.0));
    }

    #[test]
    fn temperature_compensation_inverts_above_reference() {
        let mut ctrl = EcController::default();
        // At 30C, comp = ec / (1 - 0.0235*5) = ec / 0.8825, i.e. amplified.
        ctrl.update(1000.0, 30.0, 1000);
        assert!(ctrl.smoothed().unwrap() > 1000.0);
    }

    #[test]
    fn temperature_compensation_is_noop_at_reference() {
        let mut ctrl = EcController::default();
        ctrl.update(1000.0, 25.0, 1000);
        assert!((ctrl.smoothed().unwrap() - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn subsequent_readings_are_exponentially_smoothed() {
        let mut ctrl = EcController::default();
        ctrl.update(1000.0, 25.0, 1000);
        ctrl.update(2000.0, 25.0, 1010);
        // 0.75*1000 + 0.25*2000 = 1250
        assert!((ctrl.smoothed().unwrap() - 1250.0).abs() < 1e-9);
    }

    #[test]
    fn nutrient_request_is_monotonically_latched() {
        let mut ctrl = EcController::default();
        // Far below reference -> large positive control signal -> high request.
        ctrl.update(500.0, 25.0, 1000);
        let first = ctrl.want_nutrient();
        assert!(first > 0);
        // Reading now close to reference: control signal drops, but the
        // latch must not decrease.
        ctrl.update(1425.0, 25.0, 1010);
        assert!(ctrl.want_nutrient() >= first);
    }

    #[test]
    fn nutrient_request_is_quantised_to_multiples_of_five() {
        let mut ctrl = EcController::default();
        ctrl.update(100.0, 25.0, 1000);
        assert_eq!(ctrl.want_nutrient() % NUTRIENT_QUANTUM, 0);
    }
}
