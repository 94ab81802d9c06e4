//! ---
//! rover_section: "01-core-functionality"
//! rover_subsection: "module"
//! rover_type: "source"
//! rover_scope: "code"
//! rover_description: "Operator intent, dispatch and telemetry reconciliation."
//! rover_version: "v0.0.0-prealpha"
//! rover_owner: "tbd"
//! ---
use rover_msg::{Indicator, Rgb8, DRIVE_MAX, DRIVE_MIN};

/// Raw operator input, produced by whatever front end drives the session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    /// Joystick vector, both axes in `[-1, 1]`.
    DriveVector { forward: f64, turn: f64 },
    /// Joystick released.
    Release,
    ToggleHeadlights,
    ToggleTaillights,
    Indicator(Indicator),
    Horn(bool),
    Underglow { color: Rgb8, mode: u8 },
}

/// Map a joystick vector to differential track power.
///
/// Halves round toward positive infinity. Non-finite axes count as zero.
pub fn drive_from_vector(forward: f64, turn: f64) -> (i32, i32) {
    let forward = finite_or_zero(forward);
    let turn = finite_or_zero(turn);
    (
        scale_channel(forward - turn),
        scale_channel(forward + turn),
    )
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn scale_channel(mix: f64) -> i32 {
    let scaled = (100.0 * mix + 0.5).floor();
    scaled.clamp(f64::from(DRIVE_MIN), f64::from(DRIVE_MAX)) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_forward_drives_both_tracks() {
        assert_eq!(drive_from_vector(1.0, 0.0), (100, 100));
        assert_eq!(drive_from_vector(-1.0, 0.0), (-100, -100));
    }

    #[test]
    fn turning_in_place_counter_rotates() {
        assert_eq!(drive_from_vector(0.0, 1.0), (-100, 100));
        assert_eq!(drive_from_vector(0.0, -0.5), (50, -50));
    }

    #[test]
    fn diagonal_saturates() {
        assert_eq!(drive_from_vector(1.0, 1.0), (0, 100));
        assert_eq!(drive_from_vector(-1.0, 1.0), (-100, 0));
    }

    #[test]
    fn halves_round_up() {
        assert_eq!(drive_from_vector(0.125, 0.0), (13, 13));
        assert_eq!(drive_from_vector(-0.125, 0.0), (-12, -12));
    }

    #[test]
    fn non_finite_axes_are_ignored() {
        assert_eq!(drive_from_vector(f64::NAN, 0.3), (-30, 30));
        assert_eq!(drive_from_vector(f64::INFINITY, f64::NEG_INFINITY), (0, 0));
    }

    #[test]
    fn output_stays_in_range_across_grid() {
        let steps = 40;
        for i in 0..=steps {
            for j in 0..=steps {
                let forward = -1.0 + 2.0 * f64::from(i) / f64::from(steps);
                let turn = -1.0 + 2.0 * f64::from(j) / f64::from(steps);
                let (left, right) = drive_from_vector(forward, turn);
                assert!((DRIVE_MIN..=DRIVE_MAX).contains(&left));
                assert!((DRIVE_MIN..=DRIVE_MAX).contains(&right));
            }
        }
    }
}
