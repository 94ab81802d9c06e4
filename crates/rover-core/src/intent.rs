//! ---
//! rover_section: "01-core-functionality"
//! rover_subsection: "module"
//! rover_type: "source"
//! rover_scope: "code"
//! rover_description: "Operator intent, dispatch and telemetry reconciliation."
//! rover_version: "v0.0.0-prealpha"
//! rover_owner: "tbd"
//! ---
//! Operator-authoritative state.
//!
//! The store is the single source of truth for what the operator wants. Drive
//! intent is read on every cadence tick; lights, horn and underglow carry a
//! revision counter so the dispatcher can tell which fields still need to be
//! written to the link. A field is pending while its revision is ahead of the
//! last revision that was successfully sent.

use rover_msg::{Command, CommandKind, Indicator, Rgb8, DRIVE_MAX, DRIVE_MIN};

/// Differential drive power, each channel in `[-100, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriveIntent {
    pub left: i32,
    pub right: i32,
}

impl DriveIntent {
    pub fn to_command(self) -> Command {
        Command::Control {
            left: self.left,
            right: self.right,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LightIntent {
    pub headlights: bool,
    pub taillights: bool,
    pub indicator: Indicator,
}

/// Underglow colour plus the raw firmware mode code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnderglowIntent {
    pub color: Rgb8,
    pub mode: u8,
}

/// Fields dispatched on change rather than on cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntentField {
    Lights,
    Horn,
    Underglow,
}

impl IntentField {
    pub const ALL: [IntentField; 3] = [IntentField::Lights, IntentField::Horn, IntentField::Underglow];

    pub const fn kind(self) -> CommandKind {
        match self {
            IntentField::Lights => CommandKind::Lights,
            IntentField::Horn => CommandKind::Horn,
            IntentField::Underglow => CommandKind::Underglow,
        }
    }
}

/// A change awaiting transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    pub field: IntentField,
    pub revision: u64,
    pub command: Command,
}

#[derive(Debug, Clone, Copy, Default)]
struct Tracked<T> {
    value: T,
    revision: u64,
    dispatched: u64,
}

impl<T: Copy> Tracked<T> {
    fn update(&mut self, value: T) -> T {
        self.value = value;
        self.revision += 1;
        value
    }

    fn is_pending(&self) -> bool {
        self.revision > self.dispatched
    }

    fn mark_dispatched(&mut self, revision: u64) {
        self.dispatched = self.dispatched.max(revision);
    }
}

#[derive(Debug, Clone, Default)]
pub struct IntentStore {
    drive: DriveIntent,
    lights: Tracked<LightIntent>,
    horn: Tracked<bool>,
    underglow: Tracked<UnderglowIntent>,
}

impl IntentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a drive vector, clamping each channel. Sent on the next tick.
    pub fn set_drive(&mut self, left: i32, right: i32) {
        self.drive = DriveIntent {
            left: left.clamp(DRIVE_MIN, DRIVE_MAX),
            right: right.clamp(DRIVE_MIN, DRIVE_MAX),
        };
    }

    /// Stop both tracks on the next tick.
    pub fn release(&mut self) {
        self.drive = DriveIntent::default();
    }

    pub fn toggle_headlights(&mut self) -> bool {
        let mut lights = self.lights.value;
        lights.headlights = !lights.headlights;
        self.lights.update(lights).headlights
    }

    pub fn toggle_taillights(&mut self) -> bool {
        let mut lights = self.lights.value;
        lights.taillights = !lights.taillights;
        self.lights.update(lights).taillights
    }

    pub fn set_indicator(&mut self, indicator: Indicator) -> Indicator {
        let mut lights = self.lights.value;
        lights.indicator = indicator;
        self.lights.update(lights).indicator
    }

    pub fn set_horn(&mut self, on: bool) -> bool {
        self.horn.update(on)
    }

    pub fn set_underglow(&mut self, color: Rgb8, mode: u8) -> UnderglowIntent {
        self.underglow.update(UnderglowIntent { color, mode })
    }

    pub fn drive(&self) -> DriveIntent {
        self.drive
    }

    pub fn lights(&self) -> LightIntent {
        self.lights.value
    }

    pub fn horn(&self) -> bool {
        self.horn.value
    }

    pub fn underglow(&self) -> UnderglowIntent {
        self.underglow.value
    }

    pub fn is_pending(&self, field: IntentField) -> bool {
        match field {
            IntentField::Lights => self.lights.is_pending(),
            IntentField::Horn => self.horn.is_pending(),
            IntentField::Underglow => self.underglow.is_pending(),
        }
    }

    /// Commands for every pending field, in a fixed order.
    pub fn pending_commands(&self) -> Vec<PendingCommand> {
        IntentField::ALL
            .into_iter()
            .filter(|field| self.is_pending(*field))
            .map(|field| PendingCommand {
                field,
                revision: self.revision(field),
                command: self.command_for(field),
            })
            .collect()
    }

    /// Record that `revision` of `field` reached the link. A newer change
    /// made in the meantime stays pending.
    pub fn mark_dispatched(&mut self, field: IntentField, revision: u64) {
        match field {
            IntentField::Lights => self.lights.mark_dispatched(revision),
            IntentField::Horn => self.horn.mark_dispatched(revision),
            IntentField::Underglow => self.underglow.mark_dispatched(revision),
        }
    }

    fn revision(&self, field: IntentField) -> u64 {
        match field {
            IntentField::Lights => self.lights.revision,
            IntentField::Horn => self.horn.revision,
            IntentField::Underglow => self.underglow.revision,
        }
    }

    fn command_for(&self, field: IntentField) -> Command {
        match field {
            IntentField::Lights => {
                let lights = self.lights.value;
                Command::Lights {
                    headlights: lights.headlights,
                    taillights: lights.taillights,
                    indicators: lights.indicator.code(),
                }
            }
            IntentField::Horn => Command::Horn {
                state: self.horn.value,
            },
            IntentField::Underglow => {
                let UnderglowIntent { color, mode } = self.underglow.value;
                Command::Underglow {
                    r: color.r,
                    g: color.g,
                    b: color.b,
                    mode,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drive_is_clamped_and_not_pending() {
        let mut store = IntentStore::new();
        store.set_drive(250, -400);
        assert_eq!(store.drive(), DriveIntent { left: 100, right: -100 });
        assert!(store.pending_commands().is_empty());
        store.release();
        assert_eq!(store.drive(), DriveIntent::default());
    }

    #[test]
    fn setters_return_updated_values_and_mark_pending() {
        let mut store = IntentStore::new();
        assert!(store.toggle_headlights());
        assert!(!store.toggle_headlights());
        assert!(store.toggle_taillights());
        assert_eq!(store.set_indicator(Indicator::Left), Indicator::Left);
        assert!(store.set_horn(true));
        let underglow = store.set_underglow(Rgb8::new(1, 2, 3), 1);
        assert_eq!(underglow.color, Rgb8::new(1, 2, 3));

        let pending = store.pending_commands();
        assert_eq!(pending.len(), 3);
        assert_eq!(
            pending[0].command,
            Command::Lights {
                headlights: false,
                taillights: true,
                indicators: 1,
            }
        );
        assert_eq!(pending[1].command, Command::Horn { state: true });
    }

    #[test]
    fn change_during_send_stays_pending() {
        let mut store = IntentStore::new();
        store.set_horn(true);
        let sent = store.pending_commands().remove(0);
        store.set_horn(false);
        store.mark_dispatched(sent.field, sent.revision);
        assert!(store.is_pending(IntentField::Horn));
        let next = store.pending_commands().remove(0);
        assert_eq!(next.command, Command::Horn { state: false });
        store.mark_dispatched(next.field, next.revision);
        assert!(!store.is_pending(IntentField::Horn));
    }

    #[test]
    fn stale_acknowledgement_does_not_regress() {
        let mut store = IntentStore::new();
        store.set_horn(true);
        store.set_horn(false);
        store.mark_dispatched(IntentField::Horn, 2);
        store.mark_dispatched(IntentField::Horn, 1);
        assert!(!store.is_pending(IntentField::Horn));
    }
}
