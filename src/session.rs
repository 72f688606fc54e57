//! Liveness tracking for one end of a charging link.
//!
//! A session is `Idle` until the first valid frame addressed to it (or to
//! broadcast) arrives, then `Active` for as long as frames keep arriving
//! within the timeout. While active, the time between consecutive frames is
//! used to integrate charge into the battery.

use crate::battery::Battery;
use crate::protocol::{Address, Frame, Status, StatusFlags};
use crate::Error;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Manager,
    Charger,
}

impl Role {
    /// The bus address a node in this role receives on.
    pub fn address(self) -> u8 {
        match self {
            Role::Manager => Address::Manager as u8,
            Role::Charger => Address::Charger as u8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active,
}

/// Outcome of offering a frame to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Not addressed to us, nothing changed.
    Ignored,
    /// First frame after being idle; no charge integrated.
    Activated,
    /// Frame accepted while active.
    Charged {
        elapsed: Duration,
        output_amps: f64,
    },
}

#[derive(Debug, Clone)]
pub struct ChargeSession {
    role: Role,
    timeout: Duration,
    peer_last_seen: Option<Instant>,
    active: bool,
    enabled: bool,
    commanded_volts: f64,
    commanded_amps: f64,
    output_amps: f64,
    status_flags: StatusFlags,
    battery: Battery,
}

impl ChargeSession {
    pub fn new(role: Role, battery: Battery, timeout: Duration) -> Self {
        Self {
            role,
            timeout,
            peer_last_seen: None,
            active: false,
            enabled: false,
            commanded_volts: 0.0,
            commanded_amps: 0.0,
            output_amps: 0.0,
            status_flags: StatusFlags::default(),
            battery,
        }
    }

    /// Decodes `frame` and, if it is ours, applies it at `now`.
    ///
    /// Malformed frames are returned as errors before any state changes.
    pub fn accept(&mut self, frame: &Frame, now: Instant) -> Result<Update, Error> {
        match Status::decode(frame, self.role.address())? {
            Some(status) => Ok(self.apply(&status, now)),
            None => Ok(Update::Ignored),
        }
    }

    /// Applies an already decoded frame received at `now`.
    ///
    /// In the charger role a command with the enable bit clear keeps the
    /// link alive but delivers no current, the same as when the battery
    /// voltage is above the commanded voltage.
    pub fn apply(&mut self, status: &Status, now: Instant) -> Update {
        self.commanded_volts = status.voltage;
        self.commanded_amps = status.current;
        match self.role {
            Role::Charger => {
                self.enabled = status.enable();
                self.status_flags.timeout = false;
            }
            Role::Manager => {
                self.enabled = true;
                self.status_flags = status.flags;
            }
        }

        let update = match (self.active, self.peer_last_seen) {
            (true, Some(last_seen)) => {
                // whole seconds only, like a wall clock
                let elapsed =
                    Duration::from_secs(now.saturating_duration_since(last_seen).as_secs());
                if !self.enabled || self.battery.voltage() > status.voltage {
                    // the charger cannot push current backwards
                    self.output_amps = 0.0;
                } else {
                    self.battery
                        .charge(status.voltage, status.current, elapsed.as_secs_f64());
                    self.output_amps = status.current;
                }
                log::trace!(
                    "Integrated {:.2}A over {elapsed:?}, battery at {:.2}V",
                    self.output_amps,
                    self.battery.voltage()
                );
                Update::Charged {
                    elapsed,
                    output_amps: self.output_amps,
                }
            }
            _ => {
                log::info!(
                    "Session active, peer {:02X} set {:.2}V {:.2}A",
                    status.source,
                    status.voltage,
                    status.current
                );
                self.active = true;
                Update::Activated
            }
        };
        self.peer_last_seen = Some(now);
        update
    }

    /// Drops to idle when no frame arrived for longer than the timeout.
    ///
    /// The last commanded voltage is kept so the charger can go on
    /// reporting it together with the timeout flag; only the current drops
    /// to zero.
    ///
    /// Returns `true` on the Active to Idle transition only.
    pub fn check_timeout(&mut self, now: Instant) -> bool {
        let Some(last_seen) = self.peer_last_seen else {
            return false;
        };
        if !self.active || now.saturating_duration_since(last_seen) <= self.timeout {
            return false;
        }
        log::info!(
            "Session timed out, no frame for {:?}",
            now.saturating_duration_since(last_seen)
        );
        self.active = false;
        self.status_flags.timeout = true;
        self.commanded_amps = 0.0;
        self.output_amps = 0.0;
        true
    }

    pub fn state(&self) -> SessionState {
        if self.active {
            SessionState::Active
        } else {
            SessionState::Idle
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn peer_last_seen(&self) -> Option<Instant> {
        self.peer_last_seen
    }

    pub fn commanded_volts(&self) -> f64 {
        self.commanded_volts
    }

    pub fn commanded_amps(&self) -> f64 {
        self.commanded_amps
    }

    /// Current actually delivered into the battery over the last interval.
    pub fn output_amps(&self) -> f64 {
        self.output_amps
    }

    pub fn status_flags(&self) -> StatusFlags {
        self.status_flags
    }

    pub fn battery(&self) -> &Battery {
        &self.battery
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{frame_id, pack_command};

    const MANAGER: u8 = Address::Manager as u8;
    const CHARGER: u8 = Address::Charger as u8;

    fn session() -> ChargeSession {
        ChargeSession::new(Role::Charger, Battery::new(3.0, 4), Duration::from_secs(2))
    }

    fn command(volts: f64, amps: f64) -> Frame {
        pack_command(MANAGER, CHARGER, volts, amps, true).unwrap()
    }

    #[test]
    fn idle_until_first_frame() {
        let mut session = session();
        let start = Instant::now();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!session.check_timeout(start + Duration::from_secs(60)));
        assert!(!session.status_flags().timeout);

        let update = session.accept(&command(16.6, 3.0), start).unwrap();
        assert_eq!(update, Update::Activated);
        assert!(session.is_active());
        assert_eq!(session.peer_last_seen(), Some(start));
        assert_eq!(session.commanded_volts(), 16.6);
        assert_eq!(session.commanded_amps(), 3.0);
        // nothing to integrate against yet
        assert_eq!(session.battery().charge_state_ah(), 1.5);
    }

    #[test]
    fn active_frames_integrate_elapsed_whole_seconds() {
        let mut session = session();
        let start = Instant::now();
        session.accept(&command(16.6, 3.0), start).unwrap();

        let later = start + Duration::from_millis(60_900);
        let update = session.accept(&command(16.6, 3.0), later).unwrap();
        assert_eq!(
            update,
            Update::Charged {
                elapsed: Duration::from_secs(60),
                output_amps: 3.0
            }
        );
        assert_eq!(session.battery().charge_state_ah(), 1.55);
        assert_eq!(session.peer_last_seen(), Some(later));
    }

    #[test]
    fn supply_below_battery_delivers_nothing() {
        let mut session = session();
        let start = Instant::now();
        session.accept(&command(14.0, 3.0), start).unwrap();
        let update = session
            .accept(&command(14.0, 3.0), start + Duration::from_secs(60))
            .unwrap();
        assert_eq!(
            update,
            Update::Charged {
                elapsed: Duration::from_secs(60),
                output_amps: 0.0
            }
        );
        assert_eq!(session.output_amps(), 0.0);
        assert_eq!(session.battery().charge_state_ah(), 1.5);
        // the setpoint is still recorded
        assert_eq!(session.commanded_volts(), 14.0);
    }

    #[test]
    fn disabled_command_delivers_nothing() {
        let mut session = session();
        let start = Instant::now();
        let frame = pack_command(MANAGER, CHARGER, 16.6, 3.0, false).unwrap();
        session.accept(&frame, start).unwrap();
        session.accept(&frame, start + Duration::from_secs(60)).unwrap();
        assert_eq!(session.output_amps(), 0.0);
        assert_eq!(session.battery().charge_state_ah(), 1.5);
    }

    #[test]
    fn foreign_frames_change_nothing() {
        let mut session = session();
        let start = Instant::now();
        let frame = pack_command(CHARGER, MANAGER, 16.6, 3.0, true).unwrap();
        assert_eq!(session.accept(&frame, start), Ok(Update::Ignored));
        assert!(!session.is_active());
        assert_eq!(session.peer_last_seen(), None);
        assert_eq!(session.commanded_volts(), 0.0);
    }

    #[test]
    fn broadcast_frames_are_accepted() {
        let mut session = session();
        let frame = Frame::new(
            frame_id(Address::Broadcast as u8, MANAGER),
            &[0x00, 0xA6, 0x00, 0x1E, 0x01],
        )
        .unwrap();
        assert_eq!(session.accept(&frame, Instant::now()), Ok(Update::Activated));
        assert_eq!(session.commanded_volts(), 16.6);
    }

    #[test]
    fn malformed_frames_never_reach_the_session() {
        let mut session = session();
        let frame = Frame::new(frame_id(CHARGER, MANAGER), &[0x00, 0xA6, 0x00]).unwrap();
        assert_eq!(
            session.accept(&frame, Instant::now()),
            Err(Error::MalformedFrame { length: 3 })
        );
        assert!(!session.is_active());
        assert_eq!(session.peer_last_seen(), None);
    }

    #[test]
    fn timeout_and_recovery() {
        let mut session = session();
        let start = Instant::now();
        session.accept(&command(16.6, 3.0), start).unwrap();
        session
            .accept(&command(16.6, 3.0), start + Duration::from_secs(1))
            .unwrap();

        // exactly at the timeout is still alive
        assert!(!session.check_timeout(start + Duration::from_secs(3)));
        assert!(session.is_active());

        let charge = session.battery().charge_state_ah();
        assert!(session.check_timeout(start + Duration::from_millis(3001)));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.status_flags().timeout);
        assert_eq!(session.commanded_volts(), 16.6);
        assert_eq!(session.commanded_amps(), 0.0);
        assert_eq!(session.output_amps(), 0.0);
        assert_eq!(session.battery().charge_state_ah(), charge);
        // only the transition is reported
        assert!(!session.check_timeout(start + Duration::from_secs(10)));

        let update = session
            .accept(&command(16.6, 3.0), start + Duration::from_secs(30))
            .unwrap();
        assert_eq!(update, Update::Activated);
        assert!(session.is_active());
        assert!(!session.status_flags().timeout);
        // the idle gap is not integrated
        assert_eq!(session.battery().charge_state_ah(), charge);
    }

    #[test]
    fn manager_session_keeps_reported_faults() {
        let mut session =
            ChargeSession::new(Role::Manager, Battery::new(3.0, 4), Duration::from_secs(2));
        let frame = Frame::new(0x1806F4E5, &[0x01, 0x00, 0x00, 0x10, 0x08]).unwrap();
        assert_eq!(session.accept(&frame, Instant::now()), Ok(Update::Activated));
        assert!(session.status_flags().no_battery);
        assert_eq!(session.commanded_volts(), 25.6);
    }
}
