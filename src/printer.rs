//! Printer objects
//!
//! A printer binds a device URI to a driver record and carries the
//! mutable runtime state: current printer-state, state reasons, the job
//! queue, and the completed-job ring.  Mutable state sits behind a
//! reader-writer lock so IPP responses can snapshot it while the worker
//! updates it.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, RwLock};
use std::time::SystemTime;

use bitflags::bitflags;

use crate::device::DeviceUri;
use crate::drivers::Driver;
use crate::options::AttrTable;

bitflags! {
    /// printer-state-reasons bit values
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StateReasons: u32 {
        const OTHER = 1 << 0;
        const COVER_OPEN = 1 << 1;
        const INPUT_TRAY_MISSING = 1 << 2;
        const MARKER_SUPPLY_EMPTY = 1 << 3;
        const MARKER_SUPPLY_LOW = 1 << 4;
        const MARKER_WASTE_ALMOST_FULL = 1 << 5;
        const MARKER_WASTE_FULL = 1 << 6;
        const MEDIA_EMPTY = 1 << 7;
        const MEDIA_JAM = 1 << 8;
        const MEDIA_LOW = 1 << 9;
        const MEDIA_NEEDED = 1 << 10;
        const MOVING_TO_PAUSED = 1 << 11;
        const PAUSED = 1 << 12;
        const SPOOL_AREA_FULL = 1 << 13;
        const TONER_EMPTY = 1 << 14;
        const TONER_LOW = 1 << 15;
        const OFFLINE = 1 << 16;
    }
}

impl StateReasons {
    /// IPP keywords for the set bits; `none` is implied when empty
    pub fn keywords(self) -> Vec<&'static str> {
        const NAMES: [(StateReasons, &str); 17] = [
            (StateReasons::OTHER, "other"),
            (StateReasons::COVER_OPEN, "cover-open"),
            (StateReasons::INPUT_TRAY_MISSING, "input-tray-missing"),
            (StateReasons::MARKER_SUPPLY_EMPTY, "marker-supply-empty"),
            (StateReasons::MARKER_SUPPLY_LOW, "marker-supply-low"),
            (
                StateReasons::MARKER_WASTE_ALMOST_FULL,
                "marker-waste-almost-full",
            ),
            (StateReasons::MARKER_WASTE_FULL, "marker-waste-full"),
            (StateReasons::MEDIA_EMPTY, "media-empty"),
            (StateReasons::MEDIA_JAM, "media-jam"),
            (StateReasons::MEDIA_LOW, "media-low"),
            (StateReasons::MEDIA_NEEDED, "media-needed"),
            (StateReasons::MOVING_TO_PAUSED, "moving-to-paused"),
            (StateReasons::PAUSED, "paused"),
            (StateReasons::SPOOL_AREA_FULL, "spool-area-full"),
            (StateReasons::TONER_EMPTY, "toner-empty"),
            (StateReasons::TONER_LOW, "toner-low"),
            (StateReasons::OFFLINE, "offline"),
        ];

        NAMES
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect()
    }
}

/// printer-state values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PrinterState {
    /// Nothing to do, device closed
    #[default]
    Idle,
    /// A job is printing
    Processing,
    /// The device is unavailable; jobs stay queued
    Stopped,
}

#[derive(Debug)]
pub(crate) struct PrinterStatus {
    pub state: PrinterState,
    pub reasons: StateReasons,
    pub state_time: SystemTime,
    pub status_time: SystemTime,
    pub impressions_completed: u32,
}

#[derive(Debug, Default)]
pub(crate) struct PrinterQueue {
    /// Job ids waiting, FIFO
    pub active: VecDeque<u32>,
    /// The job currently printing, if any
    pub processing: Option<u32>,
    /// Terminal jobs awaiting garbage collection
    pub completed: VecDeque<u32>,
}

/// A configured printer
pub struct Printer {
    /// Stable printer id
    pub id: u32,
    /// printer-name
    pub name: String,
    /// The device this printer drives
    pub device_uri: DeviceUri,
    /// Immutable driver record
    pub driver: Driver,
    /// Capability attributes, opaque to the core
    attrs: RwLock<AttrTable>,
    status: RwLock<PrinterStatus>,
    pub(crate) queue: Mutex<PrinterQueue>,
    pub(crate) queue_cond: Condvar,
    /// Held while a device handle is open; enforces at most one
    pub(crate) device_gate: Mutex<()>,
}

impl Printer {
    pub(crate) fn new(
        id: u32,
        name: String,
        device_uri: DeviceUri,
        driver: Driver,
        attrs: AttrTable,
    ) -> Printer {
        Printer {
            id,
            name,
            device_uri,
            driver,
            attrs: RwLock::new(attrs),
            status: RwLock::new(PrinterStatus {
                state: PrinterState::Idle,
                reasons: StateReasons::empty(),
                state_time: SystemTime::now(),
                status_time: SystemTime::UNIX_EPOCH,
                impressions_completed: 0,
            }),
            queue: Mutex::new(PrinterQueue::default()),
            queue_cond: Condvar::new(),
            device_gate: Mutex::new(()),
        }
    }

    /// Current printer-state
    pub fn state(&self) -> PrinterState {
        self.status.read().unwrap_or_else(std::sync::PoisonError::into_inner).state
    }

    /// Current printer-state-reasons
    pub fn state_reasons(&self) -> StateReasons {
        self.status
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .reasons
    }

    /// printer-state-change-time
    pub fn state_changed_at(&self) -> SystemTime {
        self.status
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .state_time
    }

    /// When the state reasons were last refreshed from the device
    pub fn status_updated_at(&self) -> SystemTime {
        self.status
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .status_time
    }

    /// Total impressions completed on this printer
    pub fn impressions_completed(&self) -> u32 {
        self.status
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .impressions_completed
    }

    /// Snapshot of the capability attributes
    pub fn attributes(&self) -> AttrTable {
        self.attrs
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Replace the capability attributes (Set-Printer-Attributes)
    pub fn set_attributes(&self, attrs: AttrTable) {
        *self
            .attrs
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = attrs;
    }

    pub(crate) fn set_state(&self, state: PrinterState) {
        let mut status = self
            .status
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if status.state != state {
            status.state = state;
            status.state_time = SystemTime::now();
        }
    }

    pub(crate) fn set_reasons(&self, reasons: StateReasons) {
        let mut status = self
            .status
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        status.reasons = reasons;
        status.status_time = SystemTime::now();
    }

    pub(crate) fn add_impressions(&self, count: u32) {
        self.status
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .impressions_completed += count;
    }
}

impl std::fmt::Debug for Printer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Printer")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("device_uri", &self.device_uri.to_string())
            .field("driver", &self.driver.name)
            .finish_non_exhaustive()
    }
}
