//! SPDY settings
//!
//! SETTINGS frames carry a list of (flags, id, value) entries. Only
//! MAX_CONCURRENT_STREAMS and INITIAL_WINDOW_SIZE change engine behavior;
//! the remaining ids are tracked so they can be inspected.

use super::error::{Error, Result};
use super::MAX_WINDOW_SIZE;
use std::collections::BTreeMap;
use std::fmt;

/// Settings ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum SettingId {
    UploadBandwidth = 1,
    DownloadBandwidth = 2,
    RoundTripTime = 3,
    /// Streams the sender allows the receiver to open concurrently
    MaxConcurrentStreams = 4,
    CurrentCwnd = 5,
    DownloadRetransRate = 6,
    /// Initial stream send window for the receiver
    InitialWindowSize = 7,
    ClientCertificateVectorSize = 8,
}

impl SettingId {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(SettingId::UploadBandwidth),
            2 => Some(SettingId::DownloadBandwidth),
            3 => Some(SettingId::RoundTripTime),
            4 => Some(SettingId::MaxConcurrentStreams),
            5 => Some(SettingId::CurrentCwnd),
            6 => Some(SettingId::DownloadRetransRate),
            7 => Some(SettingId::InitialWindowSize),
            8 => Some(SettingId::ClientCertificateVectorSize),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SettingId::UploadBandwidth => "UPLOAD_BANDWIDTH",
            SettingId::DownloadBandwidth => "DOWNLOAD_BANDWIDTH",
            SettingId::RoundTripTime => "ROUND_TRIP_TIME",
            SettingId::MaxConcurrentStreams => "MAX_CONCURRENT_STREAMS",
            SettingId::CurrentCwnd => "CURRENT_CWND",
            SettingId::DownloadRetransRate => "DOWNLOAD_RETRANS_RATE",
            SettingId::InitialWindowSize => "INITIAL_WINDOW_SIZE",
            SettingId::ClientCertificateVectorSize => "CLIENT_CERTIFICATE_VECTOR_SIZE",
        }
    }
}

impl fmt::Display for SettingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_u32())
    }
}

/// One SETTINGS entry as it appears on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingsEntry {
    pub flags: u8,
    /// 24-bit id
    pub id: u32,
    pub value: u32,
}

impl SettingsEntry {
    /// Ask the peer to persist this value
    pub const FLAG_PERSIST_VALUE: u8 = 0x01;
    /// Value was persisted earlier and is being replayed
    pub const FLAG_PERSISTED: u8 = 0x02;

    pub fn new(id: SettingId, value: u32) -> Self {
        SettingsEntry {
            flags: 0,
            id: id.as_u32(),
            value,
        }
    }
}

/// Settings values keyed by id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    values: BTreeMap<SettingId, u32>,
}

impl Settings {
    pub fn new() -> Self {
        Settings::default()
    }

    pub fn get(&self, id: SettingId) -> Option<u32> {
        self.values.get(&id).copied()
    }

    pub fn set(&mut self, id: SettingId, value: u32) {
        self.values.insert(id, value);
    }

    pub fn max_concurrent_streams(&self) -> Option<u32> {
        self.get(SettingId::MaxConcurrentStreams)
    }

    pub fn initial_window_size(&self) -> Option<u32> {
        self.get(SettingId::InitialWindowSize)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Validate settings values
    pub fn validate(&self) -> Result<()> {
        if let Some(size) = self.initial_window_size() {
            if size == 0 || size > MAX_WINDOW_SIZE {
                return Err(Error::InvalidSettings(format!(
                    "Initial window size {} outside valid range (1-2^31-1)",
                    size
                )));
            }
        }
        Ok(())
    }

    /// Apply received entries, returning the ids whose value changed
    ///
    /// Unknown ids are ignored.
    pub fn apply(&mut self, entries: &[SettingsEntry]) -> Result<Vec<SettingId>> {
        let mut incoming = Settings::new();
        for entry in entries {
            if let Some(id) = SettingId::from_u32(entry.id) {
                incoming.set(id, entry.value);
            }
        }
        incoming.validate()?;

        let mut changed = Vec::new();
        for (id, value) in incoming.values {
            if self.values.insert(id, value) != Some(value) {
                changed.push(id);
            }
        }
        Ok(changed)
    }

    /// Entries to send, in id order
    pub fn to_entries(&self) -> Vec<SettingsEntry> {
        self.values
            .iter()
            .map(|(id, value)| SettingsEntry::new(*id, *value))
            .collect()
    }
}

/// Builder for SPDY settings
#[derive(Default)]
pub struct SettingsBuilder {
    settings: Settings,
}

impl SettingsBuilder {
    pub fn new() -> Self {
        SettingsBuilder::default()
    }

    pub fn max_concurrent_streams(mut self, max: u32) -> Self {
        self.settings.set(SettingId::MaxConcurrentStreams, max);
        self
    }

    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.settings.set(SettingId::InitialWindowSize, size);
        self
    }

    pub fn round_trip_time(mut self, millis: u32) -> Self {
        self.settings.set(SettingId::RoundTripTime, millis);
        self
    }

    /// Build the settings
    pub fn build(self) -> Result<Settings> {
        self.settings.validate()?;
        Ok(self.settings)
    }
}
