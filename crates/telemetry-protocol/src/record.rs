use std::time::{SystemTime, UNIX_EPOCH};

use flux_utils::ArrayVec;

/// Maximum length of the `devType` field, in bytes.
pub const DEV_TYPE_CAP: usize = 6;
/// Maximum length of the `serial` field, in bytes.
pub const SERIAL_CAP: usize = 10;
/// Maximum length of the `data` payload, in bytes.
pub const DATA_CAP: usize = 80;

/// Wildcard marker for `devType`/`serial` filters.
pub const WILDCARD: &[u8] = b"*";

/// Action codes carried in the `ACTION` TLV field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Action {
    Reply = 0x0000,
    Store = 0x0001,
    GetAfter = 0x0002,
    Observe = 0x0003,
    Undefined = 0xFFFF,
}

impl Action {
    #[inline]
    pub fn from_u16(v: u16) -> Self {
        match v {
            0x0000 => Action::Reply,
            0x0001 => Action::Store,
            0x0002 => Action::GetAfter,
            0x0003 => Action::Observe,
            _ => Action::Undefined,
        }
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}

impl Default for Action {
    fn default() -> Self {
        Action::Undefined
    }
}

/// Seconds + microseconds since the epoch, matching the wire `TIME` TLV.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    pub sec: u32,
    pub usec: u32,
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp { sec: 0, usec: 0 };

    /// Current wall-clock time, truncated to the wire's 32-bit fields.
    ///
    /// Mirrors `gettimeofday` in the reference implementation: seconds and
    /// microseconds since the epoch, each wrapped into a `u32`.
    pub fn now() -> Self {
        let d = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        Timestamp { sec: d.as_secs() as u32, usec: d.subsec_micros() }
    }
}

/// The unit of data exchanged and stored by the daemon.
///
/// `priv_handle` never travels on the wire; it's stamped by the ingress layer
/// to carry the originating client's identity through sink/observer dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub timestamp: Timestamp,
    pub action: Action,
    pub dev_type: ArrayVec<u8, DEV_TYPE_CAP>,
    pub serial: ArrayVec<u8, SERIAL_CAP>,
    pub data: ArrayVec<u8, DATA_CAP>,
    pub priv_handle: u64,
}

impl Default for Record {
    fn default() -> Self {
        Record {
            timestamp: Timestamp::ZERO,
            action: Action::Undefined,
            dev_type: ArrayVec::new(),
            serial: ArrayVec::new(),
            data: ArrayVec::new(),
            priv_handle: 0,
        }
    }
}

impl Record {
    /// A record is well-formed for its action: STORE needs all three fields
    /// non-empty, GET_AFTER/OBSERVE need devType+serial, REPLY is always
    /// valid (including the empty end-of-query sentinel).
    pub fn validate(&self) -> bool {
        match self.action {
            Action::Reply => true,
            Action::Store => {
                !self.dev_type.is_empty() && !self.serial.is_empty() && !self.data.is_empty()
            }
            Action::GetAfter | Action::Observe => {
                !self.dev_type.is_empty() && !self.serial.is_empty()
            }
            Action::Undefined => false,
        }
    }

    /// True if `self` (a stored/candidate record) matches `reference` (a
    /// query or subscription filter): strictly newer, and devType/serial
    /// equal to the reference unless the reference uses the `*` wildcard.
    pub fn matches(&self, reference: &Record) -> bool {
        if self.timestamp <= reference.timestamp {
            return false;
        }
        if reference.dev_type.as_slice() != WILDCARD
            && self.dev_type.as_slice() != reference.dev_type.as_slice()
        {
            return false;
        }
        if reference.serial.as_slice() != WILDCARD
            && self.serial.as_slice() != reference.serial.as_slice()
        {
            return false;
        }
        true
    }

    /// Builds the empty end-of-query REPLY sentinel sent after every
    /// GET_AFTER scan.
    pub fn empty_reply() -> Self {
        Record { action: Action::Reply, ..Record::default() }
    }
}
