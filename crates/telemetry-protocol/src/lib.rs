//! Wire data model and TLV codec shared by the telemetry daemon's storage,
//! observer, and network layers.

mod codec;
mod record;

pub use codec::{deserialize, serialize, Decoded, START_MARKER};
pub use record::{Action, Record, Timestamp, DATA_CAP, DEV_TYPE_CAP, SERIAL_CAP, WILDCARD};
