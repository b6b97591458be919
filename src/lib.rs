//! `iot-ops` library.
//!
//! The binaries (`src/bin/`) are responsible for CLI parsing, wiring, and
//! process exit codes. The core logic lives in the library modules where it
//! can be tested deterministically with injected I/O streams and fake
//! backends.

pub mod admin;
pub mod gateway;
pub mod grafana;
pub mod influx;
pub mod mac;
pub mod model;
pub mod mqtt;
pub mod names;
pub mod overrides;
pub mod pipeline;
pub mod prompt;
pub mod registry;
#[cfg(feature = "bluer")]
pub mod scan;
pub mod tracker;

// Re-export commonly used types at the crate root
pub use mac::{MacAddress, MacSuffix};
pub use model::{Model, Reading};
pub use overrides::{OverrideEntry, OverrideMap, OverrideStore};
pub use pipeline::{DecodedMessage, process_message};
pub use registry::DeviceRecord;
pub use tracker::{Advertisement, DeviceTracker};
