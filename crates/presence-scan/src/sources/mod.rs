//! Discovery source implementations.
//!
//! - [`radio`] - short-range radio via the adapter bus
//! - [`reachability`] - `ping` per configured host
//! - [`announce`] - multicast DNS announcements via `avahi-browse`
//! - [`bus`] - the adapter bus seam and its busctl/bluetoothctl client

pub mod announce;
pub mod bus;
pub mod radio;
pub mod reachability;

pub use announce::AnnounceSource;
pub use bus::{AdapterBus, AdapterRef, BluezCli, DiscoveryFilter, ObjectMap};
pub use radio::RadioSource;
pub use reachability::ReachabilitySource;
