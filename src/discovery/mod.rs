pub mod device;
pub mod engine;
pub mod registry;

pub use device::{AnnouncedPeer, Device};
pub use engine::{DiscoveryEngine, MULTICAST_GROUP, MULTICAST_PORT};
pub use registry::PeerRegistry;
