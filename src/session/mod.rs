pub mod store;
pub mod types;

pub use store::SessionStore;
pub use types::{DeviceInfo, DeviceType, FileMeta, Protocol, ProtocolSession, SessionStatus, UploadRequest};
