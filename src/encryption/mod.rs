pub mod frame;
pub mod registry;
pub mod session;

pub use frame::{read_frame, read_frames_all, write_frame, MAX_CHUNK_LEN};
pub use registry::EncryptionRegistry;
pub use session::{EncryptionSession, EncryptionSessionError, SessionStatus};
