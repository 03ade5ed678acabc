pub mod engine;
pub mod io;
pub mod plan;
pub mod pool;
pub mod progress;
pub mod retry;
pub mod transfer;

pub use engine::{ChunkEngine, ChunkEngineError, ChunkEvent, ChunkManager, ChunkOutcome};
pub use io::{read_chunk_at_position, write_chunk_at_position};
pub use plan::ChunkPlan;
pub use pool::BufferPool;
pub use progress::ProgressTracker;
pub use retry::RetryPolicy;
pub use transfer::{ChunkState, TransferDirection, TransferSession, TransferStatus};
