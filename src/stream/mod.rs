pub mod chunk;
pub mod dispatcher;

pub use chunk::StreamChunk;
pub use dispatcher::{ChunkHandler, FrameDecoder, StreamDispatcher};
