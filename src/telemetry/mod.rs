mod message;
mod sink;

pub use message::{Message, QuatRecord, Status};
pub use sink::{MessageSink, MessageStream, StreamError, sink};
