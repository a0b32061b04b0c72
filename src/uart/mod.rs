// Serial link layer to the motor microcontroller
//
// Provides:
// - Line framing of the inbound byte stream
// - Colon-delimited wire message parsing
// - Consumer registry and message dispatch (with keepalive answers)
// - Serial transport with an async read loop and serialized writes

mod dispatcher;
mod error;
pub mod framer;
pub mod message;
#[cfg(test)]
pub(crate) mod testing;
mod transport;

pub use dispatcher::{DispatchStats, Dispatcher, MessageConsumer};
pub use error::LinkError;
pub use framer::{LineFramer, MAX_LINE_LEN};
pub use message::{KEEPALIVE_ACK, MessageType, Originator, WireMessage};
pub use transport::{LineWriter, LinkConfig, LinkState, LinkStats, SerialTransport};
