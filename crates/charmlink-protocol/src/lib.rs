/// Charmlink wire protocol.
///
/// Every envelope travels as a JSON object, hex-encoded and prefixed with
/// `0x`:
///
///   0x7b226170706c69636174696f6e223a...
///     = {"application":"charmlink-chat","type":"text","username":"alice",...}
///
/// The `application` field multiplexes independent channels over one
/// transport. Text payloads are URL-escaped inside the JSON; charm payloads
/// are a charm id; token payloads are serialized `TransferMetadata`.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod payload;

pub use codec::{decode, decode_bytes, encode};
pub use envelope::{WIRE_PREFIX, from_wire, to_wire};
pub use error::DecodeError;
