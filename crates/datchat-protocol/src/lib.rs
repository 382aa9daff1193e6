//! datchat protocol - wire format for broker/client communication
//!
//! Every message on the stream is an [`Envelope`] serialized as one JSON
//! object terminated by `\n`. [`EnvelopeCodec`] plugs into
//! `tokio_util::codec::{FramedRead, FramedWrite}` for streaming use;
//! [`encode`] and [`decode`] handle single frames.

pub mod codec;
pub mod envelope;

pub use codec::{decode, encode, CodecError, EnvelopeCodec, DEFAULT_MAX_FRAME_BYTES};
pub use envelope::{Envelope, EnvelopeKind};
