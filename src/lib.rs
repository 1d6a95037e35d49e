//! tlsengine
//!
//! Sans-IO TLS 1.2 and TLS 1.3 engine. An [`Engine`] owns no socket and no
//! thread: the application moves records between the engine and its
//! transport, and runs the engine's expensive handshake steps wherever it
//! likes.
//!
//! ```text
//!   application data            records
//!   srcs ──────── wrap ───────▶ dst      ──▶ transport
//!   dsts ◀─────── unwrap ────── src      ◀── transport
//! ```
//!
//! Both directions carry the handshake. After each call the
//! [`HandshakeStatus`] says what the engine needs next:
//!
//! - `NeedWrap`: call [`Engine::wrap`] to produce a record for the peer.
//! - `NeedUnwrap`: feed the next record from the peer to [`Engine::unwrap`].
//! - `NeedTask`: take a [`DelegatedTask`] with [`Engine::delegated_task`]
//!   and run it.
//! - `Finished`: the call completed a handshake (or a key update).
//! - `NotHandshaking`: only application data is moving.
//!
//! Every call consumes or produces at most one record. Buffers too small
//! for that record are reported as [`Status::BufferOverflow`] or
//! [`Status::BufferUnderflow`] with nothing consumed. Size them with
//! [`Session::packet_buffer_size`] and [`Session::application_buffer_size`].
//!
//! Supported are TLS 1.2 with ECDHE_ECDSA and AES-GCM, and TLS 1.3 with
//! AES-GCM, both with P-256/P-384 ECDSA certificates. TLS 1.2 sessions are
//! resumed through the [`SessionCache`] shared by engines of one
//! [`Config`]. TLS 1.2 renegotiation (RFC 5746 only) and TLS 1.3 key updates
//! both go through [`Engine::begin_handshake`].

#![forbid(unsafe_code)]
#![warn(clippy::all)]
// #![deny(missing_docs)]

#[macro_use]
extern crate log;

pub mod alert;
mod buffer;
pub mod certificate;
mod config;
pub mod crypto;
mod engine;
mod error;
mod handshake;
pub(crate) mod message;
pub(crate) mod record;
mod session;
mod task;
pub mod types;

pub use alert::{AlertDescription, AlertLevel};
pub use buffer::ByteBuf;
pub use config::{Config, ConfigBuilder};
pub use crypto::credentials::{
    AcceptAnyTrustManager, AnchoredTrustManager, KeyManager, NoClientAuth, PreferredAlias,
    StaticKeyManager, TrustError, TrustManager,
};
pub use engine::{CloseKind, Engine, EngineResult, Status};
pub use error::{CryptoError, Error, ErrorKind};
pub use handshake::{ClientAuth, HandshakeStatus};
pub use session::{Session, SessionCache};
pub use task::DelegatedTask;
pub use types::{CipherSuite, ProtocolVersion};
