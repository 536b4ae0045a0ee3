//! # obscur-core
//!
//! Self-describing, authenticated, encrypted packages bundling one or more
//! byte streams behind a single cryptographically protected manifest.
//!
//! A package is a wire format: its bytes alone, together with either a
//! shared secret or an asymmetric key pair, let a recipient recover and
//! verify every payload item.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     PackageWriter / PackageReader            │
//! │          (one-shot state machines over the wire layout)      │
//! ├──────────────────────────────────────────────────────────────┤
//! │      Manifest envelope          │      Payload multiplexer   │
//! │  (KDF → encrypt-then-MAC over   │  (Simple / Frameshift /    │
//! │   the serialized manifest)      │   Fabric item interleaving)│
//! ├──────────────────────────────────────────────────────────────┤
//! │                    Payload items (per-item                   │
//! │             authenticated cipher streams, lazy I/O)          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire layout
//!
//! ```text
//! "OCPK" magic
//! varint-length-prefixed manifest header (version, scheme, crypto config)
//! u32-LE manifest body length, XORed with mac_key[0..4]
//! manifest body ciphertext
//! multiplexed payload bytes
//! "OCPK" trailer magic
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod envelope;
pub mod error;
pub mod item;
pub mod manifest;
pub mod mux;
pub mod reader;
pub mod scratch;
pub mod wire;
pub mod writer;

pub use error::PackageError;
pub use item::{PayloadItem, UnpackedItem};
pub use manifest::{
    Manifest, ManifestCryptoConfig, ManifestHeader, PayloadConfiguration, PayloadItemDescriptor,
    PayloadItemKind, PayloadLayout,
};
pub use reader::{PackageReader, ReaderState};
pub use writer::{PackageWriter, WriterState};

/// Package header and trailer magic bytes.
pub const PACKAGE_MAGIC: [u8; 4] = *b"OCPK";

/// Wire format version.
pub const FORMAT_VERSION: u32 = 1;

/// Upper bound accepted for a manifest body, guarding length-field abuse.
pub const MAX_MANIFEST_LEN: u32 = 64 * 1024 * 1024;
