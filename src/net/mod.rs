//! Client-server brick streaming protocol.
//!
//! A client drives the server over one TCP connection with single-byte
//! command tags followed by fixed-width payloads (see [`codec`]). Commands are
//! replicated to every rank before they run, and only the source rank (rank 0
//! unless configured otherwise) writes replies.
//!
//! | Command (tag) | Request | Reply after the tag byte |
//! |---|---|---|
//! | Open (0) | `u16` len, filename | brick catalog |
//! | Close (1) | `u16` len, filename | none |
//! | Brick (2) | `u8` type, `u32` lod, `u32` index | `u64` count, voxels |
//! | ListFiles (3) | | `u16` count, C strings |
//! | Shutdown (4) | | none |
//! | Rotate (5) | `f32[16]`, `u8` type | brick batches |
//! | BatchSize (6) | `u64` | none |

pub mod client;
pub mod codec;
pub mod command;
pub mod dispatch;
pub mod server;

pub use client::{BrickBatch, BrickCatalog, NetDsClient};
pub use command::{Command, CommandCode};
pub use dispatch::read_command;
pub use server::{NetDsServer, Outcome};
