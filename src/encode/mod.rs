//! Output pipeline: register lowering, container packing and serialization.
//!
//! Once the optimizer is done, each live method body leaves SSA form
//! through [`lower_method`], which assigns registers, eliminates phis
//! and applies the final graph lens in one place. [`distribute`] then
//! packs classes into containers so that no per-category reference pool
//! exceeds [`INDEX_LIMIT`] entries, and [`write_container`] serializes
//! each sealed container with a SHA-1 payload checksum.
//! [`read_container`] is the matching decoder, used for round-trip
//! verification.

mod container;
mod distribute;
mod io;
mod lower;
mod opcodes;
mod reader;
mod writer;

pub use container::{ClassFootprint, Container, ContainerState, INDEX_LIMIT};
pub use distribute::{distribute, PackingStrategy};
pub use lower::{lower_method, REGISTER_LIMIT};
pub use opcodes::{LoweredHandler, LoweredMethod, RegOp};
pub use reader::{read_container, DecodedContainer};
pub use writer::{write_container, EncodedContainer, HEADER_LEN, MAGIC, VERSION};
