//! Applies and creates binary patches for retro ROM images.
//!
//! The core works on in-memory [`buffer::ByteBuffer`]s: the codecs under
//! [`patch`] read and write the IPS, UPS and BPS wire formats, and [`rom`]
//! wraps them with console detection, copier-header handling and checksum
//! repair. File I/O lives in the companion binary, not here.

pub mod buffer;
pub mod filename;
pub mod hash;
pub mod patch;
pub mod rom;
