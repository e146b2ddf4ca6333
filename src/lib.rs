//! Immutable, sorted key-value tablet files, a merged view over stacks
//! of them, and an append-only transaction log.
//!
//! A tablet is written once from an ordered stream of pairs and read
//! many times; [`TabletStack`] layers tablets so newer generations
//! shadow older ones. [`txlog`] provides the durable record log that
//! typically sits in front of tablet creation.

pub mod encoding;
pub mod error;
pub mod iterator;
pub mod stack;
pub mod tablet;
pub mod txlog;

pub use error::{Error, Result};
pub use stack::TabletStack;
pub use tablet::{write_tablet, Tablet, TabletOptions};

use crc::{Crc, CRC_32_ISO_HDLC};

/// CRC32 (IEEE), shared by block preambles and log fragments.
pub const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);
