//! Host-side bindings for LastLayer simulated accelerators.
//!
//! A LastLayer model is a cycle-stepped hardware design compiled into a
//! shared library with an eight-call C ABI. This crate drives that ABI:
//! instance lifetime, register access, word-packed memory transfers and
//! clock control, plus a name-based operation table for host frameworks.
//!
//! # Layers
//!
//! ```text
//! OperationRegistry   "device::write_mem"(token, hid, start, burst, word_bytes, bytes)
//!        │
//! LastLayer<A>        handles, register width, cycle checks
//!        │
//! marshal             bytes ─► (address, lane, word) transactions
//!        │
//! DeviceAbi           LibraryBackend (dlopen) | SoftwareDevice (in-process)
//! ```
//!
//! # Quick start
//!
//! ```
//! use lastlayer_driver::{BurstRegion, LastLayer, SoftwareDevice};
//! use lastlayer_chip::regs::stream;
//!
//! # fn main() -> lastlayer_driver::Result<()> {
//! let mut ll = LastLayer::new(SoftwareDevice::stream_default()?);
//! let dev = ll.alloc()?;
//! ll.reset(&dev, 3)?;
//! ll.write_mem(&dev, stream::INPUT_MEM, BurstRegion::at(0), &[1, 2, 3, 4])?;
//! assert_eq!(ll.read_mem_word(&dev, stream::INPUT_MEM, 0, 0)?, 0x0403_0201);
//! ll.dealloc(dev)?;
//! # Ok(())
//! # }
//! ```
//!
//! # ABI generations
//!
//! | Generation | Bytes per word | Register width |
//! |------------|----------------|----------------|
//! | Byte-lane  | 1              | 8-bit          |
//! | Word-lane  | 4              | 32-bit         |
//!
//! Both run through the same marshaller; see [`DriverConfig::for_generation`].

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

pub mod accelerator;
mod backend;
pub mod backends;
mod config;
mod cycles;
mod device;
mod error;
pub mod marshal;
mod registers;
pub mod registry;

pub use accelerator::{Adder, AdderKernel, ReluKernel, StreamAccelerator};
pub use backend::{select_backend, BackendSelection, BackendType, DeviceAbi, RawHandle, Word};
pub use backends::{Access, InstanceState, Kernel, LibraryBackend, SoftwareDevice};
pub use config::{DriverConfig, DEFAULT_READ_FILL};
pub use cycles::CycleCount;
pub use device::{DeviceHandle, LastLayer};
pub use error::{LastLayerError, Result};
pub use marshal::{BurstRegion, Slot, Transaction, WordSpec};
pub use registers::RegisterWidth;
pub use registry::{OperationRegistry, Value};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        BurstRegion, DeviceAbi, DeviceHandle, DriverConfig, LastLayer, LastLayerError,
        OperationRegistry, RegisterWidth, Result, SoftwareDevice, Value, WordSpec,
    };
}
