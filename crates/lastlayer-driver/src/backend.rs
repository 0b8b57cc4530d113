//! Device collaborator abstraction
//!
//! Every LastLayer model exposes the same eight-call C ABI. [`DeviceAbi`] is
//! that ABI as a Rust trait, so the shims and the marshaller can drive a
//! compiled model library and the in-process software device alike.

use crate::backends::library::LibraryBackend;
use crate::backends::software::SoftwareDevice;
use crate::error::Result;
use std::fmt::Debug;
use std::path::PathBuf;

/// One 32-bit memory word as exchanged with the collaborator.
pub type Word = u32;

/// Collaborator-side instance pointer, carried as an integer.
///
/// Zero is the null instance returned by a failed `alloc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawHandle(u64);

impl RawHandle {
    /// The null instance
    pub const NULL: Self = Self(0);

    /// Wrap a raw instance value
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw instance value
    pub const fn get(self) -> u64 {
        self.0
    }

    /// True for the null instance
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for RawHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Device ABI consumed by this crate - one method per `LastLayer*` entry point
///
/// Implementations must apply every call immediately and in the order
/// received. The device is cycle-stepped: call order is observable state.
pub trait DeviceAbi: Debug + Send {
    /// Create a device instance
    ///
    /// A null handle signals allocation failure.
    ///
    /// # Errors
    ///
    /// Returns error if the collaborator itself faults.
    fn alloc(&mut self) -> Result<RawHandle>;

    /// Destroy a device instance
    ///
    /// # Errors
    ///
    /// Returns error if the collaborator faults.
    fn dealloc(&mut self, handle: RawHandle) -> Result<()>;

    /// Read lane `sel` of register `hid`
    ///
    /// # Errors
    ///
    /// Returns error if the collaborator faults (unknown hid, lane out of range).
    fn read_reg(&mut self, handle: RawHandle, hid: u32, sel: u32) -> Result<i32>;

    /// Write lane `sel` of register `hid`
    ///
    /// # Errors
    ///
    /// Returns error if the collaborator faults.
    fn write_reg(&mut self, handle: RawHandle, hid: u32, sel: u32, value: i32) -> Result<()>;

    /// Read lane `sel` of word `addr` in memory `hid`
    ///
    /// # Errors
    ///
    /// Returns error if the collaborator faults (unknown hid, address or lane out of range).
    fn read_mem(&mut self, handle: RawHandle, hid: u32, addr: i32, sel: u32) -> Result<Word>;

    /// Write lane `sel` of word `addr` in memory `hid`
    ///
    /// # Errors
    ///
    /// Returns error if the collaborator faults.
    fn write_mem(
        &mut self,
        handle: RawHandle,
        hid: u32,
        addr: i32,
        sel: u32,
        value: Word,
    ) -> Result<()>;

    /// Hold reset for `cycles` clock cycles
    ///
    /// # Errors
    ///
    /// Returns error if the collaborator faults.
    fn reset(&mut self, handle: RawHandle, cycles: i32) -> Result<()>;

    /// Run for `cycles` clock cycles
    ///
    /// # Errors
    ///
    /// Returns error if the collaborator faults.
    fn run(&mut self, handle: RawHandle, cycles: i32) -> Result<()>;

    /// Get backend type for debugging
    fn backend_type(&self) -> BackendType;
}

// Boxed collaborators for `select_backend`, borrowed ones for callers that
// keep the device after the facade is gone.
macro_rules! forward_device_abi {
    ($($ptr:ty),+) => {$(
    impl<A: DeviceAbi + ?Sized> DeviceAbi for $ptr {
        fn alloc(&mut self) -> Result<RawHandle> {
            (**self).alloc()
        }

        fn dealloc(&mut self, handle: RawHandle) -> Result<()> {
            (**self).dealloc(handle)
        }

        fn read_reg(&mut self, handle: RawHandle, hid: u32, sel: u32) -> Result<i32> {
            (**self).read_reg(handle, hid, sel)
        }

        fn write_reg(&mut self, handle: RawHandle, hid: u32, sel: u32, value: i32) -> Result<()> {
            (**self).write_reg(handle, hid, sel, value)
        }

        fn read_mem(&mut self, handle: RawHandle, hid: u32, addr: i32, sel: u32) -> Result<Word> {
            (**self).read_mem(handle, hid, addr, sel)
        }

        fn write_mem(
            &mut self,
            handle: RawHandle,
            hid: u32,
            addr: i32,
            sel: u32,
            value: Word,
        ) -> Result<()> {
            (**self).write_mem(handle, hid, addr, sel, value)
        }

        fn reset(&mut self, handle: RawHandle, cycles: i32) -> Result<()> {
            (**self).reset(handle, cycles)
        }

        fn run(&mut self, handle: RawHandle, cycles: i32) -> Result<()> {
            (**self).run(handle, cycles)
        }

        fn backend_type(&self) -> BackendType {
            (**self).backend_type()
        }
    }
    )+};
}

forward_device_abi!(Box<A>, &mut A);

/// Backend type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// Compiled model library loaded with `dlopen`
    Library,

    /// In-process software device
    Software,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Library => write!(f, "Library"),
            Self::Software => write!(f, "Software"),
        }
    }
}

/// Backend selection strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendSelection {
    /// Library named by `LASTLAYER_LIB` if set, otherwise the software device
    Auto,

    /// Force a specific model library
    Library(PathBuf),

    /// Force the software device (streaming accelerator layout)
    Software,
}

/// Select a collaborator
///
/// # Errors
///
/// Returns error if a forced library cannot be loaded.
pub fn select_backend(selection: BackendSelection) -> Result<Box<dyn DeviceAbi>> {
    match selection {
        BackendSelection::Auto => match LibraryBackend::from_env() {
            Ok(backend) => {
                tracing::info!("Using library backend {}", backend.path().display());
                Ok(Box::new(backend))
            }
            Err(e) => {
                tracing::info!("Library backend unavailable ({e}), using software device");
                Ok(Box::new(SoftwareDevice::stream_default()?))
            }
        },

        BackendSelection::Library(path) => {
            LibraryBackend::open(&path).map(|b| Box::new(b) as Box<dyn DeviceAbi>)
        }

        BackendSelection::Software => {
            SoftwareDevice::stream_default().map(|b| Box::new(b) as Box<dyn DeviceAbi>)
        }
    }
}
