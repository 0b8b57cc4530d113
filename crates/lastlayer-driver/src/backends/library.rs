// SPDX-License-Identifier: AGPL-3.0-only

//! Compiled model library backend
//!
//! Loads a `lib<name>.so` produced by the LastLayer build with `libloading`
//! and forwards every [`DeviceAbi`] call to its `LastLayer*` exports.
//!
//! The C ABI has no error channel: invalid hids or lanes trip assertions
//! inside the model and abort the process. Only argument conversion is
//! checked on this side.

// The C ABI passes every integer as `int` and the instance as `void*`
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]

use crate::backend::{BackendType, DeviceAbi, RawHandle, Word};
use crate::error::{LastLayerError, Result};
use lastlayer_chip::abi::{symbols, LIBRARY_ENV};
use libc::{c_int, c_void, RTLD_LOCAL, RTLD_NOW};
use libloading::os::unix::Library as UnixLibrary;
use libloading::{Library, Symbol};
use std::path::{Path, PathBuf};

type AllocFn = unsafe extern "C" fn() -> *mut c_void;
type DeallocFn = unsafe extern "C" fn(*mut c_void);
type ReadRegFn = unsafe extern "C" fn(*mut c_void, c_int, c_int) -> c_int;
type WriteRegFn = unsafe extern "C" fn(*mut c_void, c_int, c_int, c_int);
type ReadMemFn = unsafe extern "C" fn(*mut c_void, c_int, c_int, c_int) -> c_int;
type WriteMemFn = unsafe extern "C" fn(*mut c_void, c_int, c_int, c_int, c_int);
type CycleFn = unsafe extern "C" fn(*mut c_void, c_int);

/// Resolved `LastLayer*` entry points
///
/// Plain fn pointers copied out of their symbols; only valid while the
/// owning [`Library`] is loaded.
#[derive(Clone, Copy)]
struct Entries {
    alloc: AllocFn,
    dealloc: DeallocFn,
    read_reg: ReadRegFn,
    write_reg: WriteRegFn,
    read_mem: ReadMemFn,
    write_mem: WriteMemFn,
    reset: CycleFn,
    run: CycleFn,
}

/// Model library loaded into the process
pub struct LibraryBackend {
    path: PathBuf,
    entries: Entries,
    // Declared last: unloads after every use of `entries`
    lib: Library,
}

impl std::fmt::Debug for LibraryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibraryBackend")
            .field("path", &self.path)
            .field("lib", &self.lib)
            .finish_non_exhaustive()
    }
}

impl LibraryBackend {
    /// Load the model library at `path`
    ///
    /// # Errors
    ///
    /// Returns error if the library cannot be opened or any of the eight
    /// `LastLayer*` symbols is missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // SAFETY: loading runs the model's static initialisers, which the
        // LastLayer build emits without side effects. RTLD_NOW resolves every
        // symbol up front so a broken model fails here, not mid-transfer.
        let lib: Library = unsafe { UnixLibrary::open(Some(&path), RTLD_NOW | RTLD_LOCAL) }
            .map_err(|e| LastLayerError::library_load(&path, e.to_string()))?
            .into();

        let entries = Self::resolve(&lib).map_err(|e| LastLayerError::library_load(&path, e))?;

        tracing::info!("Loaded device library {}", path.display());
        Ok(Self { path, entries, lib })
    }

    /// Load the library named by the `LASTLAYER_LIB` environment variable
    ///
    /// # Errors
    ///
    /// Returns error if the variable is unset or the library cannot be loaded.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var_os(LIBRARY_ENV).ok_or_else(|| {
            LastLayerError::library_load(PathBuf::new(), format!("{LIBRARY_ENV} is not set"))
        })?;
        Self::open(PathBuf::from(path))
    }

    /// Path the library was loaded from
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn resolve(lib: &Library) -> std::result::Result<Entries, String> {
        fn entry<T: Copy>(lib: &Library, name: &str) -> std::result::Result<T, String> {
            // SAFETY: every `LastLayer*` symbol is declared in lastlayer.h with
            // exactly the signature of the fn type it is resolved as.
            let symbol: Symbol<T> = unsafe { lib.get(name.as_bytes()) }
                .map_err(|e| format!("missing symbol {name}: {e}"))?;
            Ok(*symbol)
        }

        Ok(Entries {
            alloc: entry(lib, symbols::ALLOC)?,
            dealloc: entry(lib, symbols::DEALLOC)?,
            read_reg: entry(lib, symbols::READ_REG)?,
            write_reg: entry(lib, symbols::WRITE_REG)?,
            read_mem: entry(lib, symbols::READ_MEM)?,
            write_mem: entry(lib, symbols::WRITE_MEM)?,
            reset: entry(lib, symbols::RESET)?,
            run: entry(lib, symbols::RUN)?,
        })
    }

    fn instance(handle: RawHandle) -> *mut c_void {
        handle.get() as usize as *mut c_void
    }

    fn c_id(op: &'static str, what: &str, value: u32) -> Result<c_int> {
        c_int::try_from(value).map_err(|_| {
            LastLayerError::collaborator_fault(op, format!("{what} {value} exceeds C int range"))
        })
    }
}

impl DeviceAbi for LibraryBackend {
    fn alloc(&mut self) -> Result<RawHandle> {
        // SAFETY: LastLayerAlloc takes no arguments and returns an owned instance or null.
        let ptr = unsafe { (self.entries.alloc)() };
        Ok(RawHandle::new(ptr as usize as u64))
    }

    fn dealloc(&mut self, handle: RawHandle) -> Result<()> {
        // SAFETY: handle came from LastLayerAlloc of this library; the handle
        // manager guarantees it is released at most once.
        unsafe { (self.entries.dealloc)(Self::instance(handle)) };
        Ok(())
    }

    fn read_reg(&mut self, handle: RawHandle, hid: u32, sel: u32) -> Result<i32> {
        let hid = Self::c_id("read_reg", "hid", hid)?;
        let sel = Self::c_id("read_reg", "sel", sel)?;
        // SAFETY: handle is a live instance of this library.
        Ok(unsafe { (self.entries.read_reg)(Self::instance(handle), hid, sel) })
    }

    fn write_reg(&mut self, handle: RawHandle, hid: u32, sel: u32, value: i32) -> Result<()> {
        let hid = Self::c_id("write_reg", "hid", hid)?;
        let sel = Self::c_id("write_reg", "sel", sel)?;
        // SAFETY: handle is a live instance of this library.
        unsafe { (self.entries.write_reg)(Self::instance(handle), hid, sel, value) };
        Ok(())
    }

    fn read_mem(&mut self, handle: RawHandle, hid: u32, addr: i32, sel: u32) -> Result<Word> {
        let hid = Self::c_id("read_mem", "hid", hid)?;
        let sel = Self::c_id("read_mem", "sel", sel)?;
        // SAFETY: handle is a live instance of this library.
        let word = unsafe { (self.entries.read_mem)(Self::instance(handle), hid, addr, sel) };
        Ok(word as Word)
    }

    fn write_mem(
        &mut self,
        handle: RawHandle,
        hid: u32,
        addr: i32,
        sel: u32,
        value: Word,
    ) -> Result<()> {
        let hid = Self::c_id("write_mem", "hid", hid)?;
        let sel = Self::c_id("write_mem", "sel", sel)?;
        // SAFETY: handle is a live instance of this library.
        unsafe {
            (self.entries.write_mem)(Self::instance(handle), hid, addr, sel, value as c_int);
        }
        Ok(())
    }

    fn reset(&mut self, handle: RawHandle, cycles: i32) -> Result<()> {
        // SAFETY: handle is a live instance of this library.
        unsafe { (self.entries.reset)(Self::instance(handle), cycles) };
        Ok(())
    }

    fn run(&mut self, handle: RawHandle, cycles: i32) -> Result<()> {
        // SAFETY: handle is a live instance of this library.
        unsafe { (self.entries.run)(Self::instance(handle), cycles) };
        Ok(())
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Library
    }
}
