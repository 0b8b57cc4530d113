//! LastLayer device facade and handles
//!
//! [`LastLayer`] owns one collaborator and every instance allocated through
//! it. A [`DeviceHandle`] is move-only: [`LastLayer::dealloc`] consumes it, so
//! a released instance cannot be named again.
//!
//! ```text
//! LastLayer<A> ──owns──► A: DeviceAbi ──► instance 0x1, 0x2, ...
//!      │
//!      └── live set {0x1, 0x2}   checked on every call
//! ```
//!
//! Each facade carries a process-wide id and stamps it into every handle it
//! mints, so a handle from one facade is rejected by every other facade with
//! `UnknownHandle` even when both collaborators number instances alike.
//! Instances still live when the facade drops are released then.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info, warn};

use crate::backend::{BackendType, DeviceAbi, RawHandle, Word};
use crate::config::DriverConfig;
use crate::cycles::CycleCount;
use crate::error::{LastLayerError, Result};
use crate::marshal::{self, BurstRegion, WordSpec};

static NEXT_FACADE: AtomicU64 = AtomicU64::new(1);

/// One allocated device instance
///
/// Not `Clone`: releasing the instance consumes the handle.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct DeviceHandle {
    facade: u64,
    raw: RawHandle,
}

impl DeviceHandle {
    /// Collaborator-side instance value
    #[must_use]
    pub const fn raw(&self) -> RawHandle {
        self.raw
    }
}

impl std::fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "device@{}", self.raw)
    }
}

/// Device facade: handle manager, register and cycle shims, memory marshaller
#[derive(Debug)]
pub struct LastLayer<A: DeviceAbi = Box<dyn DeviceAbi>> {
    id: u64,
    abi: A,
    config: DriverConfig,
    live: HashSet<RawHandle>,
}

impl<A: DeviceAbi> LastLayer<A> {
    /// Wrap a collaborator with the default configuration
    pub fn new(abi: A) -> Self {
        Self::with_config(abi, DriverConfig::default())
    }

    /// Wrap a collaborator
    pub fn with_config(abi: A, config: DriverConfig) -> Self {
        debug!(
            "LastLayer on {} backend, word_bytes={}, registers {}",
            abi.backend_type(),
            config.word.word_bytes(),
            config.register_width
        );
        Self {
            id: NEXT_FACADE.fetch_add(1, Ordering::Relaxed),
            abi,
            config,
            live: HashSet::new(),
        }
    }

    // ── Handle manager ───────────────────────────────────────────────────────

    /// Allocate a device instance
    ///
    /// # Errors
    ///
    /// Returns `AllocationFailed` if the collaborator hands back a null
    /// instance, or one that is already live. The duplicate is not released:
    /// it is the same instance the existing handle names.
    pub fn alloc(&mut self) -> Result<DeviceHandle> {
        let raw = self.abi.alloc()?;
        if raw.is_null() {
            return Err(LastLayerError::allocation_failed(format!(
                "{} backend returned a null instance",
                self.abi.backend_type()
            )));
        }
        if !self.live.insert(raw) {
            return Err(LastLayerError::allocation_failed(format!(
                "instance {raw} is already live"
            )));
        }
        info!("Allocated device instance {raw}");
        Ok(DeviceHandle { facade: self.id, raw })
    }

    /// Release a device instance
    ///
    /// # Errors
    ///
    /// Returns `UnknownHandle` if the handle was not allocated by this facade,
    /// or the collaborator's fault.
    pub fn dealloc(&mut self, handle: DeviceHandle) -> Result<()> {
        let raw = self.live(&handle)?;
        self.live.remove(&raw);
        self.abi.dealloc(raw)?;
        info!("Released device instance {raw}");
        Ok(())
    }

    /// Number of instances allocated and not yet released
    pub fn live_handles(&self) -> usize {
        self.live.len()
    }

    fn live(&self, handle: &DeviceHandle) -> Result<RawHandle> {
        if handle.facade == self.id && self.live.contains(&handle.raw) {
            Ok(handle.raw)
        } else {
            Err(LastLayerError::UnknownHandle {
                token: handle.raw.get(),
            })
        }
    }

    // ── Registers ────────────────────────────────────────────────────────────

    /// Read register `(hid, sel)`, interpreted at the configured width
    ///
    /// # Errors
    ///
    /// Returns `UnknownHandle` or the collaborator's fault.
    pub fn read_reg(&mut self, handle: &DeviceHandle, hid: u32, sel: u32) -> Result<i64> {
        let raw = self.live(handle)?;
        let value = self.abi.read_reg(raw, hid, sel)?;
        Ok(self.config.register_width.widen(value))
    }

    /// Write register `(hid, sel)`, truncating `value` to the configured width
    ///
    /// # Errors
    ///
    /// Returns `UnknownHandle` or the collaborator's fault.
    pub fn write_reg(&mut self, handle: &DeviceHandle, hid: u32, sel: u32, value: i64) -> Result<()> {
        let raw = self.live(handle)?;
        self.abi
            .write_reg(raw, hid, sel, self.config.register_width.narrow(value))
    }

    // ── Memory ───────────────────────────────────────────────────────────────

    /// Read one raw memory word
    ///
    /// # Errors
    ///
    /// Returns `UnknownHandle` or the collaborator's fault.
    pub fn read_mem_word(&mut self, handle: &DeviceHandle, hid: u32, addr: i32, sel: u32) -> Result<Word> {
        let raw = self.live(handle)?;
        self.abi.read_mem(raw, hid, addr, sel)
    }

    /// Write one raw memory word
    ///
    /// # Errors
    ///
    /// Returns `UnknownHandle` or the collaborator's fault.
    pub fn write_mem_word(
        &mut self,
        handle: &DeviceHandle,
        hid: u32,
        addr: i32,
        sel: u32,
        value: Word,
    ) -> Result<()> {
        let raw = self.live(handle)?;
        self.abi.write_mem(raw, hid, addr, sel, value)
    }

    /// Write `buf` to memory `hid` with the configured word packing
    ///
    /// Returns the number of words written.
    ///
    /// # Errors
    ///
    /// See [`marshal::write_memory`].
    pub fn write_mem(&mut self, handle: &DeviceHandle, hid: u32, region: BurstRegion, buf: &[u8]) -> Result<usize> {
        let word = self.config.word;
        self.write_mem_with(handle, hid, region, word, buf)
    }

    /// Write `buf` to memory `hid` with explicit word packing
    ///
    /// # Errors
    ///
    /// See [`marshal::write_memory`].
    pub fn write_mem_with(
        &mut self,
        handle: &DeviceHandle,
        hid: u32,
        region: BurstRegion,
        word: WordSpec,
        buf: &[u8],
    ) -> Result<usize> {
        let raw = self.live(handle)?;
        marshal::write_memory(&mut self.abi, raw, hid, region, word, buf)
    }

    /// Read `num_elements` bytes from memory `hid` with the configured word packing
    ///
    /// # Errors
    ///
    /// See [`marshal::read_memory`].
    pub fn read_mem(
        &mut self,
        handle: &DeviceHandle,
        hid: u32,
        region: BurstRegion,
        num_elements: usize,
    ) -> Result<Vec<u8>> {
        let word = self.config.word;
        self.read_mem_with(handle, hid, region, word, num_elements)
    }

    /// Read `num_elements` bytes from memory `hid` with explicit word packing
    ///
    /// # Errors
    ///
    /// See [`marshal::read_memory`].
    pub fn read_mem_with(
        &mut self,
        handle: &DeviceHandle,
        hid: u32,
        region: BurstRegion,
        word: WordSpec,
        num_elements: usize,
    ) -> Result<Vec<u8>> {
        let raw = self.live(handle)?;
        marshal::read_memory(
            &mut self.abi,
            raw,
            hid,
            region,
            word,
            num_elements,
            self.config.read_fill,
        )
    }

    // ── Cycle control ────────────────────────────────────────────────────────

    /// Hold the instance in reset for `cycles` clock cycles
    ///
    /// # Errors
    ///
    /// Returns `InvalidCycleCount` (nothing forwarded), `UnknownHandle`, or the
    /// collaborator's fault.
    pub fn reset(&mut self, handle: &DeviceHandle, cycles: i64) -> Result<()> {
        let cycles = CycleCount::new(cycles)?;
        let raw = self.live(handle)?;
        debug!("reset {raw} for {cycles} cycles");
        self.abi.reset(raw, cycles.get())
    }

    /// Run the instance for `cycles` clock cycles
    ///
    /// # Errors
    ///
    /// Returns `InvalidCycleCount` (nothing forwarded), `UnknownHandle`, or the
    /// collaborator's fault.
    pub fn run(&mut self, handle: &DeviceHandle, cycles: i64) -> Result<()> {
        let cycles = CycleCount::new(cycles)?;
        let raw = self.live(handle)?;
        debug!("run {raw} for {cycles} cycles");
        self.abi.run(raw, cycles.get())
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    /// Collaborator
    pub const fn backend(&self) -> &A {
        &self.abi
    }

    /// Collaborator, mutably
    ///
    /// Calls made directly on the collaborator bypass the live-handle checks.
    pub fn backend_mut(&mut self) -> &mut A {
        &mut self.abi
    }

    /// Collaborator kind
    pub fn backend_type(&self) -> BackendType {
        self.abi.backend_type()
    }

    /// Active configuration
    pub const fn config(&self) -> &DriverConfig {
        &self.config
    }
}

impl<A: DeviceAbi> Drop for LastLayer<A> {
    fn drop(&mut self) {
        let leaked: Vec<RawHandle> = self.live.drain().collect();
        for raw in leaked {
            warn!("Releasing leaked device instance {raw}");
            if let Err(e) = self.abi.dealloc(raw) {
                warn!("Failed to release {raw}: {e}");
            }
        }
    }
}
