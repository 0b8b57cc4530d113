//! Word-packed memory marshalling
//!
//! Turns a flat byte buffer into the `(address, lane, word)` transactions a
//! LastLayer memory port accepts, and back.
//!
//! ## Addressing
//!
//! ```text
//! buffer  │ b0 b1 b2 b3 │ b4 b5 b6 b7 │ b8 .. │ ...
//!         └──── w0 ─────┴──── w1 ─────┴─ w2 ─┘
//!
//! word w  →  address = start + w / burst_words
//!            lane    = w % burst_words
//!
//! burst_words = 2, start = 10:
//!   w0 → (10, 0)   w1 → (10, 1)   w2 → (11, 0)   w3 → (11, 1)
//! ```
//!
//! ## Lane packing
//!
//! Byte `k` of a word occupies bits `[8k, 8k + 8)`, so `[1, 2, 3, 4]` packs to
//! `0x04030201`. With `word_bytes = 1` every transaction carries one byte in
//! the low bits, which is the byte-lane ABI generation.
//!
//! Every parameter is checked before the first transaction. Once issuing has
//! started a collaborator fault stops the transfer where it is; words already
//! written stay written.

use crate::backend::{DeviceAbi, RawHandle, Word};
use crate::error::{LastLayerError, Result};
use lastlayer_chip::abi::MAX_WORD_BYTES;
use tracing::{debug, trace, warn};

// ── Parameters ───────────────────────────────────────────────────────────────

/// Bytes packed into one collaborator word, `1..=4`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WordSpec {
    word_bytes: usize,
}

impl WordSpec {
    /// One byte per transaction
    pub const BYTE: Self = Self { word_bytes: 1 };

    /// Four bytes per transaction, little-endian lanes
    pub const WORD: Self = Self {
        word_bytes: MAX_WORD_BYTES,
    };

    /// Create a word spec
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` unless `1 <= word_bytes <= 4`.
    pub fn new(word_bytes: usize) -> Result<Self> {
        if (1..=MAX_WORD_BYTES).contains(&word_bytes) {
            Ok(Self { word_bytes })
        } else {
            Err(LastLayerError::invalid_parameter(format!(
                "word_bytes {word_bytes} outside 1..={MAX_WORD_BYTES}"
            )))
        }
    }

    /// Bytes per word
    pub const fn word_bytes(self) -> usize {
        self.word_bytes
    }

    /// Number of whole words in `len` bytes, if `len` splits evenly
    pub const fn words_in(self, len: usize) -> Option<usize> {
        if len >= self.word_bytes && len % self.word_bytes == 0 {
            Some(len / self.word_bytes)
        } else {
            None
        }
    }
}

impl Default for WordSpec {
    fn default() -> Self {
        Self::WORD
    }
}

/// Where a buffer lands in device memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BurstRegion {
    start: i32,
    burst_words: u32,
}

impl BurstRegion {
    /// Create a region starting at `start`, `burst_words` lanes per address
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if `burst_words` is zero.
    pub fn new(start: i32, burst_words: u32) -> Result<Self> {
        if burst_words == 0 {
            return Err(LastLayerError::invalid_parameter("burst_words must be >= 1"));
        }
        Ok(Self { start, burst_words })
    }

    /// Single-lane region at `start`
    pub const fn at(start: i32) -> Self {
        Self {
            start,
            burst_words: 1,
        }
    }

    /// First address
    pub const fn start(self) -> i32 {
        self.start
    }

    /// Lanes per address
    pub const fn burst_words(self) -> u32 {
        self.burst_words
    }

    /// Slots for `words` consecutive words
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the last address does not fit the
    /// collaborator's 32-bit signed address.
    pub fn slots(self, words: usize) -> Result<BurstSlots> {
        if words > 0 {
            let steps = i64::try_from((words - 1) / self.burst_words as usize).unwrap_or(i64::MAX);
            let last = i64::from(self.start).saturating_add(steps);
            if last > i64::from(i32::MAX) {
                return Err(LastLayerError::invalid_parameter(format!(
                    "{words} words from address {} with burst {} overflow the address range",
                    self.start, self.burst_words
                )));
            }
        }
        Ok(BurstSlots {
            region: self,
            next: 0,
            words,
        })
    }
}

/// Address and lane of one word
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slot {
    /// Word address
    pub address: i32,
    /// Lane within the address
    pub lane: u32,
}

/// Iterator over the slots of a transfer, in issue order
#[derive(Debug, Clone)]
pub struct BurstSlots {
    region: BurstRegion,
    next: usize,
    words: usize,
}

impl Iterator for BurstSlots {
    type Item = Slot;

    #[allow(clippy::cast_possible_truncation)]
    #[allow(clippy::cast_possible_wrap)]
    fn next(&mut self) -> Option<Slot> {
        if self.next >= self.words {
            return None;
        }
        let burst = self.region.burst_words as usize;
        // Range already checked in BurstRegion::slots
        let slot = Slot {
            address: self.region.start + (self.next / burst) as i32,
            lane: (self.next % burst) as u32,
        };
        self.next += 1;
        Some(slot)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.words - self.next;
        (left, Some(left))
    }
}

impl ExactSizeIterator for BurstSlots {}

/// One memory write as issued to the collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Transaction {
    /// Word address
    pub address: i32,
    /// Lane within the address
    pub lane: u32,
    /// Packed word
    pub word: Word,
}

impl std::fmt::Display for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "addr={:<6} sel={:<3} word={:#010x}", self.address, self.lane, self.word)
    }
}

// ── Lane packing ─────────────────────────────────────────────────────────────

/// Pack up to four bytes into a word, byte `k` at bits `[8k, 8k + 8)`
pub fn pack_word(bytes: &[u8]) -> Word {
    bytes
        .iter()
        .take(MAX_WORD_BYTES)
        .enumerate()
        .fold(0, |word, (k, &byte)| {
            let shift = 8 * k;
            word | ((Word::from(byte) << shift) & (0xFF << shift))
        })
}

/// Spread a word over `out`, byte `k` taken from bits `[8k, 8k + 8)`
#[allow(clippy::cast_possible_truncation)]
pub fn unpack_word(word: Word, out: &mut [u8]) {
    for (k, byte) in out.iter_mut().take(MAX_WORD_BYTES).enumerate() {
        *byte = ((word >> (8 * k)) & 0xFF) as u8;
    }
}

// ── Transfers ────────────────────────────────────────────────────────────────

/// Transactions that writing `buf` to `region` issues, in order
///
/// # Errors
///
/// Returns `InvalidBufferLength` if `buf` does not split into whole words, or
/// `InvalidParameter` if the region overflows the address range.
pub fn plan_write(region: BurstRegion, word: WordSpec, buf: &[u8]) -> Result<Vec<Transaction>> {
    let words = word
        .words_in(buf.len())
        .ok_or(LastLayerError::InvalidBufferLength {
            len: buf.len(),
            word_bytes: word.word_bytes(),
        })?;
    let slots = region.slots(words)?;
    Ok(buf
        .chunks_exact(word.word_bytes())
        .zip(slots)
        .map(|(chunk, slot)| Transaction {
            address: slot.address,
            lane: slot.lane,
            word: pack_word(chunk),
        })
        .collect())
}

/// Write `buf` into memory `hid` of instance `handle`
///
/// Returns the number of words written.
///
/// # Errors
///
/// Validation errors as for [`plan_write`], with nothing issued. A
/// collaborator fault aborts the transfer; earlier words are not rolled back.
pub fn write_memory<A: DeviceAbi + ?Sized>(
    abi: &mut A,
    handle: RawHandle,
    hid: u32,
    region: BurstRegion,
    word: WordSpec,
    buf: &[u8],
) -> Result<usize> {
    let plan = plan_write(region, word, buf)?;
    debug!(
        "write_mem hid={hid} start={} burst={} word_bytes={} words={}",
        region.start(),
        region.burst_words(),
        word.word_bytes(),
        plan.len()
    );

    for (issued, tx) in plan.iter().enumerate() {
        trace!("write_mem hid={hid} {tx}");
        if let Err(e) = abi.write_mem(handle, hid, tx.address, tx.lane, tx.word) {
            warn!(
                "write_mem hid={hid} aborted after {issued} of {} words: {e}",
                plan.len()
            );
            return Err(e);
        }
    }
    Ok(plan.len())
}

/// Read `num_elements` bytes from memory `hid` of instance `handle`
///
/// The result starts out filled with `fill` and is overwritten word by word.
///
/// # Errors
///
/// Returns `InvalidLength` if `num_elements` does not split into whole words,
/// `InvalidParameter` if the region overflows the address range, or the
/// collaborator's fault.
pub fn read_memory<A: DeviceAbi + ?Sized>(
    abi: &mut A,
    handle: RawHandle,
    hid: u32,
    region: BurstRegion,
    word: WordSpec,
    num_elements: usize,
    fill: u8,
) -> Result<Vec<u8>> {
    let words = word
        .words_in(num_elements)
        .ok_or(LastLayerError::InvalidLength {
            num_elements,
            word_bytes: word.word_bytes(),
        })?;
    let slots = region.slots(words)?;
    debug!(
        "read_mem hid={hid} start={} burst={} word_bytes={} words={words}",
        region.start(),
        region.burst_words(),
        word.word_bytes()
    );

    let mut out = vec![fill; num_elements];
    for (issued, (chunk, slot)) in out.chunks_exact_mut(word.word_bytes()).zip(slots).enumerate() {
        let value = abi
            .read_mem(handle, hid, slot.address, slot.lane)
            .inspect_err(|e| warn!("read_mem hid={hid} aborted after {issued} of {words} words: {e}"))?;
        trace!("read_mem hid={hid} addr={} sel={} -> {value:#010x}", slot.address, slot.lane);
        unpack_word(value, chunk);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::software::{Access, SoftwareDevice};
    use lastlayer_chip::layout::DeviceLayout;

    fn wide_device(lanes: u32) -> SoftwareDevice {
        let layout = DeviceLayout::new().add_memory(0, lanes * 32, 64).unwrap();
        SoftwareDevice::new(layout).with_journal()
    }

    fn writes(journal: &[Access]) -> Vec<(i32, u32, Word)> {
        journal
            .iter()
            .filter_map(|a| match *a {
                Access::WriteMem {
                    addr, sel, value, ..
                } => Some((addr, sel, value)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn packs_little_endian_lanes() {
        assert_eq!(pack_word(&[1, 2, 3, 4]), 0x0403_0201);
        assert_eq!(pack_word(&[0x7F]), 0x7F);
        assert_eq!(pack_word(&[0xFF, 0x80]), 0x80FF);

        let mut out = [0u8; 4];
        unpack_word(0x0403_0201, &mut out);
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn burst_addressing_steps_after_each_burst() {
        let slots: Vec<_> = BurstRegion::new(10, 2)
            .unwrap()
            .slots(4)
            .unwrap()
            .map(|s| (s.address, s.lane))
            .collect();
        assert_eq!(slots, vec![(10, 0), (10, 1), (11, 0), (11, 1)]);
    }

    #[test]
    fn byte_lanes_issue_one_transaction_per_byte() {
        let mut dev = wide_device(2);
        let h = dev.alloc().unwrap();
        let region = BurstRegion::new(10, 2).unwrap();
        let n = write_memory(&mut dev, h, 0, region, WordSpec::BYTE, &[1, 2, 3, 4]).unwrap();
        assert_eq!(n, 4);
        assert_eq!(
            writes(dev.journal()),
            vec![(10, 0, 1), (10, 1, 2), (11, 0, 3), (11, 1, 4)]
        );
    }

    #[test]
    fn short_buffer_rejected_before_any_transaction() {
        let mut dev = wide_device(1);
        let h = dev.alloc().unwrap();
        let err = write_memory(&mut dev, h, 0, BurstRegion::at(0), WordSpec::WORD, &[1, 2, 3])
            .unwrap_err();
        assert!(matches!(
            err,
            LastLayerError::InvalidBufferLength {
                len: 3,
                word_bytes: 4
            }
        ));
        assert!(writes(dev.journal()).is_empty());
    }

    #[test]
    fn address_overflow_rejected_before_any_transaction() {
        let mut dev = wide_device(1);
        let h = dev.alloc().unwrap();
        let region = BurstRegion::at(i32::MAX);
        let err = write_memory(&mut dev, h, 0, region, WordSpec::BYTE, &[1, 2]).unwrap_err();
        assert!(matches!(err, LastLayerError::InvalidParameter { .. }));
        assert!(writes(dev.journal()).is_empty());

        // A single word at the last address still fits
        assert_eq!(region.slots(1).unwrap().count(), 1);
    }

    #[test]
    fn read_fills_and_unpacks() {
        let mut dev = wide_device(1);
        let h = dev.alloc().unwrap();
        dev.write_mem(h, 0, 3, 0, 0xDDCC_BBAA).unwrap();
        let out = read_memory(&mut dev, h, 0, BurstRegion::at(3), WordSpec::WORD, 4, 1).unwrap();
        assert_eq!(out, vec![0xAA, 0xBB, 0xCC, 0xDD]);

        let err = read_memory(&mut dev, h, 0, BurstRegion::at(0), WordSpec::WORD, 6, 1)
            .unwrap_err();
        assert!(matches!(err, LastLayerError::InvalidLength { num_elements: 6, .. }));
    }

    #[test]
    fn invalid_parameters() {
        assert!(WordSpec::new(0).is_err());
        assert!(WordSpec::new(5).is_err());
        assert_eq!(WordSpec::new(2).unwrap().words_in(6), Some(3));
        assert!(BurstRegion::new(0, 0).is_err());
    }
}
