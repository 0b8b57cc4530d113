//! Named device operations
//!
//! Host frameworks bind operations by name and pass loosely typed arguments.
//! [`OperationRegistry`] is that adapter: it owns a [`LastLayer`] facade,
//! hands out integer tokens in place of [`DeviceHandle`]s, and checks every
//! argument before the facade sees it.
//!
//! | Operation                | Arguments                                           | Result  |
//! |--------------------------|-----------------------------------------------------|---------|
//! | `device::alloc`          |                                                     | token   |
//! | `device::dealloc`        | token                                               |         |
//! | `device::read_reg`       | token, hid, sel                                     | int     |
//! | `device::write_reg`      | token, hid, sel, value                              |         |
//! | `device::read_mem`       | token, hid, start, burst_words, word_bytes, length  | bytes   |
//! | `device::write_mem`      | token, hid, start, burst_words, word_bytes, bytes   |         |
//! | `device::read_mem_word`  | token, hid, addr, sel                               | int     |
//! | `device::write_mem_word` | token, hid, addr, sel, value                        |         |
//! | `device::reset`          | token, cycles                                       |         |
//! | `device::run`            | token, cycles                                       |         |
//!
//! Tokens count up from 1 and are never reused, so a released token stays
//! unknown for the life of the registry.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::backend::DeviceAbi;
use crate::device::{DeviceHandle, LastLayer};
use crate::error::{LastLayerError, Result};
use crate::marshal::{BurstRegion, WordSpec};

/// Operation names
pub mod ops {
    /// Allocate an instance
    pub const ALLOC: &str = "device::alloc";
    /// Release an instance
    pub const DEALLOC: &str = "device::dealloc";
    /// Read a register
    pub const READ_REG: &str = "device::read_reg";
    /// Write a register
    pub const WRITE_REG: &str = "device::write_reg";
    /// Read a byte buffer from memory
    pub const READ_MEM: &str = "device::read_mem";
    /// Write a byte buffer to memory
    pub const WRITE_MEM: &str = "device::write_mem";
    /// Read one raw memory word
    pub const READ_MEM_WORD: &str = "device::read_mem_word";
    /// Write one raw memory word
    pub const WRITE_MEM_WORD: &str = "device::write_mem_word";
    /// Hold reset
    pub const RESET: &str = "device::reset";
    /// Run clock cycles
    pub const RUN: &str = "device::run";
}

/// Argument or result of a named operation
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Value {
    /// No value
    #[default]
    None,
    /// Integer scalar
    Int(i64),
    /// Contiguous byte buffer
    Bytes(Vec<u8>),
}

impl Value {
    /// Integer payload, if any
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Byte payload, if any
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    const fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Int(_) => "int",
            Self::Bytes(_) => "bytes",
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Self::Bytes(b.to_vec())
    }
}

/// Positional arguments of one call
struct Args<'a> {
    op: &'static str,
    values: &'a [Value],
}

impl Args<'_> {
    fn int(&self, index: usize, what: &str) -> Result<i64> {
        self.values[index].as_int().ok_or_else(|| {
            LastLayerError::invalid_arguments(
                self.op,
                format!("{what} (argument {index}) must be int, got {}", self.values[index].kind()),
            )
        })
    }

    fn narrow<T: TryFrom<i64>>(&self, index: usize, what: &str) -> Result<T> {
        let v = self.int(index, what)?;
        T::try_from(v).map_err(|_| {
            LastLayerError::invalid_arguments(self.op, format!("{what} {v} out of range"))
        })
    }

    fn bytes(&self, index: usize, what: &str) -> Result<&[u8]> {
        self.values[index].as_bytes().ok_or_else(|| {
            LastLayerError::invalid_arguments(
                self.op,
                format!("{what} (argument {index}) must be bytes, got {}", self.values[index].kind()),
            )
        })
    }

    fn region(&self, start: usize) -> Result<(BurstRegion, WordSpec)> {
        let region = BurstRegion::new(
            self.narrow(start, "start_address")?,
            self.narrow(start + 1, "burst_words")?,
        )?;
        let word = WordSpec::new(self.narrow(start + 2, "word_bytes")?)?;
        Ok((region, word))
    }
}

type Handler<A> = fn(&mut OperationRegistry<A>, &Args<'_>) -> Result<Value>;

struct Operation<A: DeviceAbi> {
    name: &'static str,
    arity: usize,
    call: Handler<A>,
}

impl<A: DeviceAbi> Clone for Operation<A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A: DeviceAbi> Copy for Operation<A> {}

impl<A: DeviceAbi> std::fmt::Debug for Operation<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.name, self.arity)
    }
}

/// Token-based operation table over one facade
#[derive(Debug)]
pub struct OperationRegistry<A: DeviceAbi = Box<dyn DeviceAbi>> {
    device: LastLayer<A>,
    handles: HashMap<i64, DeviceHandle>,
    next_token: i64,
    ops: BTreeMap<&'static str, Operation<A>>,
}

impl<A: DeviceAbi> OperationRegistry<A> {
    /// Bind the standard `device::*` operations to `device`
    pub fn new(device: LastLayer<A>) -> Self {
        let table: [(&'static str, usize, Handler<A>); 10] = [
            (ops::ALLOC, 0, Self::op_alloc),
            (ops::DEALLOC, 1, Self::op_dealloc),
            (ops::READ_REG, 3, Self::op_read_reg),
            (ops::WRITE_REG, 4, Self::op_write_reg),
            (ops::READ_MEM, 6, Self::op_read_mem),
            (ops::WRITE_MEM, 6, Self::op_write_mem),
            (ops::READ_MEM_WORD, 4, Self::op_read_mem_word),
            (ops::WRITE_MEM_WORD, 5, Self::op_write_mem_word),
            (ops::RESET, 2, Self::op_reset),
            (ops::RUN, 2, Self::op_run),
        ];
        let ops = table
            .into_iter()
            .map(|(name, arity, call)| (name, Operation { name, arity, call }))
            .collect();
        Self {
            device,
            handles: HashMap::new(),
            next_token: 1,
            ops,
        }
    }

    /// Registered operation names, sorted
    pub fn operations(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.ops.keys().copied()
    }

    /// Tokens currently naming a live instance
    pub fn live_tokens(&self) -> usize {
        self.handles.len()
    }

    /// Underlying facade
    pub const fn device(&self) -> &LastLayer<A> {
        &self.device
    }

    /// Underlying facade, mutably
    pub fn device_mut(&mut self) -> &mut LastLayer<A> {
        &mut self.device
    }

    /// Call operation `name` with positional `args`
    ///
    /// # Errors
    ///
    /// Returns `UnknownOperation` for an unregistered name, `InvalidArguments`
    /// for a wrong argument count or kind, `UnknownHandle` for a token that
    /// does not name a live instance, or whatever the operation itself returns.
    pub fn invoke(&mut self, name: &str, args: &[Value]) -> Result<Value> {
        let op = self
            .ops
            .get(name)
            .copied()
            .ok_or_else(|| LastLayerError::UnknownOperation {
                name: name.to_string(),
            })?;
        if args.len() != op.arity {
            return Err(LastLayerError::invalid_arguments(
                op.name,
                format!("expected {} arguments, got {}", op.arity, args.len()),
            ));
        }
        debug!("invoke {op:?}");
        (op.call)(self, &Args { op: op.name, values: args })
    }

    // ── Handlers ─────────────────────────────────────────────────────────────

    fn op_alloc(&mut self, _args: &Args<'_>) -> Result<Value> {
        let handle = self.device.alloc()?;
        let token = self.next_token;
        self.next_token += 1;
        self.handles.insert(token, handle);
        Ok(Value::Int(token))
    }

    fn op_dealloc(&mut self, args: &Args<'_>) -> Result<Value> {
        let token = args.int(0, "token")?;
        let handle = self
            .handles
            .remove(&token)
            .ok_or_else(|| unknown_token(token))?;
        self.device.dealloc(handle)?;
        Ok(Value::None)
    }

    fn op_read_reg(&mut self, args: &Args<'_>) -> Result<Value> {
        let hid = args.narrow(1, "hid")?;
        let sel = args.narrow(2, "sel")?;
        let handle = lookup(&self.handles, args)?;
        self.device.read_reg(handle, hid, sel).map(Value::Int)
    }

    fn op_write_reg(&mut self, args: &Args<'_>) -> Result<Value> {
        let hid = args.narrow(1, "hid")?;
        let sel = args.narrow(2, "sel")?;
        let value = args.int(3, "value")?;
        let handle = lookup(&self.handles, args)?;
        self.device.write_reg(handle, hid, sel, value)?;
        Ok(Value::None)
    }

    fn op_read_mem(&mut self, args: &Args<'_>) -> Result<Value> {
        let hid = args.narrow(1, "hid")?;
        let (region, word) = args.region(2)?;
        let num_elements = args.narrow(5, "num_elements")?;
        let handle = lookup(&self.handles, args)?;
        self.device
            .read_mem_with(handle, hid, region, word, num_elements)
            .map(Value::Bytes)
    }

    fn op_write_mem(&mut self, args: &Args<'_>) -> Result<Value> {
        let hid = args.narrow(1, "hid")?;
        let (region, word) = args.region(2)?;
        let buf = args.bytes(5, "buffer")?;
        let handle = lookup(&self.handles, args)?;
        self.device.write_mem_with(handle, hid, region, word, buf)?;
        Ok(Value::None)
    }

    fn op_read_mem_word(&mut self, args: &Args<'_>) -> Result<Value> {
        let hid = args.narrow(1, "hid")?;
        let addr = args.narrow(2, "addr")?;
        let sel = args.narrow(3, "sel")?;
        let handle = lookup(&self.handles, args)?;
        let word = self.device.read_mem_word(handle, hid, addr, sel)?;
        Ok(Value::Int(i64::from(word)))
    }

    fn op_write_mem_word(&mut self, args: &Args<'_>) -> Result<Value> {
        let hid = args.narrow(1, "hid")?;
        let addr = args.narrow(2, "addr")?;
        let sel = args.narrow(3, "sel")?;
        // Accept both the signed C view and the unsigned word view
        let raw = args.int(4, "value")?;
        #[allow(clippy::cast_sign_loss)]
        let value = match i32::try_from(raw) {
            Ok(v) => v as u32,
            Err(_) => args.narrow(4, "value")?,
        };
        let handle = lookup(&self.handles, args)?;
        self.device.write_mem_word(handle, hid, addr, sel, value)?;
        Ok(Value::None)
    }

    fn op_reset(&mut self, args: &Args<'_>) -> Result<Value> {
        let cycles = args.int(1, "cycles")?;
        let handle = lookup(&self.handles, args)?;
        self.device.reset(handle, cycles)?;
        Ok(Value::None)
    }

    fn op_run(&mut self, args: &Args<'_>) -> Result<Value> {
        let cycles = args.int(1, "cycles")?;
        let handle = lookup(&self.handles, args)?;
        self.device.run(handle, cycles)?;
        Ok(Value::None)
    }
}

fn lookup<'h>(handles: &'h HashMap<i64, DeviceHandle>, args: &Args<'_>) -> Result<&'h DeviceHandle> {
    let token = args.int(0, "token")?;
    handles.get(&token).ok_or_else(|| unknown_token(token))
}

#[allow(clippy::cast_sign_loss)]
const fn unknown_token(token: i64) -> LastLayerError {
    LastLayerError::UnknownHandle {
        token: token as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::software::SoftwareDevice;

    fn registry() -> OperationRegistry<SoftwareDevice> {
        OperationRegistry::new(LastLayer::new(SoftwareDevice::stream_default().unwrap()))
    }

    #[test]
    fn all_operations_registered() {
        let reg = registry();
        let names: Vec<_> = reg.operations().collect();
        assert_eq!(names.len(), 10);
        for name in [ops::ALLOC, ops::READ_MEM, ops::WRITE_MEM_WORD, ops::RUN] {
            assert!(names.contains(&name));
        }
    }

    #[test]
    fn arity_and_kind_checked() {
        let mut reg = registry();
        assert!(matches!(
            reg.invoke(ops::RUN, &[Value::Int(1)]),
            Err(LastLayerError::InvalidArguments { op: "device::run", .. })
        ));
        assert!(matches!(
            reg.invoke(ops::RUN, &[Value::Bytes(vec![]), Value::Int(1)]),
            Err(LastLayerError::InvalidArguments { .. })
        ));
        assert!(matches!(
            reg.invoke("device::frobnicate", &[]),
            Err(LastLayerError::UnknownOperation { .. })
        ));
    }

    #[test]
    fn tokens_never_reused() {
        let mut reg = registry();
        let first = reg.invoke(ops::ALLOC, &[]).unwrap();
        reg.invoke(ops::DEALLOC, &[first.clone()]).unwrap();
        let second = reg.invoke(ops::ALLOC, &[]).unwrap();
        assert_ne!(first, second);
        assert!(matches!(
            reg.invoke(ops::DEALLOC, &[first]),
            Err(LastLayerError::UnknownHandle { token: 1 })
        ));
        assert_eq!(reg.live_tokens(), 1);
    }
}
