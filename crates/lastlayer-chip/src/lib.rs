//! Device model for LastLayer simulated accelerators.
//!
//! This crate has **no dependencies** and **no device access**. It is a pure
//! description of what a compiled LastLayer model looks like from the host
//! side: the C ABI symbol names, the memory-word ABI generations, the
//! register/memory declarations a model is built from, and the register maps
//! of the accelerators driven through it.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`abi`] | `LastLayer*` symbol names, word width, ABI generations |
//! | [`layout`] | Register and memory declarations, lane arithmetic |
//! | [`regs`] | Register maps of the known accelerator wrappers |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod abi;
pub mod layout;
pub mod regs;
