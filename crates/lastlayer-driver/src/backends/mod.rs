//! Device collaborator implementations
//!
//! Two backends available:
//! - **Library**: a compiled LastLayer model (`lib<name>.so`) loaded with `dlopen`
//! - **Software**: in-process register/memory model, layout-checked, with an
//!   optional per-cycle kernel, call journal and fault injection

pub mod library;
pub mod software;

pub use library::LibraryBackend;
pub use software::{Access, InstanceState, Kernel, SoftwareDevice};
