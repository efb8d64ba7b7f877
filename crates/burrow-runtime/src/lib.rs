//! burrow-runtime - host-bridge dispatch layer for burrow.
//!
//! Provides the machinery an embedding host uses to expose native
//! functionality to a scripting environment: a boundary value type,
//! named synchronous ops, and a registry that dispatches one call at a
//! time to completion on the calling thread.
//!
//! # Example
//!
//! ```
//! use burrow_runtime::{op_sync, Extension, ExtensionRegistry, HostValue};
//!
//! let registry = ExtensionRegistry::new();
//! let ext = Extension::new("demo").with_ops(vec![op_sync("__demo_echo", |_ctx, mut args| {
//!     Ok(args.pop().unwrap_or(HostValue::Null))
//! })]);
//! registry.register_extension(ext).unwrap();
//!
//! let out = registry.invoke("__demo_echo", vec![HostValue::from("hi")]).unwrap();
//! assert_eq!(out.as_text(), Some("hi"));
//! ```

pub mod error;
pub mod extension;
pub mod value;

pub use error::{HostError, HostResult};
pub use extension::{
    op_sync, Extension, ExtensionRegistry, ExtensionState, OpContext, OpDecl, OpResult,
};
pub use value::HostValue;
