//! Burrow KV - ordered key-value store bridge for the burrow runtime.
//!
//! Exposes an embedded ordered key-value engine (redb) to a host
//! scripting environment through synchronous bridge ops. Open stores,
//! cursors, and staged write batches are referenced by stable integer
//! handles; keys and values cross the boundary as text or raw byte
//! buffers.
//!
//! # Usage
//!
//! ```no_run
//! use burrow_kv::kv_extension;
//! use burrow_runtime::{ExtensionRegistry, HostValue};
//!
//! let registry = ExtensionRegistry::new();
//! registry.register_extension(kv_extension("/data")).unwrap();
//!
//! let handle = registry
//!     .invoke(
//!         "__burrow_kv_open",
//!         vec![
//!             HostValue::from("app.db"),
//!             HostValue::from(true),  // create_if_missing
//!             HostValue::from(false), // error_if_exists
//!         ],
//!     )
//!     .unwrap();
//! registry
//!     .invoke(
//!         "__burrow_kv_put",
//!         vec![handle.clone(), HostValue::from("key"), HostValue::from("value")],
//!     )
//!     .unwrap();
//! ```

pub mod engine;
pub mod error;
pub mod extension;
pub mod handles;
pub mod marshal;

pub use engine::{Cursor, EngineError, OpenOptions, Store, WriteBatch};
pub use error::{KvError, KvResult};
pub use extension::{kv_extension, KvBridge};
pub use handles::{HandleError, HandleTable};
