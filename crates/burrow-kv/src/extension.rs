//! KV extension for the burrow runtime.
//!
//! Registers the bridge ops and owns the handle tables. Every op
//! resolves handle arguments first, coerces key/value arguments second,
//! invokes the engine third, and maps the outcome to a return value or
//! a structured failure.

use crate::engine::{Cursor, OpenOptions, Store, WriteBatch};
use crate::error::{KvError, KvResult};
use crate::handles::{self, HandleTable};
use crate::marshal;
use burrow_runtime::{op_sync, Extension, HostError, HostValue, OpContext, OpResult};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Coordinating object for the bridge: the base directory and the three
/// handle tables. Installed into the registry's extension state at
/// registration and torn down with it.
///
/// Ops that touch more than one table take the locks in a fixed order
/// (stores, cursors, batches) so a multi-threaded host cannot deadlock.
pub struct KvBridge {
    base_dir: PathBuf,
    stores: Mutex<HandleTable<Store>>,
    cursors: Mutex<HandleTable<Cursor>>,
    batches: Mutex<HandleTable<WriteBatch>>,
}

impl KvBridge {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            stores: Mutex::new(HandleTable::new()),
            cursors: Mutex::new(HandleTable::new()),
            batches: Mutex::new(HandleTable::new()),
        }
    }

    /// Release every live handle, cursors before stores. Unconditional
    /// and silent; used at teardown only.
    pub fn close_all(&self) {
        self.cursors.lock().clear();
        self.batches.lock().clear();
        self.stores.lock().clear();
    }
}

/// Create the KV extension rooted at `base_dir`. Relative store paths
/// passed to open/destroy resolve against it.
pub fn kv_extension(base_dir: impl Into<PathBuf>) -> Extension {
    let base_dir = base_dir.into();
    Extension::new("burrow-kv")
        .with_ops(vec![
            op_sync("__burrow_kv_open", kv_open),
            op_sync("__burrow_kv_destroy", kv_destroy),
            op_sync("__burrow_kv_close", kv_close),
            op_sync("__burrow_kv_put", kv_put),
            op_sync("__burrow_kv_delete", kv_delete),
            op_sync("__burrow_kv_get_text", kv_get_text),
            op_sync("__burrow_kv_get_buf", kv_get_buf),
            op_sync("__burrow_kv_iterator_new", kv_iterator_new),
            op_sync("__burrow_kv_iterator_seek_to_first", kv_iterator_seek_to_first),
            op_sync("__burrow_kv_iterator_seek_to_last", kv_iterator_seek_to_last),
            op_sync("__burrow_kv_iterator_seek", kv_iterator_seek),
            op_sync("__burrow_kv_iterator_valid", kv_iterator_valid),
            op_sync("__burrow_kv_iterator_prev", kv_iterator_prev),
            op_sync("__burrow_kv_iterator_next", kv_iterator_next),
            op_sync("__burrow_kv_iterator_close", kv_iterator_close),
            op_sync("__burrow_kv_iterator_key_text", kv_iterator_key_text),
            op_sync("__burrow_kv_iterator_key_buf", kv_iterator_key_buf),
            op_sync("__burrow_kv_iterator_value_text", kv_iterator_value_text),
            op_sync("__burrow_kv_iterator_value_buf", kv_iterator_value_buf),
            op_sync("__burrow_kv_iterator_key_compare", kv_iterator_key_compare),
            op_sync("__burrow_kv_batch_new", kv_batch_new),
            op_sync("__burrow_kv_batch_put", kv_batch_put),
            op_sync("__burrow_kv_batch_delete", kv_batch_delete),
            op_sync("__burrow_kv_batch_write", kv_batch_write),
            op_sync("__burrow_kv_batch_close", kv_batch_close),
            op_sync("__burrow_kv_merge", kv_merge),
            op_sync("__burrow_kv_read_file_buf", kv_read_file_buf),
        ])
        .with_init(move |state| state.put(KvBridge::new(base_dir.clone())))
        .with_teardown(|state| {
            if let Some(bridge) = state.get::<KvBridge>() {
                debug!("Tearing down kv bridge");
                bridge.close_all();
            }
        })
}

fn bridge(ctx: &OpContext) -> Result<Arc<KvBridge>, HostError> {
    ctx.state()
        .get::<KvBridge>()
        .ok_or_else(|| HostError::op("kv-bridge-not-installed"))
}

fn handle_arg(
    args: &[HostValue],
    idx: usize,
    op: &'static str,
    which: &'static str,
) -> KvResult<usize> {
    handles::decode(args.get(idx)).map_err(|source| KvError::handle(op, which, source))
}

fn bytes_arg(args: &[HostValue], idx: usize, op: &'static str) -> KvResult<Vec<u8>> {
    args.get(idx)
        .and_then(marshal::to_bytes)
        .ok_or(KvError::invalid_params(op))
}

fn text_arg(args: &[HostValue], idx: usize, op: &'static str) -> KvResult<String> {
    args.get(idx)
        .and_then(HostValue::as_text)
        .map(str::to_string)
        .ok_or(KvError::invalid_params(op))
}

fn bool_arg(args: &[HostValue], idx: usize, op: &'static str) -> KvResult<bool> {
    args.get(idx)
        .and_then(HostValue::as_bool)
        .ok_or(KvError::invalid_params(op))
}

fn u64_arg(args: &[HostValue], idx: usize, op: &'static str) -> KvResult<u64> {
    let number = args
        .get(idx)
        .and_then(HostValue::as_number)
        .ok_or(KvError::invalid_params(op))?;
    if !number.is_finite() || number.fract() != 0.0 || number < 0.0 {
        return Err(KvError::invalid_params(op));
    }
    Ok(number as u64)
}

// ---------------------------------------------------------------------------
// Store ops

fn kv_open(ctx: OpContext, args: Vec<HostValue>) -> OpResult {
    const OP: &str = "open";
    let bridge = bridge(&ctx)?;
    let relative = text_arg(&args, 0, OP)?;
    let options = OpenOptions {
        create_if_missing: bool_arg(&args, 1, OP)?,
        error_if_exists: bool_arg(&args, 2, OP)?,
    };

    let path = bridge.base_dir.join(&relative);
    let mut stores = bridge.stores.lock();
    match Store::open(options, &path) {
        Ok(store) => {
            let idx = stores.allocate(store);
            debug!(path = %path.display(), handle = idx, "opened store");
            Ok(HostValue::from(idx))
        }
        Err(err) => {
            // A failed open still burns an index; callers must not
            // assume handle density.
            stores.allocate_vacant();
            Err(KvError::engine(OP, err).into())
        }
    }
}

fn kv_destroy(ctx: OpContext, args: Vec<HostValue>) -> OpResult {
    const OP: &str = "destroy";
    let bridge = bridge(&ctx)?;
    let relative = text_arg(&args, 0, OP)?;
    let path = bridge.base_dir.join(&relative);
    Store::destroy(&path).map_err(|err| KvError::engine(OP, err))?;
    debug!(path = %path.display(), "destroyed store");
    Ok(HostValue::Null)
}

fn kv_close(ctx: OpContext, args: Vec<HostValue>) -> OpResult {
    const OP: &str = "close";
    let bridge = bridge(&ctx)?;
    let idx = handle_arg(&args, 0, OP, "db")?;
    bridge
        .stores
        .lock()
        .release(idx)
        .map_err(|source| KvError::handle(OP, "db", source))?;
    Ok(HostValue::Null)
}

fn kv_put(ctx: OpContext, args: Vec<HostValue>) -> OpResult {
    const OP: &str = "put";
    let bridge = bridge(&ctx)?;
    let idx = handle_arg(&args, 0, OP, "db")?;

    let stores = bridge.stores.lock();
    let store = stores
        .get(idx)
        .map_err(|source| KvError::handle(OP, "db", source))?;
    let key = bytes_arg(&args, 1, OP)?;
    let value = bytes_arg(&args, 2, OP)?;
    store
        .put(&key, &value)
        .map_err(|err| KvError::engine(OP, err))?;
    Ok(HostValue::Null)
}

fn kv_delete(ctx: OpContext, args: Vec<HostValue>) -> OpResult {
    const OP: &str = "delete";
    let bridge = bridge(&ctx)?;
    let idx = handle_arg(&args, 0, OP, "db")?;

    let stores = bridge.stores.lock();
    let store = stores
        .get(idx)
        .map_err(|source| KvError::handle(OP, "db", source))?;
    let key = bytes_arg(&args, 1, OP)?;
    // Absent keys are a success: delete is idempotent.
    store.delete(&key).map_err(|err| KvError::engine(OP, err))?;
    Ok(HostValue::Null)
}

fn kv_get(ctx: OpContext, args: Vec<HostValue>, op: &'static str, as_text: bool) -> OpResult {
    let bridge = bridge(&ctx)?;
    let idx = handle_arg(&args, 0, op, "db")?;

    let stores = bridge.stores.lock();
    let store = stores
        .get(idx)
        .map_err(|source| KvError::handle(op, "db", source))?;
    let key = bytes_arg(&args, 1, op)?;
    match store.get(&key).map_err(|err| KvError::engine(op, err))? {
        Some(value) if as_text => Ok(marshal::bytes_to_text(&value)),
        Some(value) => Ok(marshal::bytes_to_buffer(value)),
        // Absence is an explicit result, not an error.
        None => Ok(HostValue::Null),
    }
}

fn kv_get_text(ctx: OpContext, args: Vec<HostValue>) -> OpResult {
    kv_get(ctx, args, "getText", true)
}

fn kv_get_buf(ctx: OpContext, args: Vec<HostValue>) -> OpResult {
    kv_get(ctx, args, "getBuffer", false)
}

// ---------------------------------------------------------------------------
// Cursor ops

fn kv_iterator_new(ctx: OpContext, args: Vec<HostValue>) -> OpResult {
    const OP: &str = "newIterator";
    let bridge = bridge(&ctx)?;
    let idx = handle_arg(&args, 0, OP, "db")?;

    let stores = bridge.stores.lock();
    let store = stores
        .get(idx)
        .map_err(|source| KvError::handle(OP, "db", source))?;
    let cursor = store.cursor().map_err(|err| KvError::engine(OP, err))?;
    let cursor_idx = bridge.cursors.lock().allocate(cursor);
    Ok(HostValue::from(cursor_idx))
}

fn with_cursor<T>(
    bridge: &KvBridge,
    args: &[HostValue],
    op: &'static str,
    f: impl FnOnce(&mut Cursor) -> KvResult<T>,
) -> KvResult<T> {
    let idx = handles::decode(args.first()).map_err(|source| KvError::handle(op, "iterator", source))?;
    let mut cursors = bridge.cursors.lock();
    let cursor = cursors
        .get_mut(idx)
        .map_err(|source| KvError::handle(op, "iterator", source))?;
    f(cursor)
}

fn kv_iterator_seek_to_first(ctx: OpContext, args: Vec<HostValue>) -> OpResult {
    let bridge = bridge(&ctx)?;
    with_cursor(&bridge, &args, "iteratorSeekToFirst", |cursor| {
        cursor.seek_to_first();
        Ok(HostValue::Null)
    })
    .map_err(Into::into)
}

fn kv_iterator_seek_to_last(ctx: OpContext, args: Vec<HostValue>) -> OpResult {
    let bridge = bridge(&ctx)?;
    with_cursor(&bridge, &args, "iteratorSeekToLast", |cursor| {
        cursor.seek_to_last();
        Ok(HostValue::Null)
    })
    .map_err(Into::into)
}

fn kv_iterator_seek(ctx: OpContext, args: Vec<HostValue>) -> OpResult {
    const OP: &str = "iteratorSeek";
    let bridge = bridge(&ctx)?;
    with_cursor(&bridge, &args, OP, |cursor| {
        let target = bytes_arg(&args, 1, OP)?;
        cursor.seek(&target);
        Ok(HostValue::Null)
    })
    .map_err(Into::into)
}

fn kv_iterator_valid(ctx: OpContext, args: Vec<HostValue>) -> OpResult {
    let bridge = bridge(&ctx)?;
    with_cursor(&bridge, &args, "iteratorValid", |cursor| {
        Ok(HostValue::from(cursor.valid()))
    })
    .map_err(Into::into)
}

fn kv_iterator_prev(ctx: OpContext, args: Vec<HostValue>) -> OpResult {
    let bridge = bridge(&ctx)?;
    with_cursor(&bridge, &args, "iteratorPrev", |cursor| {
        cursor.prev();
        Ok(HostValue::Null)
    })
    .map_err(Into::into)
}

fn kv_iterator_next(ctx: OpContext, args: Vec<HostValue>) -> OpResult {
    let bridge = bridge(&ctx)?;
    with_cursor(&bridge, &args, "iteratorNext", |cursor| {
        cursor.next();
        Ok(HostValue::Null)
    })
    .map_err(Into::into)
}

fn kv_iterator_close(ctx: OpContext, args: Vec<HostValue>) -> OpResult {
    const OP: &str = "iteratorClose";
    let bridge = bridge(&ctx)?;
    let idx = handle_arg(&args, 0, OP, "iterator")?;
    bridge
        .cursors
        .lock()
        .release(idx)
        .map_err(|source| KvError::handle(OP, "iterator", source))?;
    Ok(HostValue::Null)
}

fn cursor_read(
    ctx: OpContext,
    args: Vec<HostValue>,
    op: &'static str,
    key: bool,
    as_text: bool,
) -> OpResult {
    let bridge = bridge(&ctx)?;
    with_cursor(&bridge, &args, op, |cursor| {
        let bytes = if key { cursor.key() } else { cursor.value() };
        let bytes = bytes.ok_or(KvError::CursorNotValid { op })?;
        Ok(if as_text {
            marshal::bytes_to_text(bytes)
        } else {
            marshal::bytes_to_buffer(bytes.to_vec())
        })
    })
    .map_err(Into::into)
}

fn kv_iterator_key_text(ctx: OpContext, args: Vec<HostValue>) -> OpResult {
    cursor_read(ctx, args, "iteratorKeyText", true, true)
}

fn kv_iterator_key_buf(ctx: OpContext, args: Vec<HostValue>) -> OpResult {
    cursor_read(ctx, args, "iteratorKeyBuffer", true, false)
}

fn kv_iterator_value_text(ctx: OpContext, args: Vec<HostValue>) -> OpResult {
    cursor_read(ctx, args, "iteratorValueText", false, true)
}

fn kv_iterator_value_buf(ctx: OpContext, args: Vec<HostValue>) -> OpResult {
    cursor_read(ctx, args, "iteratorValueBuffer", false, false)
}

/// Tri-state comparison of the cursor's current key against a probe,
/// per the engine's byte-lexicographic order: negative when the current
/// key sorts before the probe, zero on equality, positive otherwise.
fn kv_iterator_key_compare(ctx: OpContext, args: Vec<HostValue>) -> OpResult {
    const OP: &str = "iteratorKeyCompare";
    let bridge = bridge(&ctx)?;
    with_cursor(&bridge, &args, OP, |cursor| {
        let probe = bytes_arg(&args, 1, OP)?;
        let key = cursor.key().ok_or(KvError::CursorNotValid { op: OP })?;
        let ordering = match key.cmp(probe.as_slice()) {
            Ordering::Less => -1,
            Ordering::Equal => 0,
            Ordering::Greater => 1,
        };
        Ok(HostValue::from(ordering))
    })
    .map_err(Into::into)
}

// ---------------------------------------------------------------------------
// Batch ops

fn kv_batch_new(ctx: OpContext, _args: Vec<HostValue>) -> OpResult {
    let bridge = bridge(&ctx)?;
    let idx = bridge.batches.lock().allocate(WriteBatch::new());
    Ok(HostValue::from(idx))
}

fn kv_batch_put(ctx: OpContext, args: Vec<HostValue>) -> OpResult {
    const OP: &str = "batchPut";
    let bridge = bridge(&ctx)?;
    let idx = handle_arg(&args, 0, OP, "batch")?;

    let mut batches = bridge.batches.lock();
    let batch = batches
        .get_mut(idx)
        .map_err(|source| KvError::handle(OP, "batch", source))?;
    let key = bytes_arg(&args, 1, OP)?;
    let value = bytes_arg(&args, 2, OP)?;
    batch.put(key, value);
    Ok(HostValue::Null)
}

fn kv_batch_delete(ctx: OpContext, args: Vec<HostValue>) -> OpResult {
    const OP: &str = "batchDelete";
    let bridge = bridge(&ctx)?;
    let idx = handle_arg(&args, 0, OP, "batch")?;

    let mut batches = bridge.batches.lock();
    let batch = batches
        .get_mut(idx)
        .map_err(|source| KvError::handle(OP, "batch", source))?;
    let key = bytes_arg(&args, 1, OP)?;
    batch.delete(key);
    Ok(HostValue::Null)
}

fn kv_batch_write(ctx: OpContext, args: Vec<HostValue>) -> OpResult {
    const OP: &str = "writeBatch";
    let bridge = bridge(&ctx)?;
    let store_idx = handle_arg(&args, 0, OP, "db")?;
    let batch_idx = handle_arg(&args, 1, OP, "batch")?;

    let stores = bridge.stores.lock();
    let store = stores
        .get(store_idx)
        .map_err(|source| KvError::handle(OP, "db", source))?;
    let batches = bridge.batches.lock();
    let batch = batches
        .get(batch_idx)
        .map_err(|source| KvError::handle(OP, "batch", source))?;
    store.write(batch).map_err(|err| KvError::engine(OP, err))?;
    Ok(HostValue::Null)
}

fn kv_batch_close(ctx: OpContext, args: Vec<HostValue>) -> OpResult {
    const OP: &str = "closeBatch";
    let bridge = bridge(&ctx)?;
    let idx = handle_arg(&args, 0, OP, "batch")?;
    bridge
        .batches
        .lock()
        .release(idx)
        .map_err(|source| KvError::handle(OP, "batch", source))?;
    Ok(HostValue::Null)
}

// ---------------------------------------------------------------------------
// Bulk copy

/// Copy every entry of the source store into the destination, either
/// with per-entry puts (visible mid-copy) or staged through one batch
/// applied atomically at the end.
fn kv_merge(ctx: OpContext, args: Vec<HostValue>) -> OpResult {
    const OP: &str = "merge";
    let bridge = bridge(&ctx)?;
    let dst_idx = handle_arg(&args, 0, OP, "dst")?;
    let src_idx = handle_arg(&args, 1, OP, "src")?;

    let stores = bridge.stores.lock();
    let dst = stores
        .get(dst_idx)
        .map_err(|source| KvError::handle(OP, "dst", source))?;
    let src = stores
        .get(src_idx)
        .map_err(|source| KvError::handle(OP, "src", source))?;
    let use_batch = bool_arg(&args, 2, OP)?;

    let mut batch = WriteBatch::new();
    let mut cursor = src.cursor().map_err(|err| KvError::engine(OP, err))?;
    cursor.seek_to_first();
    while cursor.valid() {
        if let Some((key, value)) = cursor.entry() {
            if use_batch {
                batch.put(key, value);
            } else {
                dst.put(key, value).map_err(|err| KvError::engine(OP, err))?;
            }
        }
        cursor.next();
    }

    // Scan-time engine errors are independent of per-entry writes.
    cursor.status().map_err(|err| KvError::engine(OP, err))?;

    if use_batch {
        dst.write(&batch).map_err(|err| KvError::engine(OP, err))?;
    }

    Ok(HostValue::Null)
}

// ---------------------------------------------------------------------------
// Auxiliary file access

/// Ranged raw read of an arbitrary file, sharing the raw-buffer output
/// convention of the buffer-flavored ops.
fn kv_read_file_buf(ctx: OpContext, args: Vec<HostValue>) -> OpResult {
    const OP: &str = "readFileRange";
    let _ = bridge(&ctx)?;
    let path = text_arg(&args, 0, OP)?;
    let pos = u64_arg(&args, 1, OP)?;
    let len = u64_arg(&args, 2, OP)?;

    let mut file = File::open(&path).map_err(|err| KvError::FileOpen {
        op: OP,
        message: err.to_string(),
    })?;
    let size = file
        .metadata()
        .map_err(|err| KvError::FileRead {
            op: OP,
            message: err.to_string(),
        })?
        .len();
    let end = pos.checked_add(len).ok_or(KvError::FileRange { op: OP })?;
    if size < end {
        return Err(KvError::FileRange { op: OP }.into());
    }

    file.seek(SeekFrom::Start(pos)).map_err(|err| KvError::FileRead {
        op: OP,
        message: err.to_string(),
    })?;
    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf).map_err(|err| KvError::FileRead {
        op: OP,
        message: err.to_string(),
    })?;
    Ok(HostValue::Buffer(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_runtime::ExtensionRegistry;
    use tempfile::TempDir;

    fn setup() -> (ExtensionRegistry, TempDir) {
        let dir = TempDir::new().unwrap();
        let registry = ExtensionRegistry::new();
        registry.register_extension(kv_extension(dir.path())).unwrap();
        (registry, dir)
    }

    fn open(registry: &ExtensionRegistry, name: &str) -> HostValue {
        registry
            .invoke(
                "__burrow_kv_open",
                vec![name.into(), true.into(), false.into()],
            )
            .unwrap()
    }

    fn err_code(result: OpResult) -> String {
        result.unwrap_err().to_string()
    }

    #[test]
    fn put_get_roundtrip_in_both_forms() {
        let (registry, _dir) = setup();
        let db = open(&registry, "rt.db");

        registry
            .invoke(
                "__burrow_kv_put",
                vec![db.clone(), "text-key".into(), "text-value".into()],
            )
            .unwrap();
        let out = registry
            .invoke("__burrow_kv_get_text", vec![db.clone(), "text-key".into()])
            .unwrap();
        assert_eq!(out.as_text(), Some("text-value"));

        // Buffer form, embedded NUL and empty value.
        let key = HostValue::from(vec![0u8, 1, 0, 2]);
        registry
            .invoke(
                "__burrow_kv_put",
                vec![db.clone(), key.clone(), HostValue::from(Vec::new())],
            )
            .unwrap();
        let out = registry
            .invoke("__burrow_kv_get_buf", vec![db.clone(), key])
            .unwrap();
        assert_eq!(out.as_buffer(), Some(&[][..]));

        // Empty key is a legal key.
        registry
            .invoke("__burrow_kv_put", vec![db.clone(), "".into(), "e".into()])
            .unwrap();
        let out = registry
            .invoke("__burrow_kv_get_text", vec![db, "".into()])
            .unwrap();
        assert_eq!(out.as_text(), Some("e"));
    }

    #[test]
    fn get_absent_returns_null_not_error() {
        let (registry, _dir) = setup();
        let db = open(&registry, "absent.db");
        let out = registry
            .invoke("__burrow_kv_get_text", vec![db.clone(), "missing".into()])
            .unwrap();
        assert!(out.is_null());
        let out = registry
            .invoke("__burrow_kv_get_buf", vec![db, "missing".into()])
            .unwrap();
        assert!(out.is_null());
    }

    #[test]
    fn delete_absent_succeeds() {
        let (registry, _dir) = setup();
        let db = open(&registry, "del.db");
        registry
            .invoke("__burrow_kv_delete", vec![db, "never-there".into()])
            .unwrap();
    }

    #[test]
    fn operations_on_closed_handle_fail_closed() {
        let (registry, _dir) = setup();
        let db = open(&registry, "closed.db");
        registry.invoke("__burrow_kv_close", vec![db.clone()]).unwrap();

        let code = err_code(registry.invoke(
            "__burrow_kv_put",
            vec![db.clone(), "k".into(), "v".into()],
        ));
        assert_eq!(code, "put/db/closed");

        let code = err_code(registry.invoke("__burrow_kv_get_text", vec![db.clone(), "k".into()]));
        assert_eq!(code, "getText/db/closed");

        // Double close is an error, not a silent no-op.
        let code = err_code(registry.invoke("__burrow_kv_close", vec![db]));
        assert_eq!(code, "close/db/closed");
    }

    #[test]
    fn handle_shape_errors_have_distinct_codes() {
        let (registry, _dir) = setup();
        open(&registry, "shape.db");

        let code = err_code(registry.invoke(
            "__burrow_kv_put",
            vec!["zero".into(), "k".into(), "v".into()],
        ));
        assert_eq!(code, "put/db/param-not-a-number");

        let code = err_code(registry.invoke(
            "__burrow_kv_put",
            vec![HostValue::Number(99.0), "k".into(), "v".into()],
        ));
        assert_eq!(code, "put/db/idx-out-of-range");
    }

    #[test]
    fn handle_resolution_wins_over_argument_coercion() {
        let (registry, _dir) = setup();
        let db = open(&registry, "order.db");
        registry.invoke("__burrow_kv_close", vec![db.clone()]).unwrap();

        // Closed handle plus a non-coercible key: the handle error is
        // reported, not invalid-params.
        let code = err_code(registry.invoke(
            "__burrow_kv_put",
            vec![db.clone(), HostValue::Number(1.0), "v".into()],
        ));
        assert_eq!(code, "put/db/closed");

        let code = err_code(registry.invoke(
            "__burrow_kv_delete",
            vec![db.clone(), HostValue::Null],
        ));
        assert_eq!(code, "delete/db/closed");

        let code = err_code(registry.invoke(
            "__burrow_kv_get_text",
            vec![db.clone(), HostValue::Bool(true)],
        ));
        assert_eq!(code, "getText/db/closed");

        let code = err_code(registry.invoke(
            "__burrow_kv_merge",
            vec![db, open(&registry, "order2.db"), "not-a-bool".into()],
        ));
        assert_eq!(code, "merge/dst/closed");

        let batch = registry.invoke("__burrow_kv_batch_new", vec![]).unwrap();
        registry
            .invoke("__burrow_kv_batch_close", vec![batch.clone()])
            .unwrap();
        let code = err_code(registry.invoke(
            "__burrow_kv_batch_put",
            vec![batch.clone(), HostValue::Number(1.0), "v".into()],
        ));
        assert_eq!(code, "batchPut/batch/closed");
        let code = err_code(registry.invoke(
            "__burrow_kv_batch_delete",
            vec![batch, HostValue::Null],
        ));
        assert_eq!(code, "batchDelete/batch/closed");
    }

    #[test]
    fn bad_key_value_shapes_are_invalid_params() {
        let (registry, _dir) = setup();
        let db = open(&registry, "shape2.db");

        let code = err_code(registry.invoke(
            "__burrow_kv_put",
            vec![db.clone(), HostValue::Number(1.0), "v".into()],
        ));
        assert_eq!(code, "put/invalid-params");

        let code = err_code(registry.invoke(
            "__burrow_kv_open",
            vec!["x.db".into(), "yes".into(), false.into()],
        ));
        assert_eq!(code, "open/invalid-params");
    }

    #[test]
    fn failed_open_still_burns_a_handle_slot() {
        let (registry, _dir) = setup();

        // create_if_missing=false on a missing path fails.
        let result = registry.invoke(
            "__burrow_kv_open",
            vec!["missing.db".into(), false.into(), false.into()],
        );
        assert!(err_code(result).starts_with("open/"));

        let db = open(&registry, "next.db");
        assert_eq!(db.as_number(), Some(1.0));
    }

    #[test]
    fn handle_indices_are_never_reused() {
        let (registry, _dir) = setup();
        for i in 0..3 {
            let db = open(&registry, &format!("s{i}.db"));
            assert_eq!(db.as_number(), Some(i as f64));
        }
        registry
            .invoke("__burrow_kv_close", vec![HostValue::Number(0.0)])
            .unwrap();
        let db = open(&registry, "s3.db");
        assert_eq!(db.as_number(), Some(3.0));
    }

    #[test]
    fn iterator_walks_keys_in_order_both_directions() {
        let (registry, _dir) = setup();
        let db = open(&registry, "iter.db");
        for key in ["b", "a", "c"] {
            registry
                .invoke("__burrow_kv_put", vec![db.clone(), key.into(), key.into()])
                .unwrap();
        }

        let it = registry
            .invoke("__burrow_kv_iterator_new", vec![db.clone()])
            .unwrap();

        let mut seen = Vec::new();
        registry
            .invoke("__burrow_kv_iterator_seek_to_first", vec![it.clone()])
            .unwrap();
        loop {
            let valid = registry
                .invoke("__burrow_kv_iterator_valid", vec![it.clone()])
                .unwrap();
            if valid.as_bool() != Some(true) {
                break;
            }
            let key = registry
                .invoke("__burrow_kv_iterator_key_text", vec![it.clone()])
                .unwrap();
            seen.push(key.as_text().unwrap().to_string());
            registry
                .invoke("__burrow_kv_iterator_next", vec![it.clone()])
                .unwrap();
        }
        assert_eq!(seen, vec!["a", "b", "c"]);

        let mut reversed = Vec::new();
        registry
            .invoke("__burrow_kv_iterator_seek_to_last", vec![it.clone()])
            .unwrap();
        loop {
            let valid = registry
                .invoke("__burrow_kv_iterator_valid", vec![it.clone()])
                .unwrap();
            if valid.as_bool() != Some(true) {
                break;
            }
            let key = registry
                .invoke("__burrow_kv_iterator_key_text", vec![it.clone()])
                .unwrap();
            reversed.push(key.as_text().unwrap().to_string());
            registry
                .invoke("__burrow_kv_iterator_prev", vec![it.clone()])
                .unwrap();
        }
        assert_eq!(reversed, vec!["c", "b", "a"]);

        registry.invoke("__burrow_kv_iterator_close", vec![it]).unwrap();
    }

    #[test]
    fn iterator_seek_and_value_forms() {
        let (registry, _dir) = setup();
        let db = open(&registry, "seek.db");
        registry
            .invoke("__burrow_kv_put", vec![db.clone(), "a".into(), "1".into()])
            .unwrap();
        registry
            .invoke(
                "__burrow_kv_put",
                vec![db.clone(), "c".into(), HostValue::from(vec![0u8, 9])],
            )
            .unwrap();

        let it = registry
            .invoke("__burrow_kv_iterator_new", vec![db])
            .unwrap();
        registry
            .invoke("__burrow_kv_iterator_seek", vec![it.clone(), "b".into()])
            .unwrap();

        let key = registry
            .invoke("__burrow_kv_iterator_key_buf", vec![it.clone()])
            .unwrap();
        assert_eq!(key.as_buffer(), Some(&b"c"[..]));
        let value = registry
            .invoke("__burrow_kv_iterator_value_buf", vec![it.clone()])
            .unwrap();
        assert_eq!(value.as_buffer(), Some(&[0u8, 9][..]));
        let value = registry
            .invoke("__burrow_kv_iterator_value_text", vec![it])
            .unwrap();
        assert!(value.as_text().is_some());
    }

    #[test]
    fn iterator_key_compare_is_tristate() {
        let (registry, _dir) = setup();
        let db = open(&registry, "cmp.db");
        registry
            .invoke("__burrow_kv_put", vec![db.clone(), "m".into(), "v".into()])
            .unwrap();

        let it = registry
            .invoke("__burrow_kv_iterator_new", vec![db])
            .unwrap();
        registry
            .invoke("__burrow_kv_iterator_seek_to_first", vec![it.clone()])
            .unwrap();

        let same = registry
            .invoke(
                "__burrow_kv_iterator_key_compare",
                vec![it.clone(), "m".into()],
            )
            .unwrap();
        assert_eq!(same.as_number(), Some(0.0));

        // Probe sorts after the current key: negative.
        let after = registry
            .invoke(
                "__burrow_kv_iterator_key_compare",
                vec![it.clone(), "z".into()],
            )
            .unwrap();
        assert_eq!(after.as_number(), Some(-1.0));

        let before = registry
            .invoke("__burrow_kv_iterator_key_compare", vec![it, "a".into()])
            .unwrap();
        assert_eq!(before.as_number(), Some(1.0));
    }

    #[test]
    fn reading_an_unpositioned_iterator_is_a_structured_error() {
        let (registry, _dir) = setup();
        let db = open(&registry, "invalid.db");
        let it = registry
            .invoke("__burrow_kv_iterator_new", vec![db])
            .unwrap();

        let code = err_code(registry.invoke("__burrow_kv_iterator_key_text", vec![it.clone()]));
        assert_eq!(code, "iteratorKeyText/iterator-not-valid");
        let code = err_code(registry.invoke("__burrow_kv_iterator_value_buf", vec![it]));
        assert_eq!(code, "iteratorValueBuffer/iterator-not-valid");
    }

    #[test]
    fn batch_staging_is_isolated_and_apply_is_last_wins() {
        let (registry, _dir) = setup();
        let db = open(&registry, "batch.db");
        let batch = registry.invoke("__burrow_kv_batch_new", vec![]).unwrap();

        registry
            .invoke(
                "__burrow_kv_batch_put",
                vec![batch.clone(), "x".into(), "1".into()],
            )
            .unwrap();
        registry
            .invoke("__burrow_kv_batch_delete", vec![batch.clone(), "x".into()])
            .unwrap();
        registry
            .invoke(
                "__burrow_kv_batch_put",
                vec![batch.clone(), "y".into(), "2".into()],
            )
            .unwrap();

        // Staging never touches the store.
        let out = registry
            .invoke("__burrow_kv_get_text", vec![db.clone(), "y".into()])
            .unwrap();
        assert!(out.is_null());

        registry
            .invoke("__burrow_kv_batch_write", vec![db.clone(), batch.clone()])
            .unwrap();
        let out = registry
            .invoke("__burrow_kv_get_text", vec![db.clone(), "x".into()])
            .unwrap();
        assert!(out.is_null());
        let out = registry
            .invoke("__burrow_kv_get_text", vec![db.clone(), "y".into()])
            .unwrap();
        assert_eq!(out.as_text(), Some("2"));

        // The same batch can be applied to a second store.
        let other = open(&registry, "batch2.db");
        registry
            .invoke("__burrow_kv_batch_write", vec![other.clone(), batch.clone()])
            .unwrap();
        let out = registry
            .invoke("__burrow_kv_get_text", vec![other, "y".into()])
            .unwrap();
        assert_eq!(out.as_text(), Some("2"));

        registry
            .invoke("__burrow_kv_batch_close", vec![batch.clone()])
            .unwrap();
        let code = err_code(registry.invoke(
            "__burrow_kv_batch_put",
            vec![batch.clone(), "z".into(), "3".into()],
        ));
        assert_eq!(code, "batchPut/batch/closed");
        let code = err_code(registry.invoke("__burrow_kv_batch_write", vec![db, batch]));
        assert_eq!(code, "writeBatch/batch/closed");
    }

    #[test]
    fn merge_copies_src_over_dst_in_both_modes() {
        for use_batch in [true, false] {
            let (registry, _dir) = setup();
            let src = open(&registry, "src.db");
            let dst = open(&registry, "dst.db");

            for (key, value) in [("a", "A"), ("b", "B")] {
                registry
                    .invoke(
                        "__burrow_kv_put",
                        vec![src.clone(), key.into(), value.into()],
                    )
                    .unwrap();
            }
            registry
                .invoke("__burrow_kv_put", vec![dst.clone(), "b".into(), "old".into()])
                .unwrap();
            registry
                .invoke("__burrow_kv_put", vec![dst.clone(), "c".into(), "C".into()])
                .unwrap();

            registry
                .invoke(
                    "__burrow_kv_merge",
                    vec![dst.clone(), src.clone(), use_batch.into()],
                )
                .unwrap();

            for (key, value) in [("a", "A"), ("b", "B"), ("c", "C")] {
                let out = registry
                    .invoke("__burrow_kv_get_text", vec![dst.clone(), key.into()])
                    .unwrap();
                assert_eq!(out.as_text(), Some(value), "use_batch={use_batch}");
            }
        }
    }

    #[test]
    fn merge_reports_which_handle_was_bad() {
        let (registry, _dir) = setup();
        let db = open(&registry, "m.db");
        registry.invoke("__burrow_kv_close", vec![db.clone()]).unwrap();
        let live = open(&registry, "m2.db");

        let code = err_code(registry.invoke(
            "__burrow_kv_merge",
            vec![db.clone(), live.clone(), true.into()],
        ));
        assert_eq!(code, "merge/dst/closed");

        let code = err_code(registry.invoke("__burrow_kv_merge", vec![live, db, true.into()]));
        assert_eq!(code, "merge/src/closed");
    }

    #[test]
    fn destroy_removes_a_store_on_disk() {
        let (registry, dir) = setup();
        let db = open(&registry, "boom.db");
        registry
            .invoke("__burrow_kv_put", vec![db.clone(), "k".into(), "v".into()])
            .unwrap();
        registry.invoke("__burrow_kv_close", vec![db]).unwrap();

        registry
            .invoke("__burrow_kv_destroy", vec!["boom.db".into()])
            .unwrap();
        assert!(!dir.path().join("boom.db").exists());

        let db = open(&registry, "boom.db");
        let out = registry
            .invoke("__burrow_kv_get_text", vec![db, "k".into()])
            .unwrap();
        assert!(out.is_null());
    }

    #[test]
    fn read_file_range_returns_raw_bytes() {
        let (registry, dir) = setup();
        let path = dir.path().join("blob.bin");
        std::fs::write(&path, b"0123456789").unwrap();
        let path_text = HostValue::from(path.to_str().unwrap());

        let out = registry
            .invoke(
                "__burrow_kv_read_file_buf",
                vec![path_text.clone(), HostValue::Number(2.0), HostValue::Number(4.0)],
            )
            .unwrap();
        assert_eq!(out.as_buffer(), Some(&b"2345"[..]));

        let code = err_code(registry.invoke(
            "__burrow_kv_read_file_buf",
            vec![path_text, HostValue::Number(8.0), HostValue::Number(4.0)],
        ));
        assert_eq!(code, "readFileRange/invalid-len-plus-pos");

        let missing = HostValue::from(dir.path().join("nope.bin").to_str().unwrap());
        let code = err_code(registry.invoke(
            "__burrow_kv_read_file_buf",
            vec![missing, HostValue::Number(0.0), HostValue::Number(1.0)],
        ));
        assert!(code.starts_with("readFileRange/open-error/"));
    }

    #[test]
    fn teardown_releases_every_live_handle() {
        let (registry, _dir) = setup();
        let db = open(&registry, "td.db");
        let it = registry
            .invoke("__burrow_kv_iterator_new", vec![db.clone()])
            .unwrap();
        let batch = registry.invoke("__burrow_kv_batch_new", vec![]).unwrap();

        registry.teardown();

        let code = err_code(registry.invoke(
            "__burrow_kv_put",
            vec![db, "k".into(), "v".into()],
        ));
        assert_eq!(code, "put/db/closed");
        let code = err_code(registry.invoke("__burrow_kv_iterator_valid", vec![it]));
        assert_eq!(code, "iteratorValid/iterator/closed");
        let code = err_code(registry.invoke(
            "__burrow_kv_batch_put",
            vec![batch, "k".into(), "v".into()],
        ));
        assert_eq!(code, "batchPut/batch/closed");
    }

    #[test]
    fn cursor_snapshot_survives_store_close() {
        let (registry, _dir) = setup();
        let db = open(&registry, "snap.db");
        registry
            .invoke("__burrow_kv_put", vec![db.clone(), "a".into(), "1".into()])
            .unwrap();
        let it = registry
            .invoke("__burrow_kv_iterator_new", vec![db.clone()])
            .unwrap();
        registry.invoke("__burrow_kv_close", vec![db]).unwrap();

        // The cursor pinned its snapshot; it still reads consistently.
        registry
            .invoke("__burrow_kv_iterator_seek_to_first", vec![it.clone()])
            .unwrap();
        let key = registry
            .invoke("__burrow_kv_iterator_key_text", vec![it])
            .unwrap();
        assert_eq!(key.as_text(), Some("a"));
    }
}
