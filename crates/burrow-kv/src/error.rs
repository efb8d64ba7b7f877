//! KV bridge error taxonomy.
//!
//! Every failure renders as an `op/...` code string when it crosses the
//! dispatch boundary: caller errors (`invalid-params`, handle errors)
//! are precondition-checked before the engine is touched; engine errors
//! surface their status text verbatim, prefixed with the op name.
//! Absence is not an error: get maps it to an absent result and delete
//! to success.

use crate::engine::EngineError;
use crate::handles::HandleError;
use burrow_runtime::HostError;
use thiserror::Error;

pub type KvResult<T> = Result<T, KvError>;

#[derive(Debug, Error)]
pub enum KvError {
    /// Argument shape or type mismatch
    #[error("{op}/invalid-params")]
    InvalidParams { op: &'static str },

    /// A stale or bogus handle argument; `which` names the handle
    /// position (db, src, dst, iterator, batch)
    #[error("{op}/{which}/{source}")]
    Handle {
        op: &'static str,
        which: &'static str,
        source: HandleError,
    },

    /// Engine failure, status text surfaced verbatim
    #[error("{op}/{status}")]
    Engine { op: &'static str, status: String },

    /// Reading key or value from a cursor with no current entry
    #[error("{op}/iterator-not-valid")]
    CursorNotValid { op: &'static str },

    /// Ranged file read: the file could not be opened
    #[error("{op}/open-error/{message}")]
    FileOpen { op: &'static str, message: String },

    /// Ranged file read: the read itself failed
    #[error("{op}/read-error/{message}")]
    FileRead { op: &'static str, message: String },

    /// Ranged file read: offset plus length exceeds the file size
    #[error("{op}/invalid-len-plus-pos")]
    FileRange { op: &'static str },
}

impl KvError {
    pub fn invalid_params(op: &'static str) -> Self {
        Self::InvalidParams { op }
    }

    pub fn handle(op: &'static str, which: &'static str, source: HandleError) -> Self {
        Self::Handle { op, which, source }
    }

    pub fn engine(op: &'static str, err: EngineError) -> Self {
        Self::Engine {
            op,
            status: err.to_string(),
        }
    }
}

impl From<KvError> for HostError {
    fn from(err: KvError) -> Self {
        HostError::op(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_render_with_op_prefix() {
        assert_eq!(
            KvError::invalid_params("put").to_string(),
            "put/invalid-params"
        );
        assert_eq!(
            KvError::handle("put", "db", HandleError::Closed).to_string(),
            "put/db/closed"
        );
        assert_eq!(
            KvError::handle("merge", "src", HandleError::OutOfRange).to_string(),
            "merge/src/idx-out-of-range"
        );
        assert_eq!(
            KvError::engine("open", EngineError::Backend("IO error: boom".into())).to_string(),
            "open/IO error: boom"
        );
        assert_eq!(
            KvError::FileRange {
                op: "readFileRange"
            }
            .to_string(),
            "readFileRange/invalid-len-plus-pos"
        );
    }
}
