//! Ambient helpers: result/error conventions, timing, dataset-root path resolution, and the
//! per-run file-content-equality cache used by practical equality.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::hash::Hasher;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use hashers::fx_hash::FxHasher;

pub type Result<T> = anyhow::Result<T>;
pub type EmptyRes = Result<()>;

/// Same calling convention as a plain `anyhow::ensure!`, kept as its own macro because the
/// merge engine and executor use it pervasively for input-validity checks that should read as
/// domain assertions rather than generic `ensure!`s.
#[macro_export]
macro_rules! require {
    ($cond:expr, $($arg:tt)+) => {
        if !($cond) { anyhow::bail!($($arg)+); }
    };
}

/// Times a closure and passes the result and elapsed milliseconds to `on_done`, for logging
/// around expensive DAO/merge operations.
pub fn measure<T>(f: impl FnOnce() -> T, on_done: impl FnOnce(&T, u128)) -> T {
    let start = Instant::now();
    let result = f();
    let elapsed = start.elapsed().as_millis();
    on_done(&result, elapsed);
    result
}

/// Cooperative cancellation flag shared between a caller and a running analyze/merge job, checked
/// between diff-engine steps and copy boundaries so a cancelled job returns promptly without
/// leaving the target dataset in a worse state than a simple partial write.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self { Self::default() }

    pub fn cancel(&self) { self.0.store(true, Ordering::SeqCst); }

    pub fn is_cancelled(&self) -> bool { self.0.load(Ordering::SeqCst) }
}

/// Outcome of a cancellable job: a normal error is still an `Err`, cancellation is a distinct
/// terminal state rather than an error variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome<T> {
    Done(T),
    Cancelled,
}

/// Directory holding everything for one dataset; every path inside a message is relative to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRoot(pub PathBuf);

impl DatasetRoot {
    pub fn to_absolute(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        assert!(!path.is_absolute(), "path {path:?} should be dataset-root-relative");
        self.0.join(path)
    }
}

/// Content-hash cache for file-content equality, keyed by `(dataset_root, relative_path)` as
/// called for in the design notes. One instance is meant to live for the duration of a single
/// analysis/merge run; it is not a global.
#[derive(Default)]
pub struct FileHashCache {
    inner: RefCell<HashMap<(PathBuf, String), Option<u64>>>,
}

impl FileHashCache {
    pub fn new() -> Self { Self::default() }

    fn digest(path: &Path) -> Option<u64> {
        let mut file = fs::File::open(path).ok()?;
        let mut hasher = FxHasher::default();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf).ok()?;
            if n == 0 { break; }
            hasher.write(&buf[..n]);
        }
        Some(hasher.finish())
    }

    /// `None` means the file doesn't exist.
    pub fn digest_of(&self, ds_root: &DatasetRoot, relative_path: &str) -> Option<u64> {
        let key = (ds_root.0.clone(), relative_path.to_owned());
        if let Some(cached) = self.inner.borrow().get(&key) {
            return *cached;
        }
        let digest = Self::digest(&ds_root.to_absolute(relative_path));
        self.inner.borrow_mut().insert(key, digest);
        digest
    }
}

/// Two file references are `=~=` iff both resolve to existing files with identical bytes, or
/// both resolve to nothing.
pub fn files_practically_equal(cache: &FileHashCache,
                                root1: &DatasetRoot, path1: Option<&str>,
                                root2: &DatasetRoot, path2: Option<&str>) -> bool {
    match (path1, path2) {
        (None, None) => true,
        (Some(p1), Some(p2)) => {
            match (cache.digest_of(root1, p1), cache.digest_of(root2, p2)) {
                (None, None) => true,
                (Some(d1), Some(d2)) => d1 == d2,
                _ => false,
            }
        }
        _ => false,
    }
}

pub fn file_exists(root: &DatasetRoot, path: Option<&str>) -> bool {
    path.map(|p| root.to_absolute(p).exists()).unwrap_or(false)
}

/// Copies a file from `src_root`-relative `path` into `dst_root`, skipping if the destination
/// already has identical content - so a resumed or retried copy is a no-op, as required by the
/// concurrency model's idempotency guarantee.
pub fn copy_file_idempotent(src_root: &DatasetRoot, dst_root: &DatasetRoot, relative_path: &str) -> EmptyRes {
    let src = src_root.to_absolute(relative_path);
    let dst = dst_root.to_absolute(relative_path);
    if !src.exists() {
        log::warn!("File {} referenced but missing under {:?}", relative_path, src_root.0);
        return Ok(());
    }
    if dst.exists() {
        return Ok(());
    }
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(&src, &dst)?;
    Ok(())
}
