#![warn(missing_docs)]
//! Library for decompressing RVZ-compressed Nintendo optical disc images
//! (GameCube and Wii) back into their original ISO form.
//!
//! An RVZ file stores the disc in compressed "groups", with junk padding
//! replaced by a seeded PRNG and Wii partition data stored decrypted with its
//! hash tree stripped. [`RvzReader`](read::RvzReader) reverses all of this
//! lazily: it parses and validates the container, decompresses each group on
//! demand, regenerates padding, rebuilds the H0/H1/H2 hash tree, re-encrypts
//! partition sectors, and yields the disc as a sequential byte stream that is
//! bit-exact with the original image.
//!
//! # Examples
//!
//! Decompressing an RVZ file to ISO:
//!
//! ```no_run
//! use std::{fs::File, io::BufReader};
//!
//! let file = File::open("path/to/file.rvz").expect("Failed to open file");
//! let mut reader = rvz::read::RvzReader::new(Box::new(BufReader::new(file)))
//!     .expect("Failed to open RVZ");
//!
//! let mut out = File::create("output.iso").expect("Failed to create output file");
//! // `RvzReader` implements `BufRead`, so any `Read`-to-`Write` copy works.
//! // `buf_copy` avoids an intermediate buffer.
//! rvz::util::buf_copy(&mut reader, &mut out).expect("Failed to write data");
//! ```

pub mod common;
pub(crate) mod format;
pub(crate) mod group;
pub(crate) mod packed;
pub(crate) mod part;
pub(crate) mod raw;
pub mod read;
pub mod util;

/// Error types for rvz.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An error for disc format related issues.
    #[error("disc format error: {0}")]
    DiscFormat(String),
    /// A feature of the format that this library does not implement.
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// A general I/O error.
    #[error("{0}")]
    Io(String, #[source] std::io::Error),
    /// An unknown error.
    #[error("error: {0}")]
    Other(String),
}

impl From<&str> for Error {
    #[inline]
    fn from(s: &str) -> Error { Error::Other(s.to_string()) }
}

impl From<String> for Error {
    #[inline]
    fn from(s: String) -> Error { Error::Other(s) }
}

impl From<zerocopy::AllocError> for Error {
    #[inline]
    fn from(_: zerocopy::AllocError) -> Error {
        Error::Io(
            "allocation failed".to_string(),
            std::io::Error::from(std::io::ErrorKind::OutOfMemory),
        )
    }
}

/// Helper result type for [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Helper trait for adding context to errors.
pub trait ErrorContext {
    /// Adds context to an error.
    fn context(self, context: impl Into<String>) -> Error;
}

impl ErrorContext for std::io::Error {
    #[inline]
    fn context(self, context: impl Into<String>) -> Error { Error::Io(context.into(), self) }
}

/// Helper trait for adding context to result errors.
pub trait ResultContext<T> {
    /// Adds context to a result error.
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Adds context to a result error using a closure.
    fn with_context<F>(self, f: F) -> Result<T>
    where F: FnOnce() -> String;
}

impl<T, E> ResultContext<T> for Result<T, E>
where E: ErrorContext
{
    #[inline]
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }

    #[inline]
    fn with_context<F>(self, f: F) -> Result<T>
    where F: FnOnce() -> String {
        self.map_err(|e| e.context(f()))
    }
}
