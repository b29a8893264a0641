//! Structural metadata for PE/COFF images and ZIP archives.
//!
//! Both decoders read through a [`io::ByteSource`] and never trust a
//! declared length, count or offset before checking it against the bytes
//! actually available. Nothing is executed or decompressed.
//!
//! ```no_run
//! use binmeta::formats::pe::PeFile;
//! use binmeta::io::FileSource;
//!
//! # fn main() -> binmeta::error::Result<()> {
//! let pe = PeFile::parse(FileSource::open("app.exe")?)?;
//! for (dll, functions) in pe.imports()? {
//!     println!("{dll}: {} functions", functions.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod formats;
pub mod io;
pub mod logging;

pub use config::{DecoderConfig, PeOptions, ZipOptions};
pub use error::{Error, ErrorKind, Result};
pub use formats::pe::PeFile;
pub use formats::zip::ZipArchive;
