//! Model file access with transparent gzip.
//!
//! A path ending in `.gz` is compressed; anything else is read as is. Plain
//! files are memory-mapped for whole-file reads, so a multi-gigabyte binary
//! model is decoded straight out of the page cache.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::ops::Deref;
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use memmap2::Mmap;
use tracing::debug;

use crate::error::Result;

pub fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

/// Buffered line reader over a plain or gzipped file.
pub fn open_read(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path)?;
    if is_gzip(path) {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Writer for a plain or gzipped file. Call [`ModelWriter::finish`] so the
/// gzip trailer is written and errors are not lost in `Drop`.
pub enum ModelWriter {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

pub fn open_write(path: &Path) -> Result<ModelWriter> {
    let file = BufWriter::new(File::create(path)?);
    if is_gzip(path) {
        Ok(ModelWriter::Gzip(GzEncoder::new(file, Compression::default())))
    } else {
        Ok(ModelWriter::Plain(file))
    }
}

impl ModelWriter {
    pub fn finish(self) -> Result<()> {
        let mut inner = match self {
            ModelWriter::Plain(w) => w,
            ModelWriter::Gzip(enc) => enc.finish()?,
        };
        inner.flush()?;
        Ok(())
    }
}

impl Write for ModelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ModelWriter::Plain(w) => w.write(buf),
            ModelWriter::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ModelWriter::Plain(w) => w.flush(),
            ModelWriter::Gzip(w) => w.flush(),
        }
    }
}

/// Whole contents of a model file.
pub enum ModelBytes {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for ModelBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            ModelBytes::Mapped(m) => m,
            ModelBytes::Owned(v) => v,
        }
    }
}

/// Read a whole file: mapped if plain, decompressed into memory if gzipped.
pub fn read_all(path: &Path) -> Result<ModelBytes> {
    let file = File::open(path)?;
    if is_gzip(path) {
        let mut buf = Vec::new();
        GzDecoder::new(file).read_to_end(&mut buf)?;
        debug!(path = %path.display(), bytes = buf.len(), "decompressed model file");
        return Ok(ModelBytes::Owned(buf));
    }
    if file.metadata()?.len() == 0 {
        // Zero-length maps are rejected on some platforms.
        return Ok(ModelBytes::Owned(Vec::new()));
    }
    // SAFETY: the map is read-only and model files are not modified while
    // loaded; a concurrent truncation would surface as SIGBUS, as with any
    // mapped reader.
    let map = unsafe { Mmap::map(&file)? };
    debug!(path = %path.display(), bytes = map.len(), "mapped model file");
    Ok(ModelBytes::Mapped(map))
}

/// First `n` bytes of a file (fewer if it is shorter), decompressed if gzipped.
pub fn peek(path: &Path, n: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(n);
    let file = File::open(path)?;
    if is_gzip(path) {
        GzDecoder::new(file).take(n as u64).read_to_end(&mut buf)?;
    } else {
        file.take(n as u64).read_to_end(&mut buf)?;
    }
    Ok(buf)
}
