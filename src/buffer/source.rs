use super::Buffer;
use std::cell::RefCell;
use std::fmt::{Debug, Formatter};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::rc::Rc;

/// Produces bytes for freshly allocated buffer memory.
///
/// `offset` is the source position of `dst[0]`: the logical buffer offset
/// plus the offset the source was registered with.
pub trait Filler {
    /// Writes the bytes starting at source position `offset` into `dst`.
    fn fill(&self, dst: &mut [u8], offset: i64) -> io::Result<()>;
}

impl<F> Filler for F
where
    F: Fn(&mut [u8], i64) -> io::Result<()>,
{
    fn fill(&self, dst: &mut [u8], offset: i64) -> io::Result<()> {
        self(dst, offset)
    }
}

/// Where a buffer takes the bytes of its sparse parts from.
#[derive(Clone)]
pub(crate) enum BufferSource {
    /// Bytes alias the blocks of another buffer at `offset` past our logical
    /// position.
    Buffer { buffer: Buffer, offset: i64 },
    /// Bytes are written into new blocks by a filler.
    Filler { filler: Rc<dyn Filler>, offset: i64 },
}

impl Debug for BufferSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BufferSource::Buffer { buffer, offset } => f.write_fmt(format_args!(
                "Buffer(range: {}, offset: {})",
                buffer.range(),
                offset
            )),
            BufferSource::Filler { offset, .. } => {
                f.write_fmt(format_args!("Filler(offset: {})", offset))
            }
        }
    }
}

/// Reads byte ranges of an open file on demand.
pub(crate) struct FileFiller {
    file: RefCell<File>,
}

impl FileFiller {
    /// Opens `path` and returns the filler together with the file size.
    pub(crate) fn open(path: &Path) -> io::Result<(Self, u64)> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok((
            FileFiller {
                file: RefCell::new(file),
            },
            size,
        ))
    }
}

impl Filler for FileFiller {
    fn fill(&self, dst: &mut [u8], offset: i64) -> io::Result<()> {
        let start = u64::try_from(offset).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "negative file offset")
        })?;

        let mut file = self.file.borrow_mut();
        file.seek(SeekFrom::Start(start))?;

        // a chunk may reach past the end of the file; the tail is left untouched
        let mut filled = 0;
        while filled < dst.len() {
            match file.read(&mut dst[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        Ok(())
    }
}
