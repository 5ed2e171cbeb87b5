//! Settings for buffers and heaps.

/// Default materialization granularity.
///
/// This is the 4 KiB page size of common hosts, fixed at compile time; the
/// host page size is not queried.  Override it per buffer with
/// [`BufferConfig::with_chunk_size`].
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Byte order applied to multi-byte reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endianness {
    /// Least significant byte first.
    Little,
    /// Most significant byte first.
    Big,
    /// Same as [`Endianness::Big`].
    Network,
    /// The byte order of the host.
    #[default]
    Native,
}

impl Endianness {
    /// Returns true if values must be stored least significant byte first.
    pub fn is_little(self) -> bool {
        match self {
            Endianness::Little => true,
            Endianness::Big | Endianness::Network => false,
            Endianness::Native => cfg!(target_endian = "little"),
        }
    }
}

/// Line ending written by [`BufferIter::write_newline`](crate::BufferIter::write_newline).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Newline {
    /// `\r`, classic Mac OS.
    Mac9,
    /// `\n`
    Unix,
    /// `\r\n`
    Windows,
    /// The convention of the host.
    #[default]
    Native,
}

impl Newline {
    /// The bytes written for one line ending.
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            Newline::Mac9 => b"\r",
            Newline::Unix => b"\n",
            Newline::Windows => b"\r\n",
            Newline::Native => {
                if cfg!(windows) {
                    b"\r\n"
                } else {
                    b"\n"
                }
            }
        }
    }
}

/// Per-buffer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferConfig {
    /// Freshly allocated blocks are aligned to and sized in multiples of this.
    pub chunk_size: usize,
    /// Byte order of number reads and writes.
    pub endianness: Endianness,
    /// Line ending of newline writes.
    pub newline: Newline,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            endianness: Endianness::default(),
            newline: Newline::default(),
        }
    }
}

impl BufferConfig {
    /// Overrides the materialization granularity. Zero is treated as one.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Overrides the byte order.
    pub fn with_endianness(mut self, endianness: Endianness) -> Self {
        self.endianness = endianness;
        self
    }

    /// Overrides the line ending.
    pub fn with_newline(mut self, newline: Newline) -> Self {
        self.newline = newline;
        self
    }
}

/// Construction parameters of a [`Heap`](crate::Heap).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapConfig {
    /// Zero means the heap grows on demand, starting from one slot.
    pub capacity: usize,
    /// Whether entries may carry handles for positional removal and update.
    pub back_pointers: bool,
}

impl HeapConfig {
    /// A heap that starts with one slot and grows when full.
    pub fn growable() -> Self {
        Self::default()
    }

    /// A heap that holds at most `capacity` entries.
    pub fn fixed(capacity: usize) -> Self {
        Self {
            capacity,
            back_pointers: false,
        }
    }

    /// Enables handles for positional removal and update.
    pub fn with_back_pointers(mut self) -> Self {
        self.back_pointers = true;
        self
    }

    /// Returns true if no fixed capacity was set.
    pub fn is_growable(&self) -> bool {
        self.capacity == 0
    }
}
