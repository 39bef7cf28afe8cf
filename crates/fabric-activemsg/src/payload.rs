//! Message body sources.
//!
//! A payload describes where the bytes of a message body live in the sender's
//! memory. The transport asks for them only once it has a transmission buffer,
//! by calling [`PayloadSource::copy_data`], which packs the bytes into the
//! front of that buffer.

/// What happens to a contiguous source once it has been copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadMode {
    /// The caller keeps the buffer; it is left untouched.
    Copy,
    /// The payload owns the buffer and frees it right after copying.
    Release,
}

enum ContiguousSource<'a> {
    Borrowed(&'a [u8]),
    Owned(Box<dyn AsRef<[u8]> + Send + 'a>),
}

/// A single linear buffer.
pub struct ContiguousPayload<'a> {
    src: ContiguousSource<'a>,
}

impl<'a> ContiguousPayload<'a> {
    /// Copy out of `src`, leaving it to the caller.
    pub fn copy(src: &'a [u8]) -> Self {
        Self {
            src: ContiguousSource::Borrowed(src),
        }
    }

    /// Take ownership of `src` and drop it once its bytes are copied.
    pub fn release(src: impl AsRef<[u8]> + Send + 'a) -> Self {
        Self {
            src: ContiguousSource::Owned(Box::new(src)),
        }
    }

    pub fn mode(&self) -> PayloadMode {
        match self.src {
            ContiguousSource::Borrowed(_) => PayloadMode::Copy,
            ContiguousSource::Owned(_) => PayloadMode::Release,
        }
    }

    pub fn size(&self) -> usize {
        self.bytes().len()
    }

    fn bytes(&self) -> &[u8] {
        match &self.src {
            ContiguousSource::Borrowed(b) => b,
            ContiguousSource::Owned(b) => (**b).as_ref(),
        }
    }

    fn copy_data(self, dest: &mut [u8]) {
        let src = self.bytes();
        dest[..src.len()].copy_from_slice(src);
        // an owned source is released here, after the copy
        drop(self);
    }
}

/// `line_count` lines of `line_size` bytes, `line_stride` bytes apart.
pub struct TwoDPayload<'a> {
    src: &'a [u8],
    line_size: usize,
    line_count: usize,
    line_stride: usize,
}

impl<'a> TwoDPayload<'a> {
    /// # Panics
    ///
    /// If `src` is too short to hold the last line.
    pub fn new(src: &'a [u8], line_size: usize, line_count: usize, line_stride: usize) -> Self {
        if line_count > 0 {
            let needed = (line_count - 1) * line_stride + line_size;
            assert!(
                src.len() >= needed,
                "2d payload needs {} source bytes, got {}",
                needed,
                src.len()
            );
        }
        Self {
            src,
            line_size,
            line_count,
            line_stride,
        }
    }

    pub fn size(&self) -> usize {
        self.line_size * self.line_count
    }

    fn copy_data(self, dest: &mut [u8]) {
        let lines = dest[..self.size()].chunks_exact_mut(self.line_size.max(1));
        for (i, line) in lines.enumerate().take(self.line_count) {
            let start = i * self.line_stride;
            line.copy_from_slice(&self.src[start..start + self.line_size]);
        }
    }
}

/// An ordered list of fragments gathered into one packed body.
pub struct SpanPayload<'a> {
    spans: Vec<&'a [u8]>,
    size: usize,
}

impl<'a> SpanPayload<'a> {
    /// `size` must equal the sum of the fragment lengths; this is checked
    /// when the data is copied.
    pub fn new(spans: Vec<&'a [u8]>, size: usize) -> Self {
        Self { spans, size }
    }

    /// Build from fragments, deriving the size from them.
    pub fn from_spans(spans: Vec<&'a [u8]>) -> Self {
        let size = spans.iter().map(|s| s.len()).sum();
        Self { spans, size }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    fn copy_data(self, dest: &mut [u8]) {
        let mut offset = 0;
        let mut bytes_left = self.size;
        for span in &self.spans {
            assert!(
                span.len() <= bytes_left,
                "span payload overrun: fragment of {} bytes with {} of {} declared bytes left",
                span.len(),
                bytes_left,
                self.size
            );
            dest[offset..offset + span.len()].copy_from_slice(span);
            offset += span.len();
            bytes_left -= span.len();
        }
        assert!(
            bytes_left == 0,
            "span payload underrun: {} of {} declared bytes never supplied",
            bytes_left,
            self.size
        );
    }
}

/// The body of one outgoing active message.
pub enum PayloadSource<'a> {
    Contiguous(ContiguousPayload<'a>),
    TwoD(TwoDPayload<'a>),
    Span(SpanPayload<'a>),
}

impl<'a> PayloadSource<'a> {
    /// Number of bytes [`copy_data`](Self::copy_data) writes.
    pub fn size(&self) -> usize {
        match self {
            PayloadSource::Contiguous(p) => p.size(),
            PayloadSource::TwoD(p) => p.size(),
            PayloadSource::Span(p) => p.size(),
        }
    }

    /// Pack the payload into `dest[..self.size()]`.
    ///
    /// Consumes the source: a payload is materialized at most once.
    ///
    /// # Panics
    ///
    /// If `dest` is shorter than the payload, or if a span payload's fragments
    /// do not add up to its declared size.
    pub fn copy_data(self, dest: &mut [u8]) {
        let size = self.size();
        assert!(
            dest.len() >= size,
            "payload of {} bytes does not fit a {} byte buffer",
            size,
            dest.len()
        );
        match self {
            PayloadSource::Contiguous(p) => p.copy_data(dest),
            PayloadSource::TwoD(p) => p.copy_data(dest),
            PayloadSource::Span(p) => p.copy_data(dest),
        }
    }
}

impl<'a> From<ContiguousPayload<'a>> for PayloadSource<'a> {
    fn from(p: ContiguousPayload<'a>) -> Self {
        PayloadSource::Contiguous(p)
    }
}

impl<'a> From<TwoDPayload<'a>> for PayloadSource<'a> {
    fn from(p: TwoDPayload<'a>) -> Self {
        PayloadSource::TwoD(p)
    }
}

impl<'a> From<SpanPayload<'a>> for PayloadSource<'a> {
    fn from(p: SpanPayload<'a>) -> Self {
        PayloadSource::Span(p)
    }
}
