use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::Handle;

/// Segment size used when realizing file regions and copying views.
const SEGMENT_SIZE: usize = 8 * 1024;

/// A chained buffer of reference-counted byte segments.
///
/// Blobs extend the OS socket buffers in user space: the write queue and
/// read queue of a stream socket are blobs, and appending one data
/// container to another references segments instead of copying wherever
/// the source allows it.
#[derive(Debug, Clone, Default)]
pub struct Blob {
    segments: VecDeque<Bytes>,
    length: usize,
}

impl Blob {
    /// Returns an empty blob.
    pub fn new() -> Blob {
        Blob::default()
    }

    /// Returns the total number of bytes in the blob.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Returns true if the blob holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Appends a segment by reference.
    pub fn append(&mut self, segment: Bytes) {
        if !segment.is_empty() {
            self.length += segment.len();
            self.segments.push_back(segment);
        }
    }

    /// Appends a copy of the given bytes.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.append(Bytes::copy_from_slice(bytes));
    }

    /// Appends all segments of another blob by reference.
    pub fn append_blob(&mut self, other: &Blob) {
        for segment in &other.segments {
            self.append(segment.clone());
        }
    }

    /// Removes the first `n` bytes. Removing more bytes than the blob
    /// holds empties it.
    pub fn pop_front(&mut self, n: usize) {
        let mut remaining = n.min(self.length);
        self.length -= remaining;
        while remaining > 0 {
            let front = match self.segments.front_mut() {
                Some(front) => front,
                None => break,
            };
            if front.len() <= remaining {
                remaining -= front.len();
                self.segments.pop_front();
            } else {
                front.advance(remaining);
                remaining = 0;
            }
        }
    }

    /// Splits off the first `n` bytes into a new blob, referencing
    /// segments where possible.
    pub fn split_to(&mut self, n: usize) -> Blob {
        let mut taken = Blob::new();
        let mut remaining = n.min(self.length);
        while remaining > 0 {
            let front = match self.segments.front_mut() {
                Some(front) => front,
                None => break,
            };
            if front.len() <= remaining {
                remaining -= front.len();
                self.length -= front.len();
                let segment = self.segments.pop_front().expect("non-empty");
                taken.append(segment);
            } else {
                let segment = front.split_to(remaining);
                self.length -= remaining;
                remaining = 0;
                taken.append(segment);
            }
        }
        taken
    }

    /// Returns the segments in order.
    pub fn segments(&self) -> impl Iterator<Item = &Bytes> {
        self.segments.iter()
    }

    /// Flattens the blob into one contiguous byte vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut flat = Vec::with_capacity(self.length);
        for segment in &self.segments {
            flat.extend_from_slice(segment);
        }
        flat
    }

    /// Writes every byte to the given sink, failing on a short write.
    pub fn write_to(&self, writer: &mut dyn io::Write) -> Result<()> {
        for segment in &self.segments {
            writer.write_all(segment).map_err(Error::from)?;
        }
        Ok(())
    }
}

impl PartialEq for Blob {
    fn eq(&self, other: &Blob) -> bool {
        if self.length != other.length {
            return false;
        }
        chunk_streams_equal(self.segments(), other.segments())
    }
}

impl Eq for Blob {}

fn chunk_streams_equal<'a, 'b>(
    lhs: impl Iterator<Item = &'a Bytes>,
    rhs: impl Iterator<Item = &'b Bytes>,
) -> bool {
    let mut lhs = lhs.map(|segment| &segment[..]).filter(|s| !s.is_empty());
    let mut rhs = rhs.map(|segment| &segment[..]).filter(|s| !s.is_empty());

    let mut left: &[u8] = &[];
    let mut right: &[u8] = &[];
    loop {
        if left.is_empty() {
            left = match lhs.next() {
                Some(chunk) => chunk,
                None => return right.is_empty() && rhs.next().is_none(),
            };
        }
        if right.is_empty() {
            right = match rhs.next() {
                Some(chunk) => chunk,
                None => return false,
            };
        }
        let n = left.len().min(right.len());
        if left[..n] != right[..n] {
            return false;
        }
        left = &left[n..];
        right = &right[n..];
    }
}

/// Allocator for blobs and their segments, injectable to back the chained
/// variant with a pooled allocator.
pub trait BlobFactory: Send + Sync {
    /// Returns a new empty blob.
    fn create_blob(&self) -> Blob {
        Blob::new()
    }

    /// Returns a new mutable segment with at least the given capacity.
    fn create_segment(&self, capacity: usize) -> BytesMut {
        BytesMut::with_capacity(capacity)
    }
}

/// The default, unpooled blob factory.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultBlobFactory;

impl BlobFactory for DefaultBlobFactory {}

/// A region of an open file: the descriptor, the position of the first
/// unconsumed byte, and the number of bytes remaining.
///
/// Appending a file region to a blob reads from the descriptor at the
/// recorded position without advancing anything; popping advances the
/// position and reduces the remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileRegion {
    /// The open file descriptor. The region does not own it.
    pub descriptor: Handle,
    /// Offset of the first byte of the region.
    pub position: u64,
    /// Bytes left in the region.
    pub bytes_remaining: u64,
}

/// A tagged variant describing how a sequence of bytes is held, for
/// uniform treatment by send and receive.
///
/// Reassignment destroys the prior variant. The universal operations are
/// [`size`], [`append_to_blob`], [`pop`], [`copy_to`] and equality.
///
/// [`size`]: Data::size
/// [`append_to_blob`]: Data::append_to_blob
/// [`pop`]: Data::pop
/// [`copy_to`]: Data::copy_to
#[derive(Debug, Default)]
pub enum Data {
    /// No data.
    #[default]
    Undefined,
    /// One shared, reference-counted byte sequence.
    Buffer(Bytes),
    /// One uniquely owned, mutable byte sequence.
    BufferMut(BytesMut),
    /// A scatter-gather array of shared byte sequences.
    BufferArray(Vec<Bytes>),
    /// A scatter-gather array of mutable byte sequences.
    BufferMutArray(Vec<BytesMut>),
    /// A chained buffer of reference-counted segments.
    Blob(Blob),
    /// A shared reference to a chained buffer.
    SharedBlob(Arc<Blob>),
    /// An immutable string.
    Text(String),
    /// A region of an open file.
    File(FileRegion),
}

impl Data {
    /// Returns the number of bytes this container describes. For file
    /// regions this is the bytes remaining.
    pub fn size(&self) -> usize {
        match self {
            Data::Undefined => 0,
            Data::Buffer(bytes) => bytes.len(),
            Data::BufferMut(bytes) => bytes.len(),
            Data::BufferArray(array) => array.iter().map(Bytes::len).sum(),
            Data::BufferMutArray(array) => array.iter().map(BytesMut::len).sum(),
            Data::Blob(blob) => blob.length(),
            Data::SharedBlob(blob) => blob.length(),
            Data::Text(text) => text.len(),
            Data::File(region) => region.bytes_remaining as usize,
        }
    }

    /// Returns true if the container describes no bytes.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Copies or references this container's bytes into a chained-buffer
    /// destination, returning the number of bytes appended.
    ///
    /// File regions are read from the descriptor at the recorded position;
    /// the source is not advanced.
    pub fn append_to_blob(&self, dest: &mut Blob) -> Result<usize> {
        match self {
            Data::Undefined => Ok(0),
            Data::Buffer(bytes) => {
                dest.append(bytes.clone());
                Ok(bytes.len())
            }
            Data::BufferMut(bytes) => {
                dest.extend_from_slice(bytes);
                Ok(bytes.len())
            }
            Data::BufferArray(array) => {
                let mut appended = 0;
                for bytes in array {
                    dest.append(bytes.clone());
                    appended += bytes.len();
                }
                Ok(appended)
            }
            Data::BufferMutArray(array) => {
                let mut appended = 0;
                for bytes in array {
                    dest.extend_from_slice(bytes);
                    appended += bytes.len();
                }
                Ok(appended)
            }
            Data::Blob(blob) => {
                dest.append_blob(blob);
                Ok(blob.length())
            }
            Data::SharedBlob(blob) => {
                dest.append_blob(blob);
                Ok(blob.length())
            }
            Data::Text(text) => {
                dest.extend_from_slice(text.as_bytes());
                Ok(text.len())
            }
            Data::File(region) => {
                let mut appended = 0u64;
                while appended < region.bytes_remaining {
                    let want = (region.bytes_remaining - appended).min(SEGMENT_SIZE as u64);
                    let segment =
                        read_file_region(region.descriptor, region.position + appended, want)?;
                    if segment.is_empty() {
                        return Err(Error::Eof);
                    }
                    appended += segment.len() as u64;
                    dest.append(segment);
                }
                Ok(appended as usize)
            }
        }
    }

    /// Removes the first `n` bytes in place. For file regions, advances
    /// the position and reduces the remainder.
    pub fn pop(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        match self {
            Data::Undefined => {}
            Data::Buffer(bytes) => bytes.advance(n.min(bytes.len())),
            Data::BufferMut(bytes) => bytes.advance(n.min(bytes.len())),
            Data::BufferArray(array) => pop_array(array, n, Bytes::len, |b, k| b.advance(k)),
            Data::BufferMutArray(array) => {
                pop_array(array, n, BytesMut::len, |b, k| b.advance(k))
            }
            Data::Blob(blob) => blob.pop_front(n),
            Data::SharedBlob(blob) => Arc::make_mut(blob).pop_front(n),
            Data::Text(text) => {
                let n = n.min(text.len());
                text.drain(..n);
            }
            Data::File(region) => {
                let n = (n as u64).min(region.bytes_remaining);
                region.position += n;
                region.bytes_remaining -= n;
            }
        }
    }

    /// Serializes every byte into the given sink, failing on a short
    /// write.
    pub fn copy_to(&self, writer: &mut dyn io::Write) -> Result<()> {
        match self {
            Data::Undefined => Ok(()),
            Data::Buffer(bytes) => writer.write_all(bytes).map_err(Error::from),
            Data::BufferMut(bytes) => writer.write_all(bytes).map_err(Error::from),
            Data::BufferArray(array) => {
                for bytes in array {
                    writer.write_all(bytes).map_err(Error::from)?;
                }
                Ok(())
            }
            Data::BufferMutArray(array) => {
                for bytes in array {
                    writer.write_all(bytes).map_err(Error::from)?;
                }
                Ok(())
            }
            Data::Blob(blob) => blob.write_to(writer),
            Data::SharedBlob(blob) => blob.write_to(writer),
            Data::Text(text) => writer.write_all(text.as_bytes()).map_err(Error::from),
            Data::File(_) => {
                let mut realized = Blob::new();
                self.append_to_blob(&mut realized)?;
                realized.write_to(writer)
            }
        }
    }

    /// Realizes this container as a chained buffer. In-memory variants
    /// reference their segments; file regions are read.
    pub fn to_blob(&self) -> Result<Blob> {
        match self {
            Data::Blob(blob) => Ok(blob.clone()),
            Data::SharedBlob(blob) => Ok((**blob).clone()),
            _ => {
                let mut blob = Blob::new();
                self.append_to_blob(&mut blob)?;
                Ok(blob)
            }
        }
    }

    /// Collects the leading contiguous byte runs of this container, up to
    /// `max` runs, reading file regions into `scratch`.
    ///
    /// Used to build gather-write vectors without flattening the source.
    pub(crate) fn front_chunks<'a>(
        &'a self,
        scratch: &'a mut Vec<u8>,
        max: usize,
    ) -> Result<Vec<&'a [u8]>> {
        let mut chunks: Vec<&[u8]> = Vec::new();
        match self {
            Data::Undefined => {}
            Data::Buffer(bytes) => chunks.push(bytes),
            Data::BufferMut(bytes) => chunks.push(bytes),
            Data::BufferArray(array) => {
                chunks.extend(array.iter().take(max).map(|bytes| &bytes[..]));
            }
            Data::BufferMutArray(array) => {
                chunks.extend(array.iter().take(max).map(|bytes| &bytes[..]));
            }
            Data::Blob(blob) => {
                chunks.extend(blob.segments().take(max).map(|segment| &segment[..]));
            }
            Data::SharedBlob(blob) => {
                chunks.extend(blob.segments().take(max).map(|segment| &segment[..]));
            }
            Data::Text(text) => chunks.push(text.as_bytes()),
            Data::File(region) => {
                let want = region.bytes_remaining.min(SEGMENT_SIZE as u64);
                let segment = read_file_region(region.descriptor, region.position, want)?;
                scratch.clear();
                scratch.extend_from_slice(&segment);
                if !scratch.is_empty() {
                    chunks.push(&scratch[..]);
                }
            }
        }
        chunks.retain(|chunk| !chunk.is_empty());
        chunks.truncate(max);
        Ok(chunks)
    }
}

impl PartialEq for Data {
    /// Size-first equality: containers of different sizes are unequal;
    /// otherwise both are realized as chained buffers and compared
    /// byte-wise. A file region that cannot be read compares unequal.
    fn eq(&self, other: &Data) -> bool {
        if self.size() != other.size() {
            return false;
        }
        match (self.to_blob(), other.to_blob()) {
            (Ok(lhs), Ok(rhs)) => lhs == rhs,
            _ => false,
        }
    }
}

impl From<Bytes> for Data {
    fn from(bytes: Bytes) -> Data {
        Data::Buffer(bytes)
    }
}

impl From<BytesMut> for Data {
    fn from(bytes: BytesMut) -> Data {
        Data::BufferMut(bytes)
    }
}

impl From<Blob> for Data {
    fn from(blob: Blob) -> Data {
        Data::Blob(blob)
    }
}

impl From<String> for Data {
    fn from(text: String) -> Data {
        Data::Text(text)
    }
}

impl From<&str> for Data {
    fn from(text: &str) -> Data {
        Data::Buffer(Bytes::copy_from_slice(text.as_bytes()))
    }
}

impl From<Vec<u8>> for Data {
    fn from(bytes: Vec<u8>) -> Data {
        Data::Buffer(Bytes::from(bytes))
    }
}

fn pop_array<T>(array: &mut Vec<T>, n: usize, len: fn(&T) -> usize, advance: impl Fn(&mut T, usize)) {
    let mut remaining = n;
    while remaining > 0 && !array.is_empty() {
        let front_len = len(&array[0]);
        if front_len <= remaining {
            remaining -= front_len;
            array.remove(0);
        } else {
            advance(&mut array[0], remaining);
            remaining = 0;
        }
    }
}

fn read_file_region(descriptor: Handle, position: u64, want: u64) -> Result<Bytes> {
    let mut segment = BytesMut::zeroed(want as usize);
    let n = unsafe {
        libc::pread(
            descriptor,
            segment.as_mut_ptr() as *mut libc::c_void,
            segment.len(),
            position as libc::off_t,
        )
    };
    if n < 0 {
        return Err(Error::last_os_error());
    }
    segment.truncate(n as usize);
    Ok(segment.freeze())
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::os::unix::io::AsRawFd;

    use super::*;

    fn data_bytes(text: &str) -> Data {
        Data::from(text)
    }

    #[test]
    fn size_per_variant() {
        assert_eq!(Data::Undefined.size(), 0);
        assert_eq!(data_bytes("hello").size(), 5);
        assert_eq!(
            Data::BufferArray(vec![Bytes::from_static(b"ab"), Bytes::from_static(b"cde")]).size(),
            5
        );
        assert_eq!(Data::Text(String::from("hello")).size(), 5);

        let mut blob = Blob::new();
        blob.extend_from_slice(b"abc");
        blob.extend_from_slice(b"defg");
        assert_eq!(Data::Blob(blob).size(), 7);
    }

    #[test]
    fn pop_removes_prefix_across_segments() {
        let mut blob = Blob::new();
        blob.extend_from_slice(b"abc");
        blob.extend_from_slice(b"defg");
        let mut data = Data::Blob(blob);

        data.pop(4);
        assert_eq!(data.size(), 3);

        let mut realized = Blob::new();
        data.append_to_blob(&mut realized).unwrap();
        assert_eq!(realized.to_vec(), b"efg");
    }

    #[test]
    fn pop_suffix_matches_original() {
        let original = b"the quick brown fox";
        for k in 0..=original.len() {
            let mut data = Data::from(original.to_vec());
            data.pop(k);
            assert_eq!(data.size(), original.len() - k);
            let mut realized = Blob::new();
            data.append_to_blob(&mut realized).unwrap();
            assert_eq!(realized.to_vec(), &original[k..]);
        }
    }

    #[test]
    fn pop_array_drops_drained_buffers() {
        let mut data = Data::BufferArray(vec![
            Bytes::from_static(b"ab"),
            Bytes::from_static(b"cd"),
            Bytes::from_static(b"ef"),
        ]);
        data.pop(3);
        assert_eq!(data.size(), 3);
        let mut realized = Blob::new();
        data.append_to_blob(&mut realized).unwrap();
        assert_eq!(realized.to_vec(), b"def");
    }

    #[test]
    fn append_references_shared_segments() {
        let source = Bytes::from_static(b"shared");
        let data = Data::Buffer(source.clone());
        let mut dest = Blob::new();
        let appended = data.append_to_blob(&mut dest).unwrap();
        assert_eq!(appended, 6);
        assert_eq!(dest.to_vec(), b"shared");
    }

    #[test]
    fn copy_round_trip() {
        let sources = [
            data_bytes("hello"),
            Data::Text(String::from("hello")),
            Data::BufferArray(vec![Bytes::from_static(b"he"), Bytes::from_static(b"llo")]),
        ];
        for source in sources {
            let mut sink = Vec::new();
            source.copy_to(&mut sink).unwrap();
            assert_eq!(sink, b"hello");
            assert_eq!(source, Data::from(sink));
        }
    }

    #[test]
    fn equality_is_size_first_then_bytewise() {
        assert_eq!(data_bytes("abc"), Data::Text(String::from("abc")));
        assert_ne!(data_bytes("abc"), data_bytes("abd"));
        assert_ne!(data_bytes("abc"), data_bytes("abcd"));

        let mut blob = Blob::new();
        blob.extend_from_slice(b"a");
        blob.extend_from_slice(b"bc");
        assert_eq!(Data::Blob(blob), data_bytes("abc"));
    }

    #[test]
    fn shared_blob_pop_copies_on_write() {
        let mut blob = Blob::new();
        blob.extend_from_slice(b"abcdef");
        let shared = Arc::new(blob);
        let mut data = Data::SharedBlob(Arc::clone(&shared));

        data.pop(2);
        assert_eq!(data.size(), 4);
        assert_eq!(shared.length(), 6);
    }

    #[test]
    fn blob_split_to_references() {
        let mut blob = Blob::new();
        blob.extend_from_slice(b"abc");
        blob.extend_from_slice(b"def");
        let taken = blob.split_to(4);
        assert_eq!(taken.to_vec(), b"abcd");
        assert_eq!(blob.to_vec(), b"ef");
    }

    #[test]
    fn file_region_append_and_pop() {
        let mut file = tempfile();
        file.write_all(b"0123456789").unwrap();

        let mut data = Data::File(FileRegion {
            descriptor: file.as_raw_fd(),
            position: 2,
            bytes_remaining: 6,
        });
        assert_eq!(data.size(), 6);

        let mut realized = Blob::new();
        data.append_to_blob(&mut realized).unwrap();
        assert_eq!(realized.to_vec(), b"234567");

        // The source is not advanced by realization.
        assert_eq!(data.size(), 6);

        data.pop(4);
        assert_eq!(data.size(), 2);
        let mut realized = Blob::new();
        data.append_to_blob(&mut realized).unwrap();
        assert_eq!(realized.to_vec(), b"67");
    }

    fn tempfile() -> std::fs::File {
        let mut path = std::env::temp_dir();
        path.push(format!("rivulet-data-test-{}", std::process::id()));
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();
        let _ = std::fs::remove_file(&path);
        file
    }
}
