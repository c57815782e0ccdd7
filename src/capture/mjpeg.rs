//! Splits a raw MJPEG byte stream into individual JPEG images.
//!
//! A camera in MJPEG mode emits JPEG images back to back with no container.
//! Each image starts with the SOI marker `FF D8` and ends with EOI `FF D9`.

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Accumulates stream bytes and yields complete JPEG images.
pub(crate) struct MjpegSplitter {
    buffer: Vec<u8>,
    /// Images larger than this are treated as corrupt and discarded
    max_image_len: usize,
}

impl MjpegSplitter {
    pub(crate) fn new(max_image_len: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(max_image_len.min(1 << 20)),
            max_image_len,
        }
    }

    /// Appends bytes read from the stream.
    pub(crate) fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Removes and returns the next complete image, if one is buffered.
    pub(crate) fn next_image(&mut self) -> Option<Vec<u8>> {
        loop {
            let Some(start) = find(&self.buffer, &SOI, 0) else {
                // Keep a trailing 0xFF; it may be the first half of a marker.
                let keep = usize::from(self.buffer.last() == Some(&0xFF));
                let drop_to = self.buffer.len() - keep;
                self.buffer.drain(..drop_to);
                return None;
            };
            if start > 0 {
                self.buffer.drain(..start);
            }

            match find(&self.buffer, &EOI, SOI.len()) {
                Some(end) => {
                    // A second start before the end means the first image was cut off.
                    if let Some(restart) = find(&self.buffer[..end], &SOI, SOI.len()) {
                        self.buffer.drain(..restart);
                        continue;
                    }
                    let image: Vec<u8> = self.buffer.drain(..end + EOI.len()).collect();
                    return Some(image);
                }
                None if self.buffer.len() > self.max_image_len => {
                    // No end in sight: skip this SOI and resync on the next one.
                    log::warn!(
                        "MJPEG image exceeded {} bytes without an end marker; resyncing",
                        self.max_image_len
                    );
                    self.buffer.drain(..SOI.len());
                }
                None => return None,
            }
        }
    }

    /// Bytes currently buffered.
    #[cfg(test)]
    pub(crate) fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

fn find(haystack: &[u8], needle: &[u8; 2], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(2)
        .position(|w| w == needle)
        .map(|pos| pos + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(body: &[u8]) -> Vec<u8> {
        let mut out = SOI.to_vec();
        out.extend_from_slice(body);
        out.extend_from_slice(&EOI);
        out
    }

    #[test]
    fn test_yields_images_in_order() {
        let mut splitter = MjpegSplitter::new(1024);
        let a = jpeg(&[1, 2, 3]);
        let b = jpeg(&[4, 5]);
        splitter.push(&a);
        splitter.push(&b);

        assert_eq!(splitter.next_image(), Some(a));
        assert_eq!(splitter.next_image(), Some(b));
        assert_eq!(splitter.next_image(), None);
    }

    #[test]
    fn test_image_split_across_reads() {
        let mut splitter = MjpegSplitter::new(1024);
        let image = jpeg(&[9, 9, 0xFF, 0x00, 7]);
        let (head, tail) = image.split_at(image.len() - 1);

        splitter.push(head);
        assert_eq!(splitter.next_image(), None);
        splitter.push(tail);
        assert_eq!(splitter.next_image(), Some(image));
    }

    #[test]
    fn test_garbage_before_start_is_skipped() {
        let mut splitter = MjpegSplitter::new(1024);
        splitter.push(&[0x00, 0x12, 0x34]);
        assert_eq!(splitter.next_image(), None);
        assert_eq!(splitter.buffered(), 0);

        splitter.push(&[0xAA, 0xFF]);
        assert_eq!(splitter.next_image(), None);
        assert_eq!(splitter.buffered(), 1);

        splitter.push(&[0xD8, 1, 0xFF, 0xD9]);
        assert_eq!(splitter.next_image(), Some(vec![0xFF, 0xD8, 1, 0xFF, 0xD9]));
    }

    #[test]
    fn test_oversized_image_resyncs() {
        let mut splitter = MjpegSplitter::new(8);
        let mut stream = SOI.to_vec();
        stream.extend_from_slice(&[0u8; 16]);
        let good = jpeg(&[1]);
        stream.extend_from_slice(&good);
        splitter.push(&stream);

        assert_eq!(splitter.next_image(), Some(good));
    }
}
