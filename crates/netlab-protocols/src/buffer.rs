use std::collections::BTreeMap;

/// Sliding send buffer for a reliable byte stream.
///
/// `base_seq` is the first unacknowledged byte, `next_seq` the first byte not
/// yet sent, `last_seq` one past the end of the buffered data. The invariant
/// `base_seq <= next_seq <= last_seq` holds at all times.
#[derive(Debug, Default)]
pub struct SendBuffer {
    buffer: Vec<u8>,
    base_seq: u64,
    next_seq: u64,
    last_seq: u64,
}

impl SendBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_seq(&self) -> u64 {
        self.base_seq
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Bytes buffered but not yet sent.
    pub fn available(&self) -> u64 {
        self.last_seq - self.next_seq
    }

    /// Bytes sent but not yet acknowledged.
    pub fn outstanding(&self) -> u64 {
        self.next_seq - self.base_seq
    }

    /// Append application bytes.
    pub fn put(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
        self.last_seq += data.len() as u64;
    }

    /// Take up to `size` fresh bytes starting at `next_seq`, advancing it.
    /// Returns the bytes and their starting sequence number.
    pub fn get(&mut self, size: u64) -> (Vec<u8>, u64) {
        let size = size.min(self.last_seq - self.next_seq);
        let start = (self.next_seq - self.base_seq) as usize;
        let data = self.buffer[start..start + size as usize].to_vec();
        let sequence = self.next_seq;
        self.next_seq += size;
        (data, sequence)
    }

    /// Take up to `size` bytes starting at the oldest unacknowledged byte, for
    /// retransmission. With `reset`, everything outstanding beyond the
    /// returned range is treated as never sent, so a later `get` continues
    /// right after it.
    pub fn resend(&mut self, size: u64, reset: bool) -> (Vec<u8>, u64) {
        let size = size.min(self.last_seq - self.base_seq);
        let data = self.buffer[..size as usize].to_vec();
        let sequence = self.base_seq;
        if reset {
            self.next_seq = sequence + size;
        }
        (data, sequence)
    }

    /// Slide past everything below the cumulative acknowledgement `sequence`.
    pub fn slide(&mut self, sequence: u64) {
        if sequence <= self.base_seq {
            return;
        }
        let acked = ((sequence - self.base_seq) as usize).min(self.buffer.len());
        self.buffer.drain(..acked);
        self.base_seq = sequence;
        if self.next_seq < self.base_seq {
            self.next_seq = self.base_seq;
        }
    }
}

/// Reassembly buffer for a reliable byte stream.
///
/// Chunks may arrive out of order or duplicated; the buffer orders them by
/// sequence number and trims any overlap so each byte surfaces exactly once.
#[derive(Debug, Default)]
pub struct ReceiveBuffer {
    chunks: BTreeMap<u64, Vec<u8>>,
    base_seq: u64,
}

impl ReceiveBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next in-order byte expected.
    pub fn base_seq(&self) -> u64 {
        self.base_seq
    }

    /// Insert a chunk, ignoring stale or fully duplicate data, then sweep in
    /// sequence order trimming each chunk's prefix that overlaps the previous
    /// one's coverage.
    pub fn put(&mut self, data: &[u8], sequence: u64) {
        if sequence < self.base_seq {
            return;
        }
        if let Some(existing) = self.chunks.get(&sequence)
            && existing.len() >= data.len()
        {
            return;
        }
        self.chunks.insert(sequence, data.to_vec());

        let mut swept = BTreeMap::new();
        let mut covered_to = 0u64;
        let mut first = true;
        for (sequence, mut data) in std::mem::take(&mut self.chunks) {
            let mut sequence = sequence;
            if !first && sequence < covered_to {
                let cut = ((covered_to - sequence) as usize).min(data.len());
                data.drain(..cut);
                sequence = covered_to;
            }
            first = false;
            covered_to = sequence + data.len() as u64;
            if !data.is_empty() {
                swept.insert(sequence, data);
            }
        }
        self.chunks = swept;
    }

    /// Remove and return all in-order bytes starting at `base_seq`, together
    /// with the sequence number they start at.
    pub fn get(&mut self) -> (Vec<u8>, u64) {
        let start = self.base_seq;
        let mut data = Vec::new();
        while let Some(chunk) = self.chunks.remove(&self.base_seq) {
            self.base_seq += chunk.len() as u64;
            data.extend_from_slice(&chunk);
        }
        (data, start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_buffer_counts_available_and_outstanding() {
        let mut buf = SendBuffer::new();
        buf.put(b"hello world");
        assert_eq!(buf.available(), 11);
        assert_eq!(buf.outstanding(), 0);

        let (data, seq) = buf.get(5);
        assert_eq!(data, b"hello");
        assert_eq!(seq, 0);
        assert_eq!(buf.available(), 6);
        assert_eq!(buf.outstanding(), 5);
    }

    #[test]
    fn send_buffer_get_is_capped_at_available() {
        let mut buf = SendBuffer::new();
        buf.put(b"abc");
        let (data, seq) = buf.get(100);
        assert_eq!(data, b"abc");
        assert_eq!(seq, 0);
        assert_eq!(buf.available(), 0);
    }

    #[test]
    fn resend_restarts_from_the_oldest_outstanding_byte() {
        let mut buf = SendBuffer::new();
        buf.put(b"0123456789");
        buf.get(4);
        buf.get(4);
        assert_eq!(buf.outstanding(), 8);

        let (data, seq) = buf.resend(4, true);
        assert_eq!(data, b"0123");
        assert_eq!(seq, 0);
        // Reset: the next get continues right after the retransmitted range.
        let (data, seq) = buf.get(4);
        assert_eq!(data, b"4567");
        assert_eq!(seq, 4);
    }

    #[test]
    fn resend_without_reset_leaves_next_seq_alone() {
        let mut buf = SendBuffer::new();
        buf.put(b"0123456789");
        buf.get(8);
        let (_, seq) = buf.resend(4, false);
        assert_eq!(seq, 0);
        assert_eq!(buf.next_seq(), 8);
    }

    #[test]
    fn slide_drops_acked_bytes_and_clamps_next() {
        let mut buf = SendBuffer::new();
        buf.put(b"0123456789");
        buf.get(4);
        buf.slide(8);
        assert_eq!(buf.base_seq(), 8);
        // next_seq was 4, behind the ack; it clamps up to base.
        assert_eq!(buf.next_seq(), 8);
        assert_eq!(buf.available(), 2);
        let (data, seq) = buf.get(2);
        assert_eq!(data, b"89");
        assert_eq!(seq, 8);
    }

    #[test]
    fn slide_to_base_is_a_noop() {
        let mut buf = SendBuffer::new();
        buf.put(b"0123456789");
        buf.get(4);
        buf.slide(4);
        buf.slide(4);
        assert_eq!(buf.base_seq(), 4);
        assert_eq!(buf.next_seq(), 4);
        assert_eq!(buf.available(), 6);
    }

    #[test]
    fn receive_buffer_orders_out_of_order_chunks() {
        let mut buf = ReceiveBuffer::new();
        buf.put(b"world", 5);
        let (data, _) = buf.get();
        assert!(data.is_empty());

        buf.put(b"hello", 0);
        let (data, start) = buf.get();
        assert_eq!(data, b"helloworld");
        assert_eq!(start, 0);
        assert_eq!(buf.base_seq(), 10);
    }

    #[test]
    fn receive_buffer_absorbs_duplicates() {
        let mut buf = ReceiveBuffer::new();
        buf.put(b"hello", 0);
        buf.put(b"hello", 0);
        let (data, _) = buf.get();
        assert_eq!(data, b"hello");

        // A stale retransmission of already-consumed data is ignored.
        buf.put(b"hello", 0);
        let (data, start) = buf.get();
        assert!(data.is_empty());
        assert_eq!(start, 5);
    }

    #[test]
    fn receive_buffer_trims_overlap() {
        let mut buf = ReceiveBuffer::new();
        buf.put(b"01234", 0);
        // Overlaps the first chunk by two bytes.
        buf.put(b"34567", 3);
        let (data, _) = buf.get();
        assert_eq!(data, b"01234567");
    }

    #[test]
    fn receive_buffer_drops_fully_covered_chunks() {
        let mut buf = ReceiveBuffer::new();
        buf.put(b"0123456789", 0);
        buf.put(b"345", 3);
        let (data, _) = buf.get();
        assert_eq!(data, b"0123456789");
        assert_eq!(buf.base_seq(), 10);
    }

    #[test]
    fn receive_buffer_keeps_larger_chunk_at_same_sequence() {
        let mut buf = ReceiveBuffer::new();
        buf.put(b"01", 0);
        buf.put(b"0123", 0);
        let (data, _) = buf.get();
        assert_eq!(data, b"0123");
    }

    #[test]
    fn get_advances_base_past_exactly_the_returned_bytes() {
        let mut buf = ReceiveBuffer::new();
        buf.put(b"abc", 0);
        buf.put(b"ghi", 6);
        let (data, start) = buf.get();
        assert_eq!(data, b"abc");
        assert_eq!(start, 0);
        assert_eq!(buf.base_seq(), 3);

        buf.put(b"def", 3);
        let (data, start) = buf.get();
        assert_eq!(data, b"defghi");
        assert_eq!(start, 3);
        assert_eq!(buf.base_seq(), 9);
    }
}
