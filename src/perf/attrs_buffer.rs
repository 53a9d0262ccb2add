//! The attributes stream: typed records describing every programmed
//! attribute, key mapping, and process context, packed with the signed
//! LEB128 integer encoding the host side expects.

use log::warn;

use super::keys::AttrKeyTracker;
use super::sys::PerfEventAttr;

/// Worst-case encoded sizes of the packed integers.
pub const MAXSIZE_PACK32: usize = 5;
pub const MAXSIZE_PACK64: usize = 10;

/// Record codes for the attributes stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum RecordCode {
    Pea = 1,
    Keys = 2,
    Format = 3,
    Maps = 4,
    Comm = 5,
    Kallsyms = 6,
    OnlineCpu = 7,
    OfflineCpu = 8,
    Counters = 9,
    HeaderPage = 10,
    HeaderEvent = 11,
}

/// Builds attributes-stream records into an in-memory buffer. The
/// transport layer drains it with [`AttrsBuffer::take`]; `capacity` bounds
/// single oversized blobs, not the buffer itself.
pub struct AttrsBuffer {
    bytes: Vec<u8>,
    capacity: usize,
}

impl AttrsBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: Vec::new(),
            capacity,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.bytes)
    }

    fn supports_write_of_size(&self, bytes: usize) -> bool {
        bytes <= self.capacity
    }

    fn pack_i32(&mut self, value: i32) {
        self.pack_i64(value as i64);
    }

    fn pack_i64(&mut self, mut value: i64) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;

            let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
            self.bytes.push(if done { byte } else { byte | 0x80 });

            if done {
                break;
            }
        }
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    fn write_terminated(&mut self, text: &str) {
        self.bytes.extend_from_slice(text.as_bytes());
        self.bytes.push(0);
    }

    /// One programmed attribute: the raw record bytes followed by its key.
    pub fn marshal_pea(&mut self, attr: &PerfEventAttr, key: i32) {
        self.pack_i32(RecordCode::Pea as i32);
        self.write_bytes(attr.as_bytes());
        self.pack_i32(key);
    }

    /// The perf-assigned ids for each key, reported after the events are
    /// opened and read back.
    pub fn marshal_keys(&mut self, ids: &[u64], keys: &[i32]) {
        debug_assert_eq!(ids.len(), keys.len());

        self.pack_i32(RecordCode::Keys as i32);
        self.pack_i32(ids.len().min(keys.len()) as i32);
        for (id, key) in ids.iter().zip(keys) {
            self.pack_i64(*id as i64);
            self.pack_i32(*key);
        }
    }

    pub fn marshal_format(&mut self, format: &str) {
        self.pack_i32(RecordCode::Format as i32);
        self.write_terminated(format);
    }

    pub fn marshal_maps(&mut self, pid: i32, tid: i32, maps: &str) {
        let required = 3 * MAXSIZE_PACK32 + maps.len() + 1;
        if !self.supports_write_of_size(required) {
            warn!(
                "proc maps file too large for buffer ({required} > {} bytes), ignoring",
                self.capacity
            );
            return;
        }

        self.pack_i32(RecordCode::Maps as i32);
        self.pack_i32(pid);
        self.pack_i32(tid);
        self.write_terminated(maps);
    }

    pub fn marshal_comm(&mut self, pid: i32, tid: i32, image: &str, comm: &str) {
        self.pack_i32(RecordCode::Comm as i32);
        self.pack_i32(pid);
        self.pack_i32(tid);
        self.write_terminated(image);
        self.write_terminated(comm);
    }

    pub fn marshal_kallsyms(&mut self, kallsyms: &str) {
        let required = 3 * MAXSIZE_PACK32 + kallsyms.len() + 1;
        if !self.supports_write_of_size(required) {
            warn!(
                "kallsyms file too large for buffer ({required} > {} bytes), ignoring",
                self.capacity
            );
            return;
        }

        self.pack_i32(RecordCode::Kallsyms as i32);
        self.write_terminated(kallsyms);
    }

    pub fn online_cpu(&mut self, time: u64, cpu: i32) {
        self.pack_i32(RecordCode::OnlineCpu as i32);
        self.pack_i64(time as i64);
        self.pack_i32(cpu);
    }

    pub fn offline_cpu(&mut self, time: u64, cpu: i32) {
        self.pack_i32(RecordCode::OfflineCpu as i32);
        self.pack_i64(time as i64);
        self.pack_i32(cpu);
    }

    /// Begin a counters record; follow with [`AttrsBuffer::counter`] for
    /// each value and close it with [`AttrsBuffer::counters_footer`].
    pub fn counters_header(&mut self, time: u64) {
        self.pack_i32(RecordCode::Counters as i32);
        self.pack_i64(time as i64);
    }

    pub fn counter(&mut self, core: i32, key: i32, value: i64) {
        self.pack_i32(core);
        self.pack_i32(key);
        self.pack_i64(value);
    }

    pub fn counters_footer(&mut self) {
        self.pack_i32(-1);
    }

    pub fn marshal_header_page(&mut self, header_page: &str) {
        self.pack_i32(RecordCode::HeaderPage as i32);
        self.write_terminated(header_page);
    }

    pub fn marshal_header_event(&mut self, header_event: &str) {
        self.pack_i32(RecordCode::HeaderEvent as i32);
        self.write_terminated(header_event);
    }
}

impl AttrKeyTracker for AttrsBuffer {
    fn track(&mut self, key: i32, attr: &PerfEventAttr) {
        self.marshal_pea(attr, key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perf::sys::PERF_TYPE_SOFTWARE;

    fn unpack_i64(bytes: &[u8], offset: &mut usize) -> i64 {
        let mut value: i64 = 0;
        let mut shift = 0;

        loop {
            let byte = bytes[*offset];
            *offset += 1;

            value |= ((byte & 0x7f) as i64) << shift;
            shift += 7;

            if byte & 0x80 == 0 {
                if shift < 64 && byte & 0x40 != 0 {
                    value |= -1i64 << shift;
                }
                return value;
            }
        }
    }

    fn unpack_i32(bytes: &[u8], offset: &mut usize) -> i32 {
        unpack_i64(bytes, offset) as i32
    }

    #[test]
    fn packed_integers_round_trip() {
        let mut buffer = AttrsBuffer::new(1024);
        let values = [0i64, 1, -1, 63, 64, -64, -65, 300, i64::from(i32::MAX), i64::MIN];

        for value in values {
            buffer.pack_i64(value);
        }

        let bytes = buffer.as_bytes();
        let mut offset = 0;
        for value in values {
            assert_eq!(unpack_i64(bytes, &mut offset), value);
        }
        assert_eq!(offset, bytes.len());
    }

    #[test]
    fn packed_sizes_stay_bounded() {
        let mut buffer = AttrsBuffer::new(1024);
        buffer.pack_i32(i32::MIN);
        assert!(buffer.len() <= MAXSIZE_PACK32);

        let mut buffer = AttrsBuffer::new(1024);
        buffer.pack_i64(i64::MIN);
        assert!(buffer.len() <= MAXSIZE_PACK64);
    }

    #[test]
    fn pea_record_carries_raw_attr_bytes() {
        let attr = PerfEventAttr {
            type_: PERF_TYPE_SOFTWARE,
            config: 9,
            ..Default::default()
        };

        let mut buffer = AttrsBuffer::new(1024);
        buffer.track(42, &attr);

        let bytes = buffer.as_bytes();
        let mut offset = 0;
        assert_eq!(unpack_i32(bytes, &mut offset), RecordCode::Pea as i32);

        let attr_len = attr.as_bytes().len();
        assert_eq!(&bytes[offset..offset + attr_len], attr.as_bytes());
        offset += attr_len;

        assert_eq!(unpack_i32(bytes, &mut offset), 42);
        assert_eq!(offset, bytes.len());
    }

    #[test]
    fn counters_record_is_footer_terminated() {
        let mut buffer = AttrsBuffer::new(1024);
        buffer.counters_header(12345);
        buffer.counter(0, 3, 999);
        buffer.counter(1, 3, 1001);
        buffer.counters_footer();

        let bytes = buffer.as_bytes();
        let mut offset = 0;
        assert_eq!(unpack_i32(bytes, &mut offset), RecordCode::Counters as i32);
        assert_eq!(unpack_i64(bytes, &mut offset), 12345);
        assert_eq!(
            (
                unpack_i32(bytes, &mut offset),
                unpack_i32(bytes, &mut offset),
                unpack_i64(bytes, &mut offset)
            ),
            (0, 3, 999)
        );
        assert_eq!(
            (
                unpack_i32(bytes, &mut offset),
                unpack_i32(bytes, &mut offset),
                unpack_i64(bytes, &mut offset)
            ),
            (1, 3, 1001)
        );
        assert_eq!(unpack_i32(bytes, &mut offset), -1);
        assert_eq!(offset, bytes.len());
    }

    #[test]
    fn oversized_blobs_are_dropped() {
        let mut buffer = AttrsBuffer::new(64);
        let huge = "x".repeat(1024);

        buffer.marshal_maps(1, 1, &huge);
        assert!(buffer.is_empty());

        buffer.marshal_kallsyms(&huge);
        assert!(buffer.is_empty());

        buffer.marshal_maps(10, 11, "small");
        assert!(!buffer.is_empty());
    }

    #[test]
    fn comm_record_layout() {
        let mut buffer = AttrsBuffer::new(1024);
        buffer.marshal_comm(100, 101, "/bin/app", "app");

        let bytes = buffer.as_bytes();
        let mut offset = 0;
        assert_eq!(unpack_i32(bytes, &mut offset), RecordCode::Comm as i32);
        assert_eq!(unpack_i32(bytes, &mut offset), 100);
        assert_eq!(unpack_i32(bytes, &mut offset), 101);

        let rest = &bytes[offset..];
        assert_eq!(rest, b"/bin/app\0app\0");
    }
}
