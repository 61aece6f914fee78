//! The `ATPCAP01` capture format.
//!
//! Little-endian throughout:
//!
//! ```text
//! file header    magic "ATPCAP01" | version u32 | tick frequency u64          (20 bytes)
//! record header  payload len u32 | arrival ticks u64 | device index i32 |
//!                device hash u32 | vendor u32 | product u32 | usage page u16 |
//!                usage u16 | side hint u8 | decoder profile u8                  (34 bytes)
//! payload        meta JSON (device index -1) or an RFV3 frame
//! RFV3 frame     magic "RFV3" | sequence u64 | timestamp f64 | device id u64 |
//!                contact count u16 | flags u16 | contacts (40 bytes each)
//! contact        id i32 | x y total pressure major minor angle density f32 |
//!                state u8 | reserved [u8; 3]
//! ```
//!
//! Loading is all-or-nothing: a capture with a bad header or a truncated record
//! is rejected before any record is handed out. Frame payloads are decoded
//! lazily and a bad payload only drops that frame.

use crate::collector::assembler::DropReason;
use crate::collector::types::{
    AxisExtents, Contact, ContactState, DeviceDescriptor, DeviceProfile, Frame, Side, MAX_CONTACTS,
};
use crate::error::CaptureError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

pub const CAPTURE_MAGIC: &[u8; 8] = b"ATPCAP01";
pub const CAPTURE_VERSION: u32 = 3;
pub const FILE_HEADER_LEN: usize = 20;
pub const RECORD_HEADER_LEN: usize = 34;
pub const FRAME_MAGIC: &[u8; 4] = b"RFV3";
pub const FRAME_HEADER_LEN: usize = 32;
pub const CONTACT_RECORD_LEN: usize = 40;
/// Device index marking a metadata record.
pub const META_DEVICE_INDEX: i32 = -1;
pub const META_SCHEMA: &str = "g2k-replay-v1";
/// Meta extension: the reserved u16 after a frame's contact count carries
/// frame flags. Without it the field is written as zero and ignored.
pub const EXT_FRAME_FLAGS: &str = "frameFlags";
/// Frame flag: physical button held.
const FLAG_BUTTON: u16 = 1;

/// Little-endian reader over a byte slice.
struct ByteCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let slice = self.bytes.get(self.pos..self.pos + N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        self.pos += N;
        Some(out)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take::<1>().map(|b| b[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.take().map(u16::from_le_bytes)
    }

    fn u32(&mut self) -> Option<u32> {
        self.take().map(u32::from_le_bytes)
    }

    fn i32(&mut self) -> Option<i32> {
        self.take().map(i32::from_le_bytes)
    }

    fn u64(&mut self) -> Option<u64> {
        self.take().map(u64::from_le_bytes)
    }

    fn f32(&mut self) -> Option<f32> {
        self.take().map(f32::from_le_bytes)
    }

    fn f64(&mut self) -> Option<f64> {
        self.take().map(f64::from_le_bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub version: u32,
    /// Ticks per second of record arrival timestamps
    pub tick_frequency: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordHeader {
    pub payload_len: u32,
    pub arrival_ticks: u64,
    pub device_index: i32,
    pub device_hash: u32,
    pub vendor_id: u32,
    pub product_id: u32,
    pub usage_page: u16,
    pub usage: u16,
    pub side_hint: u8,
    pub profile: u8,
}

impl RecordHeader {
    /// Header for a frame record from `descriptor`.
    pub fn for_device(descriptor: &DeviceDescriptor, arrival_ticks: u64, payload_len: usize) -> Self {
        Self {
            payload_len: payload_len as u32,
            arrival_ticks,
            device_index: descriptor.index,
            device_hash: descriptor.hash,
            vendor_id: descriptor.vendor_id,
            product_id: descriptor.product_id,
            usage_page: descriptor.usage_page,
            usage: descriptor.usage,
            side_hint: descriptor.side.hint(),
            profile: descriptor.profile.code(),
        }
    }

    pub fn meta(payload_len: usize) -> Self {
        Self {
            payload_len: payload_len as u32,
            device_index: META_DEVICE_INDEX,
            ..Self::default()
        }
    }

    pub fn is_meta(&self) -> bool {
        self.device_index == META_DEVICE_INDEX
    }

    pub fn side(&self) -> Side {
        Side::from_hint(self.side_hint)
    }

    /// Device facts carried by this header. Replayed positions are already
    /// normalized.
    pub fn descriptor(&self) -> DeviceDescriptor {
        DeviceDescriptor {
            index: self.device_index,
            name: format!("capture-device-{}", self.device_index),
            side: self.side(),
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            usage_page: self.usage_page,
            usage: self.usage,
            hash: self.device_hash,
            extents: AxisExtents::NORMALIZED,
            profile: if self.profile == 1 {
                DeviceProfile::Legacy
            } else {
                DeviceProfile::MultiSlot {
                    slots: MAX_CONTACTS as u8,
                }
            },
        }
    }

    fn parse(bytes: &[u8]) -> Option<Self> {
        let mut cur = ByteCursor::new(bytes);
        Some(Self {
            payload_len: cur.u32()?,
            arrival_ticks: cur.u64()?,
            device_index: cur.i32()?,
            device_hash: cur.u32()?,
            vendor_id: cur.u32()?,
            product_id: cur.u32()?,
            usage_page: cur.u16()?,
            usage: cur.u16()?,
            side_hint: cur.u8()?,
            profile: cur.u8()?,
        })
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.payload_len.to_le_bytes());
        out.extend_from_slice(&self.arrival_ticks.to_le_bytes());
        out.extend_from_slice(&self.device_index.to_le_bytes());
        out.extend_from_slice(&self.device_hash.to_le_bytes());
        out.extend_from_slice(&self.vendor_id.to_le_bytes());
        out.extend_from_slice(&self.product_id.to_le_bytes());
        out.extend_from_slice(&self.usage_page.to_le_bytes());
        out.extend_from_slice(&self.usage.to_le_bytes());
        out.push(self.side_hint);
        out.push(self.profile);
    }
}

/// Session metadata record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub schema: String,
    pub captured_at: DateTime<Utc>,
    pub platform: String,
    pub source: String,
    /// Frames known when the record was written (0 for streamed captures)
    pub frame_count: u64,
    /// Format extensions the writer used
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<String>,
}

impl MetaRecord {
    pub fn new(source: &str, frame_count: u64) -> Self {
        Self {
            kind: "meta".to_string(),
            schema: META_SCHEMA.to_string(),
            captured_at: Utc::now(),
            platform: std::env::consts::OS.to_string(),
            source: source.to_string(),
            frame_count,
            extensions: vec![EXT_FRAME_FLAGS.to_string()],
        }
    }

    /// Metadata naming this host as the capture source.
    pub fn for_this_host(frame_count: u64) -> Self {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        Self::new(&host, frame_count)
    }

    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|e| e == name)
    }

    fn validate(&self, record: usize) -> Result<(), CaptureError> {
        if self.kind != "meta" {
            return Err(CaptureError::InvalidMetadata {
                record,
                reason: format!("type is {:?}", self.kind),
            });
        }
        if self.schema != META_SCHEMA {
            return Err(CaptureError::InvalidMetadata {
                record,
                reason: format!("unsupported schema {:?}", self.schema),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub header: RecordHeader,
    pub payload: Vec<u8>,
}

/// A fully validated capture file.
#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    pub header: FileHeader,
    /// First metadata record, if any
    pub meta: Option<MetaRecord>,
    pub records: Vec<Record>,
}

impl Capture {
    pub fn load(path: &Path) -> Result<Self, CaptureError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CaptureError> {
        let Some(magic) = bytes.get(..8) else {
            return Err(CaptureError::TruncatedHeader { len: bytes.len() });
        };
        if magic != CAPTURE_MAGIC {
            let mut found = [0u8; 8];
            found.copy_from_slice(magic);
            return Err(CaptureError::BadMagic { found });
        }

        let mut cur = ByteCursor::new(&bytes[8..]);
        let (Some(version), Some(tick_frequency)) = (cur.u32(), cur.u64()) else {
            return Err(CaptureError::TruncatedHeader { len: bytes.len() });
        };
        if version != CAPTURE_VERSION {
            return Err(CaptureError::UnsupportedVersion(version));
        }

        let mut records = Vec::new();
        let mut meta = None;
        let mut offset = FILE_HEADER_LEN;
        while offset < bytes.len() {
            let index = records.len();
            let truncated = |needed: usize, offset: usize| CaptureError::TruncatedRecord {
                record: index,
                offset,
                needed,
                available: bytes.len() - offset,
            };

            let header = bytes
                .get(offset..offset + RECORD_HEADER_LEN)
                .and_then(RecordHeader::parse)
                .ok_or_else(|| truncated(RECORD_HEADER_LEN, offset))?;
            offset += RECORD_HEADER_LEN;

            let len = header.payload_len as usize;
            let payload = bytes
                .get(offset..offset + len)
                .ok_or_else(|| truncated(len, offset))?
                .to_vec();
            offset += len;

            if header.is_meta() {
                let parsed: MetaRecord = serde_json::from_slice(&payload).map_err(|e| {
                    CaptureError::InvalidMetadata {
                        record: index,
                        reason: e.to_string(),
                    }
                })?;
                parsed.validate(index)?;
                meta.get_or_insert(parsed);
            }
            records.push(Record { header, payload });
        }

        Ok(Self {
            header: FileHeader {
                version,
                tick_frequency,
            },
            meta,
            records,
        })
    }

    /// Whether frame payloads carry flags in their reserved field.
    pub fn frame_flags(&self) -> bool {
        self.meta
            .as_ref()
            .map_or(false, |m| m.has_extension(EXT_FRAME_FLAGS))
    }

    /// Non-metadata records in file order.
    pub fn frame_records(&self) -> impl Iterator<Item = &Record> {
        self.records.iter().filter(|r| !r.header.is_meta())
    }
}

/// Decode an RFV3 frame payload. `frame_flags` is [`Capture::frame_flags`].
pub fn decode_frame_payload(
    header: &RecordHeader,
    payload: &[u8],
    frame_flags: bool,
) -> Result<Frame, DropReason> {
    let mut cur = ByteCursor::new(payload);
    let magic: [u8; 4] = cur.take().ok_or(DropReason::Truncated)?;
    if &magic != FRAME_MAGIC {
        return Err(DropReason::ParseFailure);
    }
    let sequence = cur.u64().ok_or(DropReason::Truncated)?;
    let timestamp_secs = cur.f64().ok_or(DropReason::Truncated)?;
    let device_id = cur.u64().ok_or(DropReason::Truncated)?;
    let count = cur.u16().ok_or(DropReason::Truncated)? as usize;
    let flags = cur.u16().ok_or(DropReason::Truncated)?;

    let expected = FRAME_HEADER_LEN + count * CONTACT_RECORD_LEN;
    if payload.len() < expected {
        return Err(DropReason::Truncated);
    }
    if payload.len() > expected {
        return Err(DropReason::InvalidReportSize);
    }
    if count > MAX_CONTACTS {
        return Err(DropReason::ParseFailure);
    }

    let mut frame = Frame::new(sequence, header.arrival_ticks);
    frame.timestamp_secs = timestamp_secs;
    frame.device_id = device_id;
    frame.button_pressed = frame_flags && flags & FLAG_BUTTON != 0;
    for _ in 0..count {
        let contact = decode_contact(&mut cur).ok_or(DropReason::Truncated)??;
        frame.contacts.push(contact);
    }
    Ok(frame)
}

fn decode_contact(cur: &mut ByteCursor<'_>) -> Option<Result<Contact, DropReason>> {
    let id = cur.i32()?;
    let x = cur.f32()?;
    let y = cur.f32()?;
    let total = cur.f32()?;
    let pressure = cur.f32()?;
    let major_axis = cur.f32()?;
    let minor_axis = cur.f32()?;
    let angle = cur.f32()?;
    let density = cur.f32()?;
    let code = cur.u8()?;
    cur.take::<3>()?;
    let Some(state) = ContactState::from_code(code) else {
        return Some(Err(DropReason::ParseFailure));
    };
    Some(Ok(Contact {
        id,
        x,
        y,
        total,
        pressure,
        major_axis,
        minor_axis,
        angle,
        density,
        state,
    }))
}

/// Append the RFV3 encoding of `frame` to `out`. The reserved field carries
/// flags only when `frame_flags` is set.
pub fn encode_frame_payload(frame: &Frame, frame_flags: bool, out: &mut Vec<u8>) {
    out.extend_from_slice(FRAME_MAGIC);
    out.extend_from_slice(&frame.sequence.to_le_bytes());
    out.extend_from_slice(&frame.timestamp_secs.to_le_bytes());
    out.extend_from_slice(&frame.device_id.to_le_bytes());
    out.extend_from_slice(&(frame.contacts.len() as u16).to_le_bytes());
    let flags = if frame_flags && frame.button_pressed {
        FLAG_BUTTON
    } else {
        0
    };
    out.extend_from_slice(&flags.to_le_bytes());
    for c in frame.contacts.iter() {
        out.extend_from_slice(&c.id.to_le_bytes());
        for v in [
            c.x,
            c.y,
            c.total,
            c.pressure,
            c.major_axis,
            c.minor_axis,
            c.angle,
            c.density,
        ] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.push(c.state.code());
        out.extend_from_slice(&[0u8; 3]);
    }
}

/// Streams a capture: file header, then records as they are written.
#[derive(Debug)]
pub struct CaptureWriter<W: Write> {
    inner: W,
    head: Vec<u8>,
    buf: Vec<u8>,
    frames: u64,
    meta_written: bool,
    frame_flags: bool,
}

impl<W: Write> CaptureWriter<W> {
    /// Write the file header.
    pub fn new(mut inner: W, tick_frequency: u64) -> Result<Self, CaptureError> {
        inner.write_all(CAPTURE_MAGIC)?;
        inner.write_all(&CAPTURE_VERSION.to_le_bytes())?;
        inner.write_all(&tick_frequency.to_le_bytes())?;
        Ok(Self {
            inner,
            head: Vec::with_capacity(RECORD_HEADER_LEN),
            buf: Vec::with_capacity(FRAME_HEADER_LEN + MAX_CONTACTS * CONTACT_RECORD_LEN),
            frames: 0,
            meta_written: false,
            frame_flags: false,
        })
    }

    /// Write a metadata record. Readers take extensions from the first one,
    /// so only a first record written before any frame enables them.
    pub fn write_meta(&mut self, meta: &MetaRecord) -> Result<(), CaptureError> {
        let json = serde_json::to_vec(meta).map_err(|e| CaptureError::InvalidMetadata {
            record: 0,
            reason: e.to_string(),
        })?;
        self.write_record(&RecordHeader::meta(json.len()), &json)?;
        if !self.meta_written && self.frames == 0 {
            self.frame_flags = meta.has_extension(EXT_FRAME_FLAGS);
        }
        self.meta_written = true;
        Ok(())
    }

    /// Write one frame record for `descriptor`.
    pub fn write_frame(&mut self, descriptor: &DeviceDescriptor, frame: &Frame) -> Result<(), CaptureError> {
        self.write_frame_as(descriptor, frame, descriptor.usage_page, descriptor.usage)
    }

    /// Write a frame record with an explicit report usage (used to capture
    /// reports the live path classified away).
    pub fn write_frame_as(
        &mut self,
        descriptor: &DeviceDescriptor,
        frame: &Frame,
        usage_page: u16,
        usage: u16,
    ) -> Result<(), CaptureError> {
        let mut payload = std::mem::take(&mut self.buf);
        payload.clear();
        encode_frame_payload(frame, self.frame_flags, &mut payload);
        let mut header = RecordHeader::for_device(descriptor, frame.arrival_ticks, payload.len());
        header.usage_page = usage_page;
        header.usage = usage;
        let result = self.write_record(&header, &payload);
        self.buf = payload;
        self.frames += 1;
        result
    }

    pub fn write_record(&mut self, header: &RecordHeader, payload: &[u8]) -> Result<(), CaptureError> {
        self.head.clear();
        header.encode(&mut self.head);
        self.inner.write_all(&self.head)?;
        self.inner.write_all(payload)?;
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    /// Flush and hand back the underlying writer.
    pub fn finish(mut self) -> Result<W, CaptureError> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> DeviceDescriptor {
        let mut d = DeviceDescriptor::touchpad(0, Side::Right, AxisExtents::NORMALIZED);
        d.hash = 0xABCD;
        d.vendor_id = 0x05AC;
        d.product_id = 0x0265;
        d
    }

    fn frame(seq: u64) -> Frame {
        let mut f = Frame::new(seq, seq * 1000).with_contacts(&[
            Contact::new(3, 0.25, 0.5, ContactState::Touching),
            Contact::new(4, 0.75, 0.5, ContactState::Making),
        ]);
        f.timestamp_secs = seq as f64 * 0.008;
        f.device_id = 42;
        f.button_pressed = seq % 2 == 0;
        f
    }

    fn sample_capture() -> Vec<u8> {
        let mut writer = CaptureWriter::new(Vec::new(), 1_000_000).unwrap();
        writer.write_meta(&MetaRecord::new("test", 2)).unwrap();
        writer.write_frame(&descriptor(), &frame(1)).unwrap();
        writer.write_frame(&descriptor(), &frame(2)).unwrap();
        writer.finish().unwrap()
    }

    #[test]
    fn test_written_capture_loads() {
        let bytes = sample_capture();
        assert_eq!(&bytes[..8], CAPTURE_MAGIC);
        let capture = Capture::from_bytes(&bytes).unwrap();
        assert_eq!(capture.header.tick_frequency, 1_000_000);
        assert_eq!(capture.records.len(), 3);
        assert_eq!(capture.meta.as_ref().map(|m| m.frame_count), Some(2));

        let records: Vec<_> = capture.frame_records().collect();
        assert_eq!(records.len(), 2);
        let header = records[0].header;
        assert_eq!(header.side(), Side::Right);
        assert_eq!(header.device_hash, 0xABCD);
        assert_eq!(header.payload_len as usize, FRAME_HEADER_LEN + 2 * CONTACT_RECORD_LEN);

        assert!(capture.frame_flags());
        let decoded = decode_frame_payload(&header, &records[0].payload, true).unwrap();
        assert_eq!(decoded, frame(1));
        let decoded = decode_frame_payload(&records[1].header, &records[1].payload, true).unwrap();
        assert!(decoded.button_pressed);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = sample_capture();
        bytes[0] = b'X';
        assert!(matches!(
            Capture::from_bytes(&bytes),
            Err(CaptureError::BadMagic { .. })
        ));
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let mut bytes = sample_capture();
        bytes[8..12].copy_from_slice(&2u32.to_le_bytes());
        assert!(matches!(
            Capture::from_bytes(&bytes),
            Err(CaptureError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn test_truncated_record_rejects_whole_file() {
        let bytes = sample_capture();
        let cut = &bytes[..bytes.len() - 7];
        match Capture::from_bytes(cut) {
            Err(CaptureError::TruncatedRecord { record, needed, available, .. }) => {
                assert_eq!(record, 2);
                assert_eq!(needed, FRAME_HEADER_LEN + 2 * CONTACT_RECORD_LEN);
                assert_eq!(available, needed - 7);
            }
            other => panic!("expected truncated record, got {other:?}"),
        }
        assert!(matches!(
            Capture::from_bytes(&bytes[..12]),
            Err(CaptureError::TruncatedHeader { len: 12 })
        ));
    }

    #[test]
    fn test_invalid_meta_schema_rejected() {
        let mut writer = CaptureWriter::new(Vec::new(), 1000).unwrap();
        let mut meta = MetaRecord::new("test", 0);
        meta.schema = "other-v9".to_string();
        writer.write_meta(&meta).unwrap();
        let bytes = writer.finish().unwrap();
        assert!(matches!(
            Capture::from_bytes(&bytes),
            Err(CaptureError::InvalidMetadata { record: 0, .. })
        ));
    }

    #[test]
    fn test_payload_faults_are_drop_reasons() {
        let header = RecordHeader::for_device(&descriptor(), 0, 0);
        let mut payload = Vec::new();
        encode_frame_payload(&frame(1), true, &mut payload);

        assert_eq!(
            decode_frame_payload(&header, &payload[..payload.len() - 1], true),
            Err(DropReason::Truncated)
        );

        let mut longer = payload.clone();
        longer.push(0);
        assert_eq!(decode_frame_payload(&header, &longer, true), Err(DropReason::InvalidReportSize));

        let mut bad_magic = payload.clone();
        bad_magic[3] = b'9';
        assert_eq!(decode_frame_payload(&header, &bad_magic, true), Err(DropReason::ParseFailure));

        let mut bad_state = payload.clone();
        bad_state[FRAME_HEADER_LEN + 36] = 8;
        assert_eq!(decode_frame_payload(&header, &bad_state, true), Err(DropReason::ParseFailure));
    }

    #[test]
    fn test_reserved_field_ignored_without_frame_flags() {
        let mut writer = CaptureWriter::new(Vec::new(), 1000).unwrap();
        writer.write_frame(&descriptor(), &frame(2)).unwrap();
        let mut bytes = writer.finish().unwrap();
        let capture = Capture::from_bytes(&bytes).unwrap();
        assert!(!capture.frame_flags());
        let record = &capture.records[0];
        assert!(!decode_frame_payload(&record.header, &record.payload, false).unwrap().button_pressed);

        // Another writer's nonzero reserved field is not a button press.
        let reserved = FILE_HEADER_LEN + RECORD_HEADER_LEN + 30;
        assert_eq!(&bytes[reserved..reserved + 2], &[0, 0]);
        bytes[reserved..reserved + 2].copy_from_slice(&0xFFFFu16.to_le_bytes());
        let capture = Capture::from_bytes(&bytes).unwrap();
        let record = &capture.records[0];
        let decoded = decode_frame_payload(&record.header, &record.payload, capture.frame_flags()).unwrap();
        assert!(!decoded.button_pressed);
    }

    #[test]
    fn test_meta_without_extensions_parses() {
        let json = r#"{"type":"meta","schema":"g2k-replay-v1","capturedAt":"2024-01-01T00:00:00Z","platform":"windows","source":"pad","frameCount":3}"#;
        let meta: MetaRecord = serde_json::from_str(json).unwrap();
        assert!(meta.extensions.is_empty());
        assert!(!meta.has_extension(EXT_FRAME_FLAGS));
    }

    #[test]
    fn test_writer_reuses_record_buffers() {
        let mut writer = CaptureWriter::new(Vec::new(), 1000).unwrap();
        let head = writer.head.capacity();
        let buf = writer.buf.capacity();
        writer.write_meta(&MetaRecord::new("test", 0)).unwrap();
        for seq in 1..=50 {
            writer.write_frame(&descriptor(), &frame(seq)).unwrap();
        }
        assert_eq!(writer.head.capacity(), head);
        assert_eq!(writer.buf.capacity(), buf);
        assert_eq!(writer.frames_written(), 50);
    }
}
