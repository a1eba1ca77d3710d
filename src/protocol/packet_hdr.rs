use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::utils::Seq16;

use super::{DecodingError, EncodingError};

pub const PACKET_HDR_LEN: usize = 5;
pub const FRAG_HDR_LEN: usize = PACKET_HDR_LEN + 2;

const FLAG_NEED_ACK: u8 = 0b01;
const FLAG_FRAG: u8 = 0b10;
const FLAG_MASK: u8 = FLAG_NEED_ACK | FLAG_FRAG;
const FLAGS_OFFSET: usize = 4;

/// Header layout selected by the fragment flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
enum Layout {
    Plain = 0b00,
    Frag = 0b10,
}

impl Layout {
    fn from_flags(flags: u8) -> Result<Self, DecodingError> {
        if flags & !FLAG_MASK != 0 {
            return Err(DecodingError::Decoding { field: "flg" });
        }
        Layout::try_from(flags & FLAG_FRAG).map_err(|_e| DecodingError::Decoding { field: "flg" })
    }

    fn hdr_len(self) -> usize {
        match self {
            Layout::Plain => PACKET_HDR_LEN,
            Layout::Frag => FRAG_HDR_LEN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragInfo {
    count: u8,
    index: u8,
}

impl FragInfo {
    pub fn new(count: u8, index: u8) -> Result<Self, EncodingError> {
        if index >= count {
            return Err(EncodingError::FragIndex { count, index });
        }
        Ok(FragInfo { count, index })
    }

    #[must_use]
    #[inline]
    pub fn count(&self) -> u8 {
        self.count
    }

    #[must_use]
    #[inline]
    pub fn index(&self) -> u8 {
        self.index
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    len: u16,
    seq: Seq16,
    need_ack: bool,
    frag: Option<FragInfo>,
}

pub struct PacketHeaderBuilder {
    pub seq: Seq16,
    pub need_ack: bool,
}

impl PacketHeaderBuilder {
    /// Plain header with an empty body.
    #[must_use]
    pub fn build(self) -> PacketHeader {
        let this = PacketHeader {
            len: PACKET_HDR_LEN as u16,
            seq: self.seq,
            need_ack: self.need_ack,
            frag: None,
        };
        this.check_rep();
        this
    }
}

impl PacketHeader {
    #[inline]
    fn check_rep(&self) {
        assert!(self.hdr_len() <= self.len as usize);
        if let Some(frag) = &self.frag {
            assert!(frag.index < frag.count);
        }
    }

    /// Header length implied by the fixed prefix alone.
    pub fn peek_hdr_len(buf: &[u8]) -> Result<usize, DecodingError> {
        if buf.len() < PACKET_HDR_LEN {
            return Err(DecodingError::Truncated {
                need: PACKET_HDR_LEN,
                got: buf.len(),
            });
        }
        Ok(Layout::from_flags(buf[FLAGS_OFFSET])?.hdr_len())
    }

    pub fn from_slice(buf: &[u8]) -> Result<Self, DecodingError> {
        let hdr_len = Self::peek_hdr_len(buf)?;
        if buf.len() < hdr_len {
            return Err(DecodingError::Truncated {
                need: hdr_len,
                got: buf.len(),
            });
        }

        let mut rdr = Cursor::new(buf);
        let len = rdr
            .read_u16::<BigEndian>()
            .map_err(|_e| DecodingError::Decoding { field: "len" })?;
        let seq = rdr
            .read_u16::<BigEndian>()
            .map_err(|_e| DecodingError::Decoding { field: "seq" })?;
        let flags = rdr
            .read_u8()
            .map_err(|_e| DecodingError::Decoding { field: "flg" })?;
        let frag = match Layout::from_flags(flags)? {
            Layout::Plain => None,
            Layout::Frag => {
                let count = rdr
                    .read_u8()
                    .map_err(|_e| DecodingError::Decoding { field: "cnt" })?;
                let index = rdr
                    .read_u8()
                    .map_err(|_e| DecodingError::Decoding { field: "idx" })?;
                let frag = FragInfo::new(count, index)
                    .map_err(|_e| DecodingError::Decoding { field: "idx" })?;
                Some(frag)
            }
        };
        debug_assert_eq!(rdr.position() as usize, hdr_len);

        if (len as usize) < hdr_len {
            return Err(DecodingError::Decoding { field: "len" });
        }
        if buf.len() < len as usize {
            return Err(DecodingError::LengthMismatch {
                declared: len as usize,
                available: buf.len(),
            });
        }

        let this = PacketHeader {
            len,
            seq: Seq16::from_u16(seq),
            need_ack: flags & FLAG_NEED_ACK != 0,
            frag,
        };
        this.check_rep();
        Ok(this)
    }

    /// Returns the number of header bytes written.
    pub fn write_to(&self, buf: &mut [u8]) -> Result<usize, EncodingError> {
        if buf.len() < self.hdr_len() {
            return Err(EncodingError::NotEnoughSpace);
        }
        let mut flags = u8::from(self.layout());
        if self.need_ack {
            flags |= FLAG_NEED_ACK;
        }

        let mut wtr = Cursor::new(buf);
        wtr.write_u16::<BigEndian>(self.len)
            .map_err(|_| EncodingError::NotEnoughSpace)?;
        wtr.write_u16::<BigEndian>(self.seq.to_u16())
            .map_err(|_| EncodingError::NotEnoughSpace)?;
        wtr.write_u8(flags)
            .map_err(|_| EncodingError::NotEnoughSpace)?;
        if let Some(frag) = &self.frag {
            wtr.write_u8(frag.count)
                .map_err(|_| EncodingError::NotEnoughSpace)?;
            wtr.write_u8(frag.index)
                .map_err(|_| EncodingError::NotEnoughSpace)?;
        }
        let written = wtr.position() as usize;
        assert_eq!(written, self.hdr_len());
        Ok(written)
    }

    /// Turn this header into a fragment header and size it for `payload_len` bytes.
    pub fn set_frag(
        &mut self,
        count: u8,
        index: u8,
        payload_len: usize,
    ) -> Result<(), EncodingError> {
        let frag = FragInfo::new(count, index)?;
        let len = Self::checked_len(FRAG_HDR_LEN, payload_len)?;
        self.frag = Some(frag);
        self.len = len;
        self.check_rep();
        Ok(())
    }

    pub fn set_payload_len(&mut self, payload_len: usize) -> Result<(), EncodingError> {
        self.len = Self::checked_len(self.hdr_len(), payload_len)?;
        self.check_rep();
        Ok(())
    }

    fn checked_len(hdr_len: usize, payload_len: usize) -> Result<u16, EncodingError> {
        let len = hdr_len + payload_len;
        u16::try_from(len).map_err(|_| EncodingError::LengthOverflow(len))
    }

    fn layout(&self) -> Layout {
        match self.frag {
            Some(_) => Layout::Frag,
            None => Layout::Plain,
        }
    }

    #[must_use]
    #[inline]
    pub fn hdr_len(&self) -> usize {
        self.layout().hdr_len()
    }

    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[must_use]
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.len() - self.hdr_len()
    }

    #[must_use]
    #[inline]
    pub fn seq(&self) -> Seq16 {
        self.seq
    }

    #[must_use]
    #[inline]
    pub fn need_ack(&self) -> bool {
        self.need_ack
    }

    #[must_use]
    #[inline]
    pub fn frag(&self) -> Option<FragInfo> {
        self.frag
    }
}
