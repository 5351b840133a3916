//! Collation descriptors and the code pages they imply for single-byte text.
//!
//! A collation is five bytes on the wire: a little-endian `u32` holding the
//! LCID in its low 20 bits plus comparison/version flags, then a sort id.
//! Only the LCID and the UTF-8 flag matter for transcoding.

use bytes::{Buf, BufMut};
use encoding_rs::Encoding;

use crate::error::{TypeError, ensure_remaining};

/// Flag bit marking a UTF-8 collation (`*_UTF8`).
pub const COLLATION_FLAG_UTF8: u32 = 0x0800_0000;

/// Mask selecting the LCID from the collation info field.
pub const LCID_MASK: u32 = 0x000F_FFFF;

/// Size of a collation on the wire.
pub const COLLATION_SIZE: usize = 5;

/// SQL Server collation information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Collation {
    /// Collation info: LCID in the low 20 bits, flags and version above.
    pub lcid: u32,
    /// SQL sort order id (0 for Windows collations).
    pub sort_id: u8,
}

impl Default for Collation {
    /// `SQL_Latin1_General_CP1_CI_AS`, the server install default.
    fn default() -> Self {
        Self {
            lcid: 0x00D0_0409,
            sort_id: 0x34,
        }
    }
}

impl Collation {
    /// Decode a 5-byte collation.
    pub fn decode(src: &mut impl Buf) -> Result<Self, TypeError> {
        ensure_remaining(src, COLLATION_SIZE)?;
        let lcid = src.get_u32_le();
        let sort_id = src.get_u8();
        Ok(Self { lcid, sort_id })
    }

    /// Encode as 5 bytes.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32_le(self.lcid);
        dst.put_u8(self.sort_id);
    }

    /// Whether this is a UTF-8 collation.
    #[must_use]
    pub fn is_utf8(&self) -> bool {
        self.lcid & COLLATION_FLAG_UTF8 != 0
    }

    /// The bare LCID.
    #[must_use]
    pub fn locale_id(&self) -> u32 {
        self.lcid & LCID_MASK
    }

    /// Character encoding used for CHAR/VARCHAR/TEXT data in this collation.
    #[must_use]
    pub fn encoding(&self) -> &'static Encoding {
        if self.is_utf8() {
            return encoding_rs::UTF_8;
        }
        encoding_for_lcid(self.locale_id())
    }
}

/// Map an LCID to its ANSI code page encoding, defaulting to Windows-1252.
fn encoding_for_lcid(lcid: u32) -> &'static Encoding {
    match lcid & 0xFFFF {
        0x0411 => encoding_rs::SHIFT_JIS,
        0x0804 | 0x1004 => encoding_rs::GB18030,
        0x0404 | 0x0C04 | 0x1404 => encoding_rs::BIG5,
        0x0412 => encoding_rs::EUC_KR,
        0x041E => encoding_rs::WINDOWS_874,
        0x042A => encoding_rs::WINDOWS_1258,

        // Central European
        0x0405 | 0x0415 | 0x040E | 0x041A | 0x081A | 0x141A | 0x101A | 0x041B | 0x0424 | 0x0418
        | 0x041C => encoding_rs::WINDOWS_1250,

        // Cyrillic
        0x0419 | 0x0422 | 0x0423 | 0x0402 | 0x042F | 0x0C1A | 0x201A | 0x0440 | 0x0843 | 0x0444
        | 0x0450 | 0x0485 => encoding_rs::WINDOWS_1251,

        0x0408 => encoding_rs::WINDOWS_1253,
        0x041F | 0x042C => encoding_rs::WINDOWS_1254,
        0x040D => encoding_rs::WINDOWS_1255,

        // Arabic
        0x0401 | 0x0801 | 0x0C01 | 0x1001 | 0x1401 | 0x1801 | 0x1C01 | 0x2001 | 0x2401 | 0x2801
        | 0x2C01 | 0x3001 | 0x3401 | 0x3801 | 0x3C01 | 0x4001 | 0x0429 | 0x0420 | 0x048C
        | 0x0463 => encoding_rs::WINDOWS_1256,

        0x0425..=0x0427 => encoding_rs::WINDOWS_1257,

        _ => encoding_rs::WINDOWS_1252,
    }
}
