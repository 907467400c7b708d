//! 16-bit checksums carried in LIS physical record trailers and RP66V1 segment trailers.

use crc::{Crc, CRC_16_XMODEM};
use digest::{
    typenum::U2, Digest, FixedOutput, HashMarker, Output, OutputSizeUser, Reset, Update,
};

static XMODEM: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// A 16-bit trailer checksum with a name for log output.
///
/// Bytes may be fed in any number of `update` calls; the result only depends
/// on the concatenation. The two output bytes are the big-endian value as it
/// is stored on disk.
pub trait Checksum: Digest + OutputSizeUser<OutputSize = U2> + Default {
    /// Short name used in log output.
    const NAME: &'static str;

    fn value(self) -> u16 {
        let out = self.finalize();
        u16::from_be_bytes([out[0], out[1]])
    }

    fn compute(data: &[u8]) -> u16 {
        let out = <Self as Digest>::digest(data);
        u16::from_be_bytes([out[0], out[1]])
    }

    fn validate(data: &[u8], stored: u16) -> bool {
        Self::compute(data) == stored
    }
}

/// The LIS79 add-and-rotate checksum over big-endian 16-bit words.
///
/// A trailing odd byte does not contribute.
#[derive(Debug, Default, Clone)]
pub struct LisChecksum {
    value: u32,
    pending: Option<u8>,
}

impl LisChecksum {
    #[inline(always)]
    fn word(&mut self, word: u16) {
        let mut cs = self.value + u32::from(word);
        if cs & 0x10000 != 0 {
            cs += 1;
        }
        cs <<= 1;
        if cs & 0x10000 != 0 {
            cs += 1;
        }
        self.value = cs & 0xFFFF;
    }
}

impl Checksum for LisChecksum {
    const NAME: &'static str = "lis";
}

impl OutputSizeUser for LisChecksum {
    type OutputSize = U2;
}

impl Update for LisChecksum {
    fn update(&mut self, mut data: &[u8]) {
        if let Some(high) = self.pending.take() {
            match data.split_first() {
                Some((low, rest)) => {
                    self.word(u16::from_be_bytes([high, *low]));
                    data = rest;
                }
                None => {
                    self.pending = Some(high);
                    return;
                }
            }
        }

        let mut words = data.chunks_exact(2);
        for pair in &mut words {
            self.word(u16::from_be_bytes([pair[0], pair[1]]));
        }
        self.pending = words.remainder().first().copied();
    }
}

impl FixedOutput for LisChecksum {
    fn finalize_into(self, out: &mut Output<Self>) {
        out.copy_from_slice(&(self.value as u16).to_be_bytes());
    }
}

impl Reset for LisChecksum {
    fn reset(&mut self) {
        *self = LisChecksum::default();
    }
}

impl HashMarker for LisChecksum {}

/// CRC-16/XMODEM: polynomial 0x1021, initial value 0, no reflection.
pub struct Crc16(crc::Digest<'static, u16>);

impl Default for Crc16 {
    fn default() -> Self {
        Crc16(XMODEM.digest())
    }
}

impl Checksum for Crc16 {
    const NAME: &'static str = "crc16";
}

impl OutputSizeUser for Crc16 {
    type OutputSize = U2;
}

impl Update for Crc16 {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }
}

impl FixedOutput for Crc16 {
    fn finalize_into(self, out: &mut Output<Self>) {
        out.copy_from_slice(&self.0.finalize().to_be_bytes());
    }
}

impl Reset for Crc16 {
    fn reset(&mut self) {
        *self = Crc16::default();
    }
}

impl HashMarker for Crc16 {}
