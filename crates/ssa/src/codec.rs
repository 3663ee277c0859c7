//! Sequential native-endian field access for fixed-layout records.
//!
//! Records are decoded field by field rather than transmuted so that the
//! layout is spelled out once and the crate stays free of `unsafe`.

/// Reads consecutive fields from a record slice.
pub struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

macro_rules! read_scalar {
    ($name:ident, $ty:ty) => {
        /// Reads the next field.
        pub fn $name(&mut self) -> $ty {
            const N: usize = std::mem::size_of::<$ty>();
            let mut raw = [0_u8; N];
            raw.copy_from_slice(&self.buf[self.pos..self.pos + N]);
            self.pos += N;
            <$ty>::from_ne_bytes(raw)
        }
    };
}

macro_rules! write_scalar {
    ($name:ident, $ty:ty) => {
        /// Writes the next field.
        pub fn $name(&mut self, value: $ty) {
            const N: usize = std::mem::size_of::<$ty>();
            self.buf[self.pos..self.pos + N].copy_from_slice(&value.to_ne_bytes());
            self.pos += N;
        }
    };
}

impl<'a> FieldReader<'a> {
    /// Starts reading at the beginning of `buf`.
    #[must_use]
    pub const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    read_scalar!(u8, u8);
    read_scalar!(u16, u16);
    read_scalar!(i32, i32);
    read_scalar!(u32, u32);
    read_scalar!(i64, i64);
    read_scalar!(u64, u64);
    read_scalar!(f64, f64);

    /// Reads a fixed-size byte array.
    pub fn bytes<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0_u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    /// Skips padding.
    pub fn skip(&mut self, n: usize) {
        self.pos += n;
    }

    /// Current offset within the record.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }
}

/// Writes consecutive fields into a record slice.
pub struct FieldWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> FieldWriter<'a> {
    /// Starts writing at the beginning of `buf`.
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    write_scalar!(u8, u8);
    write_scalar!(u16, u16);
    write_scalar!(i32, i32);
    write_scalar!(u32, u32);
    write_scalar!(i64, i64);
    write_scalar!(u64, u64);
    write_scalar!(f64, f64);

    /// Writes a fixed-size byte array.
    pub fn bytes(&mut self, value: &[u8]) {
        self.buf[self.pos..self.pos + value.len()].copy_from_slice(value);
        self.pos += value.len();
    }

    /// Writes `n` zero bytes.
    pub fn zero(&mut self, n: usize) {
        self.buf[self.pos..self.pos + n].fill(0);
        self.pos += n;
    }

    /// Current offset within the record.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }
}

/// Returns the text of a NUL-padded field up to the first NUL.
#[must_use]
pub fn fixed_str(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Builds a NUL-padded field, truncating so that at least one NUL remains.
#[must_use]
pub fn to_fixed<const N: usize>(text: &str) -> [u8; N] {
    let mut out = [0_u8; N];
    let bytes = text.as_bytes();
    let len = bytes.len().min(N.saturating_sub(1));
    out[..len].copy_from_slice(&bytes[..len]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_are_sequential() {
        let mut buf = [0_u8; 21];
        let mut writer = FieldWriter::new(&mut buf);
        writer.i32(-2);
        writer.u8(9);
        writer.zero(0);
        writer.u64(77);
        writer.f64(1.5);
        assert_eq!(writer.position(), 21);

        let mut reader = FieldReader::new(&buf);
        assert_eq!(reader.i32(), -2);
        assert_eq!(reader.u8(), 9);
        assert_eq!(reader.u64(), 77);
        assert!((reader.f64() - 1.5).abs() < f64::EPSILON);
        assert_eq!(reader.position(), 21);
    }

    #[test]
    fn fixed_strings_truncate_and_stop_at_nul() {
        let field: [u8; 4] = to_fixed("abcdef");
        assert_eq!(&field, b"abc\0");
        assert_eq!(fixed_str(&field), "abc");
        assert_eq!(fixed_str(b"xy\0z"), "xy");
    }
}
