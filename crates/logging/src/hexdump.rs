use std::fmt::Write as _;

const ROW: usize = 16;

/// Renders `bytes` as a trace-log hex dump: offset, 16 hex bytes, then the
/// printable ASCII view with `.` for everything else.
///
/// ```
/// let dump = logging::hex_dump(b"AFD\n");
/// assert_eq!(dump, "0000  41 46 44 0a                                      AFD.\n");
/// ```
#[must_use]
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len().div_ceil(ROW) * 72);
    for (row, chunk) in bytes.chunks(ROW).enumerate() {
        let _ = write!(out, "{:04x} ", row * ROW);
        for i in 0..ROW {
            match chunk.get(i) {
                Some(b) => {
                    let _ = write!(out, " {b:02x}");
                }
                None => out.push_str("   "),
            }
        }
        out.push_str("  ");
        out.extend(chunk.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        }));
        out.push('\n');
    }
    out
}
