/// Classic 16-bytes-per-line dump of `buffer`, labelled from address `start`.
pub fn hexdump(buffer: &[u8], start: u32) -> String {
    let width = if start as usize + buffer.len() > 0x10000 { 5 } else { 4 };
    let mut str = String::new();
    for (row, bytes) in buffer.chunks(16).enumerate() {
        let mut line = format!("{:0width$x}: ", start as usize + row * 16, width = width);
        let mut chars = String::new();
        for &byte in bytes {
            line.push_str(&format!("{:02x} ", byte));
            let c = byte as char;
            chars.push(if c.is_ascii_graphic() || c == ' ' {
                c
            } else {
                '.'
            });
        }

        let dump_line = format!("{:<width$} {}\n", line, chars, width = width + 2 + 16 * 3);
        str.push_str(&dump_line);
    }

    str
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hexdump() {
        let dump = hexdump(b"AB\x00", 0xC000);
        assert_eq!(dump.lines().count(), 1);
        assert!(dump.starts_with("c000: 41 42 00 "));
        assert!(dump.trim_end().ends_with("AB."));

        let slotted = hexdump(&[0; 17], 0xF0000);
        assert_eq!(slotted.lines().count(), 2);
        assert!(slotted.lines().nth(1).unwrap().starts_with("f0010: 00 "));
    }
}
