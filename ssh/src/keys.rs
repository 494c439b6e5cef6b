/// Key events recognized by the interactive selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Key {
    Enter,
    Esc,
    CtrlC,
    Up,
    Down,
    Char(char),
    Other,
}

/// Decodes the raw byte stream of an SSH channel into key events.
///
/// Escape sequences (arrow keys) arrive in one channel packet, so a chunk
/// ending in a bare ESC is the Escape key rather than a split sequence.
#[derive(Debug, Default)]
pub(crate) struct KeyParser;

impl KeyParser {
    pub(crate) fn feed(&mut self, bytes: &[u8]) -> Vec<Key> {
        let mut keys = Vec::new();
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'\r' | b'\n' => keys.push(Key::Enter),
                0x03 => keys.push(Key::CtrlC),
                0x1b => {
                    // CSI (`ESC [`) and SS3 (`ESC O`) cursor sequences.
                    if let (Some(b'[' | b'O'), Some(final_byte)) =
                        (bytes.get(i + 1).copied(), bytes.get(i + 2).copied())
                    {
                        match final_byte {
                            b'A' => keys.push(Key::Up),
                            b'B' => keys.push(Key::Down),
                            _ => keys.push(Key::Other),
                        }
                        i += 3;
                        continue;
                    }
                    keys.push(Key::Esc);
                }
                byte if byte.is_ascii_graphic() || byte == b' ' => {
                    keys.push(Key::Char(byte as char));
                }
                _ => keys.push(Key::Other),
            }
            i += 1;
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_plain_keys() {
        let mut parser = KeyParser::default();
        assert_eq!(parser.feed(b"\r"), vec![Key::Enter]);
        assert_eq!(parser.feed(&[0x03]), vec![Key::CtrlC]);
        assert_eq!(parser.feed(b"j"), vec![Key::Char('j')]);
    }

    #[test]
    fn decodes_arrow_sequences() {
        let mut parser = KeyParser::default();
        assert_eq!(parser.feed(b"\x1b[A"), vec![Key::Up]);
        assert_eq!(parser.feed(b"\x1b[B"), vec![Key::Down]);
        assert_eq!(parser.feed(b"\x1bOA"), vec![Key::Up]);
    }

    #[test]
    fn bare_escape_is_the_escape_key() {
        let mut parser = KeyParser::default();
        assert_eq!(parser.feed(&[0x1b]), vec![Key::Esc]);
    }

    #[test]
    fn mixed_chunks_preserve_order() {
        let mut parser = KeyParser::default();
        assert_eq!(
            parser.feed(b"k\x1b[B\r"),
            vec![Key::Char('k'), Key::Down, Key::Enter],
        );
    }
}
