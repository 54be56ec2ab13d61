//! Byte decoding and delimiter sniffing for census files.

use encoding_rs::{UTF_8, WINDOWS_1252};

use super::FileError;

pub const DELIMITERS: [u8; 4] = [b',', b'\t', b'|', b';'];

/// UTF-8 with or without BOM, falling back to Windows-1252 (a superset of
/// Latin-1 for printable text). Returns the text and the encoding label.
pub fn decode(bytes: &[u8]) -> Result<(String, &'static str), FileError> {
    let (text, encoding) = match UTF_8.decode_without_bom_handling_and_without_replacement(
        bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes),
    ) {
        Some(text) => (text.into_owned(), "utf-8"),
        None => {
            let (text, had_errors) = WINDOWS_1252.decode_without_bom_handling(bytes);
            if had_errors {
                return Err(FileError::BadEncoding);
            }
            (text.into_owned(), "windows-1252")
        }
    };

    // NULs mean a UTF-16/binary payload that happened to decode.
    if text.contains('\0') {
        return Err(FileError::BadEncoding);
    }
    Ok((text, encoding))
}

fn count_outside_quotes(line: &str, delimiter: u8) -> usize {
    let mut quoted = false;
    line.bytes()
        .filter(|byte| {
            if *byte == b'"' {
                quoted = !quoted;
            }
            !quoted && *byte == delimiter
        })
        .count()
}

/// The candidate splitting the first non-empty line into the most fields.
pub fn sniff_delimiter(text: &str) -> Result<u8, FileError> {
    let header = text
        .lines()
        .find(|line| !line.trim().is_empty())
        .ok_or(FileError::Empty)?;

    DELIMITERS
        .iter()
        .map(|delimiter| (*delimiter, count_outside_quotes(header, *delimiter)))
        .filter(|(_, count)| *count > 0)
        .max_by_key(|(delimiter, count)| {
            // ties resolve in candidate order
            (*count, std::cmp::Reverse(DELIMITERS.iter().position(|d| d == delimiter)))
        })
        .map(|(delimiter, _)| delimiter)
        .ok_or(FileError::Delimiter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_utf8_with_and_without_bom() {
        let (text, encoding) = decode("é,b".as_bytes()).unwrap();
        assert_eq!((text.as_str(), encoding), ("é,b", "utf-8"));

        let mut with_bom = b"\xEF\xBB\xBF".to_vec();
        with_bom.extend_from_slice(b"a,b");
        assert_eq!(decode(&with_bom).unwrap().0, "a,b");
    }

    #[test]
    fn falls_back_to_windows_1252() {
        let (text, encoding) = decode(b"caf\xe9,\x93q\x94").unwrap();
        assert_eq!(encoding, "windows-1252");
        assert_eq!(text, "café,\u{201c}q\u{201d}");
    }

    #[test]
    fn rejects_utf16() {
        let utf16: Vec<u8> = "a,b".encode_utf16().flat_map(u16::to_le_bytes).collect();
        assert!(matches!(decode(&utf16), Err(FileError::BadEncoding)));
    }

    #[test]
    fn sniffs_delimiters() {
        assert_eq!(sniff_delimiter("\n\na|b|c\n1|2|3").unwrap(), b'|');
        assert_eq!(sniff_delimiter("a\tb\tc").unwrap(), b'\t');
        assert_eq!(sniff_delimiter("\"x,y\";b;c").unwrap(), b';');
        assert_eq!(sniff_delimiter("a,b;c").unwrap(), b',');
        assert!(matches!(sniff_delimiter("single"), Err(FileError::Delimiter)));
        assert!(matches!(sniff_delimiter("  \n"), Err(FileError::Empty)));
    }
}
