//! Text encoding detection for delimited input.

use encoding_rs::{Encoding, GBK, UTF_8};

use crate::error::{IngestionError, IngestionResult};

/// Number of leading bytes inspected for a byte-order mark.
pub const SNIFF_WINDOW: usize = 1024;

/// Decode `bytes` to text.
///
/// Resolution order:
///
/// - an explicit `label` (any WHATWG label such as `"utf-8"`, `"gbk"`, `"windows-1252"`)
/// - a UTF-8, UTF-16LE or UTF-16BE byte-order mark in the first [`SNIFF_WINDOW`] bytes
/// - strict UTF-8
/// - GBK, decoded lossily so that detection itself never fails
///
/// Returns the text (without any BOM) and the canonical name of the encoding used.
pub fn detect_and_decode(bytes: &[u8], label: Option<&str>) -> IngestionResult<(String, &'static str)> {
    if let Some(label) = label {
        let encoding = Encoding::for_label(label.trim().as_bytes()).ok_or_else(|| IngestionError::Encoding {
            label: label.to_string(),
        })?;
        // `decode` still honours a BOM if one is present, which matches what callers expect.
        let (text, used, _had_errors) = encoding.decode(bytes);
        return Ok((text.into_owned(), used.name()));
    }

    let window = &bytes[..bytes.len().min(SNIFF_WINDOW)];
    if let Some((encoding, bom_len)) = Encoding::for_bom(window) {
        let (text, _had_errors) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        return Ok((text.into_owned(), encoding.name()));
    }

    match std::str::from_utf8(bytes) {
        Ok(text) => Ok((text.to_string(), UTF_8.name())),
        Err(_) => {
            let (text, _had_errors) = GBK.decode_without_bom_handling(bytes);
            Ok((text.into_owned(), GBK.name()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::detect_and_decode;

    #[test]
    fn utf8_bom_is_stripped() {
        let (text, enc) = detect_and_decode(b"\xEF\xBB\xBFname,score\n", None).unwrap();
        assert_eq!(enc, "UTF-8");
        assert_eq!(text, "name,score\n");
    }

    #[test]
    fn utf16le_bom_is_recognised() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "a,b\n".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let (text, enc) = detect_and_decode(&bytes, None).unwrap();
        assert_eq!(enc, "UTF-16LE");
        assert_eq!(text, "a,b\n");
    }

    #[test]
    fn utf16be_bom_is_recognised() {
        let mut bytes = vec![0xFE, 0xFF];
        for unit in "x;y".encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        let (text, enc) = detect_and_decode(&bytes, None).unwrap();
        assert_eq!(enc, "UTF-16BE");
        assert_eq!(text, "x;y");
    }

    #[test]
    fn plain_utf8_without_bom() {
        let (text, enc) = detect_and_decode("名前,点数\n".as_bytes(), None).unwrap();
        assert_eq!(enc, "UTF-8");
        assert_eq!(text, "名前,点数\n");
    }

    #[test]
    fn invalid_utf8_falls_back_to_gbk() {
        // "姓名" in GBK.
        let bytes = [0xD0, 0xD5, 0xC3, 0xFB, b',', b'1'];
        let (text, enc) = detect_and_decode(&bytes, None).unwrap();
        assert_eq!(enc, "GBK");
        assert_eq!(text, "姓名,1");
    }

    #[test]
    fn garbage_bytes_never_error() {
        let bytes = [0xFF, 0x80, 0x81, 0xFE, 0x00];
        assert!(detect_and_decode(&bytes, None).is_ok());
    }

    #[test]
    fn explicit_label_wins() {
        let (text, enc) = detect_and_decode(&[0xE9, b'a'], Some("latin1")).unwrap();
        assert_eq!(enc, "windows-1252");
        assert_eq!(text, "éa");
    }

    #[test]
    fn unknown_label_is_an_error() {
        let err = detect_and_decode(b"a,b", Some("klingon-8")).unwrap_err();
        assert!(err.to_string().contains("klingon-8"));
    }
}
