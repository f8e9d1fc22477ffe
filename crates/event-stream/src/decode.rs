//! Record payload decoding

use serde_json::Value;

use crate::error::{Error, Result};

/// Decode a record payload as UTF-8 JSON.
///
/// Returns `Ok(None)` for absent or blank payloads (tombstones), which carry
/// no event and are skipped without counting as failures.
pub fn decode_payload(payload: Option<&[u8]>) -> Result<Option<Value>> {
    let Some(bytes) = payload else {
        return Ok(None);
    };
    let text =
        std::str::from_utf8(bytes).map_err(|e| Error::Decode(format!("invalid UTF-8: {e}")))?;
    if text.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(text)
        .map(Some)
        .map_err(|e| Error::Decode(format!("invalid JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_json_object() {
        let value = decode_payload(Some(br#"{"severity":"warning","probableCause":"x"}"#))
            .unwrap()
            .unwrap();
        assert_eq!(value["severity"], "warning");
        assert_eq!(value["probableCause"], "x");
    }

    #[test]
    fn empty_and_missing_payloads_are_skipped() {
        assert!(decode_payload(None).unwrap().is_none());
        assert!(decode_payload(Some(b"")).unwrap().is_none());
        assert!(decode_payload(Some(b"  \n")).unwrap().is_none());
    }

    #[test]
    fn non_json_is_decode_failure() {
        let err = decode_payload(Some(b"not json at all")).unwrap_err();
        assert!(matches!(err, Error::Decode(_)), "got: {err:?}");
    }

    #[test]
    fn invalid_utf8_is_decode_failure() {
        let err = decode_payload(Some(&[0xff, 0xfe, 0x7b])).unwrap_err();
        assert!(err.to_string().contains("UTF-8"), "got: {err}");
    }
}
