//! Reference artifact payloads
//!
//! A reference artifact's payload on the destination is a single JSON object
//! `{"ver":2,"rel":"<path relative to the reference's parent>"}`. Version 1
//! payloads (a bare path line, relative to the destination root) are read for
//! compatibility but never written. Resolution is purely lexical; the
//! resolver never consults destination state to disambiguate.

use crate::naming::{normalize_path, relative_to};
use crate::record::parent;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct RefPayload {
    ver: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    rel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
}

/// Encode the payload for a reference at `referrer_rpath` pointing at
/// `referent_rpath` (both destination-root-relative)
pub fn encode_reference(referrer_rpath: &str, referent_rpath: &str) -> Result<String> {
    let rel = relative_to(referent_rpath, parent(referrer_rpath))?;
    let payload = RefPayload {
        ver: 2,
        rel: Some(rel),
        path: None,
    };
    Ok(serde_json::to_string(&payload)?)
}

/// Decode a reference payload read from `referrer_rpath`, returning the
/// destination-root-relative real path of the referent
pub fn decode_reference(referrer_rpath: &str, payload: &[u8]) -> Result<String> {
    let text = std::str::from_utf8(payload).context("reference payload is not UTF-8")?;

    match serde_json::from_str::<RefPayload>(text) {
        Ok(p) => match p.ver {
            1 => p.path.context("v1 reference payload missing 'path'"),
            2 => {
                let rel = p.rel.context("v2 reference payload missing 'rel'")?;
                let joined = if parent(referrer_rpath).is_empty() {
                    rel
                } else {
                    format!("{}/{}", parent(referrer_rpath), rel)
                };
                Ok(normalize_path(&joined))
            }
            v => bail!("unrecognized reference payload version {v}"),
        },
        // Legacy v1: a single path line without JSON
        Err(_) => {
            let line = text.trim_end_matches('\n').trim();
            if line.is_empty() {
                bail!("empty reference payload in {referrer_rpath:?}");
            }
            Ok(line.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_same_dir() {
        let payload = encode_reference("b.19700101000002R.bin", "a.19700101000001.bin").unwrap();
        assert_eq!(payload, r#"{"ver":2,"rel":"a.19700101000001.bin"}"#);
    }

    #[test]
    fn test_encode_with_traversal() {
        let payload =
            encode_reference("sub/b.19700101000002R.bin", "other/a.19700101000001.bin").unwrap();
        assert_eq!(payload, r#"{"ver":2,"rel":"../other/a.19700101000001.bin"}"#);
    }

    #[test]
    fn test_decode_v2_roundtrip() {
        for (referrer, referent) in [
            ("b.19700101000002R.bin", "a.19700101000001.bin"),
            ("x/y/b.19700101000002R.bin", "x/a.19700101000001.bin"),
            ("x/b.19700101000002R.bin", "z/deep/a.19700101000001.bin"),
        ] {
            let payload = encode_reference(referrer, referent).unwrap();
            let back = decode_reference(referrer, payload.as_bytes()).unwrap();
            assert_eq!(back, referent, "roundtrip failed for {referrer}");
        }
    }

    #[test]
    fn test_decode_v1_bare_line() {
        let back = decode_reference("sub/b.19700101000002R.bin", b"old/a.19700101000001.bin\n")
            .unwrap();
        assert_eq!(back, "old/a.19700101000001.bin");
    }

    #[test]
    fn test_decode_v1_json() {
        let back = decode_reference(
            "b.19700101000002R.bin",
            br#"{"ver":1,"path":"a.19700101000001.bin"}"#,
        )
        .unwrap();
        assert_eq!(back, "a.19700101000001.bin");
    }

    #[test]
    fn test_decode_rejects_unknown_version() {
        assert!(decode_reference("r", br#"{"ver":3,"rel":"x"}"#).is_err());
        assert!(decode_reference("r", b"").is_err());
    }
}
