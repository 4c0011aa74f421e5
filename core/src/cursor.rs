use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::engine::LogError;

/// Resume point handed out with a page: the next line, where it starts, and the file
/// version the offset belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Cursor {
  pub line: u64,
  pub offset: u64,
  pub mtime_ns: u64,
}

pub(crate) fn encode_cursor(c: Cursor) -> String {
  let json = serde_json::to_vec(&c).expect("cursor serialize");
  base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json)
}

pub(crate) fn decode_cursor(token: Option<&str>) -> Result<Option<Cursor>, LogError> {
  match token {
    None => Ok(None),
    Some(t) if t.is_empty() => Ok(None),
    Some(t) => {
      let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(t)
        .map_err(|e| LogError::BadCursor(e.to_string()))?;
      let c: Cursor =
        serde_json::from_slice(&bytes).map_err(|e| LogError::BadCursor(e.to_string()))?;
      Ok(Some(c))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn token_survives_encoding() {
    let c = Cursor {
      line: 101,
      offset: 4_096,
      mtime_ns: 1_700_000_000_123_456_789,
    };
    let token = encode_cursor(c);
    assert!(!token.contains('='));
    assert_eq!(decode_cursor(Some(token.as_str())).unwrap(), Some(c));
  }

  #[test]
  fn missing_or_garbage_tokens() {
    assert_eq!(decode_cursor(None).unwrap(), None);
    assert_eq!(decode_cursor(Some("")).unwrap(), None);
    assert!(matches!(
      decode_cursor(Some("!!not base64!!")),
      Err(LogError::BadCursor(_))
    ));
    // valid base64, not a cursor
    assert!(matches!(
      decode_cursor(Some("e30")),
      Err(LogError::BadCursor(_))
    ));
  }
}
