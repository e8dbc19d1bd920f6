//! Line decoding with UTF-8 / Latin-1 auto-detection
//!
//! SPED files are produced either by the official PVA (Latin-1) or by ERP
//! exports (UTF-8). Lines decode as UTF-8 until the first line that is not
//! valid UTF-8; from then on the whole remainder is decoded as Latin-1.

use encoding_rs::WINDOWS_1252;
use serde::Serialize;
use std::borrow::Cow;
use tracing::debug;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DetectedEncoding {
    Utf8,
    Latin1,
}

impl DetectedEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectedEncoding::Utf8 => "UTF-8",
            DetectedEncoding::Latin1 => "ISO-8859-1",
        }
    }
}

#[derive(Debug)]
pub struct LineDecoder {
    encoding: DetectedEncoding,
    at_start: bool,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LineDecoder {
    pub fn new() -> Self {
        Self {
            encoding: DetectedEncoding::Utf8,
            at_start: true,
        }
    }

    pub fn encoding(&self) -> DetectedEncoding {
        self.encoding
    }

    /// Decode one raw line, without its line terminator
    pub fn decode<'a>(&mut self, raw: &'a [u8]) -> Cow<'a, str> {
        let mut bytes = trim_line_end(raw);
        if self.at_start {
            self.at_start = false;
            if let Some(rest) = bytes.strip_prefix(UTF8_BOM) {
                bytes = rest;
            }
        }

        if self.encoding == DetectedEncoding::Utf8 {
            match std::str::from_utf8(bytes) {
                Ok(text) => return Cow::Borrowed(text),
                Err(_) => {
                    debug!("Invalid UTF-8 found; switching to Latin-1 decoding");
                    self.encoding = DetectedEncoding::Latin1;
                }
            }
        }

        let (decoded, _) = WINDOWS_1252.decode_without_bom_handling(bytes);
        decoded
    }
}

fn trim_line_end(raw: &[u8]) -> &[u8] {
    let mut end = raw.len();
    while end > 0 && matches!(raw[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    &raw[..end]
}
