// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Size-bounded command responses.
//!
//! Two strategies keep a response under the transport limit:
//!
//! - [`crop_status`] for status-line lists: the number of lines kept is
//!   halved until the JSON array fits, then a notice line is appended.
//! - [`truncate_result`] for single serialized objects: the text is cut at
//!   the byte limit on a character boundary.

use serde::Serialize;
use tracing::warn;

use ualink_core::GatewayResult;

/// Line appended to a cropped status list.
pub const CROPPED_NOTICE: &str = "Results have been cropped due to message size limitations!";

/// Serializes `lines` as a JSON array no longer than `limit` bytes.
///
/// The cropped form is `lines[..n]` followed by [`CROPPED_NOTICE`], where
/// `n` is the first of `len/2, len/4, ...` that fits.
pub fn crop_status(lines: &[String], limit: usize) -> GatewayResult<String> {
    let full = serde_json::to_string(lines)?;
    if full.len() <= limit {
        return Ok(full);
    }

    let mut kept = lines.len();
    loop {
        kept /= 2;
        let mut cropped: Vec<&str> = lines[..kept].iter().map(String::as_str).collect();
        cropped.push(CROPPED_NOTICE);
        let json = serde_json::to_string(&cropped)?;
        if json.len() <= limit || kept == 0 {
            warn!(total = lines.len(), kept, "Command response cropped");
            return Ok(json);
        }
    }
}

/// Serializes `value` and cuts the text to at most `limit` bytes.
///
/// Returns the text and whether it was cut.
pub fn truncate_result<T: Serialize + ?Sized>(value: &T, limit: usize) -> GatewayResult<(String, bool)> {
    let text = serde_json::to_string(value)?;
    Ok(truncate_text(text, limit))
}

/// Cuts `text` to at most `limit` bytes without splitting a character.
pub fn truncate_text(mut text: String, limit: usize) -> (String, bool) {
    if text.len() <= limit {
        return (text, false);
    }

    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    warn!(bytes = text.len(), limit, "Command response truncated");
    text.truncate(end);
    (text, true)
}
