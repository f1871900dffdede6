//! Helpers for writing actions.

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use crate::eval::error::EvalError;
use crate::eval::value::{Value, ValueMap};

lazy_static! {
    // [[D:]H:]M:SS, with D/H/M/S accepted as separators
    static ref DURATION: Result<Regex, regex::Error> =
        Regex::new(r"^\s*(?:(?:(\d+)[:D])?(\d{1,2})[:H])?(\d{1,2})[:M](\d{2})S?\s*$");
    static ref URL_EXTENSION: Result<Regex, regex::Error> = Regex::new(r"\.(\w+)(?:\?[^?]*)?$");
}

const HLS_MIME_TYPE: &str = "application/vnd.apple.mpegurl";

#[derive(Debug, Error, PartialEq)]
pub enum HelperError {
    #[error("The value \"{0}\" is not a valid duration string")]
    InvalidDuration(String),
    #[error("Couldn't derive file type of {url} (ext: {ext:?}, mimeType: {mime_type:?})")]
    UnknownFileType {
        url: String,
        ext: Option<String>,
        mime_type: Option<String>,
    },
    #[error("Resource does not appear to be media: {0}")]
    InvalidMediaType(String),
    #[error("Invalid helper pattern: {0}")]
    Pattern(String),
}

impl From<HelperError> for EvalError {
    fn from(error: HelperError) -> Self {
        EvalError::action_with_source(error.to_string(), error)
    }
}

fn pattern(regex: &Result<Regex, regex::Error>) -> Result<&Regex, HelperError> {
    regex
        .as_ref()
        .map_err(|e| HelperError::Pattern(e.to_string()))
}

/// Parses a clock-style duration ("1:02:03", "2D03H04M05S") into seconds.
pub fn duration_string_to_number(duration: &str) -> Result<i64, HelperError> {
    let captures = pattern(&DURATION)?
        .captures(duration)
        .ok_or_else(|| HelperError::InvalidDuration(duration.to_string()))?;
    let part = |index: usize| -> i64 {
        captures
            .get(index)
            .and_then(|m| m.as_str().parse::<i64>().ok())
            .unwrap_or(0)
    };
    Ok(part(1) * 24 * 60 * 60 + part(2) * 60 * 60 + part(3) * 60 + part(4))
}

/// Derives `ext`, `mimeType`, `video`, `image` and, for audio, `audio` for a
/// media URL.
///
/// `extra` may already carry `ext` or `mimeType`; its entries are copied into
/// the result last and so take precedence. GIFs and HLS playlists count as
/// video.
pub fn guess_media_info_from_url(url: &str, extra: ValueMap) -> Result<ValueMap, HelperError> {
    let mut ext = extra.get("ext").and_then(Value::as_str).map(str::to_string);
    if ext.is_none() {
        ext = pattern(&URL_EXTENSION)?
            .captures(url)
            .and_then(|captures| captures.get(1))
            .map(|m| m.as_str().to_string());
    }
    let mut mime_type = extra
        .get("mimeType")
        .and_then(Value::as_str)
        .map(str::to_string);

    match (&ext, &mime_type) {
        (Some(ext), None) => {
            mime_type = mime_guess::from_ext(ext)
                .first()
                .map(|mime| mime.essence_str().to_string());
        }
        (None, Some(mime)) => ext = extension_for(mime),
        _ => {}
    }

    let (Some(ext), Some(mime_type)) = (ext.clone(), mime_type.clone()) else {
        return Err(HelperError::UnknownFileType {
            url: url.to_string(),
            ext,
            mime_type,
        });
    };

    let mut info = ValueMap::new();
    info.insert("url".to_string(), Value::from(url));
    insert_media_kind(&mut info, ext, mime_type)?;
    info.extend(extra);
    Ok(info)
}

/// Same as [`guess_media_info_from_url`] for a resource known only by its MIME
/// type.
pub fn guess_media_info_from_mime_type(
    mime_type: &str,
    extra: ValueMap,
) -> Result<ValueMap, HelperError> {
    let ext = extension_for(mime_type)
        .ok_or_else(|| HelperError::InvalidMediaType(mime_type.to_string()))?;
    let mut info = ValueMap::new();
    insert_media_kind(&mut info, ext, mime_type.to_string())?;
    info.extend(extra);
    Ok(info)
}

/// Decodes HTML entities (`&amp;`, `&#39;`, `&eacute;` ...). Markup is left as is.
pub fn decode_html(value: &str) -> String {
    html_escape::decode_html_entities(value).into_owned()
}

/// Preferred extension for a MIME type: the one named like its subtype, if any.
fn extension_for(mime_type: &str) -> Option<String> {
    let extensions = mime_guess::get_mime_extensions_str(mime_type)?;
    let subtype = mime_type.rsplit('/').next().unwrap_or_default();
    extensions
        .iter()
        .find(|ext| ext.eq_ignore_ascii_case(subtype))
        .or_else(|| extensions.first())
        .map(|ext| ext.to_string())
}

fn insert_media_kind(info: &mut ValueMap, ext: String, mime_type: String) -> Result<(), HelperError> {
    let (video, image, audio) = if mime_type.starts_with("video/")
        || ext.eq_ignore_ascii_case("gif")
        || mime_type == HLS_MIME_TYPE
    {
        (true, false, false)
    } else if mime_type.starts_with("image/") {
        (false, true, false)
    } else if mime_type.starts_with("audio/") {
        (false, false, true)
    } else {
        return Err(HelperError::InvalidMediaType(mime_type));
    };

    info.insert("ext".to_string(), Value::from(ext));
    info.insert("mimeType".to_string(), Value::from(mime_type));
    info.insert("video".to_string(), Value::from(video));
    info.insert("image".to_string(), Value::from(image));
    if audio {
        info.insert("audio".to_string(), Value::from(true));
    }
    Ok(())
}
