//! Headless event stream.
//!
//! In headless mode frames are driven by a text stream instead of a window,
//! one line per frame:
//!
//! ```text
//! AVAILABLE <dt> [<output>.ppm]
//! ```
//!
//! `dt` is the frame's time step in seconds (finite, not negative). When an
//! output path is given the frame's image is written there as a PPM. Blank
//! lines and lines starting with `#` are ignored.

use std::path::PathBuf;

use thiserror::Error;

/// One frame request from the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct HeadlessEvent {
    pub dt: f32,
    pub save: Option<PathBuf>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HeadlessParseError {
    #[error("unknown event '{0}'")]
    UnknownEvent(String),

    #[error("missing time step")]
    MissingTimeStep,

    #[error("invalid time step '{0}'")]
    InvalidTimeStep(String),

    #[error("unexpected field '{0}' after output path")]
    TrailingField(String),
}

/// Parses one line. Returns `Ok(None)` for lines that carry no event.
pub fn parse_line(line: &str) -> Result<Option<HeadlessEvent>, HeadlessParseError> {
    let mut fields = line.split_whitespace();
    let Some(kind) = fields.next() else {
        return Ok(None);
    };
    if kind.starts_with('#') {
        return Ok(None);
    }
    if kind != "AVAILABLE" {
        return Err(HeadlessParseError::UnknownEvent(kind.to_string()));
    }

    let dt_field = fields.next().ok_or(HeadlessParseError::MissingTimeStep)?;
    let dt: f32 = dt_field
        .parse()
        .map_err(|_| HeadlessParseError::InvalidTimeStep(dt_field.to_string()))?;
    if !dt.is_finite() || dt < 0.0 {
        return Err(HeadlessParseError::InvalidTimeStep(dt_field.to_string()));
    }

    let save = fields.next().map(PathBuf::from);
    if let Some(extra) = fields.next() {
        return Err(HeadlessParseError::TrailingField(extra.to_string()));
    }

    Ok(Some(HeadlessEvent { dt, save }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_frame() {
        let event = parse_line("AVAILABLE 0.016").unwrap().unwrap();
        assert_eq!(event.dt, 0.016);
        assert_eq!(event.save, None);
    }

    #[test]
    fn test_parse_frame_with_save() {
        let event = parse_line("  AVAILABLE\t0.5   out/frame.ppm ").unwrap().unwrap();
        assert_eq!(event.dt, 0.5);
        assert_eq!(event.save, Some(PathBuf::from("out/frame.ppm")));
    }

    #[test]
    fn test_blank_and_comment_lines() {
        assert_eq!(parse_line(""), Ok(None));
        assert_eq!(parse_line("   "), Ok(None));
        assert_eq!(parse_line("# warmup"), Ok(None));
    }

    #[test]
    fn test_malformed_lines() {
        assert_eq!(
            parse_line("RESIZE 10 10"),
            Err(HeadlessParseError::UnknownEvent("RESIZE".into()))
        );
        assert_eq!(
            parse_line("AVAILABLE"),
            Err(HeadlessParseError::MissingTimeStep)
        );
        assert_eq!(
            parse_line("AVAILABLE soon"),
            Err(HeadlessParseError::InvalidTimeStep("soon".into()))
        );
        assert_eq!(
            parse_line("AVAILABLE -0.1"),
            Err(HeadlessParseError::InvalidTimeStep("-0.1".into()))
        );
        assert_eq!(
            parse_line("AVAILABLE inf"),
            Err(HeadlessParseError::InvalidTimeStep("inf".into()))
        );
        assert_eq!(
            parse_line("AVAILABLE 0.1 a.ppm b.ppm"),
            Err(HeadlessParseError::TrailingField("b.ppm".into()))
        );
    }

    #[test]
    fn test_zero_time_step_is_allowed() {
        assert_eq!(parse_line("AVAILABLE 0").unwrap().unwrap().dt, 0.0);
    }
}
