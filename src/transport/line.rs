use crate::pipeline::RawFrame;

use super::FrameError;

const FIELD_COUNT: usize = 5;

/// Decodes `"<ms>,<qx>,<qy>,<qz>,<qw>"`. The timestamp may carry a fractional
/// part, which is truncated.
pub fn parse_line(line: &str) -> Result<RawFrame, FrameError> {
    let fields: Vec<&str> = line.trim().split(',').map(str::trim).collect();

    if fields.len() != FIELD_COUNT {
        return Err(FrameError::FieldCount {
            expected: FIELD_COUNT,
            got: fields.len(),
        });
    }

    let mut values = [0.0f64; FIELD_COUNT];
    for (index, (field, value)) in fields.iter().zip(values.iter_mut()).enumerate() {
        *value = field
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| FrameError::BadField {
                index,
                value: field.to_string(),
            })?;
    }

    let [ms, qx, qy, qz, qw] = values;

    if ms < 0.0 {
        return Err(FrameError::BadField {
            index: 0,
            value: fields[0].to_string(),
        });
    }

    Ok(RawFrame::new(ms as u64, qx, qy, qz, qw))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(
            parse_line("1234,0.1,-0.2,0.3,0.9\r\n"),
            Ok(RawFrame::new(1234, 0.1, -0.2, 0.3, 0.9))
        );
        assert_eq!(
            parse_line("99.9, 0, 0, 0, 1"),
            Ok(RawFrame::new(99, 0.0, 0.0, 0.0, 1.0))
        );
    }

    #[test]
    fn test_field_count() {
        assert_eq!(
            parse_line("1234,0.1,0.2,0.3"),
            Err(FrameError::FieldCount {
                expected: 5,
                got: 4
            })
        );
        assert_eq!(
            parse_line("Booting..."),
            Err(FrameError::FieldCount {
                expected: 5,
                got: 1
            })
        );
    }

    #[test]
    fn test_bad_field() {
        assert_eq!(
            parse_line("1234,0.1,abc,0.3,0.9"),
            Err(FrameError::BadField {
                index: 2,
                value: "abc".to_string()
            })
        );
        assert!(parse_line("1234,0.1,NaN,0.3,0.9").is_err());
        assert!(parse_line("-5,0.1,0.2,0.3,0.9").is_err());
    }
}
