//! UTC timestamps used in generated directory names.

use time::OffsetDateTime;

/// Current UTC time as `YYYYMMDDTHHMMSSZ`.
pub fn utc_compact() -> String {
    format_compact(OffsetDateTime::now_utc())
}

pub fn format_compact(at: OffsetDateTime) -> String {
    format!(
        "{:04}{:02}{:02}T{:02}{:02}{:02}Z",
        at.year(),
        at.month() as u8,
        at.day(),
        at.hour(),
        at.minute(),
        at.second()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_compact() {
        let at = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        assert_eq!(format_compact(at), "20231114T221320Z");
        assert_eq!(utc_compact().len(), 16);
    }
}
