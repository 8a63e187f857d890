use std::io::Write;

use csv::{ReaderBuilder, StringRecord, Terminator, WriterBuilder};

use crate::error::SyncError;

/// Lowercases a column header and joins its whitespace-separated words with `_`.
///
/// Punctuation and camelCase are left alone, so `"Facility Name"` becomes
/// `"facility_name"` and an already normalized header maps to itself.
pub fn normalize_header(name: &str) -> String {
    name.split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join("_")
        .trim_matches('_')
        .to_string()
}

/// Copies a CSV payload to `writer`, normalizing the header row only.
///
/// Returns the number of data rows written after the header.
pub fn rewrite_csv<W: Write>(payload: &[u8], writer: W) -> Result<usize, SyncError> {
    let text = std::str::from_utf8(payload).map_err(|err| SyncError::Decode(err.to_string()))?;
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());
    let mut writer = WriterBuilder::new()
        .flexible(true)
        .terminator(Terminator::CRLF)
        .from_writer(writer);

    let mut records = reader.records();
    let header = match records.next() {
        Some(record) => record.map_err(|err| SyncError::Csv(err.to_string()))?,
        None => return Err(SyncError::EmptyCsv),
    };
    let normalized: StringRecord = header.iter().map(normalize_header).collect();
    writer
        .write_record(&normalized)
        .map_err(|err| SyncError::Csv(err.to_string()))?;

    let mut rows = 0usize;
    for record in records {
        let record = record.map_err(|err| SyncError::Csv(err.to_string()))?;
        writer
            .write_record(&record)
            .map_err(|err| SyncError::Csv(err.to_string()))?;
        rows += 1;
    }
    writer
        .flush()
        .map_err(|err| SyncError::Filesystem(err.to_string()))?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn normalizes_multi_word_headers() {
        assert_eq!(normalize_header("Facility Name"), "facility_name");
        assert_eq!(normalize_header("  Hospital   overall rating "), "hospital_overall_rating");
        assert_eq!(normalize_header("_Footnote_"), "footnote");
    }

    #[test]
    fn normalization_is_idempotent() {
        for header in ["Facility Name", "ZIP Code", "Phone-Number", "City/Town"] {
            let once = normalize_header(header);
            assert_eq!(normalize_header(&once), once);
        }
    }

    #[test]
    fn punctuation_and_camel_case_are_kept() {
        assert_eq!(normalize_header("City/Town"), "city/town");
        assert_eq!(normalize_header("facilityId"), "facilityid");
    }

    #[test]
    fn rewrite_keeps_rows_and_quoting() {
        let payload = b"Facility ID,Facility Name,City\n010001,\"SOUTHEAST HEALTH, INC\",DOTHAN\n";
        let mut out = Vec::new();
        let rows = rewrite_csv(payload, &mut out).unwrap();
        assert_eq!(rows, 1);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "facility_id,facility_name,city\r\n010001,\"SOUTHEAST HEALTH, INC\",DOTHAN\r\n"
        );
    }

    #[test]
    fn rewrite_rejects_empty_payload() {
        let err = rewrite_csv(b"", Vec::new()).unwrap_err();
        assert_matches!(err, SyncError::EmptyCsv);
    }

    #[test]
    fn rewrite_rejects_invalid_utf8() {
        let err = rewrite_csv(&[0x66, 0x6f, 0xff, 0x0a], Vec::new()).unwrap_err();
        assert_matches!(err, SyncError::Decode(_));
    }
}
