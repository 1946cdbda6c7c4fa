use crate::error::HarvestError;

fn parse_year(value: &str) -> Option<u32> {
    if value.len() == 4 && value.chars().all(|c| c.is_ascii_digit()) {
        value.parse().ok()
    } else {
        None
    }
}

/// Validates a Scopus `date` value: `YYYY` or an inclusive `YYYY-YYYY` range.
pub(crate) fn validate_year_range(value: &str) -> Result<String, HarvestError> {
    let v = value.trim();
    let invalid = || {
        HarvestError::InvalidArgument(format!(
            "--date accepts YYYY or YYYY-YYYY (got '{value}')"
        ))
    };

    if let Some(year) = parse_year(v) {
        return Ok(year.to_string());
    }

    let (start, end) = v.split_once('-').ok_or_else(invalid)?;
    let start = parse_year(start.trim()).ok_or_else(invalid)?;
    let end = parse_year(end.trim()).ok_or_else(invalid)?;
    if start > end {
        return Err(HarvestError::InvalidArgument(format!(
            "--date range starts after it ends ({start} > {end})"
        )));
    }
    Ok(format!("{start}-{end}"))
}
