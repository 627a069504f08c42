// src/process/utils.rs

/// Trim whitespace + strip outer quotes if present.
pub fn clean_str(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

/// Cell at `idx`, or `""` when the column is unknown or the row is short.
pub fn cell(cells: &[String], idx: Option<usize>) -> &str {
    idx.and_then(|i| cells.get(i)).map_or("", |s| s.as_str())
}

/// Case-insensitive comparison of trimmed text.
pub fn same_text(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_str_strips_quotes_and_space() {
        assert_eq!(clean_str("  \" Tag Level \"  "), "Tag Level");
        assert_eq!(clean_str("\""), "\"");
        assert_eq!(clean_str(" 8.75% "), "8.75%");
    }

    #[test]
    fn cell_tolerates_short_rows() {
        let row = vec!["a".to_string(), "b".to_string()];
        assert_eq!(cell(&row, Some(1)), "b");
        assert_eq!(cell(&row, Some(5)), "");
        assert_eq!(cell(&row, None), "");
    }

    #[test]
    fn text_comparison_ignores_case_and_padding() {
        assert!(same_text(" tag level", "Tag Level "));
        assert!(!same_text("Tag", "Tag Level"));
    }
}
