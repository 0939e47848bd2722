use crate::error::AppError;

const FORBIDDEN_CHARACTERS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

const RESERVED_NAMES: &[&str] = &[".", ".."];

pub fn validate_file_name(name: &str) -> Result<String, AppError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("file name is empty".to_string()));
    }

    if RESERVED_NAMES.contains(&trimmed) {
        return Err(AppError::Validation(format!(
            "file name is reserved: {trimmed}"
        )));
    }

    if let Some(ch) = trimmed
        .chars()
        .find(|ch| FORBIDDEN_CHARACTERS.contains(ch) || ch.is_control())
    {
        return Err(AppError::Validation(format!(
            "file name contains forbidden character: {ch:?}"
        )));
    }

    Ok(trimmed.to_string())
}

pub fn remove_forbidden_characters(name: &str) -> String {
    name.chars()
        .filter(|ch| !FORBIDDEN_CHARACTERS.contains(ch) && !ch.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Picks `name`, or `name (n)` with the smallest free `n`, keeping any
/// extension after the suffix.
pub fn unique_name(name: &str, existing: &[String], is_directory: bool) -> String {
    let taken = |candidate: &str| existing.iter().any(|e| e == candidate);
    if !taken(name) {
        return name.to_string();
    }

    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !is_directory && !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };

    let mut counter = 1;
    loop {
        let candidate = match ext {
            Some(ext) => format!("{stem} ({counter}).{ext}"),
            None => format!("{stem} ({counter})"),
        };
        if !taken(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        assert_eq!(validate_file_name("report.pdf").unwrap(), "report.pdf");
        assert_eq!(validate_file_name("  notes  ").unwrap(), "notes");
        assert!(validate_file_name(".hidden").is_ok());
    }

    #[test]
    fn test_empty_and_reserved_rejected() {
        assert!(validate_file_name("").is_err());
        assert!(validate_file_name("   ").is_err());
        assert!(validate_file_name("..").is_err());
    }

    #[test]
    fn test_forbidden_characters_rejected() {
        for name in ["a/b", "a\\b", "a:b", "a*b", "a?b", "a\"b", "a<b", "a>b", "a|b", "a\nb"] {
            let err = validate_file_name(name).unwrap_err();
            assert!(matches!(err, AppError::Validation(_)), "{name}");
        }
    }

    #[test]
    fn test_remove_forbidden_characters() {
        assert_eq!(remove_forbidden_characters(" new:folder* "), "newfolder");
        assert_eq!(remove_forbidden_characters("///"), "");
    }

    #[test]
    fn test_unique_name() {
        let existing = vec![
            "Photos".to_string(),
            "Photos (1)".to_string(),
            "doc.txt".to_string(),
        ];
        assert_eq!(unique_name("Music", &existing, true), "Music");
        assert_eq!(unique_name("Photos", &existing, true), "Photos (2)");
        assert_eq!(unique_name("doc.txt", &existing, false), "doc (1).txt");
    }
}
