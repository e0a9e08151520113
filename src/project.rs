use crate::error::PartdeskError;

pub mod db;
pub mod models;

const MAX_NAME_LEN: usize = 120;

/// Trims the name and checks that something usable is left.
pub fn validate_name(name: &str) -> Result<&str, PartdeskError> {
    let name = name.trim();

    if name.is_empty() {
        return Err(PartdeskError::Validation(
            "project name cannot be empty".to_string(),
        ));
    }

    if name.chars().count() > MAX_NAME_LEN {
        return Err(PartdeskError::Validation(format!(
            "project name exceeds {MAX_NAME_LEN} characters"
        )));
    }

    Ok(name)
}

/// Empty descriptions are stored as none.
pub fn normalize_description(description: Option<&str>) -> Option<&str> {
    description.map(str::trim).filter(|d| !d.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_trimmed_and_bounded() {
        assert_eq!(validate_name("  Gearbox  ").unwrap(), "Gearbox");
        assert!(validate_name("   ").is_err());
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN)).is_ok());
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn blank_descriptions_become_none() {
        assert_eq!(normalize_description(Some("  ")), None);
        assert_eq!(normalize_description(None), None);
        assert_eq!(normalize_description(Some(" rev B ")), Some("rev B"));
    }
}
