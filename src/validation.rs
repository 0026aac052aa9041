pub fn is_ascii_no_spaces(value: &str) -> Result<(), String> {
    match !value.is_empty()
        && value.chars().all(|c| c.is_ascii() && !c.is_whitespace())
    {
        true => Ok(()),
        false => Err("should be a non-empty ascii string without spaces".to_string()),
    }
}

pub fn is_display_name(value: &str) -> Result<(), String> {
    let trimmed = value.trim();
    match !trimmed.is_empty() && trimmed.chars().count() <= 64 {
        true => Ok(()),
        false => Err("should be between 1 and 64 characters".to_string()),
    }
}

#[cfg(test)]
#[test]
fn test_directory_ids() {
    assert!(is_ascii_no_spaces("uid=jdoe,ou=people").is_ok());
    assert!(is_ascii_no_spaces("j doe").is_err());
    assert!(is_ascii_no_spaces("").is_err());
}

#[cfg(test)]
#[test]
fn test_display_names() {
    assert!(is_display_name("Ada").is_ok());
    assert!(is_display_name("   ").is_err());
    assert!(is_display_name(&"x".repeat(65)).is_err());
}
