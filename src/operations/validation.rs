use crate::pipeline::ValidationError;

pub fn require_id(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }
    if value.contains('#') {
        return Err(ValidationError::new(field, "must not contain '#'"));
    }
    Ok(())
}

/// Non-blank text of at most `max_length` characters.
pub fn require_content(field: &str, value: &str, max_length: usize) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }
    let length = value.chars().count();
    if length > max_length {
        return Err(ValidationError::new(
            field,
            format!("is {} characters, limit is {}", length, max_length),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_id() {
        assert!(require_id("storyId", "s1").is_ok());
        assert!(require_id("storyId", "  ").is_err());
        assert!(require_id("storyId", "STORY#s1").is_err());
    }

    #[test]
    fn test_content_limit_counts_characters() {
        assert!(require_content("content", "héllo", 5).is_ok());
        let err = require_content("content", "héllo!", 5).unwrap_err();
        assert_eq!(err.field, "content");
        assert!(require_content("content", "", 5).is_err());
    }
}
