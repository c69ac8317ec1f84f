//! Request payload validation.

use validator::{Validate, ValidationErrors};

use crate::Result;

/// Run derived validators, mapping failures to `Error::Validation`.
pub fn validate_request<T: Validate>(request: &T) -> Result<()> {
    request.validate()?;
    Ok(())
}

/// Strip surrounding whitespace so length rules measure what gets stored.
pub fn trim_field(field: &mut String) {
    let trimmed = field.trim();
    if trimmed.len() != field.len() {
        *field = trimmed.to_string();
    }
}

pub fn trim_optional(field: &mut Option<String>) {
    if let Some(value) = field {
        trim_field(value);
    }
}

/// Flatten field errors into one stable, human-readable line.
pub fn describe(errors: &ValidationErrors) -> String {
    let mut parts: Vec<String> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| match &e.message {
                Some(message) => message.to_string(),
                None => format!("{}: {}", field, e.code),
            })
        })
        .collect();
    parts.sort();
    parts.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[derive(Validate)]
    struct Post {
        #[validate(length(min = 3, max = 200, message = "Title must be 3-200 characters"))]
        title: String,
        #[validate(length(min = 10))]
        summary: String,
    }

    #[test]
    fn test_valid() {
        let post = Post {
            title: "Looking for a gaffer".to_string(),
            summary: "Two day shoot in Leeds".to_string(),
        };
        assert!(validate_request(&post).is_ok());
    }

    #[test]
    fn test_messages() {
        let post = Post {
            title: "Hi".to_string(),
            summary: "short".to_string(),
        };
        match validate_request(&post) {
            Err(Error::Validation(message)) => {
                assert_eq!(message, "Title must be 3-200 characters; summary: length");
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_trim_before_length_check() {
        let mut post = Post {
            title: "  ab  ".to_string(),
            summary: "Two day shoot in Leeds".to_string(),
        };
        trim_field(&mut post.title);
        assert_eq!(post.title, "ab");
        assert!(validate_request(&post).is_err());
    }

    #[test]
    fn test_trim_optional() {
        let mut note = Some("  wrap day  ".to_string());
        trim_optional(&mut note);
        assert_eq!(note.as_deref(), Some("wrap day"));

        let mut missing: Option<String> = None;
        trim_optional(&mut missing);
        assert!(missing.is_none());
    }
}
