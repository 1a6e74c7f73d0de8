use crate::error::ApiError;

/// Field-level length check, counted in characters.
pub fn text_length(
    field: &'static str,
    value: &str,
    min: usize,
    max: usize,
) -> Result<(), ApiError> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(ApiError::Validation {
            field,
            message: format!("{field} must be between {min} and {max} characters"),
        });
    }
    Ok(())
}

pub fn coordinate(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ApiError> {
    if !value.is_finite() || value < min || value > max {
        return Err(ApiError::Validation {
            field,
            message: format!("{field} must be between {min} and {max}"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_text() {
        assert!(text_length("content", "", 1, 2000).is_err());
        assert!(text_length("content", &"x".repeat(2001), 1, 2000).is_err());
        assert!(text_length("content", "fine", 1, 2000).is_ok());
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert!(coordinate("latitude", 90.01, -90.0, 90.0).is_err());
        assert!(coordinate("latitude", f64::NAN, -90.0, 90.0).is_err());
        assert!(coordinate("longitude", -179.9, -180.0, 180.0).is_ok());
    }
}
