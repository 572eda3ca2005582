use crate::error::AppError;

pub fn require_non_empty(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

/// Push an error when `value` is outside `[0, 1]` (NaN included).
pub fn check_unit_interval(field: &str, value: f64, errors: &mut Vec<String>) {
    if !(0.0..=1.0).contains(&value) {
        errors.push(format!("{field} must be within [0, 1], got {value}"));
    }
}

/// Push an error when `value` is below `min`.
pub fn check_at_least(field: &str, value: u64, min: u64, errors: &mut Vec<String>) {
    if value < min {
        errors.push(format!("{field} must be at least {min}, got {value}"));
    }
}

/// Clamp a score into `[0, 1]`, mapping NaN to 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_unit() {
        assert_eq!(clamp_unit(1.5), 1.0);
        assert_eq!(clamp_unit(-0.2), 0.0);
        assert_eq!(clamp_unit(f64::NAN), 0.0);
        assert_eq!(clamp_unit(0.42), 0.42);
    }

    #[test]
    fn test_check_unit_interval_rejects_nan() {
        let mut errors = Vec::new();
        check_unit_interval("x", f64::NAN, &mut errors);
        check_unit_interval("y", 0.5, &mut errors);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("x "));
    }

    #[test]
    fn test_require_non_empty() {
        assert!(require_non_empty("title", "  ").is_err());
        assert!(require_non_empty("title", "ok").is_ok());
    }
}
