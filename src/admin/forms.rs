//! Login and registration form rules, checked before any request.

use std::sync::OnceLock;

use regex::Regex;

use crate::api::{Credentials, Registration};
use crate::error::{FieldError, ValidationError};

pub const USERNAME_MIN: usize = 3;
pub const USERNAME_MAX: usize = 9;
pub const PASSWORD_MIN: usize = 6;

#[derive(Debug, Clone, Default)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    pub remember: bool,
}

impl LoginForm {
    pub fn validate(&self) -> Result<Credentials, ValidationError> {
        let username = self.username.trim();
        let mut errors = Vec::new();
        if username.is_empty() {
            errors.push(FieldError {
                field: "username",
                message: "username is required",
            });
        }
        if self.password.is_empty() {
            errors.push(FieldError {
                field: "password",
                message: "password is required",
            });
        }
        if !errors.is_empty() {
            return Err(ValidationError::Form(errors));
        }
        Ok(Credentials {
            username: username.to_string(),
            password: self.password.clone(),
            remember: self.remember,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct RegisterForm {
    pub username: String,
    pub password: String,
    pub confirm_password: String,
}

fn username_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(&format!("^[A-Za-z0-9_]{{{USERNAME_MIN},{USERNAME_MAX}}}$")).expect("static regex")
    })
}

impl RegisterForm {
    pub fn validate(&self) -> Result<Registration, ValidationError> {
        let username = self.username.trim();
        let mut errors = Vec::new();

        if username.is_empty() {
            errors.push(FieldError {
                field: "username",
                message: "username is required",
            });
        } else if !username_pattern().is_match(username) {
            errors.push(FieldError {
                field: "username",
                message: "username must be 3-9 letters, digits or underscores",
            });
        }

        if self.password.chars().count() < PASSWORD_MIN {
            errors.push(FieldError {
                field: "password",
                message: "password must be at least 6 characters",
            });
        }
        if self.confirm_password != self.password {
            errors.push(FieldError {
                field: "confirm_password",
                message: "passwords do not match",
            });
        }

        if !errors.is_empty() {
            return Err(ValidationError::Form(errors));
        }
        Ok(Registration {
            username: username.to_string(),
            password: self.password.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(err: ValidationError) -> Vec<&'static str> {
        match err {
            ValidationError::Form(errors) => errors.into_iter().map(|e| e.field).collect(),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn login_trims_username_and_requires_both_fields() {
        let creds = LoginForm {
            username: "  bob ".into(),
            password: "secret".into(),
            remember: true,
        }
        .validate()
        .unwrap();
        assert_eq!(creds.username, "bob");
        assert!(creds.remember);

        let err = LoginForm::default().validate().unwrap_err();
        assert_eq!(fields(err), vec!["username", "password"]);
    }

    #[test]
    fn register_username_rules() {
        let form = |name: &str| RegisterForm {
            username: name.into(),
            password: "secret1".into(),
            confirm_password: "secret1".into(),
        };
        assert!(form("bob_01").validate().is_ok());
        assert!(form("ab").validate().is_err());
        assert!(form("abcdefghij").validate().is_err());
        assert!(form("bob!").validate().is_err());
        assert!(form("张三丰").validate().is_err());
    }

    #[test]
    fn register_password_rules() {
        let err = RegisterForm {
            username: "alice".into(),
            password: "12345".into(),
            confirm_password: "54321".into(),
        }
        .validate()
        .unwrap_err();
        assert_eq!(fields(err), vec!["password", "confirm_password"]);
    }
}
