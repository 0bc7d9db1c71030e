use crate::{Error, Result};
use bytes::Bytes;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

pub(crate) mod parser;

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$")
        .expect("email pattern is valid")
});

static URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i)https?://[^\s/$.?#][^\s]*$").expect("url pattern is valid")
});

/// A file uploaded with a multipart form.
#[derive(Debug, Clone)]
pub struct FormFile {
    /// The name of the form element.
    pub name: String,
    /// The file name supplied by the client.
    pub file_name: Option<String>,
    /// The content type supplied by the client.
    pub content_type: Option<String>,
    /// The file content.
    pub content: Bytes,
}

/// The values of a submitted form, with per-field validation.
///
/// Validation failures are collected as messages keyed by field name and never abort the request;
/// the handler decides how to respond.
///
/// # Example
///
/// ```rust
/// # use request_lifecycle::Form;
/// let mut form = Form::new();
/// form.add_value("name", "alice");
/// form.add_value("age", "seven");
///
/// form.expect_value("name");
/// form.expect_numeric("age");
/// form.expect_value("email");
///
/// assert!(!form.is_valid());
/// assert!(!form.has_error("name"));
/// assert_eq!(form.error("age"), Some("age must be a numeric value"));
/// assert_eq!(form.error("email"), Some("email is required"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Form {
    values: BTreeMap<String, String>,
    files: Vec<FormFile>,
    errors: BTreeMap<String, String>,
    submitted: bool,
}

impl Form {
    /// Create an empty, unsubmitted form.
    pub fn new() -> Self {
        Default::default()
    }

    /// Parse a request body according to its content type.
    ///
    /// Bodies that are neither url-encoded nor multipart yield an empty form.
    /// The form is marked as submitted in every case.
    pub fn parse(content_type: Option<&str>, body: &[u8]) -> Result<Self> {
        let mut form = parser::parse(content_type, body).map_err(Error::Form)?;
        form.submitted = true;
        Ok(form)
    }

    /// Adds a value, overwriting an existing value of the same name.
    pub fn add_value(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    /// Adds an uploaded file.
    pub fn add_file(&mut self, file: FormFile) {
        self.files.push(file);
    }

    /// The value of the form element, or an empty string if it is blank.
    pub fn value(&self, name: &str) -> &str {
        self.get(name).unwrap_or("")
    }

    /// The value of the form element if it is not blank.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    /// The value of the form element as a boolean.
    /// `1` and `true` map to true, `0` and `false` to false.
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.get(name)? {
            "1" | "true" => Some(true),
            "0" | "false" => Some(false),
            _ => None,
        }
    }

    /// The value of the form element as an integer.
    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.get(name)?.trim().parse().ok()
    }

    /// The value of the form element as a float.
    pub fn get_float(&self, name: &str) -> Option<f32> {
        self.get(name)?.trim().parse().ok()
    }

    /// The value of the form element as a double.
    pub fn get_double(&self, name: &str) -> Option<f64> {
        self.get(name)?.trim().parse().ok()
    }

    /// All submitted values.
    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    /// All uploaded files.
    pub fn files(&self) -> &[FormFile] {
        &self.files
    }

    /// The first uploaded file, if any.
    pub fn file(&self) -> Option<&FormFile> {
        self.files.first()
    }

    /// Returns true if the form was parsed from a request body.
    pub fn is_submitted(&self) -> bool {
        self.submitted
    }

    /// Returns true if the field has a validation error.
    pub fn has_error(&self, name: &str) -> bool {
        self.errors.contains_key(name)
    }

    /// The validation error of the field, if any.
    pub fn error(&self, name: &str) -> Option<&str> {
        self.errors.get(name).map(String::as_str)
    }

    /// All validation errors, keyed by field name.
    pub fn errors(&self) -> &BTreeMap<String, String> {
        &self.errors
    }

    /// Returns true if any validation failed.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns true if no validation failed.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Expects a non-blank value.
    pub fn expect_value(&mut self, name: &str) {
        if self.get(name).is_none() {
            self.add_error(name, format!("{name} is required"));
        }
    }

    /// Expects a value with at least `min` characters.
    pub fn expect_min_length(&mut self, name: &str, min: usize) {
        if self.value(name).chars().count() < min {
            self.add_error(name, format!("{name} must have at least {min} characters"));
        }
    }

    /// Expects a value with at most `max` characters.
    pub fn expect_max_length(&mut self, name: &str, max: usize) {
        if self.value(name).chars().count() > max {
            self.add_error(name, format!("{name} must have at most {max} characters"));
        }
    }

    /// Expects a value with between `min` and `max` characters.
    pub fn expect_range_length(&mut self, name: &str, min: usize, max: usize) {
        let length = self.value(name).chars().count();
        if length < min || length > max {
            self.add_error(
                name,
                format!("{name} must have between {min} and {max} characters"),
            );
        }
    }

    /// Expects a numeric value.
    pub fn expect_numeric(&mut self, name: &str) {
        if self.get_double(name).is_none() {
            self.add_error(name, format!("{name} must be a numeric value"));
        }
    }

    /// Expects a numeric value of at least `min`.
    pub fn expect_min_value(&mut self, name: &str, min: f64) {
        if !self.get_double(name).map(|value| value >= min).unwrap_or(false) {
            self.add_error(name, format!("{name} must be at least {min}"));
        }
    }

    /// Expects a numeric value of at most `max`.
    pub fn expect_max_value(&mut self, name: &str, max: f64) {
        if !self.get_double(name).map(|value| value <= max).unwrap_or(false) {
            self.add_error(name, format!("{name} must be at most {max}"));
        }
    }

    /// Expects the value to equal the value of `other`, case sensitive.
    pub fn expect_exact_match(&mut self, name: &str, other: &str) {
        if self.get(name).is_none() || self.get(name) != self.get(other) {
            self.add_error(name, format!("{name} must match {other}"));
        }
    }

    /// Expects the value to be one of `allowed`.
    pub fn expect_match_any(&mut self, name: &str, allowed: &[&str]) {
        if !allowed.contains(&self.value(name)) {
            self.add_error(name, format!("{name} has an invalid value"));
        }
    }

    /// Expects a valid email address.
    pub fn expect_email(&mut self, name: &str) {
        if !EMAIL.is_match(self.value(name)) {
            self.add_error(name, format!("{name} must be a valid email address"));
        }
    }

    /// Expects a valid http(s) URL.
    pub fn expect_url(&mut self, name: &str) {
        if !URL.is_match(self.value(name)) {
            self.add_error(name, format!("{name} must be a valid URL"));
        }
    }

    /// Expects the value to match `pattern`.
    pub fn expect_regex(&mut self, name: &str, pattern: &Regex) {
        if !pattern.is_match(self.value(name)) {
            self.add_error(name, format!("{name} is invalid"));
        }
    }

    /// Records `message` for `name` unless `condition` holds.
    pub fn expect_true(&mut self, name: &str, condition: bool, message: &str) {
        if !condition {
            self.add_error(name, message.to_owned());
        }
    }

    /// Records `message` for `name` if `condition` holds.
    pub fn expect_false(&mut self, name: &str, condition: bool, message: &str) {
        self.expect_true(name, !condition, message);
    }

    /// Records a validation error, keeping the first error of each field.
    pub fn add_error(&mut self, name: &str, message: String) {
        self.errors.entry(name.to_owned()).or_insert(message);
    }
}
