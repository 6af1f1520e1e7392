//! Per-request parameters and headers staged ahead of a send.

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::Method;
use serde_json::Value;

use super::{Body, RequestOptions};
use crate::error::{http_error, Error, HttpErrorKind};

/// Values staged for a single request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Staged {
    pub params: Vec<(String, Value)>,
    pub headers: Vec<(String, String)>,
}

impl Staged {
    pub fn is_empty(&self) -> bool {
        self.params.is_empty() && self.headers.is_empty()
    }

    /// Stage a parameter, replacing one staged under the same name.
    pub fn param(&mut self, name: &str, value: Value) {
        self.params.retain(|(existing, _)| existing != name);
        self.params.push((name.to_string(), value));
    }

    /// Stage a header, replacing one staged under the same name in any case.
    pub fn header(&mut self, name: &str, value: &str) {
        self.headers
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
    }

    /// Merge into `options`; values already present on the request win.
    ///
    /// Parameters go to the query string for `GET`, `HEAD` and `DELETE`, into
    /// the object of a JSON body, and into the form otherwise.
    pub fn apply(self, method: &Method, options: &mut RequestOptions) {
        for (name, value) in self.headers {
            if !options.has_header(&name) {
                options.headers.push((name, value));
            }
        }

        if self.params.is_empty() {
            return;
        }

        let in_query = matches!(*method, Method::GET | Method::HEAD | Method::DELETE);
        if in_query {
            merge_pairs(&mut options.query, self.params);
            return;
        }

        match &mut options.body {
            Body::Json(Value::Object(object)) => {
                for (name, value) in self.params {
                    object.entry(name).or_insert(value);
                }
            }
            Body::Form(fields) => merge_pairs(fields, self.params),
            Body::Empty => {
                let mut fields = Vec::new();
                merge_pairs(&mut fields, self.params);
                options.body = Body::Form(fields);
            }
            Body::Json(_) | Body::Raw { .. } => merge_pairs(&mut options.query, self.params),
        }
    }
}

fn merge_pairs(target: &mut Vec<(String, String)>, params: Vec<(String, Value)>) {
    for (name, value) in params {
        if target.iter().all(|(existing, _)| existing != &name) {
            target.push((name, value_to_string(value)));
        }
    }
}

fn value_to_string(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

/// Named values that requests can pull in with `with_preset`.
#[derive(Debug, Clone, Default)]
pub struct Presets {
    defined: Arc<HashMap<String, String>>,
}

impl Presets {
    pub fn new(defined: HashMap<String, String>) -> Self {
        Self {
            defined: Arc::new(defined),
        }
    }

    pub fn defined(&self, name: &str) -> Option<&str> {
        self.defined.get(name).map(String::as_str)
    }

    /// Stage the preset `name` on `staged`, sent as `alias` when given.
    pub fn stage_into(
        &self,
        staged: &mut Staged,
        name: &str,
        alias: Option<&str>,
    ) -> Result<(), Error> {
        let value = self.defined(name).ok_or_else(|| {
            http_error(
                HttpErrorKind::InvalidPreset,
                &format!("No preset value named \"{}\"", name),
            )
        })?;
        staged.param(alias.unwrap_or(name), Value::String(value.to_string()));
        Ok(())
    }
}
