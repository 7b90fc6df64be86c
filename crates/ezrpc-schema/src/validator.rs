use jsonschema::Validator;
use serde_json::Value;

use crate::error::{Result, SchemaError};

/// Run `validator` over `params`, folding the first few errors into one message.
pub(crate) fn validate_params(method: &str, params: &Value, validator: &Validator) -> Result<()> {
    let mut errors = validator.iter_errors(params);
    if let Some(first) = errors.next() {
        let mut message = first.to_string();
        for err in errors.take(3) {
            message.push_str("; ");
            message.push_str(&err.to_string());
        }
        return Err(SchemaError::ValidationFailed {
            method: method.to_string(),
            message,
        });
    }

    Ok(())
}
