use crate::interceptor::Returnable;
use crate::interceptor::response::{FieldMeta, FieldRule};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Standard response envelope
///
/// Carries the payload together with the flags the built-in interceptors
/// maintain: whether the value came from cache, and the display metadata of
/// its visible fields.
///
/// # Example
/// ```
/// use callweave::common::ApiResponse;
///
/// let found: ApiResponse<String> = ApiResponse::ok("Ann".to_string());
/// assert!(found.success);
///
/// let missing: ApiResponse<String> = ApiResponse::error("not_found", "User not found");
/// assert!(missing.data.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,

    pub success: bool,

    #[serde(default)]
    pub from_cache: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldMeta>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl<T> ApiResponse<T> {
    /// Create a successful response with data
    pub fn ok(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
            success: true,
            from_cache: false,
            fields: Vec::new(),
        }
    }

    /// Create an error response
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            data: None,
            error: Some(ApiError {
                code: code.into(),
                message: message.into(),
            }),
            success: false,
            from_cache: false,
            fields: Vec::new(),
        }
    }
}

impl<T: Returnable> Returnable for ApiResponse<T> {
    fn succeeded(&self) -> Option<bool> {
        Some(self.success)
    }

    fn mark_from_cache(&mut self) {
        self.from_cache = true;
    }

    fn take_metadata(&mut self) -> Option<Value> {
        if self.fields.is_empty() {
            return None;
        }
        serde_json::to_value(std::mem::take(&mut self.fields)).ok()
    }

    fn restore_metadata(&mut self, metadata: Value) {
        match serde_json::from_value(metadata) {
            Ok(fields) => self.fields = fields,
            Err(e) => tracing::warn!("Discarding unreadable response metadata: {}", e),
        }
    }

    fn field_rules() -> Vec<FieldRule> {
        T::field_rules()
    }

    fn field_defaults() -> Option<Value> {
        T::field_defaults()
    }

    fn shape_root(value: &mut Value) -> Option<&mut Value> {
        value
            .get_mut("data")
            .filter(|data| !data.is_null())
            .and_then(T::shape_root)
    }

    fn attach_fields(&mut self, fields: Vec<FieldMeta>) {
        self.fields = fields;
    }
}
