//! 플러그인 설정 스키마 검증 모듈
//!
//! - `validate_config`: Definition의 ConfigSchema 기준으로 설정 오브젝트 전체를 검증합니다.
//!   첫 번째 위반에서 즉시 실패하며, 스키마에 없는 키는 허용합니다 (변환 없음).
//! - `validate_field_value`: 단일 필드 검증 (하위 필드 재귀 포함).
//! - `with_defaults`: 선언된 기본값을 채운 실효 설정을 만듭니다.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::plugin::{ConfigField, FieldType};

/// 설정 필드 검증 에러
#[derive(thiserror::Error, Debug, Clone, PartialEq, Serialize)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// 점으로 구분된 필드 경로 (예: "webhook.url")
    pub field: String,
    pub message: String,
    pub error_type: ValidationErrorType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorType {
    Required,
    TypeMismatch,
    InvalidOption,
    /// 요청이 가리키는 서버가 디렉터리에 없음
    UnknownServer,
}

/// 전체 설정 검증
pub fn validate_config(
    schema: &[ConfigField],
    config: &Map<String, Value>,
) -> Result<(), ValidationError> {
    validate_fields(schema, config, None)
}

fn validate_fields(
    fields: &[ConfigField],
    config: &Map<String, Value>,
    parent: Option<&str>,
) -> Result<(), ValidationError> {
    for field in fields {
        let path = match parent {
            Some(p) => format!("{}.{}", p, field.name),
            None => field.name.clone(),
        };
        validate_field_value(field, config.get(&field.name), &path)?;
    }
    Ok(())
}

/// 단일 필드 값 검증.
///
/// # Arguments
/// * `field` - 스키마 필드
/// * `value` - 사용자가 입력한 값 (없으면 None)
/// * `path` - 에러 메시지에 사용할 필드 경로
pub fn validate_field_value(
    field: &ConfigField,
    value: Option<&Value>,
    path: &str,
) -> Result<(), ValidationError> {
    // 1. 필수 필드 검사 (기본값이 있으면 통과)
    let value = match value {
        None | Some(Value::Null) => {
            if field.required && field.default.is_none() {
                return Err(ValidationError {
                    field: path.to_string(),
                    message: format!("Required field '{}' is missing", path),
                    error_type: ValidationErrorType::Required,
                });
            }
            return Ok(());
        }
        Some(v) => v,
    };

    // 2. 타입 검사
    if !field.field_type.matches(value) {
        return Err(ValidationError {
            field: path.to_string(),
            message: format!("'{}' must be a {}, got: {}", path, field.field_type, value),
            error_type: ValidationErrorType::TypeMismatch,
        });
    }

    // 3. 옵션 목록
    if !field.options.is_empty() && !field.options.contains(value) {
        let options: Vec<String> = field.options.iter().map(|o| o.to_string()).collect();
        return Err(ValidationError {
            field: path.to_string(),
            message: format!(
                "'{}' value {} is not a valid option. Valid options: [{}]",
                path,
                value,
                options.join(", ")
            ),
            error_type: ValidationErrorType::InvalidOption,
        });
    }

    // 4. 하위 필드
    if field.field_type == FieldType::Object && !field.fields.is_empty() {
        if let Value::Object(nested) = value {
            validate_fields(&field.fields, nested, Some(path))?;
        }
    }

    Ok(())
}

/// 기본값을 채운 실효 설정. 원본은 그대로 둔다.
pub fn with_defaults(schema: &[ConfigField], config: &Map<String, Value>) -> Map<String, Value> {
    let mut effective = config.clone();
    for field in schema {
        let absent = matches!(effective.get(&field.name), None | Some(Value::Null));
        if absent {
            if let Some(default) = &field.default {
                effective.insert(field.name.clone(), default.clone());
            }
        }

        if field.field_type == FieldType::Object && !field.fields.is_empty() {
            if let Some(Value::Object(nested)) = effective.get(&field.name) {
                let filled = with_defaults(&field.fields, nested);
                effective.insert(field.name.clone(), Value::Object(filled));
            }
        }
    }
    effective
}
