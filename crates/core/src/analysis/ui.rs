//! Form-field suggestions for function parameters

use super::{
    ast::{FunctionDefinition, Parameter},
    parser::is_elementary_type,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    Checkbox,
    Textarea,
}

/// Suggested input control for one parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiField {
    pub name: String,
    pub solidity_type: String,
    pub field_type: FieldType,
    /// Regular expression the raw input must match
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<String>,
    pub placeholder: String,
}

/// Maps a parameter's type to a field suggestion; unnamed parameters become `arg<index>`
pub fn infer_ui_field(parameter: &Parameter, index: usize) -> UiField {
    let name = parameter
        .name
        .clone()
        .unwrap_or_else(|| format!("arg{index}"));
    let ty = parameter.type_name.as_str();

    let (field_type, validation, placeholder) = if let Some(element) = ty
        .strip_suffix(']')
        .and_then(|rest| rest.rfind('[').map(|open| &rest[..open]))
    {
        (
            FieldType::Textarea,
            None,
            format!("One {element} value per line"),
        )
    } else if ty == "address" || ty == "address payable" {
        (
            FieldType::Text,
            Some(r"^0x[a-fA-F0-9]{40}$".to_string()),
            "0x0000000000000000000000000000000000000000".to_string(),
        )
    } else if ty.starts_with("uint") && is_elementary_type(ty) {
        (FieldType::Number, Some(r"^\d+$".to_string()), "0".to_string())
    } else if ty.starts_with("int") && is_elementary_type(ty) {
        (FieldType::Number, Some(r"^-?\d+$".to_string()), "0".to_string())
    } else if ty == "bool" {
        (FieldType::Checkbox, None, String::new())
    } else if ty == "string" {
        (FieldType::Text, None, "Enter text".to_string())
    } else if ty == "bytes" {
        (
            FieldType::Text,
            Some(r"^0x([a-fA-F0-9]{2})*$".to_string()),
            "0x".to_string(),
        )
    } else if let Some(size) = ty
        .strip_prefix("bytes")
        .and_then(|n| n.parse::<usize>().ok())
    {
        (
            FieldType::Text,
            Some(format!("^0x[a-fA-F0-9]{{{}}}$", size * 2)),
            format!("0x{}", "00".repeat(size)),
        )
    } else {
        (FieldType::Text, None, ty.to_string())
    };

    UiField {
        name,
        solidity_type: parameter.type_name.clone(),
        field_type,
        validation,
        placeholder,
    }
}

pub fn infer_ui_fields(function: &FunctionDefinition) -> Vec<UiField> {
    function
        .parameters
        .iter()
        .enumerate()
        .map(|(index, parameter)| infer_ui_field(parameter, index))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(type_name: &str) -> UiField {
        infer_ui_field(
            &Parameter {
                type_name: type_name.to_string(),
                name: Some("input".to_string()),
                location: None,
            },
            0,
        )
    }

    #[test]
    fn test_elementary_types() {
        let address = field("address");
        assert_eq!(address.field_type, FieldType::Text);
        assert_eq!(address.validation.as_deref(), Some(r"^0x[a-fA-F0-9]{40}$"));

        assert_eq!(field("uint256").field_type, FieldType::Number);
        assert_eq!(field("uint256").validation.as_deref(), Some(r"^\d+$"));
        assert_eq!(field("int8").validation.as_deref(), Some(r"^-?\d+$"));
        assert_eq!(field("bool").field_type, FieldType::Checkbox);
        assert_eq!(field("string").validation, None);
        assert_eq!(
            field("bytes4").validation.as_deref(),
            Some("^0x[a-fA-F0-9]{8}$")
        );
    }

    #[test]
    fn test_arrays_use_textarea() {
        let list = field("address[]");
        assert_eq!(list.field_type, FieldType::Textarea);
        assert_eq!(list.placeholder, "One address value per line");
        assert_eq!(field("uint256[3]").field_type, FieldType::Textarea);
    }

    #[test]
    fn test_unnamed_parameters() {
        let unnamed = infer_ui_field(
            &Parameter {
                type_name: "Order".to_string(),
                name: None,
                location: Some("memory".to_string()),
            },
            2,
        );
        assert_eq!(unnamed.name, "arg2");
        assert_eq!(unnamed.field_type, FieldType::Text);
        assert_eq!(unnamed.placeholder, "Order");
    }
}
