//! # Dynamic Message Codec
//!
//! Converts between the textual representations accepted on the command line (JSON following
//! the Protobuf JSON mapping, or the Protobuf text format) and [`DynamicMessage`] instances.
//!
//! No generated types are involved: every message is built from its [`MessageDescriptor`]
//! at runtime.
use prost_reflect::{
    DeserializeOptions, DynamicMessage, FieldDescriptor, Kind, MessageDescriptor, ReflectMessage,
    SerializeOptions, Value, text_format::FormatOptions,
};
use std::{fmt, str::FromStr};

/// Separates consecutive text format messages in a single payload.
pub const RECORD_SEPARATOR: u8 = 0x1E;

/// Textual representation of messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Format {
    #[default]
    Json,
    Text,
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Format::Json),
            "text" => Ok(Format::Text),
            other => Err(format!(
                "unknown format '{other}', expected 'json' or 'text'"
            )),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::Json => f.write_str("json"),
            Format::Text => f.write_str("text"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeOptions {
    /// Ignore JSON keys that do not name a field instead of failing.
    pub allow_unknown_fields: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EncodeOptions {
    /// Indented output. JSON is printed with one key per line, keys sorted.
    pub multiline: bool,
    /// Print fields holding their default value. Only affects JSON.
    pub emit_defaults: bool,
}

/// A payload that does not match the message schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", describe(.path, .message))]
pub struct DecodeError {
    /// Path of the offending field, like `items[1].name`. Empty when it is the whole message.
    pub path: String,
    pub message: String,
}

fn describe(path: &str, message: &str) -> String {
    if path.is_empty() {
        message.to_string()
    } else {
        format!("field '{path}': {message}")
    }
}

impl DecodeError {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }

    fn root(message: impl fmt::Display) -> Self {
        Self::new(String::new(), message.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("Failed to encode message as JSON: '{0}'")]
    Json(#[from] serde_json::Error),
}

/// Creates an empty instance of the message.
pub fn new_instance(desc: &MessageDescriptor) -> DynamicMessage {
    DynamicMessage::new(desc.clone())
}

/// Populates `instance` from a payload holding a single message.
///
/// An empty or whitespace-only payload leaves the instance untouched.
pub fn decode(
    bytes: &[u8],
    format: Format,
    instance: &mut DynamicMessage,
    options: &DecodeOptions,
) -> Result<(), DecodeError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(());
    }

    match format {
        Format::Json => {
            let value: serde_json::Value =
                serde_json::from_slice(bytes).map_err(DecodeError::root)?;
            decode_json(value, instance, options)
        }
        Format::Text => decode_text(utf8(bytes)?, instance),
    }
}

/// Decodes every message of a payload, in order.
///
/// JSON messages are simply concatenated (whitespace between them is allowed). Text format
/// messages are separated by [`RECORD_SEPARATOR`]; a blank record, including one after a
/// trailing separator, is an empty message. An empty payload yields no messages.
pub fn decode_all(
    bytes: &[u8],
    format: Format,
    desc: &MessageDescriptor,
    options: &DecodeOptions,
) -> Result<Vec<DynamicMessage>, DecodeError> {
    match format {
        Format::Json => serde_json::Deserializer::from_slice(bytes)
            .into_iter::<serde_json::Value>()
            .map(|value| {
                let value = value.map_err(DecodeError::root)?;
                let mut instance = new_instance(desc);
                decode_json(value, &mut instance, options)?;
                Ok(instance)
            })
            .collect(),
        Format::Text if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Vec::new()),
        Format::Text => utf8(bytes)?
            .split(char::from(RECORD_SEPARATOR))
            .map(|record| {
                let mut instance = new_instance(desc);
                decode_text(record, &mut instance)?;
                Ok(instance)
            })
            .collect(),
    }
}

/// Checks that every set field holds a value of its declared kind and cardinality,
/// recursing into nested messages, lists and maps.
pub fn validate(message: &DynamicMessage) -> bool {
    message
        .fields()
        .all(|(field, value)| value.is_valid_for_field(&field) && validate_value(value))
}

fn validate_value(value: &Value) -> bool {
    match value {
        Value::Message(message) => validate(message),
        Value::List(items) => items.iter().all(validate_value),
        Value::Map(entries) => entries.values().all(validate_value),
        _ => true,
    }
}

/// Renders a message in the requested format.
pub fn encode(
    message: &DynamicMessage,
    format: Format,
    options: &EncodeOptions,
) -> Result<Vec<u8>, EncodeError> {
    match format {
        Format::Json => {
            let serialize_options =
                SerializeOptions::new().skip_default_fields(!options.emit_defaults);
            let value = message
                .serialize_with_options(serde_json::value::Serializer, &serialize_options)?;

            if options.multiline {
                Ok(serde_json::to_vec_pretty(&value)?)
            } else {
                Ok(serde_json::to_vec(&value)?)
            }
        }
        Format::Text => {
            let format_options = FormatOptions::new().pretty(options.multiline);
            Ok(message
                .to_text_format_with_options(&format_options)
                .into_bytes())
        }
    }
}

/// Decodes a response received from the wire.
pub fn decode_response(
    desc: &MessageDescriptor,
    bytes: &[u8],
) -> Result<DynamicMessage, prost::DecodeError> {
    DynamicMessage::decode(desc.clone(), bytes)
}

fn utf8(bytes: &[u8]) -> Result<&str, DecodeError> {
    std::str::from_utf8(bytes).map_err(DecodeError::root)
}

fn decode_json(
    value: serde_json::Value,
    instance: &mut DynamicMessage,
    options: &DecodeOptions,
) -> Result<(), DecodeError> {
    let desc = instance.descriptor();

    // serde errors carry no field path, so look for the offending field first.
    if let Some(err) = locate_json_error(&desc, &value, "", options) {
        return Err(err);
    }

    let deserialize_options =
        DeserializeOptions::new().deny_unknown_fields(!options.allow_unknown_fields);
    let decoded = DynamicMessage::deserialize_with_options(desc, value, &deserialize_options)
        .map_err(DecodeError::root)?;

    merge_fields(instance, &decoded)
}

fn decode_text(text: &str, instance: &mut DynamicMessage) -> Result<(), DecodeError> {
    let decoded = DynamicMessage::parse_text_format(instance.descriptor(), text)
        .map_err(DecodeError::root)?;
    merge_fields(instance, &decoded)
}

fn merge_fields(instance: &mut DynamicMessage, decoded: &DynamicMessage) -> Result<(), DecodeError> {
    for (field, value) in decoded.fields() {
        instance
            .try_set_field(&field, value.clone())
            .map_err(|err| DecodeError::new(field.name(), err.to_string()))?;
    }
    Ok(())
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}.{name}")
    }
}

fn locate_json_error(
    desc: &MessageDescriptor,
    value: &serde_json::Value,
    path: &str,
    options: &DecodeOptions,
) -> Option<DecodeError> {
    // Well-known types have their own JSON mappings.
    if desc.full_name().starts_with("google.protobuf.") {
        return None;
    }

    let Some(object) = value.as_object() else {
        return Some(DecodeError::new(
            path,
            format!("expected an object for message '{}'", desc.full_name()),
        ));
    };

    for (key, value) in object {
        // Extension fields, like `[pkg.ext]`.
        if key.starts_with('[') {
            continue;
        }

        let Some(field) = desc
            .get_field_by_json_name(key)
            .or_else(|| desc.get_field_by_name(key))
        else {
            if options.allow_unknown_fields {
                continue;
            }
            return Some(DecodeError::new(
                join(path, key),
                format!("unknown field in message '{}'", desc.full_name()),
            ));
        };

        let field_path = join(path, field.name());
        if let Some(err) = locate_field_error(&field, value, &field_path, options) {
            return Some(err);
        }
    }

    None
}

fn locate_field_error(
    field: &FieldDescriptor,
    value: &serde_json::Value,
    path: &str,
    options: &DecodeOptions,
) -> Option<DecodeError> {
    if value.is_null() {
        return None;
    }

    if field.is_map() {
        let Some(entries) = value.as_object() else {
            return Some(DecodeError::new(path, "expected an object for map field"));
        };
        let Kind::Message(entry) = field.kind() else {
            return None;
        };
        let value_field = entry.map_entry_value_field();
        return entries.iter().find_map(|(key, value)| {
            locate_value_error(&value_field.kind(), value, &format!("{path}[{key}]"), options)
        });
    }

    if field.is_list() {
        let Some(items) = value.as_array() else {
            return Some(DecodeError::new(path, "expected an array for repeated field"));
        };
        return items.iter().enumerate().find_map(|(index, value)| {
            locate_value_error(&field.kind(), value, &format!("{path}[{index}]"), options)
        });
    }

    locate_value_error(&field.kind(), value, path, options)
}

fn locate_value_error(
    kind: &Kind,
    value: &serde_json::Value,
    path: &str,
    options: &DecodeOptions,
) -> Option<DecodeError> {
    use serde_json::Value as Json;

    let expected = match (kind, value) {
        (_, Json::Null) => return None,
        (Kind::Message(desc), value) => return locate_json_error(desc, value, path, options),
        (Kind::Enum(_), Json::String(_) | Json::Number(_)) => return None,
        (Kind::Enum(desc), _) => format!("enum '{}'", desc.full_name()),
        (Kind::String, Json::String(_)) | (Kind::Bytes, Json::String(_)) => return None,
        (Kind::String, _) => "a string".to_string(),
        (Kind::Bytes, _) => "a base64 string".to_string(),
        (Kind::Bool, Json::Bool(_)) => return None,
        (Kind::Bool, _) => "a boolean".to_string(),
        // Numbers may also be written as strings, like "12" or "NaN".
        (_, Json::Number(_) | Json::String(_)) => return None,
        (_, _) => "a number".to_string(),
    };

    Some(DecodeError::new(
        path,
        format!("expected {expected}, found {}", json_kind(value)),
    ))
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parser::{SchemaFile, SchemaParser};

    const ORDERS_PROTO: &str = r#"
        syntax = "proto3";
        package shop;

        enum State {
            STATE_UNKNOWN = 0;
            STATE_READY = 1;
        }

        message Item {
            string name = 1;
            int32 count = 2;
        }

        message Order {
            string id = 1;
            repeated Item items = 2;
            map<string, Item> by_name = 3;
            State state = 4;
        }
    "#;

    fn message(name: &str) -> MessageDescriptor {
        let parsed = SchemaParser::new()
            .parse(vec![SchemaFile::new("orders.proto", ORDERS_PROTO)])
            .unwrap();
        parsed.files[0].parent_pool().get_message_by_name(name).unwrap()
    }

    fn decode_json_str(desc: &MessageDescriptor, json: &str) -> Result<DynamicMessage, DecodeError> {
        let mut instance = new_instance(desc);
        decode(json.as_bytes(), Format::Json, &mut instance, &DecodeOptions::default())?;
        Ok(instance)
    }

    #[test]
    fn test_blank_payload_is_zero_instance() {
        let desc = message("shop.Order");
        let instance = decode_json_str(&desc, " \n\t").unwrap();

        assert_eq!(instance, new_instance(&desc));
        assert!(validate(&instance));
    }

    #[test]
    fn test_rejects_unknown_field() {
        let desc = message("shop.Item");
        let err = decode_json_str(&desc, r#"{"unknown_field": 1}"#).unwrap_err();

        assert_eq!(err.path, "unknown_field");
        assert!(err.to_string().contains("unknown_field"));
    }

    #[test]
    fn test_allows_unknown_field_when_asked() {
        let desc = message("shop.Item");
        let mut instance = new_instance(&desc);
        let options = DecodeOptions {
            allow_unknown_fields: true,
        };

        decode(
            br#"{"name": "bolt", "unknown_field": 1}"#,
            Format::Json,
            &mut instance,
            &options,
        )
        .unwrap();

        assert_eq!(
            instance.get_field_by_name("name").unwrap().as_str(),
            Some("bolt")
        );
    }

    #[test]
    fn test_error_path_in_list() {
        let desc = message("shop.Order");
        let err =
            decode_json_str(&desc, r#"{"items": [{"name": "a"}, {"name": 5}]}"#).unwrap_err();

        assert_eq!(err.path, "items[1].name");
    }

    #[test]
    fn test_error_path_in_map() {
        let desc = message("shop.Order");
        let err = decode_json_str(&desc, r#"{"byName": {"x": {"name": true}}}"#).unwrap_err();

        assert_eq!(err.path, "by_name[x].name");
    }

    #[test]
    fn test_syntax_error_has_no_path() {
        let desc = message("shop.Item");
        let err = decode_json_str(&desc, r#"{"name": "#).unwrap_err();

        assert!(err.path.is_empty());
    }

    #[test]
    fn test_decode_all_concatenated_json() {
        let desc = message("shop.Item");
        let messages = decode_all(
            br#"{"name": "a"} {"name": "b"}
            {"name": "c"}"#,
            Format::Json,
            &desc,
            &DecodeOptions::default(),
        )
        .unwrap();

        let names: Vec<_> = messages
            .iter()
            .map(|m| m.get_field_by_name("name").unwrap().as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn test_decode_all_text_records() {
        let desc = message("shop.Item");
        let payload = b"name: \"a\" count: 1\x1ename: \"b\"";
        let messages = decode_all(payload, Format::Text, &desc, &DecodeOptions::default()).unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(
            messages[0].get_field_by_name("count").unwrap().as_i32(),
            Some(1)
        );
    }

    #[test]
    fn test_blank_text_records_are_empty_messages() {
        let desc = message("shop.Item");
        let options = DecodeOptions::default();

        let trailing = decode_all(b"name: \"a\"\x1e", Format::Text, &desc, &options).unwrap();
        assert_eq!(trailing.len(), 2);
        assert_eq!(trailing[1], new_instance(&desc));

        let between = decode_all(b"name: \"a\"\x1e\x1ename: \"b\"", Format::Text, &desc, &options)
            .unwrap();
        assert_eq!(between.len(), 3);
        assert_eq!(between[1], new_instance(&desc));

        let blank = decode_all(b" \n", Format::Text, &desc, &options).unwrap();
        assert!(blank.is_empty());
    }

    #[test]
    fn test_decode_all_empty_payload() {
        let desc = message("shop.Item");
        let messages = decode_all(b"", Format::Json, &desc, &DecodeOptions::default()).unwrap();

        assert!(messages.is_empty());
    }

    #[test]
    fn test_multiline_json_is_sorted_and_indented() {
        let desc = message("shop.Item");
        let instance = decode_json_str(&desc, r#"{"name": "bolt", "count": 2}"#).unwrap();
        let options = EncodeOptions {
            multiline: true,
            emit_defaults: false,
        };

        let output = encode(&instance, Format::Json, &options).unwrap();
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "{\n  \"count\": 2,\n  \"name\": \"bolt\"\n}"
        );
    }

    #[test]
    fn test_emit_defaults() {
        let desc = message("shop.Item");
        let instance = new_instance(&desc);

        let compact = encode(&instance, Format::Json, &EncodeOptions::default()).unwrap();
        assert_eq!(compact, b"{}");

        let options = EncodeOptions {
            multiline: false,
            emit_defaults: true,
        };
        let full = encode(&instance, Format::Json, &options).unwrap();
        assert_eq!(full, br#"{"count":0,"name":""}"#);
    }

    #[test]
    fn test_json_round_trip() {
        let desc = message("shop.Order");
        let original = decode_json_str(
            &desc,
            r#"{"id": "o-1", "items": [{"name": "a", "count": 3}], "byName": {"a": {"count": 3}}, "state": "STATE_READY"}"#,
        )
        .unwrap();

        let encoded = encode(&original, Format::Json, &EncodeOptions::default()).unwrap();
        let decoded = decode_json_str(&desc, std::str::from_utf8(&encoded).unwrap()).unwrap();

        assert_eq!(decoded, original);
        assert!(validate(&decoded));
    }

    #[test]
    fn test_text_format() {
        let desc = message("shop.Order");
        let mut instance = new_instance(&desc);
        decode(
            br#"id: "o-2" items { name: "nut" }"#,
            Format::Text,
            &mut instance,
            &DecodeOptions::default(),
        )
        .unwrap();

        assert_eq!(instance.get_field_by_name("id").unwrap().as_str(), Some("o-2"));

        let text = encode(&instance, Format::Text, &EncodeOptions::default()).unwrap();
        let text = String::from_utf8(text).unwrap();
        assert!(text.contains("nut"));
    }

    #[test]
    fn test_decode_response_rejects_garbage() {
        let desc = message("shop.Item");

        assert!(decode_response(&desc, &[0x0a, 0x05, b'a']).is_err());
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("json".parse::<Format>().unwrap(), Format::Json);
        assert_eq!("text".parse::<Format>().unwrap(), Format::Text);
        assert!("yaml".parse::<Format>().is_err());
    }
}
