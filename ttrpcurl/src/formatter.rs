use colored::*;
use std::fmt::Display;
use ttrpcurl_core::{client::CallError, codec::Format, schema::SchemaError, tonic::Code};

/// A wrapper struct for a formatted, colored string.
///
/// Implements `Display` so it can be printed directly.
pub struct FormattedString(pub String);

pub struct ServiceList(pub Vec<String>);

pub struct GenericError<T: Display>(pub &'static str, pub T);

/// A non-OK status rendered as a `{code, message}` message of the call format.
pub struct StatusReport<'a> {
    pub format: Format,
    pub code: Code,
    pub message: &'a str,
}

impl std::fmt::Display for FormattedString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f)?;
        writeln!(f, "{}", self.0)?;
        Ok(())
    }
}

impl From<&CallError> for FormattedString {
    fn from(err: &CallError) -> Self {
        match err {
            CallError::Remote { code, message } => FormattedString(format!(
                "{} code={:?} message={:?}",
                "ttrpc Failed:".red().bold(),
                code,
                message
            )),
            CallError::Dial(err) => {
                FormattedString(format!("{}\n\n'{}'", "Connection Error:".red().bold(), err))
            }
            CallError::Canceled(reason) => {
                FormattedString(format!("{} {}", "Call Stopped:".yellow().bold(), reason))
            }
            err => FormattedString(format!("{}\n\n'{}'", "Call Failed:".red().bold(), err)),
        }
    }
}

impl From<SchemaError> for FormattedString {
    fn from(err: SchemaError) -> Self {
        FormattedString(format!(
            "{}\n\n'{}'",
            "Failed to load proto files:".red().bold(),
            err
        ))
    }
}

impl From<std::io::Error> for FormattedString {
    fn from(err: std::io::Error) -> Self {
        FormattedString(format!(
            "{}\n\n'{}'",
            "Failed to read request data:".red().bold(),
            err
        ))
    }
}

impl<T: Display> From<GenericError<T>> for FormattedString {
    fn from(GenericError(msg, err): GenericError<T>) -> Self {
        FormattedString(format!("{}:\n\n'{}'", msg.red().bold(), err))
    }
}

impl From<ServiceList> for FormattedString {
    fn from(ServiceList(services): ServiceList) -> Self {
        if services.is_empty() {
            return FormattedString("No services found.".yellow().to_string());
        }
        FormattedString(services.join("\n"))
    }
}

impl From<StatusReport<'_>> for FormattedString {
    fn from(status: StatusReport<'_>) -> Self {
        let code = status.code as i32;
        match status.format {
            Format::Json => FormattedString(format!(
                "{:#}",
                serde_json::json!({ "code": code, "message": status.message })
            )),
            Format::Text => {
                FormattedString(format!("code: {code}\nmessage: {:?}", status.message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_report_json() {
        let report = FormattedString::from(StatusReport {
            format: Format::Json,
            code: Code::NotFound,
            message: "no such item",
        });

        assert_eq!(report.0, "{\n  \"code\": 5,\n  \"message\": \"no such item\"\n}");
    }

    #[test]
    fn test_status_report_text() {
        let report = FormattedString::from(StatusReport {
            format: Format::Text,
            code: Code::Unavailable,
            message: "try \"later\"",
        });

        assert_eq!(report.0, "code: 14\nmessage: \"try \\\"later\\\"\"");
    }
}
