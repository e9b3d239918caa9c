use search_provider::errors::{BackendError, ParseError, ParseErrorKind, ProviderError, SessionError};

#[test]
fn session_errors_name_their_phase() {
    let e = SessionError::InitialRetrieval(BackendError::Query("no table".into()));
    assert_eq!(e.to_string(), "Error while retrieving initial value: query failed: no table");
    let e = SessionError::ChangeNotification(BackendError::Feed("closed".into()));
    assert_eq!(e.to_string(), "Error while receiving change notification: change feed failed: closed");
}

#[test]
fn provider_errors_wrap_their_sources() {
    let parse = ParseError::new("x", ParseErrorKind::MissingSeparator);
    let e: ProviderError = parse.clone().into();
    assert_eq!(e.to_string(), parse.to_string());

    let e: ProviderError = BackendError::Unavailable("db".into()).into();
    assert!(matches!(e, ProviderError::Backend(BackendError::Unavailable(_))));

    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
    let e: ProviderError = io.into();
    assert!(e.to_string().starts_with("I/O error"));
}

#[test]
fn parse_error_kinds_render_their_parameter() {
    assert_eq!(ParseErrorKind::InvalidParameter("limit").to_string(), "Invalid parameter \"limit\"");
    assert_eq!(ParseErrorKind::MalformedCondition(3).to_string(), "Malformed condition at index 3");
    assert_eq!(ParseErrorKind::UnknownOperator("like".into()).to_string(), "Unknown operator like");
}

#[test]
fn shell_command_errors_have_their_own_prefix() {
    let e = ProviderError::Command("unrecognized: frobnicate".into());
    assert_eq!(e.to_string(), "Command error: unrecognized: frobnicate");
}
