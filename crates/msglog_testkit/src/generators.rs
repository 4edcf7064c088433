//! Property-based test generators using proptest.

use msglog_format::Arg;
use msglog_protocol::{ComponentRegistration, Priority};
use proptest::prelude::*;

/// Strategy for generating priorities.
pub fn priority_strategy() -> impl Strategy<Value = Priority> {
    prop::sample::select(Priority::ALL.to_vec())
}

/// Strategy for generating component names such as `cellapp`.
pub fn component_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]{2,8}(app)?").expect("Invalid regex")
}

/// Strategy for generating component registrations.
pub fn registration_strategy() -> impl Strategy<Value = ComponentRegistration> {
    (component_name_strategy(), 1u16..60_000, 1u32..4_000_000)
        .prop_map(|(name, uid, pid)| ComponentRegistration::new(name, uid, pid))
}

/// One piece of a generated message.
#[derive(Debug, Clone)]
enum Piece {
    Text(String),
    Signed(i32),
    Unsigned(u32),
    Str(String),
}

/// Strategy for generating log calls: a format string, its arguments,
/// and the text `printf` would produce.
pub fn message_strategy() -> impl Strategy<Value = (String, Vec<Arg>, String)> {
    let piece = prop_oneof![
        "[a-zA-Z ,.:=]{1,12}".prop_map(Piece::Text),
        any::<i32>().prop_map(Piece::Signed),
        any::<u32>().prop_map(Piece::Unsigned),
        "[a-zA-Z0-9_]{0,16}".prop_map(Piece::Str),
    ];
    prop::collection::vec(piece, 1..8).prop_map(|pieces| {
        let mut format = String::new();
        let mut args = Vec::new();
        let mut expected = String::new();
        for piece in pieces {
            match piece {
                Piece::Text(text) => {
                    format.push_str(&text);
                    expected.push_str(&text);
                }
                Piece::Signed(v) => {
                    format.push_str("%d");
                    args.push(Arg::from(v));
                    expected.push_str(&v.to_string());
                }
                Piece::Unsigned(v) => {
                    format.push_str("%u");
                    args.push(Arg::from(v));
                    expected.push_str(&v.to_string());
                }
                Piece::Str(s) => {
                    format.push_str("%s");
                    expected.push_str(&s);
                    args.push(Arg::from(s));
                }
            }
        }
        (format, args, expected)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use msglog_format::FormatString;

    proptest! {
        #[test]
        fn test_component_names_are_lowercase(name in component_name_strategy()) {
            prop_assert!(name.len() >= 2);
            prop_assert!(name.chars().all(|c| c.is_ascii_lowercase()));
        }

        #[test]
        fn test_generated_messages_are_consistent((format, args, expected) in message_strategy()) {
            let parsed = FormatString::parse(&format).unwrap();
            prop_assert_eq!(parsed.arity(), args.len());
            let stream = parsed.stream_args(&args).unwrap();
            prop_assert_eq!(parsed.interpolate_to_string(&stream).unwrap(), expected);
        }
    }
}
