//! Persistent domain records shared by the store and the HTTP layer.
//!
//! Identifiers are SQLite row ids (`i64`). Every record that belongs to a
//! tenant carries `organisation_id` either directly or through its owner.

/// Declares a closed, string-backed enum with `as_str`, `Display` and `FromStr`.
///
/// The string form is what is written to the database and sent over the wire.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::error::ParseEnumError;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err($crate::error::ParseEnumError {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

/// Row offset of a 1-based page. Saturates instead of overflowing on absurd page numbers.
pub fn page_offset(page: u32, per_page: u32) -> i64 {
    i64::from(page.saturating_sub(1)).saturating_mul(i64::from(per_page))
}

pub mod audit;
pub mod chat;
pub mod leave;
pub mod meeting;
pub mod notification;
pub mod task;
pub mod user;

pub use audit::*;
pub use chat::*;
pub use leave::*;
pub use meeting::*;
pub use notification::*;
pub use task::*;
pub use user::*;

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn page_offset_saturates() {
        assert_eq!(page_offset(0, 20), 0);
        assert_eq!(page_offset(3, 20), 40);
        assert_eq!(page_offset(u32::MAX, 100), i64::from(u32::MAX - 1) * 100);
        assert_eq!(page_offset(u32::MAX, u32::MAX), i64::MAX);
    }

    #[test]
    fn string_enums_round_trip_through_text() {
        for status in TaskStatus::ALL {
            assert_eq!(TaskStatus::from_str(status.as_str()).unwrap(), *status);
        }
        assert_eq!(
            serde_json::to_string(&TaskStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
    }

    #[test]
    fn unknown_value_names_the_enum() {
        let err = TaskPriority::from_str("critical").unwrap_err();
        assert_eq!(err.kind, "TaskPriority");
        assert_eq!(err.value, "critical");
    }
}
