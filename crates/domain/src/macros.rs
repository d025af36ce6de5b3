//! Macro for implementing Display and FromStr for status enums
//!
//! Status and kind enums are persisted as lowercase strings inside stored
//! records and log fields, so every one of them needs the same pair of
//! conversions.
//!
//! # Example
//!
//! ```rust
//! use haven_domain::impl_domain_status_conversions;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! pub enum DeliveryStatus {
//!     Queued,
//!     Delivered,
//! }
//!
//! impl_domain_status_conversions!(DeliveryStatus {
//!     Queued => "queued",
//!     Delivered => "delivered",
//! });
//!
//! assert_eq!(DeliveryStatus::Queued.to_string(), "queued");
//! assert_eq!("DELIVERED".parse::<DeliveryStatus>(), Ok(DeliveryStatus::Delivered));
//! ```

/// Implements Display and FromStr traits for status enums
///
/// - Display writes the mapped lowercase string
/// - FromStr parses case-insensitively and reports the enum name on failure
#[macro_export]
macro_rules! impl_domain_status_conversions {
    ($enum_name:ident { $($variant:ident => $str:expr),+ $(,)? }) => {
        impl ::std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                match self {
                    $(Self::$variant => write!(f, $str),)+
                }
            }
        }

        impl ::std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                match s.to_lowercase().as_str() {
                    $($str => Ok(Self::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($enum_name), s)),
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Signal {
        Green,
        Amber,
        Red,
    }

    impl_domain_status_conversions!(Signal {
        Green => "green",
        Amber => "amber",
        Red => "red",
    });

    #[test]
    fn displays_mapped_string() {
        assert_eq!(Signal::Green.to_string(), "green");
        assert_eq!(Signal::Red.to_string(), "red");
    }

    #[test]
    fn parses_any_case() {
        assert_eq!(Signal::from_str("AMBER").unwrap(), Signal::Amber);
        assert_eq!(Signal::from_str("Red").unwrap(), Signal::Red);
    }

    #[test]
    fn rejects_unknown_values() {
        let err = Signal::from_str("blue").unwrap_err();
        assert!(err.contains("Invalid Signal: blue"));
        assert!(Signal::from_str("").is_err());
    }

    mod with_result_alias {
        use std::str::FromStr;

        #[allow(dead_code)]
        type Result<T> = std::result::Result<T, crate::errors::HavenError>;

        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        enum Lane {
            Fast,
            Slow,
        }

        impl_domain_status_conversions!(Lane {
            Fast => "fast",
            Slow => "slow",
        });

        #[test]
        fn expands_next_to_a_single_parameter_result() {
            assert_eq!(Lane::from_str("slow"), Ok(Lane::Slow));
            assert_eq!(Lane::Fast.to_string(), "fast");
        }
    }
}
