//! Strongly-typed identifiers: database names and step identities.

/// Define a non-empty, trimmed string identifier.
///
/// Generates the struct plus `try_new`, `as_str`, `Display`, `Deref<Target=str>`,
/// `AsRef<str>`, `Borrow<str>`, comparisons against `str`, and serde impls
/// that reject blank values.
macro_rules! string_id {
    (
        $(#[$meta:meta])*
        $vis:vis struct $Name:ident;
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
        #[serde(transparent)]
        $vis struct $Name(String);

        impl<'de> serde::Deserialize<'de> for $Name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                $Name::try_new(s).ok_or_else(|| {
                    serde::de::Error::custom(concat!(stringify!($Name), " must not be blank"))
                })
            }
        }

        impl $Name {
            /// Build the identifier, returning `None` for blank input.
            ///
            /// Surrounding whitespace is trimmed.
            pub fn try_new(value: impl Into<String>) -> Option<Self> {
                let value = value.into();
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    None
                } else if trimmed.len() == value.len() {
                    Some(Self(value))
                } else {
                    Some(Self(trimmed.to_string()))
                }
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $Name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $Name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::ops::Deref for $Name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $Name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $Name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $Name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }
    };
}

string_id! {
    /// Name of a target database, e.g. `Sales`.
    pub struct DatabaseName;
}

string_id! {
    /// Stable identity of a step across runs:
    /// `<phase>/<connection>/<database>/<artifact>`.
    ///
    /// The artifact part is the path relative to the plan directory with `/`
    /// separators, so identities survive moving the whole plan tree.
    pub struct StepId;
}

impl DatabaseName {
    /// Whether `name` can be used as a database file stem.
    ///
    /// Path separators and parent references would let a plan escape its
    /// server directory.
    pub fn is_valid_file_stem(&self) -> bool {
        !self.0.contains(['/', '\\']) && self.0 != ".." && self.0 != "."
    }
}
