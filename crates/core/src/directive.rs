//! Output directives - how a step's result values land in the context.

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Declares how the value at one output position is written into the
/// execution context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyDirective {
    /// Assign the value under the given key
    Plain(String),

    /// Forward the value to the error channel if it is an error, ignore it otherwise
    ErrorSlot,

    /// Shallow-merge the value's elements into the context, keyed by index
    MergeArray,

    /// Shallow-merge the value's fields into the context
    MergeObject,

    /// Same as `Plain`
    Set(String),

    /// Append the value to the sequence already stored under the key
    Push(String),

    /// Copy the named fields of the value into same-named context slots
    Pick(#[serde(deserialize_with = "one_or_many")] Vec<String>),

    /// Drop the value
    #[serde(alias = "none")]
    Discard,
}

impl KeyDirective {
    /// Plain assignment under `key`.
    pub fn plain(key: impl Into<String>) -> Self {
        Self::Plain(key.into())
    }

    /// Append to the sequence under `key`.
    pub fn push(key: impl Into<String>) -> Self {
        Self::Push(key.into())
    }

    /// Pick a single field.
    pub fn pick(field: impl Into<String>) -> Self {
        Self::Pick(vec![field.into()])
    }

    /// Pick several fields.
    pub fn pick_all<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Pick(fields.into_iter().map(Into::into).collect())
    }

    /// The context key this directive writes to, if it targets exactly one.
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Plain(key) | Self::Set(key) | Self::Push(key) => Some(key),
            _ => None,
        }
    }
}

impl From<&str> for KeyDirective {
    fn from(key: &str) -> Self {
        Self::Plain(key.to_string())
    }
}

impl From<String> for KeyDirective {
    fn from(key: String) -> Self {
        Self::Plain(key)
    }
}

/// Plain directives for each of the given keys, in order.
pub fn plain_keys<I, S>(keys: I) -> Vec<KeyDirective>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    keys.into_iter().map(|k| KeyDirective::Plain(k.into())).collect()
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(field) => vec![field],
        OneOrMany::Many(fields) => fields,
    })
}

/// A directive that cannot be applied to the value or context it was given.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectiveError {
    /// `Push` target is missing or does not hold a sequence
    #[error("cannot push onto '{key}': slot holds {found}, not a sequence")]
    NotASequence {
        /// Target key
        key: String,
        /// Kind of value found in the slot
        found: &'static str,
    },

    /// `Pick` source is not an object
    #[error("cannot pick {fields:?} from {found}")]
    NotAnObject {
        /// Requested fields
        fields: Vec<String>,
        /// Kind of value supplied
        found: &'static str,
    },
}
