//! Inline-button payloads: `{kind}_{verb}[:arg...]`, colon separated.

use crate::models::{Action, GuestKind};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackData {
    /// `vm_refresh`
    Refresh { kind: GuestKind },
    /// `vm_select:100:pve`
    Select { kind: GuestKind, id: u32, node: String },
    /// `vm_confirm:stop:100:pve`, asks before acting
    Confirm {
        kind: GuestKind,
        action: Action,
        id: u32,
        node: String,
    },
    /// `vm_action:stop:100:pve`
    Act {
        kind: GuestKind,
        action: Action,
        id: u32,
        node: String,
    },
    /// `lxc_console:101:pve`
    Console { kind: GuestKind, id: u32, node: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed callback payload: {0:?}")]
pub struct InvalidCallback(pub String);

impl CallbackData {
    pub fn kind(&self) -> GuestKind {
        match self {
            CallbackData::Refresh { kind }
            | CallbackData::Select { kind, .. }
            | CallbackData::Confirm { kind, .. }
            | CallbackData::Act { kind, .. }
            | CallbackData::Console { kind, .. } => *kind,
        }
    }
}

impl FromStr for CallbackData {
    type Err = InvalidCallback;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidCallback(raw.to_string());
        let (slug, rest) = raw.split_once('_').ok_or_else(invalid)?;
        let kind = GuestKind::from_slug(slug).ok_or_else(invalid)?;

        let parts: Vec<&str> = rest.split(':').collect();
        let id = |s: &str| s.parse::<u32>().map_err(|_| invalid());
        let node = |s: &str| {
            if s.is_empty() {
                Err(invalid())
            } else {
                Ok(s.to_string())
            }
        };
        let action = |s: &str| s.parse::<Action>().map_err(|_| invalid());

        match parts.as_slice() {
            ["refresh"] => Ok(CallbackData::Refresh { kind }),
            ["select", i, n] => Ok(CallbackData::Select {
                kind,
                id: id(*i)?,
                node: node(*n)?,
            }),
            ["confirm", a, i, n] => Ok(CallbackData::Confirm {
                kind,
                action: action(*a)?,
                id: id(*i)?,
                node: node(*n)?,
            }),
            ["action", a, i, n] => Ok(CallbackData::Act {
                kind,
                action: action(*a)?,
                id: id(*i)?,
                node: node(*n)?,
            }),
            ["console", i, n] => Ok(CallbackData::Console {
                kind,
                id: id(*i)?,
                node: node(*n)?,
            }),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for CallbackData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slug = self.kind().slug();
        match self {
            CallbackData::Refresh { .. } => write!(f, "{slug}_refresh"),
            CallbackData::Select { id, node, .. } => write!(f, "{slug}_select:{id}:{node}"),
            CallbackData::Confirm { action, id, node, .. } => {
                write!(f, "{slug}_confirm:{action}:{id}:{node}")
            }
            CallbackData::Act { action, id, node, .. } => {
                write!(f, "{slug}_action:{action}:{id}:{node}")
            }
            CallbackData::Console { id, node, .. } => write!(f, "{slug}_console:{id}:{node}"),
        }
    }
}
