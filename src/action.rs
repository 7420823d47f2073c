// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Actions
//!
//! Actions are the payloads exchanged through the broker. They form a closed
//! set and travel as a versioned JSON document:
//!
//! ```json
//! { "version": 1, "action": { "kind": "move_users", "channel": 7, "users": ["ana"] } }
//! ```
//!
//! Decoding rejects unknown versions and unknown kinds, so a payload can never
//! be turned into an arbitrary object.

use crate::{errors::CodecError, post::{ChannelId, Post}};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Current encoding version written by `encode`.
pub const ACTION_ENCODING_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostAction {
    pub channels: Vec<ChannelId>,
    pub posts: Vec<Post>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveUsersAction {
    pub channel: ChannelId,
    pub users: Vec<ChannelId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    Post(PostAction),
    MoveUsers(MoveUsersAction),
}

/// Discriminant of `Action`, used to declare what a handler accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Post,
    MoveUsers,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Post => "post",
            ActionKind::MoveUsers => "move_users",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Post(_) => ActionKind::Post,
            Action::MoveUsers(_) => ActionKind::MoveUsers,
        }
    }

    /// Serializes the action as versioned JSON.
    ///
    /// # Returns
    /// The message body, or `CodecError::Encode`
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(&EncodedAction {
            version: ACTION_ENCODING_VERSION,
            action: self.clone(),
        })
        .map_err(CodecError::Encode)
    }

    /// Parses a message body produced by `encode`.
    ///
    /// # Parameters
    /// * `data` - Raw message body
    ///
    /// # Returns
    /// The action, or an error when the body is not JSON, carries another
    /// encoding version, or names no known action type
    pub fn decode(data: &[u8]) -> Result<Action, CodecError> {
        let header: VersionHeader = serde_json::from_slice(data).map_err(CodecError::Decode)?;
        if header.version != ACTION_ENCODING_VERSION {
            return Err(CodecError::UnsupportedVersion(header.version));
        }

        let encoded: EncodedAction = serde_json::from_slice(data).map_err(CodecError::Decode)?;
        Ok(encoded.action)
    }

    /// Decodes and checks the action is of the `expected` kind.
    pub fn decode_as(data: &[u8], expected: ActionKind) -> Result<Action, CodecError> {
        let action = Action::decode(data)?;
        if action.kind() != expected {
            return Err(CodecError::UnexpectedKind {
                expected: expected.to_string(),
                found: action.kind().to_string(),
            });
        }
        Ok(action)
    }
}

impl From<PostAction> for Action {
    fn from(action: PostAction) -> Self {
        Action::Post(action)
    }
}

impl From<MoveUsersAction> for Action {
    fn from(action: MoveUsersAction) -> Self {
        Action::MoveUsers(action)
    }
}

#[derive(Serialize, Deserialize)]
struct EncodedAction {
    version: u32,
    action: Action,
}

#[derive(Deserialize)]
struct VersionHeader {
    version: u32,
}
