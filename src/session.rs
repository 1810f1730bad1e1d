//! The signed-in user, passed explicitly to whatever needs it.
//!
//! A [`SessionContext`] exists from sign-in (or restore) until
//! [`SessionContext::sign_out`]; its credential lives in a [`SecretStore`]
//! so it survives restarts.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ChatError, Result};
use crate::storage::SecretStore;

pub const SESSION_KEY: &str = "session.user";

/// Which side of a counselling conversation a user is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Student,
    Counsellor,
}

impl Role {
    /// The role of whoever sits on the other end.
    pub fn counterpart(self) -> Self {
        match self {
            Role::Student => Role::Counsellor,
            Role::Counsellor => Role::Student,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Student => "student",
            Role::Counsellor => "counsellor",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalUser {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub campus_id: Option<String>,
}

impl LocalUser {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            role: Role::default(),
            campus_id: None,
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }
}

#[derive(Debug, Clone)]
pub struct SessionContext {
    user: LocalUser,
}

impl SessionContext {
    /// A session that is never persisted.
    pub fn ephemeral(user: LocalUser) -> Self {
        Self { user }
    }

    pub fn sign_in(store: &dyn SecretStore, user: LocalUser) -> Result<Self> {
        if user.id.trim().is_empty() {
            return Err(ChatError::Session("user id must not be empty".to_string()));
        }
        persist(store, &user)?;
        log::info!("Signed in as {} ({})", user.id, user.role);
        Ok(Self::ephemeral(user))
    }

    /// Loads the stored session, if any. A corrupt entry is removed.
    pub fn restore(store: &dyn SecretStore) -> Result<Option<Self>> {
        let Some(raw) = store.get(SESSION_KEY)? else {
            return Ok(None);
        };
        match serde_json::from_str::<LocalUser>(&raw) {
            Ok(user) => {
                log::info!("Restored session for {}", user.id);
                Ok(Some(Self::ephemeral(user)))
            }
            Err(err) => {
                log::warn!("Discarding unreadable stored session: {err}");
                store.delete(SESSION_KEY)?;
                Ok(None)
            }
        }
    }

    /// Records campus membership from a scan: the first non-blank decoded
    /// value wins, the rest of the scan is never consumed.
    pub fn grant_campus_access<I>(&mut self, store: &dyn SecretStore, scan: I) -> Result<String>
    where
        I: IntoIterator<Item = String>,
    {
        let campus_id = scan
            .into_iter()
            .map(|code| code.trim().to_string())
            .find(|code| !code.is_empty())
            .ok_or_else(|| ChatError::Session("scan produced no code".to_string()))?;

        self.user.campus_id = Some(campus_id.clone());
        persist(store, &self.user)?;
        log::info!("Campus access granted for {}: {campus_id}", self.user.id);
        Ok(campus_id)
    }

    /// Ends the session and forgets the stored credential.
    pub fn sign_out(self, store: &dyn SecretStore) -> Result<()> {
        store.delete(SESSION_KEY)?;
        log::info!("Signed out {}", self.user.id);
        Ok(())
    }

    pub fn user(&self) -> &LocalUser {
        &self.user
    }

    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    pub fn role(&self) -> Role {
        self.user.role
    }
}

fn persist(store: &dyn SecretStore, user: &LocalUser) -> Result<()> {
    let payload = serde_json::to_string(user)?;
    store.set(SESSION_KEY, &payload)
}
