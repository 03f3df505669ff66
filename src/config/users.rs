//! Static user directory loaded from the `[[users]]` entries of the settings file.
//!
//! The user service owns profiles; the worker binary only needs an email
//! address and a display name per participant, so a small lookup table is enough.

use crate::config::settings::UserEntry;
use crate::errors::Result;
use crate::notify::{UserContact, UserDirectory};
use async_trait::async_trait;
use std::collections::HashMap;

/// `UserDirectory` backed by an in-memory map
#[derive(Debug, Clone, Default)]
pub struct StaticUserDirectory {
    contacts: HashMap<i64, UserContact>,
}

impl StaticUserDirectory {
    /// Builds the directory. Later duplicates of an id replace earlier ones.
    #[must_use]
    pub fn from_entries(entries: &[UserEntry]) -> Self {
        let contacts = entries
            .iter()
            .map(|entry| {
                (
                    entry.id,
                    UserContact {
                        user_id: entry.id,
                        email: entry.email.clone(),
                        display_name: entry.display_name.clone(),
                    },
                )
            })
            .collect();
        Self { contacts }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }
}

#[async_trait]
impl UserDirectory for StaticUserDirectory {
    async fn contact(&self, user_id: i64) -> Result<Option<UserContact>> {
        Ok(self.contacts.get(&user_id).cloned())
    }
}
