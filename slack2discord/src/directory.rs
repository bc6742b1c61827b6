use std::collections::HashMap;

use log::debug;

use crate::models::{User, slack::Record};

/// Slack user id to display name and avatar, built once from the export.
#[derive(Debug, Default, Clone)]
pub struct UserDirectory {
    users: HashMap<String, User>,
}

impl UserDirectory {
    /// Records without a profile are system messages. The first profile
    /// seen for an id wins.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a Record>) -> Self {
        let mut users = HashMap::new();

        for record in records {
            if record.subtype.is_some() {
                continue;
            }
            let (Some(id), Some(profile)) = (&record.user, &record.user_profile) else {
                continue;
            };
            users.entry(id.clone()).or_insert_with(|| User {
                id: id.clone(),
                display_name: profile.real_name.clone(),
                avatar_url: profile.image_72.clone(),
            });
        }

        debug!("user directory holds {} users", users.len());
        Self { users }
    }

    pub fn get(&self, id: &str) -> Option<&User> {
        self.users.get(id)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
