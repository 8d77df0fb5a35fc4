use std::collections::HashSet;

use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

use crate::model::Actor;

#[derive(Debug)]
pub struct InnkeepAuthSource {
    password: String,
}

impl InnkeepAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for InnkeepAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

/// Maps a connection's user name to an operator. Everyone on the shared
/// password is staff; the listed names are managers.
#[derive(Debug, Clone, Default)]
pub struct StaffRoster {
    managers: HashSet<String>,
}

impl StaffRoster {
    pub fn new(managers: impl IntoIterator<Item = String>) -> Self {
        Self {
            managers: managers.into_iter().map(|m| m.to_lowercase()).collect(),
        }
    }

    pub fn actor_for(&self, user: &str) -> Actor {
        if self.managers.contains(&user.to_lowercase()) {
            Actor::manager(user)
        } else {
            Actor::staff(user)
        }
    }
}
