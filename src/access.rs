//! Who may run which command.
//!
//! Pure predicates; the Telegram layer loads the whitelist and asks before
//! dispatching a guarded command.

use std::collections::HashSet;

/// The level of trust a command requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// Anyone may run it.
    Open,
    /// Whitelisted users and the admin.
    Whitelisted,
    /// The admin only.
    Admin,
}

/// Required permission for a command name (without the leading `/`).
pub fn permission_for(command: &str) -> Permission {
    match command {
        "refuel" | "reset_fuel" => Permission::Whitelisted,
        "setservice" | "allow" | "deny" | "users" | "settings" => Permission::Admin,
        _ => Permission::Open,
    }
}

/// Snapshot of the admin id and whitelist.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    admin_user_id: Option<i64>,
    whitelist: HashSet<i64>,
}

impl AccessPolicy {
    /// Build a policy from the admin id and the whitelisted ids.
    pub fn new(admin_user_id: Option<i64>, whitelist: impl IntoIterator<Item = i64>) -> Self {
        Self {
            admin_user_id,
            whitelist: whitelist.into_iter().collect(),
        }
    }

    /// Whether `user_id` is the configured admin.
    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_user_id == Some(user_id)
    }

    /// Whether `user_id` may adjust fuel. The admin always may.
    pub fn allows(&self, user_id: i64) -> bool {
        self.is_admin(user_id) || self.whitelist.contains(&user_id)
    }

    /// Whether `user_id` holds `permission`.
    pub fn permits(&self, user_id: i64, permission: Permission) -> bool {
        match permission {
            Permission::Open => true,
            Permission::Whitelisted => self.allows(user_id),
            Permission::Admin => self.is_admin(user_id),
        }
    }
}
