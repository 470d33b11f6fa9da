/*!
 * # Permissions Module
 *
 * Permissions are `resource:action` strings carried in the access token.
 * Each staff role maps to a fixed permission set.
 */

use crate::entities::UserRole;

/// Common permission string constants for compile-time safety
pub mod consts {
    pub const CUSTOMERS_READ: &str = "customers:read";
    pub const CUSTOMERS_WRITE: &str = "customers:write";

    pub const ORDERS_READ: &str = "orders:read";
    pub const ORDERS_WRITE: &str = "orders:write";

    pub const INQUIRIES_READ: &str = "inquiries:read";
    pub const INQUIRIES_WRITE: &str = "inquiries:write";

    pub const QUOTES_READ: &str = "quotes:read";
    pub const QUOTES_WRITE: &str = "quotes:write";
    pub const QUOTES_CONVERT: &str = "quotes:convert";

    pub const IMPORTS_RUN: &str = "imports:run";
    pub const DASHBOARD_READ: &str = "dashboard:read";
    pub const USERS_MANAGE: &str = "users:manage";
    pub const PUSH_SEND: &str = "push:send";
}

use consts::*;

const READ_PERMISSIONS: &[&str] = &[
    CUSTOMERS_READ,
    ORDERS_READ,
    INQUIRIES_READ,
    QUOTES_READ,
    DASHBOARD_READ,
];

const SALES_WRITE_PERMISSIONS: &[&str] = &[
    CUSTOMERS_WRITE,
    ORDERS_WRITE,
    INQUIRIES_WRITE,
    QUOTES_WRITE,
    QUOTES_CONVERT,
];

const MANAGER_EXTRA_PERMISSIONS: &[&str] = &[IMPORTS_RUN, PUSH_SEND];

/// Every permission known to the API
pub fn all_permissions() -> Vec<&'static str> {
    let mut all = permissions_for_role(UserRole::Manager);
    all.push(USERS_MANAGE);
    all
}

/// Fixed role-to-permission mapping
pub fn permissions_for_role(role: UserRole) -> Vec<&'static str> {
    match role {
        UserRole::Admin => all_permissions(),
        UserRole::Manager => READ_PERMISSIONS
            .iter()
            .chain(SALES_WRITE_PERMISSIONS)
            .chain(MANAGER_EXTRA_PERMISSIONS)
            .copied()
            .collect(),
        UserRole::Sales => READ_PERMISSIONS
            .iter()
            .chain(SALES_WRITE_PERMISSIONS)
            .copied()
            .collect(),
        UserRole::Viewer => READ_PERMISSIONS.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_has_everything_manager_lacks_user_management() {
        let admin = permissions_for_role(UserRole::Admin);
        let manager = permissions_for_role(UserRole::Manager);
        assert!(admin.contains(&USERS_MANAGE));
        assert!(!manager.contains(&USERS_MANAGE));
        for perm in &manager {
            assert!(admin.contains(perm));
        }
        assert_eq!(admin.len(), manager.len() + 1);
    }

    #[test]
    fn sales_can_convert_quotes_but_not_import() {
        let sales = permissions_for_role(UserRole::Sales);
        assert!(sales.contains(&QUOTES_CONVERT));
        assert!(sales.contains(&CUSTOMERS_WRITE));
        assert!(!sales.contains(&IMPORTS_RUN));
        assert!(!sales.contains(&PUSH_SEND));
    }

    #[test]
    fn viewer_is_read_only() {
        let viewer = permissions_for_role(UserRole::Viewer);
        assert!(viewer.iter().all(|p| p.ends_with(":read")));
    }
}
