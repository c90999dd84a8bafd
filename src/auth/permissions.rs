use anyhow::Error;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ViewOwnProfile,
    RegisterForPrograms,
    ViewOwnRegistrations,
    ViewOwnNotifications,

    ViewAllPrograms,
    ViewProgramRegistrations,

    ReviewRegistrations,
    EditRegistrationNotes,
    ManagePrograms,
    ModerateUsers,
    ReceiveAdminNotifications,

    EditUserRoles,
}

/// Ranked lowest to highest; the derived ordering is the privilege ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Instructor,
    CenterAdmin,
    SuperAdmin,
}

static USER_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.insert(Permission::ViewOwnProfile);
    permissions.insert(Permission::RegisterForPrograms);
    permissions.insert(Permission::ViewOwnRegistrations);
    permissions.insert(Permission::ViewOwnNotifications);

    permissions
});

static INSTRUCTOR_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.extend(USER_PERMISSIONS.iter().copied());

    permissions.insert(Permission::ViewAllPrograms);
    permissions.insert(Permission::ViewProgramRegistrations);

    permissions
});

static CENTER_ADMIN_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.extend(INSTRUCTOR_PERMISSIONS.iter().copied());

    permissions.insert(Permission::ReviewRegistrations);
    permissions.insert(Permission::EditRegistrationNotes);
    permissions.insert(Permission::ManagePrograms);
    permissions.insert(Permission::ModerateUsers);
    permissions.insert(Permission::ReceiveAdminNotifications);

    permissions
});

static SUPER_ADMIN_PERMISSIONS: Lazy<HashSet<Permission>> = Lazy::new(|| {
    let mut permissions = HashSet::new();

    permissions.extend(CENTER_ADMIN_PERMISSIONS.iter().copied());

    permissions.insert(Permission::EditUserRoles);

    permissions
});

impl Role {
    pub const ALL: [Role; 4] = [
        Role::User,
        Role::Instructor,
        Role::CenterAdmin,
        Role::SuperAdmin,
    ];

    pub fn with_permission(permission: Permission) -> Vec<Role> {
        Role::ALL
            .into_iter()
            .filter(|role| role.has_permission(permission))
            .collect()
    }

    pub fn permissions(&self) -> &'static HashSet<Permission> {
        match self {
            Role::User => &USER_PERMISSIONS,
            Role::Instructor => &INSTRUCTOR_PERMISSIONS,
            Role::CenterAdmin => &CENTER_ADMIN_PERMISSIONS,
            Role::SuperAdmin => &SUPER_ADMIN_PERMISSIONS,
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }

    pub fn has_minimum_role(&self, minimum: Role) -> bool {
        *self >= minimum
    }

    /// Highest role this role may moderate or hand out. `None` means no
    /// moderation rights at all.
    pub fn moderation_ceiling(&self) -> Option<Role> {
        match self {
            Role::SuperAdmin => Some(Role::SuperAdmin),
            Role::CenterAdmin => Some(Role::Instructor),
            Role::User | Role::Instructor => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Role::User => "user",
            Role::Instructor => "instructor",
            Role::CenterAdmin => "center_admin",
            Role::SuperAdmin => "super_admin",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "user" => Ok(Role::User),
            "instructor" => Ok(Role::Instructor),
            "center_admin" => Ok(Role::CenterAdmin),
            "super_admin" => Ok(Role::SuperAdmin),
            _ => Err(Error::msg(format!("Unknown role: {}", s))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
