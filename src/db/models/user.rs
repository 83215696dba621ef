//! User accounts and roles.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::School;

/// Role of a user inside their school
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Student,
    /// Class monitor, a student who may mark attendance
    Starosta,
    Parent,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Admin,
        Role::Teacher,
        Role::Student,
        Role::Starosta,
        Role::Parent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
            Role::Starosta => "starosta",
            Role::Parent => "parent",
        }
    }

    /// Students and class monitors are both rostered in classes
    pub fn is_student(&self) -> bool {
        matches!(self, Role::Student | Role::Starosta)
    }

    /// Announcement audience this role reads, if any besides `all`
    pub fn audience(&self) -> Option<&'static str> {
        match self {
            Role::Admin => None,
            Role::Teacher => Some("teachers"),
            Role::Student | Role::Starosta => Some("students"),
            Role::Parent => Some("parents"),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "teacher" => Ok(Role::Teacher),
            "student" => Ok(Role::Student),
            "starosta" => Ok(Role::Starosta),
            "parent" => Ok(Role::Parent),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub school_id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub role: Role,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub middle_name: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub admin_title: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub teacher_subject: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub avatar_url: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip)]
    pub deleted_at: Option<String>,
}

impl User {
    /// "Last First" as shown in journals and exports
    pub fn full_name(&self) -> String {
        full_name(&self.last_name, &self.first_name)
    }
}

pub fn full_name(last: &str, first: &str) -> String {
    format!("{} {}", last, first).trim().to_string()
}

/// Minimal user reference embedded in other payloads
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
    pub role: Role,
    pub first_name: String,
    pub last_name: String,
}

impl From<User> for UserSummary {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            role: user.role,
            first_name: user.first_name,
            last_name: user.last_name,
        }
    }
}

/// User with its school, returned by `/auth/me`
#[derive(Debug, Clone, Serialize)]
pub struct UserWithSchool {
    #[serde(flatten)]
    pub user: User,
    pub school: Option<School>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub school_id: Option<i64>,
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub middle_name: String,
    #[serde(default)]
    pub admin_title: String,
    #[serde(default)]
    pub teacher_subject: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub refresh_token: String,
    pub user: User,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub middle_name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    pub teacher_subject: Option<String>,
    /// Admin only
    pub role: Option<String>,
    /// Admin only
    pub admin_title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserListQuery {
    pub role: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        assert_eq!("ADMIN".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!(" starosta ".parse::<Role>().unwrap(), Role::Starosta);
        assert!("principal".parse::<Role>().is_err());
        for role in Role::ALL {
            assert_eq!(role.to_string().parse::<Role>().unwrap(), role);
        }
    }

    #[test]
    fn test_role_audience() {
        assert_eq!(Role::Starosta.audience(), Some("students"));
        assert_eq!(Role::Teacher.audience(), Some("teachers"));
        assert_eq!(Role::Admin.audience(), None);
        assert!(Role::Starosta.is_student());
        assert!(!Role::Parent.is_student());
    }

    #[test]
    fn test_password_hash_never_serialized() {
        let user = User {
            id: 1,
            school_id: 1,
            username: "a".into(),
            email: "a@x".into(),
            password_hash: "$argon2id$secret".into(),
            role: Role::Admin,
            first_name: String::new(),
            last_name: String::new(),
            middle_name: String::new(),
            admin_title: String::new(),
            teacher_subject: String::new(),
            avatar_url: String::new(),
            created_at: "2025-01-01T00:00:00Z".into(),
            updated_at: "2025-01-01T00:00:00Z".into(),
            deleted_at: Some("2025-01-02T00:00:00Z".into()),
        };
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert!(json.get("deleted_at").is_none());
        assert_eq!(json["role"], "admin");
    }
}
