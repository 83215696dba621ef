//! School isolation for every tenant-scoped lookup.
//!
//! Handlers never write `school_id = ?` themselves for single-row reads:
//! they ask the caller's [`Tenant`] for the row, and a row that lives in
//! another school is reported exactly like a missing one.

use sqlx::sqlite::{Sqlite, SqliteRow};
use sqlx::{Executor, FromRow, SqlitePool};

use super::auth::AuthContext;
use super::error::ApiError;
use crate::db::{
    Announcement, Attendance, Class, Filters, Grade, Homework, ParentStudent, Role, Schedule,
    Subject, User,
};

/// A table whose rows belong to one school
pub trait Scoped: for<'r> FromRow<'r, SqliteRow> + Send + Unpin {
    const TABLE: &'static str;
    /// Rows carry `deleted_at` and hide once it is set
    const SOFT_DELETE: bool = true;
    const NOT_FOUND: &'static str;
}

impl Scoped for User {
    const TABLE: &'static str = "users";
    const NOT_FOUND: &'static str = "User not found";
}

impl Scoped for Class {
    const TABLE: &'static str = "classes";
    const NOT_FOUND: &'static str = "Class not found";
}

impl Scoped for Subject {
    const TABLE: &'static str = "subjects";
    const NOT_FOUND: &'static str = "Subject not found";
}

impl Scoped for Schedule {
    const TABLE: &'static str = "schedules";
    const NOT_FOUND: &'static str = "Schedule not found";
}

impl Scoped for Attendance {
    const TABLE: &'static str = "attendance";
    const NOT_FOUND: &'static str = "Attendance record not found";
}

impl Scoped for Grade {
    const TABLE: &'static str = "grades";
    const SOFT_DELETE: bool = false;
    const NOT_FOUND: &'static str = "Grade not found";
}

impl Scoped for Homework {
    const TABLE: &'static str = "homework";
    const NOT_FOUND: &'static str = "Homework not found";
}

impl Scoped for Announcement {
    const TABLE: &'static str = "announcements";
    const SOFT_DELETE: bool = false;
    const NOT_FOUND: &'static str = "Announcement not found";
}

impl Scoped for ParentStudent {
    const TABLE: &'static str = "parent_students";
    const SOFT_DELETE: bool = false;
    const NOT_FOUND: &'static str = "Link not found";
}

/// The caller's school
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tenant {
    pub school_id: i64,
}

impl AuthContext {
    pub fn tenant(&self) -> Tenant {
        Tenant {
            school_id: self.school_id,
        }
    }
}

fn live(soft_delete: bool, alias: &str) -> String {
    if soft_delete {
        format!(" AND {}deleted_at IS NULL", alias)
    } else {
        String::new()
    }
}

impl Tenant {
    /// Row by id within this school, usable inside a transaction
    pub async fn get_with<'c, T, E>(&self, executor: E, id: i64) -> Result<Option<T>, sqlx::Error>
    where
        T: Scoped,
        E: Executor<'c, Database = Sqlite>,
    {
        let sql = format!(
            "SELECT * FROM {} WHERE id = ? AND school_id = ?{}",
            T::TABLE,
            live(T::SOFT_DELETE, "")
        );
        sqlx::query_as::<_, T>(&sql)
            .bind(id)
            .bind(self.school_id)
            .fetch_optional(executor)
            .await
    }

    pub async fn get<T: Scoped>(&self, db: &SqlitePool, id: i64) -> Result<Option<T>, sqlx::Error> {
        self.get_with(db, id).await
    }

    /// Row by id, or 404 with the table's message
    pub async fn find<T: Scoped>(&self, db: &SqlitePool, id: i64) -> Result<T, ApiError> {
        self.get(db, id)
            .await?
            .ok_or_else(|| ApiError::not_found(T::NOT_FOUND))
    }

    /// Live user of this school holding one of `roles`
    pub async fn user_with_role_in<'c, E>(
        &self,
        executor: E,
        id: i64,
        roles: &[Role],
    ) -> Result<Option<User>, sqlx::Error>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        let user: Option<User> = self.get_with(executor, id).await?;
        Ok(user.filter(|u| roles.contains(&u.role)))
    }

    pub async fn user_with_role(
        &self,
        db: &SqlitePool,
        id: i64,
        roles: &[Role],
    ) -> Result<Option<User>, sqlx::Error> {
        self.user_with_role_in(db, id, roles).await
    }

    /// True when every id is a live user of this school with one of `roles`
    pub async fn all_users_with_role(
        &self,
        db: &SqlitePool,
        ids: &[i64],
        roles: &[Role],
    ) -> Result<bool, sqlx::Error> {
        let mut unique = ids.to_vec();
        unique.sort_unstable();
        unique.dedup();
        if unique.is_empty() {
            return Ok(false);
        }

        let id_marks = vec!["?"; unique.len()].join(", ");
        let role_marks = vec!["?"; roles.len()].join(", ");
        let sql = format!(
            "SELECT COUNT(*) FROM users WHERE school_id = ? AND deleted_at IS NULL \
             AND id IN ({}) AND role IN ({})",
            id_marks, role_marks
        );

        let mut query = sqlx::query_as::<_, (i64,)>(&sql).bind(self.school_id);
        for id in &unique {
            query = query.bind(*id);
        }
        for role in roles {
            query = query.bind(*role);
        }
        let (count,) = query.fetch_one(db).await?;
        Ok(count == unique.len() as i64)
    }

    /// Filter set already restricted to this school on `column`
    pub fn filters(&self, column: &str) -> Filters {
        let mut filters = Filters::new();
        filters.push(format!("{} = ?", column), self.school_id);
        filters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    async fn seed(db: &SqlitePool) {
        sqlx::query(
            r#"
            INSERT INTO schools (name) VALUES ('S1'), ('S2');
            INSERT INTO users (school_id, username, email, password_hash, role) VALUES
                (1, 'adm', 'adm@x', 'h', 'admin'),
                (1, 'stu', 'stu@x', 'h', 'student'),
                (1, 'mon', 'mon@x', 'h', 'starosta'),
                (2, 'far', 'far@x', 'h', 'student');
            INSERT INTO classes (school_id, name, year) VALUES (1, '5A', '2025');
            INSERT INTO classes (school_id, name, year, deleted_at) VALUES (1, 'old', '2020', '2024-01-01T00:00:00Z');
            "#,
        )
        .execute(db)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_foreign_rows_look_missing() {
        let db = test_pool().await;
        seed(&db).await;

        let t1 = Tenant { school_id: 1 };
        let t2 = Tenant { school_id: 2 };

        assert!(t1.find::<Class>(&db, 1).await.is_ok());
        let err = t2.find::<Class>(&db, 1).await.unwrap_err();
        assert_eq!(err.message(), "Class not found");

        // Soft-deleted rows are invisible
        assert!(t1.get::<Class>(&db, 2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_role_checks() {
        let db = test_pool().await;
        seed(&db).await;
        let t1 = Tenant { school_id: 1 };
        let students = &[Role::Student, Role::Starosta];

        assert!(t1.user_with_role(&db, 2, students).await.unwrap().is_some());
        assert!(t1.user_with_role(&db, 1, students).await.unwrap().is_none());
        assert!(t1.all_users_with_role(&db, &[2, 3, 3], students).await.unwrap());
        // user 4 belongs to the other school
        assert!(!t1.all_users_with_role(&db, &[2, 4], students).await.unwrap());
        assert!(!t1.all_users_with_role(&db, &[], students).await.unwrap());
    }
}
