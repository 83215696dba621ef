//! Dynamic WHERE clause assembly for list endpoints.

use sqlx::query::QueryAs;
use sqlx::sqlite::{Sqlite, SqliteArguments};

#[derive(Debug, Clone, PartialEq)]
pub enum SqlArg {
    Int(i64),
    Text(String),
}

impl From<i64> for SqlArg {
    fn from(v: i64) -> Self {
        SqlArg::Int(v)
    }
}

impl From<String> for SqlArg {
    fn from(v: String) -> Self {
        SqlArg::Text(v)
    }
}

impl From<&str> for SqlArg {
    fn from(v: &str) -> Self {
        SqlArg::Text(v.to_string())
    }
}

/// Conditions joined with AND; arguments bind in the order they were pushed.
#[derive(Debug, Clone, Default)]
pub struct Filters {
    conditions: Vec<String>,
    args: Vec<SqlArg>,
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Condition without a placeholder
    pub fn raw(&mut self, condition: impl Into<String>) -> &mut Self {
        self.conditions.push(condition.into());
        self
    }

    pub fn push(&mut self, condition: impl Into<String>, arg: impl Into<SqlArg>) -> &mut Self {
        self.conditions.push(condition.into());
        self.args.push(arg.into());
        self
    }

    /// Condition with several placeholders, bound in order
    pub fn push_all<I>(&mut self, condition: impl Into<String>, args: I) -> &mut Self
    where
        I: IntoIterator,
        I::Item: Into<SqlArg>,
    {
        self.conditions.push(condition.into());
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn push_opt<T: Into<SqlArg>>(
        &mut self,
        condition: impl Into<String>,
        arg: Option<T>,
    ) -> &mut Self {
        if let Some(arg) = arg {
            self.push(condition, arg);
        }
        self
    }

    /// `WHERE a AND b`, or an empty string
    pub fn where_clause(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.conditions.join(" AND "))
        }
    }

    pub fn bind<'q, O>(
        &self,
        mut query: QueryAs<'q, Sqlite, O, SqliteArguments<'q>>,
    ) -> QueryAs<'q, Sqlite, O, SqliteArguments<'q>> {
        for arg in &self.args {
            query = match arg {
                SqlArg::Int(v) => query.bind(*v),
                SqlArg::Text(v) => query.bind(v.clone()),
            };
        }
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_where_clause() {
        let mut filters = Filters::new();
        assert_eq!(filters.where_clause(), "");

        filters
            .push("g.school_id = ?", 1i64)
            .push_opt("g.subject_id = ?", None::<i64>)
            .push_opt("g.grade_type = ?", Some("exam"))
            .raw("g.grade > 0");
        assert_eq!(
            filters.where_clause(),
            "WHERE g.school_id = ? AND g.grade_type = ? AND g.grade > 0"
        );
        assert_eq!(filters.args, vec![SqlArg::Int(1), SqlArg::Text("exam".into())]);
    }

    #[test]
    fn test_push_all_keeps_order() {
        let mut filters = Filters::new();
        filters.push_all("(a = ? OR b = ?)", [SqlArg::from("x"), SqlArg::from(7i64)]);
        assert_eq!(filters.where_clause(), "WHERE (a = ? OR b = ?)");
        assert_eq!(filters.args, vec![SqlArg::Text("x".into()), SqlArg::Int(7)]);
    }
}
