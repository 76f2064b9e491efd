use fi_core::types::TenantContext;
use sqlx::postgres::PgRow;
use sqlx::{AssertSqlSafe, PgPool};

/// Owned bind value for dynamically assembled queries.
#[derive(Debug, Clone)]
pub(crate) enum BindValue {
    Text(String),
    Bool(bool),
    Int(i64),
}

impl From<String> for BindValue {
    fn from(value: String) -> Self {
        BindValue::Text(value)
    }
}

impl From<&str> for BindValue {
    fn from(value: &str) -> Self {
        BindValue::Text(value.to_string())
    }
}

impl From<bool> for BindValue {
    fn from(value: bool) -> Self {
        BindValue::Bool(value)
    }
}

impl From<i64> for BindValue {
    fn from(value: i64) -> Self {
        BindValue::Int(value)
    }
}

/// Incremental SQL assembly with numbered placeholders and tenant scoping.
/// Fragments are static or derived from typed enums; every caller-supplied
/// value goes through a bind.
pub(crate) struct ScopedQuery {
    sql: String,
    binds: Vec<BindValue>,
}

impl ScopedQuery {
    pub fn new(select: &str) -> Self {
        Self {
            sql: format!("{select} WHERE TRUE"),
            binds: Vec::new(),
        }
    }

    /// A query filtered to the caller's tenant on `column`, unless the
    /// caller sees all projects.
    pub fn project_scoped(select: &str, column: &str, ctx: &TenantContext) -> Self {
        let mut query = Self::new(select);
        if !ctx.sees_all_projects() {
            let tenant = query.bind(ctx.tenant_id.as_str());
            query.push(&format!(" AND {column} = {tenant}"));
        }
        query
    }

    /// Register a bind value and return its `$n` placeholder.
    pub fn bind(&mut self, value: impl Into<BindValue>) -> String {
        self.binds.push(value.into());
        format!("${}", self.binds.len())
    }

    pub fn push(&mut self, fragment: &str) {
        self.sql.push_str(fragment);
    }

    pub fn and_eq(&mut self, column: &str, value: impl Into<BindValue>) {
        let placeholder = self.bind(value);
        self.push(&format!(" AND {column} = {placeholder}"));
    }

    #[cfg(test)]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub async fn fetch_all(self, pool: &PgPool) -> Result<Vec<PgRow>, sqlx::Error> {
        self.into_query().fetch_all(pool).await
    }

    pub async fn fetch_optional(self, pool: &PgPool) -> Result<Option<PgRow>, sqlx::Error> {
        self.into_query().fetch_optional(pool).await
    }

    fn into_query(
        self,
    ) -> sqlx::query::Query<'static, sqlx::Postgres, sqlx::postgres::PgArguments> {
        let mut query = sqlx::query(AssertSqlSafe(self.sql));
        for value in self.binds {
            query = match value {
                BindValue::Text(v) => query.bind(v),
                BindValue::Bool(v) => query.bind(v),
                BindValue::Int(v) => query.bind(v),
            };
        }
        query
    }
}
