//! A SQL builder for building WHERE clauses.
//!
//! Values never end up in the SQL text. Formatting a query renders `$n` placeholders and
//! collects the values in the same order, so they can be bound with [`bind_values`].

use lazy_static::lazy_static;
use regex::Regex;
use sqlx::postgres::{PgArguments, Postgres};
use sqlx::query::QueryAs;

lazy_static! {
    // Such as `title` or `books.title`.
    pub static ref FIELD_REGEX: Regex =
        Regex::new(r"^[a-z_][a-z0-9_]*(\.[a-z_][a-z0-9_]*)?$").expect("Failed to compile regex");
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    String(String),
}

impl Value {
    fn allowed_operators(&self) -> &'static [&'static str] {
        match self {
            Value::Int(_) => &["=", "<=", ">="],
            Value::String(_) => &["=", "ilike"],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryItem {
    pub field: String,
    pub value: Value,
    pub operator: String, // =, ilike, <=, >=
}

impl QueryItem {
    pub fn new(field: &str, value: Value, operator: &str) -> Result<Self, anyhow::Error> {
        if !FIELD_REGEX.is_match(field) {
            return Err(anyhow::anyhow!("Invalid field: {}", field));
        }

        let operator = operator.to_lowercase();
        if !value.allowed_operators().contains(&operator.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid operator {} for the value of {}",
                operator,
                field
            ));
        }

        Ok(Self {
            field: field.to_string(),
            value,
            operator,
        })
    }

    /// Render the condition and push its value onto `params`.
    pub fn format(&self, params: &mut Vec<Value>) -> String {
        params.push(self.value.clone());
        format!(
            "{} {} ${}",
            self.field,
            self.operator.to_uppercase(),
            params.len()
        )
    }
}

/// Conditions joined with one boolean operator.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposeQuery {
    /// and, or
    pub operator: String,
    pub items: Vec<QueryItem>,
}

impl ComposeQuery {
    pub fn new(operator: &str) -> Self {
        Self {
            operator: operator.to_string(),
            items: vec![],
        }
    }

    pub fn add_item(&mut self, item: QueryItem) -> &mut Self {
        self.items.push(item);
        self
    }

    /// Render the query as a WHERE clause body. An empty query matches every row.
    pub fn to_where_clause(&self, params: &mut Vec<Value>) -> String {
        if self.items.is_empty() {
            return "1=1".to_string();
        }

        let operator = format!(" {} ", self.operator.to_uppercase());
        self.items
            .iter()
            .map(|item| item.format(params))
            .collect::<Vec<String>>()
            .join(&operator)
    }
}

/// Bind the values collected while formatting onto a query, in placeholder order.
pub fn bind_values<'q, O>(
    mut query: QueryAs<'q, Postgres, O, PgArguments>,
    params: &[Value],
) -> QueryAs<'q, Postgres, O, PgArguments> {
    for value in params {
        query = match value {
            Value::Int(v) => query.bind(*v),
            Value::String(v) => query.bind(v.clone()),
        };
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_query() {
        let mut query = ComposeQuery::new("and");
        query
            .add_item(
                QueryItem::new("books.title", Value::String("%dune%".to_string()), "ILIKE")
                    .unwrap(),
            )
            .add_item(QueryItem::new("books.published_year", Value::Int(1965), ">=").unwrap())
            .add_item(
                QueryItem::new("books.genre", Value::String("Fiction".to_string()), "=").unwrap(),
            );

        let mut params = vec![];
        let clause = query.to_where_clause(&mut params);
        assert_eq!(
            clause,
            "books.title ILIKE $1 AND books.published_year >= $2 AND books.genre = $3"
        );
        assert_eq!(
            params,
            vec![
                Value::String("%dune%".to_string()),
                Value::Int(1965),
                Value::String("Fiction".to_string()),
            ]
        );
    }

    #[test]
    fn test_values_are_never_interpolated() {
        let item = QueryItem::new(
            "users.username",
            Value::String("x'; DROP TABLE books; --".to_string()),
            "=",
        )
        .unwrap();
        let mut params = vec![];
        let clause = item.format(&mut params);
        assert_eq!(clause, "users.username = $1");
        assert!(!clause.contains("DROP"));
    }

    #[test]
    fn test_invalid_items() {
        assert!(QueryItem::new("title", Value::Int(1), "ilike").is_err());
        assert!(QueryItem::new("title", Value::String("a".to_string()), ">=").is_err());
        assert!(QueryItem::new("title; --", Value::Int(1), "=").is_err());
        assert!(QueryItem::new("Title", Value::Int(1), "=").is_err());
    }

    #[test]
    fn test_empty_query_matches_everything() {
        let mut params = vec![];
        let clause = ComposeQuery::new("and").to_where_clause(&mut params);
        assert_eq!(clause, "1=1");
        assert!(params.is_empty());
    }
}
