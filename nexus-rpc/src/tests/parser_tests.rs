//! Parser tests - adapters, intersection of parsers and validation rules

use crate::parser::{self, ErasedParser, parse_all};
use crate::prelude::*;
use crate::validation::{FieldError, IssueCode, ValidationError, ValidationResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CreateUser {
    name: String,
    age: i64,
}

impl Validate for CreateUser {
    fn validate(&self) -> ValidationResult {
        ValidationRules::new()
            .required("name", &self.name)
            .range("age", self.age, 0, 150)
            .build()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Paging {
    #[serde(default)]
    cursor: Option<String>,
}

// =============================================================================
// Adapters
// =============================================================================

#[tokio::test]
async fn test_typed_parser() {
    let parser = ErasedParser::new(typed::<CreateUser>());
    let ok = parser.parse(json!({"name": "ada", "age": 36})).await.unwrap();
    assert_eq!(ok, json!({"name": "ada", "age": 36}));

    let err = parser.parse(json!({"name": "ada"})).await.unwrap_err();
    assert!(err.message.contains("age"), "{}", err.message);
    assert_eq!(err.issues[0].field, "age");
    assert_eq!(err.issues[0].code, IssueCode::Required);
}

#[tokio::test]
async fn test_validated_parser_reports_every_issue() {
    let parser = ErasedParser::new(validated::<CreateUser>());
    let err = parser.parse(json!({"name": "", "age": 200})).await.unwrap_err();

    let fields: Vec<_> = err.issues.iter().map(|i| i.field.as_str()).collect();
    assert_eq!(fields, vec!["name", "age"]);
}

#[tokio::test]
async fn test_sync_and_async_function_parsers() {
    let positive = ErasedParser::new(parser::from_fn(|v: Value| match v.as_i64() {
        Some(n) if n > 0 => Ok(n),
        _ => Err(ValidationError::new("expected a positive integer")),
    }));
    assert_eq!(positive.parse(json!(5)).await.unwrap(), json!(5));
    assert!(positive.parse(json!(-5)).await.is_err());

    let trimmed = ErasedParser::new(parser::from_async_fn(|v: Value| async move {
        tokio::task::yield_now().await;
        v.as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| ValidationError::new("expected a string"))
    }));
    assert_eq!(trimmed.parse(json!("  hi ")).await.unwrap(), json!("hi"));
    assert!(trimmed.parse(json!(1)).await.is_err());
}

// =============================================================================
// Intersection
// =============================================================================

#[tokio::test]
async fn test_parse_all_merges_object_results() {
    let parsers = vec![
        ErasedParser::new(typed::<Paging>()),
        ErasedParser::new(parser::from_fn(|v: Value| {
            v.get("limit")
                .and_then(Value::as_u64)
                .map(|limit| json!({"limit": limit.min(100)}))
                .ok_or_else(|| ValidationError::new("limit is required"))
        })),
    ];

    let merged = parse_all(&parsers, json!({"cursor": "abc", "limit": 500}))
        .await
        .unwrap();
    assert_eq!(merged, json!({"cursor": "abc", "limit": 100}));

    let err = parse_all(&parsers, json!({"cursor": "abc"})).await.unwrap_err();
    assert_eq!(err.message, "limit is required");
}

#[tokio::test]
async fn test_parse_all_without_parsers_passes_input_through() {
    let raw = json!({"anything": [1, 2, 3]});
    assert_eq!(parse_all(&[], raw.clone()).await.unwrap(), raw);
}

#[tokio::test]
async fn test_chained_inputs_reach_resolver_merged() {
    #[derive(Debug, Serialize, Deserialize)]
    struct Query {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cursor: Option<String>,
        limit: u64,
    }

    let list = procedure::<EmptyContext>()
        .input(typed::<Paging>())
        .input(parser::from_fn(|v: Value| -> Result<Query, ValidationError> {
            let limit = v.get("limit").and_then(Value::as_u64).unwrap_or(20);
            Ok(Query {
                cursor: None,
                limit,
            })
        }))
        .query(|_ctx, q: Query| async move { Ok(json!({"cursor": q.cursor, "limit": q.limit})) });
    let caller = Caller::new(router([("list", list.into())]).unwrap());

    // The second parser leaves the cursor out, so the first one's value survives
    let result = caller
        .query("list", json!({"cursor": "abc"}), Context::new(EmptyContext))
        .await;
    assert_eq!(result.data(), Some(&json!({"cursor": "abc", "limit": 20})));
}

#[tokio::test]
async fn test_input_error_exposes_issues_on_the_wire() {
    let create = procedure::<EmptyContext>()
        .input(validated::<CreateUser>())
        .mutation(|_ctx, user: CreateUser| async move { Ok(user.name) });
    let caller = Caller::new(router([("create", create.into())]).unwrap());

    let result = caller
        .mutation("create", json!({"name": "", "age": 10}), Context::new(EmptyContext))
        .await;
    let wire = caller.to_wire(&result);
    assert_eq!(wire["error"]["code"], json!("BAD_REQUEST"));
    assert_eq!(
        wire["error"]["data"]["validationError"]["issues"][0]["field"],
        json!("name")
    );
}

#[test]
fn test_field_error_constructors() {
    let required = FieldError::required("email");
    assert_eq!(required.field, "email");
    assert_eq!(required.code, IssueCode::Required);

    let err = ValidationError::from_issues(vec![required, FieldError::invalid_format("email", "an email address")]);
    assert_eq!(err.message, "Validation failed with 2 issues");
}
