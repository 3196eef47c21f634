//! Caller tests - resolution, classification and cancellation
//!
//! Every call ends in exactly one result, and every failure carries the path
//! of the procedure it happened in.

use crate::prelude::*;
use crate::{CallResponse, PanicError, RpcConfig, ValidationError};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Default)]
struct AppContext {
    session: Option<String>,
}

fn greet_router() -> Router<AppContext> {
    let greet = procedure::<AppContext>()
        .input(typed::<String>())
        .query(|_ctx, name: String| async move { Ok(format!("hello {}", name)) });
    router([("greet", greet.into())]).unwrap()
}

// =============================================================================
// Resolution
// =============================================================================

#[tokio::test]
async fn test_query_returns_resolver_value() {
    let caller = Caller::new(greet_router());
    let result = caller
        .query("greet", json!("KATT"), Context::default())
        .await;
    assert_eq!(result.data(), Some(&json!("hello KATT")));
}

#[tokio::test]
async fn test_invalid_input_is_bad_request_with_path() {
    let caller = Caller::new(greet_router());
    let result = caller.query("greet", json!(123), Context::default()).await;

    let err = result.error().expect("call should fail");
    assert_eq!(err.code, RpcErrorCode::BadRequest);
    assert_eq!(err.path.as_deref(), Some("greet"));
    assert!(err.cause_as::<ValidationError>().is_some());
}

#[tokio::test]
async fn test_unknown_path_is_not_found() {
    let caller = Caller::new(greet_router());
    let result = caller
        .query("post.missing", Value::Null, Context::default())
        .await;

    let err = result.error().unwrap();
    assert_eq!(err.code, RpcErrorCode::NotFound);
    assert_eq!(err.path.as_deref(), Some("post.missing"));
}

#[tokio::test]
async fn test_kind_mismatch_is_bad_request() {
    let caller = Caller::new(greet_router());
    let result = caller
        .mutation("greet", json!("KATT"), Context::default())
        .await;

    let err = result.error().unwrap();
    assert_eq!(err.code, RpcErrorCode::BadRequest);
    assert!(err.message.contains("is a query, not a mutation"), "{}", err.message);
}

#[tokio::test]
async fn test_nested_path_resolves() {
    let by_id = procedure::<AppContext>()
        .input(typed::<u32>())
        .query(|_ctx, id: u32| async move { Ok(json!({"id": id, "title": "hello"})) });
    let app = router([("post", router([("byId", by_id.into())]).unwrap().into())]).unwrap();

    let result = Caller::new(app)
        .query("post.byId", json!(7), Context::default())
        .await;
    assert_eq!(result.data(), Some(&json!({"id": 7, "title": "hello"})));
}

// =============================================================================
// Middleware
// =============================================================================

#[tokio::test]
async fn test_auth_middleware_short_circuits_before_resolver() {
    let log_calls = Arc::new(AtomicUsize::new(0));
    let resolver_calls = Arc::new(AtomicUsize::new(0));

    let secret = procedure::<AppContext>()
        .use_middleware({
            let log_calls = log_calls.clone();
            move |ctx: Context<AppContext>, req: Request, next: Next<AppContext>| {
                let log_calls = log_calls.clone();
                async move {
                    log_calls.fetch_add(1, Ordering::SeqCst);
                    next.run(ctx, req).await
                }
            }
        })
        .use_middleware(|ctx: Context<AppContext>, req: Request, next: Next<AppContext>| async move {
            match ctx.session.clone() {
                Some(user) => {
                    next.run_with(ctx, ContextPatch::new().insert("user", user), req)
                        .await
                }
                None => Err(RpcError::unauthorized("Sign in first")),
            }
        })
        .query({
            let resolver_calls = resolver_calls.clone();
            move |ctx: Context<AppContext>, _: ()| {
                resolver_calls.fetch_add(1, Ordering::SeqCst);
                let user = ctx.get::<String>("user").cloned();
                async move { Ok(user) }
            }
        });
    let caller = Caller::new(router([("secret", secret.into())]).unwrap());

    let denied = caller
        .query("secret", Value::Null, Context::new(AppContext::default()))
        .await;
    assert_eq!(denied.error().unwrap().code, RpcErrorCode::Unauthorized);
    assert_eq!(denied.error().unwrap().path.as_deref(), Some("secret"));
    assert_eq!(log_calls.load(Ordering::SeqCst), 1);
    assert_eq!(resolver_calls.load(Ordering::SeqCst), 0);

    let session = AppContext {
        session: Some("ada".into()),
    };
    let allowed = caller
        .query("secret", Value::Null, Context::new(session))
        .await;
    assert_eq!(allowed.data(), Some(&json!("ada")));
    assert_eq!(log_calls.load(Ordering::SeqCst), 2);
    assert_eq!(resolver_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_rejecting_parser_skips_resolver() {
    let resolver_calls = Arc::new(AtomicUsize::new(0));
    let reject = crate::parser::from_fn(|_: Value| -> Result<(), ValidationError> {
        Err(ValidationError::new("nothing is accepted"))
    });
    let def = procedure::<AppContext>().input(reject).mutation({
        let resolver_calls = resolver_calls.clone();
        move |_ctx: Context<AppContext>, _: ()| {
            resolver_calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(true) }
        }
    });
    let caller = Caller::new(router([("save", def.into())]).unwrap());

    let result = caller.mutation("save", json!({}), Context::default()).await;
    assert_eq!(result.error().unwrap().code, RpcErrorCode::BadRequest);
    assert_eq!(resolver_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_middleware_sees_meta_and_raw_input() {
    let def = procedure::<AppContext>()
        .meta(json!({"requiresAdmin": true}))
        .use_middleware(|ctx: Context<AppContext>, req: Request, next: Next<AppContext>| async move {
            assert_eq!(req.input, json!("  raw  "));
            if req.meta.get_as::<bool>("requiresAdmin") == Some(true) {
                return Err(RpcError::forbidden("Admins only"));
            }
            next.run(ctx, req).await
        })
        .input(typed::<String>())
        .query(|_ctx, s: String| async move { Ok(s) });
    let caller = Caller::new(router([("admin", def.into())]).unwrap());

    let result = caller.query("admin", json!("  raw  "), Context::default()).await;
    assert_eq!(result.error().unwrap().code, RpcErrorCode::Forbidden);
}

// =============================================================================
// Output and faults
// =============================================================================

#[tokio::test]
async fn test_output_validation_failure_is_internal() {
    let def = procedure::<AppContext>()
        .output(typed::<u32>())
        .query(|_ctx, _: ()| async { Ok("not a number") });
    let caller = Caller::new(router([("count", def.into())]).unwrap());

    let result = caller.query("count", Value::Null, Context::default()).await;
    let err = result.error().unwrap();
    assert_eq!(err.code, RpcErrorCode::InternalServerError);
    assert_eq!(err.path.as_deref(), Some("count"));
}

#[tokio::test]
async fn test_procedure_without_parser_accepts_any_input() {
    let health = procedure::<AppContext>().query(|_ctx, _: ()| async { Ok("ok") });
    let caller = Caller::new(router([("health", health.into())]).unwrap());

    let result = caller.query("health", json!({}), Context::default()).await;
    assert_eq!(result.data(), Some(&json!("ok")));
    let result = caller.query("health", json!("anything"), Context::default()).await;
    assert_eq!(result.data(), Some(&json!("ok")));
}

#[tokio::test]
async fn test_output_failure_keeps_issues_off_the_wire_in_production() {
    let def = procedure::<AppContext>()
        .output(typed::<u32>())
        .query(|_ctx, _: ()| async { Ok(-42) });
    let caller = Caller::new(router([("count", def.into())]).unwrap())
        .with_config(RpcConfig::new().with_development_mode(false));

    let result = caller.query("count", Value::Null, Context::default()).await;
    assert!(result.error().unwrap().cause_as::<ValidationError>().is_some());

    let wire = caller.to_wire(&result);
    assert_eq!(wire["error"]["message"], json!("An internal error occurred"));
    assert!(wire["error"]["data"].get("validationError").is_none());
    assert!(!wire.to_string().contains("-42"));
}

#[tokio::test]
async fn test_resolver_panic_becomes_internal_error() {
    let def = procedure::<AppContext>().query(|_ctx, _: ()| async move {
        let value: Option<u32> = None;
        Ok(value.expect("resolver exploded"))
    });
    let caller = Caller::new(router([("explode", def.into())]).unwrap());

    let result = caller.query("explode", Value::Null, Context::default()).await;
    let err = result.error().unwrap();
    assert_eq!(err.code, RpcErrorCode::InternalServerError);
    assert_eq!(err.path.as_deref(), Some("explode"));
    assert_eq!(
        err.cause_as::<PanicError>().map(|p| p.message.as_str()),
        Some("resolver exploded")
    );
}

#[tokio::test]
async fn test_resolver_error_keeps_its_code() {
    let def = procedure::<AppContext>()
        .query(|_ctx, _: ()| async { Err::<(), _>(RpcError::conflict("Already taken")) });
    let caller = Caller::new(router([("claim", def.into())]).unwrap());

    let err = caller
        .query("claim", Value::Null, Context::default())
        .await
        .into_result()
        .unwrap_err();
    assert_eq!(err.code, RpcErrorCode::Conflict);
    assert_eq!(err.message, "Already taken");
}

#[tokio::test]
async fn test_payload_too_large_runs_nothing() {
    let resolver_calls = Arc::new(AtomicUsize::new(0));
    let def = procedure::<AppContext>().input(typed::<String>()).query({
        let resolver_calls = resolver_calls.clone();
        move |_ctx: Context<AppContext>, s: String| {
            resolver_calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(s.len()) }
        }
    });
    let caller = Caller::new(router([("len", def.into())]).unwrap())
        .with_config(RpcConfig::new().with_max_input_size(16));

    let result = caller
        .query("len", json!("x".repeat(100)), Context::default())
        .await;
    assert_eq!(result.error().unwrap().code, RpcErrorCode::PayloadTooLarge);
    assert_eq!(resolver_calls.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_cancelled_before_start() {
    let caller = Caller::new(greet_router());
    let signal = CancellationSignal::new();
    signal.cancel();

    let result = caller
        .call(
            CallRequest::query("greet", Context::default())
                .input(json!("KATT"))
                .signal(signal),
        )
        .await
        .into_result();
    assert_eq!(result.error().unwrap().code, RpcErrorCode::ClientClosedRequest);
}

#[tokio::test]
async fn test_cancelled_while_running() {
    let def = procedure::<AppContext>().query(|_ctx, _: ()| async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    });
    let caller = Caller::new(router([("slow", def.into())]).unwrap());
    let signal = CancellationSignal::new();

    let canceller = {
        let signal = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            signal.cancel();
        })
    };

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        caller.call(CallRequest::query("slow", Context::default()).signal(signal)),
    )
    .await
    .expect("cancellation should end the call")
    .into_result();
    canceller.await.unwrap();

    let err = result.error().unwrap();
    assert_eq!(err.code, RpcErrorCode::ClientClosedRequest);
    assert_eq!(err.path.as_deref(), Some("slow"));
}

// =============================================================================
// Response shapes
// =============================================================================

#[tokio::test]
async fn test_query_response_is_a_result() {
    let caller = Caller::new(greet_router());
    let response = caller
        .call(CallRequest::query("greet", Context::default()).input(json!("a")))
        .await;
    assert!(matches!(response, CallResponse::Result(ExecutionResult::Success(_))));
}

#[tokio::test]
async fn test_to_wire_formats_errors() {
    let def = procedure::<AppContext>()
        .query(|_ctx, _: ()| async { Err::<(), _>(RpcError::internal("db password leaked")) });
    let caller = Caller::new(router([("leak", def.into())]).unwrap())
        .with_config(RpcConfig::new().with_development_mode(false));

    let result = caller.query("leak", Value::Null, Context::default()).await;
    let wire = caller.to_wire(&result);
    assert_eq!(wire["ok"], json!(false));
    assert_eq!(wire["error"]["code"], json!("INTERNAL_SERVER_ERROR"));
    assert_eq!(wire["error"]["httpStatus"], json!(500));
    assert_eq!(wire["error"]["message"], json!("An internal error occurred"));
    assert_eq!(wire["error"]["data"]["path"], json!("leak"));

    // The error itself is left untouched
    assert_eq!(result.error().unwrap().message, "db password leaked");

    let ok = caller.to_wire(&ExecutionResult::Success(json!(1)));
    assert_eq!(ok, json!({"ok": true, "data": 1}));
}

#[tokio::test]
async fn test_custom_formatter_receives_default_shape() {
    let caller = Caller::new(greet_router()).with_formatter(
        |shape: crate::ErrorShape, error: &RpcError| {
            json!({"kind": shape.code, "where": error.path})
        },
    );

    let result = caller.query("greet", json!(false), Context::default()).await;
    assert_eq!(
        caller.to_wire(&result)["error"],
        json!({"kind": "BAD_REQUEST", "where": "greet"})
    );
}
