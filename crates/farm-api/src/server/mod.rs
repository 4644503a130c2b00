use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::http::header::{HeaderName, HeaderValue, AUTHORIZATION};
use axum::http::{Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use contracts::{
    ApiError, BroadcastAudience, ContestKind, ErrorCode, GiftKind, PrizePool, VipTier,
    SCHEMA_VERSION_V1,
};
use farm_core::contest::{Contest, SettlementDecision};
use farm_core::error::GameError;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use crate::{persistence, GameService, ServiceError};

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 200;

include!("error.rs");
include!("state.rs");
include!("routes/stats.rs");
include!("routes/users.rs");
include!("routes/payments.rs");
include!("routes/contests.rs");
include!("routes/broadcast.rs");
include!("util.rs");

pub async fn serve(
    addr: SocketAddr,
    service: Arc<Mutex<GameService>>,
) -> Result<(), ServerError> {
    let admin_token = {
        let service = service.lock().await;
        service.config().admin_token.clone()
    };
    let state = AppState {
        service,
        admin_token,
    };
    let app = router(state);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/stats/overview", get(get_overview))
        .route("/api/v1/system/status", get(get_system_status))
        .route("/api/v1/users", get(list_users))
        .route("/api/v1/users/{user_id}", get(get_user_detail))
        .route("/api/v1/users/{user_id}/ban", post(ban_user))
        .route("/api/v1/users/{user_id}/unban", post(unban_user))
        .route("/api/v1/users/{user_id}/gift", post(gift_user))
        .route("/api/v1/payments/pending", get(get_pending_payments))
        .route("/api/v1/payments/{payment_id}/approve", post(approve_payment))
        .route("/api/v1/payments/{payment_id}/reject", post(reject_payment))
        .route(
            "/api/v1/withdrawals/{withdrawal_id}/approve",
            post(approve_withdrawal),
        )
        .route(
            "/api/v1/withdrawals/{withdrawal_id}/reject",
            post(reject_withdrawal),
        )
        .route("/api/v1/contests", get(list_contests).post(create_contest))
        .route("/api/v1/contests/{contest_id}/end", post(end_contest))
        .route(
            "/api/v1/contests/{contest_id}/participants",
            get(get_contest_participants),
        )
        .route("/api/v1/notifications/broadcast", post(broadcast))
        .route("/api/v1/notifications/recent", get(get_recent_notifications))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(middleware::from_fn(cors_middleware))
        .with_state(state)
}

async fn cors_middleware(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        let mut response = Response::new(axum::body::Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors_headers(response.headers_mut());
        return response;
    }

    let mut response = next.run(request).await;
    apply_cors_headers(response.headers_mut());
    response
}

/// Static bearer-token check over the whole API surface. With no token
/// configured the check is skipped (local development).
async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.admin_token.as_deref() else {
        return next.run(request).await;
    };

    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    if presented != Some(expected) {
        return HttpApiError::unauthorized().into_response();
    }
    next.run(request).await
}
