#[derive(Debug, Deserialize)]
struct ListUsersQuery {
    search: Option<String>,
    page: Option<usize>,
    page_size: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ListUsersResponse {
    schema_version: String,
    users: Vec<persistence::UserRow>,
    page: usize,
    total: i64,
}

async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<ListUsersQuery>,
) -> Result<Json<ListUsersResponse>, HttpApiError> {
    let (limit, offset) = page_bounds(query.page, query.page_size);
    let mut service = state.service.lock().await;
    let conn = service.store_mut().connection();

    let users = persistence::list_users(conn, query.search.as_deref(), limit, offset)
        .map_err(|err| HttpApiError::from_service(ServiceError::Store(err)))?;
    let total = persistence::count_users(conn)
        .map_err(|err| HttpApiError::from_service(ServiceError::Store(err)))?;

    Ok(Json(ListUsersResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        users,
        page: query.page.unwrap_or(1).max(1),
        total,
    }))
}

#[derive(Debug, Serialize)]
struct UserDetailResponse {
    schema_version: String,
    user: persistence::UserRow,
    ledger: Option<farm_core::ledger::ResourceLedger>,
    stats: Option<farm_core::ledger::UserStats>,
    patches: Vec<farm_core::patch::Patch>,
    subscriptions: Vec<farm_core::vip::VipSubscription>,
}

async fn get_user_detail(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<UserDetailResponse>, HttpApiError> {
    let mut service = state.service.lock().await;
    let conn = service.store_mut().connection();
    let store_err = |err| HttpApiError::from_service(ServiceError::Store(err));

    let user = persistence::get_user(conn, user_id)
        .map_err(store_err)?
        .ok_or_else(|| {
            HttpApiError::not_found("user not found", Some(format!("user_id={user_id}")))
        })?;

    Ok(Json(UserDetailResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        user,
        ledger: persistence::load_ledger(conn, user_id).map_err(store_err)?,
        stats: persistence::load_stats(conn, user_id).map_err(store_err)?,
        patches: persistence::load_patches(conn, user_id).map_err(store_err)?,
        subscriptions: persistence::user_subscriptions(conn, user_id).map_err(store_err)?,
    }))
}

#[derive(Debug, Deserialize)]
struct BanRequest {
    reason: String,
}

#[derive(Debug, Serialize)]
struct AckResponse {
    schema_version: String,
    ok: bool,
}

fn ack() -> AckResponse {
    AckResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        ok: true,
    }
}

async fn ban_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(request): Json<BanRequest>,
) -> Result<Json<AckResponse>, HttpApiError> {
    let mut service = state.service.lock().await;
    service
        .ban_user(user_id, &request.reason, Utc::now())
        .map_err(HttpApiError::from_service)?;
    Ok(Json(ack()))
}

async fn unban_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<AckResponse>, HttpApiError> {
    let mut service = state.service.lock().await;
    service
        .unban_user(user_id, Utc::now())
        .map_err(HttpApiError::from_service)?;
    Ok(Json(ack()))
}

#[derive(Debug, Deserialize)]
struct GiftRequest {
    kind: GiftKind,
    amount: i64,
}

async fn gift_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(request): Json<GiftRequest>,
) -> Result<Json<AckResponse>, HttpApiError> {
    let mut service = state.service.lock().await;
    service
        .gift(user_id, request.kind, request.amount, Utc::now())
        .map_err(HttpApiError::from_service)?;
    Ok(Json(ack()))
}
