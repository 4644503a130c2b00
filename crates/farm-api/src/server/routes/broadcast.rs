#[derive(Debug, Deserialize)]
struct BroadcastRequest {
    audience: BroadcastAudience,
    message: String,
}

#[derive(Debug, Serialize)]
struct BroadcastResponse {
    schema_version: String,
    queued: usize,
}

async fn broadcast(
    State(state): State<AppState>,
    Json(request): Json<BroadcastRequest>,
) -> Result<Json<BroadcastResponse>, HttpApiError> {
    if request.message.trim().is_empty() {
        return Err(HttpApiError::invalid_request(
            "broadcast message is empty",
            None,
        ));
    }
    let mut service = state.service.lock().await;
    let queued = service
        .broadcast(request.audience, &request.message, Utc::now())
        .map_err(HttpApiError::from_service)?;
    Ok(Json(BroadcastResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        queued,
    }))
}

#[derive(Debug, Deserialize)]
struct RecentNotificationsQuery {
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct RecentNotificationsResponse {
    schema_version: String,
    notifications: Vec<persistence::NotificationRow>,
}

async fn get_recent_notifications(
    State(state): State<AppState>,
    Query(query): Query<RecentNotificationsQuery>,
) -> Result<Json<RecentNotificationsResponse>, HttpApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).max(1).min(MAX_PAGE_SIZE);
    let mut service = state.service.lock().await;
    let notifications = persistence::recent_notifications(service.store_mut().connection(), limit)
        .map_err(|err| HttpApiError::from_service(ServiceError::Store(err)))?;
    Ok(Json(RecentNotificationsResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        notifications,
    }))
}
