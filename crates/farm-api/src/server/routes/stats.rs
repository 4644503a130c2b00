#[derive(Debug, Serialize)]
struct OverviewResponse {
    schema_version: String,
    generated_at: DateTime<Utc>,
    counts: persistence::OverviewCounts,
}

async fn get_overview(State(state): State<AppState>) -> Result<Json<OverviewResponse>, HttpApiError> {
    let now = Utc::now();
    let mut service = state.service.lock().await;
    let counts = persistence::overview_counts(service.store_mut().connection(), now)
        .map_err(|err| HttpApiError::from_service(ServiceError::Store(err)))?;

    Ok(Json(OverviewResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        generated_at: now,
        counts,
    }))
}

#[derive(Debug, Serialize)]
struct SystemStatusResponse {
    schema_version: String,
    generated_at: DateTime<Utc>,
    jobs: Vec<farm_core::schedule::JobStatus>,
    counts: persistence::OverviewCounts,
}

async fn get_system_status(
    State(state): State<AppState>,
) -> Result<Json<SystemStatusResponse>, HttpApiError> {
    let now = Utc::now();
    let mut service = state.service.lock().await;
    let counts = persistence::overview_counts(service.store_mut().connection(), now)
        .map_err(|err| HttpApiError::from_service(ServiceError::Store(err)))?;

    Ok(Json(SystemStatusResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        generated_at: now,
        jobs: service.job_status(),
        counts,
    }))
}
