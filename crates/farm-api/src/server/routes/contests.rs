#[derive(Debug, Serialize)]
struct ListContestsResponse {
    schema_version: String,
    contests: Vec<Contest>,
}

async fn list_contests(
    State(state): State<AppState>,
) -> Result<Json<ListContestsResponse>, HttpApiError> {
    let mut service = state.service.lock().await;
    let contests = service
        .active_contests(Utc::now())
        .map_err(HttpApiError::from_service)?;
    Ok(Json(ListContestsResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        contests,
    }))
}

#[derive(Debug, Deserialize)]
struct CreateContestRequest {
    kind: ContestKind,
    entry_cost: Option<i64>,
    ads_required: Option<i64>,
    max_participants: Option<i64>,
    prize_pool: Option<PrizePool>,
    /// Override the window end; defaults to the kind's standard window.
    ends_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct CreateContestResponse {
    schema_version: String,
    contest_id: i64,
}

async fn create_contest(
    State(state): State<AppState>,
    Json(request): Json<CreateContestRequest>,
) -> Result<Json<CreateContestResponse>, HttpApiError> {
    let now = Utc::now();
    let mut contest = Contest::scheduled(request.kind, now);
    if let Some(entry_cost) = request.entry_cost {
        contest.entry_cost = entry_cost;
    }
    if let Some(ads_required) = request.ads_required {
        contest.ads_required = ads_required;
    }
    if let Some(max_participants) = request.max_participants {
        contest.max_participants = max_participants;
    }
    if let Some(prize_pool) = request.prize_pool {
        contest.prize_pool = prize_pool;
    }
    if let Some(ends_at) = request.ends_at {
        if ends_at <= now {
            return Err(HttpApiError::invalid_request(
                "contest end must be in the future",
                Some(format!("ends_at={ends_at}")),
            ));
        }
        contest.ends_at = ends_at;
    }

    let mut service = state.service.lock().await;
    let contest_id = service
        .create_contest(&contest, now)
        .map_err(HttpApiError::from_service)?;
    Ok(Json(CreateContestResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        contest_id,
    }))
}

#[derive(Debug, Serialize)]
struct EndContestResponse {
    schema_version: String,
    contest_id: i64,
    winners: Vec<contracts::ContestWinner>,
    already_ended: bool,
}

/// Admin force-end: settles immediately even though the window is open.
async fn end_contest(
    State(state): State<AppState>,
    Path(contest_id): Path<i64>,
) -> Result<Json<EndContestResponse>, HttpApiError> {
    let mut service = state.service.lock().await;
    let decision = service
        .settle_contest(contest_id, Utc::now(), true, &mut rand::thread_rng())
        .map_err(HttpApiError::from_service)?;

    let (winners, already_ended) = match decision {
        SettlementDecision::Settled(outcome) => (outcome.winners, false),
        SettlementDecision::AlreadyEnded => (Vec::new(), true),
        SettlementDecision::NotDue => (Vec::new(), false),
    };
    Ok(Json(EndContestResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        contest_id,
        winners,
        already_ended,
    }))
}

#[derive(Debug, Serialize)]
struct ContestParticipantsResponse {
    schema_version: String,
    participants: Vec<farm_core::contest::ContestParticipant>,
}

async fn get_contest_participants(
    State(state): State<AppState>,
    Path(contest_id): Path<i64>,
) -> Result<Json<ContestParticipantsResponse>, HttpApiError> {
    let mut service = state.service.lock().await;
    let conn = service.store_mut().connection();
    if persistence::load_contest(conn, contest_id)
        .map_err(|err| HttpApiError::from_service(ServiceError::Store(err)))?
        .is_none()
    {
        return Err(HttpApiError::not_found(
            "contest not found",
            Some(format!("contest_id={contest_id}")),
        ));
    }
    let participants = persistence::contest_participants(conn, contest_id)
        .map_err(|err| HttpApiError::from_service(ServiceError::Store(err)))?;
    Ok(Json(ContestParticipantsResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        participants,
    }))
}
