#[derive(Debug, Serialize)]
struct PendingPaymentsResponse {
    schema_version: String,
    vip_purchases: Vec<persistence::TransactionRow>,
    deposits: Vec<persistence::TransactionRow>,
    withdrawals: Vec<persistence::WithdrawalRow>,
}

async fn get_pending_payments(
    State(state): State<AppState>,
) -> Result<Json<PendingPaymentsResponse>, HttpApiError> {
    let mut service = state.service.lock().await;
    let conn = service.store_mut().connection();
    let store_err = |err| HttpApiError::from_service(ServiceError::Store(err));

    Ok(Json(PendingPaymentsResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        vip_purchases: persistence::pending_transactions(conn, "vip_purchase")
            .map_err(store_err)?,
        deposits: persistence::pending_transactions(conn, "deposit").map_err(store_err)?,
        withdrawals: persistence::pending_withdrawals(conn).map_err(store_err)?,
    }))
}

#[derive(Debug, Deserialize)]
struct ApprovePaymentRequest {
    /// Tier to activate when approving a VIP purchase; ignored for
    /// deposits.
    tier: Option<u8>,
    #[serde(default = "default_vip_days")]
    duration_days: u32,
}

fn default_vip_days() -> u32 {
    30
}

async fn approve_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<i64>,
    Json(request): Json<ApprovePaymentRequest>,
) -> Result<Json<AckResponse>, HttpApiError> {
    let vip = match request.tier {
        Some(raw) => {
            let Some(tier) = VipTier::from_u8(raw) else {
                return Err(HttpApiError::invalid_request(
                    "vip tier must be 1..=4",
                    Some(format!("tier={raw}")),
                ));
            };
            Some((tier, request.duration_days))
        }
        None => None,
    };
    let mut service = state.service.lock().await;
    service
        .approve_payment(payment_id, vip, Utc::now())
        .map_err(HttpApiError::from_service)?;
    Ok(Json(ack()))
}

#[derive(Debug, Deserialize)]
struct RejectRequest {
    reason: String,
}

async fn reject_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<i64>,
    Json(request): Json<RejectRequest>,
) -> Result<Json<AckResponse>, HttpApiError> {
    let mut service = state.service.lock().await;
    service
        .reject_payment(payment_id, &request.reason, Utc::now())
        .map_err(HttpApiError::from_service)?;
    Ok(Json(ack()))
}

#[derive(Debug, Deserialize)]
struct ProcessWithdrawalRequest {
    #[serde(default)]
    notes: Option<String>,
}

async fn approve_withdrawal(
    State(state): State<AppState>,
    Path(withdrawal_id): Path<i64>,
    Json(request): Json<ProcessWithdrawalRequest>,
) -> Result<Json<AckResponse>, HttpApiError> {
    let mut service = state.service.lock().await;
    service
        .process_withdrawal(withdrawal_id, true, request.notes.as_deref(), Utc::now())
        .map_err(HttpApiError::from_service)?;
    Ok(Json(ack()))
}

async fn reject_withdrawal(
    State(state): State<AppState>,
    Path(withdrawal_id): Path<i64>,
    Json(request): Json<ProcessWithdrawalRequest>,
) -> Result<Json<AckResponse>, HttpApiError> {
    let mut service = state.service.lock().await;
    service
        .process_withdrawal(withdrawal_id, false, request.notes.as_deref(), Utc::now())
        .map_err(HttpApiError::from_service)?;
    Ok(Json(ack()))
}
