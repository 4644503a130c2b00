#[derive(Debug)]
pub enum ServerError {
    Io(std::io::Error),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "server io error: {err}"),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<std::io::Error> for ServerError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

#[derive(Debug)]
struct HttpApiError {
    status: StatusCode,
    error: ApiError,
}

impl HttpApiError {
    fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            error: ApiError::new(ErrorCode::Unauthorized, "admin token required", None),
        }
    }

    fn not_found(message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            error: ApiError::new(ErrorCode::NotFound, message, details),
        }
    }

    fn invalid_request(message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: ApiError::new(ErrorCode::InvalidRequest, message, details),
        }
    }

    fn internal(message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: ApiError::new(ErrorCode::InternalError, message, details),
        }
    }

    fn from_service(err: ServiceError) -> Self {
        match err {
            ServiceError::Game(GameError::NotFound(message)) => Self::not_found(message, None),
            ServiceError::Game(GameError::Validation(message)) => {
                Self::invalid_request(message, None)
            }
            ServiceError::Game(game) => Self {
                status: StatusCode::CONFLICT,
                error: ApiError::new(ErrorCode::StateConflict, game.to_string(), None),
            },
            ServiceError::Store(store) => {
                tracing::error!(error = %store, "admin api store failure");
                Self::internal("store operation failed", Some(store.to_string()))
            }
        }
    }
}

impl IntoResponse for HttpApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.error)).into_response()
    }
}
